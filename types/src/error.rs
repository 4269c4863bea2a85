//! Errors for type-level parsing and validation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}
