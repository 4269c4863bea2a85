//! Cross-cutting helpers: logging initialisation and retry backoff.

pub mod backoff;
pub mod logging;

pub use backoff::Backoff;
pub use logging::{init_logging, LogFormat};
