//! Caller-facing gateway errors.

use thiserror::Error;

use porch_orchestrator::CommandError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("subject is not registered")]
    UnknownSubject,

    #[error("unknown confirmation token")]
    TokenUnknown,

    #[error("confirmation token expired")]
    TokenExpired,

    #[error("verifier denied: {0}")]
    VerifierDenied(String),

    #[error(transparent)]
    Command(CommandError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CommandError> for GatewayError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::UnknownSubject => GatewayError::UnknownSubject,
            CommandError::TokenUnknown => GatewayError::TokenUnknown,
            CommandError::TokenExpired => GatewayError::TokenExpired,
            CommandError::VerifierDenied(reason) => GatewayError::VerifierDenied(reason),
            other => GatewayError::Command(other),
        }
    }
}
