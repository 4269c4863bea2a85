//! Caller-facing command rejections.

use thiserror::Error;

/// Why a command was rejected. These are precondition failures: nothing was
/// journalled and no state changed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("subject is not registered")]
    UnknownSubject,

    #[error("method not applicable to this subject class")]
    MethodNotApplicable,

    #[error("method already has an active run")]
    AlreadyActive,

    #[error("method already at its completion cap")]
    AlreadyMaxed,

    #[error("no active run for this method")]
    NoActiveRun,

    #[error("nothing to revoke for this method")]
    NothingToRevoke,

    #[error("unknown confirmation token")]
    TokenUnknown,

    #[error("confirmation token expired")]
    TokenExpired,

    #[error("verifier denied: {0}")]
    VerifierDenied(String),

    #[error("attestor denied: {0}")]
    AttestorDenied(String),

    #[error("attestor has already attested for this method")]
    AlreadyAttested,

    #[error("bad method parameters: {0}")]
    BadParams(String),

    #[error("temporarily unavailable, retry later")]
    TemporarilyUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}
