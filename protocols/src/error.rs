use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The run has already reached a terminal state.
    #[error("protocol run is no longer active")]
    NotActive,

    /// The supplied token matches no outstanding slot.
    #[error("unknown confirmation token")]
    UnknownToken,

    /// The token or confirmation window has lapsed.
    #[error("confirmation window expired")]
    Expired,

    /// The attestor does not meet the minimum verification level.
    #[error("attestor not authorized: {0}")]
    AttestorDenied(String),

    /// Subjects cannot attest for themselves.
    #[error("self-attestation is not allowed")]
    SelfAttestation,

    /// The signal does not apply to the protocol's current state.
    #[error("signal not expected in state {0}")]
    WrongState(String),

    /// Start parameters do not match what the method's protocol needs.
    #[error("bad method parameters: {0}")]
    BadParams(String),
}
