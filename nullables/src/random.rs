//! Nullable randomness — deterministic tokens, salts and codes.

use std::sync::atomic::{AtomicU32, Ordering};

use porch_protocols::TokenSource;

/// A deterministic token source.
///
/// Tokens and ids are derived from an incrementing counter; codes cycle
/// through a fixed sequence so tests know what to submit.
pub struct NullTokenSource {
    counter: AtomicU32,
}

impl NullTokenSource {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    fn next(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The code any challenge started with this source will accept.
    pub const CODE: &'static str = "424242";
}

impl Default for NullTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for NullTokenSource {
    fn fresh_token(&self) -> [u8; 32] {
        let n = self.next();
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&n.to_be_bytes());
        bytes
    }

    fn fresh_id(&self) -> [u8; 16] {
        let n = self.next();
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&n.to_be_bytes());
        bytes
    }

    fn fresh_code(&self) -> String {
        Self::CODE.to_string()
    }
}
