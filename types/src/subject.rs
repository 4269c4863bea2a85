//! Subject identity: opaque 128-bit id plus the subject class.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TypeError;

/// An opaque 128-bit subject identifier.
///
/// Assigned at registration by the platform; the engine never interprets
/// the bytes. Displayed as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectId([u8; 16]);

impl SubjectId {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse from a 32-character lowercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.len() != 32 {
            return Err(TypeError::InvalidId(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0]).ok_or_else(|| TypeError::InvalidId(s.to_string()))?;
            let lo = hex_val(chunk[1]).ok_or_else(|| TypeError::InvalidId(s.to_string()))?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The class of a registered subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectClass {
    Individual,
    Business,
    Organization,
}

impl SubjectClass {
    pub const ALL: [SubjectClass; 3] = [
        SubjectClass::Individual,
        SubjectClass::Business,
        SubjectClass::Organization,
    ];
}

impl fmt::Display for SubjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubjectClass::Individual => "individual",
            SubjectClass::Business => "business",
            SubjectClass::Organization => "organization",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_id_hex_roundtrip() {
        let id = SubjectId::new([0xab; 16]);
        let parsed = SubjectId::from_hex(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn subject_id_rejects_bad_hex() {
        assert!(SubjectId::from_hex("xyz").is_err());
        assert!(SubjectId::from_hex(&"g".repeat(32)).is_err());
        assert!(SubjectId::from_hex(&"ab".repeat(15)).is_err());
    }
}
