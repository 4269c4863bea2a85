use proptest::prelude::*;

use porch_types::{
    CommandId, Level, MethodCompletion, ProtocolRunId, SubjectId, Timestamp, VerificationMethod,
};

proptest! {
    /// SubjectId roundtrip: new -> to_string -> from_hex produces identical id.
    #[test]
    fn subject_id_hex_roundtrip(bytes in prop::array::uniform16(0u8..)) {
        let id = SubjectId::new(bytes);
        let parsed = SubjectId::from_hex(&id.to_string()).unwrap();
        prop_assert_eq!(id, parsed);
    }

    /// SubjectId bincode roundtrip.
    #[test]
    fn subject_id_bincode_roundtrip(bytes in prop::array::uniform16(0u8..)) {
        let id = SubjectId::new(bytes);
        let encoded = bincode::serialize(&id).unwrap();
        let decoded: SubjectId = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(id, decoded);
    }

    /// Run and command ids preserve their bytes.
    #[test]
    fn opaque_ids_preserve_bytes(bytes in prop::array::uniform16(0u8..)) {
        let run_id = ProtocolRunId::new(bytes);
        prop_assert_eq!(run_id.as_bytes(), &bytes);
        let command_id = CommandId::new(bytes);
        prop_assert_eq!(command_id.as_bytes(), &bytes);
    }

    /// Timestamp ordering agrees with the underlying seconds.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::new(a);
        let tb = Timestamp::new(b);
        prop_assert_eq!(ta <= tb, a <= b);
        prop_assert_eq!(ta == tb, a == b);
    }

    /// elapsed_since saturates at zero and is exact otherwise.
    #[test]
    fn timestamp_elapsed_since(base in 0u64..1_000_000, offset in 0u64..1_000_000) {
        let t = Timestamp::new(base);
        prop_assert_eq!(t.elapsed_since(Timestamp::new(base + offset)), offset);
        prop_assert_eq!(Timestamp::new(base + offset).elapsed_since(t), 0);
    }

    /// A completion with an expiry is effective up to and including the
    /// boundary instant, and never after.
    #[test]
    fn completion_expiry_boundary(completed in 0u64..1_000_000, ttl in 1u64..1_000_000) {
        let completion = MethodCompletion {
            method: VerificationMethod::Email,
            sequence_index: 1,
            completed_at: Timestamp::new(completed),
            evidence_ref: Vec::new(),
            expires_at: Some(Timestamp::new(completed + ttl)),
            revoked_at: None,
            revocation_reason: None,
        };
        prop_assert!(completion.is_effective(Timestamp::new(completed + ttl)));
        prop_assert!(!completion.is_effective(Timestamp::new(completed + ttl + 1)));
    }

    /// Level thresholds are monotone in level order.
    #[test]
    fn level_threshold_monotone(i in 0usize..4) {
        let lower = Level::ALL[i];
        let upper = Level::ALL[i + 1];
        prop_assert!(lower.threshold() < upper.threshold());
    }
}
