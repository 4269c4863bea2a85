//! Per-subject append-only journal storage.

use porch_types::{SubjectId, VerificationEvent};

use crate::StoreError;

/// Append-only event journal, one independent linearizable stream per
/// subject.
///
/// `append` is atomic and uses optimistic concurrency: the caller states the
/// last seq it observed, and the write fails with [`StoreError::Conflict`]
/// if the journal has moved past it. The event's own `seq` must be
/// `expected_last_seq + 1`; the journal never has gaps.
pub trait JournalStore: Send + Sync {
    /// Append one event. Returns the committed seq. Durable once this
    /// returns.
    fn append(
        &self,
        subject: SubjectId,
        expected_last_seq: u64,
        event: &VerificationEvent,
    ) -> Result<u64, StoreError>;

    /// Read events with `seq >= from_seq`, ascending.
    fn read_from(
        &self,
        subject: SubjectId,
        from_seq: u64,
    ) -> Result<Vec<VerificationEvent>, StoreError>;

    /// Last committed seq for the subject; 0 if the journal is empty.
    fn last_seq(&self, subject: SubjectId) -> Result<u64, StoreError>;
}
