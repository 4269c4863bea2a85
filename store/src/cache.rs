//! Read-through snapshot cache over the journal.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use porch_types::{SubjectClass, SubjectId, SubjectSnapshot, Timestamp};

use crate::journal::JournalStore;
use crate::projection::{apply_event, finalize};
use crate::StoreError;

/// Caches per-subject snapshots derived from the journal.
///
/// A cached snapshot is served as long as it reflects the journal's last
/// seq; otherwise the missing suffix is folded in. Read-your-write holds:
/// a `snapshot` call after a committed `append` always sees the appended
/// event.
pub struct SnapshotCache {
    journal: Arc<dyn JournalStore>,
    cache: RwLock<HashMap<SubjectId, SubjectSnapshot>>,
}

impl SnapshotCache {
    pub fn new(journal: Arc<dyn JournalStore>) -> Self {
        Self {
            journal,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Current snapshot for `subject`, rebuilding from the journal if the
    /// cached copy is stale or missing. Score and level are finalized at
    /// `now`.
    pub fn snapshot(
        &self,
        subject: SubjectId,
        class: SubjectClass,
        now: Timestamp,
    ) -> Result<SubjectSnapshot, StoreError> {
        let tip = self.journal.last_seq(subject)?;

        let cached = {
            let cache = self.cache.read().expect("snapshot cache poisoned");
            cache.get(&subject).cloned()
        };

        let mut snapshot = match cached {
            Some(snap) if snap.last_seq <= tip => snap,
            // A cache ahead of the journal means the journal lost writes.
            Some(snap) => {
                return Err(StoreError::Corruption(format!(
                    "cached snapshot for {subject} at seq {} ahead of journal tip {tip}",
                    snap.last_seq
                )))
            }
            None => SubjectSnapshot::new(subject, class),
        };

        if snapshot.last_seq < tip {
            let suffix = self.journal.read_from(subject, snapshot.last_seq + 1)?;
            for event in &suffix {
                apply_event(&mut snapshot, event)?;
            }
        }
        finalize(&mut snapshot, now);

        let mut cache = self.cache.write().expect("snapshot cache poisoned");
        cache.insert(subject, snapshot.clone());
        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next read refolds from the journal.
    pub fn invalidate(&self, subject: SubjectId) {
        let mut cache = self.cache.write().expect("snapshot cache poisoned");
        cache.remove(&subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalStore;
    use porch_types::{
        EventData, MethodCompletion, Timestamp, VerificationEvent, VerificationMethod,
    };
    use std::sync::Mutex;

    /// Minimal journal double that counts reads.
    #[derive(Default)]
    struct StubJournal {
        events: Mutex<Vec<VerificationEvent>>,
        reads: Mutex<u32>,
    }

    impl StubJournal {
        fn push(&self, event: VerificationEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn reads(&self) -> u32 {
            *self.reads.lock().unwrap()
        }
    }

    impl JournalStore for StubJournal {
        fn append(
            &self,
            _subject: SubjectId,
            _expected_last_seq: u64,
            event: &VerificationEvent,
        ) -> Result<u64, StoreError> {
            self.push(event.clone());
            Ok(event.seq)
        }

        fn read_from(
            &self,
            _subject: SubjectId,
            from_seq: u64,
        ) -> Result<Vec<VerificationEvent>, StoreError> {
            *self.reads.lock().unwrap() += 1;
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.seq >= from_seq)
                .cloned()
                .collect())
        }

        fn last_seq(&self, _subject: SubjectId) -> Result<u64, StoreError> {
            Ok(self.events.lock().unwrap().len() as u64)
        }
    }

    fn completed_event(seq: u64) -> VerificationEvent {
        VerificationEvent {
            seq,
            at: Timestamp::new(100),
            method: Some(VerificationMethod::TwoPartyInPerson),
            actor: None,
            protocol_run_id: None,
            data: EventData::MethodCompleted {
                completion: MethodCompletion {
                    method: VerificationMethod::TwoPartyInPerson,
                    sequence_index: 1,
                    completed_at: Timestamp::new(100),
                    evidence_ref: Vec::new(),
                    expires_at: None,
                    revoked_at: None,
                    revocation_reason: None,
                },
            },
        }
    }

    #[test]
    fn read_your_write_after_append() {
        let journal = Arc::new(StubJournal::default());
        let cache = SnapshotCache::new(journal.clone());
        let subject = SubjectId::new([1; 16]);

        let snap = cache
            .snapshot(subject, SubjectClass::Individual, Timestamp::new(100))
            .unwrap();
        assert_eq!(snap.score, 0);

        journal.push(completed_event(1));
        let snap = cache
            .snapshot(subject, SubjectClass::Individual, Timestamp::new(200))
            .unwrap();
        assert_eq!(snap.score, 150);
        assert_eq!(snap.last_seq, 1);
    }

    #[test]
    fn fresh_cache_skips_journal_suffix_reads() {
        let journal = Arc::new(StubJournal::default());
        let cache = SnapshotCache::new(journal.clone());
        let subject = SubjectId::new([1; 16]);

        journal.push(completed_event(1));
        cache
            .snapshot(subject, SubjectClass::Individual, Timestamp::new(200))
            .unwrap();
        let reads_after_first = journal.reads();

        // Nothing new appended: the second read serves from cache.
        cache
            .snapshot(subject, SubjectClass::Individual, Timestamp::new(300))
            .unwrap();
        assert_eq!(journal.reads(), reads_after_first);
    }

    #[test]
    fn invalidate_forces_a_refold() {
        let journal = Arc::new(StubJournal::default());
        let cache = SnapshotCache::new(journal.clone());
        let subject = SubjectId::new([1; 16]);

        journal.push(completed_event(1));
        cache
            .snapshot(subject, SubjectClass::Individual, Timestamp::new(200))
            .unwrap();
        let reads_before = journal.reads();

        cache.invalidate(subject);
        let snap = cache
            .snapshot(subject, SubjectClass::Individual, Timestamp::new(200))
            .unwrap();
        assert_eq!(snap.score, 150);
        assert!(journal.reads() > reads_before);
    }
}

