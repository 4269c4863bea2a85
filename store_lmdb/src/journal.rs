//! LMDB implementation of the journal store.
//!
//! Events are keyed `subject(16) ‖ seq_be(8)` so a range scan walks one
//! subject's journal in seq order. The tip table gives O(1) last-seq
//! lookups and carries the optimistic-concurrency check: tip read, compare
//! and event write all happen inside one write transaction.

use std::ops::Bound;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use porch_store::{JournalStore, StoreError};
use porch_types::{SubjectId, VerificationEvent};

use crate::LmdbError;

pub struct LmdbJournalStore {
    pub(crate) env: Arc<Env>,
    pub(crate) journal_db: Database<Bytes, Bytes>,
    pub(crate) journal_tip_db: Database<Bytes, Bytes>,
}

fn event_key(subject: SubjectId, seq: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(subject.as_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn decode_tip(bytes: Option<&[u8]>) -> Result<u64, LmdbError> {
    match bytes {
        None => Ok(0),
        Some(b) => {
            let arr: [u8; 8] = b
                .try_into()
                .map_err(|_| LmdbError::Serialization("journal tip is not 8 bytes".into()))?;
            Ok(u64::from_be_bytes(arr))
        }
    }
}

impl JournalStore for LmdbJournalStore {
    fn append(
        &self,
        subject: SubjectId,
        expected_last_seq: u64,
        event: &VerificationEvent,
    ) -> Result<u64, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;

        let tip = decode_tip(
            self.journal_tip_db
                .get(&wtxn, subject.as_bytes())
                .map_err(LmdbError::from)?,
        )?;
        if tip != expected_last_seq {
            return Err(StoreError::Conflict {
                expected: expected_last_seq,
                actual: tip,
            });
        }
        if event.seq != tip + 1 {
            return Err(StoreError::Corruption(format!(
                "event seq {} does not extend journal at {tip}",
                event.seq
            )));
        }

        let value = bincode::serialize(event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.journal_db
            .put(&mut wtxn, &event_key(subject, event.seq), &value)
            .map_err(LmdbError::from)?;
        self.journal_tip_db
            .put(&mut wtxn, subject.as_bytes(), &event.seq.to_be_bytes())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(event.seq)
    }

    fn read_from(
        &self,
        subject: SubjectId,
        from_seq: u64,
    ) -> Result<Vec<VerificationEvent>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let start = event_key(subject, from_seq);
        let end = event_key(subject, u64::MAX);
        let bounds = (
            Bound::Included(&start[..]),
            Bound::Included(&end[..]),
        );
        let mut events = Vec::new();
        let range = self
            .journal_db
            .range(&rtxn, &bounds)
            .map_err(LmdbError::from)?;
        for item in range {
            let (_, value) = item.map_err(LmdbError::from)?;
            let event: VerificationEvent = bincode::deserialize(value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    fn last_seq(&self, subject: SubjectId) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let tip = decode_tip(
            self.journal_tip_db
                .get(&rtxn, subject.as_bytes())
                .map_err(LmdbError::from)?,
        )?;
        Ok(tip)
    }
}
