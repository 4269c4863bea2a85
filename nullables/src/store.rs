//! In-memory store implementations.
//!
//! Honour the same contracts as the LMDB backends (optimistic concurrency,
//! put-if-absent semantics) without touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use porch_store::{
    JournalStore, MetaStore, StoreError, SubjectRegistry, TokenRecord, TokenStore, VerifierStore,
};
use porch_types::{ProtocolRunId, SubjectClass, SubjectId, VerificationEvent, VerifierRecord};

/// In-memory per-subject journal with optimistic-concurrency append.
#[derive(Default)]
pub struct MemoryJournal {
    journals: Mutex<HashMap<SubjectId, Vec<VerificationEvent>>>,
    /// When set, the next N appends fail with a backend error.
    fail_next: Mutex<u32>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail, to exercise retry paths.
    pub fn fail_next_appends(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    /// All events for a subject, for assertions.
    pub fn events(&self, subject: SubjectId) -> Vec<VerificationEvent> {
        self.journals
            .lock()
            .unwrap()
            .get(&subject)
            .cloned()
            .unwrap_or_default()
    }
}

impl JournalStore for MemoryJournal {
    fn append(
        &self,
        subject: SubjectId,
        expected_last_seq: u64,
        event: &VerificationEvent,
    ) -> Result<u64, StoreError> {
        {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(StoreError::Backend("injected failure".into()));
            }
        }
        let mut journals = self.journals.lock().unwrap();
        let journal = journals.entry(subject).or_default();
        let last = journal.len() as u64;
        if last != expected_last_seq {
            return Err(StoreError::Conflict {
                expected: expected_last_seq,
                actual: last,
            });
        }
        if event.seq != last + 1 {
            return Err(StoreError::Corruption(format!(
                "event seq {} does not extend journal at {last}",
                event.seq
            )));
        }
        journal.push(event.clone());
        Ok(event.seq)
    }

    fn read_from(
        &self,
        subject: SubjectId,
        from_seq: u64,
    ) -> Result<Vec<VerificationEvent>, StoreError> {
        let journals = self.journals.lock().unwrap();
        Ok(journals
            .get(&subject)
            .map(|j| j.iter().filter(|e| e.seq >= from_seq).cloned().collect())
            .unwrap_or_default())
    }

    fn last_seq(&self, subject: SubjectId) -> Result<u64, StoreError> {
        let journals = self.journals.lock().unwrap();
        Ok(journals.get(&subject).map(|j| j.len() as u64).unwrap_or(0))
    }
}

/// In-memory token store with put-if-absent semantics.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<[u8; 32], TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn put_if_absent(&self, record: &TokenRecord) -> Result<bool, StoreError> {
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.contains_key(&record.token) {
            return Ok(false);
        }
        tokens.insert(record.token, record.clone());
        Ok(true)
    }

    fn get(&self, token: &[u8; 32]) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.lock().unwrap().get(token).cloned())
    }

    fn invalidate(&self, token: &[u8; 32]) -> Result<(), StoreError> {
        if let Some(record) = self.tokens.lock().unwrap().get_mut(token) {
            record.invalidated = true;
        }
        Ok(())
    }

    fn find_by_run(&self, run_id: ProtocolRunId) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }
}

/// In-memory verifier record store.
#[derive(Default)]
pub struct MemoryVerifierStore {
    records: Mutex<HashMap<SubjectId, VerifierRecord>>,
}

impl MemoryVerifierStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VerifierStore for MemoryVerifierStore {
    fn get(&self, id: SubjectId) -> Result<Option<VerifierRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    fn put(&self, record: &VerifierRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .insert(record.subject_id, record.clone());
        Ok(())
    }

    fn add_confirmations(&self, id: SubjectId, delta: i32) -> Result<u32, StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("verifier {id}")))?;
        record.successful_confirmations = if delta >= 0 {
            record.successful_confirmations.saturating_add(delta as u32)
        } else {
            record
                .successful_confirmations
                .saturating_sub(delta.unsigned_abs())
        };
        Ok(record.successful_confirmations)
    }
}

/// In-memory engine metadata store.
#[derive(Default)]
pub struct MemoryMeta {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryMeta {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMeta {
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }
}

/// In-memory subject directory.
#[derive(Default)]
pub struct MemoryRegistry {
    subjects: Mutex<HashMap<SubjectId, SubjectClass>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubjectRegistry for MemoryRegistry {
    fn get(&self, id: SubjectId) -> Result<Option<SubjectClass>, StoreError> {
        Ok(self.subjects.lock().unwrap().get(&id).copied())
    }

    fn put(&self, id: SubjectId, class: SubjectClass) -> Result<(), StoreError> {
        self.subjects.lock().unwrap().insert(id, class);
        Ok(())
    }
}
