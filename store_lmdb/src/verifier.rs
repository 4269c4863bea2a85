//! LMDB implementation of the verifier record store.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use porch_store::{StoreError, VerifierStore};
use porch_types::{SubjectId, VerifierRecord};

use crate::LmdbError;

pub struct LmdbVerifierStore {
    pub(crate) env: Arc<Env>,
    pub(crate) verifiers_db: Database<Bytes, Bytes>,
}

impl VerifierStore for LmdbVerifierStore {
    fn get(&self, id: SubjectId) -> Result<Option<VerifierRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .verifiers_db
            .get(&rtxn, id.as_bytes())
            .map_err(LmdbError::from)?
        {
            None => Ok(None),
            Some(bytes) => {
                let record: VerifierRecord = bincode::deserialize(bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
        }
    }

    fn put(&self, record: &VerifierRecord) -> Result<(), StoreError> {
        let value = bincode::serialize(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.verifiers_db
            .put(&mut wtxn, record.subject_id.as_bytes(), &value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    /// Atomic within one write transaction: read, adjust, write back.
    fn add_confirmations(&self, id: SubjectId, delta: i32) -> Result<u32, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let bytes = self
            .verifiers_db
            .get(&wtxn, id.as_bytes())
            .map_err(LmdbError::from)?
            .ok_or_else(|| StoreError::NotFound(format!("verifier {id}")))?;
        let mut record: VerifierRecord = bincode::deserialize(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        record.successful_confirmations = if delta >= 0 {
            record.successful_confirmations.saturating_add(delta as u32)
        } else {
            record
                .successful_confirmations
                .saturating_sub(delta.unsigned_abs())
        };
        let value = bincode::serialize(&record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.verifiers_db
            .put(&mut wtxn, id.as_bytes(), &value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(record.successful_confirmations)
    }
}
