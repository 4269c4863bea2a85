//! LMDB implementation of the token store.
//!
//! Two databases:
//! - `tokens_db`: `token(32)` → bincode(TokenRecord). Put-if-absent runs
//!   inside one write transaction, so concurrent issuers cannot both claim
//!   a token value.
//! - `token_runs_db`: composite key `run_id(16) ‖ token(32)` → empty.
//!   Prefix range-scan finds a run's tokens when restoring after a restart.

use std::ops::Bound;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use porch_store::{StoreError, TokenRecord, TokenStore};
use porch_types::ProtocolRunId;

use crate::LmdbError;

pub struct LmdbTokenStore {
    pub(crate) env: Arc<Env>,
    pub(crate) tokens_db: Database<Bytes, Bytes>,
    pub(crate) token_runs_db: Database<Bytes, Bytes>,
}

/// Build the 48-byte composite key `run_id ‖ token` for `token_runs_db`.
fn run_composite_key(run_id: ProtocolRunId, token: &[u8; 32]) -> [u8; 48] {
    let mut key = [0u8; 48];
    key[..16].copy_from_slice(run_id.as_bytes());
    key[16..].copy_from_slice(token);
    key
}

impl TokenStore for LmdbTokenStore {
    fn put_if_absent(&self, record: &TokenRecord) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self
            .tokens_db
            .get(&wtxn, &record.token)
            .map_err(LmdbError::from)?
            .is_some()
        {
            return Ok(false);
        }
        let value = bincode::serialize(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.tokens_db
            .put(&mut wtxn, &record.token, &value)
            .map_err(LmdbError::from)?;
        self.token_runs_db
            .put(
                &mut wtxn,
                &run_composite_key(record.run_id, &record.token),
                &[],
            )
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn get(&self, token: &[u8; 32]) -> Result<Option<TokenRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self.tokens_db.get(&rtxn, token).map_err(LmdbError::from)? {
            None => Ok(None),
            Some(bytes) => {
                let record: TokenRecord = bincode::deserialize(bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
        }
    }

    fn invalidate(&self, token: &[u8; 32]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let Some(bytes) = self.tokens_db.get(&wtxn, token).map_err(LmdbError::from)? else {
            return Ok(());
        };
        let mut record: TokenRecord = bincode::deserialize(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        record.invalidated = true;
        let value = bincode::serialize(&record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.tokens_db
            .put(&mut wtxn, token, &value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn find_by_run(&self, run_id: ProtocolRunId) -> Result<Vec<TokenRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let start = run_composite_key(run_id, &[0u8; 32]);
        let end = run_composite_key(run_id, &[0xffu8; 32]);
        let bounds = (
            Bound::Included(&start[..]),
            Bound::Included(&end[..]),
        );
        let mut records = Vec::new();
        let iter = self
            .token_runs_db
            .range(&rtxn, &bounds)
            .map_err(LmdbError::from)?;
        for item in iter {
            let (key, _) = item.map_err(LmdbError::from)?;
            if key.len() != 48 {
                continue;
            }
            let mut token = [0u8; 32];
            token.copy_from_slice(&key[16..]);
            if let Some(bytes) = self.tokens_db.get(&rtxn, &token).map_err(LmdbError::from)? {
                let record: TokenRecord = bincode::deserialize(bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                records.push(record);
            }
        }
        Ok(records)
    }
}
