//! LMDB implementation of the meta store.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use porch_store::{MetaStore, StoreError};

use crate::LmdbError;

pub struct LmdbMetaStore {
    pub(crate) env: Arc<Env>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl MetaStore for LmdbMetaStore {
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.meta_db
            .put(&mut wtxn, key.as_bytes(), value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self
            .meta_db
            .get(&rtxn, key.as_bytes())
            .map_err(LmdbError::from)?
            .map(|v| v.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmdbStores;

    #[test]
    fn meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stores = LmdbStores::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let meta = stores.meta_store();

        assert_eq!(meta.get_meta("checkpoint/abc").unwrap(), None);
        meta.put_meta("checkpoint/abc", &42u64.to_le_bytes()).unwrap();
        assert_eq!(
            meta.get_meta("checkpoint/abc").unwrap(),
            Some(42u64.to_le_bytes().to_vec())
        );
    }
}
