//! LMDB implementation of the subject registry.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use porch_store::{StoreError, SubjectRegistry};
use porch_types::{SubjectClass, SubjectId};

use crate::LmdbError;

pub struct LmdbSubjectRegistry {
    pub(crate) env: Arc<Env>,
    pub(crate) registry_db: Database<Bytes, Bytes>,
}

fn class_tag(class: SubjectClass) -> u8 {
    match class {
        SubjectClass::Individual => 0,
        SubjectClass::Business => 1,
        SubjectClass::Organization => 2,
    }
}

fn class_from_tag(tag: u8) -> Result<SubjectClass, StoreError> {
    match tag {
        0 => Ok(SubjectClass::Individual),
        1 => Ok(SubjectClass::Business),
        2 => Ok(SubjectClass::Organization),
        other => Err(StoreError::Corruption(format!(
            "unknown subject class tag {other}"
        ))),
    }
}

impl SubjectRegistry for LmdbSubjectRegistry {
    fn get(&self, id: SubjectId) -> Result<Option<SubjectClass>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .registry_db
            .get(&rtxn, id.as_bytes())
            .map_err(LmdbError::from)?
        {
            None => Ok(None),
            Some([tag]) => Ok(Some(class_from_tag(*tag)?)),
            Some(other) => Err(StoreError::Corruption(format!(
                "subject class entry has {} bytes",
                other.len()
            ))),
        }
    }

    fn put(&self, id: SubjectId, class: SubjectClass) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.registry_db
            .put(&mut wtxn, id.as_bytes(), &[class_tag(class)])
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmdbStores;

    #[test]
    fn register_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let stores = LmdbStores::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let registry = stores.subject_registry();
        let id = SubjectId::new([4; 16]);

        assert_eq!(registry.get(id).unwrap(), None);
        registry.put(id, SubjectClass::Business).unwrap();
        assert_eq!(registry.get(id).unwrap(), Some(SubjectClass::Business));
        // Re-registration overwrites.
        registry.put(id, SubjectClass::Organization).unwrap();
        assert_eq!(registry.get(id).unwrap(), Some(SubjectClass::Organization));
    }
}
