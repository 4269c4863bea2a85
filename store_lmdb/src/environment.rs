//! LMDB environment setup.

use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::journal::LmdbJournalStore;
use crate::meta::LmdbMetaStore;
use crate::registry::LmdbSubjectRegistry;
use crate::token::LmdbTokenStore;
use crate::verifier::LmdbVerifierStore;
use crate::LmdbError;

/// Default LMDB map size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;
/// Number of named LMDB databases.
const MAX_DBS: u32 = 7;

/// Wraps the LMDB environment and hands out store implementations sharing
/// it.
pub struct LmdbStores {
    env: Arc<Env>,

    // Journal store
    pub(crate) journal_db: Database<Bytes, Bytes>,
    /// subject(16) → last seq (BE u64); O(1) tip lookup.
    pub(crate) journal_tip_db: Database<Bytes, Bytes>,

    // Token store
    pub(crate) tokens_db: Database<Bytes, Bytes>,
    /// Reverse index: run_id(16) ‖ token(32) → (). Finds a run's tokens.
    pub(crate) token_runs_db: Database<Bytes, Bytes>,

    // Verifier store
    pub(crate) verifiers_db: Database<Bytes, Bytes>,

    // Subject registry
    pub(crate) registry_db: Database<Bytes, Bytes>,

    // Meta store
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbStores {
    /// Open or create an LMDB environment at the given path.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)
            .map_err(|e| LmdbError::Heed(format!("failed to create directory: {e}")))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(MAX_DBS)
                .map_size(map_size)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let journal_db = env.create_database(&mut wtxn, Some("journal"))?;
        let journal_tip_db = env.create_database(&mut wtxn, Some("journal_tips"))?;
        let tokens_db = env.create_database(&mut wtxn, Some("tokens"))?;
        let token_runs_db = env.create_database(&mut wtxn, Some("token_runs"))?;
        let verifiers_db = env.create_database(&mut wtxn, Some("verifiers"))?;
        let registry_db = env.create_database(&mut wtxn, Some("registry"))?;
        let meta_db = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        Ok(Self {
            env: Arc::new(env),
            journal_db,
            journal_tip_db,
            tokens_db,
            token_runs_db,
            verifiers_db,
            registry_db,
            meta_db,
        })
    }

    pub(crate) fn env(&self) -> Arc<Env> {
        self.env.clone()
    }

    pub fn journal_store(&self) -> LmdbJournalStore {
        LmdbJournalStore {
            env: self.env(),
            journal_db: self.journal_db,
            journal_tip_db: self.journal_tip_db,
        }
    }

    pub fn token_store(&self) -> LmdbTokenStore {
        LmdbTokenStore {
            env: self.env(),
            tokens_db: self.tokens_db,
            token_runs_db: self.token_runs_db,
        }
    }

    pub fn verifier_store(&self) -> LmdbVerifierStore {
        LmdbVerifierStore {
            env: self.env(),
            verifiers_db: self.verifiers_db,
        }
    }

    pub fn subject_registry(&self) -> LmdbSubjectRegistry {
        LmdbSubjectRegistry {
            env: self.env(),
            registry_db: self.registry_db,
        }
    }

    pub fn meta_store(&self) -> LmdbMetaStore {
        LmdbMetaStore {
            env: self.env(),
            meta_db: self.meta_db,
        }
    }
}
