//! porch verification daemon — wires storage, collaborators and the
//! gateway together and runs until interrupted.
//!
//! Transport front-ends (HTTP, queue consumers) attach to the [`Gateway`]
//! from their own crates; this binary only owns process lifecycle. The
//! bundled collaborators log instead of delivering — real delivery backends
//! are registered by the platform deployment.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use porch_gateway::Gateway;
use porch_orchestrator::{
    CodeDelivery, CollaboratorError, Collaborators, Notification, NotificationSink, ReviewQueue,
    Stores, SystemClock,
};
use porch_protocols::SystemTokenSource;
use porch_store::SnapshotCache;
use porch_store_lmdb::LmdbStores;
use porch_types::{EngineParams, SubjectId, VerificationMethod};
use porch_utils::{init_logging, LogFormat};

#[derive(Parser)]
#[command(name = "porch-daemon", about = "porch verification engine daemon")]
struct Cli {
    /// Data directory for journal storage.
    #[arg(long, default_value = "./porch_data", env = "PORCH_DATA_DIR")]
    data_dir: PathBuf,

    /// LMDB map size in MiB.
    #[arg(long, default_value_t = 1024, env = "PORCH_MAP_SIZE_MIB")]
    map_size_mib: usize,

    /// Append a snapshot checkpoint marker every N journal events.
    #[arg(long, default_value_t = 1000, env = "PORCH_CHECKPOINT_EVERY")]
    checkpoint_every: u64,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, default_value = "info", env = "PORCH_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as newline-delimited JSON instead of human-readable lines.
    #[arg(long, env = "PORCH_LOG_JSON")]
    log_json: bool,
}

/// Logs notifications instead of delivering them.
struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn deliver(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        info!(?notification, "notification dispatched");
        Ok(())
    }
}

/// Logs code dispatches. Never logs the code itself.
struct LogDelivery;

impl CodeDelivery for LogDelivery {
    fn send(&self, target: &str, _code: &str, ttl_secs: u64) -> Result<(), CollaboratorError> {
        info!(to = target, ttl_secs, "challenge code dispatched");
        Ok(())
    }
}

/// Logs review submissions.
struct LogReviewQueue;

impl ReviewQueue for LogReviewQueue {
    fn enqueue(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        blob_ref: &[u8],
    ) -> Result<(), CollaboratorError> {
        info!(%subject, %method, blob_len = blob_ref.len(), "review task enqueued");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    init_logging(format, &cli.log_level);

    info!(data_dir = %cli.data_dir.display(), "opening journal storage");
    let lmdb = LmdbStores::open(&cli.data_dir, cli.map_size_mib << 20)?;

    let journal = Arc::new(lmdb.journal_store());
    let stores = Stores {
        journal: journal.clone(),
        tokens: Arc::new(lmdb.token_store()),
        verifiers: Arc::new(lmdb.verifier_store()),
        meta: Arc::new(lmdb.meta_store()),
        registry: Arc::new(lmdb.subject_registry()),
        snapshots: Arc::new(SnapshotCache::new(journal)),
    };
    let collaborators = Collaborators {
        notifier: Arc::new(LogNotifier),
        delivery: Arc::new(LogDelivery),
        review_queue: Arc::new(LogReviewQueue),
        token_source: Arc::new(SystemTokenSource),
    };
    let params = EngineParams {
        checkpoint_every_events: cli.checkpoint_every,
        ..EngineParams::default()
    };

    // Front-ends (HTTP, queue consumers) register against this gateway
    // from their own crates; the daemon only owns its lifetime.
    let _gateway = Arc::new(Gateway::new(
        params,
        stores,
        collaborators,
        Arc::new(SystemClock),
    ));

    info!("verification engine running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
