//! The gateway proper: subject index plus command/query routing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use porch_orchestrator::{
    spawn_subject, Clock, Collaborators, Command, CommandError, CommandOutcome, MethodStatus,
    Stores, SubjectHandle,
};
use porch_scoring::NextLevelInfo;
use porch_store::{SubjectRegistry, TokenStore, VerifierStore};
use porch_types::{
    CommandId, EngineParams, Level, MethodParams, ProtocolRunId, SubjectClass, SubjectId,
    SubjectSnapshot, VerificationMethod,
};

use crate::error::GatewayError;

/// Routes caller operations to per-subject orchestrators.
pub struct Gateway {
    params: EngineParams,
    stores: Stores,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    index: RwLock<HashMap<SubjectId, SubjectHandle>>,
}

impl Gateway {
    pub fn new(
        params: EngineParams,
        stores: Stores,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            params,
            stores,
            collaborators,
            clock,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subject (signup path). Idempotent.
    pub fn register_subject(
        &self,
        subject: SubjectId,
        class: SubjectClass,
    ) -> Result<(), GatewayError> {
        self.stores
            .registry
            .put(subject, class)
            .map_err(|e| GatewayError::Storage(e.to_string()))
    }

    /// Look up the subject's orchestrator handle, spawning it on first use.
    /// Concurrent first-commands rendezvous on a single instance via the
    /// double-checked write lock.
    async fn handle(&self, subject: SubjectId) -> Result<SubjectHandle, GatewayError> {
        {
            let index = self.index.read().await;
            if let Some(handle) = index.get(&subject) {
                if handle.is_alive() {
                    return Ok(handle.clone());
                }
            }
        }

        let class = self
            .stores
            .registry
            .get(subject)
            .map_err(|e| GatewayError::Storage(e.to_string()))?
            .ok_or(GatewayError::UnknownSubject)?;

        let mut index = self.index.write().await;
        if let Some(handle) = index.get(&subject) {
            if handle.is_alive() {
                return Ok(handle.clone());
            }
            // A halted task's handle is replaced by a fresh rehydration.
            info!(subject = %subject, "respawning halted orchestrator");
        }
        let handle = spawn_subject(
            subject,
            class,
            self.params.clone(),
            self.stores.clone(),
            self.collaborators.clone(),
            self.clock.clone(),
        )
        .map_err(|e| GatewayError::Storage(e.to_string()))?;
        index.insert(subject, handle.clone());
        Ok(handle)
    }

    // ── Commands ────────────────────────────────────────────────────────

    pub async fn start_method(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        params: MethodParams,
        command_id: CommandId,
    ) -> Result<ProtocolRunId, GatewayError> {
        let handle = self.handle(subject).await?;
        let outcome = handle
            .command(Command::StartMethod {
                method,
                params,
                command_id,
            })
            .await?;
        match outcome {
            CommandOutcome::Started { run_id } => Ok(run_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn enter_code(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        code: String,
        command_id: CommandId,
    ) -> Result<CommandOutcome, GatewayError> {
        let handle = self.handle(subject).await?;
        Ok(handle
            .command(Command::EnterCode {
                method,
                code,
                command_id,
            })
            .await?)
    }

    /// A verifier's confirmation arrives addressed by token; resolve it to
    /// the target subject, sanity-check the verifier, and forward to the
    /// *target's* orchestrator.
    pub async fn verifier_confirm(
        &self,
        token: [u8; 32],
        verifier: SubjectId,
        evidence: Vec<u8>,
        command_id: CommandId,
    ) -> Result<bool, GatewayError> {
        let now = self.clock.now();
        let record = self
            .stores
            .tokens
            .get(&token)
            .map_err(|e| GatewayError::Storage(e.to_string()))?
            .ok_or(GatewayError::TokenUnknown)?;
        if !record.is_live(now) {
            return Err(GatewayError::TokenExpired);
        }

        // Cheap pre-check so an obviously denied verifier never touches the
        // target's orchestrator. The saga re-validates both confirmations.
        let verifier_record = self
            .stores
            .verifiers
            .get(verifier)
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        let level = self.snapshot_level(verifier, now)?;
        if let Err(denial) = porch_policy::authorize(
            verifier_record.as_ref(),
            level,
            VerificationMethod::TwoPartyInPerson,
            now,
        ) {
            return Err(GatewayError::VerifierDenied(denial.to_string()));
        }

        let handle = self.handle(record.subject).await?;
        let outcome = handle
            .command(Command::VerifierConfirm {
                token,
                verifier,
                evidence,
                command_id,
            })
            .await?;
        match outcome {
            CommandOutcome::ConfirmationAccepted { .. } => Ok(true),
            other => Err(unexpected(other)),
        }
    }

    /// Community attestation: resolves the attestor's level and forwards.
    pub async fn community_attest(
        &self,
        subject: SubjectId,
        attestor: SubjectId,
        text: String,
        command_id: CommandId,
    ) -> Result<bool, GatewayError> {
        self.attest(
            subject,
            VerificationMethod::CommunityAttestation,
            attestor,
            text,
            command_id,
        )
        .await
    }

    /// Attestation intake for any reference-style method.
    pub async fn attest(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        attestor: SubjectId,
        text: String,
        command_id: CommandId,
    ) -> Result<bool, GatewayError> {
        let attestor_level = self.snapshot_level(attestor, self.clock.now())?;
        let handle = self.handle(subject).await?;
        let outcome = handle
            .command(Command::Attest {
                method,
                attestor,
                attestor_level,
                text,
                command_id,
            })
            .await?;
        match outcome {
            CommandOutcome::AttestationAccepted { completed } => Ok(completed),
            other => Err(unexpected(other)),
        }
    }

    /// Review decision from the external queue.
    pub async fn review_decision(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        approved: bool,
        reason: Option<String>,
        command_id: CommandId,
    ) -> Result<CommandOutcome, GatewayError> {
        let handle = self.handle(subject).await?;
        Ok(handle
            .command(Command::ReviewDecision {
                method,
                approved,
                reason,
                command_id,
            })
            .await?)
    }

    pub async fn revoke(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        reason: String,
        actor: SubjectId,
        command_id: CommandId,
    ) -> Result<Level, GatewayError> {
        let handle = self.handle(subject).await?;
        let outcome = handle
            .command(Command::Revoke {
                method,
                reason,
                actor,
                command_id,
            })
            .await?;
        match outcome {
            CommandOutcome::Revoked { new_level } => Ok(new_level),
            other => Err(unexpected(other)),
        }
    }

    pub async fn cancel_method(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        command_id: CommandId,
    ) -> Result<(), GatewayError> {
        let handle = self.handle(subject).await?;
        let outcome = handle
            .command(Command::CancelMethod { method, command_id })
            .await?;
        match outcome {
            CommandOutcome::Cancelled => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Subject deletion: cancel every active run, then drop the handle.
    /// The journal is retained.
    pub async fn tombstone(&self, subject: SubjectId) -> Result<(), GatewayError> {
        let handle = self.handle(subject).await?;
        let active: Vec<VerificationMethod> = handle
            .read_snapshot()
            .active_protocols
            .keys()
            .copied()
            .collect();
        for method in active {
            let command_id = CommandId::new(
                self.collaborators.token_source.fresh_id(),
            );
            match handle
                .command(Command::CancelMethod { method, command_id })
                .await
            {
                Ok(_) | Err(CommandError::NoActiveRun) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let mut index = self.index.write().await;
        index.remove(&subject);
        info!(subject = %subject, "subject tombstoned");
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub async fn score(&self, subject: SubjectId) -> Result<u32, GatewayError> {
        let snapshot = self.subject_snapshot(subject).await?;
        Ok(porch_scoring::score(
            &snapshot.completions,
            snapshot.class,
            self.clock.now(),
        ))
    }

    pub async fn level(&self, subject: SubjectId) -> Result<Level, GatewayError> {
        Ok(porch_scoring::level(self.score(subject).await?))
    }

    pub async fn completed(
        &self,
        subject: SubjectId,
    ) -> Result<std::collections::BTreeMap<VerificationMethod, u32>, GatewayError> {
        let snapshot = self.subject_snapshot(subject).await?;
        Ok(snapshot.completed_methods(self.clock.now()))
    }

    pub async fn next_level(&self, subject: SubjectId) -> Result<NextLevelInfo, GatewayError> {
        let snapshot = self.subject_snapshot(subject).await?;
        let now = self.clock.now();
        let score = porch_scoring::score(&snapshot.completions, snapshot.class, now);
        Ok(porch_scoring::next_level(
            score,
            snapshot.class,
            &snapshot.completed_methods(now),
        ))
    }

    pub async fn method_status(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
    ) -> Result<MethodStatus, GatewayError> {
        let snapshot = self.subject_snapshot(subject).await?;
        let now = self.clock.now();
        Ok(MethodStatus {
            completed_count: snapshot.effective_count(method, now),
            active_state: snapshot.active_protocols.get(&method).map(|r| r.state),
            next_expiry: snapshot
                .effective_completions(method, now)
                .filter_map(|c| c.expires_at)
                .min(),
        })
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn subject_snapshot(&self, subject: SubjectId) -> Result<SubjectSnapshot, GatewayError> {
        Ok(self.handle(subject).await?.read_snapshot())
    }

    /// A subject's current level, Unverified when unknown. Used for
    /// attestor and verifier pre-checks.
    fn snapshot_level(&self, subject: SubjectId, now: porch_types::Timestamp) -> Result<Level, GatewayError> {
        match self
            .stores
            .registry
            .get(subject)
            .map_err(|e| GatewayError::Storage(e.to_string()))?
        {
            Some(class) => Ok(self
                .stores
                .snapshots
                .snapshot(subject, class, now)
                .map_err(|e| GatewayError::Storage(e.to_string()))?
                .level),
            None => Ok(Level::Unverified),
        }
    }
}

fn unexpected(outcome: CommandOutcome) -> GatewayError {
    GatewayError::Command(CommandError::Internal(format!(
        "unexpected command outcome: {outcome:?}"
    )))
}
