//! Async driver: one cooperative tokio task per subject.
//!
//! The task owns its [`SubjectOrchestrator`] exclusively; every state
//! mutation is serialized through the mailbox. Queries never enter the
//! mailbox — they read the shared snapshot the task publishes after each
//! commit. A command is acknowledged only after its journal events have
//! durably committed (read-your-write).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use porch_protocols::{Effect, FailureReason, SagaProgress};
use porch_store::{
    JournalStore, MetaStore, SnapshotCache, StoreError, SubjectRegistry, TokenRecord, TokenStore,
    VerifierStore,
};
use porch_types::{
    EngineParams, Level, ProtocolRunId, SubjectClass, SubjectId, SubjectSnapshot, Timestamp,
    VerificationEvent, VerificationMethod,
};
use porch_utils::Backoff;

use crate::collaborators::{Clock, CollaboratorError, Collaborators, Notification};
use crate::command::{Command, CommandOutcome};
use crate::error::CommandError;
use crate::subject::{ConfirmStep, SubjectOrchestrator, TimerAction, Transition, TwoPartyValidated};

/// Mailbox capacity per subject task.
const COMMAND_CHANNEL_CAPACITY: usize = 256;
/// Wake-up interval when nothing is scheduled.
const IDLE_TICK: Duration = Duration::from_secs(3600);
/// Pause before re-attempting timer work after a storage failure.
const TIMER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The storage bundle a subject task works against.
#[derive(Clone)]
pub struct Stores {
    pub journal: Arc<dyn JournalStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub verifiers: Arc<dyn VerifierStore>,
    pub meta: Arc<dyn MetaStore>,
    pub registry: Arc<dyn SubjectRegistry>,
    pub snapshots: Arc<SnapshotCache>,
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<CommandOutcome, CommandError>>,
}

/// Handle to a running subject orchestrator task.
#[derive(Clone)]
pub struct SubjectHandle {
    subject: SubjectId,
    tx: mpsc::Sender<Envelope>,
    snapshot: Arc<RwLock<SubjectSnapshot>>,
}

impl SubjectHandle {
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Send a command and await its outcome. The reply arrives only after
    /// the resulting journal events committed.
    pub async fn command(&self, command: Command) -> Result<CommandOutcome, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { command, reply })
            .await
            .map_err(|_| CommandError::TemporarilyUnavailable)?;
        rx.await.map_err(|_| CommandError::TemporarilyUnavailable)?
    }

    /// Whether the task behind this handle is still alive.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Last committed snapshot. Never blocks on in-flight commands.
    pub fn read_snapshot(&self) -> SubjectSnapshot {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }
}

/// Rehydrate a subject orchestrator from the journal and spawn its task.
pub fn spawn_subject(
    subject: SubjectId,
    class: SubjectClass,
    params: EngineParams,
    stores: Stores,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
) -> Result<SubjectHandle, StoreError> {
    let core = SubjectOrchestrator::rehydrate(
        subject,
        class,
        params.clone(),
        stores.journal.as_ref(),
        stores.tokens.as_ref(),
        stores.meta.as_ref(),
        clock.now(),
    )?;
    let shared = Arc::new(RwLock::new(core.snapshot().clone()));
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let task = SubjectTask {
        core,
        stores,
        collaborators,
        clock,
        shared: shared.clone(),
        backoff: backoff_from(&params),
    };
    tokio::spawn(task.run(rx));

    Ok(SubjectHandle {
        subject,
        tx,
        snapshot: shared,
    })
}

fn backoff_from(params: &EngineParams) -> Backoff {
    Backoff::new(
        Duration::from_secs(params.retry_initial_secs),
        params.retry_factor,
        Duration::from_secs(params.retry_cap_secs),
        params.retry_max_attempts,
    )
}

struct SubjectTask {
    core: SubjectOrchestrator,
    stores: Stores,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    shared: Arc<RwLock<SubjectSnapshot>>,
    backoff: Backoff,
}

impl SubjectTask {
    async fn run(mut self, mut rx: mpsc::Receiver<Envelope>) {
        loop {
            if let Err(fatal) = self.fire_due_timers().await {
                error!(subject = %self.core.subject(), error = %fatal, "orchestrator halting");
                return;
            }

            let now = self.clock.now();
            let sleep_for = self
                .core
                .next_wake()
                .map(|wake| Duration::from_secs(wake.remaining_from(now)))
                .unwrap_or(IDLE_TICK);

            tokio::select! {
                envelope = rx.recv() => {
                    let Some(envelope) = envelope else { return };
                    let result = self.handle_command(envelope.command).await;
                    if let Err(CommandError::Internal(reason)) = &result {
                        error!(subject = %self.core.subject(), reason = %reason, "orchestrator halting");
                        let _ = envelope.reply.send(result);
                        return;
                    }
                    let _ = envelope.reply.send(result);
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Process every due timer. Storage trouble pauses and retries later;
    /// an internal error (journal conflict, fold mismatch) halts the task.
    async fn fire_due_timers(&mut self) -> Result<(), CommandError> {
        loop {
            let now = self.clock.now();
            match self.core.on_timer(now) {
                Ok(None) => return Ok(()),
                Ok(Some(TimerAction::Transition(transition))) => {
                    match self.persist_commit_execute(transition).await {
                        Ok(_) => {}
                        Err(CommandError::TemporarilyUnavailable) => {
                            warn!(subject = %self.core.subject(), "timer persist unavailable, backing off");
                            tokio::time::sleep(TIMER_RETRY_DELAY).await;
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Some(TimerAction::Compensation(progress))) => {
                    self.drive_compensation(progress).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<CommandOutcome, CommandError> {
        let now = self.clock.now();
        match command {
            Command::StartMethod {
                method,
                params,
                command_id,
            } => {
                let transition = self.core.start_method(
                    method,
                    params,
                    command_id,
                    now,
                    self.collaborators.token_source.as_ref(),
                )?;
                self.persist_commit_execute(transition).await
            }
            Command::EnterCode {
                method,
                code,
                command_id,
            } => {
                let transition = self.core.enter_code(method, &code, command_id, now)?;
                self.persist_commit_execute(transition).await
            }
            Command::VerifierConfirm {
                token,
                verifier,
                evidence,
                command_id,
            } => {
                match self
                    .core
                    .verifier_confirm(&token, verifier, evidence, command_id, now)?
                {
                    ConfirmStep::Resolved(transition) => {
                        self.persist_commit_execute(transition).await
                    }
                    ConfirmStep::NeedsValidation { verifiers } => {
                        let decisions = self.load_decisions(&verifiers, now)?;
                        match self.core.validate_two_party(&decisions, command_id, now)? {
                            TwoPartyValidated::Completed(transition) => {
                                match self.persist_commit_execute(transition).await {
                                    Ok(outcome) => Ok(outcome),
                                    Err(CommandError::TemporarilyUnavailable) => {
                                        // The record step could not land
                                        // durably; roll the saga back.
                                        let progress =
                                            self.core.two_party_record_failed(
                                                FailureReason::Rejected {
                                                    reason: "journal unavailable".into(),
                                                },
                                            )?;
                                        self.drive_compensation(progress).await?;
                                        Err(CommandError::TemporarilyUnavailable)
                                    }
                                    Err(e) => Err(e),
                                }
                            }
                            TwoPartyValidated::Compensating(progress) => {
                                let denied = decisions
                                    .iter()
                                    .find_map(|(v, d)| d.as_ref().err().map(|e| (*v, e.clone())));
                                self.drive_compensation(progress).await?;
                                match denied {
                                    Some((_, denial)) => {
                                        Err(CommandError::VerifierDenied(denial.to_string()))
                                    }
                                    None => Err(CommandError::Internal(
                                        "compensation without denial".into(),
                                    )),
                                }
                            }
                        }
                    }
                }
            }
            Command::Attest {
                method,
                attestor,
                attestor_level,
                text,
                command_id,
            } => {
                let transition = self.core.attest(
                    method,
                    attestor,
                    attestor_level,
                    &text,
                    command_id,
                    now,
                    self.collaborators.token_source.as_ref(),
                )?;
                self.persist_commit_execute(transition).await
            }
            Command::ReviewDecision {
                method,
                approved,
                reason,
                command_id,
            } => {
                let transition = self
                    .core
                    .review_decision(method, approved, reason, command_id, now)?;
                self.persist_commit_execute(transition).await
            }
            Command::Revoke {
                method,
                reason,
                actor,
                command_id,
            } => {
                let step = self.core.revoke(method, &reason, actor, command_id, now)?;
                let outcome = self.persist_commit_execute(step.transition).await?;
                if let Some(progress) = step.compensation {
                    self.drive_compensation(progress).await?;
                }
                Ok(outcome)
            }
            Command::CancelMethod { method, command_id } => {
                let step = self.core.cancel_method(method, command_id, now)?;
                let outcome = self.persist_commit_execute(step.transition).await?;
                if let Some(progress) = step.compensation {
                    self.drive_compensation(progress).await?;
                }
                Ok(outcome)
            }
        }
    }

    /// Look up both confirming verifiers' records and levels and run the
    /// authorization policy for each.
    fn load_decisions(
        &self,
        verifiers: &[SubjectId; 2],
        now: Timestamp,
    ) -> Result<Vec<(SubjectId, Result<porch_policy::Authorization, porch_policy::Denial>)>, CommandError>
    {
        let mut decisions = Vec::with_capacity(2);
        for &verifier in verifiers {
            let record = self
                .stores
                .verifiers
                .get(verifier)
                .map_err(|_| CommandError::TemporarilyUnavailable)?;
            let level = match self
                .stores
                .registry
                .get(verifier)
                .map_err(|_| CommandError::TemporarilyUnavailable)?
            {
                Some(class) => {
                    self.stores
                        .snapshots
                        .snapshot(verifier, class, now)
                        .map_err(|_| CommandError::TemporarilyUnavailable)?
                        .level
                }
                None => Level::Unverified,
            };
            let decision = porch_policy::authorize(
                record.as_ref(),
                level,
                VerificationMethod::TwoPartyInPerson,
                now,
            );
            decisions.push((verifier, decision));
        }
        Ok(decisions)
    }

    /// Append, commit, publish the snapshot, run side effects, deliver
    /// notifications, and checkpoint when due.
    async fn persist_commit_execute(
        &mut self,
        transition: Transition,
    ) -> Result<CommandOutcome, CommandError> {
        if transition.is_replay() {
            let (outcome, _, _) = self
                .core
                .commit(transition, self.clock.now())
                .map_err(|e| CommandError::Internal(e.to_string()))?;
            return Ok(outcome);
        }

        let run_id = transition.events.iter().find_map(|e| e.protocol_run_id);
        for event in &transition.events {
            self.append_with_retry(event).await?;
        }

        let (outcome, effects, notifications) = self
            .core
            .commit(transition, self.clock.now())
            .map_err(|e| CommandError::Internal(e.to_string()))?;
        self.publish_snapshot();

        self.execute_effects(&effects, run_id).await;
        self.deliver_notifications(&notifications).await;
        self.maybe_checkpoint().await;
        Ok(outcome)
    }

    async fn append_with_retry(&self, event: &VerificationEvent) -> Result<(), CommandError> {
        let subject = self.core.subject();
        let mut attempt = 0;
        loop {
            match self.stores.journal.append(subject, event.seq - 1, event) {
                Ok(_) => return Ok(()),
                // A single task writes each subject's journal; a conflict
                // means this task's view has diverged. Halt, recover by
                // rehydration.
                Err(StoreError::Conflict { expected, actual }) => {
                    return Err(CommandError::Internal(format!(
                        "journal conflict: expected {expected}, found {actual}"
                    )))
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match self.backoff.delay(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(CommandError::TemporarilyUnavailable),
                    }
                }
                Err(e) => return Err(CommandError::Internal(e.to_string())),
            }
        }
    }

    fn publish_snapshot(&self) {
        let mut snapshot = self.core.snapshot().clone();
        // The fold only knows runs as Waiting; overlay the live child
        // states so Compensating and AwaitingReview are queryable.
        for (method, run) in snapshot.active_protocols.iter_mut() {
            if let Some(state) = self.core.child_state(*method) {
                run.state = state;
            }
        }
        *self.shared.write().expect("snapshot lock poisoned") = snapshot;
        self.stores.snapshots.invalidate(self.core.subject());
    }

    /// Execute protocol side effects. Collaborator calls are retried with
    /// backoff; a final failure is logged, never propagated — state has
    /// already committed.
    async fn execute_effects(&mut self, effects: &[Effect], run_id: Option<ProtocolRunId>) {
        for effect in effects {
            match effect {
                Effect::SendCode {
                    target,
                    code,
                    ttl_secs,
                } => {
                    self.retry_collaborator(|c| c.delivery.send(target, code, *ttl_secs))
                        .await;
                }
                Effect::StoreToken {
                    token,
                    slot,
                    expires_at,
                } => {
                    let Some(run_id) = run_id else {
                        error!(subject = %self.core.subject(), "token effect without run id");
                        continue;
                    };
                    let record = TokenRecord {
                        token: *token,
                        subject: self.core.subject(),
                        run_id,
                        slot: *slot,
                        expires_at: *expires_at,
                        invalidated: false,
                    };
                    if let Err(e) = self.stores.tokens.put_if_absent(&record) {
                        error!(subject = %self.core.subject(), error = %e, "failed to store slot token");
                    }
                }
                Effect::InvalidateToken { token } => {
                    if let Err(e) = self.stores.tokens.invalidate(token) {
                        error!(subject = %self.core.subject(), error = %e, "failed to invalidate token");
                    }
                }
                Effect::EnqueueReview {
                    subject,
                    method,
                    blob_ref,
                } => {
                    self.retry_collaborator(|c| c.review_queue.enqueue(*subject, *method, blob_ref))
                        .await;
                }
                Effect::CreditConfirmation { verifier, .. } => {
                    if let Err(e) = self.stores.verifiers.add_confirmations(*verifier, 1) {
                        error!(verifier = %verifier, error = %e, "failed to credit confirmation");
                    }
                }
                Effect::RevokeConfirmation { verifier }
                | Effect::AnnulConfirmation { verifier } => {
                    // Handled by the compensation driver, which needs the
                    // journal round-trip; reaching here is a wiring bug.
                    error!(verifier = %verifier, "confirmation rollback outside compensation");
                }
                Effect::NotifyConfirmationRevoked { verifier } => {
                    let notification = Notification::ConfirmationRevoked {
                        subject: self.core.subject(),
                        verifier: *verifier,
                    };
                    self.retry_collaborator(|c| c.notifier.deliver(&notification))
                        .await;
                }
            }
        }
    }

    async fn deliver_notifications(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.retry_collaborator(|c| c.notifier.deliver(notification))
                .await;
        }
    }

    async fn maybe_checkpoint(&mut self) {
        let Some(transition) = self.core.maybe_checkpoint(self.clock.now()) else {
            return;
        };
        let checkpoint_seq = transition.events[0].seq;
        for event in &transition.events {
            if self.append_with_retry(event).await.is_err() {
                warn!(subject = %self.core.subject(), "checkpoint append failed, skipping");
                return;
            }
        }
        if let Err(e) = self.core.commit(transition, self.clock.now()) {
            error!(subject = %self.core.subject(), error = %e, "checkpoint commit failed");
            return;
        }
        self.publish_snapshot();
        let key = porch_store::meta::checkpoint_key(self.core.subject());
        if let Err(e) = self
            .stores
            .meta
            .put_meta(&key, &checkpoint_seq.to_le_bytes())
        {
            warn!(subject = %self.core.subject(), error = %e, "checkpoint marker not recorded");
        }
    }

    /// Drive a saga's compensation to its terminal outcome. Each step's
    /// effects must all land before the step is marked done; failures
    /// count against the saga's bounded retry attempts.
    async fn drive_compensation(&mut self, mut progress: SagaProgress) -> Result<(), CommandError> {
        loop {
            match progress {
                SagaProgress::Compensate { effects } => {
                    let ok = self.execute_compensation_effects(&effects).await;
                    progress = if ok {
                        self.core.two_party_compensation_done()?
                    } else {
                        tokio::time::sleep(TIMER_RETRY_DELAY).await;
                        self.core.two_party_compensation_failed()?
                    };
                }
                SagaProgress::Done { outcome } => {
                    let transition = self.core.two_party_finish(outcome, self.clock.now())?;
                    self.persist_commit_execute(transition).await?;
                    return Ok(());
                }
                SagaProgress::Record { .. } => {
                    return Err(CommandError::Internal(
                        "record progress during compensation".into(),
                    ));
                }
            }
        }
    }

    async fn execute_compensation_effects(&mut self, effects: &[Effect]) -> bool {
        for effect in effects {
            let ok = match effect {
                Effect::InvalidateToken { token } => {
                    self.stores.tokens.invalidate(token).is_ok()
                }
                Effect::RevokeConfirmation { verifier } => {
                    self.stores.verifiers.add_confirmations(*verifier, -1).is_ok()
                        && self.persist_confirmation_audit(*verifier).await
                }
                Effect::AnnulConfirmation { verifier } => {
                    self.persist_confirmation_audit(*verifier).await
                }
                Effect::NotifyConfirmationRevoked { verifier } => {
                    let notification = Notification::ConfirmationRevoked {
                        subject: self.core.subject(),
                        verifier: *verifier,
                    };
                    // Notification failure never blocks compensation.
                    self.retry_collaborator(|c| c.notifier.deliver(&notification))
                        .await;
                    true
                }
                other => {
                    error!(effect = ?other, "unexpected forward effect during compensation");
                    false
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }

    async fn persist_confirmation_audit(&mut self, verifier: SubjectId) -> bool {
        let transition = self.core.confirmation_audit(verifier, self.clock.now());
        match self.persist_commit_execute(transition).await {
            Ok(_) => true,
            Err(e) => {
                warn!(verifier = %verifier, error = %e, "confirmation audit not recorded");
                false
            }
        }
    }

    async fn retry_collaborator<F>(&self, call: F)
    where
        F: Fn(&Collaborators) -> Result<(), CollaboratorError>,
    {
        let mut attempt = 0;
        loop {
            match call(&self.collaborators) {
                Ok(()) => return,
                Err(e) => {
                    attempt += 1;
                    match self.backoff.delay(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            warn!(subject = %self.core.subject(), error = %e, "collaborator call gave up");
                            return;
                        }
                    }
                }
            }
        }
    }
}
