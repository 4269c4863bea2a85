//! The per-subject orchestrator state machine.
//!
//! Owns the snapshot, the active child protocols and the idempotency map.
//! Command handlers are split into a prepare phase (build a [`Transition`]:
//! the journal events, side effects and reply) and a commit phase applied
//! only after the events were durably appended. Between the two phases
//! nothing else runs — a subject is always driven by a single task.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use porch_policy::{Authorization, Denial};
use porch_protocols::{
    Child, ChildCancel, ChildDeadline, ConfirmAck, Effect, FailureReason, Outcome, ProtocolError,
    SagaProgress, TokenSource,
};
use porch_store::{apply_event, finalize, JournalStore, MetaStore, StoreError, TokenStore};
use porch_types::event::CodeChallengeSetup;
use porch_types::{
    CommandId, EngineParams, EventData, Level, MethodCompletion, MethodParams, ProtocolRunId,
    SubjectClass, SubjectId, SubjectSnapshot, Timestamp, VerificationEvent, VerificationMethod,
};

use crate::collaborators::Notification;
use crate::command::{CommandOutcome, MethodStatus};
use crate::error::CommandError;

/// A prepared state transition: journal events to persist, side effects to
/// run after the commit, and the reply for the caller.
#[derive(Debug)]
pub struct Transition {
    pub events: Vec<VerificationEvent>,
    pub effects: Vec<Effect>,
    pub notifications: Vec<Notification>,
    pub outcome: CommandOutcome,
    command_id: Option<CommandId>,
    new_child: Option<Child>,
    remove_child: Option<VerificationMethod>,
    replayed: bool,
}

impl Transition {
    fn replay(outcome: CommandOutcome) -> Self {
        Self {
            events: Vec::new(),
            effects: Vec::new(),
            notifications: Vec::new(),
            outcome,
            command_id: None,
            new_child: None,
            remove_child: None,
            replayed: true,
        }
    }

    fn reply_only(outcome: CommandOutcome, command_id: Option<CommandId>) -> Self {
        Self {
            events: Vec::new(),
            effects: Vec::new(),
            notifications: Vec::new(),
            outcome,
            command_id,
            new_child: None,
            remove_child: None,
            replayed: false,
        }
    }

    /// Whether this transition was replayed from the idempotency map.
    pub fn is_replay(&self) -> bool {
        self.replayed
    }
}

/// Result of a `verifier_confirm` prepare: either done, or the driver must
/// run the authorization policy for both verifiers and call
/// [`SubjectOrchestrator::validate_two_party`].
#[derive(Debug)]
pub enum ConfirmStep {
    Resolved(Transition),
    NeedsValidation { verifiers: [SubjectId; 2] },
}

/// Result of two-party validation.
#[derive(Debug)]
pub enum TwoPartyValidated {
    Completed(Transition),
    Compensating(SagaProgress),
}

/// A command whose transition may leave a saga compensating in the
/// background (revoke / cancel of an active two-party run).
#[derive(Debug)]
pub struct CommandStep {
    pub transition: Transition,
    pub compensation: Option<SagaProgress>,
}

/// Something a due timer produced.
#[derive(Debug)]
pub enum TimerAction {
    Transition(Transition),
    Compensation(SagaProgress),
}

/// The long-lived orchestrator for one subject.
pub struct SubjectOrchestrator {
    subject: SubjectId,
    class: SubjectClass,
    params: EngineParams,
    snapshot: SubjectSnapshot,
    active: BTreeMap<VerificationMethod, Child>,
    command_outcomes: HashMap<CommandId, CommandOutcome>,
    /// Completions whose expiry has not yet been journalled:
    /// `(expires_at, method, sequence_index)`, time-ordered.
    expiry_queue: BTreeSet<(Timestamp, VerificationMethod, u32)>,
    events_since_checkpoint: u64,
}

impl SubjectOrchestrator {
    pub fn new(subject: SubjectId, class: SubjectClass, params: EngineParams) -> Self {
        Self {
            subject,
            class,
            params,
            snapshot: SubjectSnapshot::new(subject, class),
            active: BTreeMap::new(),
            command_outcomes: HashMap::new(),
            expiry_queue: BTreeSet::new(),
            events_since_checkpoint: 0,
        }
    }

    /// Rebuild the orchestrator from the journal after a restart.
    ///
    /// Folds the journal from the latest checkpoint marker, restores every
    /// still-live protocol run, the idempotency map and the expiry queue.
    /// Invariants must hold afterwards; a fold that cannot be applied is a
    /// corruption error, not something to repair around.
    pub fn rehydrate(
        subject: SubjectId,
        class: SubjectClass,
        params: EngineParams,
        journal: &dyn JournalStore,
        tokens: &dyn TokenStore,
        meta: &dyn MetaStore,
        now: Timestamp,
    ) -> Result<Self, StoreError> {
        let checkpoint_seq = meta
            .get_meta(&porch_store::meta::checkpoint_key(subject))?
            .and_then(|bytes| bytes.try_into().ok().map(u64::from_le_bytes))
            .unwrap_or(0);
        let from_seq = if checkpoint_seq > 0 { checkpoint_seq } else { 1 };
        let events = journal.read_from(subject, from_seq)?;

        let mut snapshot = SubjectSnapshot::new(subject, class);
        snapshot.last_seq = from_seq - 1;

        let mut code_setups: HashMap<ProtocolRunId, CodeChallengeSetup> = HashMap::new();
        let mut command_outcomes: HashMap<CommandId, CommandOutcome> = HashMap::new();
        let mut expired_marks: BTreeSet<(VerificationMethod, u32)> = BTreeSet::new();

        for event in &events {
            match (&event.data, event.method) {
                (EventData::MethodStarted { command_id, challenge, .. }, _) => {
                    if let (Some(setup), Some(run_id)) = (challenge, event.protocol_run_id) {
                        code_setups.insert(run_id, setup.clone());
                    }
                    if let Some(run_id) = event.protocol_run_id {
                        command_outcomes
                            .insert(*command_id, CommandOutcome::Started { run_id });
                    }
                }
                (EventData::MethodRevoked { command_id, .. }, _) => {
                    // The original reply carried the post-revocation level.
                    let mut scratch = snapshot.clone();
                    if apply_event(&mut scratch, event).is_ok() {
                        finalize(&mut scratch, event.at);
                        command_outcomes.insert(
                            *command_id,
                            CommandOutcome::Revoked {
                                new_level: scratch.level,
                            },
                        );
                    }
                }
                (EventData::MethodExpired { sequence_index }, Some(method)) => {
                    expired_marks.insert((method, *sequence_index));
                }
                (EventData::VerifierConfirmed { command_id, .. }, _) => {
                    command_outcomes.insert(
                        *command_id,
                        CommandOutcome::ConfirmationAccepted { completed: true },
                    );
                }
                (EventData::AttestationReceived { command_id, .. }, _) => {
                    command_outcomes.insert(
                        *command_id,
                        CommandOutcome::AttestationAccepted { completed: true },
                    );
                }
                _ => {}
            }
            apply_event(&mut snapshot, event)?;
        }
        finalize(&mut snapshot, now);

        // Re-register still-live protocol runs.
        let mut active = BTreeMap::new();
        for (method, run) in &snapshot.active_protocols {
            let slot_tokens = match tokens.find_by_run(run.id) {
                Ok(records) if records.len() == 2 => {
                    let mut by_slot = records;
                    by_slot.sort_by_key(|r| r.slot);
                    Some(([by_slot[0].token, by_slot[1].token], by_slot[0].expires_at))
                }
                _ => None,
            };
            let child = Child::restore(
                subject,
                run.id,
                *method,
                &run.params,
                run.deadline,
                &params,
                code_setups.get(&run.id),
                slot_tokens,
            )
            .map_err(|e| {
                StoreError::Corruption(format!("cannot restore run {} for {method}: {e}", run.id))
            })?;
            active.insert(*method, child);
        }

        let mut expiry_queue = BTreeSet::new();
        for (method, list) in &snapshot.completions {
            for completion in list {
                if completion.revoked_at.is_some() {
                    continue;
                }
                if let Some(expires_at) = completion.expires_at {
                    if !expired_marks.contains(&(*method, completion.sequence_index)) {
                        expiry_queue.insert((expires_at, *method, completion.sequence_index));
                    }
                }
            }
        }

        info!(
            subject = %subject,
            last_seq = snapshot.last_seq,
            score = snapshot.score,
            level = %snapshot.level,
            active = active.len(),
            "orchestrator rehydrated"
        );

        Ok(Self {
            subject,
            class,
            params,
            snapshot,
            active,
            command_outcomes,
            expiry_queue,
            events_since_checkpoint: snapshot_events_since(checkpoint_seq, &events),
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn class(&self) -> SubjectClass {
        self.class
    }

    pub fn snapshot(&self) -> &SubjectSnapshot {
        &self.snapshot
    }

    pub fn query_score(&self, now: Timestamp) -> u32 {
        porch_scoring::score(&self.snapshot.completions, self.class, now)
    }

    pub fn query_level(&self, now: Timestamp) -> Level {
        porch_scoring::level(self.query_score(now))
    }

    pub fn query_completed(&self, now: Timestamp) -> BTreeMap<VerificationMethod, u32> {
        self.snapshot.completed_methods(now)
    }

    pub fn query_next_level(&self, now: Timestamp) -> porch_scoring::NextLevelInfo {
        porch_scoring::next_level(self.query_score(now), self.class, &self.query_completed(now))
    }

    pub fn query_method(&self, method: VerificationMethod, now: Timestamp) -> MethodStatus {
        MethodStatus {
            completed_count: self.snapshot.effective_count(method, now),
            active_state: self.active.get(&method).map(|c| c.state()),
            next_expiry: self
                .snapshot
                .effective_completions(method, now)
                .filter_map(|c| c.expires_at)
                .min(),
        }
    }

    // ── Commands: prepare phase ─────────────────────────────────────────

    pub fn start_method(
        &mut self,
        method: VerificationMethod,
        params: MethodParams,
        command_id: CommandId,
        now: Timestamp,
        tokens: &dyn TokenSource,
    ) -> Result<Transition, CommandError> {
        if let Some(outcome) = self.command_outcomes.get(&command_id) {
            return Ok(Transition::replay(outcome.clone()));
        }
        if !porch_scoring::applicable(method, self.class) {
            return Err(CommandError::MethodNotApplicable);
        }
        if self.active.contains_key(&method) {
            return Err(CommandError::AlreadyActive);
        }
        if self.snapshot.effective_count(method, now) >= porch_scoring::max_multiplier(method) {
            return Err(CommandError::AlreadyMaxed);
        }

        let run_id = ProtocolRunId::new(tokens.fresh_id());
        let (child, effects) =
            Child::start(self.subject, run_id, method, &params, &self.params, now, tokens)
                .map_err(|e| CommandError::BadParams(e.to_string()))?;

        let challenge = match &child {
            Child::Code(c) => Some(c.setup()),
            _ => None,
        };
        let (events, notifications, _) = self.finish_events(
            vec![EventPart {
                method: Some(method),
                actor: None,
                run_id: Some(run_id),
                data: EventData::MethodStarted {
                    command_id,
                    deadline: child.deadline(),
                    params,
                    challenge,
                },
            }],
            now,
        )?;

        debug!(subject = %self.subject, %method, %run_id, "method started");
        Ok(Transition {
            events,
            effects,
            notifications,
            outcome: CommandOutcome::Started { run_id },
            command_id: Some(command_id),
            new_child: Some(child),
            remove_child: None,
            replayed: false,
        })
    }

    pub fn enter_code(
        &mut self,
        method: VerificationMethod,
        code: &str,
        command_id: CommandId,
        now: Timestamp,
    ) -> Result<Transition, CommandError> {
        if let Some(outcome) = self.command_outcomes.get(&command_id) {
            return Ok(Transition::replay(outcome.clone()));
        }
        let child = self.active.get_mut(&method).ok_or(CommandError::NoActiveRun)?;
        let Child::Code(challenge) = child else {
            return Err(CommandError::NoActiveRun);
        };
        let run_id = challenge.run_id();

        match challenge.enter_code(code, now) {
            Err(ProtocolError::NotActive) => Err(CommandError::NoActiveRun),
            Err(e) => Err(CommandError::Internal(e.to_string())),
            Ok(None) => Ok(Transition::reply_only(
                CommandOutcome::CodeRejected {
                    attempts_left: challenge.attempts_left(),
                },
                Some(command_id),
            )),
            Ok(Some(Outcome::Completed { evidence_ref })) => {
                let completion = self.make_completion(method, evidence_ref, now);
                let (events, notifications, _) = self.finish_events(
                    vec![EventPart {
                        method: Some(method),
                        actor: None,
                        run_id: Some(run_id),
                        data: EventData::MethodCompleted { completion },
                    }],
                    now,
                )?;
                Ok(Transition {
                    events,
                    effects: Vec::new(),
                    notifications,
                    outcome: CommandOutcome::CodeAccepted,
                    command_id: Some(command_id),
                    new_child: None,
                    remove_child: Some(method),
                    replayed: false,
                })
            }
            Ok(Some(Outcome::Failed { reason })) => {
                self.failed_run_transition(method, run_id, reason, Some(command_id), now)
            }
        }
    }

    pub fn verifier_confirm(
        &mut self,
        token: &[u8; 32],
        verifier: SubjectId,
        evidence: Vec<u8>,
        command_id: CommandId,
        now: Timestamp,
    ) -> Result<ConfirmStep, CommandError> {
        if let Some(outcome) = self.command_outcomes.get(&command_id) {
            return Ok(ConfirmStep::Resolved(Transition::replay(outcome.clone())));
        }
        let saga = self
            .two_party_mut()
            .ok_or(CommandError::TokenUnknown)?;

        match saga.confirm(token, verifier, evidence, now) {
            Err(ProtocolError::UnknownToken) => Err(CommandError::TokenUnknown),
            Err(ProtocolError::Expired) => Err(CommandError::TokenExpired),
            Err(ProtocolError::NotActive) => Err(CommandError::NoActiveRun),
            Err(e) => Err(CommandError::Internal(e.to_string())),
            Ok(ConfirmAck::First) | Ok(ConfirmAck::Duplicate) => {
                Ok(ConfirmStep::Resolved(Transition::reply_only(
                    CommandOutcome::ConfirmationAccepted { completed: false },
                    Some(command_id),
                )))
            }
            Ok(ConfirmAck::ReadyToValidate { verifiers }) => {
                Ok(ConfirmStep::NeedsValidation { verifiers })
            }
        }
    }

    /// Feed both verifiers' policy decisions into the saga. On success the
    /// returned transition records the confirmations and awards the method;
    /// on any denial the saga starts compensating.
    pub fn validate_two_party(
        &mut self,
        decisions: &[(SubjectId, Result<Authorization, Denial>)],
        command_id: CommandId,
        now: Timestamp,
    ) -> Result<TwoPartyValidated, CommandError> {
        let method = VerificationMethod::TwoPartyInPerson;
        let saga = self.two_party_mut().ok_or(CommandError::NoActiveRun)?;
        let run_id = saga.run_id();

        let progress = saga
            .validate(decisions)
            .map_err(|e| CommandError::Internal(e.to_string()))?;
        match progress {
            SagaProgress::Compensate { .. } => {
                warn!(subject = %self.subject, %run_id, "two-party validation denied, compensating");
                Ok(TwoPartyValidated::Compensating(progress))
            }
            SagaProgress::Record { effects } => {
                let saga = self.two_party_mut().expect("saga still active");
                let confirmations: Vec<_> = saga.confirmations().to_vec();
                let outcome = saga
                    .record_done()
                    .map_err(|e| CommandError::Internal(e.to_string()))?;
                let Outcome::Completed { evidence_ref } = outcome else {
                    return Err(CommandError::Internal("record_done must complete".into()));
                };

                let mut parts: Vec<EventPart> = confirmations
                    .iter()
                    .map(|c| EventPart {
                        method: Some(method),
                        actor: Some(c.verifier),
                        run_id: Some(run_id),
                        data: EventData::VerifierConfirmed {
                            command_id,
                            evidence: c.evidence.clone(),
                        },
                    })
                    .collect();
                let completion = self.make_completion(method, evidence_ref, now);
                parts.push(EventPart {
                    method: Some(method),
                    actor: None,
                    run_id: Some(run_id),
                    data: EventData::MethodCompleted { completion },
                });

                let (events, notifications, _) = self.finish_events(parts, now)?;
                info!(subject = %self.subject, %run_id, "two-party verification completed");
                Ok(TwoPartyValidated::Completed(Transition {
                    events,
                    effects,
                    notifications,
                    outcome: CommandOutcome::ConfirmationAccepted { completed: true },
                    command_id: Some(command_id),
                    new_child: None,
                    remove_child: Some(method),
                    replayed: false,
                }))
            }
            SagaProgress::Done { .. } => {
                Err(CommandError::Internal("validate cannot finish a saga".into()))
            }
        }
    }

    pub fn attest(
        &mut self,
        method: VerificationMethod,
        attestor: SubjectId,
        attestor_level: Level,
        text: &str,
        command_id: CommandId,
        now: Timestamp,
        tokens: &dyn TokenSource,
    ) -> Result<Transition, CommandError> {
        if let Some(outcome) = self.command_outcomes.get(&command_id) {
            return Ok(Transition::replay(outcome.clone()));
        }
        if !porch_scoring::applicable(method, self.class) {
            return Err(CommandError::MethodNotApplicable);
        }
        if self.snapshot.effective_count(method, now) >= porch_scoring::max_multiplier(method) {
            return Err(CommandError::AlreadyMaxed);
        }
        // One attestation per attestor per method. Completion evidence
        // starts with the attestor id.
        let repeat = self
            .snapshot
            .effective_completions(method, now)
            .any(|c| c.evidence_ref.starts_with(attestor.as_bytes()));
        if repeat {
            return Err(CommandError::AlreadyAttested);
        }

        // An attestation run is started implicitly when none is active.
        let (run_id, implicit_start) = match self.active.get(&method) {
            Some(child) => {
                if !matches!(child, Child::Attestation(_)) {
                    return Err(CommandError::AlreadyActive);
                }
                (child.run_id(), false)
            }
            None => (ProtocolRunId::new(tokens.fresh_id()), true),
        };

        let mut intake = match self.active.remove(&method) {
            Some(Child::Attestation(intake)) => intake,
            Some(other) => {
                self.active.insert(method, other);
                return Err(CommandError::AlreadyActive);
            }
            None => porch_protocols::AttestationIntake::start(
                self.subject,
                run_id,
                method,
                now,
                self.params.attestation_deadline_secs,
            ),
        };
        let deadline = intake.deadline();

        match intake.attest(attestor, attestor_level, text, now) {
            Err(ProtocolError::AttestorDenied(reason)) => {
                // The run stays live for another attestor.
                if !implicit_start {
                    self.active.insert(method, Child::Attestation(intake));
                }
                Err(CommandError::AttestorDenied(reason))
            }
            Err(ProtocolError::SelfAttestation) => {
                if !implicit_start {
                    self.active.insert(method, Child::Attestation(intake));
                }
                Err(CommandError::AttestorDenied("self-attestation".into()))
            }
            Err(e) => Err(CommandError::Internal(e.to_string())),
            Ok(Outcome::Completed { evidence_ref }) => {
                let mut parts = Vec::new();
                if implicit_start {
                    parts.push(EventPart {
                        method: Some(method),
                        actor: None,
                        run_id: Some(run_id),
                        data: EventData::MethodStarted {
                            command_id,
                            deadline,
                            params: MethodParams::Attestation,
                            challenge: None,
                        },
                    });
                }
                parts.push(EventPart {
                    method: Some(method),
                    actor: Some(attestor),
                    run_id: Some(run_id),
                    data: EventData::AttestationReceived {
                        command_id,
                        text: text.to_string(),
                    },
                });
                let completion = self.make_completion(method, evidence_ref, now);
                parts.push(EventPart {
                    method: Some(method),
                    actor: None,
                    run_id: Some(run_id),
                    data: EventData::MethodCompleted { completion },
                });
                let (events, notifications, _) = self.finish_events(parts, now)?;
                Ok(Transition {
                    events,
                    effects: Vec::new(),
                    notifications,
                    outcome: CommandOutcome::AttestationAccepted { completed: true },
                    command_id: Some(command_id),
                    new_child: None,
                    remove_child: if implicit_start { None } else { Some(method) },
                    replayed: false,
                })
            }
            Ok(Outcome::Failed { reason }) => {
                self.failed_run_transition(method, run_id, reason, Some(command_id), now)
            }
        }
    }

    pub fn review_decision(
        &mut self,
        method: VerificationMethod,
        approved: bool,
        reason: Option<String>,
        command_id: CommandId,
        now: Timestamp,
    ) -> Result<Transition, CommandError> {
        if let Some(outcome) = self.command_outcomes.get(&command_id) {
            return Ok(Transition::replay(outcome.clone()));
        }
        let child = self.active.get_mut(&method).ok_or(CommandError::NoActiveRun)?;
        let Child::Review(review) = child else {
            return Err(CommandError::NoActiveRun);
        };
        let run_id = review.run_id();

        match review.decision(approved, reason, now) {
            Err(ProtocolError::NotActive) => Err(CommandError::NoActiveRun),
            Err(e) => Err(CommandError::Internal(e.to_string())),
            Ok(Outcome::Completed { evidence_ref }) => {
                let completion = self.make_completion(method, evidence_ref, now);
                let (events, notifications, _) = self.finish_events(
                    vec![EventPart {
                        method: Some(method),
                        actor: None,
                        run_id: Some(run_id),
                        data: EventData::MethodCompleted { completion },
                    }],
                    now,
                )?;
                Ok(Transition {
                    events,
                    effects: Vec::new(),
                    notifications,
                    outcome: CommandOutcome::ReviewRecorded { completed: true },
                    command_id: Some(command_id),
                    new_child: None,
                    remove_child: Some(method),
                    replayed: false,
                })
            }
            Ok(Outcome::Failed { reason }) => {
                let mut transition =
                    self.failed_run_transition(method, run_id, reason, Some(command_id), now)?;
                transition.outcome = CommandOutcome::ReviewRecorded { completed: false };
                Ok(transition)
            }
        }
    }

    pub fn revoke(
        &mut self,
        method: VerificationMethod,
        reason: &str,
        actor: SubjectId,
        command_id: CommandId,
        now: Timestamp,
    ) -> Result<CommandStep, CommandError> {
        if let Some(outcome) = self.command_outcomes.get(&command_id) {
            return Ok(CommandStep {
                transition: Transition::replay(outcome.clone()),
                compensation: None,
            });
        }

        let sequence_index = self
            .snapshot
            .effective_completions(method, now)
            .map(|c| c.sequence_index)
            .max()
            .unwrap_or(0);
        let has_run = self.active.contains_key(&method);
        if sequence_index == 0 && !has_run {
            return Err(CommandError::NothingToRevoke);
        }

        let mut parts = vec![EventPart {
            method: Some(method),
            actor: Some(actor),
            run_id: None,
            data: EventData::MethodRevoked {
                command_id,
                sequence_index,
                reason: reason.to_string(),
            },
        }];

        let mut compensation = None;
        let mut remove_child = None;
        if let Some(child) = self.active.get_mut(&method) {
            let run_id = child.run_id();
            match child.cancel() {
                ChildCancel::Immediate(_) => {
                    parts.push(EventPart {
                        method: Some(method),
                        actor: None,
                        run_id: Some(run_id),
                        data: EventData::MethodFailed {
                            reason: FailureReason::Cancelled.to_string(),
                        },
                    });
                    remove_child = Some(method);
                }
                ChildCancel::Compensating(progress) => {
                    // The saga's terminal event is journalled once its
                    // compensation finishes.
                    compensation = Some(progress);
                }
                ChildCancel::AlreadyTerminal => {
                    remove_child = Some(method);
                }
            }
        }

        let (events, notifications, new_level) = self.finish_events(parts, now)?;
        info!(subject = %self.subject, %method, reason, "method revoked");
        Ok(CommandStep {
            transition: Transition {
                events,
                effects: Vec::new(),
                notifications,
                outcome: CommandOutcome::Revoked { new_level },
                command_id: Some(command_id),
                new_child: None,
                remove_child,
                replayed: false,
            },
            compensation,
        })
    }

    pub fn cancel_method(
        &mut self,
        method: VerificationMethod,
        command_id: CommandId,
        now: Timestamp,
    ) -> Result<CommandStep, CommandError> {
        if let Some(outcome) = self.command_outcomes.get(&command_id) {
            return Ok(CommandStep {
                transition: Transition::replay(outcome.clone()),
                compensation: None,
            });
        }
        self.cancel_run(method, Some(command_id), now)
    }

    /// Cancel one active run. Used by `CancelMethod` and by subject
    /// tombstoning (which cancels each active method in turn, committing
    /// between cancellations).
    pub fn cancel_run(
        &mut self,
        method: VerificationMethod,
        command_id: Option<CommandId>,
        now: Timestamp,
    ) -> Result<CommandStep, CommandError> {
        let child = self.active.get_mut(&method).ok_or(CommandError::NoActiveRun)?;
        let run_id = child.run_id();

        match child.cancel() {
            ChildCancel::Immediate(_) => {
                let (events, notifications, _) = self.finish_events(
                    vec![EventPart {
                        method: Some(method),
                        actor: None,
                        run_id: Some(run_id),
                        data: EventData::MethodFailed {
                            reason: FailureReason::Cancelled.to_string(),
                        },
                    }],
                    now,
                )?;
                Ok(CommandStep {
                    transition: Transition {
                        events,
                        effects: Vec::new(),
                        notifications,
                        outcome: CommandOutcome::Cancelled,
                        command_id,
                        new_child: None,
                        remove_child: Some(method),
                        replayed: false,
                    },
                    compensation: None,
                })
            }
            ChildCancel::Compensating(progress) => Ok(CommandStep {
                transition: Transition::reply_only(CommandOutcome::Cancelled, command_id),
                compensation: Some(progress),
            }),
            ChildCancel::AlreadyTerminal => Err(CommandError::NoActiveRun),
        }
    }

    /// Methods with a live run, for tombstoning sweeps.
    pub fn active_methods(&self) -> Vec<VerificationMethod> {
        self.active
            .iter()
            .filter(|(_, c)| !c.state().is_terminal())
            .map(|(&m, _)| m)
            .collect()
    }

    /// Live state of a method's child protocol, if one is running.
    pub fn child_state(&self, method: VerificationMethod) -> Option<porch_types::ProtocolState> {
        self.active.get(&method).map(|c| c.state())
    }

    // ── Timers ──────────────────────────────────────────────────────────

    /// The next instant this orchestrator needs to wake up: the earliest
    /// child deadline or completion-expiry boundary.
    pub fn next_wake(&self) -> Option<Timestamp> {
        let child_wake = self
            .active
            .values()
            .filter(|c| !c.state().is_terminal())
            .map(|c| c.deadline())
            .min();
        // A completion is still valid at expires_at; the timer fires one
        // second after the boundary.
        let expiry_wake = self
            .expiry_queue
            .iter()
            .next()
            .map(|(at, _, _)| at.plus_secs(1));
        match (child_wake, expiry_wake) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire the single most urgent due item at `now`: the earliest
    /// completion expiry, else the first due child deadline. The driver
    /// calls this in a loop (committing in between) until nothing is due —
    /// later expiries get their own fire.
    pub fn on_timer(&mut self, now: Timestamp) -> Result<Option<TimerAction>, CommandError> {
        if let Some(&(expires_at, method, sequence_index)) = self.expiry_queue.iter().next() {
            if now > expires_at {
                let (events, notifications, _) = self.finish_events(
                    vec![EventPart {
                        method: Some(method),
                        actor: None,
                        run_id: None,
                        data: EventData::MethodExpired { sequence_index },
                    }],
                    now,
                )?;
                info!(subject = %self.subject, %method, sequence_index, "completion expired");
                return Ok(Some(TimerAction::Transition(Transition {
                    events,
                    effects: Vec::new(),
                    notifications,
                    outcome: CommandOutcome::Acknowledged,
                    command_id: None,
                    new_child: None,
                    remove_child: None,
                    replayed: false,
                })));
            }
        }

        let due = self
            .active
            .iter()
            .filter(|(_, c)| !c.state().is_terminal() && now >= c.deadline())
            .map(|(&m, _)| m)
            .next();
        let Some(method) = due else {
            return Ok(None);
        };
        let child = self.active.get_mut(&method).expect("key just listed");
        let run_id = child.run_id();
        match child.on_deadline(now) {
            ChildDeadline::NotDue => Ok(None),
            ChildDeadline::Outcome(Outcome::Failed { reason }) => {
                let transition = self.failed_run_transition(method, run_id, reason, None, now)?;
                Ok(Some(TimerAction::Transition(transition)))
            }
            ChildDeadline::Outcome(Outcome::Completed { .. }) => Err(CommandError::Internal(
                "deadline cannot complete a run".into(),
            )),
            ChildDeadline::Compensating(progress) => {
                Ok(Some(TimerAction::Compensation(progress)))
            }
        }
    }

    // ── Saga compensation driving ───────────────────────────────────────

    pub fn two_party_compensation_done(&mut self) -> Result<SagaProgress, CommandError> {
        self.two_party_mut()
            .ok_or(CommandError::NoActiveRun)?
            .compensation_step_done()
            .map_err(|e| CommandError::Internal(e.to_string()))
    }

    pub fn two_party_compensation_failed(&mut self) -> Result<SagaProgress, CommandError> {
        self.two_party_mut()
            .ok_or(CommandError::NoActiveRun)?
            .compensation_step_failed()
            .map_err(|e| CommandError::Internal(e.to_string()))
    }

    pub fn two_party_record_failed(
        &mut self,
        reason: FailureReason,
    ) -> Result<SagaProgress, CommandError> {
        self.two_party_mut()
            .ok_or(CommandError::NoActiveRun)?
            .record_failed(reason)
            .map_err(|e| CommandError::Internal(e.to_string()))
    }

    /// Build the saga's terminal journal transition once compensation
    /// finished (or gave up).
    pub fn two_party_finish(
        &mut self,
        outcome: Outcome,
        now: Timestamp,
    ) -> Result<Transition, CommandError> {
        let method = VerificationMethod::TwoPartyInPerson;
        let run_id = self
            .active
            .get(&method)
            .map(|c| c.run_id())
            .ok_or(CommandError::NoActiveRun)?;
        let reason = match outcome {
            Outcome::Failed { reason } => reason,
            Outcome::Completed { .. } => {
                return Err(CommandError::Internal("saga finish must be a failure".into()))
            }
        };
        self.failed_run_transition(method, run_id, reason, None, now)
    }

    /// Audit record for a confirmation rolled back (or voided) by
    /// compensation. Audit events never move the score, so no level
    /// detection runs here.
    pub fn confirmation_audit(
        &self,
        verifier: SubjectId,
        now: Timestamp,
    ) -> Transition {
        let method = VerificationMethod::TwoPartyInPerson;
        let run_id = self.active.get(&method).map(|c| c.run_id());
        let event = VerificationEvent {
            seq: self.snapshot.last_seq + 1,
            at: now,
            method: Some(method),
            actor: Some(verifier),
            protocol_run_id: run_id,
            data: EventData::VerifierConfirmationRevoked,
        };
        // The verifier notification travels as the saga's explicit
        // NotifyConfirmationRevoked effect, not here.
        Transition {
            events: vec![event],
            effects: Vec::new(),
            notifications: Vec::new(),
            outcome: CommandOutcome::Acknowledged,
            command_id: None,
            new_child: None,
            remove_child: None,
            replayed: false,
        }
    }

    // ── Checkpointing ───────────────────────────────────────────────────

    /// A `snapshot_rebuilt` marker transition, when one is due. The marker
    /// is a read-back performance hint; it carries no score change and no
    /// level detection runs here.
    pub fn maybe_checkpoint(&self, now: Timestamp) -> Option<Transition> {
        if self.events_since_checkpoint < self.params.checkpoint_every_events {
            return None;
        }
        let event = VerificationEvent {
            seq: self.snapshot.last_seq + 1,
            at: now,
            method: None,
            actor: None,
            protocol_run_id: None,
            data: EventData::SnapshotRebuilt {
                snapshot: self.snapshot.clone(),
            },
        };
        Some(Transition {
            events: vec![event],
            effects: Vec::new(),
            notifications: Vec::new(),
            outcome: CommandOutcome::Acknowledged,
            command_id: None,
            new_child: None,
            remove_child: None,
            replayed: false,
        })
    }

    // ── Commit phase ────────────────────────────────────────────────────

    /// Apply a persisted transition to the in-memory state. Must only be
    /// called after every event was durably appended; an apply failure here
    /// means the prepare and commit saw different states, which is fatal.
    pub fn commit(
        &mut self,
        transition: Transition,
        now: Timestamp,
    ) -> Result<(CommandOutcome, Vec<Effect>, Vec<Notification>), StoreError> {
        if transition.replayed {
            return Ok((transition.outcome, Vec::new(), Vec::new()));
        }

        for event in &transition.events {
            self.track_expiry(event);
            if matches!(event.data, EventData::SnapshotRebuilt { .. }) {
                self.events_since_checkpoint = 0;
            } else {
                self.events_since_checkpoint += 1;
            }
            apply_event(&mut self.snapshot, event)?;
        }
        finalize(&mut self.snapshot, now);

        if let Some(child) = transition.new_child {
            self.active.insert(child.method(), child);
        }
        if let Some(method) = transition.remove_child {
            self.active.remove(&method);
        }
        if let Some(command_id) = transition.command_id {
            self.command_outcomes
                .insert(command_id, transition.outcome.clone());
        }

        Ok((
            transition.outcome,
            transition.effects,
            transition.notifications,
        ))
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn two_party_mut(&mut self) -> Option<&mut porch_protocols::TwoPartySaga> {
        match self.active.get_mut(&VerificationMethod::TwoPartyInPerson) {
            Some(Child::TwoParty(saga)) => Some(saga),
            _ => None,
        }
    }

    fn make_completion(
        &self,
        method: VerificationMethod,
        evidence_ref: Vec<u8>,
        now: Timestamp,
    ) -> MethodCompletion {
        let total_recorded = self
            .snapshot
            .completions
            .get(&method)
            .map(|l| l.len() as u32)
            .unwrap_or(0);
        let decay_days = porch_scoring::method_score(method).decay_days;
        MethodCompletion {
            method,
            sequence_index: total_recorded + 1,
            completed_at: now,
            evidence_ref,
            expires_at: (decay_days > 0).then(|| now.plus_days(decay_days as u64)),
            revoked_at: None,
            revocation_reason: None,
        }
    }

    fn failed_run_transition(
        &self,
        method: VerificationMethod,
        run_id: ProtocolRunId,
        reason: FailureReason,
        command_id: Option<CommandId>,
        now: Timestamp,
    ) -> Result<Transition, CommandError> {
        let reason_text = reason.to_string();
        let (events, notifications, _) = self.finish_events(
            vec![EventPart {
                method: Some(method),
                actor: None,
                run_id: Some(run_id),
                data: EventData::MethodFailed {
                    reason: reason_text.clone(),
                },
            }],
            now,
        )?;
        debug!(subject = %self.subject, %method, reason = %reason_text, "method run failed");
        Ok(Transition {
            events,
            effects: Vec::new(),
            notifications,
            outcome: CommandOutcome::RunFailed {
                reason: reason_text,
            },
            command_id,
            new_child: None,
            remove_child: Some(method),
            replayed: false,
        })
    }

    /// Assign sequence numbers, detect a level change and append the
    /// `level_changed` event plus notification in the same transaction.
    fn finish_events(
        &self,
        parts: Vec<EventPart>,
        now: Timestamp,
    ) -> Result<(Vec<VerificationEvent>, Vec<Notification>, Level), CommandError> {
        let mut scratch = self.snapshot.clone();
        let mut events = Vec::with_capacity(parts.len() + 1);
        let mut seq = self.snapshot.last_seq;

        for part in parts {
            seq += 1;
            let event = VerificationEvent {
                seq,
                at: now,
                method: part.method,
                actor: part.actor,
                protocol_run_id: part.run_id,
                data: part.data,
            };
            apply_event(&mut scratch, &event)
                .map_err(|e| CommandError::Internal(e.to_string()))?;
            events.push(event);
        }
        finalize(&mut scratch, now);

        let old_level = self.snapshot.level;
        let mut notifications = Vec::new();
        if !events.is_empty() && scratch.level != old_level {
            seq += 1;
            let event = VerificationEvent {
                seq,
                at: now,
                method: None,
                actor: None,
                protocol_run_id: None,
                data: EventData::LevelChanged {
                    old: old_level,
                    new: scratch.level,
                    score: scratch.score,
                },
            };
            apply_event(&mut scratch, &event)
                .map_err(|e| CommandError::Internal(e.to_string()))?;
            events.push(event);
            notifications.push(Notification::LevelChanged {
                subject: self.subject,
                old: old_level,
                new: scratch.level,
                score: scratch.score,
            });
        }

        Ok((events, notifications, scratch.level))
    }

    /// Keep the expiry queue aligned with committed events.
    fn track_expiry(&mut self, event: &VerificationEvent) {
        match (&event.data, event.method) {
            (EventData::MethodCompleted { completion }, Some(method)) => {
                if let Some(expires_at) = completion.expires_at {
                    self.expiry_queue
                        .insert((expires_at, method, completion.sequence_index));
                }
            }
            (EventData::MethodExpired { sequence_index }, Some(method)) => {
                self.expiry_queue
                    .retain(|&(_, m, i)| !(m == method && i == *sequence_index));
            }
            (EventData::MethodRevoked { sequence_index, .. }, Some(method)) => {
                self.expiry_queue
                    .retain(|&(_, m, i)| !(m == method && i == *sequence_index));
            }
            _ => {}
        }
    }
}

struct EventPart {
    method: Option<VerificationMethod>,
    actor: Option<SubjectId>,
    run_id: Option<ProtocolRunId>,
    data: EventData,
}

fn snapshot_events_since(checkpoint_seq: u64, events: &[VerificationEvent]) -> u64 {
    events
        .iter()
        .filter(|e| e.seq > checkpoint_seq)
        .filter(|e| !matches!(e.data, EventData::SnapshotRebuilt { .. }))
        .count() as u64
}
