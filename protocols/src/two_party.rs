//! Two-party in-person verification saga.
//!
//! Two trusted community members confirm a subject's identity in person by
//! scanning QR codes. Forward steps: issue tokens → collect two
//! confirmations from distinct verifiers → validate both against the
//! authorization policy → record confirmations → award the completion.
//! On any failure, compensation runs in reverse order of the forward steps
//! that completed, each step retried up to a bounded attempt count.
//!
//! The saga itself performs no I/O: the driver executes returned
//! [`Effect`]s and reports progress back (`record_done`,
//! `compensation_step_done`, `compensation_step_failed`).

use porch_policy::{Authorization, Denial};
use porch_types::{ProtocolRunId, ProtocolState, SubjectId, Timestamp};

use crate::common::{Effect, FailureReason, Outcome, TokenSource};
use crate::error::ProtocolError;

/// Fine-grained saga phase. Maps onto the coarse [`ProtocolState`] via
/// [`TwoPartySaga::state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SagaPhase {
    AwaitingFirst,
    AwaitingSecond,
    Validating,
    Recording,
    Completed,
    Compensating,
    Failed,
    Cancelled,
}

/// Forward steps with externally observable side effects, in execution
/// order. Compensation walks the completed ones backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SagaStep {
    IssueTokens,
    RecordConfirmations,
}

/// One compensation step still to run, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CompensationStep {
    /// Undo the record step: revoke credited confirmations.
    RevokeRecorded,
    /// Void confirmations that were collected but never credited. Audit
    /// trail only; counters were never incremented.
    AnnulCollected,
    /// Invalidate both slot tokens.
    InvalidateTokens,
}

/// A verifier confirmation held by the saga before it is recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub verifier: SubjectId,
    pub slot: u8,
    pub evidence: Vec<u8>,
    pub at: Timestamp,
}

/// Reply to a `confirm` signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmAck {
    /// First confirmation accepted; waiting for the second verifier.
    First,
    /// Both confirmations collected; the driver must now run the
    /// authorization policy for each verifier and call `validate`.
    ReadyToValidate { verifiers: [SubjectId; 2] },
    /// No state change: same token or same verifier again. Success reply.
    Duplicate,
}

/// What the driver must do next after validation or a compensation step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SagaProgress {
    /// Execute these recording effects, then call `record_done`.
    Record { effects: Vec<Effect> },
    /// Compensation started or continued: execute these effects, then call
    /// `compensation_step_done` (or `compensation_step_failed`).
    Compensate { effects: Vec<Effect> },
    /// The saga reached a terminal outcome.
    Done { outcome: Outcome },
}

/// The two-party in-person saga.
#[derive(Debug)]
pub struct TwoPartySaga {
    run_id: ProtocolRunId,
    subject: SubjectId,
    tokens: [[u8; 32]; 2],
    token_expires_at: Timestamp,
    deadline: Timestamp,
    confirmations: Vec<Confirmation>,
    phase: SagaPhase,
    completed_steps: Vec<SagaStep>,
    /// Reverse-order compensation steps still to run.
    pending_compensation: Vec<CompensationStep>,
    compensation_attempts: u32,
    max_compensation_attempts: u32,
    /// What the run fails with once compensation finishes.
    terminal_reason: Option<FailureReason>,
    outcome: Option<Outcome>,
}

impl TwoPartySaga {
    /// Issue the two slot tokens and enter `AwaitingFirst`.
    pub fn start(
        subject: SubjectId,
        run_id: ProtocolRunId,
        now: Timestamp,
        token_ttl_secs: u64,
        max_compensation_attempts: u32,
        tokens: &dyn TokenSource,
    ) -> (Self, Vec<Effect>) {
        let slot_tokens = [tokens.fresh_token(), tokens.fresh_token()];
        let token_expires_at = now.plus_secs(token_ttl_secs);
        let saga = Self {
            run_id,
            subject,
            tokens: slot_tokens,
            token_expires_at,
            deadline: token_expires_at,
            confirmations: Vec::new(),
            phase: SagaPhase::AwaitingFirst,
            completed_steps: vec![SagaStep::IssueTokens],
            pending_compensation: Vec::new(),
            compensation_attempts: 0,
            max_compensation_attempts,
            terminal_reason: None,
            outcome: None,
        };
        let effects = vec![
            Effect::StoreToken {
                token: slot_tokens[0],
                slot: 1,
                expires_at: token_expires_at,
            },
            Effect::StoreToken {
                token: slot_tokens[1],
                slot: 2,
                expires_at: token_expires_at,
            },
        ];
        (saga, effects)
    }

    /// Restore a live run from the token store after a restart.
    /// Confirmations collected before the crash are not recorded until the
    /// record step, so the saga resumes awaiting both verifiers.
    pub fn restore(
        subject: SubjectId,
        run_id: ProtocolRunId,
        tokens: [[u8; 32]; 2],
        token_expires_at: Timestamp,
        deadline: Timestamp,
        max_compensation_attempts: u32,
    ) -> Self {
        Self {
            run_id,
            subject,
            tokens,
            token_expires_at,
            deadline,
            confirmations: Vec::new(),
            phase: SagaPhase::AwaitingFirst,
            completed_steps: vec![SagaStep::IssueTokens],
            pending_compensation: Vec::new(),
            compensation_attempts: 0,
            max_compensation_attempts,
            terminal_reason: None,
            outcome: None,
        }
    }

    /// Handle a `verifier_confirmation` signal.
    pub fn confirm(
        &mut self,
        token: &[u8; 32],
        verifier: SubjectId,
        evidence: Vec<u8>,
        now: Timestamp,
    ) -> Result<ConfirmAck, ProtocolError> {
        match self.phase {
            SagaPhase::AwaitingFirst | SagaPhase::AwaitingSecond => {}
            _ => return Err(ProtocolError::NotActive),
        }
        if now > self.deadline || now > self.token_expires_at {
            return Err(ProtocolError::Expired);
        }

        let slot = if token == &self.tokens[0] {
            1
        } else if token == &self.tokens[1] {
            2
        } else {
            return Err(ProtocolError::UnknownToken);
        };

        // Duplicate token, or the same verifier trying to fill both slots:
        // counts as the one confirmation they already made.
        if self
            .confirmations
            .iter()
            .any(|c| c.slot == slot || c.verifier == verifier)
        {
            return Ok(ConfirmAck::Duplicate);
        }

        self.confirmations.push(Confirmation {
            verifier,
            slot,
            evidence,
            at: now,
        });

        if self.confirmations.len() < 2 {
            self.phase = SagaPhase::AwaitingSecond;
            Ok(ConfirmAck::First)
        } else {
            self.phase = SagaPhase::Validating;
            Ok(ConfirmAck::ReadyToValidate {
                verifiers: [self.confirmations[0].verifier, self.confirmations[1].verifier],
            })
        }
    }

    /// The verifiers this saga is waiting to have validated.
    pub fn confirmations(&self) -> &[Confirmation] {
        &self.confirmations
    }

    /// Feed in the policy decision for each confirming verifier.
    pub fn validate(
        &mut self,
        decisions: &[(SubjectId, Result<Authorization, Denial>)],
    ) -> Result<SagaProgress, ProtocolError> {
        if self.phase != SagaPhase::Validating {
            return Err(ProtocolError::WrongState(format!("{:?}", self.phase)));
        }

        for (verifier, decision) in decisions {
            if let Err(denial) = decision {
                let reason = FailureReason::UnauthorizedVerifier {
                    verifier: *verifier,
                    denial: denial.to_string(),
                };
                return Ok(self.begin_compensation(reason));
            }
        }

        self.phase = SagaPhase::Recording;
        let effects = self
            .confirmations
            .iter()
            .map(|c| Effect::CreditConfirmation {
                verifier: c.verifier,
                evidence: c.evidence.clone(),
            })
            .collect();
        Ok(SagaProgress::Record { effects })
    }

    /// The driver finished the record step durably.
    pub fn record_done(&mut self) -> Result<Outcome, ProtocolError> {
        if self.phase != SagaPhase::Recording {
            return Err(ProtocolError::WrongState(format!("{:?}", self.phase)));
        }
        self.completed_steps.push(SagaStep::RecordConfirmations);

        // Award: evidence is both verifier ids, slot order.
        let mut by_slot = self.confirmations.clone();
        by_slot.sort_by_key(|c| c.slot);
        let mut evidence = Vec::with_capacity(32);
        for c in &by_slot {
            evidence.extend_from_slice(c.verifier.as_bytes());
        }

        self.phase = SagaPhase::Completed;
        let outcome = Outcome::Completed {
            evidence_ref: evidence,
        };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// The driver could not complete the record step; roll back.
    ///
    /// The step may have partially landed, so compensation conservatively
    /// treats it as completed and revokes whatever was credited.
    pub fn record_failed(&mut self, reason: FailureReason) -> Result<SagaProgress, ProtocolError> {
        if self.phase != SagaPhase::Recording {
            return Err(ProtocolError::WrongState(format!("{:?}", self.phase)));
        }
        self.completed_steps.push(SagaStep::RecordConfirmations);
        Ok(self.begin_compensation(reason))
    }

    /// The saga's global deadline fired.
    pub fn on_deadline(&mut self, now: Timestamp) -> Option<SagaProgress> {
        match self.phase {
            SagaPhase::AwaitingFirst | SagaPhase::AwaitingSecond | SagaPhase::Validating => {
                if now < self.deadline {
                    return None;
                }
                Some(self.begin_compensation(FailureReason::Timeout))
            }
            _ => None,
        }
    }

    /// External cancellation, from whichever forward state.
    pub fn cancel(&mut self) -> Option<SagaProgress> {
        match self.phase {
            SagaPhase::AwaitingFirst
            | SagaPhase::AwaitingSecond
            | SagaPhase::Validating
            | SagaPhase::Recording => Some(self.begin_compensation(FailureReason::Cancelled)),
            _ => None,
        }
    }

    /// One compensation step's effects executed successfully.
    pub fn compensation_step_done(&mut self) -> Result<SagaProgress, ProtocolError> {
        if self.phase != SagaPhase::Compensating {
            return Err(ProtocolError::WrongState(format!("{:?}", self.phase)));
        }
        self.pending_compensation.remove(0);
        self.compensation_attempts = 0;
        self.next_compensation_progress()
    }

    /// One compensation step's effects failed; retry or give up.
    pub fn compensation_step_failed(&mut self) -> Result<SagaProgress, ProtocolError> {
        if self.phase != SagaPhase::Compensating {
            return Err(ProtocolError::WrongState(format!("{:?}", self.phase)));
        }
        self.compensation_attempts += 1;
        if self.compensation_attempts >= self.max_compensation_attempts {
            // Give up: surface for operator attention. The method still
            // counts as not-completed.
            self.phase = SagaPhase::Failed;
            let outcome = Outcome::Failed {
                reason: FailureReason::CompensationIncomplete,
            };
            self.outcome = Some(outcome.clone());
            return Ok(SagaProgress::Done { outcome });
        }
        // Same step again.
        Ok(SagaProgress::Compensate {
            effects: self.compensation_effects(self.pending_compensation[0]),
        })
    }

    fn begin_compensation(&mut self, reason: FailureReason) -> SagaProgress {
        self.phase = SagaPhase::Compensating;
        self.terminal_reason = Some(reason);
        self.compensation_attempts = 0;
        // Reverse order of what has observably happened: confirmations
        // (credited or merely collected) were made after the tokens were
        // issued, so they are undone first.
        let mut pending = Vec::new();
        if self.completed_steps.contains(&SagaStep::RecordConfirmations) {
            pending.push(CompensationStep::RevokeRecorded);
        } else if !self.confirmations.is_empty() {
            pending.push(CompensationStep::AnnulCollected);
        }
        pending.push(CompensationStep::InvalidateTokens);
        self.pending_compensation = pending;
        self.next_compensation_progress()
            .expect("compensating phase was just entered")
    }

    fn next_compensation_progress(&mut self) -> Result<SagaProgress, ProtocolError> {
        match self.pending_compensation.first() {
            Some(&step) => Ok(SagaProgress::Compensate {
                effects: self.compensation_effects(step),
            }),
            None => {
                let reason = self
                    .terminal_reason
                    .take()
                    .unwrap_or(FailureReason::Cancelled);
                self.phase = if reason == FailureReason::Cancelled {
                    SagaPhase::Cancelled
                } else {
                    SagaPhase::Failed
                };
                let outcome = Outcome::Failed { reason };
                self.outcome = Some(outcome.clone());
                Ok(SagaProgress::Done { outcome })
            }
        }
    }

    fn compensation_effects(&self, step: CompensationStep) -> Vec<Effect> {
        match step {
            CompensationStep::InvalidateTokens => vec![
                Effect::InvalidateToken {
                    token: self.tokens[0],
                },
                Effect::InvalidateToken {
                    token: self.tokens[1],
                },
            ],
            CompensationStep::RevokeRecorded => self
                .confirmations
                .iter()
                .flat_map(|c| {
                    [
                        Effect::RevokeConfirmation {
                            verifier: c.verifier,
                        },
                        Effect::NotifyConfirmationRevoked {
                            verifier: c.verifier,
                        },
                    ]
                })
                .collect(),
            CompensationStep::AnnulCollected => self
                .confirmations
                .iter()
                .flat_map(|c| {
                    [
                        Effect::AnnulConfirmation {
                            verifier: c.verifier,
                        },
                        Effect::NotifyConfirmationRevoked {
                            verifier: c.verifier,
                        },
                    ]
                })
                .collect(),
        }
    }

    pub fn run_id(&self) -> ProtocolRunId {
        self.run_id
    }

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn phase(&self) -> SagaPhase {
        self.phase
    }

    /// Coarse lifecycle state for the run record.
    pub fn state(&self) -> ProtocolState {
        match self.phase {
            SagaPhase::AwaitingFirst
            | SagaPhase::AwaitingSecond
            | SagaPhase::Validating
            | SagaPhase::Recording => ProtocolState::Waiting,
            SagaPhase::Completed => ProtocolState::Completed,
            SagaPhase::Compensating => ProtocolState::Compensating,
            SagaPhase::Failed => ProtocolState::Failed,
            SagaPhase::Cancelled => ProtocolState::Cancelled,
        }
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porch_policy::Authorization;
    use std::collections::BTreeSet;

    struct SeqTokens(std::sync::atomic::AtomicU8);

    impl TokenSource for SeqTokens {
        fn fresh_token(&self) -> [u8; 32] {
            let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            [n; 32]
        }
        fn fresh_id(&self) -> [u8; 16] {
            [9; 16]
        }
        fn fresh_code(&self) -> String {
            "000000".into()
        }
    }

    fn subject() -> SubjectId {
        SubjectId::new([1; 16])
    }

    fn verifier(n: u8) -> SubjectId {
        SubjectId::new([n; 16])
    }

    fn authorized() -> Result<Authorization, Denial> {
        Ok(Authorization {
            credentials: BTreeSet::new(),
            successful_confirmations: 0,
        })
    }

    fn start_saga() -> (TwoPartySaga, Vec<Effect>) {
        TwoPartySaga::start(
            subject(),
            ProtocolRunId::new([5; 16]),
            Timestamp::new(1_000),
            72 * 3600,
            10,
            &SeqTokens(std::sync::atomic::AtomicU8::new(0)),
        )
    }

    /// Run the happy path up to `ReadyToValidate`.
    fn confirm_both(saga: &mut TwoPartySaga) -> [SubjectId; 2] {
        let ack = saga
            .confirm(&[1; 32], verifier(10), b"loc1".to_vec(), Timestamp::new(2_000))
            .unwrap();
        assert_eq!(ack, ConfirmAck::First);
        let ack = saga
            .confirm(&[2; 32], verifier(11), b"loc2".to_vec(), Timestamp::new(3_000))
            .unwrap();
        match ack {
            ConfirmAck::ReadyToValidate { verifiers } => verifiers,
            other => panic!("expected ReadyToValidate, got {other:?}"),
        }
    }

    // ── Forward path ────────────────────────────────────────────────────

    #[test]
    fn start_issues_two_distinct_tokens() {
        let (saga, effects) = start_saga();
        assert_eq!(saga.phase(), SagaPhase::AwaitingFirst);
        assert_eq!(effects.len(), 2);
        let tokens: Vec<[u8; 32]> = effects
            .iter()
            .map(|e| match e {
                Effect::StoreToken { token, .. } => *token,
                other => panic!("expected StoreToken, got {other:?}"),
            })
            .collect();
        assert_ne!(tokens[0], tokens[1]);
    }

    #[test]
    fn happy_path_records_and_awards() {
        let (mut saga, _) = start_saga();
        let verifiers = confirm_both(&mut saga);

        let progress = saga
            .validate(&[(verifiers[0], authorized()), (verifiers[1], authorized())])
            .unwrap();
        let effects = match progress {
            SagaProgress::Record { effects } => effects,
            other => panic!("expected Record, got {other:?}"),
        };
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], Effect::CreditConfirmation { .. }));

        let outcome = saga.record_done().unwrap();
        match outcome {
            Outcome::Completed { evidence_ref } => {
                // Both verifier ids, slot order.
                assert_eq!(evidence_ref.len(), 32);
                assert_eq!(&evidence_ref[..16], verifier(10).as_bytes());
                assert_eq!(&evidence_ref[16..], verifier(11).as_bytes());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(saga.state(), ProtocolState::Completed);
    }

    // ── Edge cases ──────────────────────────────────────────────────────

    #[test]
    fn same_verifier_cannot_fill_both_slots() {
        let (mut saga, _) = start_saga();
        saga.confirm(&[1; 32], verifier(10), Vec::new(), Timestamp::new(2_000))
            .unwrap();
        let ack = saga
            .confirm(&[2; 32], verifier(10), Vec::new(), Timestamp::new(2_100))
            .unwrap();
        assert_eq!(ack, ConfirmAck::Duplicate);
        assert_eq!(saga.phase(), SagaPhase::AwaitingSecond);
    }

    #[test]
    fn duplicate_token_is_idempotent() {
        let (mut saga, _) = start_saga();
        saga.confirm(&[1; 32], verifier(10), Vec::new(), Timestamp::new(2_000))
            .unwrap();
        let ack = saga
            .confirm(&[1; 32], verifier(10), Vec::new(), Timestamp::new(2_100))
            .unwrap();
        assert_eq!(ack, ConfirmAck::Duplicate);
        assert_eq!(saga.confirmations().len(), 1);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let (mut saga, _) = start_saga();
        let err = saga
            .confirm(&[99; 32], verifier(10), Vec::new(), Timestamp::new(2_000))
            .unwrap_err();
        assert_eq!(err, ProtocolError::UnknownToken);
    }

    #[test]
    fn confirmation_after_expiry_is_rejected() {
        let (mut saga, _) = start_saga();
        let after = Timestamp::new(1_000 + 72 * 3600 + 1);
        let err = saga
            .confirm(&[1; 32], verifier(10), Vec::new(), after)
            .unwrap_err();
        assert_eq!(err, ProtocolError::Expired);
    }

    // ── Compensation ────────────────────────────────────────────────────

    #[test]
    fn unauthorized_verifier_annuls_confirmations_then_tokens() {
        // Validation failure happens before the record step: the collected
        // confirmations are voided (audit only, counters untouched) and
        // both tokens invalidated, in reverse forward order.
        let (mut saga, _) = start_saga();
        let verifiers = confirm_both(&mut saga);

        let progress = saga
            .validate(&[
                (verifiers[0], authorized()),
                (verifiers[1], Err(Denial::NotAVerifier)),
            ])
            .unwrap();
        let effects = match progress {
            SagaProgress::Compensate { effects } => effects,
            other => panic!("expected Compensate, got {other:?}"),
        };
        assert_eq!(
            effects,
            vec![
                Effect::AnnulConfirmation {
                    verifier: verifiers[0]
                },
                Effect::NotifyConfirmationRevoked {
                    verifier: verifiers[0]
                },
                Effect::AnnulConfirmation {
                    verifier: verifiers[1]
                },
                Effect::NotifyConfirmationRevoked {
                    verifier: verifiers[1]
                },
            ]
        );
        assert_eq!(saga.state(), ProtocolState::Compensating);

        let progress = saga.compensation_step_done().unwrap();
        let effects = match progress {
            SagaProgress::Compensate { effects } => effects,
            other => panic!("expected token compensation, got {other:?}"),
        };
        assert_eq!(
            effects,
            vec![
                Effect::InvalidateToken { token: [1; 32] },
                Effect::InvalidateToken { token: [2; 32] },
            ]
        );

        let progress = saga.compensation_step_done().unwrap();
        match progress {
            SagaProgress::Done { outcome } => match outcome {
                Outcome::Failed {
                    reason: FailureReason::UnauthorizedVerifier { verifier, .. },
                } => assert_eq!(verifier, verifiers[1]),
                other => panic!("expected UnauthorizedVerifier, got {other:?}"),
            },
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(saga.state(), ProtocolState::Failed);
    }

    #[test]
    fn record_failure_compensates_in_reverse_order() {
        let (mut saga, _) = start_saga();
        let verifiers = confirm_both(&mut saga);
        saga.validate(&[(verifiers[0], authorized()), (verifiers[1], authorized())])
            .unwrap();
        // Record step is underway but fails after partially landing.
        let progress = saga.record_failed(FailureReason::Timeout).unwrap();

        // First compensation: undo the record step.
        let effects = match progress {
            SagaProgress::Compensate { effects } => effects,
            other => panic!("expected Compensate, got {other:?}"),
        };
        assert!(matches!(effects[0], Effect::RevokeConfirmation { .. }));

        // Then the token step.
        let progress = saga.compensation_step_done().unwrap();
        let effects = match progress {
            SagaProgress::Compensate { effects } => effects,
            other => panic!("expected token compensation, got {other:?}"),
        };
        assert!(matches!(effects[0], Effect::InvalidateToken { .. }));

        let progress = saga.compensation_step_done().unwrap();
        assert!(matches!(progress, SagaProgress::Done { .. }));
    }

    #[test]
    fn compensation_retries_then_surfaces_incomplete() {
        let (mut saga, _) = start_saga();
        confirm_both(&mut saga);
        saga.validate(&[
            (verifier(10), Err(Denial::Revoked)),
            (verifier(11), authorized()),
        ])
        .unwrap();

        // Fail the step until attempts run out.
        for _ in 0..9 {
            let progress = saga.compensation_step_failed().unwrap();
            assert!(matches!(progress, SagaProgress::Compensate { .. }));
        }
        let progress = saga.compensation_step_failed().unwrap();
        match progress {
            SagaProgress::Done { outcome } => assert_eq!(
                outcome,
                Outcome::Failed {
                    reason: FailureReason::CompensationIncomplete
                }
            ),
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(saga.state(), ProtocolState::Failed);
    }

    #[test]
    fn timeout_compensates_from_waiting() {
        let (mut saga, _) = start_saga();
        assert!(saga.on_deadline(Timestamp::new(2_000)).is_none());
        let progress = saga
            .on_deadline(Timestamp::new(1_000 + 72 * 3600))
            .expect("deadline reached");
        assert!(matches!(progress, SagaProgress::Compensate { .. }));
        let progress = saga.compensation_step_done().unwrap();
        match progress {
            SagaProgress::Done { outcome } => assert_eq!(
                outcome,
                Outcome::Failed {
                    reason: FailureReason::Timeout
                }
            ),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn cancel_ends_in_cancelled_state() {
        let (mut saga, _) = start_saga();
        saga.confirm(&[1; 32], verifier(10), Vec::new(), Timestamp::new(2_000))
            .unwrap();
        let progress = saga.cancel().expect("cancellable");
        // One collected confirmation to annul, then the tokens.
        assert!(matches!(progress, SagaProgress::Compensate { .. }));
        let progress = saga.compensation_step_done().unwrap();
        assert!(matches!(progress, SagaProgress::Compensate { .. }));
        let progress = saga.compensation_step_done().unwrap();
        assert!(matches!(progress, SagaProgress::Done { .. }));
        assert_eq!(saga.state(), ProtocolState::Cancelled);
    }

    #[test]
    fn confirm_after_terminal_is_not_active() {
        let (mut saga, _) = start_saga();
        saga.cancel().unwrap();
        saga.compensation_step_done().unwrap();
        let err = saga
            .confirm(&[1; 32], verifier(10), Vec::new(), Timestamp::new(2_000))
            .unwrap_err();
        assert_eq!(err, ProtocolError::NotActive);
    }
}
