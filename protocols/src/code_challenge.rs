//! Code-challenge protocol (email and phone verification).
//!
//! At start, a 6-digit code is dispatched to the target address and only a
//! salted hash of it is retained. The subject then has a bounded number of
//! attempts, within the code's TTL, to echo the code back.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use porch_types::event::CodeChallengeSetup;
use porch_types::{EngineParams, ProtocolRunId, ProtocolState, Timestamp, VerificationMethod};

use crate::common::{Effect, FailureReason, Outcome, TokenSource};
use crate::error::ProtocolError;

/// One code-challenge run.
#[derive(Debug)]
pub struct CodeChallenge {
    run_id: ProtocolRunId,
    method: VerificationMethod,
    /// The email address or phone number the code was sent to.
    target: String,
    code_hash: [u8; 32],
    salt: [u8; 16],
    code_expires_at: Timestamp,
    deadline: Timestamp,
    attempts_left: u32,
    state: ProtocolState,
    outcome: Option<Outcome>,
}

fn hash_code(salt: &[u8; 16], code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(code.as_bytes());
    hasher.finalize().into()
}

impl CodeChallenge {
    /// Start a new run: generate a code, request its delivery, keep the hash.
    pub fn start(
        run_id: ProtocolRunId,
        method: VerificationMethod,
        target: String,
        now: Timestamp,
        params: &EngineParams,
        tokens: &dyn TokenSource,
    ) -> (Self, Vec<Effect>) {
        let code = tokens.fresh_code();
        let salt = tokens.fresh_id();
        let challenge = Self {
            run_id,
            method,
            target: target.clone(),
            code_hash: hash_code(&salt, &code),
            salt,
            code_expires_at: now.plus_secs(params.code_ttl_secs),
            deadline: now.plus_secs(params.code_deadline_secs),
            attempts_left: params.code_max_attempts,
            state: ProtocolState::Waiting,
            outcome: None,
        };
        let effects = vec![Effect::SendCode {
            target,
            code,
            ttl_secs: params.code_ttl_secs,
        }];
        (challenge, effects)
    }

    /// Restore a run from its journalled setup after a restart. The code is
    /// not re-sent; the stored hash still accepts the original code.
    pub fn restore(
        run_id: ProtocolRunId,
        method: VerificationMethod,
        target: String,
        setup: &CodeChallengeSetup,
        deadline: Timestamp,
    ) -> Self {
        Self {
            run_id,
            method,
            target,
            code_hash: setup.code_hash,
            salt: setup.salt,
            code_expires_at: setup.code_expires_at,
            deadline,
            attempts_left: setup.attempts_left,
            state: ProtocolState::Waiting,
            outcome: None,
        }
    }

    /// Durable setup material, embedded in the `method_started` event.
    pub fn setup(&self) -> CodeChallengeSetup {
        CodeChallengeSetup {
            code_hash: self.code_hash,
            salt: self.salt,
            code_expires_at: self.code_expires_at,
            attempts_left: self.attempts_left,
        }
    }

    /// Handle a submitted code.
    ///
    /// `Ok(None)` means a wrong code with attempts remaining; the run stays
    /// live. `Ok(Some(..))` is the terminal outcome.
    pub fn enter_code(
        &mut self,
        code: &str,
        now: Timestamp,
    ) -> Result<Option<Outcome>, ProtocolError> {
        if self.state != ProtocolState::Waiting {
            return Err(ProtocolError::NotActive);
        }
        if now > self.deadline || now > self.code_expires_at {
            return Ok(Some(self.finish(Outcome::Failed {
                reason: FailureReason::Expired,
            })));
        }

        let submitted = hash_code(&self.salt, code);
        if bool::from(submitted.ct_eq(&self.code_hash)) {
            return Ok(Some(self.finish(Outcome::Completed {
                evidence_ref: self.target.clone().into_bytes(),
            })));
        }

        self.attempts_left = self.attempts_left.saturating_sub(1);
        if self.attempts_left == 0 {
            return Ok(Some(self.finish(Outcome::Failed {
                reason: FailureReason::Exhausted,
            })));
        }
        Ok(None)
    }

    /// The run's deadline fired.
    pub fn on_deadline(&mut self, now: Timestamp) -> Option<Outcome> {
        if self.state != ProtocolState::Waiting || now < self.deadline {
            return None;
        }
        Some(self.finish(Outcome::Failed {
            reason: FailureReason::Timeout,
        }))
    }

    /// External cancellation. No compensation: the only side effect was the
    /// code delivery, which expires on its own.
    pub fn cancel(&mut self) -> Option<Outcome> {
        if self.state != ProtocolState::Waiting {
            return None;
        }
        self.state = ProtocolState::Cancelled;
        let outcome = Outcome::Failed {
            reason: FailureReason::Cancelled,
        };
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.state = match outcome {
            Outcome::Completed { .. } => ProtocolState::Completed,
            Outcome::Failed { .. } => ProtocolState::Failed,
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    pub fn run_id(&self) -> ProtocolRunId {
        self.run_id
    }

    pub fn method(&self) -> VerificationMethod {
        self.method
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn attempts_left(&self) -> u32 {
        self.attempts_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTokens;

    impl TokenSource for FixedTokens {
        fn fresh_token(&self) -> [u8; 32] {
            [7; 32]
        }
        fn fresh_id(&self) -> [u8; 16] {
            [3; 16]
        }
        fn fresh_code(&self) -> String {
            "123456".to_string()
        }
    }

    fn start_challenge() -> (CodeChallenge, Vec<Effect>) {
        CodeChallenge::start(
            ProtocolRunId::new([1; 16]),
            VerificationMethod::Email,
            "sam@example.org".into(),
            Timestamp::new(1_000),
            &EngineParams::default(),
            &FixedTokens,
        )
    }

    #[test]
    fn start_requests_code_delivery() {
        let (challenge, effects) = start_challenge();
        assert_eq!(challenge.state(), ProtocolState::Waiting);
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::SendCode { target, code, ttl_secs } => {
                assert_eq!(target, "sam@example.org");
                assert_eq!(code, "123456");
                assert_eq!(*ttl_secs, 30 * 60);
            }
            other => panic!("expected SendCode, got {other:?}"),
        }
    }

    #[test]
    fn matching_code_completes_with_target_evidence() {
        let (mut challenge, _) = start_challenge();
        let outcome = challenge
            .enter_code("123456", Timestamp::new(1_100))
            .unwrap()
            .expect("should be terminal");
        assert_eq!(
            outcome,
            Outcome::Completed {
                evidence_ref: b"sam@example.org".to_vec()
            }
        );
        assert_eq!(challenge.state(), ProtocolState::Completed);
    }

    #[test]
    fn wrong_code_decrements_attempts_then_exhausts() {
        let (mut challenge, _) = start_challenge();
        for _ in 0..4 {
            let result = challenge.enter_code("000000", Timestamp::new(1_100)).unwrap();
            assert!(result.is_none());
        }
        let outcome = challenge
            .enter_code("000000", Timestamp::new(1_100))
            .unwrap()
            .expect("fifth wrong attempt is terminal");
        assert_eq!(
            outcome,
            Outcome::Failed {
                reason: FailureReason::Exhausted
            }
        );
    }

    #[test]
    fn code_after_ttl_fails_expired() {
        let (mut challenge, _) = start_challenge();
        // TTL is 30 minutes from dispatch at t=1000.
        let outcome = challenge
            .enter_code("123456", Timestamp::new(1_000 + 30 * 60 + 1))
            .unwrap()
            .expect("expired is terminal");
        assert_eq!(
            outcome,
            Outcome::Failed {
                reason: FailureReason::Expired
            }
        );
    }

    #[test]
    fn code_at_ttl_boundary_still_accepted() {
        let (mut challenge, _) = start_challenge();
        let outcome = challenge
            .enter_code("123456", Timestamp::new(1_000 + 30 * 60))
            .unwrap()
            .expect("boundary instant is still valid");
        assert!(matches!(outcome, Outcome::Completed { .. }));
    }

    #[test]
    fn signal_after_terminal_is_rejected() {
        let (mut challenge, _) = start_challenge();
        challenge.enter_code("123456", Timestamp::new(1_100)).unwrap();
        let err = challenge
            .enter_code("123456", Timestamp::new(1_200))
            .unwrap_err();
        assert_eq!(err, ProtocolError::NotActive);
    }

    #[test]
    fn restore_accepts_the_original_code() {
        let (challenge, _) = start_challenge();
        let restored_setup = challenge.setup();
        let mut restored = CodeChallenge::restore(
            challenge.run_id(),
            VerificationMethod::Email,
            "sam@example.org".into(),
            &restored_setup,
            challenge.deadline(),
        );
        let outcome = restored
            .enter_code("123456", Timestamp::new(1_100))
            .unwrap()
            .expect("restored run accepts original code");
        assert!(matches!(outcome, Outcome::Completed { .. }));
    }

    #[test]
    fn deadline_fires_timeout() {
        let (mut challenge, _) = start_challenge();
        assert!(challenge.on_deadline(Timestamp::new(1_001)).is_none());
        let outcome = challenge
            .on_deadline(challenge.deadline())
            .expect("deadline reached");
        assert_eq!(
            outcome,
            Outcome::Failed {
                reason: FailureReason::Timeout
            }
        );
    }
}
