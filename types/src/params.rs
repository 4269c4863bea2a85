//! Engine parameters — every operationally tunable value in one struct.

use serde::{Deserialize, Serialize};

/// Tunable engine parameters.
///
/// Defaults match production behaviour; tests override individual fields
/// with struct-update syntax.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineParams {
    // ── Code challenges (email / phone) ──────────────────────────────────
    /// Seconds a delivered code stays valid after dispatch.
    pub code_ttl_secs: u64,

    /// Wrong-code attempts allowed before the run fails.
    pub code_max_attempts: u32,

    /// Overall deadline for a code-challenge run.
    pub code_deadline_secs: u64,

    // ── Two-party in-person ──────────────────────────────────────────────
    /// Lifetime of the two QR slot tokens and of the whole saga.
    pub two_party_deadline_secs: u64,

    /// Compensation retries before a run is marked compensation-incomplete.
    pub compensation_max_attempts: u32,

    // ── Human review ─────────────────────────────────────────────────────
    /// Deadline for a human review decision.
    pub review_deadline_secs: u64,

    // ── Attestation intake ───────────────────────────────────────────────
    /// Deadline for an attestation run to receive its signal.
    pub attestation_deadline_secs: u64,

    // ── Collaborator retries ─────────────────────────────────────────────
    pub retry_initial_secs: u64,
    pub retry_factor: u32,
    pub retry_cap_secs: u64,
    pub retry_max_attempts: u32,

    // ── Journal maintenance ──────────────────────────────────────────────
    /// Append a snapshot checkpoint marker every this many events.
    pub checkpoint_every_events: u64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            // Code challenges
            code_ttl_secs: 30 * 60,
            code_max_attempts: 5,
            code_deadline_secs: 24 * 3600,

            // Two-party in-person
            two_party_deadline_secs: 72 * 3600,
            compensation_max_attempts: 10,

            // Human review
            review_deadline_secs: 30 * 24 * 3600,

            // Attestation intake
            attestation_deadline_secs: 30 * 24 * 3600,

            // Collaborator retries
            retry_initial_secs: 1,
            retry_factor: 2,
            retry_cap_secs: 60,
            retry_max_attempts: 10,

            // Journal maintenance
            checkpoint_every_events: 1000,
        }
    }
}
