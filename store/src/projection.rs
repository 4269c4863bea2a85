//! Journal → snapshot projection.
//!
//! The snapshot is nothing but the fold of the journal through the scoring
//! model. Both full rebuilds (rehydration, cache misses) and incremental
//! updates (the orchestrator applying the events it just committed) go
//! through [`apply_event`], so the two paths cannot drift apart.

use porch_types::{
    EventData, ProtocolRun, ProtocolState, SubjectClass, SubjectId, SubjectSnapshot, Timestamp,
    VerificationEvent,
};

use crate::StoreError;

/// Apply one journal event to a snapshot.
///
/// Enforces the gap-free seq invariant: the event's seq must be exactly
/// `snapshot.last_seq + 1`. Does not recompute score/level — call
/// [`finalize`] after the last event of a batch.
pub fn apply_event(
    snapshot: &mut SubjectSnapshot,
    event: &VerificationEvent,
) -> Result<(), StoreError> {
    if event.seq != snapshot.last_seq + 1 {
        return Err(StoreError::Corruption(format!(
            "journal gap for {}: snapshot at seq {}, next event seq {}",
            snapshot.subject, snapshot.last_seq, event.seq
        )));
    }

    match &event.data {
        EventData::MethodStarted {
            deadline, params, ..
        } => {
            let method = require_method(event)?;
            let run_id = event.protocol_run_id.ok_or_else(|| {
                StoreError::Corruption(format!("method_started without run id at seq {}", event.seq))
            })?;
            if snapshot.active_protocols.contains_key(&method) {
                return Err(StoreError::Corruption(format!(
                    "second active run for {method} at seq {}",
                    event.seq
                )));
            }
            snapshot.active_protocols.insert(
                method,
                ProtocolRun {
                    id: run_id,
                    method,
                    state: ProtocolState::Waiting,
                    started_at: event.at,
                    deadline: *deadline,
                    params: params.clone(),
                },
            );
        }
        EventData::MethodCompleted { completion } => {
            let method = require_method(event)?;
            snapshot
                .completions
                .entry(method)
                .or_default()
                .push(completion.clone());
            snapshot.active_protocols.remove(&method);
        }
        EventData::MethodFailed { .. } => {
            let method = require_method(event)?;
            snapshot.active_protocols.remove(&method);
        }
        EventData::MethodRevoked {
            sequence_index,
            reason,
            ..
        } => {
            let method = require_method(event)?;
            if *sequence_index > 0 {
                let completion = snapshot
                    .completions
                    .get_mut(&method)
                    .and_then(|list| {
                        list.iter_mut()
                            .find(|c| c.sequence_index == *sequence_index && c.revoked_at.is_none())
                    })
                    .ok_or_else(|| {
                        StoreError::Corruption(format!(
                            "revocation of unknown completion {method}#{sequence_index} at seq {}",
                            event.seq
                        ))
                    })?;
                completion.revoked_at = Some(event.at);
                completion.revocation_reason = Some(reason.clone());
            }
        }
        // Expiry is a time-derived fact; the event exists for audit and to
        // anchor the level recomputation that follows it.
        EventData::MethodExpired { .. } => {}
        // Score and level are always recomputed from completions, never
        // trusted from the recorded transition.
        EventData::LevelChanged { .. } => {}
        EventData::VerifierConfirmed { .. }
        | EventData::VerifierConfirmationRevoked
        | EventData::AttestationReceived { .. } => {}
        EventData::SnapshotRebuilt { snapshot: checkpoint } => {
            let mut restored = checkpoint.clone();
            restored.subject = snapshot.subject;
            restored.class = snapshot.class;
            *snapshot = restored;
        }
    }

    snapshot.last_seq = event.seq;
    snapshot.updated_at = event.at;
    Ok(())
}

/// Recompute score and level from the completions at `now`.
pub fn finalize(snapshot: &mut SubjectSnapshot, now: Timestamp) {
    snapshot.score = porch_scoring::score(&snapshot.completions, snapshot.class, now);
    snapshot.level = porch_scoring::level(snapshot.score);
}

/// Fold a full journal (events from seq 1) into a snapshot.
pub fn fold_journal(
    subject: SubjectId,
    class: SubjectClass,
    events: &[VerificationEvent],
    now: Timestamp,
) -> Result<SubjectSnapshot, StoreError> {
    let mut snapshot = SubjectSnapshot::new(subject, class);
    for event in events {
        apply_event(&mut snapshot, event)?;
    }
    finalize(&mut snapshot, now);
    Ok(snapshot)
}

fn require_method(event: &VerificationEvent) -> Result<porch_types::VerificationMethod, StoreError> {
    event.method.ok_or_else(|| {
        StoreError::Corruption(format!(
            "{:?} event without method at seq {}",
            event.kind(),
            event.seq
        ))
    })
}
