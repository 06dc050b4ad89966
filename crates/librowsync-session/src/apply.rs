//! Staging of remote batches
//!
//! Every decision for an incoming record is made here, against the log plus
//! whatever the plan has staged so far. Nothing is written until the plan is
//! committed.

use librowsync_core::{
    ChangeRecord, CommitPlan, DeltaBatch, OriginId, PeerId, ReplicaStore, RowsyncError,
    SyncCursor,
};
use tracing::debug;

/// Stage every record of `batch` into `plan`.
///
/// `known` is the session's starting view of what both replicas hold; a local
/// row head above it was never seen by the peer and so is concurrent with the
/// incoming change.
pub fn stage_batch(
    replica: &ReplicaStore,
    known: &SyncCursor,
    plan: &mut CommitPlan,
    batch: &DeltaBatch,
) -> Result<(), RowsyncError> {
    let peer = known.peer_id;
    for record in &batch.changes {
        stage_record(replica, known, &peer, plan, record.clone())?;
    }
    Ok(())
}

/// Build a fresh plan from all batches received in a session
pub fn stage_plan(
    replica: &ReplicaStore,
    known: &SyncCursor,
    batches: &[DeltaBatch],
) -> Result<CommitPlan, RowsyncError> {
    let mut plan = CommitPlan::new(replica.generation()?, known.clone());
    for batch in batches {
        stage_batch(replica, known, &mut plan, batch)?;
    }
    Ok(plan)
}

fn stage_record(
    replica: &ReplicaStore,
    known: &SyncCursor,
    peer: &PeerId,
    plan: &mut CommitPlan,
    record: ChangeRecord,
) -> Result<(), RowsyncError> {
    record.validate()?;

    if record.logical_clock <= plan.watermark(replica.log(), &record.origin_id)? {
        plan.note_skipped(&record);
        return Ok(());
    }

    let (head, staged) = match plan.staged_row(&record.table_name, &record.row_key) {
        Some(head) => (Some(head.clone()), true),
        None => (
            replica
                .log()
                .winning_record(&record.table_name, &record.row_key)?,
            false,
        ),
    };

    let Some(head) = head else {
        plan.stage_append(record, true);
        return Ok(());
    };

    if !staged && is_concurrent(&head.origin_id, head.logical_clock, &record, peer, known) {
        let conflict = replica.resolver().resolve(&record, &head);
        let incoming_wins = conflict.winner.origin_id == record.origin_id
            && conflict.winner.logical_clock == record.logical_clock;
        debug!(
            table = %record.table_name,
            row = %record.row_key,
            reason = conflict.resolution_reason.as_str(),
            incoming_wins,
            "conflict resolved"
        );
        plan.stage_conflict(conflict);
        if incoming_wins {
            plan.stage_append(record, true);
        } else {
            plan.stage_observed(record.origin_id, record.logical_clock);
        }
        return Ok(());
    }

    let takes_row = replica.resolver().prevails(&record.version(), &head.version());
    plan.stage_append(record, takes_row);
    Ok(())
}

/// A local head conflicts with an incoming record when it comes from a third
/// origin the peer had not seen when the session started
fn is_concurrent(
    head_origin: &OriginId,
    head_clock: u64,
    record: &ChangeRecord,
    peer: &PeerId,
    known: &SyncCursor,
) -> bool {
    *head_origin != record.origin_id
        && head_origin != peer
        && head_clock > known.clock_for(head_origin)
}
