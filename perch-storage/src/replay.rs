//! # Replay
//!
//! Re-applies log records to the domain stores during recovery. Dispatch is
//! total over the logical record kinds the stream manager yields and over
//! every op kind the wire schema defines; compatibility quirks of old
//! records (missing slave ids, legacy update ids, unkeyed update summaries)
//! are resolved here and nowhere else.

use tracing::{debug, info, warn};

use perch_core::error::{Error, Result};
use perch_core::stores::Stores;
use perch_core::types::{JobUpdate, JobUpdateKey};

use crate::codec::{Op, OpKind, RecordKind};
use crate::snapshot::SnapshotSource;
use crate::stream::LogRecord;

/// The record kinds recovery dispatches on. Frames, deflated entries and
/// deduplicated snapshots are consumed inside the stream manager and never
/// reach replay.
pub const REPLAYED_RECORD_KINDS: [RecordKind; 3] =
    [RecordKind::Transaction, RecordKind::Snapshot, RecordKind::Noop];

/// The op kinds recovery dispatches on: the full wire schema.
pub const REPLAYED_OP_KINDS: [OpKind; 15] = OpKind::ALL;

/// Apply one logical record to the stores.
pub(crate) fn replay_record(
    stores: &Stores,
    snapshot_source: &dyn SnapshotSource,
    record: LogRecord,
) -> Result<()> {
    match record {
        LogRecord::Snapshot(snapshot) => snapshot_source
            .apply_snapshot(snapshot)
            .map_err(|e| Error::replay(format!("snapshot apply failed: {}", e))),
        LogRecord::Transaction(txn) => {
            debug!(
                schema_version = txn.schema_version,
                ops = txn.ops.len(),
                "replaying transaction"
            );
            for op in txn.ops {
                let kind = op.kind();
                replay_op(stores, op)
                    .map_err(|e| Error::replay(format!("{:?} failed: {}", kind, e)))?;
            }
            Ok(())
        }
        LogRecord::Noop => Ok(()),
    }
}

fn replay_op(stores: &Stores, op: Op) -> Result<()> {
    match op {
        Op::SaveFrameworkId { framework_id } => {
            stores.scheduler.save_framework_id(&framework_id)
        }
        Op::SaveCronJob { job } => stores.cron_jobs.save_accepted_job(&job),
        Op::RemoveJob { key } => stores.cron_jobs.remove_job(&key),
        Op::SaveTasks { tasks } => stores.tasks.save_tasks(&tasks),
        Op::RewriteTask { task_id, config } => {
            // A missing task here means it was deleted later in the log.
            stores.tasks.unsafe_modify_in_place(&task_id, &config)?;
            Ok(())
        }
        Op::RemoveTasks { task_ids } => stores.tasks.delete_tasks(&task_ids),
        Op::SaveQuota { role, quota } => stores.quotas.save_quota(&role, &quota),
        Op::RemoveQuota { role } => stores.quotas.remove_quota(&role),
        Op::SaveHostAttributes { attributes } => {
            if attributes.slave_id.is_none() {
                // Upgrade path: entries written before host registration
                // carried a slave id are unusable.
                warn!(host = %attributes.host, "dropping host attributes without slave id");
                return Ok(());
            }
            stores.attributes.save_host_attributes(&attributes)?;
            Ok(())
        }
        Op::SaveLock { lock } => stores.locks.save_lock(&lock),
        Op::RemoveLock { key } => stores.locks.remove_lock(&key),
        Op::SaveJobUpdate { update, lock_token } => {
            let update = backfill_update_key(update)?;
            stores
                .job_updates
                .save_job_update(&update, lock_token.as_deref())
        }
        Op::SaveJobUpdateEvent { event, update_id, key } => {
            match resolve_update_key(stores, key, update_id.as_deref())? {
                Some(key) => stores.job_updates.save_job_update_event(&key, &event),
                None => Ok(()),
            }
        }
        Op::SaveJobInstanceUpdateEvent { event, update_id, key } => {
            match resolve_update_key(stores, key, update_id.as_deref())? {
                Some(key) => stores
                    .job_updates
                    .save_job_instance_update_event(&key, &event),
                None => Ok(()),
            }
        }
        Op::PruneJobUpdateHistory { per_job_retain, threshold_ms } => {
            stores
                .job_updates
                .prune_history(per_job_retain, threshold_ms)?;
            Ok(())
        }
    }
}

/// Synthesize `summary.key` from the legacy split form when absent.
fn backfill_update_key(mut update: JobUpdate) -> Result<JobUpdate> {
    if update.summary.key.is_none() {
        match (&update.summary.job_key, &update.summary.update_id) {
            (Some(job), Some(id)) => {
                info!(job = %job, id = %id, "backfilling job update key");
                update.summary.key = Some(JobUpdateKey { job: job.clone(), id: id.clone() });
            }
            _ => {
                return Err(Error::replay("job update record carries no usable key"));
            }
        }
    }
    Ok(update)
}

/// Resolve the update key for an event record: prefer the full key, fall
/// back to looking up the legacy id. `None` means the event predates the
/// updates the store knows and is dropped.
fn resolve_update_key(
    stores: &Stores,
    key: Option<JobUpdateKey>,
    update_id: Option<&str>,
) -> Result<Option<JobUpdateKey>> {
    if key.is_some() {
        return Ok(key);
    }
    let Some(id) = update_id else {
        debug!("dropping update event with neither key nor id");
        return Ok(None);
    };
    let resolved = stores.job_updates.fetch_update_key(id)?;
    if resolved.is_none() {
        debug!(id, "dropping update event for unknown update");
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn record_dispatch_excludes_stream_internal_kinds() {
        let replayed: BTreeSet<RecordKind> = REPLAYED_RECORD_KINDS.into_iter().collect();
        let excluded: BTreeSet<RecordKind> = RecordKind::ALL
            .into_iter()
            .filter(|kind| !replayed.contains(kind))
            .collect();
        assert_eq!(
            excluded,
            [RecordKind::Frame, RecordKind::Deflated, RecordKind::DeduplicatedSnapshot]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn op_dispatch_covers_the_whole_schema() {
        let replayed: BTreeSet<OpKind> = REPLAYED_OP_KINDS.into_iter().collect();
        let all: BTreeSet<OpKind> = OpKind::ALL.into_iter().collect();
        assert_eq!(replayed, all);
    }
}
