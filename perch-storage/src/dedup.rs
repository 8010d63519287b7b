//! # Snapshot Deduplication
//!
//! A cluster runs many tasks sharing a handful of task configurations, so a
//! raw snapshot repeats the same config once per task. Deduplication factors
//! the configs into a content-addressed table and leaves each task with a
//! digest reference; reduplication reverses it on read.

use std::collections::BTreeMap;

use tracing::debug;

use perch_core::digest::Digest;
use perch_core::error::{Error, Result};
use perch_core::types::TaskConfig;

use crate::codec::{DeduplicatedSnapshot, Snapshot};

fn config_digest(config: &TaskConfig) -> Result<Digest> {
    let canonical = rmp_serde::to_vec(config)
        .map_err(|e| Error::coding(format!("task config encode failed: {}", e)))?;
    Ok(Digest::of(&canonical))
}

/// Convert a snapshot into its deduplicated form.
pub fn deduplicate(snapshot: &Snapshot) -> Result<DeduplicatedSnapshot> {
    let mut task_configs: BTreeMap<Digest, TaskConfig> = BTreeMap::new();
    let mut task_config_refs: BTreeMap<String, Digest> = BTreeMap::new();

    let mut partial = snapshot.clone();
    for task in &mut partial.tasks {
        let config = std::mem::take(&mut task.assigned_task.task);
        let digest = config_digest(&config)?;
        task_config_refs.insert(task.assigned_task.task_id.clone(), digest);
        task_configs.entry(digest).or_insert(config);
    }

    debug!(
        tasks = partial.tasks.len(),
        unique_configs = task_configs.len(),
        "deduplicated snapshot"
    );
    Ok(DeduplicatedSnapshot { partial_snapshot: partial, task_configs, task_config_refs })
}

/// Restore a full snapshot from its deduplicated form.
pub fn reduplicate(dedup: &DeduplicatedSnapshot) -> Result<Snapshot> {
    let mut snapshot = dedup.partial_snapshot.clone();
    for task in &mut snapshot.tasks {
        let task_id = &task.assigned_task.task_id;
        let digest = dedup.task_config_refs.get(task_id).ok_or_else(|| Error::Dedup {
            message: format!("task {} has no config reference", task_id),
        })?;
        let config = dedup.task_configs.get(digest).ok_or_else(|| Error::Dedup {
            message: format!("task {} references missing config {}", task_id, digest),
        })?;
        task.assigned_task.task = config.clone();
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_core::types::{AssignedTask, ScheduleStatus, ScheduledTask};

    fn task(id: &str, ram_mb: i64) -> ScheduledTask {
        ScheduledTask {
            status: ScheduleStatus::Running,
            failure_count: 0,
            assigned_task: AssignedTask {
                task_id: id.to_string(),
                task: TaskConfig { ram_mb, ..Default::default() },
                ..Default::default()
            },
        }
    }

    #[test]
    fn roundtrip_restores_the_snapshot() {
        let snapshot = Snapshot {
            timestamp_ms: 42,
            tasks: vec![task("a", 64), task("b", 64), task("c", 128)],
            ..Default::default()
        };
        let dedup = deduplicate(&snapshot).unwrap();
        assert_eq!(reduplicate(&dedup).unwrap(), snapshot);
    }

    #[test]
    fn shared_configs_are_stored_once() {
        let snapshot = Snapshot {
            tasks: vec![task("a", 64), task("b", 64), task("c", 64)],
            ..Default::default()
        };
        let dedup = deduplicate(&snapshot).unwrap();
        assert_eq!(dedup.task_configs.len(), 1);
        assert_eq!(dedup.task_config_refs.len(), 3);
        for t in &dedup.partial_snapshot.tasks {
            assert_eq!(t.assigned_task.task, TaskConfig::default());
        }
    }

    #[test]
    fn empty_snapshot_roundtrips() {
        let snapshot = Snapshot::default();
        let dedup = deduplicate(&snapshot).unwrap();
        assert!(dedup.task_configs.is_empty());
        assert_eq!(reduplicate(&dedup).unwrap(), snapshot);
    }

    #[test]
    fn missing_config_is_a_dedup_error() {
        let snapshot = Snapshot { tasks: vec![task("a", 64)], ..Default::default() };
        let mut dedup = deduplicate(&snapshot).unwrap();
        dedup.task_configs.clear();
        assert!(matches!(reduplicate(&dedup), Err(Error::Dedup { .. })));
    }

    #[test]
    fn missing_reference_is_a_dedup_error() {
        let snapshot = Snapshot { tasks: vec![task("a", 64)], ..Default::default() };
        let mut dedup = deduplicate(&snapshot).unwrap();
        dedup.task_config_refs.clear();
        assert!(matches!(reduplicate(&dedup), Err(Error::Dedup { .. })));
    }
}
