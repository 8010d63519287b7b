//! Recovery tests: logs are crafted entry by entry, then an engine is
//! started over them and the rebuilt store state is checked, including the
//! compatibility rules for records written by older scheduler versions.

use std::sync::Arc;
use std::time::Duration;

use perch_core::config::LogStorageConfig;
use perch_core::stores::{Stores, TaskQuery};
use perch_core::types::{
    HostAttributes, JobConfiguration, JobInstanceUpdateEvent, JobKey, JobUpdate, JobUpdateEvent,
    JobUpdateKey, JobUpdateStatus, JobUpdateSummary, Lock, LockKey, MaintenanceMode,
    ResourceAggregate, ScheduleStatus, ScheduledTask, TaskConfig,
};
use perch_storage::mem::mem_stores;
use perch_storage::testing::{ManualScheduler, RecordingEventSink};
use perch_storage::{
    codec, LogStorage, LogStream, MemLog, Op, Record, Snapshot, StoreSnapshotSource,
    StreamManager,
};

fn writer(log: &MemLog) -> StreamManager {
    StreamManager::new(Box::new(log.clone()), &LogStorageConfig::default()).unwrap()
}

fn engine_over(log: &MemLog, stores: &Stores) -> Arc<LogStorage> {
    let engine = LogStorage::new(
        LogStorageConfig { snapshot_interval: Duration::from_secs(60), ..Default::default() },
        Arc::new(log.clone()),
        Arc::new(ManualScheduler::new()),
        Arc::new(StoreSnapshotSource::new(stores.clone())),
        stores.clone(),
        Arc::new(RecordingEventSink::new()),
    );
    engine.prepare().unwrap();
    engine
}

fn start(log: &MemLog) -> (Arc<LogStorage>, Stores) {
    let stores = mem_stores();
    let engine = engine_over(log, &stores);
    engine.start(|_| Ok(())).unwrap();
    (engine, stores)
}

fn task(id: &str, status: ScheduleStatus) -> ScheduledTask {
    ScheduledTask {
        status,
        failure_count: 0,
        assigned_task: perch_core::types::AssignedTask {
            task_id: id.to_string(),
            ..Default::default()
        },
    }
}

fn job_key() -> JobKey {
    JobKey::new("role", "env", "name")
}

fn update_with_key(key: &JobUpdateKey) -> JobUpdate {
    JobUpdate {
        summary: JobUpdateSummary {
            key: Some(key.clone()),
            job_key: Some(key.job.clone()),
            update_id: Some(key.id.clone()),
            user: None,
        },
        instructions: None,
    }
}

#[test]
fn replay_applies_every_op_kind() {
    let log = MemLog::new();
    let stream = writer(&log);
    let update_key = JobUpdateKey { job: job_key(), id: "testUpdateId".to_string() };

    let removed_job = JobKey::new("role", "env", "gone");
    let transactions: Vec<Vec<Op>> = vec![
        vec![Op::SaveFrameworkId { framework_id: "bob".into() }],
        vec![Op::SaveCronJob {
            job: JobConfiguration { key: Some(job_key()), ..Default::default() },
        }],
        vec![Op::SaveCronJob {
            job: JobConfiguration { key: Some(removed_job.clone()), ..Default::default() },
        }],
        vec![Op::RemoveJob { key: removed_job.clone() }],
        vec![Op::SaveTasks {
            tasks: vec![task("id1", ScheduleStatus::Init), task("taskId1", ScheduleStatus::Init)],
        }],
        vec![Op::RewriteTask {
            task_id: "id1".into(),
            config: TaskConfig { ram_mb: 99, ..Default::default() },
        }],
        // Rewrites of unknown tasks are ignored, not fatal.
        vec![Op::RewriteTask { task_id: "missing".into(), config: TaskConfig::default() }],
        vec![Op::RemoveTasks { task_ids: ["taskId1".to_string()].into_iter().collect() }],
        vec![Op::SaveQuota {
            role: "role".into(),
            quota: ResourceAggregate::new(1.0, 128, 1024),
        }],
        vec![Op::SaveQuota { role: "other".into(), quota: ResourceAggregate::default() }],
        vec![Op::RemoveQuota { role: "other".into() }],
        // No slave id: dropped on replay.
        vec![Op::SaveHostAttributes {
            attributes: HostAttributes {
                host: "host1".into(),
                mode: MaintenanceMode::Drained,
                ..Default::default()
            },
        }],
        vec![Op::SaveHostAttributes {
            attributes: HostAttributes {
                host: "host2".into(),
                mode: MaintenanceMode::Drained,
                slave_id: Some("slave2".into()),
                ..Default::default()
            },
        }],
        vec![Op::SaveLock {
            lock: Lock {
                key: LockKey::Job(job_key()),
                token: "lock1".into(),
                user: "u".into(),
                timestamp_ms: 1,
                message: None,
            },
        }],
        vec![Op::SaveLock {
            lock: Lock {
                key: LockKey::Job(removed_job.clone()),
                token: "lock2".into(),
                user: "u".into(),
                timestamp_ms: 2,
                message: None,
            },
        }],
        vec![Op::RemoveLock { key: LockKey::Job(removed_job) }],
        vec![Op::SaveJobUpdate {
            update: update_with_key(&update_key),
            lock_token: Some("token".into()),
        }],
        vec![Op::SaveJobUpdateEvent {
            event: JobUpdateEvent { status: JobUpdateStatus::RollingForward, timestamp_ms: 5 },
            update_id: Some(update_key.id.clone()),
            key: Some(update_key.clone()),
        }],
        // Legacy form: key resolved from the bare update id.
        vec![Op::SaveJobUpdateEvent {
            event: JobUpdateEvent { status: JobUpdateStatus::RolledForward, timestamp_ms: 6 },
            update_id: Some(update_key.id.clone()),
            key: None,
        }],
        vec![Op::SaveJobInstanceUpdateEvent {
            event: JobInstanceUpdateEvent::default(),
            update_id: Some(update_key.id.clone()),
            key: None,
        }],
        // Unresolvable events are dropped silently.
        vec![Op::SaveJobUpdateEvent {
            event: JobUpdateEvent::default(),
            update_id: Some("update6".into()),
            key: None,
        }],
        vec![Op::SaveJobInstanceUpdateEvent {
            event: JobInstanceUpdateEvent::default(),
            update_id: Some("update5".into()),
            key: None,
        }],
        vec![Op::PruneJobUpdateHistory { per_job_retain: 5, threshold_ms: 10 }],
    ];
    for ops in transactions {
        stream.write_transaction(ops).unwrap();
    }
    // A noop entry must replay as a skip.
    log.append(&codec::encode(&Record::Noop).unwrap()).unwrap();

    let (_engine, stores) = start(&log);

    assert_eq!(stores.scheduler.fetch_framework_id().unwrap(), Some("bob".into()));

    let jobs = stores.cron_jobs.fetch_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].key, Some(job_key()));

    let tasks = stores.tasks.fetch_tasks(&TaskQuery::all()).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id(), "id1");
    assert_eq!(tasks[0].assigned_task.task.ram_mb, 99);

    assert_eq!(
        stores.quotas.fetch_quota("role").unwrap(),
        Some(ResourceAggregate::new(1.0, 128, 1024))
    );
    assert_eq!(stores.quotas.fetch_quota("other").unwrap(), None);

    assert_eq!(stores.attributes.get_host_attributes("host1").unwrap(), None);
    let host2 = stores.attributes.get_host_attributes("host2").unwrap().unwrap();
    assert_eq!(host2.slave_id, Some("slave2".into()));
    assert_eq!(host2.mode, MaintenanceMode::Drained);

    let locks = stores.locks.fetch_locks().unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].token, "lock1");

    assert_eq!(
        stores.job_updates.fetch_update_key("testUpdateId").unwrap(),
        Some(update_key.clone())
    );
    let events = stores.job_updates.fetch_update_events(&update_key).unwrap();
    assert_eq!(
        events.iter().map(|e| e.status).collect::<Vec<_>>(),
        vec![JobUpdateStatus::RollingForward, JobUpdateStatus::RolledForward]
    );
    assert_eq!(stores.job_updates.fetch_instance_events(&update_key).unwrap().len(), 1);
}

#[test]
fn replay_backfills_the_update_key() {
    let log = MemLog::new();
    let stream = writer(&log);

    let legacy = JobUpdate {
        summary: JobUpdateSummary {
            key: None,
            job_key: Some(job_key()),
            update_id: Some("backfilled".into()),
            user: None,
        },
        instructions: None,
    };
    stream
        .write_transaction(vec![Op::SaveJobUpdate { update: legacy, lock_token: Some("token2".into()) }])
        .unwrap();

    let (_engine, stores) = start(&log);

    let expected = JobUpdateKey { job: job_key(), id: "backfilled".to_string() };
    assert_eq!(stores.job_updates.fetch_update_key("backfilled").unwrap(), Some(expected.clone()));
    let details = stores.job_updates.fetch_all_details().unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].update.summary.key, Some(expected));
    assert_eq!(details[0].lock_token, Some("token2".into()));
}

#[test]
fn replay_snapshot_overwrites_prior_state() {
    let log = MemLog::new();
    let stream = writer(&log);

    stream
        .write_transaction(vec![
            Op::SaveFrameworkId { framework_id: "old".into() },
            Op::SaveTasks { tasks: vec![task("stale", ScheduleStatus::Running)] },
        ])
        .unwrap();
    stream
        .write_snapshot(Snapshot {
            timestamp_ms: 42,
            tasks: vec![task("fresh", ScheduleStatus::Running)],
            scheduler_metadata: Some(perch_core::types::SchedulerMetadata {
                framework_id: Some("new".into()),
                version: None,
            }),
            ..Default::default()
        })
        .unwrap();

    let (_engine, stores) = start(&log);

    assert_eq!(stores.scheduler.fetch_framework_id().unwrap(), Some("new".into()));
    let tasks = stores.tasks.fetch_tasks(&TaskQuery::all()).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id(), "fresh");
}

#[test]
fn replay_skips_unknown_record_kinds() {
    let log = MemLog::new();
    log.append(&[240, 9, 9, 9]).unwrap();
    writer(&log)
        .write_transaction(vec![Op::SaveFrameworkId { framework_id: "bob".into() }])
        .unwrap();

    let (_engine, stores) = start(&log);
    assert_eq!(stores.scheduler.fetch_framework_id().unwrap(), Some("bob".into()));
}

#[test]
fn malformed_entry_aborts_start() {
    let log = MemLog::new();
    // A transaction tag followed by an invalid payload.
    log.append(&[1, 0xc1]).unwrap();

    let stores = mem_stores();
    let engine = engine_over(&log, &stores);
    assert!(engine.start(|_| Ok(())).is_err());
}

#[test]
fn truncated_frame_sequence_aborts_start() {
    let source = MemLog::new();
    let stream = StreamManager::new(
        Box::new(source.clone()),
        &LogStorageConfig { max_entry_size: 256, ..Default::default() },
    )
    .unwrap();
    stream
        .write_transaction(vec![Op::SaveFrameworkId { framework_id: "x".repeat(2048) }])
        .unwrap();
    let entries = source.entries();
    assert!(entries.len() > 2);

    // Re-create the log without the final chunk.
    let log = MemLog::new();
    for (_, contents) in &entries[..entries.len() - 1] {
        log.append(contents).unwrap();
    }

    let stores = mem_stores();
    let engine = engine_over(&log, &stores);
    assert!(engine.start(|_| Ok(())).is_err());
}

#[test]
fn snapshot_cycle_survives_restart() {
    let log = MemLog::new();

    // First process lifetime: recover empty, write, snapshot, write more.
    {
        let (engine, _stores) = start(&log);
        engine
            .write(|provider| {
                provider.scheduler_store().save_framework_id("fw")?;
                provider
                    .task_store()
                    .save_tasks(&[task("a", ScheduleStatus::Running), task("b", ScheduleStatus::Pending)])
            })
            .unwrap();
        engine.snapshot().unwrap();
        engine
            .write(|provider| {
                provider
                    .task_store()
                    .delete_tasks(&["b".to_string()].into_iter().collect())
            })
            .unwrap();
    }

    // Second process lifetime: replay the snapshot plus the tail.
    let (_engine, stores) = start(&log);
    assert_eq!(stores.scheduler.fetch_framework_id().unwrap(), Some("fw".into()));
    let tasks = stores.tasks.fetch_tasks(&TaskQuery::all()).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id(), "a");
}

#[test]
fn file_backed_engine_recovers_after_restart() {
    use perch_core::config::FileLogConfig;
    use perch_storage::FileLog;

    let dir = tempfile::TempDir::new().unwrap();
    let file_config = FileLogConfig {
        sync_on_write: false,
        ..FileLogConfig::new(dir.path().join("scheduler.log"))
    };

    {
        let stores = mem_stores();
        let engine = LogStorage::new(
            LogStorageConfig::default(),
            Arc::new(FileLog::new(file_config.clone())),
            Arc::new(ManualScheduler::new()),
            Arc::new(StoreSnapshotSource::new(stores.clone())),
            stores.clone(),
            Arc::new(RecordingEventSink::new()),
        );
        engine.prepare().unwrap();
        engine.start(|_| Ok(())).unwrap();
        engine
            .write(|provider| {
                provider.scheduler_store().save_framework_id("durable")?;
                provider.task_store().save_tasks(&[task("t1", ScheduleStatus::Running)])
            })
            .unwrap();
        engine.snapshot().unwrap();
    }

    let stores = mem_stores();
    let engine = LogStorage::new(
        LogStorageConfig::default(),
        Arc::new(FileLog::new(file_config)),
        Arc::new(ManualScheduler::new()),
        Arc::new(StoreSnapshotSource::new(stores.clone())),
        stores.clone(),
        Arc::new(RecordingEventSink::new()),
    );
    engine.prepare().unwrap();
    engine.start(|_| Ok(())).unwrap();

    assert_eq!(stores.scheduler.fetch_framework_id().unwrap(), Some("durable".into()));
    assert_eq!(stores.tasks.fetch_tasks(&TaskQuery::all()).unwrap().len(), 1);
}

#[test]
fn empty_log_plus_initialization_equals_initialization() {
    let log = MemLog::new();
    let stores = mem_stores();
    let engine = engine_over(&log, &stores);
    engine
        .start(|provider| provider.scheduler_store().save_framework_id("init"))
        .unwrap();

    assert_eq!(stores.scheduler.fetch_framework_id().unwrap(), Some("init".into()));
    assert!(log.is_empty());

    // The same initialization against untouched stores yields the same state.
    let baseline = mem_stores();
    baseline.scheduler.save_framework_id("init").unwrap();
    assert_eq!(
        baseline.scheduler.fetch_framework_id().unwrap(),
        stores.scheduler.fetch_framework_id().unwrap()
    );
}
