//! # Scheduler Domain Model
//!
//! The entities the storage core persists: tasks and their configurations,
//! cron jobs, resource quotas, host attributes, locks and job updates.
//!
//! All types serialize with serde; the storage crate encodes them into log
//! records with a stable binary codec, so fields are append-only: new fields
//! must be `Option` with a serde default.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully-qualified job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub role: String,
    pub environment: String,
    pub name: String,
}

impl JobKey {
    pub fn new(
        role: impl Into<String>,
        environment: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            environment: environment.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.role, self.environment, self.name)
    }
}

/// Resources and execution settings for one task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskConfig {
    pub job: Option<JobKey>,
    pub owner: Option<String>,
    pub is_service: bool,
    pub num_cpus: f64,
    pub ram_mb: i64,
    pub disk_mb: i64,
    pub priority: i32,
    pub production: bool,
    pub contact_email: Option<String>,
}

/// A task bound (or about to be bound) to a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AssignedTask {
    pub task_id: String,
    pub slave_id: Option<String>,
    pub slave_host: Option<String>,
    pub task: TaskConfig,
    pub instance_id: i32,
}

/// Current state of a task in the scheduling lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum ScheduleStatus {
    #[default]
    Init,
    Pending,
    Assigned,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

/// A task plus its scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScheduledTask {
    pub status: ScheduleStatus,
    pub failure_count: i32,
    pub assigned_task: AssignedTask,
}

impl ScheduledTask {
    pub fn task_id(&self) -> &str {
        &self.assigned_task.task_id
    }
}

/// A cron job registered with the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobConfiguration {
    pub key: Option<JobKey>,
    pub owner: Option<String>,
    pub cron_schedule: Option<String>,
    pub task: TaskConfig,
    pub instance_count: i32,
}

/// Aggregate resource vector used for role quotas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceAggregate {
    pub num_cpus: f64,
    pub ram_mb: i64,
    pub disk_mb: i64,
}

impl ResourceAggregate {
    pub fn new(num_cpus: f64, ram_mb: i64, disk_mb: i64) -> Self {
        Self { num_cpus, ram_mb, disk_mb }
    }
}

/// Quota granted to one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfiguration {
    pub role: String,
    pub quota: ResourceAggregate,
}

/// Host maintenance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MaintenanceMode {
    #[default]
    None,
    Scheduled,
    Draining,
    Drained,
}

/// A single named attribute advertised by a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: BTreeSet<String>,
}

/// Attributes and maintenance state of one host.
///
/// `slave_id` is optional on the wire for compatibility with records written
/// before host registration carried it; replay discards entries without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HostAttributes {
    pub host: String,
    pub attributes: Vec<Attribute>,
    pub mode: MaintenanceMode,
    pub slave_id: Option<String>,
}

/// Resource a lock is held on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockKey {
    Job(JobKey),
}

/// An exclusive operation lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub key: LockKey,
    pub token: String,
    pub user: String,
    pub timestamp_ms: i64,
    pub message: Option<String>,
}

/// Identity of a job update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobUpdateKey {
    pub job: JobKey,
    pub id: String,
}

/// Current state of a job update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobUpdateStatus {
    #[default]
    RollingForward,
    RollingBack,
    RollForwardPaused,
    RollBackPaused,
    RolledForward,
    RolledBack,
    Aborted,
    Error,
    Failed,
}

/// Per-instance action taken while updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobUpdateAction {
    #[default]
    InstanceUpdating,
    InstanceUpdated,
    InstanceRollingBack,
    InstanceRolledBack,
    InstanceUpdateFailed,
    InstanceRollbackFailed,
}

/// Summary header of a job update.
///
/// `key` is the canonical identity. `job_key`/`update_id` are the legacy
/// split form retained so replay can backfill `key` on old records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobUpdateSummary {
    pub key: Option<JobUpdateKey>,
    pub job_key: Option<JobKey>,
    pub update_id: Option<String>,
    pub user: Option<String>,
}

/// Desired-state instructions for an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobUpdateInstructions {
    pub desired_instance_count: i32,
    pub desired_task: TaskConfig,
    pub update_group_size: i32,
    pub max_failed_instances: i32,
}

/// A job update: summary plus instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobUpdate {
    pub summary: JobUpdateSummary,
    pub instructions: Option<JobUpdateInstructions>,
}

impl JobUpdate {
    /// Canonical key, falling back to the legacy split form.
    pub fn key(&self) -> Option<JobUpdateKey> {
        if let Some(key) = &self.summary.key {
            return Some(key.clone());
        }
        match (&self.summary.job_key, &self.summary.update_id) {
            (Some(job), Some(id)) => Some(JobUpdateKey { job: job.clone(), id: id.clone() }),
            _ => None,
        }
    }
}

/// Job-level update state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobUpdateEvent {
    pub status: JobUpdateStatus,
    pub timestamp_ms: i64,
}

/// Instance-level update state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobInstanceUpdateEvent {
    pub instance_id: i32,
    pub timestamp_ms: i64,
    pub action: JobUpdateAction,
}

/// An update, the lock token it was created under, and its event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJobUpdateDetails {
    pub update: JobUpdate,
    pub lock_token: Option<String>,
    pub events: Vec<JobUpdateEvent>,
    pub instance_events: Vec<JobInstanceUpdateEvent>,
}

/// Singleton scheduler bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchedulerMetadata {
    pub framework_id: Option<String>,
    pub version: Option<String>,
}
