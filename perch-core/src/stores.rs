//! # Store Interfaces
//!
//! The domain store traits the storage engine writes through. The engine
//! owns none of their semantics; it forwards mutations and records them in
//! the log. Every implementation must be safe for concurrent readers; the
//! engine serializes writers externally.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{
    HostAttributes, JobConfiguration, JobInstanceUpdateEvent, JobKey, JobUpdate, JobUpdateEvent,
    JobUpdateKey, Lock, LockKey, ResourceAggregate, ScheduleStatus, ScheduledTask,
    StoredJobUpdateDetails, TaskConfig,
};

/// Selection predicate for task fetches and mutations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub task_ids: Option<BTreeSet<String>>,
    pub statuses: Option<BTreeSet<ScheduleStatus>>,
}

impl TaskQuery {
    /// All tasks.
    pub fn all() -> Self {
        Self::default()
    }

    /// Tasks with any of the given ids.
    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task_ids: Some(ids.into_iter().map(Into::into).collect()),
            statuses: None,
        }
    }

    /// Tasks in any of the given statuses.
    pub fn by_statuses<I: IntoIterator<Item = ScheduleStatus>>(statuses: I) -> Self {
        Self {
            task_ids: None,
            statuses: Some(statuses.into_iter().collect()),
        }
    }

    pub fn matches(&self, task: &ScheduledTask) -> bool {
        if let Some(ids) = &self.task_ids {
            if !ids.contains(task.task_id()) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        true
    }
}

/// Singleton scheduler state (framework registration).
pub trait SchedulerStore: Send + Sync {
    fn save_framework_id(&self, framework_id: &str) -> Result<()>;
    fn fetch_framework_id(&self) -> Result<Option<String>>;
}

/// Registered cron jobs.
pub trait CronJobStore: Send + Sync {
    fn save_accepted_job(&self, job: &JobConfiguration) -> Result<()>;
    fn remove_job(&self, key: &JobKey) -> Result<()>;
    fn delete_jobs(&self) -> Result<()>;
    fn fetch_job(&self, key: &JobKey) -> Result<Option<JobConfiguration>>;
    fn fetch_jobs(&self) -> Result<Vec<JobConfiguration>>;
}

/// Active and terminal tasks.
pub trait TaskStore: Send + Sync {
    fn save_tasks(&self, tasks: &[ScheduledTask]) -> Result<()>;

    /// Apply `mutator` to every task matching `query`, returning the mutated
    /// tasks in stored order.
    fn mutate_tasks(
        &self,
        query: &TaskQuery,
        mutator: &mut dyn FnMut(ScheduledTask) -> ScheduledTask,
    ) -> Result<Vec<ScheduledTask>>;

    /// Swap the config of a stored task, returning false when the task does
    /// not exist. Bypasses lifecycle checks; used by task rewrites only.
    fn unsafe_modify_in_place(&self, task_id: &str, config: &TaskConfig) -> Result<bool>;

    fn delete_tasks(&self, ids: &BTreeSet<String>) -> Result<()>;
    fn delete_all_tasks(&self) -> Result<()>;
    fn fetch_tasks(&self, query: &TaskQuery) -> Result<Vec<ScheduledTask>>;
}

/// Per-role resource quotas.
pub trait QuotaStore: Send + Sync {
    fn save_quota(&self, role: &str, quota: &ResourceAggregate) -> Result<()>;
    fn remove_quota(&self, role: &str) -> Result<()>;
    fn delete_quotas(&self) -> Result<()>;
    fn fetch_quota(&self, role: &str) -> Result<Option<ResourceAggregate>>;
    fn fetch_quotas(&self) -> Result<Vec<(String, ResourceAggregate)>>;
}

/// Host attributes and maintenance state.
pub trait AttributeStore: Send + Sync {
    /// Returns false when the attributes are identical to what is already
    /// stored; such a save is a no-op.
    fn save_host_attributes(&self, attributes: &HostAttributes) -> Result<bool>;
    fn delete_host_attributes(&self) -> Result<()>;
    fn get_host_attributes(&self, host: &str) -> Result<Option<HostAttributes>>;
    fn get_all_host_attributes(&self) -> Result<Vec<HostAttributes>>;
}

/// Operation locks.
pub trait LockStore: Send + Sync {
    fn save_lock(&self, lock: &Lock) -> Result<()>;
    fn remove_lock(&self, key: &LockKey) -> Result<()>;
    fn delete_locks(&self) -> Result<()>;
    fn fetch_locks(&self) -> Result<Vec<Lock>>;
}

/// Job updates and their event history.
pub trait JobUpdateStore: Send + Sync {
    fn save_job_update(&self, update: &JobUpdate, lock_token: Option<&str>) -> Result<()>;
    fn save_job_update_event(&self, key: &JobUpdateKey, event: &JobUpdateEvent) -> Result<()>;
    fn save_job_instance_update_event(
        &self,
        key: &JobUpdateKey,
        event: &JobInstanceUpdateEvent,
    ) -> Result<()>;

    /// Resolve a legacy update-id string to its full key, if known.
    fn fetch_update_key(&self, update_id: &str) -> Result<Option<JobUpdateKey>>;

    fn fetch_update_events(&self, key: &JobUpdateKey) -> Result<Vec<JobUpdateEvent>>;
    fn fetch_instance_events(&self, key: &JobUpdateKey) -> Result<Vec<JobInstanceUpdateEvent>>;

    /// Remove history beyond `per_job_retain` entries per job or older than
    /// `threshold_ms`, returning the pruned keys.
    fn prune_history(&self, per_job_retain: i32, threshold_ms: i64) -> Result<Vec<JobUpdateKey>>;

    fn delete_all_updates(&self) -> Result<()>;
    fn fetch_all_details(&self) -> Result<Vec<StoredJobUpdateDetails>>;
}

/// The full set of domain stores the engine fronts.
#[derive(Clone)]
pub struct Stores {
    pub scheduler: Arc<dyn SchedulerStore>,
    pub cron_jobs: Arc<dyn CronJobStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub quotas: Arc<dyn QuotaStore>,
    pub attributes: Arc<dyn AttributeStore>,
    pub locks: Arc<dyn LockStore>,
    pub job_updates: Arc<dyn JobUpdateStore>,
}
