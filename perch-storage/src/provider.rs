//! # Write-Behind Store Provider
//!
//! The store surface handed to `write` work. Every facade forwards the
//! mutation to the underlying store and records the matching op in the
//! current transaction; mutations that report "no change" record nothing.
//!
//! During the recovery window the provider runs in direct mode: mutations
//! apply but nothing is recorded or published, since replayed and
//! initialization state is already (or never) in the log.

use std::cell::RefCell;
use std::collections::BTreeSet;

use perch_core::error::Result;
use perch_core::stores::{Stores, TaskQuery};
use perch_core::types::{
    HostAttributes, JobConfiguration, JobInstanceUpdateEvent, JobKey, JobUpdate, JobUpdateEvent,
    JobUpdateKey, Lock, LockKey, ResourceAggregate, ScheduledTask, StoredJobUpdateDetails,
    TaskConfig,
};

use crate::codec::Op;
use crate::events::{EventSink, PubsubEvent};
use crate::recorder::TransactionRecorder;

/// Per-write-scope state guarded by the engine's reentrant mutex.
pub(crate) struct WriteState {
    pub(crate) recorder: Option<TransactionRecorder>,
}

/// Access to every domain store inside a write scope.
pub struct MutableStoreProvider<'a> {
    stores: &'a Stores,
    state: Option<&'a RefCell<WriteState>>,
    sink: &'a dyn EventSink,
}

impl<'a> MutableStoreProvider<'a> {
    pub(crate) fn recording(
        stores: &'a Stores,
        state: &'a RefCell<WriteState>,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self { stores, state: Some(state), sink }
    }

    pub(crate) fn direct(stores: &'a Stores, sink: &'a dyn EventSink) -> Self {
        Self { stores, state: None, sink }
    }

    fn record(&self, op: Op) {
        if let Some(state) = self.state {
            if let Some(recorder) = state.borrow_mut().recorder.as_mut() {
                recorder.add(op);
            }
        }
    }

    fn logged(&self) -> bool {
        self.state.is_some()
    }

    pub fn scheduler_store(&self) -> SchedulerStoreFacade<'_> {
        SchedulerStoreFacade { provider: self }
    }

    pub fn cron_job_store(&self) -> CronJobStoreFacade<'_> {
        CronJobStoreFacade { provider: self }
    }

    pub fn task_store(&self) -> TaskStoreFacade<'_> {
        TaskStoreFacade { provider: self }
    }

    pub fn quota_store(&self) -> QuotaStoreFacade<'_> {
        QuotaStoreFacade { provider: self }
    }

    pub fn attribute_store(&self) -> AttributeStoreFacade<'_> {
        AttributeStoreFacade { provider: self }
    }

    pub fn lock_store(&self) -> LockStoreFacade<'_> {
        LockStoreFacade { provider: self }
    }

    pub fn job_update_store(&self) -> JobUpdateStoreFacade<'_> {
        JobUpdateStoreFacade { provider: self }
    }
}

pub struct SchedulerStoreFacade<'a> {
    provider: &'a MutableStoreProvider<'a>,
}

impl SchedulerStoreFacade<'_> {
    pub fn save_framework_id(&self, framework_id: &str) -> Result<()> {
        self.provider.stores.scheduler.save_framework_id(framework_id)?;
        self.provider
            .record(Op::SaveFrameworkId { framework_id: framework_id.to_string() });
        Ok(())
    }

    pub fn fetch_framework_id(&self) -> Result<Option<String>> {
        self.provider.stores.scheduler.fetch_framework_id()
    }
}

pub struct CronJobStoreFacade<'a> {
    provider: &'a MutableStoreProvider<'a>,
}

impl CronJobStoreFacade<'_> {
    pub fn save_accepted_job(&self, job: &JobConfiguration) -> Result<()> {
        self.provider.stores.cron_jobs.save_accepted_job(job)?;
        self.provider.record(Op::SaveCronJob { job: job.clone() });
        Ok(())
    }

    pub fn remove_job(&self, key: &JobKey) -> Result<()> {
        self.provider.stores.cron_jobs.remove_job(key)?;
        self.provider.record(Op::RemoveJob { key: key.clone() });
        Ok(())
    }

    pub fn fetch_job(&self, key: &JobKey) -> Result<Option<JobConfiguration>> {
        self.provider.stores.cron_jobs.fetch_job(key)
    }

    pub fn fetch_jobs(&self) -> Result<Vec<JobConfiguration>> {
        self.provider.stores.cron_jobs.fetch_jobs()
    }
}

pub struct TaskStoreFacade<'a> {
    provider: &'a MutableStoreProvider<'a>,
}

impl TaskStoreFacade<'_> {
    pub fn save_tasks(&self, tasks: &[ScheduledTask]) -> Result<()> {
        self.provider.stores.tasks.save_tasks(tasks)?;
        if !tasks.is_empty() {
            self.provider.record(Op::SaveTasks { tasks: tasks.to_vec() });
        }
        Ok(())
    }

    pub fn mutate_tasks(
        &self,
        query: &TaskQuery,
        mutator: &mut dyn FnMut(ScheduledTask) -> ScheduledTask,
    ) -> Result<Vec<ScheduledTask>> {
        let mutated = self.provider.stores.tasks.mutate_tasks(query, mutator)?;
        if !mutated.is_empty() {
            self.provider.record(Op::SaveTasks { tasks: mutated.clone() });
        }
        Ok(mutated)
    }

    pub fn unsafe_modify_in_place(&self, task_id: &str, config: &TaskConfig) -> Result<bool> {
        let changed = self
            .provider
            .stores
            .tasks
            .unsafe_modify_in_place(task_id, config)?;
        if changed {
            self.provider.record(Op::RewriteTask {
                task_id: task_id.to_string(),
                config: config.clone(),
            });
        }
        Ok(changed)
    }

    pub fn delete_tasks(&self, ids: &BTreeSet<String>) -> Result<()> {
        self.provider.stores.tasks.delete_tasks(ids)?;
        if !ids.is_empty() {
            self.provider.record(Op::RemoveTasks { task_ids: ids.clone() });
        }
        Ok(())
    }

    pub fn delete_all_tasks(&self) -> Result<()> {
        let ids: BTreeSet<String> = self
            .provider
            .stores
            .tasks
            .fetch_tasks(&TaskQuery::all())?
            .into_iter()
            .map(|t| t.assigned_task.task_id)
            .collect();
        self.provider.stores.tasks.delete_all_tasks()?;
        if !ids.is_empty() {
            self.provider.record(Op::RemoveTasks { task_ids: ids });
        }
        Ok(())
    }

    pub fn fetch_tasks(&self, query: &TaskQuery) -> Result<Vec<ScheduledTask>> {
        self.provider.stores.tasks.fetch_tasks(query)
    }
}

pub struct QuotaStoreFacade<'a> {
    provider: &'a MutableStoreProvider<'a>,
}

impl QuotaStoreFacade<'_> {
    pub fn save_quota(&self, role: &str, quota: &ResourceAggregate) -> Result<()> {
        self.provider.stores.quotas.save_quota(role, quota)?;
        self.provider.record(Op::SaveQuota { role: role.to_string(), quota: quota.clone() });
        Ok(())
    }

    pub fn remove_quota(&self, role: &str) -> Result<()> {
        self.provider.stores.quotas.remove_quota(role)?;
        self.provider.record(Op::RemoveQuota { role: role.to_string() });
        Ok(())
    }

    pub fn fetch_quota(&self, role: &str) -> Result<Option<ResourceAggregate>> {
        self.provider.stores.quotas.fetch_quota(role)
    }
}

pub struct AttributeStoreFacade<'a> {
    provider: &'a MutableStoreProvider<'a>,
}

impl AttributeStoreFacade<'_> {
    /// Returns whether the attributes changed. Only a changed save is
    /// logged and published.
    pub fn save_host_attributes(&self, attributes: &HostAttributes) -> Result<bool> {
        let changed = self
            .provider
            .stores
            .attributes
            .save_host_attributes(attributes)?;
        if changed && self.provider.logged() {
            self.provider
                .record(Op::SaveHostAttributes { attributes: attributes.clone() });
            self.provider
                .sink
                .post(PubsubEvent::HostAttributesChanged(attributes.clone()));
        }
        Ok(changed)
    }

    pub fn get_host_attributes(&self, host: &str) -> Result<Option<HostAttributes>> {
        self.provider.stores.attributes.get_host_attributes(host)
    }

    pub fn get_all_host_attributes(&self) -> Result<Vec<HostAttributes>> {
        self.provider.stores.attributes.get_all_host_attributes()
    }
}

pub struct LockStoreFacade<'a> {
    provider: &'a MutableStoreProvider<'a>,
}

impl LockStoreFacade<'_> {
    pub fn save_lock(&self, lock: &Lock) -> Result<()> {
        self.provider.stores.locks.save_lock(lock)?;
        self.provider.record(Op::SaveLock { lock: lock.clone() });
        Ok(())
    }

    pub fn remove_lock(&self, key: &LockKey) -> Result<()> {
        self.provider.stores.locks.remove_lock(key)?;
        self.provider.record(Op::RemoveLock { key: key.clone() });
        Ok(())
    }

    pub fn fetch_locks(&self) -> Result<Vec<Lock>> {
        self.provider.stores.locks.fetch_locks()
    }
}

pub struct JobUpdateStoreFacade<'a> {
    provider: &'a MutableStoreProvider<'a>,
}

impl JobUpdateStoreFacade<'_> {
    pub fn save_job_update(&self, update: &JobUpdate, lock_token: Option<&str>) -> Result<()> {
        self.provider
            .stores
            .job_updates
            .save_job_update(update, lock_token)?;
        self.provider.record(Op::SaveJobUpdate {
            update: update.clone(),
            lock_token: lock_token.map(str::to_string),
        });
        Ok(())
    }

    pub fn save_job_update_event(
        &self,
        key: &JobUpdateKey,
        event: &JobUpdateEvent,
    ) -> Result<()> {
        self.provider
            .stores
            .job_updates
            .save_job_update_event(key, event)?;
        self.provider.record(Op::SaveJobUpdateEvent {
            event: event.clone(),
            update_id: Some(key.id.clone()),
            key: Some(key.clone()),
        });
        Ok(())
    }

    pub fn save_job_instance_update_event(
        &self,
        key: &JobUpdateKey,
        event: &JobInstanceUpdateEvent,
    ) -> Result<()> {
        self.provider
            .stores
            .job_updates
            .save_job_instance_update_event(key, event)?;
        self.provider.record(Op::SaveJobInstanceUpdateEvent {
            event: event.clone(),
            update_id: Some(key.id.clone()),
            key: Some(key.clone()),
        });
        Ok(())
    }

    pub fn prune_history(
        &self,
        per_job_retain: i32,
        threshold_ms: i64,
    ) -> Result<Vec<JobUpdateKey>> {
        let pruned = self
            .provider
            .stores
            .job_updates
            .prune_history(per_job_retain, threshold_ms)?;
        self.provider
            .record(Op::PruneJobUpdateHistory { per_job_retain, threshold_ms });
        Ok(pruned)
    }

    pub fn fetch_update_key(&self, update_id: &str) -> Result<Option<JobUpdateKey>> {
        self.provider.stores.job_updates.fetch_update_key(update_id)
    }

    pub fn fetch_all_details(&self) -> Result<Vec<StoredJobUpdateDetails>> {
        self.provider.stores.job_updates.fetch_all_details()
    }
}
