//! # In-Memory Stores
//!
//! Reference implementations of the domain store traits, held in maps behind
//! read-write locks. These are the stores the engine fronts in tests and in
//! single-node deployments; writers are serialized by the engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use perch_core::error::{Error, Result};
use perch_core::stores::{
    AttributeStore, CronJobStore, JobUpdateStore, LockStore, QuotaStore, SchedulerStore, Stores,
    TaskQuery, TaskStore,
};
use perch_core::types::{
    HostAttributes, JobConfiguration, JobInstanceUpdateEvent, JobKey, JobUpdate, JobUpdateEvent,
    JobUpdateKey, Lock, LockKey, ResourceAggregate, ScheduledTask, StoredJobUpdateDetails,
    TaskConfig,
};

/// Build a [`Stores`] bundle of fresh in-memory stores.
pub fn mem_stores() -> Stores {
    Stores {
        scheduler: Arc::new(MemSchedulerStore::default()),
        cron_jobs: Arc::new(MemCronJobStore::default()),
        tasks: Arc::new(MemTaskStore::default()),
        quotas: Arc::new(MemQuotaStore::default()),
        attributes: Arc::new(MemAttributeStore::default()),
        locks: Arc::new(MemLockStore::default()),
        job_updates: Arc::new(MemJobUpdateStore::default()),
    }
}

#[derive(Default)]
pub struct MemSchedulerStore {
    framework_id: RwLock<Option<String>>,
}

impl SchedulerStore for MemSchedulerStore {
    fn save_framework_id(&self, framework_id: &str) -> Result<()> {
        *self.framework_id.write() = Some(framework_id.to_string());
        Ok(())
    }

    fn fetch_framework_id(&self) -> Result<Option<String>> {
        Ok(self.framework_id.read().clone())
    }
}

#[derive(Default)]
pub struct MemCronJobStore {
    jobs: RwLock<BTreeMap<JobKey, JobConfiguration>>,
}

impl CronJobStore for MemCronJobStore {
    fn save_accepted_job(&self, job: &JobConfiguration) -> Result<()> {
        let key = job
            .key
            .clone()
            .ok_or_else(|| Error::store("cron job has no key"))?;
        self.jobs.write().insert(key, job.clone());
        Ok(())
    }

    fn remove_job(&self, key: &JobKey) -> Result<()> {
        self.jobs.write().remove(key);
        Ok(())
    }

    fn delete_jobs(&self) -> Result<()> {
        self.jobs.write().clear();
        Ok(())
    }

    fn fetch_job(&self, key: &JobKey) -> Result<Option<JobConfiguration>> {
        Ok(self.jobs.read().get(key).cloned())
    }

    fn fetch_jobs(&self) -> Result<Vec<JobConfiguration>> {
        Ok(self.jobs.read().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemTaskStore {
    tasks: RwLock<BTreeMap<String, ScheduledTask>>,
}

impl TaskStore for MemTaskStore {
    fn save_tasks(&self, tasks: &[ScheduledTask]) -> Result<()> {
        let mut stored = self.tasks.write();
        for task in tasks {
            stored.insert(task.task_id().to_string(), task.clone());
        }
        Ok(())
    }

    fn mutate_tasks(
        &self,
        query: &TaskQuery,
        mutator: &mut dyn FnMut(ScheduledTask) -> ScheduledTask,
    ) -> Result<Vec<ScheduledTask>> {
        let mut stored = self.tasks.write();
        let ids: Vec<String> = stored
            .values()
            .filter(|t| query.matches(t))
            .map(|t| t.task_id().to_string())
            .collect();

        let mut mutated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = stored.remove(&id) {
                let task = mutator(task);
                stored.insert(task.task_id().to_string(), task.clone());
                mutated.push(task);
            }
        }
        Ok(mutated)
    }

    fn unsafe_modify_in_place(&self, task_id: &str, config: &TaskConfig) -> Result<bool> {
        let mut stored = self.tasks.write();
        match stored.get_mut(task_id) {
            Some(task) => {
                task.assigned_task.task = config.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_tasks(&self, ids: &BTreeSet<String>) -> Result<()> {
        let mut stored = self.tasks.write();
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    fn delete_all_tasks(&self) -> Result<()> {
        self.tasks.write().clear();
        Ok(())
    }

    fn fetch_tasks(&self, query: &TaskQuery) -> Result<Vec<ScheduledTask>> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemQuotaStore {
    quotas: RwLock<BTreeMap<String, ResourceAggregate>>,
}

impl QuotaStore for MemQuotaStore {
    fn save_quota(&self, role: &str, quota: &ResourceAggregate) -> Result<()> {
        self.quotas.write().insert(role.to_string(), quota.clone());
        Ok(())
    }

    fn remove_quota(&self, role: &str) -> Result<()> {
        self.quotas.write().remove(role);
        Ok(())
    }

    fn delete_quotas(&self) -> Result<()> {
        self.quotas.write().clear();
        Ok(())
    }

    fn fetch_quota(&self, role: &str) -> Result<Option<ResourceAggregate>> {
        Ok(self.quotas.read().get(role).cloned())
    }

    fn fetch_quotas(&self) -> Result<Vec<(String, ResourceAggregate)>> {
        Ok(self
            .quotas
            .read()
            .iter()
            .map(|(role, quota)| (role.clone(), quota.clone()))
            .collect())
    }
}

#[derive(Default)]
pub struct MemAttributeStore {
    attributes: RwLock<BTreeMap<String, HostAttributes>>,
}

impl AttributeStore for MemAttributeStore {
    fn save_host_attributes(&self, attributes: &HostAttributes) -> Result<bool> {
        let mut stored = self.attributes.write();
        if stored.get(&attributes.host) == Some(attributes) {
            return Ok(false);
        }
        stored.insert(attributes.host.clone(), attributes.clone());
        Ok(true)
    }

    fn delete_host_attributes(&self) -> Result<()> {
        self.attributes.write().clear();
        Ok(())
    }

    fn get_host_attributes(&self, host: &str) -> Result<Option<HostAttributes>> {
        Ok(self.attributes.read().get(host).cloned())
    }

    fn get_all_host_attributes(&self) -> Result<Vec<HostAttributes>> {
        Ok(self.attributes.read().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemLockStore {
    locks: RwLock<BTreeMap<LockKey, Lock>>,
}

impl LockStore for MemLockStore {
    fn save_lock(&self, lock: &Lock) -> Result<()> {
        self.locks.write().insert(lock.key.clone(), lock.clone());
        Ok(())
    }

    fn remove_lock(&self, key: &LockKey) -> Result<()> {
        self.locks.write().remove(key);
        Ok(())
    }

    fn delete_locks(&self) -> Result<()> {
        self.locks.write().clear();
        Ok(())
    }

    fn fetch_locks(&self) -> Result<Vec<Lock>> {
        Ok(self.locks.read().values().cloned().collect())
    }
}

struct UpdateHistory {
    update: JobUpdate,
    lock_token: Option<String>,
    events: Vec<JobUpdateEvent>,
    instance_events: Vec<JobInstanceUpdateEvent>,
}

#[derive(Default)]
pub struct MemJobUpdateStore {
    // Insertion-ordered; pruning retains the most recently saved updates.
    updates: RwLock<Vec<(JobUpdateKey, UpdateHistory)>>,
}

impl MemJobUpdateStore {
    fn with_update<T>(
        &self,
        key: &JobUpdateKey,
        apply: impl FnOnce(&mut UpdateHistory) -> T,
    ) -> Result<T> {
        let mut updates = self.updates.write();
        let entry = updates
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, history)| history)
            .ok_or_else(|| Error::store(format!("unknown job update {}/{}", key.job, key.id)))?;
        Ok(apply(entry))
    }
}

impl JobUpdateStore for MemJobUpdateStore {
    fn save_job_update(&self, update: &JobUpdate, lock_token: Option<&str>) -> Result<()> {
        let key = update
            .key()
            .ok_or_else(|| Error::store("job update has no key"))?;
        let mut updates = self.updates.write();
        updates.retain(|(k, _)| *k != key);
        updates.push((
            key,
            UpdateHistory {
                update: update.clone(),
                lock_token: lock_token.map(str::to_string),
                events: Vec::new(),
                instance_events: Vec::new(),
            },
        ));
        Ok(())
    }

    fn save_job_update_event(&self, key: &JobUpdateKey, event: &JobUpdateEvent) -> Result<()> {
        self.with_update(key, |history| history.events.push(event.clone()))
    }

    fn save_job_instance_update_event(
        &self,
        key: &JobUpdateKey,
        event: &JobInstanceUpdateEvent,
    ) -> Result<()> {
        self.with_update(key, |history| history.instance_events.push(event.clone()))
    }

    fn fetch_update_key(&self, update_id: &str) -> Result<Option<JobUpdateKey>> {
        Ok(self
            .updates
            .read()
            .iter()
            .find(|(key, _)| key.id == update_id)
            .map(|(key, _)| key.clone()))
    }

    fn prune_history(&self, per_job_retain: i32, threshold_ms: i64) -> Result<Vec<JobUpdateKey>> {
        let retain = per_job_retain.max(0) as usize;
        let mut updates = self.updates.write();

        let mut per_job_seen: BTreeMap<JobKey, usize> = BTreeMap::new();
        let mut pruned = Vec::new();
        // Walk newest-first so the retain count protects recent updates.
        let mut kept = Vec::with_capacity(updates.len());
        for (key, history) in updates.drain(..).rev() {
            let seen = per_job_seen.entry(key.job.clone()).or_insert(0);
            let newest_event = history
                .events
                .iter()
                .map(|e| e.timestamp_ms)
                .max()
                .unwrap_or(0);
            if *seen >= retain && newest_event < threshold_ms {
                pruned.push(key);
            } else {
                *seen += 1;
                kept.push((key, history));
            }
        }
        kept.reverse();
        *updates = kept;
        Ok(pruned)
    }

    fn fetch_update_events(&self, key: &JobUpdateKey) -> Result<Vec<JobUpdateEvent>> {
        Ok(self
            .updates
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, history)| history.events.clone())
            .unwrap_or_default())
    }

    fn fetch_instance_events(&self, key: &JobUpdateKey) -> Result<Vec<JobInstanceUpdateEvent>> {
        Ok(self
            .updates
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, history)| history.instance_events.clone())
            .unwrap_or_default())
    }

    fn delete_all_updates(&self) -> Result<()> {
        self.updates.write().clear();
        Ok(())
    }

    fn fetch_all_details(&self) -> Result<Vec<StoredJobUpdateDetails>> {
        Ok(self
            .updates
            .read()
            .iter()
            .map(|(_, history)| StoredJobUpdateDetails {
                update: history.update.clone(),
                lock_token: history.lock_token.clone(),
                events: history.events.clone(),
                instance_events: history.instance_events.clone(),
            })
            .collect())
    }
}
