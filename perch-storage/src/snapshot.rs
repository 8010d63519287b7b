//! # Snapshot Source
//!
//! Materializes the full state of every domain store into a [`Snapshot`]
//! record and applies one back during replay.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use perch_core::error::Result;
use perch_core::stores::Stores;
use perch_core::types::{QuotaConfiguration, SchedulerMetadata};
use perch_core::TaskQuery;

use crate::codec::Snapshot;

/// Produces and consumes full-state snapshots.
pub trait SnapshotSource: Send + Sync {
    fn create_snapshot(&self) -> Result<Snapshot>;

    /// Replace all store state with the snapshot's contents. Invoked during
    /// replay, once per snapshot record encountered.
    fn apply_snapshot(&self, snapshot: Snapshot) -> Result<()>;
}

/// Snapshot source backed directly by the domain stores.
pub struct StoreSnapshotSource {
    stores: Stores,
}

impl StoreSnapshotSource {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }
}

impl SnapshotSource for StoreSnapshotSource {
    fn create_snapshot(&self) -> Result<Snapshot> {
        let stores = &self.stores;
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Ok(Snapshot {
            timestamp_ms,
            tasks: stores.tasks.fetch_tasks(&TaskQuery::all())?,
            cron_jobs: stores.cron_jobs.fetch_jobs()?,
            quota_configurations: stores
                .quotas
                .fetch_quotas()?
                .into_iter()
                .map(|(role, quota)| QuotaConfiguration { role, quota })
                .collect(),
            host_attributes: stores.attributes.get_all_host_attributes()?,
            locks: stores.locks.fetch_locks()?,
            job_updates: stores.job_updates.fetch_all_details()?,
            scheduler_metadata: Some(SchedulerMetadata {
                framework_id: stores.scheduler.fetch_framework_id()?,
                version: Some(perch_core::VERSION.to_string()),
            }),
        })
    }

    fn apply_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        info!(timestamp_ms = snapshot.timestamp_ms, "applying snapshot");
        let stores = &self.stores;

        stores.tasks.delete_all_tasks()?;
        stores.tasks.save_tasks(&snapshot.tasks)?;

        stores.cron_jobs.delete_jobs()?;
        for job in &snapshot.cron_jobs {
            stores.cron_jobs.save_accepted_job(job)?;
        }

        stores.quotas.delete_quotas()?;
        for config in &snapshot.quota_configurations {
            stores.quotas.save_quota(&config.role, &config.quota)?;
        }

        stores.attributes.delete_host_attributes()?;
        for attributes in &snapshot.host_attributes {
            stores.attributes.save_host_attributes(attributes)?;
        }

        stores.locks.delete_locks()?;
        for lock in &snapshot.locks {
            stores.locks.save_lock(lock)?;
        }

        stores.job_updates.delete_all_updates()?;
        for details in &snapshot.job_updates {
            stores
                .job_updates
                .save_job_update(&details.update, details.lock_token.as_deref())?;
            if let Some(key) = details.update.key() {
                for event in &details.events {
                    stores.job_updates.save_job_update_event(&key, event)?;
                }
                for event in &details.instance_events {
                    stores
                        .job_updates
                        .save_job_instance_update_event(&key, event)?;
                }
            }
        }

        if let Some(metadata) = &snapshot.scheduler_metadata {
            if let Some(framework_id) = &metadata.framework_id {
                stores.scheduler.save_framework_id(framework_id)?;
            }
        }
        Ok(())
    }
}
