//! Test doubles for exercising the engine without threads or a real log.

use std::time::Duration;

use parking_lot::Mutex;

use perch_core::config::LogStorageConfig;
use perch_core::error::Result;

use crate::events::{EventSink, PubsubEvent};
use crate::log::MemLog;
use crate::scheduling::SchedulingService;
use crate::stream::{LogRecord, StreamManager};

/// Scheduler that captures jobs for the test to run by hand.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<Vec<(Duration, Box<dyn Fn() + Send + Sync>)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn intervals(&self) -> Vec<Duration> {
        self.jobs.lock().iter().map(|(interval, _)| *interval).collect()
    }

    /// Run every scheduled job once, as a timer tick would.
    pub fn run_jobs(&self) {
        for (_, job) in self.jobs.lock().iter() {
            job();
        }
    }
}

impl SchedulingService for ManualScheduler {
    fn do_every(&self, interval: Duration, job: Box<dyn Fn() + Send + Sync>) {
        self.jobs.lock().push((interval, job));
    }
}

/// Sink that remembers every posted event.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PubsubEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PubsubEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingEventSink {
    fn post(&self, event: PubsubEvent) {
        self.events.lock().push(event);
    }
}

/// Decode every logical record currently retained in `log`.
pub fn read_log_records(log: &MemLog) -> Result<Vec<LogRecord>> {
    let manager = StreamManager::new(Box::new(log.clone()), &LogStorageConfig::default())?;
    manager.read_from_beginning()?.collect()
}
