//! Periodic job execution for the snapshot cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Executor of recurring background jobs. The engine only schedules; the
/// executor's lifecycle belongs to the embedder.
pub trait SchedulingService: Send + Sync {
    fn do_every(&self, interval: Duration, job: Box<dyn Fn() + Send + Sync>);
}

/// Thread-per-job scheduler for standalone deployments.
pub struct ThreadScheduler {
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Signal every job thread to exit and wait for them.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingService for ThreadScheduler {
    fn do_every(&self, interval: Duration, job: Box<dyn Fn() + Send + Sync>) {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::spawn(move || {
            debug!(?interval, "periodic job started");
            loop {
                // Sleep in slices so stop() stays responsive.
                let deadline = Instant::now() + interval;
                while Instant::now() < deadline {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    thread::sleep(remaining.min(Duration::from_millis(50)));
                }
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                job();
            }
        });
        self.handles.lock().push(handle);
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
