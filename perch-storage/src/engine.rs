//! # Storage Engine
//!
//! The log-backed transactional engine. Mutations apply to the domain
//! stores and are recorded into the write-ahead log in the same write
//! scope; recovery replays the log to rebuild store state; a periodic job
//! snapshots state and truncates the replayed prefix.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Write Path                            │
//! │                                                              │
//! │  write(work) ──► reentrant mutex ──► store facades           │
//! │                       │                   │                  │
//! │                       │                   ├─► domain store   │
//! │                       │                   └─► op recorder    │
//! │                       ▼                                      │
//! │  outermost return ──► one Transaction ──► log append         │
//! └──────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Start Path                            │
//! │                                                              │
//! │  open log ──► replay records ──► init work ──► schedule      │
//! │                (stores only,      (not logged)   snapshots   │
//! │                 nothing logged)                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One engine-wide reentrant mutex serializes outermost write scopes and
//! snapshot writes, so the log never interleaves a partial transaction with
//! a snapshot and stores move in lockstep with the log.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{error, info};

use perch_core::config::LogStorageConfig;
use perch_core::error::{Error, Result};
use perch_core::stores::Stores;

use crate::events::EventSink;
use crate::log::{Log, Position};
use crate::provider::{MutableStoreProvider, WriteState};
use crate::recorder::TransactionRecorder;
use crate::replay;
use crate::scheduling::SchedulingService;
use crate::snapshot::SnapshotSource;
use crate::stream::{LogManager, StreamManager};

/// Log-backed storage engine fronting the domain stores.
pub struct LogStorage {
    config: LogStorageConfig,
    log_manager: LogManager,
    scheduling: Arc<dyn SchedulingService>,
    snapshot_source: Arc<dyn SnapshotSource>,
    stores: Stores,
    event_sink: Arc<dyn EventSink>,

    // Serializes outermost write scopes and snapshots; reentrant so nested
    // write calls join the outer scope.
    write_lock: ReentrantMutex<RefCell<WriteState>>,
    stream: std::sync::OnceLock<Arc<StreamManager>>,
    prepared: AtomicBool,
    recovered: AtomicBool,
    stopped: AtomicBool,
    last_snapshot: Mutex<Option<Position>>,
}

impl LogStorage {
    pub fn new(
        config: LogStorageConfig,
        log: Arc<dyn Log>,
        scheduling: Arc<dyn SchedulingService>,
        snapshot_source: Arc<dyn SnapshotSource>,
        stores: Stores,
        event_sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let log_manager = LogManager::with_config(log, config.clone());
        Arc::new(Self {
            config,
            log_manager,
            scheduling,
            snapshot_source,
            stores,
            event_sink,
            write_lock: ReentrantMutex::new(RefCell::new(WriteState { recorder: None })),
            stream: std::sync::OnceLock::new(),
            prepared: AtomicBool::new(false),
            recovered: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            last_snapshot: Mutex::new(None),
        })
    }

    /// Prepare for startup. Idempotent.
    pub fn prepare(&self) -> Result<()> {
        self.prepared.store(true, Ordering::Release);
        Ok(())
    }

    /// Open the log, replay it, run `initialization` against the recovered
    /// stores, and schedule periodic snapshots.
    ///
    /// Replay and initialization run under the write mutex in one scope;
    /// neither is logged: replayed state is already in the log, and
    /// initialization must leave the log exactly as replay found it.
    pub fn start<F>(self: &Arc<Self>, initialization: F) -> Result<()>
    where
        F: FnOnce(&MutableStoreProvider<'_>) -> Result<()>,
    {
        if !self.prepared.load(Ordering::Acquire) {
            return Err(Error::Configuration {
                message: "start called before prepare".to_string(),
            });
        }
        if self.recovered.load(Ordering::Acquire) {
            return Err(Error::Configuration {
                message: "storage already started".to_string(),
            });
        }

        let stream = self.log_manager.open()?;
        let _ = self.stream.set(stream.clone());

        {
            let _guard = self.write_lock.lock();
            self.recover(&stream)?;
            let provider = MutableStoreProvider::direct(&self.stores, &*self.event_sink);
            initialization(&provider)?;
            self.recovered.store(true, Ordering::Release);
        }

        let engine = Arc::downgrade(self);
        self.scheduling.do_every(
            self.config.snapshot_interval,
            Box::new(move || {
                let Some(engine) = engine.upgrade() else { return };
                if engine.stopped.load(Ordering::Acquire) {
                    return;
                }
                if let Err(e) = engine.snapshot() {
                    error!(error = %e, "scheduled snapshot failed, retrying next tick");
                }
            }),
        );
        Ok(())
    }

    /// Run mutating work in a transaction scope.
    ///
    /// Nested calls join the outer scope; only the outermost completion
    /// appends to the log, as a single transaction carrying every op the
    /// scope recorded. A store failure aborts before anything is appended.
    /// An append failure after the stores were mutated is fatal: the stores
    /// are ahead of the log and the process must not continue as if the
    /// write were durable.
    pub fn write<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&MutableStoreProvider<'_>) -> Result<T>,
    {
        let guard = self.write_lock.lock();

        if !self.recovered.load(Ordering::Acquire) {
            // Recovery window: replay handlers and initialization work
            // mutate the stores without logging.
            let provider = MutableStoreProvider::direct(&self.stores, &*self.event_sink);
            return work(&provider);
        }

        let state: &RefCell<WriteState> = &guard;
        let outermost = {
            let mut state = state.borrow_mut();
            if state.recorder.is_none() {
                state.recorder = Some(TransactionRecorder::new());
                true
            } else {
                false
            }
        };

        let provider = MutableStoreProvider::recording(&self.stores, state, &*self.event_sink);
        let result = work(&provider);
        if !outermost {
            return result;
        }

        let recorder = state.borrow_mut().recorder.take();
        let value = result?;
        if let Some(recorder) = recorder {
            if !recorder.is_empty() {
                self.stream()?.write_transaction(recorder.into_ops())?;
            }
        }
        Ok(value)
    }

    /// Run read-only work; delegates straight through to the stores.
    pub fn read<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Stores) -> Result<T>,
    {
        work(&self.stores)
    }

    /// Write a snapshot of current state and truncate the log prefix
    /// behind it.
    pub fn snapshot(&self) -> Result<()> {
        let _guard = self.write_lock.lock();

        let snapshot = self.snapshot_source.create_snapshot()?;
        let stream = self.stream()?;
        let position = stream.write_snapshot(snapshot)?;
        *self.last_snapshot.lock() = Some(position);
        stream.truncate_before(position)?;
        Ok(())
    }

    /// Stop scheduled snapshots. Nothing is buffered, so there is nothing
    /// to flush.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        info!("storage stopped");
    }

    /// Position of the most recently written snapshot, if any. The log is
    /// never truncated past this point.
    pub fn last_snapshot_position(&self) -> Option<Position> {
        *self.last_snapshot.lock()
    }

    fn stream(&self) -> Result<&Arc<StreamManager>> {
        self.stream.get().ok_or_else(|| Error::Configuration {
            message: "storage not started".to_string(),
        })
    }

    fn recover(&self, stream: &StreamManager) -> Result<()> {
        info!("replaying log");
        let mut records = 0usize;
        for record in stream.read_from_beginning()? {
            replay::replay_record(&self.stores, &*self.snapshot_source, record?)?;
            records += 1;
        }
        info!(records, "log replay complete");
        Ok(())
    }
}
