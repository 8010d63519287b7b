//! # Perch Storage
//!
//! Log-backed transactional storage engine for the perch scheduler.
//!
//! Every mutation applies to the domain stores and is appended to a durable
//! write-ahead log as part of the same write scope; process start replays
//! the log to rebuild state, and a periodic job snapshots state into the
//! log and truncates the prefix behind it.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Write                               │
//! │                                                              │
//! │  write(work) ──► store facades ──► domain stores             │
//! │                       │                                      │
//! │                       └─► op buffer ──► Transaction record   │
//! │                                              │               │
//! │                                              ▼               │
//! │                          frames / deflate ──► log append     │
//! └──────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Start                               │
//! │                                                              │
//! │  log entries ──► reassemble ──► inflate ──► reduplicate      │
//! │        │                                                     │
//! │        └──► replay dispatch ──► domain stores                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
mod compress;
pub mod dedup;
pub mod engine;
pub mod events;
pub mod framing;
pub mod log;
pub mod mem;
pub mod provider;
pub mod recorder;
pub mod replay;
pub mod scheduling;
pub mod snapshot;
pub mod stream;
pub mod testing;

pub use codec::{Op, OpKind, Record, RecordKind, Snapshot, Transaction, CURRENT_SCHEMA_VERSION};
pub use engine::LogStorage;
pub use events::{ChannelEventSink, EventSink, NullEventSink, PubsubEvent};
pub use log::{Entry, FileLog, Log, LogStream, MemLog, Position};
pub use provider::MutableStoreProvider;
pub use scheduling::{SchedulingService, ThreadScheduler};
pub use snapshot::{SnapshotSource, StoreSnapshotSource};
pub use stream::{LogManager, LogRecord, StreamManager};
