//! # Stream Manager
//!
//! Drives the log stream: reads it forward reassembling frames and
//! unwrapping compressed and deduplicated entries, appends transactions and
//! snapshots, and truncates the prefix behind a snapshot.
//!
//! ```text
//! read path:   Entry* ──► RecordReader ──► inflate ──► reduplicate ──► LogRecord
//! write path:  ops/snapshot ──► Record ──► (deflate) ──► EntrySerializer ──► append*
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use perch_core::config::LogStorageConfig;
use perch_core::error::{Error, Result};

use crate::codec::{self, Decoded, Deflated, Op, Record, RecordKind, Snapshot, Transaction};
use crate::compress;
use crate::dedup;
use crate::framing::{EntrySerializer, RecordReader};
use crate::log::{Log, LogStream, Position};

/// A logical record as seen by replay. Frames, deflated wrappers and
/// deduplicated snapshots never escape the stream manager.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Transaction(Transaction),
    Snapshot(Snapshot),
    Noop,
}

impl LogRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            LogRecord::Transaction(_) => RecordKind::Transaction,
            LogRecord::Snapshot(_) => RecordKind::Snapshot,
            LogRecord::Noop => RecordKind::Noop,
        }
    }
}

/// Reduce a decoded physical record to its logical form, unwrapping nested
/// envelopes. `None` means the record is unknown to this binary and skipped.
fn unwrap_record(mut record: Record) -> Result<Option<LogRecord>> {
    loop {
        record = match record {
            Record::Deflated(Deflated { algorithm, data }) => {
                let inflated = compress::decompress(&data, algorithm)?;
                match codec::decode(&inflated)? {
                    Decoded::Record(inner) => inner,
                    Decoded::Unknown(tag) => {
                        debug!(tag, "dropping deflated record of unknown kind");
                        return Ok(None);
                    }
                }
            }
            Record::DeduplicatedSnapshot(dedup_snapshot) => {
                Record::Snapshot(dedup::reduplicate(&dedup_snapshot)?)
            }
            Record::Frame(_) => {
                return Err(Error::framing("frame record escaped reassembly"));
            }
            Record::Transaction(txn) => return Ok(Some(LogRecord::Transaction(txn))),
            Record::Snapshot(snapshot) => return Ok(Some(LogRecord::Snapshot(snapshot))),
            Record::Noop => return Ok(Some(LogRecord::Noop)),
        };
    }
}

/// Iterator over the logical records of a stream.
pub struct RecordStream {
    reader: RecordReader<Box<dyn Iterator<Item = Result<Bytes>> + Send>>,
}

impl Iterator for RecordStream {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next()? {
                Ok(Decoded::Unknown(tag)) => {
                    debug!(tag, "dropping record of unknown kind");
                }
                Ok(Decoded::Record(record)) => match unwrap_record(record) {
                    Ok(Some(logical)) => return Some(Ok(logical)),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Serializer policy plus the open stream.
pub struct StreamManager {
    stream: Box<dyn LogStream>,
    serializer: EntrySerializer,
    deflate_snapshots: bool,
    deduplicate_snapshots: bool,
    compression: perch_core::config::CompressionKind,
}

impl StreamManager {
    pub fn new(stream: Box<dyn LogStream>, config: &LogStorageConfig) -> Result<Self> {
        Ok(Self {
            stream,
            serializer: EntrySerializer::new(config.max_entry_size)?,
            deflate_snapshots: config.deflate_snapshots,
            deduplicate_snapshots: config.deduplicate_snapshots,
            compression: config.compression,
        })
    }

    /// Stream every logical record from the beginning of the log.
    pub fn read_from_beginning(&self) -> Result<RecordStream> {
        let entries = self.stream.read_all()?;
        let bytes: Box<dyn Iterator<Item = Result<Bytes>> + Send> =
            Box::new(entries.map(|entry| entry.map(|e| e.0)));
        Ok(RecordStream { reader: RecordReader::new(bytes) })
    }

    /// Append one transaction carrying `ops`, stamped with the current
    /// schema version.
    pub fn write_transaction(&self, ops: Vec<Op>) -> Result<Position> {
        self.append_record(&Record::Transaction(Transaction::new(ops)))
    }

    /// Append a snapshot, deduplicating and deflating per policy. Returns
    /// the position of the snapshot's first physical entry, which is the
    /// safe truncation point.
    pub fn write_snapshot(&self, snapshot: Snapshot) -> Result<Position> {
        let mut record = if self.deduplicate_snapshots {
            Record::DeduplicatedSnapshot(dedup::deduplicate(&snapshot)?)
        } else {
            Record::Snapshot(snapshot)
        };

        if self.deflate_snapshots {
            record = self.deflate(&record)?;
        }
        let position = self.append_record(&record)?;
        info!(position = position.0, "wrote snapshot");
        Ok(position)
    }

    /// Discard everything strictly before `position`.
    pub fn truncate_before(&self, position: Position) -> Result<()> {
        self.stream.truncate_before(position)?;
        info!(before = position.0, "truncated log");
        Ok(())
    }

    fn deflate(&self, record: &Record) -> Result<Record> {
        let encoded = codec::encode(record)?;
        let compressed = compress::compress(&encoded, self.compression)?;
        debug!(
            raw = encoded.len(),
            compressed = compressed.len(),
            "deflated log entry"
        );
        Ok(Record::Deflated(Deflated {
            algorithm: compress::algorithm_tag(self.compression),
            data: Bytes::from(compressed),
        }))
    }

    fn append_record(&self, record: &Record) -> Result<Position> {
        let mut entries = self.serializer.serialize(record)?.into_iter();
        let first = entries
            .next()
            .ok_or_else(|| Error::coding("record serialized to no entries"))?;
        let position = self.stream.append(&first)?;
        for entry in entries {
            self.stream.append(&entry)?;
        }
        Ok(position)
    }
}

/// Builds a [`StreamManager`] for an opened stream; injected so serializer
/// policy stays configurable.
pub type StreamManagerFactory =
    Box<dyn Fn(Box<dyn LogStream>) -> Result<StreamManager> + Send + Sync>;

/// Opens the underlying log exactly once and hands out the stream manager.
pub struct LogManager {
    log: Arc<dyn Log>,
    factory: StreamManagerFactory,
    opened: Mutex<Option<Arc<StreamManager>>>,
}

impl LogManager {
    pub fn new(log: Arc<dyn Log>, factory: StreamManagerFactory) -> Self {
        Self { log, factory, opened: Mutex::new(None) }
    }

    /// Standard factory: serializer policy straight from configuration.
    pub fn with_config(log: Arc<dyn Log>, config: LogStorageConfig) -> Self {
        Self::new(
            log,
            Box::new(move |stream| StreamManager::new(stream, &config)),
        )
    }

    /// Open the log and build the stream manager. Idempotent; later calls
    /// return the already-open manager.
    pub fn open(&self) -> Result<Arc<StreamManager>> {
        let mut opened = self.opened.lock();
        if let Some(manager) = opened.as_ref() {
            return Ok(manager.clone());
        }
        let stream = self.log.open()?;
        let manager = Arc::new((self.factory)(stream)?);
        *opened = Some(manager.clone());
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemLog;
    use perch_core::config::CompressionKind;
    use perch_core::types::{AssignedTask, ScheduledTask, TaskConfig};

    fn manager(log: &MemLog, config: LogStorageConfig) -> StreamManager {
        StreamManager::new(Box::new(log.clone()), &config).unwrap()
    }

    fn snapshot_with_tasks() -> Snapshot {
        Snapshot {
            timestamp_ms: 42,
            tasks: vec![
                ScheduledTask {
                    assigned_task: AssignedTask {
                        task_id: "a".into(),
                        task: TaskConfig { ram_mb: 64, ..Default::default() },
                        ..Default::default()
                    },
                    ..Default::default()
                },
                ScheduledTask {
                    assigned_task: AssignedTask {
                        task_id: "b".into(),
                        task: TaskConfig { ram_mb: 64, ..Default::default() },
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn read(manager: &StreamManager) -> Vec<LogRecord> {
        manager
            .read_from_beginning()
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn transactions_roundtrip_through_the_stream() {
        let log = MemLog::new();
        let manager = manager(&log, LogStorageConfig::default());

        let ops = vec![Op::SaveFrameworkId { framework_id: "bob".into() }];
        manager.write_transaction(ops.clone()).unwrap();

        let records = read(&manager);
        assert_eq!(records, vec![LogRecord::Transaction(Transaction::new(ops))]);
    }

    #[test]
    fn snapshots_roundtrip_with_dedup_and_deflate() {
        let log = MemLog::new();
        let manager = manager(&log, LogStorageConfig::default());

        let snapshot = snapshot_with_tasks();
        manager.write_snapshot(snapshot.clone()).unwrap();

        assert_eq!(read(&manager), vec![LogRecord::Snapshot(snapshot)]);
    }

    #[test]
    fn snapshots_roundtrip_with_policies_disabled() {
        let log = MemLog::new();
        let config = LogStorageConfig {
            deflate_snapshots: false,
            deduplicate_snapshots: false,
            compression: CompressionKind::None,
            ..Default::default()
        };
        let manager = manager(&log, config);

        let snapshot = snapshot_with_tasks();
        manager.write_snapshot(snapshot.clone()).unwrap();

        assert_eq!(read(&manager), vec![LogRecord::Snapshot(snapshot)]);
    }

    #[test]
    fn oversized_records_are_framed_transparently() {
        let log = MemLog::new();
        let config = LogStorageConfig {
            max_entry_size: 96,
            deflate_snapshots: false,
            ..Default::default()
        };
        let manager = manager(&log, config);

        let snapshot = snapshot_with_tasks();
        manager.write_snapshot(snapshot.clone()).unwrap();
        assert!(log.len() > 1, "expected a framed snapshot");

        assert_eq!(read(&manager), vec![LogRecord::Snapshot(snapshot)]);
    }

    #[test]
    fn unknown_records_are_dropped() {
        let log = MemLog::new();
        let manager = manager(&log, LogStorageConfig::default());

        use crate::log::LogStream;
        log.append(&[250, 1, 2, 3]).unwrap();
        manager.write_transaction(vec![Op::RemoveQuota { role: "r".into() }]).unwrap();

        let records = read(&manager);
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], LogRecord::Transaction(_)));
    }

    #[test]
    fn truncation_drops_records_before_a_snapshot() {
        let log = MemLog::new();
        let manager = manager(&log, LogStorageConfig::default());

        manager
            .write_transaction(vec![Op::SaveFrameworkId { framework_id: "old".into() }])
            .unwrap();
        let position = manager.write_snapshot(snapshot_with_tasks()).unwrap();
        manager.truncate_before(position).unwrap();

        let records = read(&manager);
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], LogRecord::Snapshot(_)));
    }

    #[test]
    fn log_manager_opens_once() {
        let log = MemLog::new();
        let log_manager =
            LogManager::with_config(Arc::new(log), LogStorageConfig::default());
        let first = log_manager.open().unwrap();
        let second = log_manager.open().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
