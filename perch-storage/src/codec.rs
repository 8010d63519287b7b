//! # Record Codec
//!
//! Binary encoding of log records. Every record is one tag byte followed by
//! a MessagePack payload. The tag space is append-only: new record kinds get
//! new tags, and a reader that encounters a tag it does not know reports
//! `Decoded::Unknown` instead of failing, so old binaries can walk logs
//! written by newer ones.
//!
//! ```text
//! ┌─────┬──────────────────────────────┐
//! │ tag │ MessagePack payload          │
//! │ u8  │ (empty for Noop)             │
//! └─────┴──────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use perch_core::digest::Digest;
use perch_core::error::{Error, Result};
use perch_core::types::{
    HostAttributes, JobConfiguration, JobInstanceUpdateEvent, JobKey, JobUpdate, JobUpdateEvent,
    JobUpdateKey, Lock, LockKey, QuotaConfiguration, ResourceAggregate, ScheduledTask,
    SchedulerMetadata, StoredJobUpdateDetails, TaskConfig,
};

/// Schema version stamped on every transaction record.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

const TAG_TRANSACTION: u8 = 1;
const TAG_SNAPSHOT: u8 = 2;
const TAG_DEDUPLICATED_SNAPSHOT: u8 = 3;
const TAG_FRAME_HEADER: u8 = 4;
const TAG_FRAME_CHUNK: u8 = 5;
const TAG_DEFLATED: u8 = 6;
const TAG_NOOP: u8 = 7;

/// One mutation recorded inside a transaction.
///
/// Variant order is wire format; append new variants at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    SaveFrameworkId {
        framework_id: String,
    },
    SaveCronJob {
        job: JobConfiguration,
    },
    RemoveJob {
        key: JobKey,
    },
    SaveTasks {
        tasks: Vec<ScheduledTask>,
    },
    RewriteTask {
        task_id: String,
        config: TaskConfig,
    },
    RemoveTasks {
        task_ids: BTreeSet<String>,
    },
    SaveQuota {
        role: String,
        quota: ResourceAggregate,
    },
    RemoveQuota {
        role: String,
    },
    SaveHostAttributes {
        attributes: HostAttributes,
    },
    SaveLock {
        lock: Lock,
    },
    RemoveLock {
        key: LockKey,
    },
    SaveJobUpdate {
        update: JobUpdate,
        lock_token: Option<String>,
    },
    SaveJobUpdateEvent {
        event: JobUpdateEvent,
        update_id: Option<String>,
        key: Option<JobUpdateKey>,
    },
    SaveJobInstanceUpdateEvent {
        event: JobInstanceUpdateEvent,
        update_id: Option<String>,
        key: Option<JobUpdateKey>,
    },
    PruneJobUpdateHistory {
        per_job_retain: i32,
        threshold_ms: i64,
    },
}

/// Discriminant of an [`Op`], used by replay dispatch and its coverage test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    SaveFrameworkId,
    SaveCronJob,
    RemoveJob,
    SaveTasks,
    RewriteTask,
    RemoveTasks,
    SaveQuota,
    RemoveQuota,
    SaveHostAttributes,
    SaveLock,
    RemoveLock,
    SaveJobUpdate,
    SaveJobUpdateEvent,
    SaveJobInstanceUpdateEvent,
    PruneJobUpdateHistory,
}

impl OpKind {
    /// Every op kind the wire schema defines.
    pub const ALL: [OpKind; 15] = [
        OpKind::SaveFrameworkId,
        OpKind::SaveCronJob,
        OpKind::RemoveJob,
        OpKind::SaveTasks,
        OpKind::RewriteTask,
        OpKind::RemoveTasks,
        OpKind::SaveQuota,
        OpKind::RemoveQuota,
        OpKind::SaveHostAttributes,
        OpKind::SaveLock,
        OpKind::RemoveLock,
        OpKind::SaveJobUpdate,
        OpKind::SaveJobUpdateEvent,
        OpKind::SaveJobInstanceUpdateEvent,
        OpKind::PruneJobUpdateHistory,
    ];
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::SaveFrameworkId { .. } => OpKind::SaveFrameworkId,
            Op::SaveCronJob { .. } => OpKind::SaveCronJob,
            Op::RemoveJob { .. } => OpKind::RemoveJob,
            Op::SaveTasks { .. } => OpKind::SaveTasks,
            Op::RewriteTask { .. } => OpKind::RewriteTask,
            Op::RemoveTasks { .. } => OpKind::RemoveTasks,
            Op::SaveQuota { .. } => OpKind::SaveQuota,
            Op::RemoveQuota { .. } => OpKind::RemoveQuota,
            Op::SaveHostAttributes { .. } => OpKind::SaveHostAttributes,
            Op::SaveLock { .. } => OpKind::SaveLock,
            Op::RemoveLock { .. } => OpKind::RemoveLock,
            Op::SaveJobUpdate { .. } => OpKind::SaveJobUpdate,
            Op::SaveJobUpdateEvent { .. } => OpKind::SaveJobUpdateEvent,
            Op::SaveJobInstanceUpdateEvent { .. } => OpKind::SaveJobInstanceUpdateEvent,
            Op::PruneJobUpdateHistory { .. } => OpKind::PruneJobUpdateHistory,
        }
    }
}

/// An ordered batch of ops from one outermost write scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub ops: Vec<Op>,
    pub schema_version: i32,
}

impl Transaction {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops, schema_version: CURRENT_SCHEMA_VERSION }
    }
}

/// Materialized state of every domain store at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub timestamp_ms: i64,
    pub tasks: Vec<ScheduledTask>,
    pub cron_jobs: Vec<JobConfiguration>,
    pub quota_configurations: Vec<QuotaConfiguration>,
    pub host_attributes: Vec<HostAttributes>,
    pub locks: Vec<Lock>,
    pub job_updates: Vec<StoredJobUpdateDetails>,
    pub scheduler_metadata: Option<SchedulerMetadata>,
}

/// A snapshot with repeated task configs factored through a
/// content-addressed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicatedSnapshot {
    /// The snapshot with every task's config blanked out.
    pub partial_snapshot: Snapshot,
    pub task_configs: BTreeMap<Digest, TaskConfig>,
    pub task_config_refs: BTreeMap<String, Digest>,
}

/// First physical entry of a framed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub chunk_count: u32,
    /// Digest of the full encoded record.
    pub checksum: Digest,
}

/// One slice of a framed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameChunk {
    pub checksum: Digest,
    pub data: Bytes,
}

/// Physical entry carrying part of a record too large for one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Header(FrameHeader),
    Chunk(FrameChunk),
}

/// A compressed record, inflated transparently on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deflated {
    pub algorithm: u8,
    pub data: Bytes,
}

/// A log record: the tagged union of everything that can appear as a
/// physical log entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Transaction(Transaction),
    Snapshot(Snapshot),
    DeduplicatedSnapshot(DeduplicatedSnapshot),
    Frame(Frame),
    Deflated(Deflated),
    Noop,
}

/// Discriminant of a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Transaction,
    Snapshot,
    DeduplicatedSnapshot,
    Frame,
    Deflated,
    Noop,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Transaction,
        RecordKind::Snapshot,
        RecordKind::DeduplicatedSnapshot,
        RecordKind::Frame,
        RecordKind::Deflated,
        RecordKind::Noop,
    ];
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Transaction(_) => RecordKind::Transaction,
            Record::Snapshot(_) => RecordKind::Snapshot,
            Record::DeduplicatedSnapshot(_) => RecordKind::DeduplicatedSnapshot,
            Record::Frame(_) => RecordKind::Frame,
            Record::Deflated(_) => RecordKind::Deflated,
            Record::Noop => RecordKind::Noop,
        }
    }
}

/// Outcome of decoding one physical entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Record(Record),
    /// A record kind this binary does not know. Readers skip these.
    Unknown(u8),
}

fn write_payload<T: Serialize>(buf: &mut Vec<u8>, value: &T) -> Result<()> {
    rmp_serde::encode::write(buf, value)
        .map_err(|e| Error::coding(format!("encode failed: {}", e)))
}

fn read_payload<'a, T: Deserialize<'a>>(payload: &'a [u8], what: &str) -> Result<T> {
    rmp_serde::from_slice(payload)
        .map_err(|e| Error::coding(format!("malformed {} payload: {}", what, e)))
}

/// Encode a record to its wire form.
pub fn encode(record: &Record) -> Result<Bytes> {
    let mut buf = Vec::new();
    match record {
        Record::Transaction(txn) => {
            buf.push(TAG_TRANSACTION);
            write_payload(&mut buf, txn)?;
        }
        Record::Snapshot(snapshot) => {
            buf.push(TAG_SNAPSHOT);
            write_payload(&mut buf, snapshot)?;
        }
        Record::DeduplicatedSnapshot(dedup) => {
            buf.push(TAG_DEDUPLICATED_SNAPSHOT);
            write_payload(&mut buf, dedup)?;
        }
        Record::Frame(Frame::Header(header)) => {
            buf.push(TAG_FRAME_HEADER);
            write_payload(&mut buf, header)?;
        }
        Record::Frame(Frame::Chunk(chunk)) => {
            buf.push(TAG_FRAME_CHUNK);
            write_payload(&mut buf, chunk)?;
        }
        Record::Deflated(deflated) => {
            buf.push(TAG_DEFLATED);
            write_payload(&mut buf, deflated)?;
        }
        Record::Noop => {
            buf.push(TAG_NOOP);
        }
    }
    Ok(Bytes::from(buf))
}

/// Decode one physical entry.
pub fn decode(contents: &[u8]) -> Result<Decoded> {
    let (tag, payload) = contents
        .split_first()
        .ok_or_else(|| Error::coding("empty log entry"))?;

    let record = match *tag {
        TAG_TRANSACTION => Record::Transaction(read_payload(payload, "transaction")?),
        TAG_SNAPSHOT => Record::Snapshot(read_payload(payload, "snapshot")?),
        TAG_DEDUPLICATED_SNAPSHOT => {
            Record::DeduplicatedSnapshot(read_payload(payload, "deduplicated snapshot")?)
        }
        TAG_FRAME_HEADER => Record::Frame(Frame::Header(read_payload(payload, "frame header")?)),
        TAG_FRAME_CHUNK => Record::Frame(Frame::Chunk(read_payload(payload, "frame chunk")?)),
        TAG_DEFLATED => Record::Deflated(read_payload(payload, "deflated entry")?),
        // Any trailing payload on a noop is ignored.
        TAG_NOOP => Record::Noop,
        unknown => return Ok(Decoded::Unknown(unknown)),
    };
    Ok(Decoded::Record(record))
}
