//! # Configuration
//!
//! Tunables for the log-backed storage engine and the local file log.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Compression applied to deflated log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionKind {
    None,
    Zstd,
    Snappy,
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStorageConfig {
    /// Interval between automatic snapshots.
    pub snapshot_interval: Duration,
    /// Largest physical log entry; bigger records are split into frames.
    pub max_entry_size: usize,
    /// Compress snapshot entries before appending.
    pub deflate_snapshots: bool,
    /// Factor repeated task configs out of snapshots.
    pub deduplicate_snapshots: bool,
    /// Algorithm used when deflation is enabled.
    pub compression: CompressionKind,
}

impl Default for LogStorageConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(3600), // 1 hour
            max_entry_size: 512 * 1024,                   // 512KB
            deflate_snapshots: true,
            deduplicate_snapshots: true,
            compression: CompressionKind::Zstd,
        }
    }
}

/// Local file log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogConfig {
    pub path: PathBuf,
    pub sync_on_write: bool,
    pub buffer_size: usize,
}

impl FileLogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_write: true,
            buffer_size: 64 * 1024, // 64KB
        }
    }
}
