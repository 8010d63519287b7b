//! In-memory log, for tests and embedded single-process use.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use perch_core::error::Result;

use super::{Entry, Log, LogStream, Position};

#[derive(Default)]
struct MemLogInner {
    // Keyed by position; truncation removes the head of the map.
    entries: RwLock<BTreeMap<u64, Bytes>>,
    next: RwLock<u64>,
}

/// A log held entirely in memory.
#[derive(Clone, Default)]
pub struct MemLog {
    inner: Arc<MemLogInner>,
}

impl MemLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw retained entries with their positions, oldest first.
    pub fn entries(&self) -> Vec<(Position, Bytes)> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(pos, contents)| (Position(*pos), contents.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Log for MemLog {
    fn open(&self) -> Result<Box<dyn LogStream>> {
        Ok(Box::new(self.clone()))
    }
}

impl LogStream for MemLog {
    fn read_all(&self) -> Result<Box<dyn Iterator<Item = Result<Entry>> + Send>> {
        let entries: Vec<Entry> = self
            .inner
            .entries
            .read()
            .values()
            .map(|contents| Entry(contents.clone()))
            .collect();
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn append(&self, contents: &[u8]) -> Result<Position> {
        let mut next = self.inner.next.write();
        let position = *next;
        self.inner
            .entries
            .write()
            .insert(position, Bytes::copy_from_slice(contents));
        *next += 1;
        Ok(Position(position))
    }

    fn truncate_before(&self, position: Position) -> Result<()> {
        let mut entries = self.inner.entries.write();
        *entries = entries.split_off(&position.0);
        Ok(())
    }
}
