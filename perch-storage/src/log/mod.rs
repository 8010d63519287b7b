//! # Log Transport
//!
//! The append-only record stream the engine writes through. The production
//! transport is expected to be a replicated log provided by the deployment;
//! this module defines the interface the engine consumes plus two local
//! implementations: [`MemLog`] for tests and embedding, and [`FileLog`] for
//! single-node setups.

mod file;
mod mem;

pub use file::FileLog;
pub use mem::MemLog;

use bytes::Bytes;

use perch_core::error::Result;

/// Opaque position of an appended entry. Positions are totally ordered in
/// append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub u64);

/// One physical log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry(pub Bytes);

impl Entry {
    pub fn contents(&self) -> &[u8] {
        &self.0
    }
}

/// An append-only record store.
pub trait Log: Send + Sync {
    fn open(&self) -> Result<Box<dyn LogStream>>;
}

/// An open log stream.
pub trait LogStream: Send + Sync {
    /// Stream every retained entry from the beginning, in append order.
    fn read_all(&self) -> Result<Box<dyn Iterator<Item = Result<Entry>> + Send>>;

    /// Durably append an entry, returning its position. May block on I/O.
    fn append(&self, contents: &[u8]) -> Result<Position>;

    /// Discard every entry strictly before `position`. May block on I/O.
    fn truncate_before(&self, position: Position) -> Result<()>;
}
