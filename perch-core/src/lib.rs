//! # Perch Core
//!
//! Shared building blocks for the perch scheduler's storage layer:
//! - The scheduler domain model
//! - Store interfaces the storage engine writes through
//! - Error types
//! - Content digests and checksums
//! - Configuration

pub mod config;
pub mod digest;
pub mod error;
pub mod stores;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use stores::{Stores, TaskQuery};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
