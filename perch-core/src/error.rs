//! # Error Handling
//!
//! Error types shared by every perch storage component.
//!
//! ## Design Principles
//!
//! 1. **Actionable**: Every error should guide the operator toward resolution
//! 2. **Contextual**: Errors include relevant context (positions, digests)
//! 3. **Recoverable**: Distinguish between fatal and recoverable errors

use thiserror::Error;

/// Result type alias for perch storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for the storage core
#[derive(Error, Debug)]
pub enum Error {
    // Wire errors
    #[error("codec error: {message}")]
    Coding { message: String },

    #[error("framing error: {message}")]
    Framing { message: String },

    #[error("snapshot reduplication error: {message}")]
    Dedup { message: String },

    // Recovery errors
    #[error("replay error: {message}")]
    Replay { message: String },

    // Log errors
    #[error("log append error: {message}")]
    Append { message: String, source: Option<Box<dyn std::error::Error + Send + Sync>> },

    #[error("log error: {message}")]
    Log { message: String, source: Option<Box<dyn std::error::Error + Send + Sync>> },

    // Domain store errors
    #[error("store error: {message}")]
    Store { message: String },

    // System errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    pub fn coding(message: impl Into<String>) -> Self {
        Error::Coding { message: message.into() }
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Error::Framing { message: message.into() }
    }

    pub fn replay(message: impl Into<String>) -> Self {
        Error::Replay { message: message.into() }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Error::Store { message: message.into() }
    }

    /// Check if error is recoverable.
    ///
    /// Fatal errors indicate the log and stores may have diverged; callers
    /// are expected to terminate rather than continue on them.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Append { .. } => false,
            Error::Replay { .. } => false,
            Error::Io { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Coding { .. } => "CODING_ERROR",
            Error::Framing { .. } => "FRAMING_ERROR",
            Error::Dedup { .. } => "DEDUP_ERROR",
            Error::Replay { .. } => "REPLAY_ERROR",
            Error::Append { .. } => "APPEND_ERROR",
            Error::Log { .. } => "LOG_ERROR",
            Error::Store { .. } => "STORE_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
