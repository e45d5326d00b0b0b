//! Error taxonomy shared across the engine.
//!
//! Kernels treat most failures as recoverable (log and emit empty
//! outputs); these variants are for the cases that must surface to the
//! caller as a request status.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while serving graph queries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Missing or ill-shaped input, unknown feature or op name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing node, edge or index.
    #[error("not found: {0}")]
    NotFound(String),

    /// Sampler weight sum is zero or an index is out of bounds.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Checksum mismatch, truncated record, unreachable registry.
    #[error("internal error: {0}")]
    Internal(String),

    /// A shard is deregistered or unreachable at dispatch time.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        EngineError::Unavailable(msg.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}
