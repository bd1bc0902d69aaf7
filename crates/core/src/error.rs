//! Error types shared across crates
//!
//! Only errors raised by collaborators live here. Each durability module
//! defines its own error enum next to the code that raises it.

use thiserror::Error;

/// Failure reported by a [`StorageFlusher`](crate::StorageFlusher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("flush to storage failed: {0}")]
pub struct FlushError(pub String);

impl FlushError {
    /// Create a flush error from a message
    pub fn new(msg: impl Into<String>) -> Self {
        FlushError(msg.into())
    }
}

impl From<std::io::Error> for FlushError {
    fn from(e: std::io::Error) -> Self {
        FlushError(e.to_string())
    }
}
