//! Collaborator traits consumed by the durability layer
//!
//! The WAL never owns the in-memory series structures or the long-term
//! chunk store. It reaches them through these two narrow traits, which the
//! ingestion layer implements.

use crate::error::FlushError;
use crate::types::SeriesSnapshot;

/// Restartable traversal over every series the ingestion layer tracks
///
/// The checkpointer calls [`series`](SeriesIterator::series) once per
/// checkpoint and writes snapshots in the order produced; it never re-sorts.
///
/// Thread safety: implementations must tolerate being iterated while other
/// threads keep appending entries. A snapshot may or may not include an
/// entry appended during iteration.
pub trait SeriesIterator: Send + Sync {
    /// Start a fresh traversal
    ///
    /// Each call yields every series exactly once. The traversal is finite.
    fn series(&self) -> Box<dyn Iterator<Item = SeriesSnapshot> + '_>;
}

/// Persists buffered series entries to long-term chunk storage
///
/// Called synchronously by replay when the memory ceiling is reached, and
/// on shutdown when flush-on-shutdown is enabled. Returning `Ok` means the
/// entries in the batch are durable and may be dropped from memory.
pub trait StorageFlusher: Send + Sync {
    /// Flush a batch of series snapshots
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the batch could not be persisted.
    fn flush(&self, batch: &[SeriesSnapshot]) -> Result<(), FlushError>;
}
