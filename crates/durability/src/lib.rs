//! Durability layer for Tidelog
//!
//! This crate handles everything that touches disk for an ingester node:
//!
//! - WAL: Segmented write-ahead log of series definitions and entry batches
//! - Checkpoints: Periodic crash-safe snapshots of every in-memory series
//! - Replay: Checkpoint + WAL recovery with counter-based deduplication,
//!   a memory ceiling, and repair of torn or corrupt segments
//! - Binary on-disk formats (records, frames, segments, checkpoints)
//! - Record and buffer pooling for the push path
//! - Metrics sink for WAL, checkpoint and replay activity
//! - Testing stand-ins for the ingestion layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint; // Checkpoint writer, reader and periodic cycle
pub mod format; // Binary on-disk formats (records, frames, segments, checkpoints)
pub mod metrics; // Metrics sink and in-process counters
pub mod pool; // Record, entry and byte buffer pooling
pub mod recovery; // Replay into recovered state
pub mod testing; // In-memory ingester and recording flusher
pub mod wal; // WAL configuration, log, reader and writer

// === Re-exports ===

// Checkpoint
pub use checkpoint::{
    find_latest_valid, CheckpointError, CheckpointInfo, CheckpointPhase, CheckpointReader,
    CheckpointWriter, Checkpointer,
};

// Format types
pub use format::{RecordError, RecordType, RefEntries, SeriesDef, WalRecord};

// Metrics
pub use metrics::{noop_metrics, MetricsSink, NoopMetrics, WalMetrics, WalMetricsSnapshot};

// Pooling
pub use pool::{record_pool, ResettingPool};

// Recovery
pub use recovery::{RecoveredState, ReplayError, ReplayStats, Replayer};

// WAL
pub use wal::{
    new_wal, ByteSize, ConfigError, NoopWal, Wal, WalConfig, WalCorruption, WalError, WalWriter,
};
