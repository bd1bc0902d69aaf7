//! Testing utilities for the durability layer
//!
//! Stand-ins for the ingestion layer's collaborators:
//!
//! - **MemoryIngester**: In-memory series store that produces WAL records
//!   the way a push handler does and serves them to the checkpointer
//! - **RecordingFlusher**: Storage flusher that records every batch and can
//!   be told to fail
//!
//! # Example
//!
//! ```ignore
//! use tidelog_durability::testing::{MemoryIngester, RecordingFlusher};
//!
//! let ingester = Arc::new(MemoryIngester::new());
//! let record = ingester.push("tenant", labels, Timestamp::now(), "line");
//! wal.log(&record)?;
//! ```

mod flusher;
mod ingester;

pub use flusher::RecordingFlusher;
pub use ingester::MemoryIngester;
