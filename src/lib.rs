//! Tidelog - write-ahead log, checkpointing and crash replay for a
//! log-ingestion node
//!
//! Entries accepted by an ingester are logged before they are acknowledged,
//! periodically checkpointed so old segments can be dropped, and replayed on
//! restart within a bounded memory budget.
//!
//! # Quick Start
//!
//! ```ignore
//! use tidelog::{new_wal, Replayer, WalConfig};
//!
//! let config = WalConfig::from_file(Path::new("wal.toml"))?;
//!
//! // Rebuild in-memory series before accepting pushes
//! let (state, stats) = Replayer::new(&config, flusher.clone(), metrics.clone()).replay()?;
//!
//! let wal = new_wal(&config, metrics, series, Some(flusher))?;
//! wal.start()?;
//! wal.log(&record)?; // before acknowledging each push
//! wal.stop()?;
//! ```
//!
//! # Architecture
//!
//! Shared types and the collaborator traits the ingestion layer implements
//! live in `tidelog-core`; everything that touches disk lives in
//! `tidelog-durability`. This crate re-exports both.

pub use tidelog_core::*;
pub use tidelog_durability::*;
