//! Core types and traits for Tidelog
//!
//! This crate defines the foundational types shared by the durability layer
//! and the ingestion layer that sits on top of it:
//! - TenantId: Tenant a record or series belongs to
//! - SeriesRef: Compact per-node reference to a series
//! - Labels: Sorted label set identifying a series
//! - Entry: A single timestamped log line
//! - Timestamp: Nanosecond-precision timestamp
//! - SeriesSnapshot: Point-in-time view of one series
//! - Traits: Collaborator interfaces (SeriesIterator, StorageFlusher)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod timestamp;
pub mod traits;
pub mod types;

pub use error::FlushError;
pub use timestamp::Timestamp;
pub use traits::{SeriesIterator, StorageFlusher};
pub use types::{Entry, Label, Labels, SeriesRef, SeriesSnapshot, TenantId};
