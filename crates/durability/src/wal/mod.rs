//! WAL (Write-Ahead Log) module
//!
//! - `config`: WAL configuration (WalConfig, ByteSize, ConfigError)
//! - `log`: Segmented append-only log (SegmentedLog, LogError)
//! - `reader`: Sequential record reader used by replay (WalReader)
//! - `shutdown`: One-shot shutdown broadcast
//! - `writer`: The `Wal` trait, its disabled and segmented implementations

pub mod config;
pub mod log;
pub mod reader;
pub mod shutdown;
pub mod writer;

pub use config::{ByteSize, ConfigError, WalConfig};
pub use log::{LogError, SegmentRemoval, SegmentedLog};
pub use reader::{CorruptionReason, WalCorruption, WalReader};
pub use shutdown::ShutdownSignal;
pub use writer::{new_wal, NoopWal, Wal, WalError, WalWriter};
