//! Checkpoints: periodic snapshots of every series that bound replay cost
//!
//! - `writer`: Crash-safe streaming checkpoint writer
//! - `reader`: Validation and loading
//! - `checkpointer`: The periodic cycle and its background loop

pub mod checkpointer;
pub mod reader;
pub mod writer;

use std::io;
use std::path::PathBuf;

use tidelog_core::FlushError;

use crate::wal::log::LogError;

pub use checkpointer::{CheckpointInfo, CheckpointPhase, Checkpointer};
pub use reader::{find_latest_valid, validate_checkpoint, CheckpointReader, ValidCheckpoint};
pub use writer::{CheckpointWriter, WrittenCheckpoint};

/// Checkpoint errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// I/O error while writing or reading a checkpoint
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] io::Error),

    /// The segment cut failed
    #[error("checkpoint could not cut segment: {0}")]
    Log(#[from] LogError),

    /// Checkpoint file failed validation
    #[error("corrupt checkpoint {}: {reason}", .path.display())]
    Corrupt {
        /// Checkpoint file
        path: PathBuf,
        /// What failed
        reason: String,
    },

    /// A checkpoint record cannot be stored in a single frame
    #[error("checkpoint record of {length} bytes exceeds the {max} byte frame limit")]
    RecordTooLarge {
        /// Encoded record length
        length: usize,
        /// Largest payload a frame can carry
        max: usize,
    },

    /// Shutdown flush failed
    #[error(transparent)]
    Flush(#[from] FlushError),
}
