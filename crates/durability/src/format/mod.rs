//! On-disk byte formats for WAL segments, records and checkpoints.
//!
//! This module centralizes all serialization logic for persistent storage.
//! Keeping serialization separate from operational logic (how segments are
//! rotated, when checkpoints are taken) makes format evolution easier to
//! manage.
//!
//! # Module Structure
//!
//! - `encoding`: Big-endian and varint field primitives
//! - `record`: Series and Entries record codec
//! - `frame`: Length + CRC32 framing
//! - `segment`: WAL segment header and files
//! - `checkpoint`: Checkpoint header, records and file naming

pub mod checkpoint;
pub mod encoding;
pub mod frame;
pub mod record;
pub mod segment;

pub use checkpoint::{
    checkpoint_path, checkpoint_temp_path, encode_checkpoint_end, encode_checkpoint_entries,
    encode_checkpoint_series, list_checkpoint_temps, list_checkpoints, CheckpointHeader,
    CheckpointRecord,
    CHECKPOINT_FORMAT_VERSION, CHECKPOINT_HEADER_SIZE, CHECKPOINT_MAGIC,
};
pub use frame::{encode_frame, FrameError, FrameReader, FRAME_OVERHEAD};
pub use record::{
    RecordError, RecordType, RefEntries, SeriesDef, WalRecord, CURRENT_ENTRIES_RECORD,
};
pub use segment::{
    list_segments, open_segment_frames, segment_path, SegmentHeader, WalSegment,
    SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
