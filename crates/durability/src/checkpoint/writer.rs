//! Crash-safe checkpoint writer
//!
//! Uses write-fsync-rename pattern for atomic checkpoint creation.
//!
//! # Crash Safety
//!
//! The checkpoint creation follows this pattern:
//! 1. Write to temporary file (.checkpoint-NNNNNN.tmp)
//! 2. Patch the series count into the header and fsync the temporary file
//! 3. Atomic rename to final path (checkpoint-NNNNNN.chk)
//! 4. fsync the parent directory
//!
//! This ensures that either the complete checkpoint exists or it doesn't -
//! there's no possibility of a partial checkpoint being visible. A writer
//! dropped before [`finish`](CheckpointWriter::finish) removes its
//! temporary file.
//!
//! # Large Series
//!
//! A series' entries are split across records of about
//! [`CHECKPOINT_CHUNK_BYTES`] each, so no record approaches the frame limit
//! however much a series buffers. A single entry too large to frame fails
//! the write before anything is published.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tidelog_core::{Entry, SeriesSnapshot, Timestamp};

use super::CheckpointError;
use crate::format::checkpoint::{
    checkpoint_entry_size, checkpoint_path, checkpoint_temp_path, encode_checkpoint_end,
    encode_checkpoint_entries, encode_checkpoint_series, CheckpointHeader, SERIES_COUNT_OFFSET,
};
use crate::format::frame::{encode_frame, MAX_FRAME_PAYLOAD};
use crate::format::segment::sync_dir;
use crate::format::CHECKPOINT_HEADER_SIZE;

/// Target encoded size of the entries in one checkpoint record
pub const CHECKPOINT_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Summary of a finished checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenCheckpoint {
    /// Final path
    pub path: PathBuf,
    /// Highest segment number the checkpoint dominates
    pub boundary: u64,
    /// Series records written
    pub series: u64,
    /// File size in bytes
    pub bytes: u64,
}

/// Streaming writer for one checkpoint file.
pub struct CheckpointWriter {
    dir: PathBuf,
    boundary: u64,
    temp_path: PathBuf,
    file: BufWriter<File>,
    series: u64,
    bytes: u64,
    chunk_bytes: usize,
    record: Vec<u8>,
    frame: Vec<u8>,
    finished: bool,
}

impl CheckpointWriter {
    /// Start a checkpoint dominating segments up to `boundary`.
    ///
    /// A leftover temporary file for the same boundary is overwritten.
    pub fn create(dir: &Path, boundary: u64) -> Result<Self, CheckpointError> {
        let temp_path = checkpoint_temp_path(dir, boundary);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;

        let created_at_micros = (Timestamp::now().as_nanos() / 1_000).max(0) as u64;
        let header = CheckpointHeader::new(boundary, created_at_micros);

        let mut writer = CheckpointWriter {
            dir: dir.to_path_buf(),
            boundary,
            temp_path,
            file: BufWriter::new(file),
            series: 0,
            bytes: 0,
            chunk_bytes: CHECKPOINT_CHUNK_BYTES,
            record: Vec::new(),
            frame: Vec::new(),
            finished: false,
        };
        writer.file.write_all(&header.to_bytes())?;
        writer.bytes = CHECKPOINT_HEADER_SIZE as u64;
        Ok(writer)
    }

    /// Boundary this checkpoint covers
    pub fn boundary(&self) -> u64 {
        self.boundary
    }

    /// Override the per-record entry size target
    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes.max(1);
        self
    }

    /// Append one series snapshot.
    ///
    /// Entries beyond the first chunk follow in continuation records.
    pub fn write_series(&mut self, snapshot: &SeriesSnapshot) -> Result<(), CheckpointError> {
        let mut rest = snapshot.entries.as_slice();

        let head = take_chunk(&mut rest, self.chunk_bytes);
        self.record.clear();
        encode_checkpoint_series(snapshot, head, &mut self.record);
        self.write_frame()?;

        while !rest.is_empty() {
            let chunk = take_chunk(&mut rest, self.chunk_bytes);
            self.record.clear();
            encode_checkpoint_entries(&snapshot.tenant, snapshot.series_ref, chunk, &mut self.record);
            self.write_frame()?;
        }

        self.series += 1;
        Ok(())
    }

    fn write_frame(&mut self) -> Result<(), CheckpointError> {
        self.frame.clear();
        let length = self.record.len();
        encode_frame(&self.record, &mut self.frame).map_err(|_| CheckpointError::RecordTooLarge {
            length,
            max: MAX_FRAME_PAYLOAD,
        })?;
        self.file.write_all(&self.frame)?;
        self.bytes += self.frame.len() as u64;
        Ok(())
    }

    /// Write the end record and publish the checkpoint under its final name.
    pub fn finish(mut self) -> Result<WrittenCheckpoint, CheckpointError> {
        self.record.clear();
        encode_checkpoint_end(self.series, &mut self.record);
        self.write_frame()?;
        self.file.flush()?;

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(SERIES_COUNT_OFFSET))?;
        file.write_all(&self.series.to_le_bytes())?;
        file.sync_all()?;

        let final_path = checkpoint_path(&self.dir, self.boundary);
        fs::rename(&self.temp_path, &final_path)?;
        self.finished = true;
        sync_dir(&self.dir)?;

        Ok(WrittenCheckpoint {
            path: final_path,
            boundary: self.boundary,
            series: self.series,
            bytes: self.bytes,
        })
    }
}

/// Split off the leading entries of `rest` whose encoded size stays within
/// `target`. Always takes at least one entry when any remain.
fn take_chunk<'a>(rest: &mut &'a [Entry], target: usize) -> &'a [Entry] {
    let entries: &'a [Entry] = *rest;
    let mut size = 0;
    let mut n = 0;
    for entry in entries {
        let encoded = checkpoint_entry_size(entry);
        if n > 0 && size + encoded > target {
            break;
        }
        size += encoded;
        n += 1;
    }
    let (chunk, tail) = entries.split_at(n);
    *rest = tail;
    chunk
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}
