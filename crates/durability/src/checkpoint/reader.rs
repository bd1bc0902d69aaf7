//! Checkpoint reading and validation
//!
//! A checkpoint is trusted only after a full pass has confirmed its header,
//! every frame checksum, every record and the end trailer. Replay validates
//! candidates newest-first and loads the first one that passes, so a
//! damaged checkpoint never contributes partial state.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

use tidelog_core::SeriesSnapshot;

use super::CheckpointError;
use crate::format::checkpoint::{
    checkpoint_path, list_checkpoints, CheckpointHeader, CheckpointRecord,
    CHECKPOINT_HEADER_SIZE,
};
use crate::format::frame::FrameReader;

/// Sequential reader over the series of one checkpoint file.
pub struct CheckpointReader {
    path: PathBuf,
    header: CheckpointHeader,
    frames: FrameReader<BufReader<File>>,
    pending: Option<SeriesSnapshot>,
    series_seen: u64,
    done: bool,
}

impl CheckpointReader {
    /// Open a checkpoint and validate its header.
    pub fn open(path: &Path) -> Result<Self, CheckpointError> {
        let mut file = BufReader::new(File::open(path)?);
        let mut header_bytes = [0u8; CHECKPOINT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .map_err(|e| corrupt(path, format!("unreadable header: {}", e)))?;

        let header = CheckpointHeader::from_bytes(&header_bytes);
        if !header.is_valid() {
            return Err(corrupt(path, "invalid magic or version"));
        }

        Ok(CheckpointReader {
            path: path.to_path_buf(),
            header,
            frames: FrameReader::new(file, CHECKPOINT_HEADER_SIZE as u64),
            pending: None,
            series_seen: 0,
            done: false,
        })
    }

    /// Parsed header
    pub fn header(&self) -> &CheckpointHeader {
        &self.header
    }

    /// Read the next series.
    ///
    /// Entries continued in CheckpointEntries records are merged into their
    /// series before it is returned. Returns `Ok(None)` once the end trailer
    /// has been read and checked. A missing trailer, a count mismatch, an
    /// orphaned continuation or data after the trailer is a
    /// [`CheckpointError::Corrupt`].
    pub fn next_series(&mut self) -> Result<Option<SeriesSnapshot>, CheckpointError> {
        loop {
            if self.done {
                return Ok(self.pending.take());
            }

            let payload = match self.frames.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => return Err(corrupt(&self.path, "missing end record")),
                Err(e) => return Err(corrupt(&self.path, e.to_string())),
            };
            let record =
                CheckpointRecord::decode(payload).map_err(|e| corrupt(&self.path, e.to_string()))?;

            match record {
                CheckpointRecord::Series(snapshot) => {
                    self.series_seen += 1;
                    if let Some(previous) = self.pending.replace(snapshot) {
                        return Ok(Some(previous));
                    }
                }
                CheckpointRecord::Entries {
                    tenant,
                    series_ref,
                    entries,
                } => match self.pending.as_mut() {
                    Some(series) if series.tenant == tenant && series.series_ref == series_ref => {
                        series.entries.extend(entries);
                    }
                    _ => {
                        return Err(corrupt(
                            &self.path,
                            format!("entries for series {} do not follow it", series_ref),
                        ));
                    }
                },
                CheckpointRecord::End { series_count } => {
                    if series_count != self.series_seen
                        || self.header.series_count != self.series_seen
                    {
                        return Err(corrupt(
                            &self.path,
                            format!(
                                "series count mismatch: header {}, trailer {}, found {}",
                                self.header.series_count, series_count, self.series_seen
                            ),
                        ));
                    }
                    match self.frames.next_frame() {
                        Ok(None) => {}
                        Ok(Some(_)) | Err(_) => {
                            return Err(corrupt(&self.path, "data after end record"));
                        }
                    }
                    self.done = true;
                }
            }
        }
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> CheckpointError {
    CheckpointError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Read a checkpoint end to end without keeping its contents.
///
/// Returns the header and the number of series on success.
pub fn validate_checkpoint(path: &Path) -> Result<(CheckpointHeader, u64), CheckpointError> {
    let mut reader = CheckpointReader::open(path)?;
    let mut count = 0;
    while reader.next_series()?.is_some() {
        count += 1;
    }
    Ok((*reader.header(), count))
}

/// A checkpoint that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCheckpoint {
    /// File path
    pub path: PathBuf,
    /// Parsed header
    pub header: CheckpointHeader,
    /// Number of series
    pub series: u64,
}

/// Find the newest checkpoint in `dir` that passes validation.
///
/// Invalid checkpoints are logged and their boundaries returned in the
/// second element so callers can report them.
pub fn find_latest_valid(
    dir: &Path,
) -> Result<(Option<ValidCheckpoint>, Vec<u64>), CheckpointError> {
    let mut skipped = Vec::new();
    for boundary in list_checkpoints(dir)?.into_iter().rev() {
        let path = checkpoint_path(dir, boundary);
        match validate_checkpoint(&path) {
            Ok((header, series)) if header.boundary == boundary => {
                return Ok((Some(ValidCheckpoint { path, header, series }), skipped));
            }
            Ok((header, _)) => {
                warn!(
                    target: "tidelog::replay",
                    path = %path.display(),
                    header_boundary = header.boundary,
                    "Skipping checkpoint whose header disagrees with its name"
                );
            }
            Err(e) => {
                warn!(
                    target: "tidelog::replay",
                    path = %path.display(),
                    error = %e,
                    "Skipping invalid checkpoint"
                );
            }
        }
        skipped.push(boundary);
    }
    Ok((None, skipped))
}
