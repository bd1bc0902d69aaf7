//! WAL reader for recovery and replay.
//!
//! Streams decoded records across segments in ascending order. The first
//! damaged frame or undecodable record ends the stream; the position is
//! kept as a [`WalCorruption`] so replay can repair the log there.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::format::frame::{FrameError, FrameReader};
use crate::format::record::{RecordError, RecordType, WalRecord};
use crate::format::segment::{list_segments, open_segment_frames};

/// Why reading stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptionReason {
    /// Segment header missing, unreadable or mismatched
    InvalidHeader(String),
    /// Segment ends inside a frame
    TornFrame,
    /// Frame checksum does not match its payload
    ChecksumMismatch,
    /// Frame length field is zero or implausible
    InvalidLength(u32),
    /// Frame is intact but its record does not decode
    CorruptRecord(RecordError),
}

impl fmt::Display for CorruptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptionReason::InvalidHeader(detail) => write!(f, "invalid segment header: {}", detail),
            CorruptionReason::TornFrame => f.write_str("torn frame"),
            CorruptionReason::ChecksumMismatch => f.write_str("checksum mismatch"),
            CorruptionReason::InvalidLength(len) => write!(f, "invalid frame length {}", len),
            CorruptionReason::CorruptRecord(e) => write!(f, "{}", e),
        }
    }
}

/// Location of the first damage found while reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalCorruption {
    /// Segment containing the damage
    pub segment: u64,
    /// Offset just past the last valid frame in that segment
    ///
    /// Zero when the header itself is invalid.
    pub offset: u64,
    /// What was wrong
    pub reason: CorruptionReason,
}

impl WalCorruption {
    /// True if the segment header could not be validated
    pub fn header_invalid(&self) -> bool {
        matches!(self.reason, CorruptionReason::InvalidHeader(_))
    }
}

/// Sequential record reader over the segments of a WAL directory.
pub struct WalReader {
    dir: PathBuf,
    segments: Vec<u64>,
    next_index: usize,
    current: Option<(u64, FrameReader<BufReader<File>>)>,
    corruption: Option<WalCorruption>,
    segments_read: usize,
    records_read: u64,
}

impl WalReader {
    /// Read every segment numbered strictly above `after`.
    ///
    /// `None` reads all segments.
    pub fn open(dir: &Path, after: Option<u64>) -> io::Result<Self> {
        let segments: Vec<u64> = list_segments(dir)?
            .into_iter()
            .filter(|&n| after.map_or(true, |b| n > b))
            .collect();

        Ok(WalReader {
            dir: dir.to_path_buf(),
            segments,
            next_index: 0,
            current: None,
            corruption: None,
            segments_read: 0,
            records_read: 0,
        })
    }

    /// Segments this reader will visit, ascending
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// Segments that were opened
    pub fn segments_read(&self) -> usize {
        self.segments_read
    }

    /// Records successfully decoded
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Damage that stopped the reader, if any
    pub fn corruption(&self) -> Option<&WalCorruption> {
        self.corruption.as_ref()
    }

    /// Segments after the damaged one, which were never read
    pub fn unread_segments(&self) -> &[u64] {
        if self.corruption.is_some() {
            &self.segments[self.next_index.min(self.segments.len())..]
        } else {
            &[]
        }
    }

    /// Decode the next record into `record`.
    ///
    /// `record` is cleared first. Returns `Ok(None)` once all segments are
    /// exhausted or damage was found; check [`corruption`](Self::corruption)
    /// to tell the two apart. Only I/O failures unrelated to segment
    /// contents are returned as errors.
    pub fn next_record(&mut self, record: &mut WalRecord) -> io::Result<Option<RecordType>> {
        if self.corruption.is_some() {
            return Ok(None);
        }

        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(None);
            }

            let Some((segment, frames)) = self.current.as_mut() else {
                continue;
            };
            let segment = *segment;
            let frame_start = frames.offset();

            let reason = match frames.next_frame() {
                Ok(Some(payload)) => {
                    record.reset();
                    match record.decode(payload) {
                        Ok(kind) => {
                            self.records_read += 1;
                            return Ok(Some(kind));
                        }
                        Err(e) => CorruptionReason::CorruptRecord(e),
                    }
                }
                Ok(None) => {
                    debug!(target: "tidelog::replay", segment, "Finished WAL segment");
                    self.current = None;
                    continue;
                }
                Err(FrameError::Io(e)) => return Err(e),
                Err(FrameError::Truncated { .. }) => CorruptionReason::TornFrame,
                Err(FrameError::ChecksumMismatch { .. }) => CorruptionReason::ChecksumMismatch,
                Err(FrameError::InvalidLength { length, .. }) => {
                    CorruptionReason::InvalidLength(length)
                }
                Err(FrameError::PayloadSize { length }) => {
                    CorruptionReason::InvalidLength(u32::try_from(length).unwrap_or(u32::MAX))
                }
            };

            self.current = None;
            self.corruption = Some(WalCorruption {
                segment,
                offset: frame_start,
                reason,
            });
            return Ok(None);
        }
    }

    fn open_next(&mut self) -> io::Result<bool> {
        let Some(&segment) = self.segments.get(self.next_index) else {
            return Ok(false);
        };
        self.next_index += 1;

        match open_segment_frames(&self.dir, segment) {
            Ok((header, frames)) => {
                debug!(
                    target: "tidelog::replay",
                    segment,
                    session = %uuid::Uuid::from_bytes(header.session_id),
                    "Reading WAL segment"
                );
                self.segments_read += 1;
                self.current = Some((segment, frames));
                Ok(true)
            }
            Err(e)
                if e.kind() == io::ErrorKind::InvalidData
                    || e.kind() == io::ErrorKind::UnexpectedEof =>
            {
                self.corruption = Some(WalCorruption {
                    segment,
                    offset: 0,
                    reason: CorruptionReason::InvalidHeader(e.to_string()),
                });
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
