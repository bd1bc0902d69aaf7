//! Checkpoint file format.
//!
//! Checkpoints are named `checkpoint-NNNNNN.chk` where `NNNNNN` is the
//! highest segment number the checkpoint dominates. They are written under
//! a hidden temporary name (`.checkpoint-NNNNNN.tmp`) and renamed into
//! place once complete.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (32 bytes)                            │
//! │   magic "TDCK" │ version │ boundary │        │
//! │   created_at_micros │ series_count           │
//! ├──────────────────────────────────────────────┤
//! │ Frame: CheckpointSeries record               │
//! ├──────────────────────────────────────────────┤
//! │ Frame: CheckpointEntries record (optional)   │
//! ├──────────────────────────────────────────────┤
//! │ ...                                          │
//! ├──────────────────────────────────────────────┤
//! │ Frame: CheckpointEnd record                  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A series whose buffered entries do not fit one record is continued by
//! CheckpointEntries records for the same tenant and reference, directly
//! after its CheckpointSeries record.
//!
//! The header series count is written as zero and patched when the file is
//! finished. A checkpoint is valid only if its end record is present and
//! both counts agree with the number of series records.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tidelog_core::{Entry, SeriesRef, SeriesSnapshot, TenantId, Timestamp};

use super::encoding::{Decoder, Encoder};
use super::record::{decode_labels, encode_labels, RecordError, RecordType};

/// Magic bytes identifying a checkpoint file: "TDCK"
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"TDCK";

/// Current checkpoint format version
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Size of checkpoint header in bytes
pub const CHECKPOINT_HEADER_SIZE: usize = 32;

/// Byte offset of the series count inside the header
pub const SERIES_COUNT_OFFSET: u64 = 24;

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const CHECKPOINT_SUFFIX: &str = ".chk";
const TEMP_PREFIX: &str = ".checkpoint-";
const TEMP_SUFFIX: &str = ".tmp";

/// Smallest encoding of one checkpointed entry: timestamp and empty line.
const MIN_CHECKPOINT_ENTRY_BYTES: usize = 9;

/// Largest encoding of one checkpointed entry beyond its line bytes:
/// timestamp and a maximal varint length.
const CHECKPOINT_ENTRY_OVERHEAD: usize = 8 + 10;

/// Checkpoint header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointHeader {
    /// Magic bytes: "TDCK"
    pub magic: [u8; 4],
    /// Format version
    pub format_version: u32,
    /// Highest segment number this checkpoint dominates
    pub boundary: u64,
    /// Creation time, microseconds since the Unix epoch
    pub created_at_micros: u64,
    /// Number of series records in the file
    pub series_count: u64,
}

impl CheckpointHeader {
    /// Header for a checkpoint that is about to be written
    pub fn new(boundary: u64, created_at_micros: u64) -> Self {
        CheckpointHeader {
            magic: CHECKPOINT_MAGIC,
            format_version: CHECKPOINT_FORMAT_VERSION,
            boundary,
            created_at_micros,
            series_count: 0,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; CHECKPOINT_HEADER_SIZE] {
        let mut bytes = [0u8; CHECKPOINT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.boundary.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.created_at_micros.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.series_count.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; CHECKPOINT_HEADER_SIZE]) -> Self {
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(b)
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);

        CheckpointHeader {
            magic,
            format_version: u32::from_le_bytes(version),
            boundary: u64_at(8),
            created_at_micros: u64_at(16),
            series_count: u64_at(24),
        }
    }

    /// Validate magic and version.
    pub fn is_valid(&self) -> bool {
        self.magic == CHECKPOINT_MAGIC && self.format_version == CHECKPOINT_FORMAT_VERSION
    }
}

/// One decoded checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointRecord {
    /// A series snapshot, possibly holding only the first of its entries
    Series(SeriesSnapshot),
    /// Further entries for the series of the preceding record
    Entries {
        /// Owning tenant
        tenant: TenantId,
        /// Series the entries belong to
        series_ref: SeriesRef,
        /// The entries, oldest first
        entries: Vec<Entry>,
    },
    /// End-of-checkpoint trailer
    End {
        /// Series records that precede the trailer
        series_count: u64,
    },
}

/// Upper bound on the encoded size of one checkpointed entry.
#[inline]
pub fn checkpoint_entry_size(entry: &Entry) -> usize {
    entry.line.len() + CHECKPOINT_ENTRY_OVERHEAD
}

/// Append a CheckpointSeries record for `snapshot` to `buf`.
///
/// Only `entries` are written, which lets the caller continue the rest of
/// the snapshot's entries in CheckpointEntries records.
pub fn encode_checkpoint_series(snapshot: &SeriesSnapshot, entries: &[Entry], buf: &mut Vec<u8>) {
    let mut enc = Encoder::new(buf);
    enc.put_byte(RecordType::CheckpointSeries as u8);
    enc.put_uvarint_str(snapshot.tenant.as_str());
    enc.put_be64(snapshot.series_ref.get());
    encode_labels(&mut enc, &snapshot.labels);
    enc.put_be64_i64(snapshot.entry_count);
    put_checkpoint_entries(&mut enc, entries);
}

/// Append a CheckpointEntries record continuing the series `series_ref`.
pub fn encode_checkpoint_entries(
    tenant: &TenantId,
    series_ref: SeriesRef,
    entries: &[Entry],
    buf: &mut Vec<u8>,
) {
    let mut enc = Encoder::new(buf);
    enc.put_byte(RecordType::CheckpointEntries as u8);
    enc.put_uvarint_str(tenant.as_str());
    enc.put_be64(series_ref.get());
    put_checkpoint_entries(&mut enc, entries);
}

fn put_checkpoint_entries(enc: &mut Encoder<'_>, entries: &[Entry]) {
    enc.put_uvarint(entries.len() as u64);
    for entry in entries {
        enc.put_be64_i64(entry.timestamp.as_nanos());
        enc.put_uvarint_str(&entry.line);
    }
}

fn get_checkpoint_entries(dec: &mut Decoder<'_>) -> Result<Vec<Entry>, RecordError> {
    let n = dec.uvarint_count(MIN_CHECKPOINT_ENTRY_BYTES)?;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let ts = Timestamp::from_nanos(dec.be64_i64()?);
        entries.push(Entry::new(ts, dec.uvarint_str()?));
    }
    Ok(entries)
}

/// Append a CheckpointEnd record to `buf`.
pub fn encode_checkpoint_end(series_count: u64, buf: &mut Vec<u8>) {
    let mut enc = Encoder::new(buf);
    enc.put_byte(RecordType::CheckpointEnd as u8);
    enc.put_be64(series_count);
}

impl CheckpointRecord {
    /// Decode one checkpoint record.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut dec = Decoder::new(bytes);
        let record_type = RecordType::from_byte(dec.byte()?)?;
        let record = match record_type {
            RecordType::CheckpointSeries => {
                let tenant = TenantId::new(dec.uvarint_str()?);
                let series_ref = SeriesRef(dec.be64()?);
                let labels = decode_labels(&mut dec)?;
                let entry_count = dec.be64_i64()?;
                let entries = get_checkpoint_entries(&mut dec)?;
                CheckpointRecord::Series(SeriesSnapshot {
                    tenant,
                    series_ref,
                    labels,
                    entry_count,
                    entries,
                })
            }
            RecordType::CheckpointEntries => CheckpointRecord::Entries {
                tenant: TenantId::new(dec.uvarint_str()?),
                series_ref: SeriesRef(dec.be64()?),
                entries: get_checkpoint_entries(&mut dec)?,
            },
            RecordType::CheckpointEnd => CheckpointRecord::End {
                series_count: dec.be64()?,
            },
            other => return Err(RecordError::UnexpectedType(other as u8)),
        };

        if !dec.is_empty() {
            return Err(RecordError::UnexpectedEof {
                needed: 0,
                remaining: dec.remaining(),
            });
        }
        Ok(record)
    }
}

/// Final path of the checkpoint dominating segments up to `boundary`.
pub fn checkpoint_path(dir: &Path, boundary: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", CHECKPOINT_PREFIX, boundary, CHECKPOINT_SUFFIX))
}

/// Temporary path used while the checkpoint is being written.
pub fn checkpoint_temp_path(dir: &Path, boundary: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", TEMP_PREFIX, boundary, TEMP_SUFFIX))
}

/// Parse a boundary out of a checkpoint file name.
pub fn parse_checkpoint_name(name: &str) -> Option<u64> {
    name.strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?
        .parse()
        .ok()
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// List checkpoint boundaries in `dir`, ascending.
pub fn list_checkpoints(dir: &Path) -> io::Result<Vec<u64>> {
    let mut boundaries = Vec::new();
    for name in dir_file_names(dir)? {
        if let Some(b) = parse_checkpoint_name(&name) {
            boundaries.push(b);
        }
    }
    boundaries.sort_unstable();
    Ok(boundaries)
}

/// List leftover temporary checkpoint files in `dir`.
pub fn list_checkpoint_temps(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(dir_file_names(dir)?
        .into_iter()
        .filter(|name| is_temp_name(name))
        .map(|name| dir.join(name))
        .collect())
}

fn dir_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        if let Some(name) = entry?.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
