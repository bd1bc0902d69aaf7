//! WAL record container and codec.
//!
//! One call to [`Wal::log`](crate::wal::Wal::log) writes at most two
//! physical records: a Series record followed by an Entries record. Each
//! starts with a one-byte [`RecordType`] so readers can tell them apart and
//! so older entry formats stay decodable.
//!
//! # Series record
//!
//! ```text
//! ┌──────────┬───────────────┬──────────────────────────────────────────────┐
//! │ Type (1) │ UserID (str)  │ repeated: Ref (BE64) │ N (uvar) │ N × labels │
//! └──────────┴───────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Entries record
//!
//! ```text
//! ┌──────────┬──────────────┬──────────────┬───────────────────────────────────┐
//! │ Type (1) │ UserID (str) │ First TS (8) │ repeated ref blocks               │
//! └──────────┴──────────────┴──────────────┴───────────────────────────────────┘
//!
//! ref block:
//! Ref (BE64) │ [V2: Counter (BE64)] │ N (uvar) │ N × (TS delta (var) │ Line (str))
//! ```
//!
//! Entry timestamps are delta-encoded against the first timestamp in the
//! record. Ref blocks with no entries are not written.

use rustc_hash::FxHashMap;
use tidelog_core::{Entry, Label, Labels, SeriesRef, Timestamp};

use super::encoding::{Decoder, Encoder};
use crate::pool::{record_pool, ResettingPool};

/// Record type tag, the first byte of every encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Series definitions
    Series = 1,
    /// Entry batches without per-series counters
    EntriesV1 = 2,
    /// Entry batches carrying per-series counters
    EntriesV2 = 3,
    /// One series snapshot inside a checkpoint
    CheckpointSeries = 4,
    /// Trailer closing a checkpoint
    CheckpointEnd = 5,
    /// More entries for the series in the preceding checkpoint record
    CheckpointEntries = 6,
}

impl RecordType {
    /// Parse a type tag
    pub fn from_byte(b: u8) -> Result<Self, RecordError> {
        match b {
            1 => Ok(RecordType::Series),
            2 => Ok(RecordType::EntriesV1),
            3 => Ok(RecordType::EntriesV2),
            4 => Ok(RecordType::CheckpointSeries),
            5 => Ok(RecordType::CheckpointEnd),
            6 => Ok(RecordType::CheckpointEntries),
            other => Err(RecordError::UnknownType(other)),
        }
    }

    /// True for either entries format
    pub fn is_entries(&self) -> bool {
        matches!(self, RecordType::EntriesV1 | RecordType::EntriesV2)
    }
}

/// Entry record format written by new WAL appends.
pub const CURRENT_ENTRIES_RECORD: RecordType = RecordType::EntriesV2;

/// Smallest encoding of one label pair: two empty strings.
const MIN_LABEL_BYTES: usize = 2;

/// Smallest encoding of one entry: one-byte delta and an empty line.
const MIN_ENTRY_BYTES: usize = 2;

/// A series definition: labels plus the reference entries records use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesDef {
    /// Node-local reference
    pub series_ref: SeriesRef,
    /// Full label set
    pub labels: Labels,
}

/// A batch of entries for one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntries {
    /// Series the entries belong to
    pub series_ref: SeriesRef,
    /// Series entry count after this batch was appended
    ///
    /// Zero when decoded from a V1 record, meaning unknown.
    pub counter: i64,
    /// The entries, oldest first
    pub entries: Vec<Entry>,
}

/// Reusable WAL record for a single tenant.
///
/// Obtain one from the record pool, fill it, hand it to
/// [`Wal::log`](crate::wal::Wal::log), then return it with
/// [`ResettingPool::put_record`]. A record must not be used after it has
/// been returned.
#[derive(Debug, Default)]
pub struct WalRecord {
    /// Tenant the record belongs to
    pub user_id: String,
    /// Series definitions, non-empty only for series records
    pub series: Vec<SeriesDef>,
    /// Entry batches, non-empty only for entries records
    pub ref_entries: Vec<RefEntries>,
    entry_index: FxHashMap<SeriesRef, usize>,
}

impl WalRecord {
    /// Create an empty record for a tenant
    pub fn new(user_id: impl Into<String>) -> Self {
        WalRecord {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// True if there is nothing to log
    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.ref_entries.is_empty()
    }

    /// Clear all fields, returning entry vectors to the global pool
    pub fn reset(&mut self) {
        self.reset_into(record_pool());
    }

    /// Clear all fields, returning entry vectors to `pool`
    ///
    /// Outer vectors keep their capacity.
    pub fn reset_into(&mut self, pool: &ResettingPool) {
        self.user_id.clear();
        self.series.clear();
        for refs in self.ref_entries.drain(..) {
            pool.put_entries(refs.entries);
        }
        self.entry_index.clear();
    }

    /// Add a series definition
    pub fn add_series(&mut self, series_ref: SeriesRef, labels: Labels) {
        self.series.push(SeriesDef { series_ref, labels });
    }

    /// Add entries for a series
    ///
    /// Entries for a reference already present in this record are appended
    /// to its existing batch, whose counter is raised to `counter`.
    pub fn add_entries(&mut self, series_ref: SeriesRef, counter: i64, entries: &[Entry]) {
        if let Some(&idx) = self.entry_index.get(&series_ref) {
            let existing = &mut self.ref_entries[idx];
            existing.entries.extend_from_slice(entries);
            existing.counter = existing.counter.max(counter);
            return;
        }

        let mut batch = record_pool().get_entries();
        batch.extend_from_slice(entries);
        self.entry_index.insert(series_ref, self.ref_entries.len());
        self.ref_entries.push(RefEntries {
            series_ref,
            counter,
            entries: batch,
        });
    }

    /// Append the Series sub-record to `buf`.
    pub fn encode_series(&self, buf: &mut Vec<u8>) {
        let mut enc = Encoder::new(buf);
        enc.put_byte(RecordType::Series as u8);
        enc.put_uvarint_str(&self.user_id);
        for def in &self.series {
            enc.put_be64(def.series_ref.get());
            encode_labels(&mut enc, &def.labels);
        }
    }

    /// Append the Entries sub-record to `buf` in the given format.
    ///
    /// `version` must be one of the entries record types; any other type
    /// is written as [`CURRENT_ENTRIES_RECORD`].
    pub fn encode_entries(&self, version: RecordType, buf: &mut Vec<u8>) {
        let version = if version.is_entries() {
            version
        } else {
            CURRENT_ENTRIES_RECORD
        };

        let mut enc = Encoder::new(buf);
        enc.put_byte(version as u8);
        enc.put_uvarint_str(&self.user_id);

        // All timestamps in the record are deltas from the first entry.
        let first = self
            .ref_entries
            .iter()
            .find_map(|r| r.entries.first())
            .map(|e| e.timestamp.as_nanos())
            .unwrap_or(0);
        enc.put_be64_i64(first);

        for refs in &self.ref_entries {
            if refs.entries.is_empty() {
                continue;
            }
            enc.put_be64(refs.series_ref.get());
            if version == RecordType::EntriesV2 {
                enc.put_be64_i64(refs.counter);
            }
            enc.put_uvarint(refs.entries.len() as u64);
            for entry in &refs.entries {
                enc.put_varint(entry.timestamp.as_nanos().wrapping_sub(first));
                enc.put_uvarint_str(&entry.line);
            }
        }
    }

    /// Decode one Series or Entries record into `self`.
    ///
    /// Decoded series and batches are appended; callers normally pass a
    /// freshly reset record. Returns the record type that was decoded.
    ///
    /// # Errors
    ///
    /// Any truncation, bad length, bad UTF-8 or unknown type yields a
    /// [`RecordError`]. Checkpoint record types are rejected here.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<RecordType, RecordError> {
        let mut dec = Decoder::new(bytes);
        let record_type = RecordType::from_byte(dec.byte()?)?;
        match record_type {
            RecordType::Series => self.decode_series(&mut dec)?,
            RecordType::EntriesV1 | RecordType::EntriesV2 => {
                self.decode_entries(record_type, &mut dec)?
            }
            other => return Err(RecordError::UnexpectedType(other as u8)),
        }
        Ok(record_type)
    }

    fn decode_series(&mut self, dec: &mut Decoder<'_>) -> Result<(), RecordError> {
        self.user_id.clear();
        self.user_id.push_str(dec.uvarint_str()?);
        while !dec.is_empty() {
            let series_ref = SeriesRef(dec.be64()?);
            let labels = decode_labels(dec)?;
            self.series.push(SeriesDef { series_ref, labels });
        }
        Ok(())
    }

    fn decode_entries(
        &mut self,
        version: RecordType,
        dec: &mut Decoder<'_>,
    ) -> Result<(), RecordError> {
        self.user_id.clear();
        self.user_id.push_str(dec.uvarint_str()?);
        let first = dec.be64_i64()?;

        while !dec.is_empty() {
            let series_ref = SeriesRef(dec.be64()?);
            let counter = if version == RecordType::EntriesV2 {
                dec.be64_i64()?
            } else {
                0
            };
            let n = dec.uvarint_count(MIN_ENTRY_BYTES)?;

            let mut entries = record_pool().get_entries();
            for _ in 0..n {
                let delta = match dec.varint() {
                    Ok(d) => d,
                    Err(e) => {
                        record_pool().put_entries(entries);
                        return Err(e);
                    }
                };
                let line = match dec.uvarint_str() {
                    Ok(l) => l,
                    Err(e) => {
                        record_pool().put_entries(entries);
                        return Err(e);
                    }
                };
                entries.push(Entry::new(
                    Timestamp::from_nanos(first.wrapping_add(delta)),
                    line,
                ));
            }

            self.entry_index.insert(series_ref, self.ref_entries.len());
            self.ref_entries.push(RefEntries {
                series_ref,
                counter,
                entries,
            });
        }
        Ok(())
    }
}

/// Write a label set: count followed by name/value pairs.
pub(crate) fn encode_labels(enc: &mut Encoder<'_>, labels: &Labels) {
    enc.put_uvarint(labels.len() as u64);
    for label in labels.iter() {
        enc.put_uvarint_str(&label.name);
        enc.put_uvarint_str(&label.value);
    }
}

/// Read a label set written by [`encode_labels`].
pub(crate) fn decode_labels(dec: &mut Decoder<'_>) -> Result<Labels, RecordError> {
    let n = dec.uvarint_count(MIN_LABEL_BYTES)?;
    let mut labels = Labels::new();
    for _ in 0..n {
        let name = dec.uvarint_str()?;
        let value = dec.uvarint_str()?;
        labels.push(Label::new(name, value));
    }
    Ok(labels)
}

/// Record decoding errors.
///
/// Every variant means the record is corrupt; none is retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// A field extends past the end of the record
    #[error("corrupt record: need {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the field required
        needed: usize,
        /// Bytes left in the record
        remaining: usize,
    },

    /// A varint is longer than ten bytes
    #[error("corrupt record: varint overflows 64 bits")]
    VarintOverflow,

    /// An item count cannot fit in the remaining bytes
    #[error("corrupt record: count {count} exceeds {remaining} remaining bytes")]
    CountOverflow {
        /// Decoded count
        count: u64,
        /// Bytes left in the record
        remaining: usize,
    },

    /// A string field is not valid UTF-8
    #[error("corrupt record: invalid UTF-8 in string field")]
    InvalidUtf8,

    /// The type byte is not a known record type
    #[error("corrupt record: unknown record type {0}")]
    UnknownType(u8),

    /// A known record type appeared where it is not allowed
    #[error("corrupt record: unexpected record type {0}")]
    UnexpectedType(u8),

    /// A checkpoint trailer disagrees with the records before it
    #[error("corrupt record: checkpoint declares {declared} series, found {found}")]
    CountMismatch {
        /// Count stored in the trailer
        declared: u64,
        /// Series records actually read
        found: u64,
    },
}
