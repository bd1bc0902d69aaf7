//! Identity and payload types for log series
//!
//! A series is a uniquely labeled log stream belonging to one tenant. The
//! ingestion layer assigns each series a node-local [`SeriesRef`] so WAL
//! records can refer to it compactly after the labels were logged once.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::borrow::Borrow;
use std::fmt;

use crate::timestamp::Timestamp;

/// Tenant identifier
///
/// Every WAL record and every series belongs to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant id
    pub fn new(id: impl Into<String>) -> Self {
        TenantId(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty tenant id
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TenantId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId(s)
    }
}

/// Node-local reference to a series
///
/// Unique per tenant for the lifetime of the WAL directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SeriesRef(pub u64);

impl SeriesRef {
    /// Raw reference value
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SeriesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single label name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Label {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Label set identifying a series, sorted by label name
///
/// Most streams carry a handful of labels, so the set is stored inline.
/// Deserialized sets are sorted on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Label>")]
pub struct Labels(SmallVec<[Label; 8]>);

impl From<Vec<Label>> for Labels {
    fn from(mut labels: Vec<Label>) -> Self {
        labels.sort();
        Labels(SmallVec::from_vec(labels))
    }
}

impl Labels {
    /// Create an empty label set
    pub fn new() -> Self {
        Labels(SmallVec::new())
    }

    /// Build a label set from name/value pairs, sorting by name
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut labels: SmallVec<[Label; 8]> = pairs
            .into_iter()
            .map(|(n, v)| Label::new(n, v))
            .collect();
        labels.sort();
        Labels(labels)
    }

    /// Append a label while decoding
    ///
    /// Decoders receive labels in their encoded (already sorted) order, so
    /// this does not re-sort.
    pub fn push(&mut self, label: Label) {
        self.0.push(label);
    }

    /// Look up a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Iterate labels in order
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no labels
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Approximate heap bytes held by the label strings
    pub fn estimated_size(&self) -> usize {
        self.0.iter().map(|l| l.name.len() + l.value.len()).sum()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}=\"{}\"", label.name, label.value)?;
        }
        f.write_str("}")
    }
}

/// Fixed per-entry bookkeeping counted on top of the line bytes when
/// estimating memory use.
pub const ENTRY_OVERHEAD_BYTES: usize = std::mem::size_of::<Entry>();

/// A single timestamped log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// When the line was produced
    pub timestamp: Timestamp,
    /// The log line
    pub line: String,
}

impl Entry {
    /// Create an entry
    pub fn new(timestamp: Timestamp, line: impl Into<String>) -> Self {
        Entry {
            timestamp,
            line: line.into(),
        }
    }

    /// Estimated in-memory footprint of this entry
    #[inline]
    pub fn estimated_size(&self) -> usize {
        self.line.len() + ENTRY_OVERHEAD_BYTES
    }
}

/// Point-in-time view of one series
///
/// Produced by a [`SeriesIterator`](crate::SeriesIterator), written to
/// checkpoints, and handed to a [`StorageFlusher`](crate::StorageFlusher).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeriesSnapshot {
    /// Owning tenant
    pub tenant: TenantId,
    /// Node-local series reference
    pub series_ref: SeriesRef,
    /// Series labels
    pub labels: Labels,
    /// Total number of entries ever appended to the series
    ///
    /// Includes entries already flushed to storage and therefore absent
    /// from `entries`.
    pub entry_count: i64,
    /// Entries held in memory that are not yet in long-term storage
    pub entries: Vec<Entry>,
}

impl SeriesSnapshot {
    /// Estimated in-memory footprint of the buffered entries
    pub fn estimated_size(&self) -> usize {
        self.entries.iter().map(Entry::estimated_size).sum()
    }
}
