//! Recording storage flusher

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tidelog_core::{FlushError, SeriesSnapshot, StorageFlusher};

/// [`StorageFlusher`] that keeps every batch it accepts.
#[derive(Debug, Default)]
pub struct RecordingFlusher {
    batches: Mutex<Vec<Vec<SeriesSnapshot>>>,
    fail: AtomicBool,
}

impl RecordingFlusher {
    /// Flusher that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Flusher that rejects every batch
    pub fn failing() -> Self {
        let flusher = Self::default();
        flusher.set_failing(true);
        flusher
    }

    /// Toggle failure injection
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Accepted batches, in call order
    pub fn batches(&self) -> Vec<Vec<SeriesSnapshot>> {
        self.batches.lock().clone()
    }

    /// Number of accepted flush calls
    pub fn flush_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Total entries across accepted batches
    pub fn flushed_entries(&self) -> usize {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|s| s.entries.len())
            .sum()
    }

    /// Every flushed line of one series, in flush order
    pub fn flushed_lines(&self, tenant: &str, series_ref: u64) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .filter(|s| s.tenant.as_str() == tenant && s.series_ref.get() == series_ref)
            .flat_map(|s| s.entries.iter().map(|e| e.line.clone()))
            .collect()
    }
}

impl StorageFlusher for RecordingFlusher {
    fn flush(&self, batch: &[SeriesSnapshot]) -> Result<(), FlushError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FlushError::new("injected flush failure"));
        }
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelog_core::{Entry, SeriesRef, TenantId, Timestamp};

    fn snapshot(lines: &[&str]) -> SeriesSnapshot {
        SeriesSnapshot {
            tenant: TenantId::new("t"),
            series_ref: SeriesRef(1),
            entries: lines
                .iter()
                .map(|l| Entry::new(Timestamp::from_nanos(0), *l))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_records_batches() {
        let flusher = RecordingFlusher::new();
        flusher.flush(&[snapshot(&["a", "b"])]).unwrap();
        flusher.flush(&[snapshot(&["c"])]).unwrap();

        assert_eq!(flusher.flush_count(), 2);
        assert_eq!(flusher.flushed_entries(), 3);
        assert_eq!(flusher.flushed_lines("t", 1), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failure_injection() {
        let flusher = RecordingFlusher::failing();
        assert!(flusher.flush(&[snapshot(&["a"])]).is_err());
        assert_eq!(flusher.flush_count(), 0);

        flusher.set_failing(false);
        assert!(flusher.flush(&[snapshot(&["a"])]).is_ok());
    }
}
