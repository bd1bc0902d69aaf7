//! In-memory ingester
//!
//! Mirrors what the ingestion layer does on push: resolve the series for a
//! label set (assigning a new reference on first sight), append entries,
//! bump the series counter and describe the change as a [`WalRecord`].

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use tidelog_core::{Entry, Labels, SeriesIterator, SeriesRef, SeriesSnapshot, TenantId, Timestamp};

use crate::format::WalRecord;
use crate::pool::record_pool;
use crate::recovery::RecoveredState;

#[derive(Debug, Default)]
struct TenantSeries {
    by_labels: FxHashMap<Labels, SeriesRef>,
    series: BTreeMap<SeriesRef, SeriesSnapshot>,
}

#[derive(Debug)]
struct Inner {
    tenants: BTreeMap<TenantId, TenantSeries>,
    next_ref: u64,
}

/// Thread-safe in-memory series store.
#[derive(Debug)]
pub struct MemoryIngester {
    inner: RwLock<Inner>,
}

impl Default for MemoryIngester {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIngester {
    /// Empty store; the first series gets reference 1
    pub fn new() -> Self {
        MemoryIngester {
            inner: RwLock::new(Inner {
                tenants: BTreeMap::new(),
                next_ref: 1,
            }),
        }
    }

    /// Rebuild a store from replayed state.
    ///
    /// New series get references above every recovered one.
    pub fn from_state(state: RecoveredState) -> Self {
        let ingester = Self::new();
        {
            let mut inner = ingester.inner.write();
            for snapshot in state.into_snapshots() {
                inner.next_ref = inner.next_ref.max(snapshot.series_ref.get() + 1);
                let tenant = inner.tenants.entry(snapshot.tenant.clone()).or_default();
                tenant
                    .by_labels
                    .insert(snapshot.labels.clone(), snapshot.series_ref);
                tenant.series.insert(snapshot.series_ref, snapshot);
            }
        }
        ingester
    }

    /// Push one line and return the record to log.
    pub fn push(
        &self,
        tenant: &str,
        labels: Labels,
        timestamp: Timestamp,
        line: impl Into<String>,
    ) -> WalRecord {
        self.append(tenant, labels, &[Entry::new(timestamp, line)])
    }

    /// Push a batch of entries for one series and return the record to log.
    ///
    /// The record holds a series definition only when the label set is new
    /// for this tenant. The entry counter is the series count after append.
    pub fn append(&self, tenant: &str, labels: Labels, entries: &[Entry]) -> WalRecord {
        let mut record = record_pool().get_record();
        record.user_id.push_str(tenant);

        let mut inner = self.inner.write();
        let next_ref = inner.next_ref;
        let tenant_series = inner.tenants.entry(TenantId::new(tenant)).or_default();

        let (series_ref, created) = match tenant_series.by_labels.get(&labels) {
            Some(&r) => (r, false),
            None => {
                let r = SeriesRef(next_ref);
                tenant_series.by_labels.insert(labels.clone(), r);
                tenant_series.series.insert(
                    r,
                    SeriesSnapshot {
                        tenant: TenantId::new(tenant),
                        series_ref: r,
                        labels: labels.clone(),
                        entry_count: 0,
                        entries: Vec::new(),
                    },
                );
                record.add_series(r, labels);
                (r, true)
            }
        };

        if let Some(series) = tenant_series.series.get_mut(&series_ref) {
            series.entries.extend_from_slice(entries);
            series.entry_count += entries.len() as i64;
            if !entries.is_empty() {
                record.add_entries(series_ref, series.entry_count, entries);
            }
        }

        if created {
            inner.next_ref += 1;
        }
        record
    }

    /// Snapshot of one series
    pub fn get(&self, tenant: &str, series_ref: SeriesRef) -> Option<SeriesSnapshot> {
        self.inner
            .read()
            .tenants
            .get(tenant)?
            .series
            .get(&series_ref)
            .cloned()
    }

    /// Number of series across tenants
    pub fn series_count(&self) -> usize {
        self.inner.read().tenants.values().map(|t| t.series.len()).sum()
    }

    /// Buffered entries across tenants
    pub fn entry_count(&self) -> usize {
        self.inner
            .read()
            .tenants
            .values()
            .flat_map(|t| t.series.values())
            .map(|s| s.entries.len())
            .sum()
    }
}

impl SeriesIterator for MemoryIngester {
    fn series(&self) -> Box<dyn Iterator<Item = SeriesSnapshot> + '_> {
        // Copy out under the lock so pushes are not blocked while a
        // checkpoint is being written.
        let snapshots: Vec<SeriesSnapshot> = self
            .inner
            .read()
            .tenants
            .values()
            .flat_map(|t| t.series.values().cloned())
            .collect();
        Box::new(snapshots.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::RecoveredState;

    fn labels(app: &str) -> Labels {
        Labels::from_pairs([("app", app)])
    }

    #[test]
    fn test_first_push_defines_series() {
        let ingester = MemoryIngester::new();
        let first = ingester.push("t", labels("a"), Timestamp::from_nanos(1), "one");
        assert_eq!(first.series.len(), 1);
        assert_eq!(first.ref_entries[0].counter, 1);

        let second = ingester.push("t", labels("a"), Timestamp::from_nanos(2), "two");
        assert!(second.series.is_empty());
        assert_eq!(second.ref_entries[0].series_ref, SeriesRef(1));
        assert_eq!(second.ref_entries[0].counter, 2);
    }

    #[test]
    fn test_distinct_labels_get_distinct_refs() {
        let ingester = MemoryIngester::new();
        let a = ingester.push("t", labels("a"), Timestamp::from_nanos(1), "x");
        let b = ingester.push("t", labels("b"), Timestamp::from_nanos(1), "x");
        assert_ne!(a.series[0].series_ref, b.series[0].series_ref);
        assert_eq!(ingester.series_count(), 2);
    }

    #[test]
    fn test_from_state_continues_refs_and_counters() {
        let mut state = RecoveredState::new();
        state.define_series("t", SeriesRef(7), labels("a"));

        let ingester = MemoryIngester::from_state(state);
        let same = ingester.push("t", labels("a"), Timestamp::from_nanos(1), "x");
        assert!(same.series.is_empty());
        assert_eq!(same.ref_entries[0].series_ref, SeriesRef(7));

        let new = ingester.push("t", labels("b"), Timestamp::from_nanos(1), "x");
        assert_eq!(new.series[0].series_ref, SeriesRef(8));
    }

    #[test]
    fn test_iteration_is_restartable() {
        let ingester = MemoryIngester::new();
        ingester.push("t", labels("a"), Timestamp::from_nanos(1), "x");
        ingester.push("u", labels("a"), Timestamp::from_nanos(1), "x");
        assert_eq!(ingester.series().count(), 2);
        assert_eq!(ingester.series().count(), 2);
    }
}
