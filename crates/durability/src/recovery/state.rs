//! State reconstructed by replay
//!
//! Series are grouped by tenant and keyed by reference. Each series keeps
//! its total entry counter even after its buffered entries are flushed, so
//! later batches can still be deduplicated against it.

use rustc_hash::FxHashMap;

use tidelog_core::{Labels, SeriesIterator, SeriesRef, SeriesSnapshot, TenantId};

use crate::format::RefEntries;

/// Outcome of applying one entry batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Entries added to the series
    pub applied: usize,
    /// Entries dropped because the series already had them
    pub skipped: usize,
    /// Entries dropped because the series was never defined
    pub unknown: usize,
    /// Estimated bytes of the applied entries
    pub bytes: usize,
}

/// Series recovered from a checkpoint and the WAL.
#[derive(Debug, Default, Clone)]
pub struct RecoveredState {
    tenants: FxHashMap<TenantId, FxHashMap<SeriesRef, SeriesSnapshot>>,
}

impl RecoveredState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a series loaded from a checkpoint, replacing any existing one.
    pub fn load_snapshot(&mut self, snapshot: SeriesSnapshot) {
        self.tenants
            .entry(snapshot.tenant.clone())
            .or_default()
            .insert(snapshot.series_ref, snapshot);
    }

    /// Define a series from a WAL Series record.
    ///
    /// Returns `false` if the series was already known; its labels and
    /// entries are left untouched.
    pub fn define_series(&mut self, tenant: &str, series_ref: SeriesRef, labels: Labels) -> bool {
        let series = self.tenants.entry(TenantId::new(tenant)).or_default();
        if series.contains_key(&series_ref) {
            return false;
        }
        series.insert(
            series_ref,
            SeriesSnapshot {
                tenant: TenantId::new(tenant),
                series_ref,
                labels,
                entry_count: 0,
                entries: Vec::new(),
            },
        );
        true
    }

    /// Apply an entry batch from a WAL Entries record.
    ///
    /// A batch counter of zero means the counter is unknown and the whole
    /// batch applies. Otherwise only entries beyond the series' current
    /// count are applied: a batch whose counter does not exceed the count is
    /// skipped, and a partially overlapping batch contributes only its
    /// trailing `counter - count` entries.
    pub fn apply_entries(&mut self, tenant: &str, mut batch: RefEntries) -> ApplyOutcome {
        let total = batch.entries.len();
        let Some(series) = self
            .tenants
            .get_mut(tenant)
            .and_then(|s| s.get_mut(&batch.series_ref))
        else {
            return ApplyOutcome {
                unknown: total,
                ..Default::default()
            };
        };

        let skip = if batch.counter <= 0 {
            0
        } else if batch.counter <= series.entry_count {
            total
        } else {
            let missing = (batch.counter - series.entry_count) as u64;
            total.saturating_sub(missing.min(total as u64) as usize)
        };

        let applied = batch.entries.len() - skip;
        let bytes: usize = batch.entries[skip..].iter().map(|e| e.estimated_size()).sum();

        if applied > 0 {
            if skip == 0 && series.entries.is_empty() {
                series.entries = std::mem::take(&mut batch.entries);
            } else {
                series.entries.extend(batch.entries.drain(skip..));
            }
        }

        if batch.counter > 0 {
            series.entry_count = series.entry_count.max(batch.counter);
        } else {
            series.entry_count += applied as i64;
        }

        ApplyOutcome {
            applied,
            skipped: skip,
            unknown: 0,
            bytes,
        }
    }

    /// Move every buffered entry out of the state.
    ///
    /// Returns one snapshot per series that had entries. Series identity
    /// and counters stay behind.
    pub fn take_unflushed(&mut self) -> Vec<SeriesSnapshot> {
        let mut out = Vec::new();
        for series in self.tenants.values_mut() {
            for s in series.values_mut() {
                if s.entries.is_empty() {
                    continue;
                }
                out.push(SeriesSnapshot {
                    tenant: s.tenant.clone(),
                    series_ref: s.series_ref,
                    labels: s.labels.clone(),
                    entry_count: s.entry_count,
                    entries: std::mem::take(&mut s.entries),
                });
            }
        }
        out.sort_by(|a, b| (&a.tenant, a.series_ref).cmp(&(&b.tenant, b.series_ref)));
        out
    }

    /// Look up one series
    pub fn get(&self, tenant: &str, series_ref: SeriesRef) -> Option<&SeriesSnapshot> {
        self.tenants.get(tenant)?.get(&series_ref)
    }

    /// Tenants with at least one series, sorted
    pub fn tenants(&self) -> Vec<&TenantId> {
        let mut tenants: Vec<_> = self.tenants.keys().collect();
        tenants.sort();
        tenants
    }

    /// Series of one tenant, sorted by reference
    pub fn tenant_series(&self, tenant: &str) -> Vec<&SeriesSnapshot> {
        let mut series: Vec<_> = self
            .tenants
            .get(tenant)
            .map(|s| s.values().collect())
            .unwrap_or_default();
        series.sort_by_key(|s| s.series_ref);
        series
    }

    /// Total series across tenants
    pub fn series_count(&self) -> usize {
        self.tenants.values().map(|s| s.len()).sum()
    }

    /// Entries buffered in memory across all series
    pub fn buffered_entries(&self) -> usize {
        self.tenants
            .values()
            .flat_map(|s| s.values())
            .map(|s| s.entries.len())
            .sum()
    }

    /// True if no series were recovered
    pub fn is_empty(&self) -> bool {
        self.series_count() == 0
    }

    /// Consume the state, yielding every series sorted by tenant and reference
    pub fn into_snapshots(self) -> Vec<SeriesSnapshot> {
        let mut out: Vec<_> = self
            .tenants
            .into_values()
            .flat_map(|s| s.into_values())
            .collect();
        out.sort_by(|a, b| (&a.tenant, a.series_ref).cmp(&(&b.tenant, b.series_ref)));
        out
    }
}

impl SeriesIterator for RecoveredState {
    fn series(&self) -> Box<dyn Iterator<Item = SeriesSnapshot> + '_> {
        let mut all: Vec<&SeriesSnapshot> =
            self.tenants.values().flat_map(|s| s.values()).collect();
        all.sort_by(|a, b| (&a.tenant, a.series_ref).cmp(&(&b.tenant, b.series_ref)));
        Box::new(all.into_iter().cloned())
    }
}
