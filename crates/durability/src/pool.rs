//! Object pools for the logging hot path
//!
//! Three independent free lists hold reusable WAL records, entry vectors
//! and encode buffers. Each free list keeps up to [`MAX_POOLED`] idle
//! objects; anything returned beyond that is dropped.
//!
//! Objects that grew past 64 times their initial capacity are dropped on
//! return too, so one oversized push does not pin its allocation for the
//! life of the process.
//!
//! # Key Optimization
//!
//! `Vec::clear()` and `String::clear()` preserve allocated capacity.
//! By reusing records and buffers, we avoid:
//! - Entry vector allocation per series per append
//! - Encode buffer allocation per append
//! - Series/ref-entries vector growth
//!
//! After warmup, encoding a record does not allocate.
//!
//! Objects are handed over by value, so only one owner can hold a pooled
//! object at a time.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use tidelog_core::Entry;

use crate::format::WalRecord;

/// Maximum idle objects retained per kind
pub const MAX_POOLED: usize = 64;

/// Initial capacity of a fresh entry vector
pub const ENTRIES_CAPACITY: usize = 512;

/// Initial capacity of a fresh encode buffer
pub const BYTES_CAPACITY: usize = 1024;

/// Largest entry vector capacity kept on return
pub const MAX_POOLED_ENTRIES_CAPACITY: usize = 64 * ENTRIES_CAPACITY;

/// Largest encode buffer capacity kept on return
pub const MAX_POOLED_BYTES_CAPACITY: usize = 64 * BYTES_CAPACITY;

/// Largest series or ref-entries capacity of a record kept on return
pub const MAX_POOLED_RECORD_CAPACITY: usize = 4096;

static RECORD_POOL: Lazy<ResettingPool> = Lazy::new(ResettingPool::new);

/// Process-wide pool shared by the writer and record decoding.
pub fn record_pool() -> &'static ResettingPool {
    &RECORD_POOL
}

/// Bounded, mutex-guarded free list.
struct FreeList<T> {
    items: Mutex<Vec<T>>,
}

impl<T> FreeList<T> {
    fn new() -> Self {
        FreeList {
            items: Mutex::new(Vec::with_capacity(MAX_POOLED)),
        }
    }

    fn take(&self) -> Option<T> {
        self.items.lock().pop()
    }

    fn give(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() < MAX_POOLED {
            items.push(item);
        }
        // else: drop (pool full)
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Pools of records, entry vectors and byte buffers.
///
/// Every `put_*` clears the object before it is stored and every `get_*`
/// clears it again, so callers always receive a zero-length object.
pub struct ResettingPool {
    records: FreeList<WalRecord>,
    entries: FreeList<Vec<Entry>>,
    bytes: FreeList<Vec<u8>>,
}

impl Default for ResettingPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ResettingPool {
    /// Create an empty pool
    pub fn new() -> Self {
        ResettingPool {
            records: FreeList::new(),
            entries: FreeList::new(),
            bytes: FreeList::new(),
        }
    }

    /// Get an empty record
    pub fn get_record(&self) -> WalRecord {
        match self.records.take() {
            Some(mut record) => {
                record.reset_into(self);
                record
            }
            None => WalRecord::default(),
        }
    }

    /// Return a record, releasing its entry vectors to this pool
    pub fn put_record(&self, mut record: WalRecord) {
        record.reset_into(self);
        if record.series.capacity() > MAX_POOLED_RECORD_CAPACITY
            || record.ref_entries.capacity() > MAX_POOLED_RECORD_CAPACITY
        {
            return;
        }
        self.records.give(record);
    }

    /// Get an empty entry vector
    pub fn get_entries(&self) -> Vec<Entry> {
        match self.entries.take() {
            Some(mut entries) => {
                entries.clear();
                entries
            }
            None => Vec::with_capacity(ENTRIES_CAPACITY),
        }
    }

    /// Return an entry vector
    pub fn put_entries(&self, mut entries: Vec<Entry>) {
        if entries.capacity() > MAX_POOLED_ENTRIES_CAPACITY {
            return;
        }
        entries.clear();
        self.entries.give(entries);
    }

    /// Get an empty byte buffer
    pub fn get_bytes(&self) -> Vec<u8> {
        match self.bytes.take() {
            Some(mut bytes) => {
                bytes.clear();
                bytes
            }
            None => Vec::with_capacity(BYTES_CAPACITY),
        }
    }

    /// Return a byte buffer
    pub fn put_bytes(&self, mut bytes: Vec<u8>) {
        if bytes.capacity() > MAX_POOLED_BYTES_CAPACITY {
            return;
        }
        bytes.clear();
        self.bytes.give(bytes);
    }

    /// Borrow a byte buffer that is returned when the guard drops
    pub fn bytes_guard(&self) -> PooledBytes<'_> {
        PooledBytes {
            pool: self,
            buf: self.get_bytes(),
        }
    }

    /// Idle objects held per kind: (records, entries, bytes)
    pub fn idle_counts(&self) -> (usize, usize, usize) {
        (self.records.len(), self.entries.len(), self.bytes.len())
    }
}

/// Byte buffer on loan from a [`ResettingPool`].
///
/// The buffer goes back to the pool when the guard is dropped, including
/// on early returns and unwinding.
pub struct PooledBytes<'a> {
    pool: &'a ResettingPool,
    buf: Vec<u8>,
}

impl Deref for PooledBytes<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBytes<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBytes<'_> {
    fn drop(&mut self) {
        self.pool.put_bytes(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RefEntries;
    use std::sync::Arc;
    use std::thread;
    use tidelog_core::{Labels, SeriesRef, Timestamp};

    #[test]
    fn test_get_after_put_is_empty() {
        let pool = ResettingPool::new();

        let mut bytes = pool.get_bytes();
        bytes.extend_from_slice(b"leftover");
        pool.put_bytes(bytes);
        assert!(pool.get_bytes().is_empty());

        let mut entries = pool.get_entries();
        entries.push(Entry::new(Timestamp::from_nanos(1), "x"));
        pool.put_entries(entries);
        assert!(pool.get_entries().is_empty());

        let mut record = pool.get_record();
        record.user_id.push_str("tenant");
        record.add_series(SeriesRef(1), Labels::new());
        record.add_entries(SeriesRef(1), 1, &[Entry::new(Timestamp::from_nanos(1), "x")]);
        pool.put_record(record);
        let record = pool.get_record();
        assert!(record.is_empty());
        assert!(record.user_id.is_empty());
    }

    #[test]
    fn test_capacity_is_retained() {
        let pool = ResettingPool::new();
        let mut bytes = pool.get_bytes();
        bytes.resize(8 * BYTES_CAPACITY, 0);
        let cap = bytes.capacity();
        pool.put_bytes(bytes);
        assert_eq!(pool.get_bytes().capacity(), cap);
    }

    #[test]
    fn test_oversized_objects_are_dropped_on_return() {
        let pool = ResettingPool::new();

        pool.put_bytes(Vec::with_capacity(MAX_POOLED_BYTES_CAPACITY + 1));
        pool.put_entries(Vec::with_capacity(MAX_POOLED_ENTRIES_CAPACITY + 1));
        let mut record = WalRecord::new("t");
        record.series.reserve(MAX_POOLED_RECORD_CAPACITY + 1);
        pool.put_record(record);
        assert_eq!(pool.idle_counts(), (0, 0, 0));

        let mut buf = pool.bytes_guard();
        buf.resize(MAX_POOLED_BYTES_CAPACITY * 2, 0);
        drop(buf);
        assert_eq!(pool.idle_counts().2, 0);
        assert!(pool.get_bytes().capacity() < MAX_POOLED_BYTES_CAPACITY);

        pool.put_bytes(Vec::with_capacity(MAX_POOLED_BYTES_CAPACITY / 2));
        assert_eq!(pool.idle_counts().2, 1);
    }

    #[test]
    fn test_fresh_objects_have_target_capacity() {
        let pool = ResettingPool::new();
        assert!(pool.get_bytes().capacity() >= BYTES_CAPACITY);
        assert!(pool.get_entries().capacity() >= ENTRIES_CAPACITY);
    }

    #[test]
    fn test_idle_objects_are_bounded() {
        let pool = ResettingPool::new();
        for _ in 0..MAX_POOLED + 10 {
            pool.put_bytes(Vec::new());
        }
        assert_eq!(pool.idle_counts().2, MAX_POOLED);
    }

    #[test]
    fn test_put_record_recycles_entry_vectors() {
        let pool = ResettingPool::new();
        let mut record = WalRecord::new("t");
        record.ref_entries.push(RefEntries {
            series_ref: SeriesRef(1),
            counter: 1,
            entries: vec![Entry::new(Timestamp::from_nanos(1), "x")],
        });
        pool.put_record(record);
        let (records, entries, _) = pool.idle_counts();
        assert_eq!(records, 1);
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_guard_returns_buffer_on_early_exit() {
        let pool = ResettingPool::new();

        fn fails(pool: &ResettingPool) -> Result<(), ()> {
            let mut buf = pool.bytes_guard();
            buf.extend_from_slice(b"partial");
            Err(())
        }

        assert!(fails(&pool).is_err());
        assert_eq!(pool.idle_counts().2, 1);
        assert!(pool.get_bytes().is_empty());
    }

    #[test]
    fn test_concurrent_get_put() {
        let pool = Arc::new(ResettingPool::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for j in 0..500 {
                        let mut buf = pool.get_bytes();
                        assert!(buf.is_empty());
                        buf.push((i * j) as u8);
                        pool.put_bytes(buf);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.idle_counts().2 <= MAX_POOLED);
    }
}
