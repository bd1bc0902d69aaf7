//! WAL replay for recovery
//!
//! Rebuilds in-memory series after a restart:
//!
//! 1. Remove temporary checkpoint files left by an interrupted checkpoint
//! 2. Load the newest checkpoint that validates end to end
//! 3. Apply every segment numbered after that checkpoint's boundary
//! 4. Repair the log at the first damage found
//!
//! Entry batches carry per-series counters, so records that were already
//! captured by the checkpoint (or logged twice around a checkpoint cut)
//! are applied at most once. Buffered entries above the replay memory
//! ceiling are flushed to storage as replay goes.
//!
//! # Usage
//!
//! ```ignore
//! let replayer = Replayer::new(&config, flusher, metrics);
//! let (state, stats) = replayer.replay()?;
//! let wal = new_wal(&config, metrics, Arc::new(ingester_from(state)), Some(flusher))?;
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use tidelog_core::{FlushError, StorageFlusher};

use super::controller::ReplayController;
use super::state::RecoveredState;
use crate::checkpoint::{find_latest_valid, CheckpointError, CheckpointReader};
use crate::format::checkpoint::list_checkpoint_temps;
use crate::format::segment::{segment_path, sync_dir, truncate_segment};
use crate::format::RecordType;
use crate::metrics::MetricsSink;
use crate::pool::record_pool;
use crate::wal::config::WalConfig;
use crate::wal::reader::{WalCorruption, WalReader};

/// Replay errors
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Filesystem error unrelated to segment contents
    #[error("replay I/O error: {0}")]
    Io(#[from] io::Error),

    /// The selected checkpoint could not be loaded
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Storage rejected a memory-ceiling flush
    #[error("replay flush failed: {0}")]
    Flush(#[from] FlushError),
}

/// Statistics from one replay
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Boundary of the checkpoint that was loaded
    pub checkpoint: Option<u64>,
    /// Checkpoints rejected by validation, newest first
    pub checkpoints_skipped: Vec<u64>,
    /// Temporary checkpoint files removed before replay
    pub temp_checkpoints_removed: usize,
    /// Series loaded from the checkpoint
    pub series_loaded: u64,
    /// New series defined by WAL records
    pub series_defined: u64,
    /// Segments opened
    pub segments_read: usize,
    /// Records decoded from segments
    pub records_read: u64,
    /// Entries added to the recovered state
    pub entries_applied: u64,
    /// Entries skipped as already present
    pub entries_skipped: u64,
    /// Entries dropped because their series was never defined
    pub entries_unknown_series: u64,
    /// Memory-ceiling flushes performed
    pub flushes: u64,
    /// Entries handed to storage by those flushes
    pub entries_flushed: u64,
    /// Highest buffered byte estimate during replay
    pub peak_bytes: u64,
    /// First damage found in the log, if any
    pub corruption: Option<WalCorruption>,
    /// Segments deleted while repairing the log
    pub segments_removed: Vec<u64>,
    /// Wall-clock time spent
    pub duration: Duration,
}

impl ReplayStats {
    /// True if replay had to repair the log
    pub fn repaired(&self) -> bool {
        self.corruption.is_some()
    }
}

/// Replays a WAL directory into a [`RecoveredState`].
pub struct Replayer {
    dir: PathBuf,
    memory_ceiling: u64,
    flusher: Arc<dyn StorageFlusher>,
    metrics: Arc<dyn MetricsSink>,
}

impl Replayer {
    /// Create a replayer for the directory and ceiling in `config`.
    pub fn new(
        config: &WalConfig,
        flusher: Arc<dyn StorageFlusher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Replayer {
            dir: config.dir.clone(),
            memory_ceiling: config.replay_memory_ceiling.as_u64(),
            flusher,
            metrics,
        }
    }

    /// WAL directory being replayed
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run replay.
    ///
    /// A missing directory yields an empty state and is not created.
    /// Entries still buffered when replay ends are returned in the state;
    /// only memory-ceiling overflow goes to storage.
    pub fn replay(&self) -> Result<(RecoveredState, ReplayStats), ReplayError> {
        let start = Instant::now();
        let mut state = RecoveredState::new();
        let mut stats = ReplayStats::default();

        if !self.dir.exists() {
            info!(target: "tidelog::replay", dir = %self.dir.display(), "No WAL directory, nothing to replay");
            stats.duration = start.elapsed();
            self.metrics.replay_completed(stats.duration);
            return Ok((state, stats));
        }

        info!(target: "tidelog::replay", dir = %self.dir.display(), "Starting WAL replay");

        stats.temp_checkpoints_removed = self.remove_temp_checkpoints()?;

        let mut controller = ReplayController::new(
            self.memory_ceiling,
            Arc::clone(&self.flusher),
            Arc::clone(&self.metrics),
        );

        let boundary = self.load_checkpoint(&mut state, &mut controller, &mut stats)?;
        self.replay_segments(boundary, &mut state, &mut controller, &mut stats)?;

        stats.flushes = controller.flushes();
        stats.entries_flushed = controller.entries_flushed();
        stats.peak_bytes = controller.peak_bytes();
        stats.duration = start.elapsed();
        self.metrics.replay_completed(stats.duration);

        info!(
            target: "tidelog::replay",
            checkpoint = ?stats.checkpoint,
            series = state.series_count(),
            segments = stats.segments_read,
            records = stats.records_read,
            entries_applied = stats.entries_applied,
            entries_skipped = stats.entries_skipped,
            flushes = stats.flushes,
            repaired = stats.repaired(),
            duration_ms = stats.duration.as_millis() as u64,
            "WAL replay complete"
        );

        Ok((state, stats))
    }

    fn remove_temp_checkpoints(&self) -> Result<usize, ReplayError> {
        let temps = list_checkpoint_temps(&self.dir)?;
        for path in &temps {
            debug!(target: "tidelog::replay", path = %path.display(), "Removing temporary checkpoint");
            fs::remove_file(path)?;
        }
        if !temps.is_empty() {
            sync_dir(&self.dir)?;
        }
        Ok(temps.len())
    }

    fn load_checkpoint(
        &self,
        state: &mut RecoveredState,
        controller: &mut ReplayController,
        stats: &mut ReplayStats,
    ) -> Result<Option<u64>, ReplayError> {
        let (found, skipped) = find_latest_valid(&self.dir)?;
        stats.checkpoints_skipped = skipped;

        let Some(checkpoint) = found else {
            debug!(target: "tidelog::replay", "No valid checkpoint, replaying all segments");
            return Ok(None);
        };

        let mut reader = CheckpointReader::open(&checkpoint.path)?;
        while let Some(snapshot) = reader.next_series()? {
            let size = snapshot.estimated_size() as u64;
            controller.before_batch(size, state)?;
            state.load_snapshot(snapshot);
            stats.series_loaded += 1;
            controller.after_batch(size, state)?;
        }

        info!(
            target: "tidelog::replay",
            boundary = checkpoint.header.boundary,
            series = stats.series_loaded,
            "Loaded checkpoint"
        );
        stats.checkpoint = Some(checkpoint.header.boundary);
        Ok(Some(checkpoint.header.boundary))
    }

    fn replay_segments(
        &self,
        boundary: Option<u64>,
        state: &mut RecoveredState,
        controller: &mut ReplayController,
        stats: &mut ReplayStats,
    ) -> Result<(), ReplayError> {
        let mut reader = WalReader::open(&self.dir, boundary)?;
        let mut record = record_pool().get_record();

        while let Some(kind) = reader.next_record(&mut record)? {
            match kind {
                RecordType::Series => {
                    for def in record.series.drain(..) {
                        if state.define_series(&record.user_id, def.series_ref, def.labels) {
                            stats.series_defined += 1;
                        }
                    }
                }
                RecordType::EntriesV1 | RecordType::EntriesV2 => {
                    for batch in record.ref_entries.drain(..) {
                        let incoming: u64 =
                            batch.entries.iter().map(|e| e.estimated_size() as u64).sum();
                        controller.before_batch(incoming, state)?;
                        let outcome = state.apply_entries(&record.user_id, batch);
                        stats.entries_applied += outcome.applied as u64;
                        stats.entries_skipped += outcome.skipped as u64;
                        stats.entries_unknown_series += outcome.unknown as u64;
                        controller.after_batch(outcome.bytes as u64, state)?;
                    }
                }
                // Checkpoint record types are rejected by WalRecord::decode.
                RecordType::CheckpointSeries
                | RecordType::CheckpointEnd
                | RecordType::CheckpointEntries => {}
            }
        }
        record_pool().put_record(record);

        stats.segments_read = reader.segments_read();
        stats.records_read = reader.records_read();

        if stats.entries_unknown_series > 0 {
            warn!(
                target: "tidelog::replay",
                entries = stats.entries_unknown_series,
                "Dropped entries for series with no definition"
            );
        }

        if let Some(corruption) = reader.corruption().cloned() {
            stats.segments_removed = self.repair(&corruption, reader.unread_segments())?;
            stats.corruption = Some(corruption);
        }
        Ok(())
    }

    /// Cut the log back to its last valid record.
    ///
    /// The damaged segment is truncated at the damage (or deleted if its
    /// header is bad) and every later segment is deleted.
    fn repair(&self, corruption: &WalCorruption, unread: &[u64]) -> Result<Vec<u64>, ReplayError> {
        warn!(
            target: "tidelog::replay",
            segment = corruption.segment,
            offset = corruption.offset,
            reason = %corruption.reason,
            discarded_segments = unread.len(),
            "WAL corruption found, repairing log"
        );

        let mut removed = Vec::new();
        if corruption.header_invalid() {
            fs::remove_file(segment_path(&self.dir, corruption.segment))?;
            removed.push(corruption.segment);
        } else {
            truncate_segment(&self.dir, corruption.segment, corruption.offset)?;
        }

        for &segment in unread {
            match fs::remove_file(segment_path(&self.dir, segment)) {
                Ok(()) => removed.push(segment),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        sync_dir(&self.dir)?;
        Ok(removed)
    }
}
