//! WAL writer.
//!
//! The writer is the ingestion layer's entry point: `log` every record
//! before acknowledging the corresponding push, `start` once after replay,
//! `stop` once on shutdown.
//!
//! # Lifecycle
//!
//! - `start`: spawns the `tidelog-checkpoint` thread
//! - `log`: encodes Series then Entries as two separate appends
//! - `stop`: fires the shutdown signal, joins the checkpoint thread, then
//!   syncs and closes the log
//!
//! Once the shutdown signal has fired, `log` succeeds without writing.
//! The ingestion layer stops accepting pushes before stopping the WAL, so
//! only a push racing with shutdown can land in that window.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

use tidelog_core::{SeriesIterator, StorageFlusher};

use super::config::{ConfigError, WalConfig};
use super::log::{LogError, SegmentedLog};
use super::shutdown::ShutdownSignal;
use crate::checkpoint::Checkpointer;
use crate::format::{WalRecord, CURRENT_ENTRIES_RECORD};
use crate::metrics::MetricsSink;
use crate::pool::record_pool;

/// WAL writer errors.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// Configuration rejected
    #[error("invalid WAL configuration: {0}")]
    Config(#[from] ConfigError),

    /// Segment I/O failed
    #[error(transparent)]
    Log(#[from] LogError),

    /// `start` was called more than once
    #[error("WAL already started")]
    AlreadyStarted,

    /// `start` was called after `stop`
    #[error("WAL already stopped")]
    Stopped,

    /// The checkpoint thread could not be spawned
    #[error("failed to spawn checkpoint thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Durability log for ingested records.
///
/// Implementations are shared between all push handlers; every method
/// takes `&self`.
pub trait Wal: Send + Sync {
    /// Start background checkpointing. Call at most once.
    fn start(&self) -> Result<(), WalError>;

    /// Durably append a record.
    ///
    /// An empty record is accepted without writing anything.
    fn log(&self, record: &WalRecord) -> Result<(), WalError>;

    /// Stop checkpointing and close the log.
    ///
    /// Idempotent: calls after the first return `Ok(())`.
    fn stop(&self) -> Result<(), WalError>;
}

/// WAL used when the configuration disables it.
///
/// Accepts everything and never touches the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWal;

impl Wal for NoopWal {
    fn start(&self) -> Result<(), WalError> {
        Ok(())
    }

    fn log(&self, _record: &WalRecord) -> Result<(), WalError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), WalError> {
        Ok(())
    }
}

/// Build the WAL described by `config`.
///
/// Validates the configuration, then returns [`NoopWal`] when disabled or
/// an opened [`WalWriter`] otherwise. `flusher` is used for the shutdown
/// flush when `flush_on_shutdown` is set.
pub fn new_wal(
    config: &WalConfig,
    metrics: Arc<dyn MetricsSink>,
    series: Arc<dyn SeriesIterator>,
    flusher: Option<Arc<dyn StorageFlusher>>,
) -> Result<Arc<dyn Wal>, WalError> {
    config.validate()?;
    if !config.enabled {
        info!(target: "tidelog::wal", "WAL disabled");
        return Ok(Arc::new(NoopWal));
    }
    Ok(Arc::new(WalWriter::open(config, metrics, series, flusher)?))
}

/// Segmented WAL writer with a background checkpointer.
pub struct WalWriter {
    log: Arc<SegmentedLog>,
    checkpointer: Arc<Checkpointer>,
    shutdown: Arc<ShutdownSignal>,
    metrics: Arc<dyn MetricsSink>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WalWriter {
    /// Open the log in `config.dir` and prepare the checkpointer.
    ///
    /// The configuration is validated; `enabled` is ignored.
    pub fn open(
        config: &WalConfig,
        metrics: Arc<dyn MetricsSink>,
        series: Arc<dyn SeriesIterator>,
        flusher: Option<Arc<dyn StorageFlusher>>,
    ) -> Result<Self, WalError> {
        config.validate()?;
        let log = Arc::new(SegmentedLog::open(&config.dir, config.segment_size.as_u64())?);
        let checkpointer = Checkpointer::new(
            Arc::clone(&log),
            series,
            Arc::clone(&metrics),
            config.checkpoint_interval(),
        )
        .with_flusher(flusher)
        .with_flush_on_shutdown(config.flush_on_shutdown);

        Ok(WalWriter {
            log,
            checkpointer: Arc::new(checkpointer),
            shutdown: Arc::new(ShutdownSignal::new()),
            metrics,
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// The underlying segmented log
    pub fn segmented_log(&self) -> &Arc<SegmentedLog> {
        &self.log
    }

    /// The checkpointer driven by the background thread
    pub fn checkpointer(&self) -> &Arc<Checkpointer> {
        &self.checkpointer
    }

    fn append(&self, payload: &[u8]) -> Result<(), WalError> {
        match self.log.log(payload) {
            Ok(bytes) => {
                self.metrics.record_logged();
                self.metrics.bytes_logged(bytes);
                Ok(())
            }
            // Lost the race with stop(): the log closed after the
            // shutdown check in log().
            Err(LogError::Closed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Wal for WalWriter {
    fn start(&self) -> Result<(), WalError> {
        if self.shutdown.is_triggered() {
            return Err(WalError::Stopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(WalError::AlreadyStarted);
        }

        let checkpointer = Arc::clone(&self.checkpointer);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name("tidelog-checkpoint".to_string())
            .spawn(move || checkpointer.run(&shutdown))
            .map_err(|e| {
                self.started.store(false, Ordering::Release);
                WalError::Spawn(e)
            })?;

        *self.handle.lock() = Some(handle);
        info!(target: "tidelog::wal", dir = %self.log.dir().display(), "WAL started");
        Ok(())
    }

    fn log(&self, record: &WalRecord) -> Result<(), WalError> {
        if record.is_empty() || self.shutdown.is_triggered() {
            return Ok(());
        }

        let mut buf = record_pool().bytes_guard();

        if !record.series.is_empty() {
            record.encode_series(&mut buf);
            self.append(&buf)?;
            buf.clear();
        }

        if record.ref_entries.iter().any(|r| !r.entries.is_empty()) {
            record.encode_entries(CURRENT_ENTRIES_RECORD, &mut buf);
            self.append(&buf)?;
        }

        Ok(())
    }

    fn stop(&self) -> Result<(), WalError> {
        if !self.shutdown.trigger() {
            return Ok(());
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(target: "tidelog::wal", "Checkpoint thread panicked");
            }
        }

        self.log.close()?;
        info!(target: "tidelog::wal", "WAL stopped");
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(target: "tidelog::wal", error = %e, "Failed to stop WAL on drop");
        }
    }
}
