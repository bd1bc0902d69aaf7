//! Segmented append-only log
//!
//! Owns the WAL directory: the single active segment, rotation when a
//! segment reaches its size limit, explicit cuts requested by the
//! checkpointer, and deletion of segments a checkpoint dominates.
//!
//! All appends are serialized behind one mutex. Each append is framed
//! (length + CRC32) and written with a single `write_all` so a crash can
//! leave at most one torn frame at the tail of the active segment.
//!
//! Opening a log never reuses an existing segment: writes always go to a
//! fresh segment numbered past everything already in the directory.

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::format::checkpoint::list_checkpoints;
use crate::format::frame::{encode_frame, MAX_FRAME_PAYLOAD};
use crate::format::segment::{list_segments, segment_path, sync_dir, WalSegment};
use crate::format::SEGMENT_HEADER_SIZE;
use crate::pool::record_pool;

/// Segmented log errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O error on a segment or the directory
    #[error("wal I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log was closed
    #[error("wal is closed")]
    Closed,

    /// Record cannot be stored in a single frame
    #[error("record of {length} bytes exceeds the {max} byte frame limit")]
    RecordTooLarge {
        /// Encoded record length
        length: usize,
        /// Largest payload a frame can carry
        max: usize,
    },
}

struct LogState {
    active: Option<WalSegment>,
    next_segment: u64,
    closed: bool,
}

/// Outcome of deleting dominated segments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SegmentRemoval {
    /// Segment numbers deleted
    pub removed: Vec<u64>,
    /// Segment numbers that could not be deleted
    pub failed: Vec<u64>,
}

/// Append-only, rotating set of WAL segments.
pub struct SegmentedLog {
    dir: PathBuf,
    segment_size: u64,
    session_id: [u8; 16],
    state: Mutex<LogState>,
}

impl SegmentedLog {
    /// Open the log in `dir`, creating the directory if needed.
    ///
    /// A new active segment is created whose number follows the highest
    /// segment or checkpoint boundary already present.
    pub fn open(dir: impl Into<PathBuf>, segment_size: u64) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let last_segment = list_segments(&dir)?.last().copied().unwrap_or(0);
        let last_checkpoint = list_checkpoints(&dir)?.last().copied().unwrap_or(0);
        let first = last_segment.max(last_checkpoint) + 1;

        let session_id = *Uuid::new_v4().as_bytes();
        let active = WalSegment::create(&dir, first, session_id)?;
        sync_dir(&dir)?;

        info!(
            target: "tidelog::wal",
            dir = %dir.display(),
            segment = first,
            session = %Uuid::from_bytes(session_id),
            "Opened WAL"
        );

        Ok(SegmentedLog {
            dir,
            segment_size,
            session_id,
            state: Mutex::new(LogState {
                active: Some(active),
                next_segment: first + 1,
                closed: false,
            }),
        })
    }

    /// WAL directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of the segment currently accepting writes
    pub fn active_segment(&self) -> Option<u64> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(WalSegment::segment_number)
    }

    /// Append one record payload.
    ///
    /// Returns the number of bytes written, framing included. Rotates to a
    /// new segment first if the frame would push the active segment past
    /// the size limit; a frame larger than the limit still goes into a
    /// segment of its own. A payload larger than [`MAX_FRAME_PAYLOAD`] is
    /// refused with [`LogError::RecordTooLarge`] before anything is written.
    pub fn log(&self, payload: &[u8]) -> Result<u64, LogError> {
        let mut frame = record_pool().bytes_guard();
        encode_frame(payload, &mut frame).map_err(|_| LogError::RecordTooLarge {
            length: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        })?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(LogError::Closed);
        }

        let needs_rotation = match state.active.as_ref() {
            Some(seg) => {
                seg.size() > SEGMENT_HEADER_SIZE as u64
                    && seg.size() + frame.len() as u64 > self.segment_size
            }
            None => true,
        };
        if needs_rotation {
            self.rotate(&mut state)?;
        }

        match state.active.as_mut() {
            Some(seg) => seg.write(&frame)?,
            None => return Err(LogError::Closed),
        }
        Ok(frame.len() as u64)
    }

    /// Close the active segment and start a new one.
    ///
    /// Returns the number of the segment that was closed. Every record
    /// appended before this call is in a segment with that number or lower.
    pub fn next_segment(&self) -> Result<u64, LogError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LogError::Closed);
        }
        self.rotate(&mut state)
    }

    fn rotate(&self, state: &mut LogState) -> Result<u64, LogError> {
        let closed = match state.active.take() {
            Some(mut seg) => {
                seg.close()?;
                seg.segment_number()
            }
            None => state.next_segment - 1,
        };

        let number = state.next_segment;
        let seg = WalSegment::create(&self.dir, number, self.session_id)?;
        sync_dir(&self.dir)?;
        state.active = Some(seg);
        state.next_segment = number + 1;

        debug!(target: "tidelog::wal", closed, active = number, "Rotated WAL segment");
        Ok(closed)
    }

    /// Segment numbers present on disk, ascending
    pub fn segments(&self) -> Result<Vec<u64>, LogError> {
        Ok(list_segments(&self.dir)?)
    }

    /// Delete every segment numbered `boundary` or lower.
    ///
    /// The active segment is never deleted. Individual deletion failures
    /// are logged and reported, not returned as errors.
    pub fn truncate(&self, boundary: u64) -> Result<SegmentRemoval, LogError> {
        let active = self.active_segment();
        let mut removal = SegmentRemoval::default();

        for number in list_segments(&self.dir)? {
            if number > boundary || Some(number) == active {
                continue;
            }
            match fs::remove_file(segment_path(&self.dir, number)) {
                Ok(()) => removal.removed.push(number),
                Err(e) => {
                    warn!(
                        target: "tidelog::wal",
                        segment = number,
                        error = %e,
                        "Failed to remove WAL segment"
                    );
                    removal.failed.push(number);
                }
            }
        }

        if !removal.removed.is_empty() {
            if let Err(e) = sync_dir(&self.dir) {
                warn!(target: "tidelog::wal", error = %e, "Failed to sync WAL directory");
            }
        }
        Ok(removal)
    }

    /// Sync and close the active segment.
    ///
    /// Idempotent. After closing, appends fail with [`LogError::Closed`].
    pub fn close(&self) -> Result<(), LogError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if let Some(mut seg) = state.active.take() {
            seg.close()?;
            info!(
                target: "tidelog::wal",
                segment = seg.segment_number(),
                bytes = seg.size(),
                "Closed WAL"
            );
        }
        Ok(())
    }

    /// True once [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::segment::open_segment_frames;
    use crate::format::checkpoint::checkpoint_path;
    use tempfile::tempdir;

    fn read_all(dir: &Path, segment: u64) -> Vec<Vec<u8>> {
        let (_, mut frames) = open_segment_frames(dir, segment).unwrap();
        let mut out = Vec::new();
        while let Some(f) = frames.next_frame().unwrap() {
            out.push(f.to_vec());
        }
        out
    }

    #[test]
    fn test_open_creates_dir_and_first_segment() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("nested").join("wal");
        let log = SegmentedLog::open(&wal_dir, 1024 * 1024).unwrap();
        assert_eq!(log.active_segment(), Some(1));
        assert_eq!(log.segments().unwrap(), vec![1]);
    }

    #[test]
    fn test_reopen_starts_fresh_segment() {
        let dir = tempdir().unwrap();
        {
            let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
            log.log(b"first run").unwrap();
            log.close().unwrap();
        }
        let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(log.active_segment(), Some(2));
        assert_eq!(read_all(dir.path(), 1), vec![b"first run".to_vec()]);
    }

    #[test]
    fn test_open_numbers_past_checkpoints() {
        let dir = tempdir().unwrap();
        fs::write(checkpoint_path(dir.path(), 9), b"").unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(log.active_segment(), Some(10));
    }

    #[test]
    fn test_rotation_on_size() {
        let dir = tempdir().unwrap();
        let log = SegmentedLog::open(dir.path(), 200).unwrap();
        for _ in 0..10 {
            log.log(&[7u8; 50]).unwrap();
        }
        let segments = log.segments().unwrap();
        assert!(segments.len() > 1);

        let total: usize = segments.iter().map(|&s| read_all(dir.path(), s).len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_oversized_record_gets_own_segment() {
        let dir = tempdir().unwrap();
        let log = SegmentedLog::open(dir.path(), 100).unwrap();
        log.log(&[1u8; 500]).unwrap();
        log.log(&[2u8; 10]).unwrap();
        log.close().unwrap();
        assert_eq!(read_all(dir.path(), 1).len(), 1);
        assert_eq!(read_all(dir.path(), 2).len(), 1);
    }

    #[test]
    fn test_next_segment_returns_closed_number() {
        let dir = tempdir().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
        log.log(b"a").unwrap();
        assert_eq!(log.next_segment().unwrap(), 1);
        assert_eq!(log.active_segment(), Some(2));
        assert_eq!(log.next_segment().unwrap(), 2);
    }

    #[test]
    fn test_truncate_keeps_active_and_later() {
        let dir = tempdir().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
        log.next_segment().unwrap();
        log.next_segment().unwrap();
        log.next_segment().unwrap(); // active = 4

        let removal = log.truncate(2).unwrap();
        assert_eq!(removal.removed, vec![1, 2]);
        assert!(removal.failed.is_empty());
        assert_eq!(log.segments().unwrap(), vec![3, 4]);

        let removal = log.truncate(100).unwrap();
        assert_eq!(removal.removed, vec![3]);
        assert_eq!(log.segments().unwrap(), vec![4]);
    }

    #[test]
    fn test_closed_log_rejects_appends() {
        let dir = tempdir().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
        log.close().unwrap();
        log.close().unwrap();
        assert!(log.is_closed());
        assert!(matches!(log.log(b"late"), Err(LogError::Closed)));
        assert!(matches!(log.next_segment(), Err(LogError::Closed)));
    }

    #[test]
    fn test_log_reports_framed_bytes() {
        let dir = tempdir().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(log.log(b"12345").unwrap(), 5 + 8);
    }

    #[test]
    fn test_oversized_record_is_refused_and_log_stays_readable() {
        let dir = tempdir().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024).unwrap();
        log.log(b"before").unwrap();

        let oversized = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        assert!(matches!(
            log.log(&oversized),
            Err(LogError::RecordTooLarge { length, max })
                if length == MAX_FRAME_PAYLOAD + 1 && max == MAX_FRAME_PAYLOAD
        ));

        log.log(b"after").unwrap();
        log.close().unwrap();
        assert_eq!(log.segments().unwrap(), vec![1]);
        assert_eq!(
            read_all(dir.path(), 1),
            vec![b"before".to_vec(), b"after".to_vec()]
        );
    }
}
