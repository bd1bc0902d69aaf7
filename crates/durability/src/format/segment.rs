//! WAL segment files.
//!
//! WAL segments are named `wal-NNNNNN.seg` where `NNNNNN` is a zero-padded segment number.
//!
//! # Segment Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (32 bytes)          │
//! ├────────────────────────────────────┤
//! │ Frame 1                            │
//! ├────────────────────────────────────┤
//! │ Frame 2                            │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! Frames are described in [`frame`](super::frame). Each frame holds one
//! encoded Series or Entries record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use super::frame::FrameReader;

/// Magic bytes identifying a WAL segment file: "TDWL"
pub const SEGMENT_MAGIC: [u8; 4] = *b"TDWL";

/// Current segment format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 32;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".seg";

/// WAL segment header (32 bytes).
///
/// The session id changes every time a writer opens the log, which makes it
/// possible to tell which process run produced a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes: "TDWL"
    pub magic: [u8; 4],

    /// Format version for forward compatibility
    pub format_version: u32,

    /// Segment number (monotonically increasing)
    pub segment_number: u64,

    /// Writer session UUID
    pub session_id: [u8; 16],
}

impl SegmentHeader {
    /// Create a new segment header.
    pub fn new(segment_number: u64, session_id: [u8; 16]) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
            session_id,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes[16..32].copy_from_slice(&self.session_id);
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        let mut number = [0u8; 8];
        number.copy_from_slice(&bytes[8..16]);
        let mut session_id = [0u8; 16];
        session_id.copy_from_slice(&bytes[16..32]);

        SegmentHeader {
            magic,
            format_version: u32::from_le_bytes(version),
            segment_number: u64::from_le_bytes(number),
            session_id,
        }
    }

    /// Validate magic and version.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC && self.format_version == SEGMENT_FORMAT_VERSION
    }
}

/// The active, writable WAL segment.
///
/// Closed segments are never reopened for writing; readers go through
/// [`open_segment_frames`].
pub struct WalSegment {
    file: File,
    segment_number: u64,
    write_position: u64,
    closed: bool,
}

impl WalSegment {
    /// Create a new WAL segment.
    ///
    /// Creates a new segment file and writes the header. Fails if the file
    /// already exists.
    pub fn create(dir: &Path, segment_number: u64, session_id: [u8; 16]) -> io::Result<Self> {
        let path = segment_path(dir, segment_number);

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;

        let header = SegmentHeader::new(segment_number, session_id);
        file.write_all(&header.to_bytes())?;

        Ok(WalSegment {
            file,
            segment_number,
            write_position: SEGMENT_HEADER_SIZE as u64,
            closed: false,
        })
    }

    /// Get segment number.
    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    /// Get current segment size in bytes.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Write bytes to segment and update write position.
    ///
    /// Returns an error if the segment is closed.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "Cannot write to closed segment",
            ));
        }

        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    /// Mark segment as closed (immutable).
    ///
    /// Syncs data to disk before closing.
    pub fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.file.sync_all()?;
            self.closed = true;
        }
        Ok(())
    }
}

/// Generate segment file path.
///
/// Format: `wal-NNNNNN.seg` where NNNNNN is zero-padded segment number.
pub fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", SEGMENT_PREFIX, segment_number, SEGMENT_SUFFIX))
}

/// Parse a segment number out of a file name, if it is a segment file.
pub fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// List segment numbers in `dir`, ascending.
///
/// A missing directory has no segments.
pub fn list_segments(dir: &Path) -> io::Result<Vec<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(n) = entry.file_name().to_str().and_then(parse_segment_name) {
            segments.push(n);
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

/// Open a closed segment for sequential frame reads.
///
/// Validates the header, including that the stored number matches the file
/// name. The returned reader is positioned at the first frame.
pub fn open_segment_frames(
    dir: &Path,
    segment_number: u64,
) -> io::Result<(SegmentHeader, FrameReader<BufReader<File>>)> {
    let path = segment_path(dir, segment_number);
    let mut file = BufReader::new(File::open(&path)?);

    let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
    file.read_exact(&mut header_bytes)?;
    let header = SegmentHeader::from_bytes(&header_bytes);

    if !header.is_valid() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid segment magic bytes",
        ));
    }

    if header.segment_number != segment_number {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Segment number mismatch: expected {}, got {}",
                segment_number, header.segment_number
            ),
        ));
    }

    Ok((header, FrameReader::new(file, SEGMENT_HEADER_SIZE as u64)))
}

/// Truncate a segment file to `len` bytes and sync it.
///
/// Used by replay repair to cut a segment back to its last valid frame.
pub fn truncate_segment(dir: &Path, segment_number: u64, len: u64) -> io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(segment_path(dir, segment_number))?;
    file.set_len(len)?;
    file.sync_all()
}

/// Fsync a directory so renames and deletions inside it are durable.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::frame::encode_frame;
    use tempfile::tempdir;

    #[test]
    fn test_header_round_trip() {
        let header = SegmentHeader::new(42, [7u8; 16]);
        let parsed = SegmentHeader::from_bytes(&header.to_bytes());
        assert_eq!(header, parsed);
        assert!(parsed.is_valid());
    }

    #[test]
    fn test_bad_magic_is_invalid() {
        let mut bytes = SegmentHeader::new(1, [0; 16]).to_bytes();
        bytes[0] = b'X';
        assert!(!SegmentHeader::from_bytes(&bytes).is_valid());
    }

    #[test]
    fn test_segment_naming() {
        let path = segment_path(Path::new("/wal"), 7);
        assert_eq!(path, Path::new("/wal/wal-000007.seg"));
        assert_eq!(parse_segment_name("wal-000007.seg"), Some(7));
        assert_eq!(parse_segment_name("wal-1234567.seg"), Some(1_234_567));
        assert_eq!(parse_segment_name("checkpoint-000007.chk"), None);
        assert_eq!(parse_segment_name("wal-abc.seg"), None);
    }

    #[test]
    fn test_list_segments_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for n in [3u64, 1, 10] {
            WalSegment::create(dir.path(), n, [0; 16]).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(list_segments(dir.path()).unwrap(), vec![1, 3, 10]);
    }

    #[test]
    fn test_list_segments_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_segments(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_create_refuses_existing() {
        let dir = tempdir().unwrap();
        WalSegment::create(dir.path(), 1, [0; 16]).unwrap();
        assert!(WalSegment::create(dir.path(), 1, [0; 16]).is_err());
    }

    #[test]
    fn test_write_then_read_frames() {
        let dir = tempdir().unwrap();
        let mut seg = WalSegment::create(dir.path(), 5, [9; 16]).unwrap();
        let mut buf = Vec::new();
        encode_frame(b"hello", &mut buf).unwrap();
        seg.write(&buf).unwrap();
        seg.close().unwrap();
        assert!(seg.write(&buf).is_err());

        let (header, mut frames) = open_segment_frames(dir.path(), 5).unwrap();
        assert_eq!(header.session_id, [9; 16]);
        assert_eq!(frames.next_frame().unwrap().unwrap(), b"hello");
        assert!(frames.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_open_rejects_renamed_segment() {
        let dir = tempdir().unwrap();
        WalSegment::create(dir.path(), 1, [0; 16]).unwrap();
        fs::rename(segment_path(dir.path(), 1), segment_path(dir.path(), 2)).unwrap();
        assert!(open_segment_frames(dir.path(), 2).is_err());
    }

    #[test]
    fn test_truncate_segment() {
        let dir = tempdir().unwrap();
        let mut seg = WalSegment::create(dir.path(), 1, [0; 16]).unwrap();
        seg.write(&[1u8; 100]).unwrap();
        seg.close().unwrap();

        truncate_segment(dir.path(), 1, SEGMENT_HEADER_SIZE as u64).unwrap();
        let len = fs::metadata(segment_path(dir.path(), 1)).unwrap().len();
        assert_eq!(len, SEGMENT_HEADER_SIZE as u64);
    }
}
