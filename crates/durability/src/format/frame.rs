//! Length + CRC32 framing for records stored in segments and checkpoints.
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Payload (Length bytes)  │ CRC32 (4)│
//! └─────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! Length and CRC are little-endian. The CRC covers the payload only.

use crc32fast::Hasher;
use std::io::{self, Read};

/// Bytes added around every payload
pub const FRAME_OVERHEAD: usize = 8;

/// Largest payload a reader will accept.
///
/// Guards against allocating for a garbage length field.
pub const MAX_FRAME_PAYLOAD: usize = 256 * 1024 * 1024;

/// Compute the CRC32 of a payload.
pub fn compute_crc(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Append a framed payload to `out`.
///
/// Payloads a [`FrameReader`] would reject (empty, or larger than
/// [`MAX_FRAME_PAYLOAD`]) are refused and `out` is left untouched.
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    if payload.is_empty() || payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadSize {
            length: payload.len(),
        });
    }
    out.reserve(payload.len() + FRAME_OVERHEAD);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&compute_crc(payload).to_le_bytes());
    Ok(())
}

/// Reasons a frame could not be read.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Underlying read failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Input ended inside a frame
    #[error("truncated frame at offset {offset}")]
    Truncated {
        /// Offset of the frame start
        offset: u64,
    },

    /// Stored checksum does not match the payload
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Offset of the frame start
        offset: u64,
        /// Checksum stored in the frame
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Length field is zero or implausibly large
    #[error("invalid frame length {length} at offset {offset}")]
    InvalidLength {
        /// Offset of the frame start
        offset: u64,
        /// Decoded length
        length: u32,
    },

    /// Payload cannot be framed
    #[error("payload of {length} bytes cannot be framed (limit {})", MAX_FRAME_PAYLOAD)]
    PayloadSize {
        /// Payload length
        length: usize,
    },
}

impl FrameError {
    /// Offset of the frame that failed, if the failure was positional
    pub fn offset(&self) -> Option<u64> {
        match self {
            FrameError::Io(_) | FrameError::PayloadSize { .. } => None,
            FrameError::Truncated { offset }
            | FrameError::ChecksumMismatch { offset, .. }
            | FrameError::InvalidLength { offset, .. } => Some(*offset),
        }
    }
}

/// Sequential frame reader.
///
/// Tracks the byte offset of the end of the last good frame so callers can
/// truncate a damaged file back to it.
pub struct FrameReader<R> {
    inner: R,
    offset: u64,
    buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    /// Read frames from `inner`, whose current position is `start_offset`.
    pub fn new(inner: R, start_offset: u64) -> Self {
        FrameReader {
            inner,
            offset: start_offset,
            buf: Vec::new(),
        }
    }

    /// Offset just past the last frame successfully returned
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next frame payload.
    ///
    /// Returns `Ok(None)` on a clean end of input (no bytes left at a frame
    /// boundary). The returned slice is valid until the next call.
    pub fn next_frame(&mut self) -> Result<Option<&[u8]>, FrameError> {
        let start = self.offset;

        let mut len_bytes = [0u8; 4];
        let got = read_full(&mut self.inner, &mut len_bytes)?;
        if got == 0 {
            return Ok(None);
        }
        if got < len_bytes.len() {
            return Err(FrameError::Truncated { offset: start });
        }

        let length = u32::from_le_bytes(len_bytes);
        if length == 0 || length as usize > MAX_FRAME_PAYLOAD {
            return Err(FrameError::InvalidLength {
                offset: start,
                length,
            });
        }

        let total = length as usize + 4;
        self.buf.clear();
        self.buf.resize(total, 0);
        if read_full(&mut self.inner, &mut self.buf)? < total {
            return Err(FrameError::Truncated { offset: start });
        }

        let (payload, crc_bytes) = self.buf.split_at(length as usize);
        let mut stored = [0u8; 4];
        stored.copy_from_slice(crc_bytes);
        let expected = u32::from_le_bytes(stored);
        let actual = compute_crc(payload);
        if expected != actual {
            return Err(FrameError::ChecksumMismatch {
                offset: start,
                expected,
                actual,
            });
        }

        self.offset = start + 4 + total as u64;
        Ok(Some(&self.buf[..length as usize]))
    }
}

/// Fill `buf` as far as the input allows, returning the bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}
