//! Primitive field encoding shared by all record types
//!
//! Fixed-width integers are big-endian. Variable-width integers use LEB128
//! (`uvarint`) and zig-zag LEB128 (`varint`). Strings are a `uvarint` byte
//! length followed by UTF-8 bytes.
//!
//! [`Decoder`] checks every length against the remaining input before it
//! indexes, so truncated or corrupt input surfaces as a [`RecordError`]
//! rather than a panic.

use byteorder::{BigEndian, ByteOrder};

use super::record::RecordError;

/// Longest valid LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

/// Append-only encoder over a caller-owned buffer.
pub struct Encoder<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    /// Wrap a buffer; bytes are appended after its current contents.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Encoder { buf }
    }

    /// Append a single byte.
    #[inline]
    pub fn put_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    /// Append a big-endian `u64`.
    #[inline]
    pub fn put_be64(&mut self, v: u64) {
        let mut tmp = [0u8; 8];
        BigEndian::write_u64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
    }

    /// Append a big-endian `i64`.
    #[inline]
    pub fn put_be64_i64(&mut self, v: i64) {
        let mut tmp = [0u8; 8];
        BigEndian::write_i64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
    }

    /// Append an unsigned LEB128 integer.
    pub fn put_uvarint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    /// Append a zig-zag encoded signed integer.
    pub fn put_varint(&mut self, v: i64) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        self.put_uvarint(zigzag);
    }

    /// Append a length-prefixed string.
    pub fn put_uvarint_str(&mut self, s: &str) {
        self.put_uvarint(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Bytes in the underlying buffer, including any that were present
    /// before this encoder was created.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Bounds-checked decoder over a borrowed byte slice.
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Decode from the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// True once every byte has been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RecordError> {
        if self.buf.len() < n {
            return Err(RecordError::UnexpectedEof {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Read a single byte.
    pub fn byte(&mut self) -> Result<u8, RecordError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian `u64`.
    pub fn be64(&mut self) -> Result<u64, RecordError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    /// Read a big-endian `i64`.
    pub fn be64_i64(&mut self) -> Result<i64, RecordError> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    /// Read an unsigned LEB128 integer.
    pub fn uvarint(&mut self) -> Result<u64, RecordError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        for i in 0..MAX_VARINT_LEN {
            let b = self.byte()?;
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(RecordError::VarintOverflow);
            }
            value |= u64::from(b & 0x7f) << shift;
            if b < 0x80 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(RecordError::VarintOverflow)
    }

    /// Read a zig-zag encoded signed integer.
    pub fn varint(&mut self) -> Result<i64, RecordError> {
        let zigzag = self.uvarint()?;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    /// Read a `uvarint` that counts items of at least `min_item_size` bytes
    /// each, rejecting counts the remaining input cannot possibly hold.
    pub fn uvarint_count(&mut self, min_item_size: usize) -> Result<usize, RecordError> {
        let count = self.uvarint()?;
        let limit = (self.remaining() / min_item_size.max(1)) as u64;
        if count > limit {
            return Err(RecordError::CountOverflow {
                count,
                remaining: self.remaining(),
            });
        }
        Ok(count as usize)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn uvarint_str(&mut self) -> Result<&'a str, RecordError> {
        let len = self.uvarint()?;
        if len > self.remaining() as u64 {
            return Err(RecordError::UnexpectedEof {
                needed: len as usize,
                remaining: self.remaining(),
            });
        }
        let bytes = self.take(len as usize)?;
        std::str::from_utf8(bytes).map_err(|_| RecordError::InvalidUtf8)
    }
}
