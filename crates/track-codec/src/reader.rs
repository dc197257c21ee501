use bytes::{Buf, Bytes};

use crate::error::DecodeError;

/// Sequential, bounds-checked reader over an encoded track.
///
/// Every read checks the remaining length first, so a truncated payload
/// surfaces as [`DecodeError::UnexpectedEof`] instead of a panic inside
/// [`Buf`].
pub struct TrackReader {
    buffer: Bytes,
    start_len: usize,
}

impl TrackReader {
    pub fn new(buffer: Bytes) -> Self {
        let start_len = buffer.len();
        Self { buffer, start_len }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.start_len - self.buffer.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buffer.has_remaining()
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buffer.remaining() < needed {
            return Err(DecodeError::UnexpectedEof {
                offset: self.offset(),
                needed,
                remaining: self.buffer.remaining(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buffer.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buffer.get_u16())
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buffer.get_u32())
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buffer.get_i32())
    }

    #[inline]
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buffer.get_i64())
    }

    /// Reads a u16 length-prefixed UTF-8 string.
    pub fn read_utf(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let offset = self.offset();
        let raw = self.read_slice(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    /// Reads a presence byte followed by a string when the byte is non-zero.
    pub fn read_optional_utf(&mut self) -> Result<Option<String>, DecodeError> {
        if self.read_bool()? {
            self.read_utf().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Splits off the next `len` bytes without copying.
    pub fn read_slice(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        self.ensure(len)?;
        Ok(self.buffer.split_to(len))
    }
}
