use bytes::{BufMut, Bytes, BytesMut};

use crate::error::EncodeError;

/// Append-only writer mirroring [`crate::TrackReader`].
pub struct TrackWriter {
    buffer: BytesMut,
}

impl Default for TrackWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackWriter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.put_u8(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.put_i64(value);
    }

    /// Writes a u16 byte-length prefix followed by the UTF-8 bytes of `value`.
    pub fn write_utf(&mut self, field: &'static str, value: &str) -> Result<(), EncodeError> {
        let len = u16::try_from(value.len()).map_err(|_| EncodeError::StringTooLong {
            field,
            len: value.len(),
        })?;
        self.buffer.reserve(2 + value.len());
        self.buffer.put_u16(len);
        self.buffer.put_slice(value.as_bytes());
        Ok(())
    }

    /// Writes a presence byte, then the string if there is one.
    pub fn write_optional_utf(
        &mut self,
        field: &'static str,
        value: Option<&str>,
    ) -> Result<(), EncodeError> {
        match value {
            Some(value) => {
                self.write_bool(true);
                self.write_utf(field, value)
            }
            None => {
                self.write_bool(false);
                Ok(())
            }
        }
    }

    pub fn write_slice(&mut self, value: &[u8]) {
        self.buffer.put_slice(value);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_utf_layout() {
        let mut writer = TrackWriter::new();
        writer.write_utf("title", "hé").unwrap();
        // 'é' is two bytes in UTF-8, the prefix counts bytes.
        assert_eq!(writer.into_bytes().as_ref(), &[0x00, 0x03, b'h', 0xC3, 0xA9]);
    }

    #[test]
    fn test_write_utf_rejects_oversized_strings() {
        let mut writer = TrackWriter::new();
        let long = "x".repeat(u16::MAX as usize + 1);
        assert_eq!(
            writer.write_utf("title", &long).unwrap_err(),
            EncodeError::StringTooLong {
                field: "title",
                len: 65536
            }
        );
        assert!(writer.is_empty());
    }

    #[test]
    fn test_optional_presence_byte() {
        let mut writer = TrackWriter::new();
        writer.write_optional_utf("uri", None).unwrap();
        writer.write_optional_utf("uri", Some("a")).unwrap();
        assert_eq!(writer.into_bytes().as_ref(), &[0x00, 0x01, 0x00, 0x01, b'a']);
    }
}
