//! Growable little-endian payload writer.

use bincode::{Encode, config};
use bytes::{BufMut, Bytes, BytesMut};

use super::varint;

/// Little-endian writer mirroring [`MessageReader`](super::MessageReader).
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create an empty writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// View the written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Consume the writer, returning the written bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes { self.buf.freeze() }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self { self.write_u8(u8::from(value)) }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16_le(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.buf.put_f32_le(value);
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.buf.put_f64_le(value);
        self
    }

    pub fn write_varint_u32(&mut self, value: u32) -> &mut Self {
        varint::put_u32(&mut self.buf, value);
        self
    }

    pub fn write_varint_u64(&mut self, value: u64) -> &mut Self {
        varint::put_u64(&mut self.buf, value);
        self
    }

    /// Append raw bytes with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Append a varint length prefix followed by `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than `u32::MAX`.
    pub fn write_blob(&mut self, bytes: &[u8]) -> &mut Self {
        let len = u32::try_from(bytes.len()).expect("blob length exceeds u32::MAX");
        self.write_varint_u32(len).write_bytes(bytes)
    }

    /// Append a varint-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> &mut Self { self.write_blob(value.as_bytes()) }

    /// Encode `value` with bincode into a length-prefixed blob.
    ///
    /// # Errors
    ///
    /// Returns the bincode error if `value` cannot be encoded; nothing is
    /// written in that case.
    pub fn write_bincode<T: Encode>(
        &mut self,
        value: &T,
    ) -> Result<&mut Self, bincode::error::EncodeError> {
        let encoded = bincode::encode_to_vec(value, config::standard())?;
        Ok(self.write_blob(&encoded))
    }
}
