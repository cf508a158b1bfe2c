//! Cursor-based reader over a borrowed payload.

use bincode::{Decode, config};

use super::{ReadError, varint};

/// Sequential little-endian reader over a byte slice.
///
/// Every accessor either consumes exactly the bytes it decodes or fails,
/// leaving the cursor where it was.
///
/// # Examples
///
/// ```
/// use muxframe::codec::MessageReader;
///
/// let mut reader = MessageReader::new(&[0x2a, 0x03, b'a', b'b', b'c']);
/// assert_eq!(reader.read_u8().unwrap(), 42);
/// assert_eq!(reader.read_string().unwrap(), "abc");
/// assert!(reader.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($(#[$doc:meta] $name:ident => $ty:ty),* $(,)?) => {
        $(
            #[$doc]
            ///
            /// # Errors
            ///
            /// Returns [`ReadError::Overflow`] if too few bytes remain.
            pub fn $name(&mut self) -> Result<$ty, ReadError> {
                let bytes = self.read_array::<{ size_of::<$ty>() }>()?;
                Ok(<$ty>::from_le_bytes(bytes))
            }
        )*
    };
}

impl<'a> MessageReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    /// Returns `true` once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.remaining() == 0 }

    /// Current cursor offset from the start of the buffer.
    #[must_use]
    pub fn position(&self) -> usize { self.pos }

    /// The unread tail, without consuming it.
    #[must_use]
    pub fn peek_rest(&self) -> &'a [u8] { &self.buf[self.pos..] }

    /// Consume exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Overflow`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        let available = self.remaining();
        if len > available {
            return Err(ReadError::Overflow {
                needed: len,
                available,
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Consume the rest of the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Overflow`] on an exhausted buffer.
    pub fn read_u8(&mut self) -> Result<u8, ReadError> { Ok(self.read_bytes(1)?[0]) }

    /// Read a boolean encoded as one byte; any non-zero value is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Overflow`] on an exhausted buffer.
    pub fn read_bool(&mut self) -> Result<bool, ReadError> { Ok(self.read_u8()? != 0) }

    read_le! {
        /// Read a little-endian `u16`.
        read_u16 => u16,
        /// Read a little-endian `u32`.
        read_u32 => u32,
        /// Read a little-endian `u64`.
        read_u64 => u64,
        /// Read a little-endian `i16`.
        read_i16 => i16,
        /// Read a little-endian `i32`.
        read_i32 => i32,
        /// Read a little-endian `i64`.
        read_i64 => i64,
        /// Read a little-endian `f32`.
        read_f32 => f32,
        /// Read a little-endian `f64`.
        read_f64 => f64,
    }

    /// Read a LEB128 `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::MalformedVarint`] if the varint is truncated or
    /// wider than 32 bits.
    pub fn read_varint_u32(&mut self) -> Result<u32, ReadError> {
        let (value, used) = varint::decode_u32(self.peek_rest())?;
        self.pos += used;
        Ok(value)
    }

    /// Read a LEB128 `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::MalformedVarint`] if the varint is truncated.
    pub fn read_varint_u64(&mut self) -> Result<u64, ReadError> {
        let (value, used) = varint::decode_u64(self.peek_rest())?;
        self.pos += used;
        Ok(value)
    }

    /// Read a varint length prefix followed by that many bytes.
    ///
    /// # Errors
    ///
    /// Fails if the prefix is malformed or overruns the buffer. The cursor is
    /// left untouched on failure.
    pub fn read_blob(&mut self) -> Result<&'a [u8], ReadError> {
        let start = self.pos;
        let len = self.read_varint_u32()? as usize;
        self.read_bytes(len).inspect_err(|_| self.pos = start)
    }

    /// Read a varint-length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Fails on overflow or invalid UTF-8.
    pub fn read_string(&mut self) -> Result<&'a str, ReadError> {
        let start = self.pos;
        let bytes = self.read_blob()?;
        std::str::from_utf8(bytes).map_err(|err| {
            self.pos = start;
            err.into()
        })
    }

    /// Decode a bincode value occupying a varint-length-prefixed blob.
    ///
    /// # Errors
    ///
    /// Fails on overflow or if the blob does not decode as `T`.
    pub fn read_bincode<T: Decode<()>>(&mut self) -> Result<T, ReadError> {
        let start = self.pos;
        let blob = self.read_blob()?;
        match bincode::decode_from_slice(blob, config::standard()) {
            Ok((value, _)) => Ok(value),
            Err(err) => {
                self.pos = start;
                Err(err.into())
            }
        }
    }
}
