//! Error types for the framing codec.
//!
//! [`ReadError`] covers primitive decoding from a [`MessageReader`]
//! (`crate::codec::MessageReader`); [`FrameError`] wraps it with the
//! structural violations specific to sub-message framing.

use thiserror::Error;

/// Errors raised while decoding primitives from a byte buffer.
#[derive(Debug, Error)]
pub enum ReadError {
    /// A read needed more bytes than remain in the buffer.
    #[error("read overflow: need {needed} bytes, {available} available")]
    Overflow {
        /// Bytes requested by the read.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A varint was truncated or does not fit the requested width.
    #[error("malformed varint")]
    MalformedVarint,

    /// A length-prefixed string was not valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A bincode payload failed to decode.
    #[error("bincode decode failed: {0}")]
    Bincode(#[from] bincode::error::DecodeError),
}

impl ReadError {
    /// Returns `true` for errors caused by running out of input.
    #[must_use]
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow { .. } | Self::MalformedVarint)
    }
}

/// Structural errors in an outer frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A sub-message declared a length of zero.
    #[error("empty sub-message")]
    Empty,

    /// A sub-message was too short to hold both id bytes.
    #[error("sub-message of {len} bytes is missing its ids")]
    MissingIds {
        /// Declared length of the sub-message.
        len: usize,
    },

    /// A service or message id of zero was found on the wire.
    #[error("reserved id 0 in sub-message (service {service}, message {message})")]
    ReservedId {
        /// Service id as read.
        service: u8,
        /// Message id as read.
        message: u8,
    },

    /// The length prefix or body could not be read.
    #[error(transparent)]
    Read(#[from] ReadError),
}
