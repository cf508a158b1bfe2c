//! Sub-message framing within an outer transport message.

use bytes::{BufMut, BytesMut};

use super::{FrameError, MessageReader, varint};

/// One decoded sub-message, borrowing its payload from the outer buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMessage<'a> {
    /// Owning service identifier (1..=255).
    pub service: u8,
    /// Message type identifier within the service (1..=255).
    pub message: u8,
    /// Payload bytes following the two id bytes.
    pub payload: &'a [u8],
}

impl<'a> SubMessage<'a> {
    /// A fresh reader over this sub-message's payload.
    #[must_use]
    pub fn reader(&self) -> MessageReader<'a> { MessageReader::new(self.payload) }
}

/// Total bytes `write_sub_message` appends for a payload of `payload_len`.
#[must_use]
pub fn sub_message_len(payload_len: usize) -> usize {
    let body = payload_len + 2;
    varint::encoded_len(body as u64) + body
}

/// Append `[varint(len)][service][message][payload]` to `buffer`.
///
/// # Panics
///
/// Panics if the body length does not fit in a `u32`.
pub fn write_sub_message(buffer: &mut BytesMut, service: u8, message: u8, payload: &[u8]) {
    debug_assert!(service != 0 && message != 0, "ids 0 are reserved");
    let body = u32::try_from(payload.len() + 2).expect("sub-message exceeds u32::MAX bytes");
    buffer.reserve(sub_message_len(payload.len()));
    varint::put_u32(buffer, body);
    buffer.put_u8(service);
    buffer.put_u8(message);
    buffer.put_slice(payload);
}

/// Read one sub-message and advance `reader` past it.
///
/// # Errors
///
/// - [`FrameError::Empty`] for a zero length prefix.
/// - [`FrameError::MissingIds`] when the body cannot hold both ids.
/// - [`FrameError::ReservedId`] when either id is zero.
/// - [`FrameError::Read`] when the prefix or body overruns the buffer.
pub fn read_sub_message<'a>(reader: &mut MessageReader<'a>) -> Result<SubMessage<'a>, FrameError> {
    let len = reader.read_varint_u32()? as usize;
    match len {
        0 => return Err(FrameError::Empty),
        1 => return Err(FrameError::MissingIds { len }),
        _ => {}
    }
    let body = reader.read_bytes(len)?;
    let (service, message) = (body[0], body[1]);
    if service == 0 || message == 0 {
        return Err(FrameError::ReservedId { service, message });
    }
    Ok(SubMessage {
        service,
        message,
        payload: &body[2..],
    })
}

/// Iterator over the sub-messages of an outer frame.
///
/// Yields `Err` at most once; iteration stops after the first error.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use muxframe::codec::{SubMessages, write_sub_message};
///
/// let mut outer = BytesMut::new();
/// write_sub_message(&mut outer, 1, 2, b"hi");
/// write_sub_message(&mut outer, 3, 4, b"");
///
/// let parsed: Vec<_> = SubMessages::new(&outer)
///     .map(|m| m.map(|m| (m.service, m.message, m.payload.to_vec())))
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(parsed, vec![(1, 2, b"hi".to_vec()), (3, 4, vec![])]);
/// ```
#[derive(Debug)]
pub struct SubMessages<'a> {
    reader: MessageReader<'a>,
    failed: bool,
}

impl<'a> SubMessages<'a> {
    /// Iterate over the sub-messages packed into `outer`.
    #[must_use]
    pub fn new(outer: &'a [u8]) -> Self {
        Self {
            reader: MessageReader::new(outer),
            failed: false,
        }
    }
}

impl<'a> Iterator for SubMessages<'a> {
    type Item = Result<SubMessage<'a>, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let item = read_sub_message(&mut self.reader);
        self.failed = item.is_err();
        Some(item)
    }
}
