//! Message accumulation and the tick-to-I/O send pipeline.
//!
//! Logical messages are framed into a per-link accumulation buffer and only
//! leave it on a flush: from `update()`, from the I/O thread's flush timer,
//! or eagerly when the next sub-message would push the buffer past the
//! configured maximum send size. Each flush becomes one binary transport
//! message.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{
    codec::{MessageWriter, sub_message_len, write_sub_message},
    profiler::Profiler,
    service::MessageRoute,
};

/// Errors returned when finishing an outgoing message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// No transport is open or connecting.
    #[error("not connected")]
    NotConnected,
    /// The payload alone exceeds the configured maximum send size.
    #[error("message of {size} bytes exceeds the {max} byte send limit")]
    MessageTooLarge {
        /// Payload size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// The route uses the reserved id 0.
    #[error("route {0} uses a reserved id")]
    InvalidRoute(MessageRoute),
}

/// Work handed from the tick thread to the I/O task.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// One outer frame, sent as a single binary message.
    Batch(Bytes),
    /// Close the transport with `code` after everything queued before it.
    Close { code: CloseCode, reason: String },
}

pub(crate) type OutboundTx = mpsc::UnboundedSender<Outbound>;
pub(crate) type OutboundRx = mpsc::UnboundedReceiver<Outbound>;

#[derive(Debug, Default)]
struct Pending {
    buf: BytesMut,
    tx: Option<OutboundTx>,
}

/// Mutex-guarded accumulation buffer for one link.
///
/// The sender lives under the same lock as the buffer, so batches reach the
/// I/O task in the order they were framed.
#[derive(Debug)]
pub(crate) struct Accumulator {
    pending: Mutex<Pending>,
    max_send_size: usize,
}

impl Accumulator {
    pub(crate) fn new(max_send_size: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            max_send_size,
        }
    }

    /// Start accepting messages for a new transport.
    pub(crate) fn attach(&self, tx: OutboundTx) {
        let mut pending = self.pending.lock();
        pending.buf.clear();
        pending.tx = Some(tx);
    }

    /// Stop accepting messages, discarding anything unflushed.
    pub(crate) fn detach(&self) {
        let mut pending = self.pending.lock();
        pending.buf.clear();
        pending.tx = None;
    }

    pub(crate) fn is_attached(&self) -> bool { self.pending.lock().tx.is_some() }

    /// Frame one sub-message into the buffer, flushing first if it would
    /// overflow `max_send_size`.
    pub(crate) fn append(&self, route: MessageRoute, payload: &[u8]) -> Result<usize, SendError> {
        if payload.len() > self.max_send_size {
            return Err(SendError::MessageTooLarge {
                size: payload.len(),
                max: self.max_send_size,
            });
        }
        let framed = sub_message_len(payload.len());
        let mut pending = self.pending.lock();
        if pending.tx.is_none() {
            return Err(SendError::NotConnected);
        }
        if !pending.buf.is_empty() && pending.buf.len() + framed > self.max_send_size {
            Self::send_buffered(&mut pending);
        }
        write_sub_message(&mut pending.buf, route.service, route.message, payload);
        Ok(framed)
    }

    /// Hand the buffer to the I/O task. Returns the number of bytes flushed.
    pub(crate) fn flush(&self) -> usize { Self::send_buffered(&mut self.pending.lock()) }

    /// Flush, then queue a close behind the flushed batch.
    pub(crate) fn close(&self, code: CloseCode, reason: &str) {
        let mut pending = self.pending.lock();
        Self::send_buffered(&mut pending);
        if let Some(tx) = pending.tx.as_ref() {
            let _ = tx.send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            });
        }
    }

    fn send_buffered(pending: &mut Pending) -> usize {
        if pending.buf.is_empty() {
            return 0;
        }
        let batch = pending.buf.split().freeze();
        let len = batch.len();
        // A closed receiver means the transport is going away; the batch is
        // dropped along with it.
        if let Some(tx) = pending.tx.as_ref() {
            let _ = tx.send(Outbound::Batch(batch));
        }
        len
    }
}

/// A message under construction, returned by `begin_message`.
///
/// Write the payload through the [`MessageWriter`] methods this derefs to,
/// then call [`end`](Self::end). Dropping it without `end` discards it.
///
/// # Examples
///
/// ```no_run
/// use muxframe::{client::ClientConnection, service::MessageRoute};
///
/// # fn send(connection: &ClientConnection) -> Result<(), muxframe::batch::SendError> {
/// let mut message = connection.begin_message(MessageRoute::new(2, 1));
/// message.write_string("hello").write_u32(7);
/// message.tag("greeting").end()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
#[must_use = "an outgoing message is only sent once `end` is called"]
pub struct OutgoingMessage {
    route: MessageRoute,
    writer: MessageWriter,
    tag: Option<String>,
    targets: Vec<Arc<Accumulator>>,
    profiler: Arc<Profiler>,
    fail_if_unsent: bool,
}

impl OutgoingMessage {
    pub(crate) fn new(
        route: MessageRoute,
        targets: Vec<Arc<Accumulator>>,
        profiler: Arc<Profiler>,
        fail_if_unsent: bool,
    ) -> Self {
        Self {
            route,
            writer: MessageWriter::new(),
            tag: None,
            targets,
            profiler,
            fail_if_unsent,
        }
    }

    /// Route the message will be sent on.
    #[must_use]
    pub fn route(&self) -> MessageRoute { self.route }

    /// Attach a custom profiler tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Frame the payload into every recipient's accumulation buffer.
    ///
    /// Returns the number of recipients the message was queued for.
    /// Recipients that disconnected since `begin_message` are skipped.
    ///
    /// # Errors
    ///
    /// - [`SendError::InvalidRoute`] for a route using id 0.
    /// - [`SendError::MessageTooLarge`] for an oversized payload.
    /// - [`SendError::NotConnected`] when a single-recipient message has no
    ///   open transport.
    pub fn end(self) -> Result<usize, SendError> {
        if !self.route.is_valid() {
            return Err(SendError::InvalidRoute(self.route));
        }
        let payload = self.writer.as_slice();
        let mut delivered = 0_usize;
        let mut framed = 0;
        for target in &self.targets {
            match target.append(self.route, payload) {
                Ok(len) => {
                    delivered += 1;
                    framed = len;
                }
                Err(SendError::NotConnected) if !self.fail_if_unsent => {}
                Err(err) => return Err(err),
            }
        }
        if delivered == 0 && self.fail_if_unsent {
            return Err(SendError::NotConnected);
        }
        self.profiler
            .record_sent(self.route, self.tag.as_deref(), delivered as u64, framed as u64);
        Ok(delivered)
    }
}

impl Deref for OutgoingMessage {
    type Target = MessageWriter;

    fn deref(&self) -> &Self::Target { &self.writer }
}

impl DerefMut for OutgoingMessage {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.writer }
}
