//! A hand-driven WebSocket client for provoking server behaviour that a
//! well-behaved [`ClientConnection`](muxframe::ClientConnection) never
//! shows.

use std::{
    io,
    net::{SocketAddr, TcpStream},
    time::{Duration, Instant},
};

use bytes::BytesMut;
use muxframe::{
    codec::{SubMessages, write_sub_message},
    service::MessageRoute,
    transport::HandshakeParams,
};
use tokio_tungstenite::tungstenite::{self, Message, WebSocket, protocol::frame::coding::CloseCode};

const READ_SLICE: Duration = Duration::from_millis(20);

/// Blocking WebSocket peer speaking the wire format by hand.
pub struct RawPeer {
    ws: WebSocket<TcpStream>,
    close: Option<(CloseCode, String)>,
}

impl std::fmt::Debug for RawPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPeer").field("close", &self.close).finish_non_exhaustive()
    }
}

impl RawPeer {
    /// Complete a handshake with the server at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot connect or the server refuses
    /// the handshake.
    pub fn connect(addr: SocketAddr, params: &HandshakeParams) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let url = params.url(&addr.ip().to_string(), addr.port());
        let (ws, _response) = tungstenite::client(url, stream).map_err(|e| io::Error::other(e.to_string()))?;
        ws.get_ref().set_read_timeout(Some(READ_SLICE))?;
        Ok(Self { ws, close: None })
    }

    /// Send one transport message packing `parts` in order.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the frame cannot be written.
    pub fn send_batch(&mut self, parts: &[(MessageRoute, &[u8])]) -> Result<(), tungstenite::Error> {
        let mut buffer = BytesMut::new();
        for (route, payload) in parts {
            write_sub_message(&mut buffer, route.service, route.message, payload);
        }
        self.send_raw(buffer.to_vec())
    }

    /// Send `bytes` as a binary message without any framing.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the frame cannot be written.
    pub fn send_raw(&mut self, bytes: Vec<u8>) -> Result<(), tungstenite::Error> {
        self.ws.send(Message::Binary(bytes))
    }

    /// Send a text control message.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the frame cannot be written.
    pub fn send_text(&mut self, text: &str) -> Result<(), tungstenite::Error> {
        self.ws.send(Message::Text(text.to_owned()))
    }

    /// Read for up to one short slice.
    ///
    /// Returns `None` when nothing arrived. A close frame is remembered and
    /// surfaced through [`RawPeer::close_frame`].
    pub fn poll(&mut self) -> Option<Message> {
        match self.ws.read() {
            Ok(Message::Close(frame)) => {
                let frame = frame.map_or((CloseCode::Status, String::new()), |f| {
                    (f.code, f.reason.into_owned())
                });
                self.close = Some(frame);
                None
            }
            Ok(Message::Ping(_) | Message::Pong(_)) | Err(_) => None,
            Ok(message) => Some(message),
        }
    }

    /// Wait up to `timeout` for the next binary message, returning its
    /// sub-message routes and payloads.
    pub fn next_batch(&mut self, timeout: Duration) -> Option<Vec<(MessageRoute, Vec<u8>)>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline && self.close.is_none() {
            if let Some(Message::Binary(data)) = self.poll() {
                return Some(
                    SubMessages::new(&data)
                        .filter_map(Result::ok)
                        .map(|m| (MessageRoute::new(m.service, m.message), m.payload.to_vec()))
                        .collect(),
                );
            }
        }
        None
    }

    /// Close code and reason the server sent, once seen.
    #[must_use]
    pub fn close_frame(&self) -> Option<&(CloseCode, String)> { self.close.as_ref() }

    /// Keep reading until the server closes or `timeout` elapses, calling
    /// `between` after every read slice.
    pub fn wait_for_close(&mut self, timeout: Duration, mut between: impl FnMut()) -> Option<(CloseCode, String)> {
        let deadline = Instant::now() + timeout;
        while self.close.is_none() && Instant::now() < deadline {
            let _ = self.poll();
            between();
        }
        self.close.clone()
    }
}
