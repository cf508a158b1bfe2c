//! WebSocket transport details shared by both ends of a link.
//!
//! The handshake carries the client's version, requested keep-alive and
//! login attribute block in the request URL's query string:
//!
//! ```text
//! ws://host:port/?ClientVersion=1.2&KeepAlive=10&LoginData=UserRole%3DPlayer
//! ```

use std::{borrow::Cow, time::Duration};

use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::{
    CloseFrame,
    WebSocketConfig,
    frame::coding::CloseCode,
};

use crate::attributes::{AttributeBlock, AttributeError};

/// Longest close reason sent on the wire, in characters.
pub const MAX_CLOSE_REASON: usize = 110;

const CLIENT_VERSION: &str = "ClientVersion";
const KEEP_ALIVE: &str = "KeepAlive";
const LOGIN_DATA: &str = "LoginData";

/// Parameters the client embeds in the handshake URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandshakeParams {
    /// Free-form client build identifier.
    pub client_version: String,
    /// Requested keep-alive interval, whole seconds.
    pub keep_alive_secs: u32,
    /// Login attribute block.
    pub login: AttributeBlock,
}

/// Reasons a handshake query is refused before the approval hook runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// A required query parameter was absent.
    #[error("missing handshake parameter {0}")]
    Missing(&'static str),
    /// A query component was not valid percent-encoded UTF-8.
    #[error("handshake query is not valid UTF-8")]
    Encoding,
    /// `KeepAlive` was not a whole number of seconds.
    #[error("invalid KeepAlive value {0:?}")]
    KeepAlive(String),
    /// `LoginData` did not parse as an attribute block.
    #[error("invalid LoginData: {0}")]
    LoginData(#[from] AttributeError),
}

impl HandshakeParams {
    /// Requested keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration { Duration::from_secs(u64::from(self.keep_alive_secs)) }

    /// Render the request URL for `host:port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use muxframe::{attributes::AttributeBlock, transport::HandshakeParams};
    ///
    /// let params = HandshakeParams {
    ///     client_version: "1.0".into(),
    ///     keep_alive_secs: 10,
    ///     login: AttributeBlock::new().with("UserRole", "Player").unwrap(),
    /// };
    /// assert_eq!(
    ///     params.url("localhost", 9000),
    ///     "ws://localhost:9000/?ClientVersion=1.0&KeepAlive=10&LoginData=UserRole%3DPlayer"
    /// );
    /// ```
    #[must_use]
    pub fn url(&self, host: &str, port: u16) -> String {
        format!(
            "ws://{host}:{port}/?{CLIENT_VERSION}={}&{KEEP_ALIVE}={}&{LOGIN_DATA}={}",
            urlencoding::encode(&self.client_version),
            self.keep_alive_secs,
            urlencoding::encode(&self.login.to_string()),
        )
    }

    /// Parse the query string of a handshake request.
    ///
    /// Unknown parameters are ignored. A missing `KeepAlive` defaults to 0,
    /// which disables keep-alive pings.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] for missing or malformed parameters.
    pub fn from_query(query: &str) -> Result<Self, HandshakeError> {
        let mut client_version = None;
        let mut keep_alive_secs = 0;
        let mut login = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(value).map_err(|_| HandshakeError::Encoding)?;
            match key {
                CLIENT_VERSION => client_version = Some(value.into_owned()),
                KEEP_ALIVE => {
                    keep_alive_secs = value
                        .parse()
                        .map_err(|_| HandshakeError::KeepAlive(value.clone().into_owned()))?;
                }
                LOGIN_DATA => login = Some(value.parse::<AttributeBlock>()?),
                _ => {}
            }
        }
        Ok(Self {
            client_version: client_version.ok_or(HandshakeError::Missing(CLIENT_VERSION))?,
            keep_alive_secs,
            login: login.ok_or(HandshakeError::Missing(LOGIN_DATA))?,
        })
    }
}

/// Cut `reason` to at most [`MAX_CLOSE_REASON`] characters.
#[must_use]
pub fn truncate_reason(reason: &str) -> &str {
    match reason.char_indices().nth(MAX_CLOSE_REASON) {
        Some((end, _)) => &reason[..end],
        None => reason,
    }
}

pub(crate) fn close_frame(code: CloseCode, reason: &str) -> CloseFrame<'static> {
    CloseFrame {
        code,
        reason: Cow::Owned(truncate_reason(reason).to_owned()),
    }
}

pub(crate) fn ws_config(max_receive_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_receive_size);
    config.max_frame_size = Some(max_receive_size);
    config
}
