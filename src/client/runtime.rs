//! Connection attempt run on a client's I/O thread.

use std::{sync::Arc, time::Duration};

use tokio::{net::TcpStream, select, sync::mpsc, time};
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    client_async_with_config,
    tungstenite::{self, handshake::client::Response},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use super::{ClientConfig, handle::Shared};
use crate::{
    batch::OutboundRx,
    link::{self, LinkContext, LinkEvent},
    metrics::{ActiveConnection, Side},
    stats::ConnectionStatus,
    transport::ws_config,
};

/// Work handed from the I/O thread to `update()`.
#[derive(Debug)]
pub(super) enum ClientEvent {
    Status(ConnectionStatus),
    Link(LinkEvent),
}

pub(super) type EventTx = mpsc::UnboundedSender<ClientEvent>;

/// Everything one connection attempt needs.
pub(super) struct Attempt {
    pub(super) url: String,
    pub(super) host: String,
    pub(super) port: u16,
    pub(super) keep_alive: Duration,
    pub(super) config: ClientConfig,
    pub(super) shared: Arc<Shared>,
    pub(super) outbound: OutboundRx,
    pub(super) events: EventTx,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect, run the link until it ends, then report the disconnection.
pub(super) async fn run(attempt: Attempt, cancel: CancellationToken) {
    let span = info_span!("client.connection", peer.addr = %format!("{}:{}", attempt.host, attempt.port));
    run_attempt(attempt, cancel).instrument(span).await;
}

async fn run_attempt(attempt: Attempt, cancel: CancellationToken) {
    let Attempt {
        url,
        host,
        port,
        keep_alive,
        config,
        shared,
        outbound,
        events,
    } = attempt;
    let stats = &shared.stats;

    let connected = select! {
        biased;

        () = cancel.cancelled() => Err("connect cancelled".to_owned()),
        result = time::timeout(config.connect_timeout, handshake(&url, &host, port, &config)) => {
            result.unwrap_or_else(|_| Err("connect timed out".to_owned()))
        }
    };

    match connected {
        Ok(ws) => {
            stats.set_status(ConnectionStatus::Connected);
            info!("connected");
            let _ = events.send(ClientEvent::Status(ConnectionStatus::Connected));
            let _active = ActiveConnection::new(Side::Client);
            let ctx = LinkContext {
                stats: Arc::clone(stats),
                accumulator: Arc::clone(&shared.accumulator),
                totals: None,
                keep_alive,
                flush_interval: config.flush_interval,
                side: Side::Client,
            };
            link::drive(ws, outbound, &ctx, cancel, |event| {
                let _ = events.send(ClientEvent::Link(event));
            })
            .await;
        }
        Err(reason) => {
            warn!(%reason, "connect failed");
            stats.reason().set(&reason);
        }
    }

    shared.accumulator.detach();
    // Queue the event before publishing the status so a reconnect started
    // from `update()` cannot overtake it.
    let _ = events.send(ClientEvent::Status(ConnectionStatus::Disconnected));
    stats.set_status(ConnectionStatus::Disconnected);
}

async fn handshake(url: &str, host: &str, port: u16, config: &ClientConfig) -> Result<Socket, String> {
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|err| format!("connect failed: {err}"))?;
    let _ = tcp.set_nodelay(true);
    let stream = MaybeTlsStream::Plain(tcp);
    match client_async_with_config(url, stream, Some(ws_config(config.max_receive_size))).await {
        Ok((ws, _)) => Ok(ws),
        Err(tungstenite::Error::Http(response)) => Err(rejection_reason(&response)),
        Err(err) => Err(format!("handshake failed: {err}")),
    }
}

/// The server's refusal body, or the HTTP status when there is none.
fn rejection_reason(response: &Response) -> String {
    response
        .body()
        .as_deref()
        .map(|body| String::from_utf8_lossy(body).trim().to_owned())
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| format!("handshake rejected: HTTP {}", response.status()))
}
