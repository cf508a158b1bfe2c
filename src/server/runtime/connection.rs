//! Per-connection task: WebSocket handshake, approval, then the link.

use std::{net::SocketAddr, sync::Arc};

use futures::FutureExt;
use tokio::{net::TcpStream, select, sync::mpsc, time};
use tokio_tungstenite::{
    WebSocketStream,
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, error, info, info_span};

use super::{ListenContext, ServerEvent};
use crate::{
    batch::Accumulator,
    link::{self, LinkContext},
    login::{ApprovalHook, LoginData, LoginRequest},
    metrics::{self, ActiveConnection, Side},
    panic::format_panic,
    server::ClientSession,
    stats::{ConnectionStats, ConnectionStatus},
    transport::{HandshakeParams, ws_config},
};

/// Spawn a tracked task serving one TCP connection, logging and discarding
/// any panic.
pub(super) fn spawn_session_task(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<ListenContext>,
    cancel: CancellationToken,
    tracker: &TaskTracker,
) {
    let span = info_span!("server.session", peer.addr = %peer_addr);
    tracker.spawn(
        async move {
            let fut =
                std::panic::AssertUnwindSafe(process_stream(stream, peer_addr, ctx, cancel))
                    .catch_unwind();
            if let Err(panic) = fut.await {
                error!(panic = %format_panic(&*panic), %peer_addr, "session task panicked");
            }
        }
        .instrument(span),
    );
}

fn reject(status: StatusCode, reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = status;
    response
}

/// Validate the handshake query and run the approval hook.
fn approve(
    request: &Request,
    peer_addr: SocketAddr,
    approval: &ApprovalHook,
) -> Result<LoginRequest, ErrorResponse> {
    let params = HandshakeParams::from_query(request.uri().query().unwrap_or_default())
        .map_err(|err| reject(StatusCode::BAD_REQUEST, err.to_string()))?;
    let login = LoginRequest {
        peer_addr,
        keep_alive: params.keep_alive(),
        client_version: params.client_version,
        login: LoginData::from(params.login),
    };
    approval(&login).map_err(|reason| reject(StatusCode::FORBIDDEN, reason))?;
    Ok(login)
}

async fn process_stream(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<ListenContext>,
    cancel: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let mut verdict: Option<Result<LoginRequest, String>> = None;
    let callback = |request: &Request, response: Response| match approve(
        request,
        peer_addr,
        &ctx.approval,
    ) {
        Ok(login) => {
            verdict = Some(Ok(login));
            Ok(response)
        }
        Err(rejection) => {
            verdict = Some(Err(rejection.body().clone().unwrap_or_default()));
            Err(rejection)
        }
    };
    let handshake = accept_hdr_async_with_config(
        stream,
        callback,
        Some(ws_config(ctx.config.max_receive_size)),
    );
    let outcome = select! {
        biased;

        () = cancel.cancelled() => return,
        result = time::timeout(ctx.config.handshake_timeout, handshake) => result,
    };

    let (ws, request) = match (outcome, verdict) {
        (Ok(Ok(ws)), Some(Ok(request))) => (ws, request),
        (_, Some(Err(reason))) => {
            metrics::inc_handshake_rejections();
            info!(%reason, "handshake rejected");
            return;
        }
        (Ok(Err(err)), _) => {
            debug!(error = %err, "handshake failed");
            return;
        }
        (Err(_), _) => {
            debug!("handshake timed out");
            return;
        }
        (Ok(Ok(_)), None) => return,
    };
    run_session(ws, request, &ctx, cancel).await;
}

async fn run_session(
    ws: WebSocketStream<TcpStream>,
    request: LoginRequest,
    ctx: &ListenContext,
    cancel: CancellationToken,
) {
    let peer_addr = request.peer_addr;
    let keep_alive = request.keep_alive;
    let stats = Arc::new(ConnectionStats::new(format!("session {peer_addr}")));
    let id = ctx.shared.network.register(&stats);
    let accumulator = Arc::new(Accumulator::new(ctx.config.max_send_size));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    accumulator.attach(outbound_tx);
    let session = Arc::new(ClientSession::new(id, request, stats, accumulator));

    let active = ActiveConnection::new(Side::Server);
    session.stats.set_status(ConnectionStatus::Connected);
    ctx.shared.sessions.insert(id, Arc::clone(&session));
    info!(session = %id, "client connected");
    let _ = ctx.events.send(ServerEvent::Status(
        Arc::clone(&session),
        ConnectionStatus::Connected,
    ));

    let link_ctx = LinkContext {
        stats: Arc::clone(&session.stats),
        accumulator: Arc::clone(&session.accumulator),
        totals: Some(Arc::clone(&ctx.shared.totals)),
        keep_alive,
        flush_interval: ctx.config.flush_interval,
        side: Side::Server,
    };
    let reason = link::drive(ws, outbound_rx, &link_ctx, cancel, |event| {
        let _ = ctx.events.send(ServerEvent::Link(Arc::clone(&session), event));
    })
    .await;

    session.accumulator.detach();
    drop(active);
    ctx.shared.sessions.remove(&id);
    ctx.shared.network.remove(&id);
    let _ = ctx.events.send(ServerEvent::Status(
        Arc::clone(&session),
        ConnectionStatus::Disconnected,
    ));
    session.stats.set_status(ConnectionStatus::Disconnected);
    info!(session = %id, %reason, "client disconnected");
}
