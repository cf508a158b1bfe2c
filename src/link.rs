//! Drive loop for one established WebSocket link.
//!
//! Client connections and server sessions run the same loop once their
//! handshake completes. It sends queued batches, follows every hundredth
//! binary message with a checksum report, verifies the peer's reports,
//! pings on the keep-alive interval and flushes the accumulation buffer on
//! a timer. Everything the tick thread needs to see leaves through `emit`.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    select,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::tungstenite::{self, Message, protocol::frame::coding::CloseCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    batch::{Accumulator, Outbound, OutboundRx},
    control::{checksum_report, report_due, verify_control},
    metrics::{self, Direction, Side},
    stats::{ConnectionStats, TrafficCounters},
    transport::close_frame,
};

/// How long a closing side waits for the peer's close acknowledgement.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Keep-alive intervals without inbound traffic before the link is dropped.
const KEEP_ALIVE_MISSES: u32 = 3;

/// Events raised by the drive loop for the tick thread.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// A complete binary message.
    Message(Bytes),
    /// The peer violated the protocol; the link is closing.
    ProtocolError(String),
}

/// Shared state and settings for one link.
#[derive(Debug)]
pub(crate) struct LinkContext {
    pub(crate) stats: Arc<ConnectionStats>,
    pub(crate) accumulator: Arc<Accumulator>,
    /// Aggregate counters of the owning manager, if any.
    pub(crate) totals: Option<Arc<TrafficCounters>>,
    pub(crate) keep_alive: Duration,
    pub(crate) flush_interval: Duration,
    pub(crate) side: Side,
}

enum Step {
    Continue,
    Close(CloseCode, String),
    Closed(String),
}

async fn tick_if(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn interval_after(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Run the link until it closes, returning the disconnect reason.
///
/// The reason is also recorded on `ctx.stats`, where an earlier reason set
/// by the tick thread takes precedence.
pub(crate) async fn drive<S, F>(
    ws: S,
    mut outbound: OutboundRx,
    ctx: &LinkContext,
    cancel: CancellationToken,
    emit: F,
) -> String
where
    S: Sink<Message, Error = tungstenite::Error>
        + Stream<Item = Result<Message, tungstenite::Error>>
        + Unpin,
    F: Fn(LinkEvent),
{
    let (mut sink, mut stream) = ws.split();
    let mut flush = interval_after(ctx.flush_interval.max(Duration::from_millis(1)));
    let mut ping = (!ctx.keep_alive.is_zero()).then(|| interval_after(ctx.keep_alive));
    ctx.stats.touch_received();

    let reason = loop {
        let step = select! {
            biased;

            () = cancel.cancelled() => {
                ctx.accumulator.flush();
                let mut step = Step::Close(CloseCode::Normal, "connection disposed".to_owned());
                while let Ok(item) = outbound.try_recv() {
                    match send_outbound(&mut sink, ctx, item).await {
                        Step::Continue => {}
                        other => {
                            step = other;
                            break;
                        }
                    }
                }
                step
            }
            item = outbound.recv() => match item {
                Some(item) => send_outbound(&mut sink, ctx, item).await,
                None => Step::Close(CloseCode::Normal, "connection released".to_owned()),
            },
            message = stream.next() => receive(message, ctx, &emit),
            _ = flush.tick() => {
                ctx.accumulator.flush();
                Step::Continue
            }
            () = tick_if(&mut ping) => keep_alive(&mut sink, ctx).await,
        };
        match step {
            Step::Continue => {}
            Step::Close(code, reason) => {
                close(&mut sink, &mut stream, code, &reason).await;
                break reason;
            }
            Step::Closed(reason) => {
                // Flushes the close reply tungstenite queued for the peer.
                let _ = time::timeout(CLOSE_GRACE, sink.close()).await;
                break reason;
            }
        }
    };

    ctx.stats.reason().set(&reason);
    let reason = ctx.stats.disconnect_reason().unwrap_or(reason);
    info!(link = %ctx.stats.label(), %reason, "link closed");
    reason
}

async fn send_outbound<W>(sink: &mut W, ctx: &LinkContext, item: Outbound) -> Step
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match item {
        Outbound::Batch(batch) => match send_binary(sink, ctx, &batch).await {
            Ok(()) => Step::Continue,
            Err(err) => Step::Closed(format!("send failed: {err}")),
        },
        Outbound::Close { code, reason } => Step::Close(code, reason),
    }
}

async fn send_binary<W>(sink: &mut W, ctx: &LinkContext, batch: &[u8]) -> Result<(), tungstenite::Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let counter = ctx.stats.record_sent(batch);
    if let Some(totals) = &ctx.totals {
        totals.add_sent(batch.len());
    }
    metrics::record_message(Direction::Outbound, batch.len());
    sink.send(Message::Binary(batch.to_vec())).await?;
    if report_due(counter) {
        let report = checksum_report(ctx.stats.sent_checksum());
        debug!(link = %ctx.stats.label(), counter, "sent checksum report");
        sink.send(Message::Text(report)).await?;
    }
    Ok(())
}

fn receive<F>(message: Option<Result<Message, tungstenite::Error>>, ctx: &LinkContext, emit: &F) -> Step
where
    F: Fn(LinkEvent),
{
    let message = match message {
        Some(Ok(message)) => message,
        Some(Err(err)) => return Step::Closed(format!("transport error: {err}")),
        None => return Step::Closed("connection closed".to_owned()),
    };
    ctx.stats.touch_received();
    match message {
        Message::Binary(data) => {
            ctx.stats.record_received(&data);
            if let Some(totals) = &ctx.totals {
                totals.add_received(data.len());
            }
            metrics::record_message(Direction::Inbound, data.len());
            emit(LinkEvent::Message(Bytes::from(data)));
            Step::Continue
        }
        Message::Text(text) => match verify_control(&text, ctx.stats.received_checksum()) {
            Ok(()) => Step::Continue,
            Err(err) => {
                let reason = err.to_string();
                warn!(link = %ctx.stats.label(), %reason, "protocol error");
                metrics::inc_protocol_errors(ctx.side);
                ctx.stats.reason().set(&reason);
                emit(LinkEvent::ProtocolError(reason.clone()));
                Step::Close(CloseCode::Protocol, reason)
            }
        },
        Message::Close(frame) => {
            let reason = frame
                .map(|f| f.reason.into_owned())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "closed by peer".to_owned());
            Step::Closed(reason)
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Step::Continue,
    }
}

async fn keep_alive<W>(sink: &mut W, ctx: &LinkContext) -> Step
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let limit = ctx.keep_alive * KEEP_ALIVE_MISSES;
    let silent = ctx
        .stats
        .last_received()
        .is_some_and(|at| at.elapsed() > limit);
    if silent {
        return Step::Close(CloseCode::Away, "keep-alive timeout".to_owned());
    }
    match sink.send(Message::Ping(Vec::new())).await {
        Ok(()) => Step::Continue,
        Err(err) => Step::Closed(format!("send failed: {err}")),
    }
}

async fn close<W, R>(sink: &mut W, stream: &mut R, code: CloseCode, reason: &str)
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    if sink
        .send(Message::Close(Some(close_frame(code, reason))))
        .await
        .is_err()
    {
        return;
    }
    // Let the peer acknowledge so the reason reaches it before the socket
    // goes away.
    let _ = time::timeout(CLOSE_GRACE, async {
        while let Some(Ok(message)) = stream.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    })
    .await;
}
