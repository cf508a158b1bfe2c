//! Tests for the listener thread internals.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use rstest::{fixture, rstest};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{Duration, sleep, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{BackoffConfig, ListenContext, ServerEvent, accept::AcceptListener, accept_loop};
use crate::{
    login::accept_all,
    profiler::Profiler,
    registry::NetworkRegistry,
    server::{ServerConfig, manager::Shared},
    stats::TrafficCounters,
};

struct FailingListener {
    calls: AtomicUsize,
}

#[async_trait]
impl AcceptListener for FailingListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::other("accept failed"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { Ok(SocketAddr::from(([127, 0, 0, 1], 0))) }
}

type Context = (Arc<ListenContext>, mpsc::UnboundedReceiver<ServerEvent>);

#[fixture]
fn context() -> Context {
    let (events, rx) = mpsc::unbounded_channel();
    let config = ServerConfig::default().backoff(BackoffConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    });
    let ctx = ListenContext {
        shared: Arc::new(Shared {
            sessions: DashMap::new(),
            profiler: Arc::new(Profiler::default()),
            totals: Arc::new(TrafficCounters::default()),
            network: Arc::new(NetworkRegistry::new()),
        }),
        config,
        approval: accept_all(),
        events,
    };
    (Arc::new(ctx), rx)
}

#[rstest]
#[tokio::test]
async fn accept_errors_back_off_until_shutdown(context: Context) {
    let (ctx, _rx) = context;
    let listener = Arc::new(FailingListener {
        calls: AtomicUsize::new(0),
    });
    let token = CancellationToken::new();
    let task = tokio::spawn(accept_loop(
        Arc::clone(&listener),
        ctx,
        token.clone(),
        TaskTracker::new(),
    ));

    sleep(Duration::from_millis(100)).await;
    token.cancel();
    timeout(Duration::from_secs(1), task)
        .await
        .expect("accept loop did not stop")
        .expect("accept loop panicked");

    let calls = listener.calls.load(Ordering::SeqCst);
    assert!(calls >= 2, "expected retries, saw {calls}");
    assert!(calls < 20, "back-off did not grow, saw {calls} attempts");
}

#[rstest]
#[tokio::test]
async fn shutdown_stops_idle_loop(context: Context) {
    let (ctx, _rx) = context;
    let listener = Arc::new(
        TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener"),
    );
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let task = tokio::spawn(accept_loop(listener, ctx, token.clone(), tracker.clone()));

    token.cancel();
    timeout(Duration::from_secs(1), task)
        .await
        .expect("accept loop did not stop")
        .expect("accept loop panicked");
    tracker.close();
    assert!(tracker.is_empty());
}

#[rstest]
#[tokio::test]
async fn silent_client_times_out_without_session(context: Context) {
    let (ctx, mut rx) = context;
    let mut config = ctx.config;
    config.handshake_timeout = Duration::from_millis(50);
    let ctx = Arc::new(ListenContext {
        shared: Arc::clone(&ctx.shared),
        config,
        approval: Arc::clone(&ctx.approval),
        events: ctx.events.clone(),
    });
    let listener = Arc::new(
        TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener"),
    );
    let addr = listener.local_addr().expect("listener addr");
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let task = tokio::spawn(accept_loop(listener, Arc::clone(&ctx), token.clone(), tracker.clone()));

    let _silent = TcpStream::connect(addr).await.expect("connect");
    sleep(Duration::from_millis(200)).await;

    assert!(ctx.shared.sessions.is_empty());
    assert!(rx.try_recv().is_err());
    token.cancel();
    task.await.expect("accept loop panicked");
    tracker.close();
    timeout(Duration::from_secs(1), tracker.wait())
        .await
        .expect("session tasks did not finish");
}
