//! Accept loop run on the session manager's I/O thread.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{ListenContext, connection::spawn_session_task};

/// Source of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Accept connections until `shutdown` fires, spawning one tracked session
/// task per connection.
///
/// Failed accepts are retried after a back-off that doubles per consecutive
/// failure. Each session gets a child of `shutdown`, so cancelling it also
/// closes every live session.
pub(in crate::server) async fn accept_loop<L>(
    listener: Arc<L>,
    ctx: Arc<ListenContext>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) where
    L: AcceptListener + 'static,
{
    let backoff = ctx.config.backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    spawn_session_task(
                        stream,
                        peer_addr,
                        Arc::clone(&ctx),
                        shutdown.child_token(),
                        &tracker,
                    );
                    delay = backoff.initial_delay;
                }
                Err(e) => {
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    select! {
                        biased;

                        () = shutdown.cancelled() => break,
                        () = sleep(delay) => {}
                    }
                    delay = backoff.next_delay(delay);
                }
            },
        }
    }
}
