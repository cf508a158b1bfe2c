//! Dedicated OS thread hosting a current-thread Tokio runtime.
//!
//! Each client connection and each session manager owns one of these. The
//! thread runs a single root future until it completes or its cancellation
//! token fires, and shutdown waits a bounded time before giving up on it.

use std::{
    future::Future,
    io,
    sync::mpsc as std_mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::warn;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

use crate::panic::format_panic;

/// Owner of one I/O thread.
#[derive(Debug)]
pub(crate) struct IoThread {
    name: String,
    cancel: CancellationToken,
    done: std_mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl IoThread {
    /// Spawn a thread named `name` running the future built by `task`.
    ///
    /// The future receives the token that [`shutdown`](Self::shutdown)
    /// cancels.
    pub(crate) fn spawn<F, Fut>(name: &str, task: F) -> io::Result<Self>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (done_tx, done) = std_mpsc::channel();
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = thread::Builder::new().name(name.to_owned()).spawn(move || {
            // Dropped last, after the runtime, so `done` only disconnects
            // once every task on the thread is gone.
            let _done = done_tx;
            runtime.block_on(task(token));
            drop(runtime);
        })?;
        Ok(Self {
            name: name.to_owned(),
            cancel,
            done,
            handle: Some(handle),
        })
    }

    /// Returns `true` once the root future has finished.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the thread and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if the thread was still running at the deadline; it is
    /// then detached.
    pub(crate) fn shutdown(mut self, timeout: Duration) -> bool {
        self.cancel.cancel();
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take()
                    && let Err(panic) = handle.join()
                {
                    warn!("I/O thread {} panicked: {}", self.name, format_panic(&*panic));
                }
                true
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "I/O thread {} did not exit within {timeout:?}; detaching",
                    self.name
                );
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) { self.cancel.cancel(); }
}
