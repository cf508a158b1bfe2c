//! A session manager and a client wired together over `127.0.0.1`.

use std::{
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use muxframe::{
    ClientConnection,
    ConnectOptions,
    SessionManager,
    client::ClientConnectionBuilder,
    login::LoginData,
    server::SessionManagerBuilder,
    stats::ConnectionStatus,
};

use crate::recorder::{ClientRecorder, ServerRecorder};

/// Default time budget for [`Loopback::pump_until`].
pub const PUMP_TIMEOUT: Duration = Duration::from_secs(5);

const TICK: Duration = Duration::from_millis(2);

/// Call `step` until it returns `true` or `timeout` elapses.
///
/// `step` both ticks whatever endpoints the test owns and reports whether
/// the awaited state was reached. Returns that final verdict.
pub fn pump_until(timeout: Duration, mut step: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if step() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(TICK);
    }
}

/// A listening manager and an unconnected client, both recording their
/// callbacks.
pub struct Loopback {
    pub manager: SessionManager,
    pub client: ClientConnection,
    pub server_events: ServerRecorder,
    pub client_events: ClientRecorder,
    pub addr: SocketAddr,
}

impl Loopback {
    /// Start `manager` on an ephemeral port and build `client`.
    ///
    /// The recorders replace any events either builder carried.
    ///
    /// # Panics
    ///
    /// Panics if either endpoint fails to build or the manager cannot bind.
    #[must_use]
    pub fn start(manager: SessionManagerBuilder, client: ClientConnectionBuilder) -> Self {
        let server_events = ServerRecorder::new();
        let client_events = ClientRecorder::new();
        let mut manager = manager
            .events(server_events.clone())
            .build()
            .expect("build manager");
        let addr = manager
            .begin_listen_on(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("listen on loopback");
        let client = client
            .events(client_events.clone())
            .build()
            .expect("build client");
        Self {
            manager,
            client,
            server_events,
            client_events,
            addr,
        }
    }

    /// Both endpoints with no services.
    #[must_use]
    pub fn bare() -> Self { Self::start(SessionManager::builder(), ClientConnection::builder()) }

    /// Connect options pointing at the manager, with pings disabled.
    #[must_use]
    pub fn options(&self, login: LoginData) -> ConnectOptions {
        ConnectOptions::new("127.0.0.1", self.addr.port())
            .login(login)
            .keep_alive(Duration::ZERO)
    }

    /// Tick both endpoints once.
    pub fn tick(&mut self) {
        self.manager.update();
        self.client.update();
    }

    /// Tick both endpoints until `done` holds, for at most [`PUMP_TIMEOUT`].
    pub fn pump_until(&mut self, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + PUMP_TIMEOUT;
        loop {
            self.tick();
            if done(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(TICK);
        }
    }

    /// Tick both endpoints for `duration` regardless of state.
    pub fn pump_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.tick();
            thread::sleep(TICK);
        }
    }

    /// Connect with `login` and wait until both ends report the session.
    ///
    /// # Panics
    ///
    /// Panics if the connection cannot start or does not complete in time.
    pub fn connect(&mut self, login: LoginData) {
        let options = self.options(login);
        self.client.begin_connect(&options).expect("begin connect");
        let connected = self.pump_until(|lb| {
            lb.client.status() == ConnectionStatus::Connected
                && lb
                    .server_events
                    .sessions_with(ConnectionStatus::Connected)
                    .len()
                    > lb.server_events
                        .sessions_with(ConnectionStatus::Disconnected)
                        .len()
        });
        assert!(
            connected,
            "loopback connection did not complete: {:?}",
            self.client.disconnect_reason()
        );
    }
}
