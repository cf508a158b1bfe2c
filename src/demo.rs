//! Chat server and client used by the demo binary.
//!
//! Two services are shared by both ends:
//!
//! | service   | message    | direction        | payload                     |
//! |-----------|------------|------------------|-----------------------------|
//! | Users (1) | Verified 1 | server to client | varint user id, name string |
//! | Chat (2)  | Say 1      | client to server | text string                 |
//! | Chat (2)  | Said 2     | server to client | speaker string, text string |

use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use muxframe::{
    backend::{
        AccountBackend,
        BackendError,
        InMemoryAccounts,
        VerificationRequest,
        VerifiedUser,
        with_cancellation,
    },
    client::{ClientConnection, ConnectOptions, ConnectionEvents, ConnectionHandle},
    login::{LoginData, UserRole, require_credentials},
    registry::ConnectionId,
    server::{Recipients, SessionContext, SessionEvents, SessionManager},
    service::{InvalidMessage, MessageRoute, Service},
    stats::ConnectionStatus,
};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{ConnectArgs, ServeArgs};

const USERS: u8 = 1;
const VERIFIED: u8 = 1;
const CHAT: u8 = 2;
const SAY: u8 = 1;
const SAID: u8 = 2;

const TICK: Duration = Duration::from_millis(10);
/// Time between saying the last line and hanging up.
const LINGER: Duration = Duration::from_millis(500);

type DemoResult = Result<(), Box<dyn Error>>;
type Verdict = (ConnectionId, Result<VerifiedUser, BackendError>);

/// Session tag cancelling an in-flight verification.
struct Verification(CancellationToken);

struct ServerEvents {
    runtime: Handle,
    accounts: Arc<InMemoryAccounts>,
    verdicts: std_mpsc::Sender<Verdict>,
}

impl SessionEvents for ServerEvents {
    fn on_client_status_changed(&mut self, context: &SessionContext, status: ConnectionStatus) {
        let session = context.session();
        match status {
            ConnectionStatus::Connected => {
                info!(
                    session = %session.id(),
                    peer = %session.peer_addr(),
                    username = session.login().username().unwrap_or("-"),
                    "client joined"
                );
                let Some(code) = session.login().verification_code() else {
                    return;
                };
                let request = VerificationRequest {
                    code: code.to_owned(),
                    project_id: session.login().project_id().unwrap_or_default().to_owned(),
                };
                let token = CancellationToken::new();
                session.set_tag(Verification(token.clone()));
                let accounts = Arc::clone(&self.accounts);
                let verdicts = self.verdicts.clone();
                let id = session.id();
                self.runtime.spawn(async move {
                    let verdict = with_cancellation(&token, accounts.verify(request)).await;
                    let _ = verdicts.send((id, verdict));
                });
            }
            ConnectionStatus::Disconnected => {
                if let Some(Verification(token)) = session.take_tag::<Verification>() {
                    token.cancel();
                }
                info!(
                    session = %session.id(),
                    reason = session.stats().disconnect_reason().as_deref().unwrap_or("-"),
                    "client left"
                );
            }
            ConnectionStatus::Connecting => {}
        }
    }

    fn on_protocol_error(&mut self, context: &SessionContext, reason: &str) {
        warn!(session = %context.session().id(), %reason, "dropping misbehaving client");
    }
}

fn chat_server_service() -> Result<Service<SessionContext>, Box<dyn Error>> {
    let service = Service::new("Chat", u32::from(CHAT))?
        .with_handler("Say", u32::from(SAY), |ctx: &SessionContext, reader| {
            let text = reader.read_string()?;
            let session = ctx.session();
            let speaker = session
                .user_name()
                .or_else(|| session.login().username().map(str::to_owned))
                .unwrap_or_else(|| session.id().to_string());
            let mut said = ctx
                .manager()
                .begin_message(MessageRoute::new(CHAT, SAID), Recipients::All);
            said.write_string(&speaker).write_string(text);
            said.end()
                .map_err(|err| InvalidMessage::new(err.to_string()))?;
            Ok(())
        })?
        .with_message("Said", u32::from(SAID))?;
    Ok(service)
}

fn parse_issued(accounts: &InMemoryAccounts, project: &str, issued: &[String]) -> DemoResult {
    for (n, entry) in (1_u64..).zip(issued) {
        let (code, user) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected CODE=USERNAME, got {entry:?}"))?;
        accounts.issue(
            project,
            code,
            VerifiedUser {
                user_id: n,
                user_name: user.to_owned(),
            },
        );
    }
    Ok(())
}

/// Run the chat server until interrupted.
pub fn serve(args: &ServeArgs, runtime: &Handle, running: &AtomicBool) -> DemoResult {
    let accounts = Arc::new(InMemoryAccounts::new());
    parse_issued(&accounts, args.project.as_deref().unwrap_or_default(), &args.issued)?;
    let (verdicts, verdict_rx) = std_mpsc::channel();

    let users =
        Service::new("Users", u32::from(USERS))?.with_message("Verified", u32::from(VERIFIED))?;
    let mut manager = SessionManager::builder()
        .service(users)
        .service(chat_server_service()?)
        .approval(require_credentials(args.password.clone(), args.project.clone()))
        .events(ServerEvents {
            runtime: runtime.clone(),
            accounts,
            verdicts,
        })
        .build()?;
    let addr = manager.begin_listen(args.port)?;
    info!(%addr, "chat server ready");
    manager.profiler_start();

    while running.load(Ordering::Acquire) {
        manager.update();
        while let Ok((id, verdict)) = verdict_rx.try_recv() {
            match verdict {
                Ok(user) => {
                    let Some(session) = manager.handle().client(id) else {
                        continue;
                    };
                    session.set_user(user.user_id, &user.user_name);
                    let mut verified = manager
                        .begin_message(MessageRoute::new(USERS, VERIFIED), Recipients::One(id));
                    verified
                        .write_varint_u64(user.user_id)
                        .write_string(&user.user_name);
                    if let Err(err) = verified.end() {
                        warn!(session = %id, error = %err, "could not confirm verification");
                    }
                }
                Err(BackendError::Cancelled) => {}
                Err(err) => {
                    manager.disconnect_client(id, &err.to_string());
                }
            }
        }
        thread::sleep(TICK);
    }

    if let Some(report) = manager.profiler_stop() {
        println!("{report}");
    }
    let totals = manager.totals();
    info!(
        sent = totals.messages_sent,
        received = totals.messages_received,
        "shutting down"
    );
    manager.dispose();
    Ok(())
}

#[derive(Default)]
struct ClientEvents {
    finished: Arc<AtomicBool>,
}

impl ConnectionEvents for ClientEvents {
    fn on_status_changed(&mut self, connection: &ConnectionHandle, status: ConnectionStatus) {
        info!(%status, "connection status");
        if status == ConnectionStatus::Disconnected {
            info!(
                reason = connection.disconnect_reason().as_deref().unwrap_or("-"),
                "disconnected"
            );
            self.finished.store(true, Ordering::Release);
        }
    }

    fn on_protocol_error(&mut self, _connection: &ConnectionHandle, reason: &str) {
        warn!(%reason, "protocol error");
    }
}

/// Log in, say each line once ready, then hang up unless told to stay.
pub fn connect(args: &ConnectArgs, running: &AtomicBool) -> DemoResult {
    let verified = Arc::new(AtomicBool::new(false));
    let on_verified = Arc::clone(&verified);
    let users = Service::new("Users", u32::from(USERS))?.with_handler(
        "Verified",
        u32::from(VERIFIED),
        move |_: &ConnectionHandle, reader| {
            let user_id = reader.read_varint_u64()?;
            let name = reader.read_string()?;
            info!(user_id, user = %name, "verified");
            on_verified.store(true, Ordering::Release);
            Ok(())
        },
    )?;
    let chat = Service::new("Chat", u32::from(CHAT))?
        .with_message("Say", u32::from(SAY))?
        .with_handler("Said", u32::from(SAID), |_: &ConnectionHandle, reader| {
            let speaker = reader.read_string()?;
            let text = reader.read_string()?;
            println!("{speaker}: {text}");
            Ok(())
        })?;

    let events = ClientEvents::default();
    let finished = Arc::clone(&events.finished);
    let mut connection = ClientConnection::builder()
        .label(args.username.clone())
        .service(users)
        .service(chat)
        .events(events)
        .build()?;

    let mut login = LoginData::new()
        .with_username(args.username.clone())?
        .with_user_role(&args.role.parse::<UserRole>()?)?;
    if let Some(password) = &args.password {
        login = login.with_password(password.clone())?;
    }
    if let Some(project) = &args.project {
        login = login.with_project_id(project.clone())?;
    }
    if let Some(code) = &args.code {
        login = login.with_verification_code(code.clone())?;
    }
    let options = ConnectOptions::new(args.host.clone(), args.port)
        .login(login)
        .keep_alive(Duration::from_secs(u64::from(args.keep_alive)));

    connection.profiler_start();
    connection.begin_connect(&options)?;
    let mut said_at: Option<Instant> = None;
    let mut hung_up = false;
    while running.load(Ordering::Acquire) && !finished.load(Ordering::Acquire) {
        connection.update();
        let ready = connection.status() == ConnectionStatus::Connected
            && (args.code.is_none() || verified.load(Ordering::Acquire));
        if ready && said_at.is_none() {
            for line in &args.lines {
                let mut say = connection.begin_message(MessageRoute::new(CHAT, SAY));
                say.write_string(line);
                say.tag("chat").end()?;
            }
            said_at = Some(Instant::now());
        }
        if !args.stay && !hung_up && said_at.is_some_and(|at| at.elapsed() >= LINGER) {
            hung_up = connection.disconnect("client finished");
        }
        thread::sleep(TICK);
    }
    connection.update();

    if let Some(report) = connection.profiler_stop() {
        println!("{report}");
    }
    connection.dispose();
    Ok(())
}
