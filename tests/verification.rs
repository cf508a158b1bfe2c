//! Verification codes checked against an account backend from session
//! callbacks, the way a deployment wires the two together.

use std::{
    sync::{Arc, mpsc},
    time::Duration,
};

use muxframe::{
    ClientConnection,
    SessionManager,
    backend::{
        AccountBackend,
        BackendError,
        InMemoryAccounts,
        VerificationRequest,
        VerifiedUser,
        with_cancellation,
    },
    client::ConnectionHandle,
    login::{LoginData, UserRole},
    registry::ConnectionId,
    server::{Recipients, SessionContext, SessionEvents},
    service::{MessageRoute, Service},
    stats::ConnectionStatus,
};
use parking_lot::Mutex;
use rstest::{fixture, rstest};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const VERIFIED: MessageRoute = MessageRoute::new(1, 1);

type Verdict = (ConnectionId, Result<VerifiedUser, BackendError>);

struct Pending(CancellationToken);

struct Verifier {
    runtime: Arc<Runtime>,
    accounts: Arc<dyn AccountBackend>,
    verdicts: mpsc::Sender<Verdict>,
}

impl SessionEvents for Verifier {
    fn on_client_status_changed(&mut self, context: &SessionContext, status: ConnectionStatus) {
        let session = context.session();
        match status {
            ConnectionStatus::Connected => {
                let Some(code) = session.login().verification_code() else {
                    return;
                };
                let request = VerificationRequest {
                    code: code.to_owned(),
                    project_id: session.login().project_id().unwrap_or("").to_owned(),
                };
                let token = CancellationToken::new();
                session.set_tag(Pending(token.clone()));
                let accounts = Arc::clone(&self.accounts);
                let verdicts = self.verdicts.clone();
                let id = session.id();
                self.runtime.spawn(async move {
                    let verdict = with_cancellation(&token, accounts.verify(request)).await;
                    let _ = verdicts.send((id, verdict));
                });
            }
            ConnectionStatus::Disconnected => {
                if let Some(Pending(token)) = session.take_tag::<Pending>() {
                    token.cancel();
                }
            }
            ConnectionStatus::Connecting => {}
        }
    }
}

/// Never answers, so only cancellation ends a call.
struct Unresponsive;

#[async_trait::async_trait]
impl AccountBackend for Unresponsive {
    async fn verify(&self, _request: VerificationRequest) -> Result<VerifiedUser, BackendError> {
        std::future::pending().await
    }
}

#[fixture]
fn runtime() -> Arc<Runtime> { Arc::new(Runtime::new().expect("runtime")) }

fn accounts() -> Arc<dyn AccountBackend> {
    let accounts = InMemoryAccounts::new();
    accounts.issue(
        "mars",
        "1234",
        VerifiedUser {
            user_id: 7,
            user_name: "ada".into(),
        },
    );
    Arc::new(accounts)
}

fn login(code: &str) -> LoginData {
    LoginData::new()
        .with_user_role(&UserRole::Player)
        .and_then(|l| l.with_project_id("mars"))
        .and_then(|l| l.with_verification_code(code))
        .expect("login")
}

/// Build a manager whose verifier reports into the returned channel.
fn verifying_manager(
    runtime: &Arc<Runtime>,
    accounts: Arc<dyn AccountBackend>,
) -> (SessionManager, mpsc::Receiver<Verdict>) {
    let (verdicts, rx) = mpsc::channel();
    let users = Service::new("Users", 1)
        .expect("service")
        .with_message("Verified", 1)
        .expect("message");
    let manager = SessionManager::builder()
        .service(users)
        .events(Verifier {
            runtime: Arc::clone(runtime),
            accounts,
            verdicts,
        })
        .build()
        .expect("build");
    (manager, rx)
}

fn client(seen: Arc<Mutex<Option<String>>>) -> ClientConnection {
    let users = Service::new("Users", 1)
        .expect("service")
        .with_handler("Verified", 1, move |_: &ConnectionHandle, reader| {
            let _id = reader.read_varint_u64()?;
            *seen.lock() = Some(reader.read_string()?.to_owned());
            Ok(())
        })
        .expect("handler");
    ClientConnection::builder().service(users).build().expect("client")
}

fn tick(manager: &mut SessionManager, client: &mut ClientConnection, verdicts: &mpsc::Receiver<Verdict>) {
    manager.update();
    client.update();
    while let Ok((id, verdict)) = verdicts.try_recv() {
        match verdict {
            Ok(user) => {
                if let Some(session) = manager.handle().client(id) {
                    session.set_user(user.user_id, &user.user_name);
                }
                let mut message = manager.begin_message(VERIFIED, Recipients::One(id));
                message.write_varint_u64(user.user_id).write_string(&user.user_name);
                let _ = message.end();
            }
            Err(BackendError::Cancelled) => {}
            Err(err) => {
                manager.disconnect_client(id, &err.to_string());
            }
        }
    }
}

#[rstest]
#[case::issued("1234", Some("ada"), None)]
#[case::unknown("9999", None, Some("verification rejected: unknown verification code"))]
fn codes_are_verified(
    runtime: Arc<Runtime>,
    #[case] code: &str,
    #[case] user: Option<&str>,
    #[case] reason: Option<&str>,
) {
    let (mut manager, verdicts) = verifying_manager(&runtime, accounts());
    let addr = manager
        .begin_listen_on(([127, 0, 0, 1], 0).into())
        .expect("listen");
    let seen = Arc::new(Mutex::new(None));
    let mut client = client(Arc::clone(&seen));
    let options = muxframe::ConnectOptions::new("127.0.0.1", addr.port())
        .login(login(code))
        .keep_alive(Duration::ZERO);
    client.begin_connect(&options).expect("connect");

    let settled = muxframe_testing::pump_until(Duration::from_secs(5), || {
        tick(&mut manager, &mut client, &verdicts);
        seen.lock().is_some() || client.disconnect_reason().is_some()
    });
    assert!(settled);
    assert_eq!(seen.lock().as_deref(), user);
    assert_eq!(client.disconnect_reason().as_deref(), reason);
    if user.is_some() {
        let session = manager.clients().pop().expect("session");
        assert_eq!(session.user_name().as_deref(), user);
        assert_eq!(session.user_id(), Some(7));
    }
}

#[rstest]
fn disconnect_cancels_pending_verification(runtime: Arc<Runtime>) {
    let (mut manager, verdicts) = verifying_manager(&runtime, Arc::new(Unresponsive));
    let addr = manager
        .begin_listen_on(([127, 0, 0, 1], 0).into())
        .expect("listen");
    let mut client = client(Arc::new(Mutex::new(None)));
    let options = muxframe::ConnectOptions::new("127.0.0.1", addr.port())
        .login(login("1234"))
        .keep_alive(Duration::ZERO);
    client.begin_connect(&options).expect("connect");

    let pending = muxframe_testing::pump_until(Duration::from_secs(5), || {
        manager.update();
        client.update();
        manager
            .clients()
            .first()
            .is_some_and(|s| s.with_tag(|p: Option<&Pending>| p.is_some()))
    });
    assert!(pending, "verification never started");
    let id = manager.clients()[0].id();

    assert!(client.disconnect("changed my mind"));
    let mut verdict = None;
    let cancelled = muxframe_testing::pump_until(Duration::from_secs(5), || {
        manager.update();
        client.update();
        verdict = verdicts.try_recv().ok();
        verdict.is_some()
    });
    assert!(cancelled, "pending verification was not cancelled");
    assert_eq!(verdict, Some((id, Err(BackendError::Cancelled))));
    assert_eq!(manager.client_count(), 0);
}
