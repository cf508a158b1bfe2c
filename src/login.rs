//! Login payloads and connection approval.
//!
//! Clients send a login attribute block in the handshake. [`LoginData`]
//! gives typed access to the well-known attributes; the server hands the
//! parsed block to an [`ApprovalHook`] as part of a [`LoginRequest`].

use std::{fmt, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use crate::attributes::{AttributeBlock, AttributeError};

const VERIFICATION_CODE: &str = "VerificationCode";
const USERNAME: &str = "Username";
const PASSWORD: &str = "Password";
const USER_ROLE: &str = "UserRole";
const PROJECT_ID: &str = "ProjectId";

/// Role a client claims at login.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UserRole {
    /// A participant in the simulation.
    Player,
    /// A participant with administrative rights.
    Admin,
    /// A read-only observer.
    Spectator,
    /// Any other application-defined role.
    Other(String),
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Player => "Player",
            Self::Admin => "Admin",
            Self::Spectator => "Spectator",
            Self::Other(role) => role,
        })
    }
}

impl FromStr for UserRole {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Player" => Self::Player,
            "Admin" => Self::Admin,
            "Spectator" => Self::Spectator,
            other => Self::Other(other.to_owned()),
        })
    }
}

/// Typed view over a login attribute block.
///
/// # Examples
///
/// ```
/// use muxframe::login::{LoginData, UserRole};
///
/// let login = LoginData::new()
///     .with_user_role(&UserRole::Player)
///     .and_then(|l| l.with_username("ada"))
///     .unwrap();
/// assert_eq!(login.user_role(), Some(UserRole::Player));
/// assert_eq!(login.as_block().to_string(), "UserRole=Player\nUsername=ada");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoginData {
    block: AttributeBlock,
}

macro_rules! login_field {
    ($(#[$doc:meta] $get:ident, $set:ident => $key:expr;)*) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $get(&self) -> Option<&str> { self.block.get($key) }

            #[$doc]
            ///
            /// # Errors
            ///
            /// Rejects values containing line breaks.
            pub fn $set(mut self, value: impl Into<String>) -> Result<Self, AttributeError> {
                self.block.insert($key, value)?;
                Ok(self)
            }
        )*
    };
}

impl LoginData {
    /// Create an empty login payload.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    login_field! {
        /// Short-lived credential issued by an account backend.
        verification_code, with_verification_code => VERIFICATION_CODE;
        /// Display name.
        username, with_username => USERNAME;
        /// Session password shared with the server.
        password, with_password => PASSWORD;
        /// Project the client wants to join.
        project_id, with_project_id => PROJECT_ID;
    }

    /// Claimed role.
    #[must_use]
    pub fn user_role(&self) -> Option<UserRole> {
        self.block.get(USER_ROLE).and_then(|r| r.parse().ok())
    }

    /// Claim `role`.
    ///
    /// # Errors
    ///
    /// Rejects roles containing line breaks.
    pub fn with_user_role(mut self, role: &UserRole) -> Result<Self, AttributeError> {
        self.block.insert(USER_ROLE, role.to_string())?;
        Ok(self)
    }

    /// The underlying attribute block.
    #[must_use]
    pub fn as_block(&self) -> &AttributeBlock { &self.block }

    /// Consume into the underlying attribute block.
    #[must_use]
    pub fn into_block(self) -> AttributeBlock { self.block }
}

impl From<AttributeBlock> for LoginData {
    fn from(block: AttributeBlock) -> Self { Self { block } }
}

/// A client's handshake as seen by the approval hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginRequest {
    /// Remote address of the peer.
    pub peer_addr: SocketAddr,
    /// Client build identifier.
    pub client_version: String,
    /// Login payload.
    pub login: LoginData,
    /// Requested keep-alive interval.
    pub keep_alive: Duration,
}

/// Synchronous hook deciding whether a handshake may complete.
///
/// Returning `Err(reason)` refuses the handshake with HTTP 403; the reason
/// becomes the response body and the client's disconnect reason.
pub type ApprovalHook = Arc<dyn Fn(&LoginRequest) -> Result<(), String> + Send + Sync>;

/// Approve every handshake.
#[must_use]
pub fn accept_all() -> ApprovalHook { Arc::new(|_| Ok(())) }

/// Approve handshakes whose login carries the expected password and, when
/// `project_id` is set, the expected project.
#[must_use]
pub fn require_credentials(password: Option<String>, project_id: Option<String>) -> ApprovalHook {
    Arc::new(move |request| {
        let login = &request.login;
        if let Some(expected) = &password
            && login.password() != Some(expected.as_str())
        {
            return Err("wrong password".to_owned());
        }
        if let Some(expected) = &project_id
            && login.project_id() != Some(expected.as_str())
        {
            return Err(format!("unknown project {:?}", login.project_id().unwrap_or("")));
        }
        Ok(())
    })
}
