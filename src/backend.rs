//! Interfaces to the account and storage services a deployment plugs in.
//!
//! The core never calls these itself; applications call them from their
//! services (for example to turn a login's verification code into a user
//! identity). Every call can be abandoned locally with
//! [`with_cancellation`], which does not notify the remote side.

use std::{collections::HashMap, future::Future};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors returned by backend calls.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The caller stopped waiting.
    #[error("backend call cancelled")]
    Cancelled,
    /// The verification code is unknown, expired or for another project.
    #[error("verification rejected: {0}")]
    Rejected(String),
    /// The backend could not be reached or failed internally.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Credentials to verify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationRequest {
    /// Code presented by the client.
    pub code: String,
    /// Project the client wants to join.
    pub project_id: String,
}

/// Identity established by a successful verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedUser {
    /// Numeric account id.
    pub user_id: u64,
    /// Account display name.
    pub user_name: String,
}

/// Account backend turning verification codes into identities.
#[async_trait]
pub trait AccountBackend: Send + Sync {
    /// Verify `request`.
    async fn verify(&self, request: VerificationRequest) -> Result<VerifiedUser, BackendError>;
}

/// Storage backend handing out transfer URLs.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upload URLs for `names`.
    async fn upload_urls(&self, names: &[String]) -> Result<HashMap<String, String>, BackendError>;

    /// Download URLs for `names`.
    async fn download_urls(&self, names: &[String])
    -> Result<HashMap<String, String>, BackendError>;
}

/// Await `call` unless `token` is cancelled first.
///
/// # Errors
///
/// Returns [`BackendError::Cancelled`] on cancellation, otherwise the call's
/// own result.
///
/// # Examples
///
/// ```
/// use muxframe::backend::{BackendError, with_cancellation};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let token = CancellationToken::new();
/// token.cancel();
/// let result = with_cancellation(&token, std::future::pending::<Result<(), BackendError>>()).await;
/// assert_eq!(result, Err(BackendError::Cancelled));
/// # }
/// ```
pub async fn with_cancellation<T, F>(token: &CancellationToken, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::select! {
        biased;

        () = token.cancelled() => Err(BackendError::Cancelled),
        result = call => result,
    }
}

/// In-memory account backend keyed by `(project, code)`.
#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    codes: DashMap<(String, String), VerifiedUser>,
}

impl InMemoryAccounts {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Make `code` verify as `user` within `project_id`.
    pub fn issue(&self, project_id: impl Into<String>, code: impl Into<String>, user: VerifiedUser) {
        self.codes.insert((project_id.into(), code.into()), user);
    }
}

#[async_trait]
impl AccountBackend for InMemoryAccounts {
    async fn verify(&self, request: VerificationRequest) -> Result<VerifiedUser, BackendError> {
        self.codes
            .get(&(request.project_id, request.code))
            .map(|user| user.value().clone())
            .ok_or_else(|| BackendError::Rejected("unknown verification code".to_owned()))
    }
}

/// In-memory storage backend that mints URLs under a base address.
#[derive(Clone, Debug)]
pub struct InMemoryStorage {
    base_url: String,
}

impl InMemoryStorage {
    /// Mint URLs under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn urls(&self, kind: &str, names: &[String]) -> HashMap<String, String> {
        names
            .iter()
            .map(|name| {
                let url = format!("{}/{kind}/{}", self.base_url, urlencoding::encode(name));
                (name.clone(), url)
            })
            .collect()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn upload_urls(&self, names: &[String]) -> Result<HashMap<String, String>, BackendError> {
        Ok(self.urls("upload", names))
    }

    async fn download_urls(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, String>, BackendError> {
        Ok(self.urls("download", names))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn accounts() -> InMemoryAccounts {
        let accounts = InMemoryAccounts::new();
        accounts.issue(
            "proj",
            "1234",
            VerifiedUser {
                user_id: 7,
                user_name: "ada".into(),
            },
        );
        accounts
    }

    #[tokio::test]
    async fn issued_codes_verify() {
        let user = accounts()
            .verify(VerificationRequest {
                code: "1234".into(),
                project_id: "proj".into(),
            })
            .await
            .expect("verified");
        assert_eq!(user.user_id, 7);
    }

    #[tokio::test]
    async fn codes_are_scoped_to_projects() {
        let result = accounts()
            .verify(VerificationRequest {
                code: "1234".into(),
                project_id: "other".into(),
            })
            .await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }

    #[tokio::test]
    async fn cancellation_abandons_slow_calls() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, BackendError>(())
        };
        assert_eq!(with_cancellation(&token, slow).await, Err(BackendError::Cancelled));
    }

    #[tokio::test]
    async fn storage_urls_are_escaped() {
        let storage = InMemoryStorage::new("http://files.local/");
        let urls = storage
            .download_urls(&["scene 1.bin".to_owned()])
            .await
            .expect("urls");
        assert_eq!(urls["scene 1.bin"], "http://files.local/download/scene%201.bin");
    }
}
