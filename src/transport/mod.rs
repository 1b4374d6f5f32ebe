//! Backend transport: the call/refresh contract and its HTTP implementation.

mod http_backend;
pub(crate) mod retry_policy;

pub use http_backend::HttpBackend;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::pool::{Account, Credentials};
use crate::protocol::backend::BackendRequest;

/// Raw backend response body.
pub type BackendBody = BoxStream<'static, Result<Bytes, BackendFault>>;

/// Classified backend failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendFault {
    /// Expired or rejected access token; worth one refresh.
    #[error("backend rejected credentials (status {status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("account quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("account banned: {0}")]
    Banned(String),
    /// Timeouts, connection failures, throttling, and 5xx responses.
    #[error("transient backend failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    /// The backend refused the request itself; another account will not help.
    #[error("backend rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl BackendFault {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        BackendFault::Transient {
            message: message.into(),
            retry_after: None,
        }
    }
}

/// Backend call contract consumed by the failover orchestrator.
pub trait Backend: Send + Sync + 'static {
    /// Issue one chat call. A successful result means the backend accepted the
    /// call and the body is ready to stream.
    fn send(
        &self,
        request: &BackendRequest,
        account: &Account,
    ) -> impl Future<Output = Result<BackendBody, BackendFault>> + Send;

    /// Exchange the account's refresh token for fresh credentials.
    fn refresh_token(
        &self,
        account: &Account,
    ) -> impl Future<Output = Result<Credentials, BackendFault>> + Send;
}
