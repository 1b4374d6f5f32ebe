//! Account selection, backend calls, and cross-account retry.
//!
//! Every fault is recorded on the account before the retry decision is made.
//! A request that names an explicit account never moves to another one.

mod stream;

pub use stream::{Relay, StreamHandle, StreamSummary};

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::error::GatewayError;
use crate::pool::{Account, AccountPool, AccountState, Credentials};
use crate::protocol::backend::BackendRequest;
use crate::stream::{decode_stream, StreamEvent};
use crate::transport::retry_policy::retry_delay;
use crate::transport::{Backend, BackendBody, BackendFault};
use crate::util::unix_now_secs;

/// Builds the backend request for the chosen account.
pub type BuildRequest = Arc<dyn Fn(&Account) -> BackendRequest + Send + Sync>;

/// Caller-derived account constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallScope {
    /// Account group the caller may use; `None` means any.
    pub group: Option<String>,
    /// Account id requested by the caller.
    pub explicit_account: Option<String>,
}

/// Result of a batched call.
#[derive(Debug)]
pub struct BatchOutcome {
    pub events: Vec<StreamEvent>,
    pub account_id: String,
    pub attempts: u32,
}

/// Retry settings.
#[derive(Debug, Clone, Copy)]
pub struct FailoverSettings {
    pub max_attempts: u32,
    pub refresh_skew_secs: u64,
}

/// Per-request attempt bookkeeping.
struct Attempts {
    group: Option<String>,
    pinned: Option<Account>,
    tried: Vec<String>,
    used: u32,
    max: u32,
    last_fault: Option<BackendFault>,
}

/// Drives backend calls across the account pool.
pub struct Orchestrator<B> {
    backend: Arc<B>,
    pool: Arc<dyn AccountPool>,
    settings: FailoverSettings,
}

impl<B> Clone for Orchestrator<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            pool: Arc::clone(&self.pool),
            settings: self.settings,
        }
    }
}

impl<B: Backend> Orchestrator<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, pool: Arc<dyn AccountPool>, settings: FailoverSettings) -> Self {
        Self {
            backend,
            pool,
            settings,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<dyn AccountPool> {
        &self.pool
    }

    /// Run one request to completion and decode the whole body.
    ///
    /// A body that fails part-way is discarded and the call is retried in full.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`GatewayError`] once retries are exhausted or the
    /// fault is not retryable.
    pub async fn run_batch(
        &self,
        scope: &CallScope,
        build: &BuildRequest,
        thinking_enabled: bool,
    ) -> Result<BatchOutcome, GatewayError> {
        let mut attempts = self.begin(scope);
        loop {
            let mut account = self.acquire(&mut attempts)?;
            let outcome = match self.call_account(&mut account, build).await {
                Ok((body, refreshed)) => drain_body(body, refreshed, thinking_enabled).await,
                Err(fault) => Err(fault),
            };
            match outcome {
                Ok(events) => {
                    self.pool.mark_success(&account.id);
                    return Ok(BatchOutcome {
                        events,
                        account_id: account.id,
                        attempts: attempts.used,
                    });
                }
                Err(fault) => {
                    let delay = self.on_fault(&mut attempts, &account, fault)?;
                    sleep_before_retry(delay).await;
                }
            }
        }
    }

    fn begin(&self, scope: &CallScope) -> Attempts {
        let pinned = scope.explicit_account.as_deref().and_then(|id| {
            let account = self.pool.account_by_id(id);
            match account {
                Some(account)
                    if account.in_group(scope.group.as_deref())
                        && account.state != AccountState::Banned =>
                {
                    Some(account)
                }
                _ => {
                    tracing::info!(
                        account_id = id,
                        "requested account unavailable; using pool rotation"
                    );
                    None
                }
            }
        });
        let max = if pinned.is_some() {
            1
        } else {
            self.settings.max_attempts.max(1)
        };
        Attempts {
            group: scope.group.clone(),
            pinned,
            tried: Vec::new(),
            used: 0,
            max,
            last_fault: None,
        }
    }

    fn acquire(&self, attempts: &mut Attempts) -> Result<Account, GatewayError> {
        if attempts.used >= attempts.max {
            return Err(exhausted_error(attempts.last_fault.as_ref()));
        }
        let account = match &attempts.pinned {
            Some(account) => account.clone(),
            None => self
                .pool
                .next_account(attempts.group.as_deref(), &attempts.tried)
                .ok_or_else(|| exhausted_error(attempts.last_fault.as_ref()))?,
        };
        attempts.used += 1;
        attempts.tried.push(account.id.clone());
        tracing::debug!(account_id = %account.id, attempt = attempts.used, "backend attempt");
        Ok(account)
    }

    /// Record `fault` on the account, then decide: `Ok(delay)` to retry, `Err` to stop.
    fn on_fault(
        &self,
        attempts: &mut Attempts,
        account: &Account,
        fault: BackendFault,
    ) -> Result<Duration, GatewayError> {
        self.record_fault(account, &fault);
        let retry = is_retryable(&fault)
            && attempts.pinned.is_none()
            && attempts.used < attempts.max;
        if !retry {
            tracing::warn!(
                account_id = %account.id,
                attempts = attempts.used,
                error = %fault,
                "backend call failed; giving up"
            );
            return Err(terminal_error(&fault));
        }
        tracing::warn!(
            account_id = %account.id,
            attempts = attempts.used,
            error = %fault,
            "backend call failed; switching account"
        );
        let delay = retry_delay(&fault, attempts.used.saturating_sub(1));
        attempts.last_fault = Some(fault);
        Ok(delay)
    }

    fn record_fault(&self, account: &Account, fault: &BackendFault) {
        match fault {
            BackendFault::QuotaExhausted(reason) => {
                self.pool.mark_quota_exhausted(&account.id, reason);
            }
            BackendFault::Banned(reason) => self.pool.mark_banned(&account.id, reason),
            BackendFault::Unauthorized { .. } | BackendFault::Transient { .. } => {
                self.pool.mark_error(&account.id, &fault.to_string());
            }
            // The request itself was refused; the account is not at fault.
            BackendFault::Rejected { .. } => {}
        }
    }

    /// One account's call: proactive refresh, send, and a single refresh plus
    /// replay when the access token is rejected.
    async fn call_account(
        &self,
        account: &mut Account,
        build: &BuildRequest,
    ) -> Result<(BackendBody, Option<Credentials>), BackendFault> {
        if account
            .credentials
            .expires_within(unix_now_secs(), self.settings.refresh_skew_secs)
        {
            tracing::info!(account_id = %account.id, "access token near expiry; refreshing");
            self.refresh(account).await?;
        }

        let request = build(&*account);
        match self.backend.send(&request, account).await {
            Ok(body) => Ok((body, None)),
            Err(BackendFault::Unauthorized { status, .. }) => {
                tracing::info!(
                    account_id = %account.id,
                    status,
                    "access token rejected; refreshing and replaying"
                );
                let credentials = self.refresh(account).await?;
                let body = self.backend.send(&request, account).await?;
                Ok((body, Some(credentials)))
            }
            Err(fault) => Err(fault),
        }
    }

    async fn refresh(&self, account: &mut Account) -> Result<Credentials, BackendFault> {
        let credentials = self.backend.refresh_token(account).await?;
        self.pool.update_account_token(&account.id, credentials.clone());
        account.credentials = credentials.clone();
        Ok(credentials)
    }
}

async fn drain_body(
    body: BackendBody,
    refreshed: Option<Credentials>,
    thinking_enabled: bool,
) -> Result<Vec<StreamEvent>, BackendFault> {
    let mut events = Vec::new();
    if let Some(credentials) = refreshed {
        events.push(StreamEvent::TokenRefreshed { credentials });
    }
    let mut decoded = decode_stream(body, thinking_enabled);
    while let Some(event) = decoded.next().await {
        events.push(event?);
    }
    Ok(events)
}

async fn sleep_before_retry(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn is_retryable(fault: &BackendFault) -> bool {
    !matches!(fault, BackendFault::Rejected { .. })
}

fn terminal_error(fault: &BackendFault) -> GatewayError {
    match fault {
        BackendFault::QuotaExhausted(reason) => GatewayError::QuotaExhausted(reason.clone()),
        BackendFault::Banned(reason) => GatewayError::Banned(reason.clone()),
        BackendFault::Unauthorized { .. } | BackendFault::Transient { .. } => {
            GatewayError::Retryable(fault.to_string())
        }
        BackendFault::Rejected { status, message } => GatewayError::Upstream {
            status: *status,
            message: message.clone(),
        },
    }
}

fn exhausted_error(last_fault: Option<&BackendFault>) -> GatewayError {
    match last_fault {
        Some(fault) => terminal_error(fault),
        None => GatewayError::NoAvailableAccount(
            "no active account is available for this request".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_error_mapping() {
        assert!(matches!(
            terminal_error(&BackendFault::QuotaExhausted("x".to_string())),
            GatewayError::QuotaExhausted(_)
        ));
        assert!(matches!(
            terminal_error(&BackendFault::Banned("x".to_string())),
            GatewayError::Banned(_)
        ));
        assert!(matches!(
            terminal_error(&BackendFault::transient("timeout")),
            GatewayError::Retryable(_)
        ));
        assert!(matches!(
            terminal_error(&BackendFault::Rejected {
                status: 400,
                message: "bad".to_string()
            }),
            GatewayError::Upstream { status: 400, .. }
        ));
        assert!(matches!(
            exhausted_error(None),
            GatewayError::NoAvailableAccount(_)
        ));
    }

    #[test]
    fn test_rejected_is_not_retryable() {
        assert!(!is_retryable(&BackendFault::Rejected {
            status: 400,
            message: String::new()
        }));
        assert!(is_retryable(&BackendFault::QuotaExhausted(String::new())));
    }
}
