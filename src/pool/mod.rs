//! Account pool: the credentials the gateway rotates through.
//!
//! The [`AccountPool`] trait is the contract the failover orchestrator consumes.
//! [`InMemoryAccountPool`] is the bundled implementation, seeded from configuration.

mod memory;

pub use memory::{InMemoryAccountPool, PoolSnapshot};

use serde::{Deserialize, Serialize};

/// Backend credentials of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token expiry as unix seconds; `0` means unknown.
    #[serde(default)]
    pub expires_at: u64,
}

impl Credentials {
    /// Whether the access token expires before `now + skew_secs`.
    ///
    /// Unknown expiry (`0`) is treated as still valid.
    #[must_use]
    pub fn expires_within(&self, now: u64, skew_secs: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now.saturating_add(skew_secs)
    }
}

/// Health state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    #[default]
    Active,
    Error,
    QuotaExhausted,
    Banned,
}

impl AccountState {
    /// Banned and quota-exhausted accounts never take part in rotation.
    #[must_use]
    pub fn is_rotatable(self) -> bool {
        matches!(self, AccountState::Active | AccountState::Error)
    }
}

/// A backend account as handed out by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub group: Option<String>,
    pub credentials: Credentials,
    pub profile_arn: Option<String>,
    pub state: AccountState,
    pub request_count: u64,
    pub error_count: u32,
    pub last_used_unix: u64,
    pub last_error: Option<String>,
}

impl Account {
    #[must_use]
    pub fn new(id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            id: id.into(),
            group: None,
            credentials,
            profile_arn: None,
            state: AccountState::Active,
            request_count: 0,
            error_count: 0,
            last_used_unix: 0,
            last_error: None,
        }
    }

    /// Whether this account is visible to a caller scoped to `group`.
    #[must_use]
    pub fn in_group(&self, group: Option<&str>) -> bool {
        match group {
            None => true,
            Some(group) => self.group.as_deref() == Some(group),
        }
    }
}

/// Account-pool contract used by the failover orchestrator.
///
/// Implementations must make every method atomic with respect to the others;
/// the rotation cursor and per-account state are shared by all in-flight requests.
pub trait AccountPool: Send + Sync {
    /// Next rotatable account for `group`, skipping ids in `exclude`.
    fn next_account(&self, group: Option<&str>, exclude: &[String]) -> Option<Account>;

    fn account_by_id(&self, id: &str) -> Option<Account>;

    fn mark_success(&self, id: &str);

    fn mark_error(&self, id: &str, reason: &str);

    /// Sticky until cleared outside the request path.
    fn mark_quota_exhausted(&self, id: &str, reason: &str);

    /// Permanent.
    fn mark_banned(&self, id: &str, reason: &str);

    fn update_account_token(&self, id: &str, credentials: Credentials);
}
