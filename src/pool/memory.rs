use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::AccountConfig;
use crate::util::unix_now_secs;

use super::{Account, AccountPool, AccountState, Credentials};

struct PoolInner {
    accounts: Vec<Account>,
    index: FxHashMap<String, usize>,
    cursor: usize,
}

/// Account counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub active: usize,
    pub error: usize,
    pub quota_exhausted: usize,
    pub banned: usize,
}

/// Round-robin account pool held in memory behind a single lock.
pub struct InMemoryAccountPool {
    inner: Mutex<PoolInner>,
}

impl InMemoryAccountPool {
    #[must_use]
    pub fn new(accounts: Vec<Account>) -> Self {
        let index = accounts
            .iter()
            .enumerate()
            .map(|(idx, account)| (account.id.clone(), idx))
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                accounts,
                index,
                cursor: 0,
            }),
        }
    }

    #[must_use]
    pub fn from_config(accounts: &[AccountConfig]) -> Self {
        Self::new(accounts.iter().map(AccountConfig::to_account).collect())
    }

    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock();
        let mut snapshot = PoolSnapshot::default();
        for account in &inner.accounts {
            match account.state {
                AccountState::Active => snapshot.active += 1,
                AccountState::Error => snapshot.error += 1,
                AccountState::QuotaExhausted => snapshot.quota_exhausted += 1,
                AccountState::Banned => snapshot.banned += 1,
            }
        }
        snapshot
    }

    /// Clear a quota-exhausted mark after an external billing-cycle reset.
    ///
    /// Returns `false` when the account is unknown or not quota-exhausted.
    pub fn reset_quota_exhausted(&self, id: &str) -> bool {
        self.with_account(id, |account| {
            if account.state != AccountState::QuotaExhausted {
                return false;
            }
            account.state = AccountState::Active;
            account.last_error = None;
            true
        })
        .unwrap_or(false)
    }

    fn with_account<T>(&self, id: &str, f: impl FnOnce(&mut Account) -> T) -> Option<T> {
        let mut inner = self.inner.lock();
        let idx = *inner.index.get(id)?;
        inner.accounts.get_mut(idx).map(f)
    }
}

impl AccountPool for InMemoryAccountPool {
    fn next_account(&self, group: Option<&str>, exclude: &[String]) -> Option<Account> {
        let mut inner = self.inner.lock();
        let len = inner.accounts.len();
        if len == 0 {
            return None;
        }

        // Active accounts win; an errored one is only used when no active one is eligible.
        let start = inner.cursor % len;
        let mut fallback = None;
        let mut chosen = None;
        for offset in 0..len {
            let idx = (start + offset) % len;
            let account = &inner.accounts[idx];
            if !account.state.is_rotatable()
                || !account.in_group(group)
                || exclude.iter().any(|id| *id == account.id)
            {
                continue;
            }
            if account.state == AccountState::Active {
                chosen = Some(idx);
                break;
            }
            if fallback.is_none() {
                fallback = Some(idx);
            }
        }

        let idx = chosen.or(fallback)?;
        inner.cursor = (idx + 1) % len;
        let account = &mut inner.accounts[idx];
        account.request_count = account.request_count.saturating_add(1);
        account.last_used_unix = unix_now_secs();
        Some(account.clone())
    }

    fn account_by_id(&self, id: &str) -> Option<Account> {
        let inner = self.inner.lock();
        inner
            .index
            .get(id)
            .and_then(|idx| inner.accounts.get(*idx))
            .cloned()
    }

    fn mark_success(&self, id: &str) {
        self.with_account(id, |account| {
            account.error_count = 0;
            if account.state == AccountState::Error {
                account.state = AccountState::Active;
                account.last_error = None;
            }
        });
    }

    fn mark_error(&self, id: &str, reason: &str) {
        self.with_account(id, |account| {
            account.error_count = account.error_count.saturating_add(1);
            account.last_error = Some(reason.to_string());
            if account.state == AccountState::Active {
                account.state = AccountState::Error;
            }
        });
        tracing::warn!(account_id = id, reason, "account marked error");
    }

    fn mark_quota_exhausted(&self, id: &str, reason: &str) {
        self.with_account(id, |account| {
            account.last_error = Some(reason.to_string());
            if account.state != AccountState::Banned {
                account.state = AccountState::QuotaExhausted;
            }
        });
        tracing::warn!(account_id = id, reason, "account quota exhausted");
    }

    fn mark_banned(&self, id: &str, reason: &str) {
        self.with_account(id, |account| {
            account.last_error = Some(reason.to_string());
            account.state = AccountState::Banned;
        });
        tracing::error!(account_id = id, reason, "account banned");
    }

    fn update_account_token(&self, id: &str, credentials: Credentials) {
        self.with_account(id, |account| {
            account.credentials = credentials;
        });
        tracing::info!(account_id = id, "account token updated");
    }
}
