mod request_id;

use std::sync::Arc;

use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys, ClientScope};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::failover::{FailoverSettings, Orchestrator};
use crate::pool::{AccountPool, InMemoryAccountPool, PoolSnapshot};
use crate::transport::{Backend, HttpBackend};

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState<B = HttpBackend> {
    pub config: AppConfig,
    pub orchestrator: Orchestrator<B>,
    pool: Arc<InMemoryAccountPool>,
    allowed_client_keys: AllowedClientKeys,
    request_ids: RequestIdGenerator,
}

impl<B: Backend> AppState<B> {
    /// Build state with the account pool seeded from `config.accounts`.
    #[must_use]
    pub fn new(config: AppConfig, backend: Arc<B>) -> Self {
        let pool = Arc::new(InMemoryAccountPool::from_config(&config.accounts));
        let dyn_pool: Arc<dyn AccountPool> = pool.clone();
        let orchestrator = Orchestrator::new(
            backend,
            dyn_pool,
            FailoverSettings {
                max_attempts: config.failover.max_attempts,
                refresh_skew_secs: config.backend.refresh_skew_secs,
            },
        );
        let allowed_client_keys = build_allowed_key_set(&config);
        Self {
            config,
            orchestrator,
            pool,
            allowed_client_keys,
            request_ids: RequestIdGenerator::new(),
        }
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    #[must_use]
    pub fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        self.request_ids.request_uuid(request_seq)
    }

    /// Authenticate a request using the prebuilt key index.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<ClientScope, GatewayError> {
        authenticate(headers, &self.allowed_client_keys)
    }

    #[must_use]
    pub fn pool(&self) -> &InMemoryAccountPool {
        &self.pool
    }

    #[must_use]
    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }

    #[must_use]
    pub fn client_key_count(&self) -> usize {
        self.allowed_client_keys.len()
    }
}
