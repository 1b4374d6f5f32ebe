use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;
use crate::transport::Backend;

/// Health check handler.
/// Returns JSON with status, pool counts, and a config summary.
pub fn health_handler<B: Backend>(State(state): State<Arc<AppState<B>>>) -> Json<Value> {
    let config = &state.config;
    let pool = state.pool_snapshot();
    Json(json!({
        "status": "msgbridge is running",
        "accounts": {
            "active": pool.active,
            "error": pool.error,
            "quota_exhausted": pool.quota_exhausted,
            "banned": pool.banned,
        },
        "config": {
            "client_keys_count": state.client_key_count(),
            "models_count": config.backend.models.len(),
            "max_attempts": config.failover.max_attempts,
            "log_level": config.features.log_level,
        }
    }))
}
