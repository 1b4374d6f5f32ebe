use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::error::into_axum_response;
use crate::state::AppState;
use crate::transport::Backend;

const MODEL_CREATED_AT: u64 = 1_717_200_000;

/// List the configured external model names in Messages format.
pub fn handler<B: Backend>(State(state): State<Arc<AppState<B>>>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return into_axum_response(&err);
    }
    let mut ids: Vec<&str> = state
        .config
        .backend
        .models
        .keys()
        .map(String::as_str)
        .collect();
    ids.sort_unstable();
    let data: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "type": "model",
                "object": "model",
                "display_name": id,
                "created": MODEL_CREATED_AT,
                "owned_by": "msgbridge",
            })
        })
        .collect();
    Json(json!({
        "object": "list",
        "data": data,
        "has_more": false,
        "first_id": ids.first(),
        "last_id": ids.last(),
    }))
    .into_response()
}
