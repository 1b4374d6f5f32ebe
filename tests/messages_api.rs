use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use msgbridge::api::dispatch::dispatch_request;
use msgbridge::config::parse_config;
use msgbridge::pool::{Account, AccountPool, AccountState, Credentials};
use msgbridge::protocol::backend::BackendRequest;
use msgbridge::state::AppState;
use msgbridge::transport::{Backend, BackendBody, BackendFault};

type Chunks = Vec<Result<Bytes, BackendFault>>;
type Scripted = Result<Chunks, BackendFault>;

/// Per-account queue of scripted responses; records every request it sees.
#[derive(Default)]
struct ScriptedBackend {
    scripts: Mutex<FxHashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    fn body(&self, account_id: &str, chunks: Chunks) {
        self.push(account_id, Ok(chunks));
    }

    fn fail(&self, account_id: &str, fault: BackendFault) {
        self.push(account_id, Err(fault));
    }

    fn push(&self, account_id: &str, entry: Scripted) {
        self.scripts
            .lock()
            .entry(account_id.to_string())
            .or_default()
            .push_back(entry);
    }
}

impl Backend for ScriptedBackend {
    fn send(
        &self,
        request: &BackendRequest,
        account: &Account,
    ) -> impl Future<Output = Result<BackendBody, BackendFault>> + Send {
        self.requests.lock().push(request.clone());
        let entry = self
            .scripts
            .lock()
            .get_mut(&account.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(BackendFault::transient("no script")));
        let result = entry.map(|chunks| futures_util::stream::iter(chunks).boxed());
        async move { result }
    }

    fn refresh_token(
        &self,
        account: &Account,
    ) -> impl Future<Output = Result<Credentials, BackendFault>> + Send {
        let credentials = account.credentials.clone();
        async move { Ok(credentials) }
    }
}

const CONFIG: &str = r"
backend:
  base_url: https://backend.example.com/generateAssistantResponse
  refresh_url: https://auth.example.com/refreshToken
  models:
    claude-sonnet-4: CLAUDE_SONNET_4_V1_0
accounts:
  - id: acc-1
    access_token: at1
    refresh_token: rt1
  - id: acc-2
    access_token: at2
    refresh_token: rt2
client_authentication:
  allowed_keys: [client-key]
";

fn build_state() -> (Arc<ScriptedBackend>, Arc<AppState<ScriptedBackend>>) {
    let backend = Arc::new(ScriptedBackend::default());
    let config = parse_config(CONFIG).unwrap();
    let state = Arc::new(AppState::new(config, Arc::clone(&backend)));
    (backend, state)
}

fn frame(text: &str) -> Result<Bytes, BackendFault> {
    Ok(Bytes::from(json!({ "content": text }).to_string()))
}

async fn send(
    state: &Arc<AppState<ScriptedBackend>>,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> Response {
    let builder = Request::builder()
        .method(method)
        .uri(path)
        .header("x-api-key", "client-key")
        .header("content-type", "application/json");
    let body = body.map_or_else(Body::empty, |value| Body::from(value.to_string()));
    dispatch_request(Arc::clone(state), Arc::from(""), builder.body(body).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn parse_sse(raw: &[u8]) -> Vec<(String, Value)> {
    let text = std::str::from_utf8(raw).unwrap();
    text.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            let mut lines = frame.lines();
            let event = lines.next().unwrap().strip_prefix("event: ").unwrap();
            let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
            (event.to_string(), serde_json::from_str(data).unwrap())
        })
        .collect()
}

fn chat_request(stream: bool) -> Value {
    json!({
        "model": "claude-sonnet-4",
        "max_tokens": 256,
        "stream": stream,
        "system": "Be brief.",
        "messages": [{"role": "user", "content": "Hi"}]
    })
}

#[tokio::test]
async fn test_non_stream_response_and_backend_request_shape() {
    let (backend, state) = build_state();
    backend.body(
        "acc-1",
        vec![
            frame("Hello "),
            frame("<tool_use>{\"id\":\"t1\",\"name\":\"search\",\"input\":{\"q\":\"rust\"}}</tool_use>"),
        ],
    );

    let response = send(&state, "POST", "/v1/messages", Some(chat_request(false))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["id"].as_str().unwrap().starts_with("msg_"));
    assert_eq!(body["model"], "claude-sonnet-4");
    assert_eq!(body["stop_reason"], "tool_use");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hello ");
    assert_eq!(body["content"][1]["type"], "tool_use");
    assert_eq!(body["content"][1]["input"]["q"], "rust");

    let requests = backend.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    let current = requests[0].current();
    assert_eq!(current.model_id, "CLAUDE_SONNET_4_V1_0");
    assert!(current.content.starts_with("Be brief."));
    assert!(current.content.ends_with("Hi"));
}

#[tokio::test]
async fn test_stream_survives_account_switch() {
    let (backend, state) = build_state();
    backend.body(
        "acc-1",
        vec![
            frame("Hel"),
            Err(BackendFault::Transient {
                message: "connection reset".to_string(),
                retry_after: Some(Duration::ZERO),
            }),
        ],
    );
    backend.body("acc-2", vec![frame("lo")]);

    let response = send(&state, "POST", "/v1/messages", Some(chat_request(true))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );
    let events = parse_sse(&body_bytes(response).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "ping",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert_eq!(events[3].1["index"], 0);
    assert_eq!(events[3].1["delta"]["text"], "Hel");
    assert_eq!(events[6].1["index"], 1);
    assert_eq!(events[6].1["delta"]["text"], "lo");
    assert_eq!(events[8].1["delta"]["stop_reason"], "end_turn");
    assert_eq!(
        state.pool().snapshot().error,
        1,
        "the faulted account is marked before the switch"
    );
}

#[tokio::test]
async fn test_stream_failure_after_start_is_in_band() {
    let (backend, state) = build_state();
    for id in ["acc-1", "acc-2"] {
        backend.body(
            id,
            vec![frame("x"), Err(BackendFault::QuotaExhausted("limit".to_string()))],
        );
    }

    let response = send(&state, "POST", "/v1/messages", Some(chat_request(true))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let events = parse_sse(&body_bytes(response).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    let error_at = names.iter().position(|name| *name == "error").unwrap();
    assert_eq!(events[error_at].1["error"]["type"], "rate_limit_error");
    assert_eq!(&names[names.len() - 2..], &["message_delta", "message_stop"]);
}

#[tokio::test]
async fn test_quota_exhausted_before_stream_maps_to_429() {
    let (backend, state) = build_state();
    for id in ["acc-1", "acc-2"] {
        backend.fail(id, BackendFault::QuotaExhausted("monthly limit".to_string()));
    }

    let response = send(&state, "POST", "/v1/messages", Some(chat_request(true))).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(
        state.pool().account_by_id("acc-1").unwrap().state,
        AccountState::QuotaExhausted
    );
}

#[tokio::test]
async fn test_validation_and_auth_errors() {
    let (_backend, state) = build_state();
    let response = send(
        &state,
        "POST",
        "/v1/messages",
        Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["type"], "invalid_request_error");

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("x-api-key", "wrong")
        .body(Body::from(chat_request(false).to_string()))
        .unwrap();
    let response = dispatch_request(Arc::clone(&state), Arc::from(""), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_count_tokens_models_and_health() {
    let (_backend, state) = build_state();
    let response = send(
        &state,
        "POST",
        "/v1/messages/count_tokens",
        Some(json!({"model": "m", "messages": [{"role": "user", "content": "12345678"}]})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["input_tokens"], 2);

    let response = send(&state, "GET", "/v1/models", None).await;
    let body = json_body(response).await;
    assert_eq!(body["data"][0]["id"], "claude-sonnet-4");

    let response = send(&state, "GET", "/", None).await;
    let body = json_body(response).await;
    assert_eq!(body["accounts"]["active"], 2);

    let response = send(&state, "GET", "/v1/messages", None).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
