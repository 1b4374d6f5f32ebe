//! `POST /v1/messages` and `POST /v1/messages/count_tokens`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName};
use axum::response::{IntoResponse, Json, Response};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{into_axum_response, GatewayError};
use crate::failover::{BuildRequest, CallScope, Relay};
use crate::observability::token_counter::estimate_request_tokens;
use crate::observability::{log_request_complete, Completion};
use crate::pool::Account;
use crate::protocol::error_shapes::messages_error_type;
use crate::protocol::messages::validate::{
    parse_messages_request, validate_count_tokens_request, validate_messages_request,
};
use crate::protocol::messages::{CountTokensResponse, MessagesRequest, MessagesStreamEvent};
use crate::state::AppState;
use crate::stream::{collect_response, encode_sse_frame, ResponseEncoder};
use crate::translate::{translate_request, TranslateContext};
use crate::transport::Backend;
use crate::util::format_request_seq_hex;

const X_ACCOUNT_ID: HeaderName = HeaderName::from_static("x-account-id");

pub async fn handler<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handler_inner(state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "messages request failed");
            into_axum_response(&err)
        }
    }
}

pub fn count_tokens_handler<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let result = state
        .authenticate(headers)
        .and_then(|_| parse_messages_request(body))
        .and_then(|request| {
            validate_count_tokens_request(&request)?;
            Ok(request)
        });
    match result {
        Ok(request) => Json(CountTokensResponse {
            input_tokens: estimate_request_tokens(&request),
        })
        .into_response(),
        Err(err) => into_axum_response(&err),
    }
}

/// Per-request values shared by the batch and stream paths.
struct RequestMeta {
    request_id: String,
    model: String,
    input_tokens: u64,
    start: Instant,
}

async fn handler_inner<B: Backend>(
    state: Arc<AppState<B>>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let client = state.authenticate(headers)?;
    let request = parse_messages_request(body)?;
    validate_messages_request(&request)?;

    let request_seq = state.next_request_seq();
    let meta = RequestMeta {
        request_id: format_request_seq_hex("msg_", request_seq),
        model: request.model.clone(),
        input_tokens: estimate_request_tokens(&request),
        start: Instant::now(),
    };
    let scope = CallScope {
        group: client.group,
        explicit_account: headers
            .get(X_ACCOUNT_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
    };
    let thinking_enabled = request.thinking_budget().is_some();
    let stream = request.is_stream();
    tracing::info!(
        request_id = %meta.request_id,
        model = %meta.model,
        stream,
        thinking = thinking_enabled,
        messages = request.messages.len(),
        "messages request"
    );

    let build = build_request_fn(&state, request, request_seq);
    if stream {
        stream_response(&state, &scope, build, thinking_enabled, meta).await
    } else {
        batch_response(&state, &scope, &build, thinking_enabled, &meta).await
    }
}

fn build_request_fn<B: Backend>(
    state: &AppState<B>,
    request: MessagesRequest,
    request_seq: u64,
) -> BuildRequest {
    let backend = &state.config.backend;
    let conversation_id = state.request_uuid(request_seq).to_string();
    let model_id = backend.resolve_model_id(&request.model).to_string();
    let origin = backend.origin.clone();
    let settings = state.config.translator.clone();
    Arc::new(move |account: &Account| {
        let ctx = TranslateContext {
            conversation_id: &conversation_id,
            model_id: &model_id,
            origin: &origin,
            settings: &settings,
        };
        translate_request(&request, account, &ctx)
    })
}

async fn batch_response<B: Backend>(
    state: &AppState<B>,
    scope: &CallScope,
    build: &BuildRequest,
    thinking_enabled: bool,
    meta: &RequestMeta,
) -> Result<Response, GatewayError> {
    let outcome = state
        .orchestrator
        .run_batch(scope, build, thinking_enabled)
        .await?;
    let encoder = ResponseEncoder::new(&meta.request_id, &meta.model, meta.input_tokens);
    let response = collect_response(encoder, &outcome.events);
    log_request_complete(
        &Completion {
            request_id: &meta.request_id,
            model: &meta.model,
            account_id: &outcome.account_id,
            attempts: outcome.attempts,
            input_tokens: meta.input_tokens,
            output_tokens: response.usage.output_tokens,
            stream: false,
        },
        meta.start,
    );
    Ok(Json(response).into_response())
}

async fn stream_response<B: Backend>(
    state: &AppState<B>,
    scope: &CallScope,
    build: BuildRequest,
    thinking_enabled: bool,
    meta: RequestMeta,
) -> Result<Response, GatewayError> {
    let handle = state
        .orchestrator
        .open_stream(scope, build, thinking_enabled)
        .await?;
    tracing::debug!(
        request_id = %meta.request_id,
        account_id = %handle.account_id,
        "backend stream opened"
    );
    let mut encoder = ResponseEncoder::new(&meta.request_id, &meta.model, meta.input_tokens);
    let head = frames_to_bytes(&encoder.start());
    let relay = SseRelay {
        encoder,
        relay: handle.relay,
        meta,
        finished: false,
    };
    let body = stream::iter([Ok::<_, Infallible>(head)]).chain(relay.into_stream());
    Ok(sse_ok_response(Body::from_stream(body)))
}

/// Turns relay items into SSE bytes for the client.
struct SseRelay {
    encoder: ResponseEncoder,
    relay: mpsc::Receiver<Relay>,
    meta: RequestMeta,
    finished: bool,
}

impl SseRelay {
    fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        stream::unfold(self, |mut relay| async move {
            loop {
                if relay.finished {
                    return None;
                }
                let frames = relay.next_frames().await;
                if !frames.is_empty() {
                    return Some((Ok(frames_to_bytes(&frames)), relay));
                }
            }
        })
    }

    async fn next_frames(&mut self) -> Vec<MessagesStreamEvent> {
        match self.relay.recv().await {
            Some(Relay::Event(event)) => self.encoder.encode(&event),
            Some(Relay::Switched { account_id }) => {
                tracing::info!(
                    request_id = %self.meta.request_id,
                    account_id = %account_id,
                    "stream switched account"
                );
                self.encoder.on_account_switch()
            }
            Some(Relay::Done(summary)) => {
                self.finished = true;
                log_request_complete(
                    &Completion {
                        request_id: &self.meta.request_id,
                        model: &self.meta.model,
                        account_id: &summary.account_id,
                        attempts: summary.attempts,
                        input_tokens: self.meta.input_tokens,
                        output_tokens: summary.output_tokens,
                        stream: true,
                    },
                    self.meta.start,
                );
                self.encoder.finish()
            }
            Some(Relay::Failed(err)) => {
                self.finished = true;
                tracing::warn!(
                    request_id = %self.meta.request_id,
                    error = %err,
                    "stream failed after start"
                );
                self.error_and_finish(messages_error_type(err.category()), &err.to_string())
            }
            None => {
                self.finished = true;
                self.error_and_finish("api_error", "backend stream ended unexpectedly")
            }
        }
    }

    fn error_and_finish(&mut self, error_type: &str, message: &str) -> Vec<MessagesStreamEvent> {
        let mut frames = self.encoder.error(error_type, message);
        frames.extend(self.encoder.finish());
        frames
    }
}

fn frames_to_bytes(frames: &[MessagesStreamEvent]) -> Bytes {
    let mut out = BytesMut::new();
    for frame in frames {
        out.extend_from_slice(&encode_sse_frame(frame));
    }
    out.freeze()
}

#[inline]
fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
