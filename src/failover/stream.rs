use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::{sleep_before_retry, Attempts, BuildRequest, CallScope, Orchestrator};
use crate::error::GatewayError;
use crate::observability::token_counter::estimate_tokens_for_len;
use crate::pool::{Account, Credentials};
use crate::stream::{StreamDecoder, StreamEvent};
use crate::transport::{Backend, BackendBody, BackendFault};

const RELAY_CAPACITY: usize = 64;

/// Item sent from the backend pump to the response writer.
#[derive(Debug)]
pub enum Relay {
    Event(StreamEvent),
    /// The pump moved to another account; any open block must be closed.
    Switched { account_id: String },
    Done(StreamSummary),
    Failed(GatewayError),
}

/// Totals reported when a stream completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub account_id: String,
    pub attempts: u32,
    /// Estimated from text and thinking across every account used.
    pub output_tokens: u64,
}

/// An accepted stream: the first backend call already succeeded.
pub struct StreamHandle {
    pub account_id: String,
    pub relay: mpsc::Receiver<Relay>,
}

struct Connected {
    account: Account,
    body: BackendBody,
    refreshed: Option<Credentials>,
}

enum BodyEnd {
    Complete,
    Fault(BackendFault),
    ClientGone,
}

impl<B: Backend> Orchestrator<B> {
    /// Open a backend stream and start the relay pump.
    ///
    /// Faults before the first successful call are retried here and surface as
    /// the returned error; later faults switch accounts inside the pump.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`GatewayError`] when no account accepts the call.
    pub async fn open_stream(
        &self,
        scope: &CallScope,
        build: BuildRequest,
        thinking_enabled: bool,
    ) -> Result<StreamHandle, GatewayError> {
        let mut attempts = self.begin(scope);
        let connected = self.connect(&mut attempts, &build).await?;
        let account_id = connected.account.id.clone();
        let (tx, rx) = mpsc::channel(RELAY_CAPACITY);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator
                .pump(attempts, connected, build, thinking_enabled, tx)
                .await;
        });
        Ok(StreamHandle {
            account_id,
            relay: rx,
        })
    }

    async fn connect(
        &self,
        attempts: &mut Attempts,
        build: &BuildRequest,
    ) -> Result<Connected, GatewayError> {
        loop {
            let mut account = self.acquire(attempts)?;
            match self.call_account(&mut account, build).await {
                Ok((body, refreshed)) => {
                    return Ok(Connected {
                        account,
                        body,
                        refreshed,
                    })
                }
                Err(fault) => {
                    let delay = self.on_fault(attempts, &account, fault)?;
                    sleep_before_retry(delay).await;
                }
            }
        }
    }

    async fn pump(
        self,
        mut attempts: Attempts,
        mut connected: Connected,
        build: BuildRequest,
        thinking_enabled: bool,
        tx: mpsc::Sender<Relay>,
    ) {
        let mut output_len = 0usize;
        loop {
            let mut pending = Vec::new();
            if let Some(credentials) = connected.refreshed.take() {
                pending.push(StreamEvent::TokenRefreshed { credentials });
            }
            let end = relay_body(
                &mut connected.body,
                StreamDecoder::new(thinking_enabled),
                pending,
                &tx,
                &mut output_len,
            )
            .await;

            let fault = match end {
                BodyEnd::Complete => {
                    self.pool.mark_success(&connected.account.id);
                    let summary = StreamSummary {
                        account_id: connected.account.id.clone(),
                        attempts: attempts.used,
                        output_tokens: estimate_tokens_for_len(output_len),
                    };
                    let _ = tx.send(Relay::Done(summary)).await;
                    return;
                }
                BodyEnd::ClientGone => {
                    tracing::debug!(
                        account_id = %connected.account.id,
                        "client disconnected; discarding backend stream"
                    );
                    self.discard_body(&mut connected).await;
                    return;
                }
                BodyEnd::Fault(fault) => fault,
            };

            if tx.is_closed() {
                self.record_fault(&connected.account, &fault);
                return;
            }
            match self.on_fault(&mut attempts, &connected.account, fault) {
                Ok(delay) => sleep_before_retry(delay).await,
                Err(err) => {
                    let _ = tx.send(Relay::Failed(err)).await;
                    return;
                }
            }
            connected = match self.connect(&mut attempts, &build).await {
                Ok(next) => next,
                Err(err) => {
                    let _ = tx.send(Relay::Failed(err)).await;
                    return;
                }
            };
            tracing::info!(
                account_id = %connected.account.id,
                attempts = attempts.used,
                "stream resumed on another account"
            );
            let switched = Relay::Switched {
                account_id: connected.account.id.clone(),
            };
            if tx.send(switched).await.is_err() {
                self.discard_body(&mut connected).await;
                return;
            }
        }
    }

    /// Read out a body nobody will see; a fault it ends with is still recorded.
    async fn discard_body(&self, connected: &mut Connected) {
        while let Some(chunk) = connected.body.next().await {
            if let Err(fault) = chunk {
                self.record_fault(&connected.account, &fault);
                return;
            }
        }
    }
}

/// Decode one backend body into the relay until it ends, faults, or the client leaves.
async fn relay_body(
    body: &mut BackendBody,
    mut decoder: StreamDecoder,
    mut pending: Vec<StreamEvent>,
    tx: &mpsc::Sender<Relay>,
    output_len: &mut usize,
) -> BodyEnd {
    loop {
        for event in pending.drain(..) {
            if tx.is_closed() {
                return BodyEnd::ClientGone;
            }
            *output_len += output_len_of(&event);
            if tx.send(Relay::Event(event)).await.is_err() {
                return BodyEnd::ClientGone;
            }
        }
        match body.next().await {
            Some(Ok(chunk)) => decoder.feed_into(&chunk, &mut pending),
            Some(Err(fault)) => return BodyEnd::Fault(fault),
            None => {
                decoder.finish_into(&mut pending);
                for event in pending.drain(..) {
                    *output_len += output_len_of(&event);
                    if tx.send(Relay::Event(event)).await.is_err() {
                        return BodyEnd::ClientGone;
                    }
                }
                return BodyEnd::Complete;
            }
        }
    }
}

fn output_len_of(event: &StreamEvent) -> usize {
    match event {
        StreamEvent::ContentDelta { text } | StreamEvent::ThinkingDelta { text } => text.len(),
        StreamEvent::ToolUse { input, .. } => input.to_string().len(),
        _ => 0,
    }
}
