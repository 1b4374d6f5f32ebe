use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::GatewayError;
use crate::pool::{Account, Credentials};
use crate::protocol::backend::BackendRequest;
use crate::util::unix_now_secs;

use super::retry_policy::{classify_status, classify_transport_message, parse_retry_after_delay};
use super::{Backend, BackendBody, BackendFault};

const POOL_MAX_IDLE_PER_HOST: usize = 32;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

fn build_reqwest_client(
    timeout: Option<Duration>,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, GatewayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| GatewayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    }

    builder
        .build()
        .map_err(|err| GatewayError::Config(format!("Failed to build HTTP client: {err}")))
}

fn transport_fault(err: &reqwest::Error) -> BackendFault {
    classify_transport_message(&err.to_string(), err.is_builder())
}

/// reqwest-backed [`Backend`].
///
/// Chat calls are bounded by the request timeout until response headers arrive
/// and by the idle timeout between body chunks. Refresh calls use their own
/// client with the longer refresh timeout.
pub struct HttpBackend {
    chat_client: reqwest::Client,
    refresh_client: reqwest::Client,
    chat_url: url::Url,
    refresh_url: url::Url,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when a URL or the proxy is invalid.
    pub fn new(config: &BackendConfig) -> Result<Self, GatewayError> {
        let chat_url = url::Url::parse(&config.base_url)
            .map_err(|err| GatewayError::Config(format!("backend.base_url: {err}")))?;
        let refresh_url = url::Url::parse(&config.refresh_url)
            .map_err(|err| GatewayError::Config(format!("backend.refresh_url: {err}")))?;
        let proxy = config.proxy.as_deref();
        Ok(Self {
            chat_client: build_reqwest_client(None, proxy)?,
            refresh_client: build_reqwest_client(
                Some(Duration::from_secs(config.refresh_timeout_secs)),
                proxy,
            )?,
            chat_url,
            refresh_url,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    async fn send_chat(
        &self,
        request: &BackendRequest,
        account: &Account,
    ) -> Result<BackendBody, BackendFault> {
        let call = self
            .chat_client
            .post(self.chat_url.clone())
            .bearer_auth(&account.credentials.access_token)
            .json(request)
            .send();
        let response = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(transport_fault(&err)),
            Err(_) => {
                return Err(BackendFault::transient(format!(
                    "backend call timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after_delay(response.headers());
            let body = match tokio::time::timeout(self.request_timeout, response.text()).await {
                Ok(Ok(body)) => body,
                _ => String::new(),
            };
            tracing::debug!(
                account_id = %account.id,
                status = status.as_u16(),
                "backend call failed"
            );
            return Err(classify_status(status, &body, retry_after));
        }

        Ok(idle_bounded_body(
            response.bytes_stream(),
            self.stream_idle_timeout,
        ))
    }

    async fn refresh(&self, account: &Account) -> Result<Credentials, BackendFault> {
        let response = self
            .refresh_client
            .post(self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh_token: &account.credentials.refresh_token,
            })
            .send()
            .await
            .map_err(|err| transport_fault(&err))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after_delay(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_after));
        }

        let parsed: RefreshResponse = response.json().await.map_err(|err| {
            BackendFault::transient(format!("malformed token refresh response: {err}"))
        })?;
        Ok(Credentials {
            access_token: parsed.access_token,
            refresh_token: parsed
                .refresh_token
                .unwrap_or_else(|| account.credentials.refresh_token.clone()),
            expires_at: parsed
                .expires_in
                .map_or(0, |secs| unix_now_secs().saturating_add(secs)),
        })
    }
}

/// Bound the gap between body chunks; a stalled body ends with a transient fault.
fn idle_bounded_body<S>(body: S, idle_timeout: Duration) -> BackendBody
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(body), false),
        move |(mut body, done)| async move {
            if done {
                return None;
            }
            match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), (body, false))),
                Ok(Some(Err(err))) => Some((Err(transport_fault(&err)), (body, true))),
                Ok(None) => None,
                Err(_) => Some((
                    Err(BackendFault::transient(format!(
                        "backend stream idle for {}s",
                        idle_timeout.as_secs()
                    ))),
                    (body, true),
                )),
            }
        },
    )
    .boxed()
}

impl Backend for HttpBackend {
    fn send(
        &self,
        request: &BackendRequest,
        account: &Account,
    ) -> impl std::future::Future<Output = Result<BackendBody, BackendFault>> + Send {
        self.send_chat(request, account)
    }

    fn refresh_token(
        &self,
        account: &Account,
    ) -> impl std::future::Future<Output = Result<Credentials, BackendFault>> + Send {
        self.refresh(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        crate::config::parse_config(
            r"
backend:
  base_url: https://backend.example.com/generateAssistantResponse
  refresh_url: https://auth.example.com/refreshToken
accounts:
  - id: acc-1
    access_token: at
    refresh_token: rt
client_authentication:
  allowed_keys: [k]
",
        )
        .unwrap()
        .backend
    }

    #[test]
    fn test_builds_from_config() {
        let backend = HttpBackend::new(&config()).unwrap();
        assert_eq!(backend.request_timeout, Duration::from_secs(120));
        assert_eq!(backend.chat_url.host_str(), Some("backend.example.com"));
    }

    #[test]
    fn test_refresh_response_shape() {
        let parsed: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"a","expiresIn":3600}"#).unwrap();
        assert_eq!(parsed.access_token, "a");
        assert!(parsed.refresh_token.is_none());
        assert_eq!(parsed.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn test_idle_bounded_body_times_out() {
        let stalled = futures_util::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut body = idle_bounded_body(stalled, Duration::from_millis(10));
        assert!(matches!(
            body.next().await,
            Some(Err(BackendFault::Transient { .. }))
        ));
        assert!(body.next().await.is_none());
    }
}
