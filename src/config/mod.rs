pub mod validation;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::pool::{Account, AccountState, Credentials};

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_body_limit_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            runtime_worker_threads: None,
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub refresh_url: String,
    /// Bound on a chat call until response headers arrive (and the whole body when batched).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Bound on the gap between two streamed body chunks.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
    #[serde(default = "default_origin")]
    pub origin: String,
    /// External model name -> backend model id.
    #[serde(default)]
    pub models: FxHashMap<String, String>,
    #[serde(default)]
    pub default_model_id: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    120
}
fn default_stream_idle_timeout_secs() -> u64 {
    60
}
fn default_refresh_timeout_secs() -> u64 {
    180
}
fn default_refresh_skew_secs() -> u64 {
    300
}
fn default_origin() -> String {
    crate::protocol::backend::DEFAULT_ORIGIN.to_string()
}

impl BackendConfig {
    /// Backend model id for an external model name; unknown names pass through.
    #[must_use]
    pub fn resolve_model_id<'a>(&'a self, model: &'a str) -> &'a str {
        if let Some(mapped) = self.models.get(model) {
            return mapped;
        }
        if model.is_empty() {
            if let Some(default) = self.default_model_id.as_deref() {
                return default;
            }
        }
        model
    }
}

/// One seeded backend account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub group: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default)]
    pub profile_arn: Option<String>,
    #[serde(default)]
    pub state: AccountState,
}

impl AccountConfig {
    #[must_use]
    pub fn to_account(&self) -> Account {
        let mut account = Account::new(
            self.id.clone(),
            Credentials {
                access_token: self.access_token.clone(),
                refresh_token: self.refresh_token.clone(),
                expires_at: self.expires_at,
            },
        );
        account.group = self.group.clone();
        account.profile_arn = self.profile_arn.clone();
        account.state = self.state;
        account
    }
}

/// Client authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    pub allowed_keys: Vec<String>,
    /// Optional key -> account group restriction.
    #[serde(default)]
    pub key_groups: FxHashMap<String, String>,
}

/// Failover retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Backend attempts per external request, shared across all fault types.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Request translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default)]
    pub max_history_items: Option<usize>,
    /// Messages from the end of the conversation whose images are forwarded.
    #[serde(default = "default_image_history_window")]
    pub image_history_window: usize,
}

fn default_image_history_window() -> usize {
    5
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            max_history_items: None,
            image_history_window: default_image_history_window(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
backend:
  base_url: https://backend.example.com/generateAssistantResponse
  refresh_url: https://auth.example.com/refreshToken
  models:
    claude-sonnet-4: CLAUDE_SONNET_4_V1_0
accounts:
  - id: acc-1
    access_token: at
    refresh_token: rt
  - id: acc-2
    group: team
    access_token: at2
    refresh_token: rt2
    state: quota_exhausted
client_authentication:
  allowed_keys: [client-key]
";

    #[test]
    fn test_parse_sample_config_with_defaults() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.failover.max_attempts, 3);
        assert_eq!(config.translator.image_history_window, 5);
        assert!(config.translator.max_history_items.is_none());
        assert_eq!(config.backend.request_timeout_secs, 120);
        assert!(config.backend.refresh_timeout_secs > config.backend.request_timeout_secs);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].state, AccountState::QuotaExhausted);
        assert_eq!(config.features.log_level, "INFO");
    }

    #[test]
    fn test_model_id_mapping_passes_unknown_through() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(
            config.backend.resolve_model_id("claude-sonnet-4"),
            "CLAUDE_SONNET_4_V1_0"
        );
        assert_eq!(config.backend.resolve_model_id("other"), "other");
    }

    #[test]
    fn test_account_config_to_account() {
        let config = parse_config(SAMPLE).unwrap();
        let account = config.accounts[1].to_account();
        assert_eq!(account.group.as_deref(), Some("team"));
        assert_eq!(account.credentials.refresh_token, "rt2");
        assert_eq!(account.state, AccountState::QuotaExhausted);
    }
}
