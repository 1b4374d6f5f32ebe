use http::header::{HeaderName, AUTHORIZATION};
use rustc_hash::FxHashMap;

use crate::config::AppConfig;
use crate::error::GatewayError;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Allowed client keys with their optional account-group scope.
pub struct AllowedClientKeys {
    keys: FxHashMap<String, Option<String>>,
}

impl AllowedClientKeys {
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// What an authenticated caller may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientScope {
    /// Account group the key is restricted to.
    pub group: Option<String>,
}

/// Extract the client key: `x-api-key` first, then `Authorization: Bearer <key>`.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when neither header carries a key.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| GatewayError::Auth("Missing API key".to_string()))
}

/// Authenticate a request against the key index and resolve its scope.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<ClientScope, GatewayError> {
    let client_key = extract_api_key(headers)?;
    match allowed_keys.keys.get(client_key) {
        Some(group) => Ok(ClientScope {
            group: group.clone(),
        }),
        None => Err(GatewayError::Auth("Invalid API key".to_string())),
    }
}

/// Build the key index from `client_authentication`.
#[must_use]
pub fn build_allowed_key_set(config: &AppConfig) -> AllowedClientKeys {
    let auth = &config.client_authentication;
    let keys = auth
        .allowed_keys
        .iter()
        .map(|key| (key.clone(), auth.key_groups.get(key).cloned()))
        .collect();
    AllowedClientKeys { keys }
}
