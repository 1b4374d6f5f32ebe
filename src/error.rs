use crate::protocol::error_shapes::messages_error_payload;

/// Gateway-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Account quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("Account banned: {0}")]
    Banned(String),
    #[error("Backend temporarily unavailable: {0}")]
    Retryable(String),
    #[error("Backend payload decode error: {0}")]
    Decode(String),
    #[error("No available account: {0}")]
    NoAvailableAccount(String),
    #[error("Backend error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    Overloaded,
    UpstreamFailure,
    ServerError,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Validation(_) => ErrorCategory::InvalidRequest,
            GatewayError::Auth(_) => ErrorCategory::Authentication,
            GatewayError::Banned(_) => ErrorCategory::Permission,
            GatewayError::QuotaExhausted(_) => ErrorCategory::RateLimit,
            GatewayError::Retryable(_) | GatewayError::NoAvailableAccount(_) => {
                ErrorCategory::Overloaded
            }
            GatewayError::Upstream { .. } => ErrorCategory::UpstreamFailure,
            GatewayError::Config(_) | GatewayError::Decode(_) | GatewayError::Internal(_) => {
                ErrorCategory::ServerError
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

#[must_use]
pub fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Overloaded => http::StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::UpstreamFailure => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error as (`status_code`, Messages-shaped JSON body).
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    (status, messages_error_payload(cat, &err.to_string()))
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}
