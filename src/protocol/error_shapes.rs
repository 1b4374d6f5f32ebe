use crate::error::ErrorCategory;

#[must_use]
pub(crate) fn messages_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::Overloaded => "overloaded_error",
        ErrorCategory::UpstreamFailure | ErrorCategory::ServerError => "api_error",
    }
}

#[must_use]
pub(crate) fn messages_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": messages_error_type(cat),
            "message": message,
        }
    })
}
