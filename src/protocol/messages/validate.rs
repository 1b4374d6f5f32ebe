use crate::error::GatewayError;

use super::MessagesRequest;

/// Parse a raw request body into a [`MessagesRequest`].
///
/// Unknown roles and wrongly typed fields fail here.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] when the body is not a valid request object.
pub fn parse_messages_request(body: &[u8]) -> Result<MessagesRequest, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::Validation(format!("malformed request body: {err}")))
}

/// Validate a parsed request before translation.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] naming the first violated field.
pub fn validate_messages_request(request: &MessagesRequest) -> Result<(), GatewayError> {
    validate_messages(request)?;
    match request.max_tokens {
        None => {
            return Err(GatewayError::Validation(
                "max_tokens: field is required".to_string(),
            ))
        }
        Some(value) if value <= 0 => {
            return Err(GatewayError::Validation(format!(
                "max_tokens: must be a positive integer, got {value}"
            )))
        }
        Some(_) => {}
    }
    validate_thinking(request)
}

/// Validation subset used by `count_tokens`, which carries no `max_tokens`.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] naming the first violated field.
pub fn validate_count_tokens_request(request: &MessagesRequest) -> Result<(), GatewayError> {
    validate_messages(request)?;
    validate_thinking(request)
}

fn validate_messages(request: &MessagesRequest) -> Result<(), GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation(
            "messages: at least one message is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_thinking(request: &MessagesRequest) -> Result<(), GatewayError> {
    if let Some(thinking) = &request.thinking {
        if thinking.type_ != "enabled" && thinking.type_ != "disabled" {
            return Err(GatewayError::Validation(format!(
                "thinking.type: expected 'enabled' or 'disabled', got '{}'",
                thinking.type_
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> Result<MessagesRequest, GatewayError> {
        parse_messages_request(value.to_string().as_bytes())
    }

    #[test]
    fn test_valid_request_passes() {
        let req = parse(serde_json::json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(validate_messages_request(&req).is_ok());
    }

    #[test]
    fn test_missing_max_tokens_rejected() {
        let req = parse(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let err = validate_messages_request(&req).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(msg) if msg.contains("max_tokens")));
    }

    #[test]
    fn test_non_positive_max_tokens_rejected() {
        let req = parse(serde_json::json!({
            "max_tokens": 0,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(validate_messages_request(&req).is_err());
    }

    #[test]
    fn test_empty_messages_rejected() {
        let req = parse(serde_json::json!({"max_tokens": 10, "messages": []})).unwrap();
        assert!(validate_messages_request(&req).is_err());
    }

    #[test]
    fn test_invalid_role_rejected_at_parse() {
        let err = parse(serde_json::json!({
            "max_tokens": 10,
            "messages": [{"role": "moderator", "content": "hi"}]
        }))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn test_malformed_thinking_type_rejected() {
        let req = parse(serde_json::json!({
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "thinking": {"type": "sometimes", "budget_tokens": 100}
        }))
        .unwrap();
        assert!(validate_messages_request(&req).is_err());
    }

    #[test]
    fn test_count_tokens_does_not_require_max_tokens() {
        let req = parse(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(validate_count_tokens_request(&req).is_ok());
    }
}
