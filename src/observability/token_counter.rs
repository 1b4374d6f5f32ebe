use std::time::Duration;

use tracing::info;

use crate::protocol::content::{ContentBlock, MessageContent, ToolResultContent};
use crate::protocol::messages::MessagesRequest;

use super::Completion;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_for_len(text.len())
}

/// [`estimate_tokens`] for text already measured in bytes.
#[must_use]
pub fn estimate_tokens_for_len(len: usize) -> u64 {
    (len as u64).div_ceil(4)
}

/// Estimate the input tokens of a Messages request.
///
/// Sums the system prompt, text-bearing blocks, and serialized tool definitions.
#[must_use]
pub fn estimate_request_tokens(request: &MessagesRequest) -> u64 {
    let mut total: u64 = 0;

    if let Some(system) = &request.system {
        total += estimate_tokens(&system.to_text());
    }

    for message in &request.messages {
        match &message.content {
            MessageContent::Text(text) => {
                total += estimate_tokens(text);
            }
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    total += estimate_block_tokens(block);
                }
            }
        }
    }

    for tool in request.tools.iter().flatten() {
        total += estimate_tokens(&tool.name);
        if let Some(description) = &tool.description {
            total += estimate_tokens(description);
        }
        if let Ok(schema) = serde_json::to_string(&tool.input_schema) {
            total += estimate_tokens(&schema);
        }
    }

    total
}

fn estimate_block_tokens(block: &ContentBlock) -> u64 {
    match block {
        ContentBlock::Text { text } => estimate_tokens(text),
        ContentBlock::Thinking { thinking, .. } => estimate_tokens(thinking),
        ContentBlock::ToolUse { name, input, .. } => {
            estimate_tokens(name) + estimate_tokens(&input.to_string())
        }
        ContentBlock::ToolResult { content, .. } => match content {
            ToolResultContent::Text(text) => estimate_tokens(text),
            ToolResultContent::Blocks(blocks) => blocks.iter().map(estimate_block_tokens).sum(),
        },
        // Images are not counted via text tokenization
        ContentBlock::Image { .. } | ContentBlock::Unknown => 0,
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(completion: &Completion<'_>, duration: Duration) {
    info!(
        request_id = completion.request_id,
        model = completion.model,
        account_id = completion.account_id,
        attempts = completion.attempts,
        stream = completion.stream,
        input_tokens = completion.input_tokens,
        output_tokens = completion.output_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::validate::parse_messages_request;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_request_estimate_counts_system_messages_and_tools() {
        let request = parse_messages_request(
            serde_json::json!({
                "max_tokens": 5,
                "system": "12345678",
                "messages": [
                    {"role": "user", "content": "1234"},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "t", "content": "12345678"}
                    ]}
                ],
                "tools": [{"name": "abcd", "input_schema": {}}]
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        // system 2 + text 1 + tool result 2 + name 1 + "{}" 1
        assert_eq!(estimate_request_tokens(&request), 7);
    }
}
