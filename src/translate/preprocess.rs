use crate::protocol::content::{
    ContentBlock, Message, MessageContent, Role, ToolResultContent, WireRole,
};
use crate::protocol::messages::MessagesRequest;

/// Inbound conversation after `system` folding and `tool` rewriting.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub system: Option<String>,
    pub messages: Vec<Message>,
}

/// Fold `system`-role messages into the system prompt and rewrite `tool`-role
/// messages into user messages carrying a single `tool_result` block.
///
/// The top-level system text comes first, then per-message system texts in order,
/// newline separated.
#[must_use]
pub fn preprocess_messages(request: &MessagesRequest) -> Preprocessed {
    let mut system_parts: Vec<String> = Vec::new();
    if let Some(system) = &request.system {
        let text = system.to_text();
        if !text.is_empty() {
            system_parts.push(text);
        }
    }

    let mut messages = Vec::with_capacity(request.messages.len());
    for wire in &request.messages {
        match wire.role {
            WireRole::System => {
                let text = wire.content.flatten_text();
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            WireRole::Tool => {
                let content = match &wire.content {
                    MessageContent::Text(text) => ToolResultContent::Text(text.clone()),
                    MessageContent::Blocks(blocks) => ToolResultContent::Blocks(blocks.clone()),
                };
                let tool_use_id = wire.tool_call_id.clone().unwrap_or_default();
                messages.push(Message {
                    role: Role::User,
                    content: vec![ContentBlock::tool_result(tool_use_id, content)],
                });
            }
            WireRole::User => messages.push(Message {
                role: Role::User,
                content: wire.content.clone().into_blocks(),
            }),
            WireRole::Assistant => messages.push(Message {
                role: Role::Assistant,
                content: wire.content.clone().into_blocks(),
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    Preprocessed { system, messages }
}

/// Merge consecutive same-role messages by concatenating their blocks.
///
/// Idempotent; an empty list stays empty.
#[must_use]
pub fn merge_adjacent_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(previous) if previous.role == message.role => {
                previous.content.extend(message.content);
            }
            _ => merged.push(message),
        }
    }
    merged
}
