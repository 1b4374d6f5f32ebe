//! Non-streaming response builder.

use crate::protocol::messages::{
    BlockDelta, MessagesResponse, MessagesStreamEvent, ResponseBlock, Usage,
};

use super::{ResponseEncoder, StreamEvent};

/// Run `events` through a [`ResponseEncoder`] and fold its frames into one message.
#[must_use]
pub fn collect_response<'a>(
    mut encoder: ResponseEncoder,
    events: impl IntoIterator<Item = &'a StreamEvent>,
) -> MessagesResponse {
    let mut folder = FrameFolder::default();
    for event in events {
        folder.fold_all(encoder.encode(event));
    }
    folder.fold_all(encoder.finish());
    MessagesResponse {
        id: encoder.message_id().to_string(),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: encoder.model().to_string(),
        content: folder.blocks,
        stop_reason: Some(
            folder
                .stop_reason
                .unwrap_or_else(|| encoder.stop_reason().to_string()),
        ),
        stop_sequence: None,
        usage: folder.usage.unwrap_or_else(|| encoder.usage()),
    }
}

#[derive(Default)]
struct FrameFolder {
    blocks: Vec<ResponseBlock>,
    tool_json: String,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

impl FrameFolder {
    fn fold_all(&mut self, frames: Vec<MessagesStreamEvent>) {
        for frame in frames {
            self.fold(frame);
        }
    }

    fn fold(&mut self, frame: MessagesStreamEvent) {
        match frame {
            MessagesStreamEvent::ContentBlockStart { content_block, .. } => {
                self.tool_json.clear();
                self.blocks.push(content_block);
            }
            MessagesStreamEvent::ContentBlockDelta { delta, .. } => {
                match (self.blocks.last_mut(), delta) {
                    (Some(ResponseBlock::Text { text }), BlockDelta::TextDelta { text: more }) => {
                        text.push_str(&more);
                    }
                    (
                        Some(ResponseBlock::Thinking { thinking }),
                        BlockDelta::ThinkingDelta { thinking: more },
                    ) => thinking.push_str(&more),
                    (
                        Some(ResponseBlock::ToolUse { .. }),
                        BlockDelta::InputJsonDelta { partial_json },
                    ) => {
                        self.tool_json.push_str(&partial_json);
                    }
                    _ => {}
                }
            }
            MessagesStreamEvent::ContentBlockStop { .. } => {
                if let Some(ResponseBlock::ToolUse { input, .. }) = self.blocks.last_mut() {
                    if !self.tool_json.is_empty() {
                        match serde_json::from_str(&self.tool_json) {
                            Ok(value) => *input = value,
                            Err(err) => {
                                tracing::warn!(error = %err, "tool_use input is not valid JSON");
                            }
                        }
                        self.tool_json.clear();
                    }
                }
            }
            MessagesStreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                self.usage = Some(usage);
            }
            MessagesStreamEvent::MessageStart { .. }
            | MessagesStreamEvent::MessageStop {}
            | MessagesStreamEvent::Ping {}
            | MessagesStreamEvent::Error { .. } => {}
        }
    }
}
