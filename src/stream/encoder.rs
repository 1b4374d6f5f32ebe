//! Messages SSE encoder.

use bytes::Bytes;

use crate::observability::token_counter::estimate_tokens_for_len;
use crate::protocol::messages::{
    BlockDelta, ErrorBody, MessageDeltaBody, MessageStartBody, MessagesStreamEvent, ResponseBlock,
    Usage,
};

use super::StreamEvent;

pub const STOP_END_TURN: &str = "end_turn";
pub const STOP_TOOL_USE: &str = "tool_use";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
}

/// State machine turning [`StreamEvent`]s into Messages stream events.
///
/// Block indices are monotonic for the whole response, including across
/// account switches.
#[derive(Debug)]
pub struct ResponseEncoder {
    message_id: String,
    model: String,
    input_tokens: u64,
    next_index: usize,
    open: Option<OpenBlock>,
    started: bool,
    finished: bool,
    saw_tool_use: bool,
    output_bytes: usize,
}

impl ResponseEncoder {
    #[must_use]
    pub fn new(message_id: impl Into<String>, model: impl Into<String>, input_tokens: u64) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            input_tokens,
            next_index: 0,
            open: None,
            started: false,
            finished: false,
            saw_tool_use: false,
            output_bytes: 0,
        }
    }

    /// `message_start` followed by a `ping`. Only the first call emits anything.
    pub fn start(&mut self) -> Vec<MessagesStreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![
            MessagesStreamEvent::MessageStart {
                message: MessageStartBody {
                    id: self.message_id.clone(),
                    type_: "message".to_string(),
                    role: "assistant".to_string(),
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens: self.input_tokens,
                        output_tokens: 0,
                    },
                },
            },
            MessagesStreamEvent::Ping {},
        ]
    }

    pub fn encode(&mut self, event: &StreamEvent) -> Vec<MessagesStreamEvent> {
        let mut out = self.start();
        match event {
            StreamEvent::ContentDelta { text } => {
                if !text.is_empty() {
                    self.ensure_open(OpenBlock::Text, &mut out);
                    self.output_bytes += text.len();
                    out.push(MessagesStreamEvent::ContentBlockDelta {
                        index: self.current_index(),
                        delta: BlockDelta::TextDelta { text: text.clone() },
                    });
                }
            }
            StreamEvent::ThinkingDelta { text } => {
                if !text.is_empty() {
                    self.ensure_open(OpenBlock::Thinking, &mut out);
                    self.output_bytes += text.len();
                    out.push(MessagesStreamEvent::ContentBlockDelta {
                        index: self.current_index(),
                        delta: BlockDelta::ThinkingDelta {
                            thinking: text.clone(),
                        },
                    });
                }
            }
            StreamEvent::ThinkingEnd => {
                if self.open == Some(OpenBlock::Thinking) {
                    self.close_open(&mut out);
                }
            }
            StreamEvent::ToolUse { id, name, input } => {
                self.close_open(&mut out);
                let index = self.next_index;
                self.next_index += 1;
                self.saw_tool_use = true;
                let partial_json = input.to_string();
                self.output_bytes += name.len() + partial_json.len();
                out.push(MessagesStreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
                out.push(MessagesStreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::InputJsonDelta { partial_json },
                });
                out.push(MessagesStreamEvent::ContentBlockStop { index });
            }
            StreamEvent::Error { message } => {
                self.error_into("api_error", message, &mut out);
            }
            // Thinking blocks open lazily on their first delta.
            StreamEvent::ThinkingStart | StreamEvent::TokenRefreshed { .. } => {}
        }
        out
    }

    /// Close the open block before output from another account continues.
    pub fn on_account_switch(&mut self) -> Vec<MessagesStreamEvent> {
        let mut out = Vec::new();
        self.close_open(&mut out);
        out
    }

    /// In-band error event; the response still terminates normally via [`Self::finish`].
    pub fn error(&mut self, error_type: &str, message: &str) -> Vec<MessagesStreamEvent> {
        let mut out = self.start();
        self.error_into(error_type, message, &mut out);
        out
    }

    /// Close the open block and emit `message_delta` + `message_stop`. Idempotent.
    pub fn finish(&mut self) -> Vec<MessagesStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut out = self.start();
        self.finished = true;
        self.close_open(&mut out);
        out.push(MessagesStreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.stop_reason().to_string()),
                stop_sequence: None,
            },
            usage: self.usage(),
        });
        out.push(MessagesStreamEvent::MessageStop {});
        out
    }

    #[must_use]
    pub fn stop_reason(&self) -> &'static str {
        if self.saw_tool_use {
            STOP_TOOL_USE
        } else {
            STOP_END_TURN
        }
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: estimate_tokens_for_len(self.output_bytes),
        }
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn current_index(&self) -> usize {
        self.next_index.saturating_sub(1)
    }

    fn ensure_open(&mut self, kind: OpenBlock, out: &mut Vec<MessagesStreamEvent>) {
        if self.open == Some(kind) {
            return;
        }
        self.close_open(out);
        let content_block = match kind {
            OpenBlock::Text => ResponseBlock::Text {
                text: String::new(),
            },
            OpenBlock::Thinking => ResponseBlock::Thinking {
                thinking: String::new(),
            },
        };
        out.push(MessagesStreamEvent::ContentBlockStart {
            index: self.next_index,
            content_block,
        });
        self.next_index += 1;
        self.open = Some(kind);
    }

    fn close_open(&mut self, out: &mut Vec<MessagesStreamEvent>) {
        if self.open.take().is_some() {
            out.push(MessagesStreamEvent::ContentBlockStop {
                index: self.current_index(),
            });
        }
    }

    fn error_into(&mut self, error_type: &str, message: &str, out: &mut Vec<MessagesStreamEvent>) {
        self.close_open(out);
        out.push(MessagesStreamEvent::Error {
            error: ErrorBody {
                type_: error_type.to_string(),
                message: message.to_string(),
            },
        });
    }
}

/// Serialize one event as an SSE frame: `event: <type>\ndata: <json>\n\n`.
#[must_use]
pub fn encode_sse_frame(event: &MessagesStreamEvent) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to serialize stream event");
        String::from("{}")
    });
    let event_type = event.event_name();
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(&json);
    out.push_str("\n\n");
    Bytes::from(out)
}
