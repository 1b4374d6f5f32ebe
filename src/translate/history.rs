//! Backend turn construction.

use crate::protocol::backend::{
    AssistantResponseMessage, BackendImage, BackendImageSource, BackendToolResult,
    BackendToolUse, HistoryItem, ToolResultStatus, UserInputMessage, UserInputMessageContext,
};
use crate::protocol::content::{flatten_block_text, ContentBlock, ImageSource, Message, Role};

use super::tool_results::{deduplicate_tool_results, match_tool_results};
use super::{CONTINUE_MARKER, TOOL_RESULTS_MARKER};

/// Builds backend turns for one model id and origin.
pub(crate) struct TurnBuilder<'a> {
    model_id: &'a str,
    origin: &'a str,
}

impl<'a> TurnBuilder<'a> {
    pub(crate) fn new(model_id: &'a str, origin: &'a str) -> Self {
        Self { model_id, origin }
    }

    /// A text-only user turn.
    pub(crate) fn text_user_turn(&self, content: impl Into<String>) -> UserInputMessage {
        UserInputMessage {
            content: content.into(),
            model_id: self.model_id.to_string(),
            origin: self.origin.to_string(),
            images: Vec::new(),
            user_input_message_context: UserInputMessageContext::default(),
        }
    }

    /// `Continue` user turn answering `results`.
    pub(crate) fn continue_turn(&self, results: Vec<BackendToolResult>) -> UserInputMessage {
        let mut turn = self.text_user_turn(CONTINUE_MARKER);
        turn.user_input_message_context.tool_results = results;
        turn
    }

    /// Translate a user message.
    ///
    /// Tool results survive only when `previous` is an assistant turn with tool
    /// uses. Images outside the window are replaced by a count placeholder.
    pub(crate) fn user_turn(
        &self,
        blocks: &[ContentBlock],
        keep_images: bool,
        previous: Option<&HistoryItem>,
        prefix: Option<&str>,
    ) -> UserInputMessage {
        let mut text = flatten_block_text(blocks);
        let mut images = Vec::new();
        let mut omitted_images = 0usize;
        let mut results = Vec::new();

        for block in blocks {
            match block {
                ContentBlock::Image { source } if keep_images => match source {
                    ImageSource::Base64 { data, .. } => images.push(BackendImage {
                        format: source.format().to_string(),
                        source: BackendImageSource {
                            bytes: data.clone(),
                        },
                    }),
                    ImageSource::Url { url } => push_line(&mut text, &format!("[Image: {url}]")),
                },
                ContentBlock::Image { .. } => omitted_images += 1,
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let status = if is_error.unwrap_or(false) {
                        ToolResultStatus::Error
                    } else {
                        ToolResultStatus::Success
                    };
                    results.push(BackendToolResult::new(
                        tool_use_id.clone(),
                        content.to_text(),
                        status,
                    ));
                }
                _ => {}
            }
        }
        if omitted_images > 0 {
            push_line(&mut text, &format!("<{omitted_images} image(s)>"));
        }

        let expected = previous.map_or(&[][..], HistoryItem::tool_uses);
        let tool_results = if expected.is_empty() {
            Vec::new()
        } else {
            match_tool_results(&deduplicate_tool_results(results), expected)
        };

        let body = if !text.trim().is_empty() {
            text
        } else if !tool_results.is_empty() {
            TOOL_RESULTS_MARKER.to_string()
        } else {
            CONTINUE_MARKER.to_string()
        };
        let content = match prefix {
            Some(prefix) => format!("{prefix}\n\n{body}"),
            None => body,
        };

        UserInputMessage {
            content,
            model_id: self.model_id.to_string(),
            origin: self.origin.to_string(),
            images,
            user_input_message_context: UserInputMessageContext {
                tool_results,
                tools: Vec::new(),
            },
        }
    }

    /// Translate an assistant message; thinking is inlined ahead of the text.
    pub(crate) fn assistant_turn(&self, blocks: &[ContentBlock]) -> AssistantResponseMessage {
        let mut thinking = String::new();
        let mut tool_uses = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Thinking { thinking: text, .. } if !text.is_empty() => {
                    thinking.push_str("<thinking>");
                    thinking.push_str(text);
                    thinking.push_str("</thinking>");
                }
                ContentBlock::ToolUse { id, name, input } => tool_uses.push(BackendToolUse {
                    tool_use_id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => {}
            }
        }
        let text = flatten_block_text(blocks);
        let content = match (thinking.is_empty(), text.trim().is_empty()) {
            (true, true) => CONTINUE_MARKER.to_string(),
            (true, false) => text,
            (false, true) => thinking,
            (false, false) => format!("{thinking}\n\n{text}"),
        };
        AssistantResponseMessage { content, tool_uses }
    }

    fn synthetic_assistant(&self) -> HistoryItem {
        HistoryItem::Assistant(AssistantResponseMessage {
            content: CONTINUE_MARKER.to_string(),
            tool_uses: Vec::new(),
        })
    }

    /// Append `message` to `history`, inserting a synthetic opposite turn when
    /// two same-role items would otherwise meet.
    pub(crate) fn push_message(
        &self,
        history: &mut Vec<HistoryItem>,
        message: &Message,
        keep_images: bool,
    ) {
        match message.role {
            Role::User => {
                self.push_user(history, message, keep_images, None);
            }
            Role::Assistant => {
                if history.last().map_or(true, HistoryItem::is_assistant) {
                    history.push(HistoryItem::User(self.text_user_turn(CONTINUE_MARKER)));
                }
                history.push(HistoryItem::Assistant(self.assistant_turn(&message.content)));
            }
        }
    }

    /// Append a user message with an optional text prefix.
    pub(crate) fn push_user(
        &self,
        history: &mut Vec<HistoryItem>,
        message: &Message,
        keep_images: bool,
        prefix: Option<&str>,
    ) {
        self.ensure_assistant_tail(history);
        let turn = self.user_turn(&message.content, keep_images, history.last(), prefix);
        history.push(HistoryItem::User(turn));
    }

    /// Make sure a following user turn alternates with the history tail.
    pub(crate) fn ensure_assistant_tail(&self, history: &mut Vec<HistoryItem>) {
        if history.last().is_some_and(HistoryItem::is_user) {
            history.push(self.synthetic_assistant());
        }
    }
}

fn push_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}

/// Trim the oldest items down to `max`, then drop leading assistant turns.
pub(crate) fn cap_history(history: &mut Vec<HistoryItem>, max: usize) {
    if history.len() > max {
        let excess = history.len() - max;
        history.drain(..excess);
    }
    let leading_assistants = history
        .iter()
        .take_while(|item| item.is_assistant())
        .count();
    history.drain(..leading_assistants);
}

/// The first history item never carries tool results.
pub(crate) fn strip_first_tool_results(history: &mut [HistoryItem]) {
    if let Some(HistoryItem::User(first)) = history.first_mut() {
        first.user_input_message_context.tool_results.clear();
    }
}
