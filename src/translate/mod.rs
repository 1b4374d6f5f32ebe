//! Messages request -> backend conversation translation.
//!
//! Pure and infallible: every well-formed request maps to a backend request that
//! satisfies the backend's turn-order and tool-result constraints.

pub(crate) mod history;
pub mod preprocess;
pub mod thinking;
pub mod tool_results;
pub mod tools;

pub use preprocess::{merge_adjacent_messages, preprocess_messages, Preprocessed};
pub use thinking::{apply_thinking_prefix, resolve_thinking_budget};
pub use tool_results::{deduplicate_tool_results, match_tool_results};

use crate::config::TranslatorConfig;
use crate::pool::Account;
use crate::protocol::backend::{
    BackendRequest, ConversationState, CurrentMessage, HistoryItem, CHAT_TRIGGER_MANUAL,
};
use crate::protocol::content::{Message, Role};
use crate::protocol::messages::MessagesRequest;

use self::history::{cap_history, strip_first_tool_results, TurnBuilder};

pub const CONTINUE_MARKER: &str = "Continue";
pub const TOOL_RESULTS_MARKER: &str = "Tool results provided.";

/// Per-request inputs that do not come from the client body.
#[derive(Debug, Clone, Copy)]
pub struct TranslateContext<'a> {
    pub conversation_id: &'a str,
    pub model_id: &'a str,
    pub origin: &'a str,
    pub settings: &'a TranslatorConfig,
}

#[must_use]
pub fn translate_request(
    request: &MessagesRequest,
    account: &Account,
    ctx: &TranslateContext<'_>,
) -> BackendRequest {
    let Preprocessed { system, messages } = preprocess_messages(request);
    let messages = merge_adjacent_messages(messages);

    let system = match request.thinking_budget() {
        Some(budget) => Some(apply_thinking_prefix(
            system.as_deref(),
            resolve_thinking_budget(budget),
        )),
        None => system,
    };
    let system = system.filter(|text| !text.is_empty());

    let fallback = Message::user_text(CONTINUE_MARKER);
    let (last, earlier) = messages.split_last().unwrap_or((&fallback, &[][..]));

    let turns = TurnBuilder::new(ctx.model_id, ctx.origin);
    let total = earlier.len() + 1;
    let window = ctx.settings.image_history_window;
    let keep_images = |idx: usize| total - 1 - idx < window;

    let mut history: Vec<HistoryItem> = Vec::with_capacity(total);
    let mut current_prefix = None;
    let mut start = 0;
    if let Some(system) = system.as_deref() {
        match earlier.first() {
            Some(first) if first.role == Role::User => {
                turns.push_user(&mut history, first, keep_images(0), Some(system));
                start = 1;
            }
            Some(_) => history.push(HistoryItem::User(turns.text_user_turn(system))),
            None if last.role == Role::User => current_prefix = Some(system),
            None => history.push(HistoryItem::User(turns.text_user_turn(system))),
        }
    }

    for (idx, message) in earlier.iter().enumerate().skip(start) {
        turns.push_message(&mut history, message, keep_images(idx));
    }

    let mut current = match last.role {
        Role::Assistant => {
            turns.push_message(&mut history, last, keep_images(total - 1));
            let expected = history.last().map_or(&[][..], HistoryItem::tool_uses);
            turns.continue_turn(match_tool_results(&[], expected))
        }
        Role::User => {
            turns.ensure_assistant_tail(&mut history);
            turns.user_turn(&last.content, true, history.last(), current_prefix)
        }
    };

    if let Some(max) = ctx.settings.max_history_items {
        cap_history(&mut history, max);
    }
    strip_first_tool_results(&mut history);
    if history.is_empty() {
        current.user_input_message_context.tool_results.clear();
    }

    if let Some(tools) = request.tools.as_deref() {
        current.user_input_message_context.tools = tools::convert_tools(tools);
    }
    if request.tool_choice.is_some() {
        tracing::debug!(
            conversation_id = ctx.conversation_id,
            "tool_choice has no backend equivalent; ignored"
        );
    }

    BackendRequest {
        conversation_state: ConversationState {
            chat_trigger_type: CHAT_TRIGGER_MANUAL.to_string(),
            conversation_id: ctx.conversation_id.to_string(),
            current_message: CurrentMessage {
                user_input_message: current,
            },
            history,
        },
        profile_arn: account.profile_arn.clone(),
    }
}
