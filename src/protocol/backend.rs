//! Backend conversation wire types.

use serde::{Deserialize, Serialize};

pub const CHAT_TRIGGER_MANUAL: &str = "MANUAL";
pub const DEFAULT_ORIGIN: &str = "AI_EDITOR";

/// Backend chat request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub conversation_state: ConversationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

impl BackendRequest {
    #[must_use]
    pub fn history(&self) -> &[HistoryItem] {
        &self.conversation_state.history
    }

    #[must_use]
    pub fn current(&self) -> &UserInputMessage {
        &self.conversation_state.current_message.user_input_message
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub chat_trigger_type: String,
    pub conversation_id: String,
    pub current_message: CurrentMessage,
    pub history: Vec<HistoryItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMessage {
    pub user_input_message: UserInputMessage,
}

/// One turn of backend history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryItem {
    #[serde(rename = "userInputMessage")]
    User(UserInputMessage),
    #[serde(rename = "assistantResponseMessage")]
    Assistant(AssistantResponseMessage),
}

impl HistoryItem {
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, HistoryItem::User(_))
    }

    #[must_use]
    pub fn is_assistant(&self) -> bool {
        matches!(self, HistoryItem::Assistant(_))
    }

    /// Tool uses of an assistant turn; empty for user turns.
    #[must_use]
    pub fn tool_uses(&self) -> &[BackendToolUse] {
        match self {
            HistoryItem::Assistant(turn) => &turn.tool_uses,
            HistoryItem::User(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
    pub content: String,
    pub model_id: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<BackendImage>,
    #[serde(default, skip_serializing_if = "UserInputMessageContext::is_empty")]
    pub user_input_message_context: UserInputMessageContext,
}

impl UserInputMessage {
    #[must_use]
    pub fn tool_results(&self) -> &[BackendToolResult] {
        &self.user_input_message_context.tool_results
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<BackendToolResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<BackendTool>,
}

impl UserInputMessageContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tool_results.is_empty() && self.tools.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<BackendToolUse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendToolResult {
    pub tool_use_id: String,
    pub content: Vec<ToolResultText>,
    pub status: ToolResultStatus,
}

impl BackendToolResult {
    #[must_use]
    pub fn new(
        tool_use_id: impl Into<String>,
        text: impl Into<String>,
        status: ToolResultStatus,
    ) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: vec![ToolResultText { text: text.into() }],
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultText {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendImage {
    pub format: String,
    pub source: BackendImageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendImageSource {
    pub bytes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTool {
    pub tool_specification: ToolSpecification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub json: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_item_wire_shape() {
        let item = HistoryItem::Assistant(AssistantResponseMessage {
            content: "ok".to_string(),
            tool_uses: vec![BackendToolUse {
                tool_use_id: "t1".to_string(),
                name: "search".to_string(),
                input: serde_json::json!({"q": "cats"}),
            }],
        });
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["assistantResponseMessage"]["content"], "ok");
        assert_eq!(
            value["assistantResponseMessage"]["toolUses"][0]["toolUseId"],
            "t1"
        );
    }

    #[test]
    fn test_empty_context_is_omitted() {
        let msg = UserInputMessage {
            content: "hi".to_string(),
            model_id: "m".to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            images: Vec::new(),
            user_input_message_context: UserInputMessageContext::default(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("userInputMessageContext").is_none());
        assert!(value.get("images").is_none());
        assert_eq!(value["modelId"], "m");
    }
}
