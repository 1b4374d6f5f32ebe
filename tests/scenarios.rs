use msgbridge::config::TranslatorConfig;
use msgbridge::pool::{Account, AccountPool, Credentials, InMemoryAccountPool};
use msgbridge::protocol::backend::{BackendRequest, ToolResultStatus};
use msgbridge::protocol::content::{ContentBlock, Role};
use msgbridge::protocol::messages::validate::parse_messages_request;
use msgbridge::stream::{StreamDecoder, StreamEvent};
use msgbridge::translate::{
    merge_adjacent_messages, preprocess_messages, translate_request, TranslateContext,
    CONTINUE_MARKER,
};
use msgbridge::translate::tool_results::SYNTHETIC_TOOL_RESULT_TEXT;
use serde_json::json;

fn account(id: &str) -> Account {
    Account::new(
        id,
        Credentials {
            access_token: format!("at-{id}"),
            refresh_token: format!("rt-{id}"),
            expires_at: 0,
        },
    )
}

fn translate(value: serde_json::Value) -> BackendRequest {
    let request = parse_messages_request(value.to_string().as_bytes()).unwrap();
    let settings = TranslatorConfig::default();
    let ctx = TranslateContext {
        conversation_id: "conv-1",
        model_id: "MODEL",
        origin: "AI_EDITOR",
        settings: &settings,
    };
    translate_request(&request, &account("acc-1"), &ctx)
}

#[test]
fn test_adjacent_user_messages_merge_into_blocks() {
    let request = parse_messages_request(
        json!({
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "user", "content": "there"}
            ]
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap();
    let merged = merge_adjacent_messages(preprocess_messages(&request).messages);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].role, Role::User);
    assert_eq!(
        merged[0].content,
        vec![ContentBlock::text("Hi"), ContentBlock::text("there")]
    );
}

#[test]
fn test_empty_messages_translate_to_continue() {
    let backend = translate(json!({"max_tokens": 10, "messages": []}));
    assert!(backend.history().is_empty());
    assert_eq!(backend.current().content, CONTINUE_MARKER);
    assert!(backend.current().tool_results().is_empty());
}

#[test]
fn test_trailing_assistant_tool_use_gets_synthetic_result() {
    let backend = translate(json!({
        "max_tokens": 10,
        "messages": [
            {"role": "user", "content": "find cats"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "cats"}}
            ]}
        ]
    }));
    let history = backend.history();
    assert_eq!(history.len(), 2);
    assert!(history[0].is_user());
    assert_eq!(history[1].tool_uses()[0].tool_use_id, "t1");

    let current = backend.current();
    assert_eq!(current.content, CONTINUE_MARKER);
    let results = current.tool_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_use_id, "t1");
    assert_eq!(results[0].status, ToolResultStatus::Success);
    assert_eq!(results[0].content[0].text, SYNTHETIC_TOOL_RESULT_TEXT);
}

#[test]
fn test_tool_use_tag_split_mid_tag_decodes_in_order() {
    let first = json!({"content": "Before<tool_"}).to_string();
    let second = json!({
        "content": "use>{\"id\":\"t1\",\"name\":\"search\",\"input\":{\"q\":\"cats\"}}</tool_use>After"
    })
    .to_string();

    let mut decoder = StreamDecoder::new(false);
    let mut events = decoder.feed(first.as_bytes());
    events.extend(decoder.feed(second.as_bytes()));
    events.extend(decoder.finish());

    assert_eq!(
        events,
        vec![
            StreamEvent::ContentDelta {
                text: "Before".to_string()
            },
            StreamEvent::ToolUse {
                id: "t1".to_string(),
                name: "search".to_string(),
                input: json!({"q": "cats"}),
            },
            StreamEvent::ContentDelta {
                text: "After".to_string()
            },
        ]
    );
}

#[test]
fn test_pool_never_returns_quota_exhausted_while_active_exists() {
    let pool = InMemoryAccountPool::new(vec![account("spent"), account("live")]);
    pool.mark_quota_exhausted("spent", "quota");
    for _ in 0..8 {
        assert_eq!(pool.next_account(None, &[]).unwrap().id, "live");
    }
}
