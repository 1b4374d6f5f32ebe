//! Reconciles tool results against the tool uses they answer.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::protocol::backend::{BackendToolResult, BackendToolUse, ToolResultStatus};

pub const SYNTHETIC_TOOL_RESULT_TEXT: &str = "Tool execution completed.";

/// One result per expected tool use, in expected order.
///
/// A missing result is synthesized as a success. Results answering no expected
/// tool use are dropped. Empty `expected` yields an empty list.
#[must_use]
pub fn match_tool_results(
    actual: &[BackendToolResult],
    expected: &[BackendToolUse],
) -> Vec<BackendToolResult> {
    if expected.is_empty() {
        return Vec::new();
    }
    let mut by_id: FxHashMap<&str, &BackendToolResult> = FxHashMap::default();
    for result in actual {
        by_id.entry(result.tool_use_id.as_str()).or_insert(result);
    }
    expected
        .iter()
        .map(|tool_use| match by_id.get(tool_use.tool_use_id.as_str()) {
            Some(result) => (*result).clone(),
            None => BackendToolResult::new(
                tool_use.tool_use_id.clone(),
                SYNTHETIC_TOOL_RESULT_TEXT,
                ToolResultStatus::Success,
            ),
        })
        .collect()
}

/// Keep the first result per `tool_use_id`, preserving order.
#[must_use]
pub fn deduplicate_tool_results(results: Vec<BackendToolResult>) -> Vec<BackendToolResult> {
    let mut seen = FxHashSet::default();
    results
        .into_iter()
        .filter(|result| seen.insert(result.tool_use_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_use(id: &str) -> BackendToolUse {
        BackendToolUse {
            tool_use_id: id.to_string(),
            name: "lookup".to_string(),
            input: serde_json::json!({}),
        }
    }

    fn result(id: &str, text: &str) -> BackendToolResult {
        BackendToolResult::new(id, text, ToolResultStatus::Success)
    }

    #[test]
    fn test_empty_expected_yields_empty() {
        assert!(match_tool_results(&[result("a", "x")], &[]).is_empty());
    }

    #[test]
    fn test_one_result_per_expected_in_order() {
        let matched = match_tool_results(
            &[result("b", "bee"), result("stray", "zzz")],
            &[tool_use("a"), tool_use("b"), tool_use("c")],
        );
        let ids: Vec<&str> = matched.iter().map(|r| r.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(matched[0].content[0].text, SYNTHETIC_TOOL_RESULT_TEXT);
        assert_eq!(matched[0].status, ToolResultStatus::Success);
        assert_eq!(matched[1].content[0].text, "bee");
    }

    #[test]
    fn test_deduplicate_first_wins() {
        let deduped = deduplicate_tool_results(vec![
            result("a", "first"),
            result("b", "only"),
            result("a", "second"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].content[0].text, "first");
        assert!(deduped.len() <= 3);
    }

    #[test]
    fn test_matching_uses_first_duplicate() {
        let matched = match_tool_results(
            &[result("a", "first"), result("a", "second")],
            &[tool_use("a")],
        );
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].content[0].text, "first");
    }
}
