use crate::protocol::backend::{BackendTool, InputSchema, ToolSpecification};
use crate::protocol::content::ToolSpec;
use crate::util::truncate_with_ellipsis;

pub const MAX_TOOL_NAME_CHARS: usize = 64;
pub const MAX_TOOL_DESCRIPTION_CHARS: usize = 10_240;

/// Convert client tool definitions into backend tool specifications.
///
/// Overlong names and descriptions are truncated; a missing description falls
/// back to the tool name.
#[must_use]
pub fn convert_tools(tools: &[ToolSpec]) -> Vec<BackendTool> {
    tools.iter().map(convert_tool).collect()
}

fn convert_tool(tool: &ToolSpec) -> BackendTool {
    let name = truncate_with_ellipsis(&tool.name, MAX_TOOL_NAME_CHARS);
    let description = match tool.description.as_deref() {
        Some(description) if !description.trim().is_empty() => {
            truncate_with_ellipsis(description, MAX_TOOL_DESCRIPTION_CHARS)
        }
        _ => name.clone(),
    };
    BackendTool {
        tool_specification: ToolSpecification {
            name,
            description,
            input_schema: InputSchema {
                json: tool.input_schema.clone(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_name_truncated_to_limit() {
        let tools = convert_tools(&[ToolSpec {
            name: "n".repeat(100),
            description: Some("d".repeat(20_000)),
            input_schema: serde_json::json!({"type": "object"}),
        }]);
        let spec = &tools[0].tool_specification;
        assert_eq!(spec.name.chars().count(), MAX_TOOL_NAME_CHARS);
        assert!(spec.name.ends_with("..."));
        assert_eq!(spec.description.chars().count(), MAX_TOOL_DESCRIPTION_CHARS);
        assert_eq!(spec.input_schema.json["type"], "object");
    }

    #[test]
    fn test_missing_description_uses_name() {
        let tools = convert_tools(&[ToolSpec {
            name: "search".to_string(),
            description: None,
            input_schema: serde_json::json!({}),
        }]);
        assert_eq!(tools[0].tool_specification.description, "search");
    }
}
