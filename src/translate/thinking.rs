//! Thinking-mode prompt prefix.

pub const DEFAULT_THINKING_BUDGET: u32 = 20_000;
pub const MAX_THINKING_BUDGET: u32 = 24_576;

const THINKING_MODE_TAG: &str = "<thinking_mode>";
const MAX_THINKING_LENGTH_TAG: &str = "<max_thinking_length>";

/// Clamp a requested budget to `[1, MAX_THINKING_BUDGET]`.
///
/// Absent and non-positive values fall back to [`DEFAULT_THINKING_BUDGET`].
#[must_use]
pub fn resolve_thinking_budget(requested: Option<i64>) -> u32 {
    match requested {
        Some(value) if value > 0 => {
            u32::try_from(value.min(i64::from(MAX_THINKING_BUDGET))).unwrap_or(MAX_THINKING_BUDGET)
        }
        _ => DEFAULT_THINKING_BUDGET,
    }
}

#[must_use]
pub fn thinking_prefix(budget: u32) -> String {
    format!(
        "<thinking_mode>enabled</thinking_mode><max_thinking_length>{budget}</max_thinking_length>"
    )
}

/// Whether `system` already carries a thinking-mode marker.
#[must_use]
pub fn has_thinking_prefix(system: &str) -> bool {
    system.contains(THINKING_MODE_TAG) || system.contains(MAX_THINKING_LENGTH_TAG)
}

/// Prepend the thinking prefix to the system prompt unless it is already there.
#[must_use]
pub fn apply_thinking_prefix(system: Option<&str>, budget: u32) -> String {
    match system {
        Some(system) if has_thinking_prefix(system) => system.to_string(),
        Some(system) if !system.is_empty() => format!("{}\n{system}", thinking_prefix(budget)),
        _ => thinking_prefix(budget),
    }
}
