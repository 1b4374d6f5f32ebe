//! Pseudo-tag scanning over decoded content text.

use serde::Deserialize;

use super::StreamEvent;

const TOOL_USE_OPEN: &str = "<tool_use>";
const TOOL_USE_CLOSE: &str = "</tool_use>";
const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";

#[derive(Deserialize)]
struct ToolUseBody {
    id: String,
    name: String,
    #[serde(default = "empty_input")]
    input: serde_json::Value,
}

fn empty_input() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Splits logical text into content, thinking, and tool-use events.
///
/// Text that may be the start of a tag is held back until the next push
/// disambiguates it.
pub(crate) struct TagScanner {
    thinking_enabled: bool,
    pending: String,
    in_thinking: bool,
    tool_body: Option<String>,
}

impl TagScanner {
    pub(crate) fn new(thinking_enabled: bool) -> Self {
        Self {
            thinking_enabled,
            pending: String::new(),
            in_thinking: false,
            tool_body: None,
        }
    }

    pub(crate) fn push(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        self.pending.push_str(text);
        loop {
            if self.tool_body.is_some() {
                if !self.scan_tool_body(out) {
                    return;
                }
                continue;
            }

            let tool_pos = self.pending.find(TOOL_USE_OPEN);
            let thinking_tag = self.thinking_tag();
            let thinking_pos = thinking_tag.and_then(|tag| self.pending.find(tag));

            match (tool_pos, thinking_pos) {
                (Some(tool), thinking) if thinking.map_or(true, |pos| tool < pos) => {
                    self.emit_text(tool, out);
                    self.pending.drain(..TOOL_USE_OPEN.len());
                    self.tool_body = Some(String::new());
                }
                (_, Some(pos)) => {
                    self.emit_text(pos, out);
                    if self.in_thinking {
                        self.pending.drain(..THINKING_CLOSE.len());
                        self.in_thinking = false;
                        out.push(StreamEvent::ThinkingEnd);
                    } else {
                        self.pending.drain(..THINKING_OPEN.len());
                        self.in_thinking = true;
                        out.push(StreamEvent::ThinkingStart);
                    }
                }
                _ => {
                    let held = self.partial_tag_len();
                    self.emit_text(self.pending.len() - held, out);
                    return;
                }
            }
        }
    }

    /// Flush held text, close an open thinking block, and drop an unterminated tool use.
    pub(crate) fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(body) = self.tool_body.take() {
            tracing::warn!(
                body_len = body.len() + self.pending.len(),
                "dropping unterminated tool_use block"
            );
            self.pending.clear();
        }
        self.emit_text(self.pending.len(), out);
        if self.in_thinking {
            self.in_thinking = false;
            out.push(StreamEvent::ThinkingEnd);
        }
    }

    fn thinking_tag(&self) -> Option<&'static str> {
        if !self.thinking_enabled {
            None
        } else if self.in_thinking {
            Some(THINKING_CLOSE)
        } else {
            Some(THINKING_OPEN)
        }
    }

    /// Returns `true` when a tool use was closed and scanning can continue.
    fn scan_tool_body(&mut self, out: &mut Vec<StreamEvent>) -> bool {
        let Some(body) = self.tool_body.as_mut() else {
            return false;
        };
        if let Some(pos) = self.pending.find(TOOL_USE_CLOSE) {
            body.push_str(&self.pending[..pos]);
            self.pending.drain(..pos + TOOL_USE_CLOSE.len());
            if let Some(body) = self.tool_body.take() {
                if let Some(event) = parse_tool_use(&body) {
                    out.push(event);
                }
            }
            return true;
        }
        let held = partial_suffix_len(&self.pending, &[TOOL_USE_CLOSE]);
        let take = self.pending.len() - held;
        body.push_str(&self.pending[..take]);
        self.pending.drain(..take);
        false
    }

    fn partial_tag_len(&self) -> usize {
        match self.thinking_tag() {
            Some(tag) => partial_suffix_len(&self.pending, &[TOOL_USE_OPEN, tag]),
            None => partial_suffix_len(&self.pending, &[TOOL_USE_OPEN]),
        }
    }

    fn emit_text(&mut self, end: usize, out: &mut Vec<StreamEvent>) {
        if end == 0 {
            return;
        }
        let text: String = self.pending.drain(..end).collect();
        if self.in_thinking {
            out.push(StreamEvent::ThinkingDelta { text });
        } else {
            out.push(StreamEvent::ContentDelta { text });
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of one of `tags`.
///
/// Every tag starts with its only `<`, so only the suffix from the last `<` can match.
fn partial_suffix_len(text: &str, tags: &[&str]) -> usize {
    let Some(pos) = text.rfind('<') else {
        return 0;
    };
    let tail = &text[pos..];
    if tags
        .iter()
        .any(|tag| tag.len() > tail.len() && tag.starts_with(tail))
    {
        tail.len()
    } else {
        0
    }
}

fn parse_tool_use(body: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<ToolUseBody>(body.trim()) {
        Ok(parsed) => Some(StreamEvent::ToolUse {
            id: parsed.id,
            name: parsed.name,
            input: parsed.input,
        }),
        Err(err) => {
            tracing::warn!(error = %err, body_len = body.len(), "dropping malformed tool_use body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(thinking: bool, pieces: &[&str]) -> Vec<StreamEvent> {
        let mut scanner = TagScanner::new(thinking);
        let mut out = Vec::new();
        for piece in pieces {
            scanner.push(piece, &mut out);
        }
        scanner.finish(&mut out);
        out
    }

    fn content(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(scan(false, &["hello"]), vec![content("hello")]);
    }

    #[test]
    fn test_thinking_tags_split_across_pushes() {
        let events = scan(true, &["<thi", "nking>plan</thin", "king>answer"]);
        assert_eq!(
            events,
            vec![
                StreamEvent::ThinkingStart,
                StreamEvent::ThinkingDelta {
                    text: "plan".to_string()
                },
                StreamEvent::ThinkingEnd,
                content("answer"),
            ]
        );
    }

    #[test]
    fn test_thinking_tags_are_text_when_disabled() {
        assert_eq!(
            scan(false, &["<thinking>x</thinking>"]),
            vec![content("<thinking>x</thinking>")]
        );
    }

    #[test]
    fn test_tool_use_split_across_pushes() {
        let events = scan(
            false,
            &[
                "Let me check.<tool_",
                "use>{\"id\":\"t1\",\"name\":\"search\",",
                "\"input\":{\"q\":\"x\"}}</tool_use>",
            ],
        );
        assert_eq!(
            events,
            vec![
                content("Let me check."),
                StreamEvent::ToolUse {
                    id: "t1".to_string(),
                    name: "search".to_string(),
                    input: serde_json::json!({"q": "x"}),
                },
            ]
        );
    }

    #[test]
    fn test_malformed_tool_use_dropped() {
        let events = scan(false, &["a<tool_use>not json</tool_use>b"]);
        assert_eq!(events, vec![content("a"), content("b")]);
    }

    #[test]
    fn test_unterminated_tool_use_dropped_at_finish() {
        let events = scan(false, &["a<tool_use>{\"id\":"]);
        assert_eq!(events, vec![content("a")]);
    }

    #[test]
    fn test_finish_closes_open_thinking_and_flushes_partial_tag() {
        let events = scan(true, &["<thinking>deep <"]);
        assert_eq!(
            events,
            vec![
                StreamEvent::ThinkingStart,
                StreamEvent::ThinkingDelta {
                    text: "deep ".to_string()
                },
                StreamEvent::ThinkingDelta {
                    text: "<".to_string()
                },
                StreamEvent::ThinkingEnd,
            ]
        );
    }

    #[test]
    fn test_lone_angle_bracket_released_once_disambiguated() {
        assert_eq!(
            scan(false, &["a <", " b"]),
            vec![content("a "), content("< b")]
        );
    }
}
