//! Incremental decoder for the backend's concatenated `{"content":"..."}` stream.

use std::sync::LazyLock;

use memchr::{memchr_iter, memmem};

use super::tags::TagScanner;
use super::StreamEvent;

const CONTENT_MARKER: &[u8] = b"{\"content\":\"";

static CONTENT_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(CONTENT_MARKER));

/// Push-style decoder turning raw backend bytes into [`StreamEvent`]s.
///
/// Bytes may be split at any offset; the emitted event sequence does not depend
/// on how the input was chunked.
pub struct StreamDecoder {
    buffer: Vec<u8>,
    /// Bytes of the unterminated literal at the buffer head already scanned for its closing quote.
    scanned: usize,
    scanner: TagScanner,
}

impl StreamDecoder {
    #[must_use]
    pub fn new(thinking_enabled: bool) -> Self {
        Self {
            buffer: Vec::with_capacity(4 * 1024),
            scanned: 0,
            scanner: TagScanner::new(thinking_enabled),
        }
    }

    /// Feed raw bytes and return any events they complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw bytes and append completed events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<StreamEvent>) {
        self.buffer.extend_from_slice(chunk);
        let mut consumed = 0usize;
        let mut resume = std::mem::take(&mut self.scanned);
        loop {
            let Some(rel) = CONTENT_FINDER.find(&self.buffer[consumed..]) else {
                // Only a marker-length tail can still grow into a marker.
                let keep = (CONTENT_MARKER.len() - 1).min(self.buffer.len() - consumed);
                consumed = self.buffer.len() - keep;
                break;
            };
            let marker_start = consumed + rel;
            let quote = marker_start + CONTENT_MARKER.len() - 1;
            let from = if marker_start == 0 { resume } else { 0 };
            resume = 0;
            let body = &self.buffer[quote + 1..];
            let Some(close) = find_unescaped_quote(body, from) else {
                self.scanned = body.len();
                consumed = marker_start;
                break;
            };
            let literal_end = quote + 1 + close + 1;
            match serde_json::from_slice::<String>(&self.buffer[quote..literal_end]) {
                Ok(text) => self.scanner.push(&text, out),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping undecodable content fragment");
                }
            }
            consumed = literal_end;
        }
        self.buffer.drain(..consumed);
    }

    /// Flush held text and close any open block.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.finish_into(&mut out);
        out
    }

    pub fn finish_into(&mut self, out: &mut Vec<StreamEvent>) {
        if CONTENT_FINDER.find(&self.buffer).is_some() {
            tracing::debug!(
                buffered = self.buffer.len(),
                "backend stream ended inside a content fragment"
            );
        }
        self.buffer.clear();
        self.scanned = 0;
        self.scanner.finish(out);
    }
}

/// Offset of the first `"` at or after `from` in `body` preceded by an even
/// number of backslashes.
fn find_unescaped_quote(body: &[u8], from: usize) -> Option<usize> {
    let from = from.min(body.len());
    memchr_iter(b'"', &body[from..]).map(|pos| from + pos).find(|&pos| {
        let backslashes = body[..pos]
            .iter()
            .rev()
            .take_while(|&&byte| byte == b'\\')
            .count();
        backslashes % 2 == 0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(thinking: bool, chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = StreamDecoder::new(thinking);
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.feed_into(chunk, &mut out);
        }
        decoder.finish_into(&mut out);
        out
    }

    fn content(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_back_to_back_objects() {
        let events = decode_all(false, &[br#"{"content":"Hel"}{"content":"lo"}"#]);
        assert_eq!(events, vec![content("Hel"), content("lo")]);
    }

    #[test]
    fn test_escaped_quotes_and_backslashes() {
        let events = decode_all(
            false,
            &[br#"{"content":"say \"hi\" \\"}{"content":"\\\"x"}"#],
        );
        assert_eq!(events, vec![content("say \"hi\" \\"), content("\\\"x")]);
    }

    #[test]
    fn test_framing_noise_is_skipped() {
        let events = decode_all(
            false,
            &[b"\x00\x00\x01:event-type\x07assistant{\"content\":\"ok\"}\x8f\x12{\"other\":1}"],
        );
        assert_eq!(events, vec![content("ok")]);
    }

    #[test]
    fn test_unicode_escape_decoded() {
        let events = decode_all(false, &[br#"{"content":"caf\u00e9 \ud83d\ude00"}"#]);
        assert_eq!(events, vec![content("café 😀")]);
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let events = decode_all(false, &[b"xx{\"cont", b"ent\":\"a", b"b\"}"]);
        assert_eq!(events, vec![content("ab")]);
    }

    #[test]
    fn test_byte_at_a_time_resumes_quote_scan() {
        let wire = br#"{"content":"say \"hi\" \\"}{"content":"back\\\"slash"}"#;
        let chunks: Vec<&[u8]> = wire.chunks(1).collect();
        let events = decode_all(false, &chunks);
        let text: String = events
            .iter()
            .map(|event| match event {
                StreamEvent::ContentDelta { text } => text.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(text, "say \"hi\" \\back\\\"slash");
    }

    #[test]
    fn test_scan_offset_resets_after_literal_closes() {
        let mut decoder = StreamDecoder::new(false);
        let mut out = Vec::new();
        decoder.feed_into(br#"{"content":"abcdef"#, &mut out);
        assert!(out.is_empty());
        decoder.feed_into(br#"gh"}{"content":"x"#, &mut out);
        decoder.feed_into(br#"y"}"#, &mut out);
        decoder.finish_into(&mut out);
        let text: String = out
            .iter()
            .map(|event| match event {
                StreamEvent::ContentDelta { text } => text.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(text, "abcdefghxy");
    }

    #[test]
    fn test_every_split_offset_yields_same_events() {
        let wire: &[u8] = br#"{"content":"<thinking>pl\"an</thinking>Hi "}{"content":"<tool_use>{\"id\":\"t1\",\"name\":\"f\",\"input\":{}}</tool_use>"}{"content":"bye"}"#;
        let whole = decode_all(true, &[wire]);
        assert!(!whole.is_empty());
        for split in 0..=wire.len() {
            let (head, tail) = wire.split_at(split);
            assert_eq!(decode_all(true, &[head, tail]), whole, "split at {split}");
        }
        let bytewise: Vec<&[u8]> = wire.chunks(1).collect();
        assert_eq!(decode_all(true, &bytewise), whole);
    }

    #[test]
    fn test_incomplete_literal_dropped_at_finish() {
        let events = decode_all(false, &[br#"{"content":"done"}{"content":"trunc"#]);
        assert_eq!(events, vec![content("done")]);
    }
}
