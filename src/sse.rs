//! Line buffering and event parsing for SSE-style streaming bodies.
//!
//! The chat-completions endpoint answers a streaming request with a body like:
//!
//! ```text
//! data: {"id":"msg_123","object":"chat.completion.chunk","choices":[...]}
//!
//! : keep-alive
//!
//! data: {"id":"msg_123","object":"chat.completion.chunk","choices":[...]}
//!
//! data: [DONE]
//! ```
//!
//! The transport hands us that body in arbitrary pieces. A single `data:` line
//! may be split across several chunks (even in the middle of a multi-byte UTF-8
//! sequence) and a single chunk may carry many lines. Two pieces sit between the
//! raw bytes and the normalizer:
//!
//! ```text
//! transport chunks ──► LineBuffer::push() ──► complete lines
//!                                                 │
//!                                                 │ parse_line()
//!                                                 ▼
//!                       LineEvent::{Delta, Done, ProviderError, Ignore}
//! ```
//!
//! Parsing is deliberately forgiving. A line that is not valid JSON, a comment,
//! an unknown SSE field or plain garbage is logged and skipped; only an in-band
//! provider error envelope is reported upward, because it means the stream will
//! not produce anything useful after it.

use serde_json::{Map, Value};

/// Sentinel payload that marks normal end of stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental decoder turning transport chunks into complete lines.
///
/// Bytes are kept undecoded until a full line is available, so a UTF-8
/// sequence split across chunk boundaries decodes correctly. Lines end at `\n`;
/// a trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes of `pending` already known not to contain a newline
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the lines it completed.
    ///
    /// Lines are produced lazily. If the returned iterator is dropped before
    /// it is exhausted, the unread lines stay buffered and come out of the
    /// next call.
    pub fn push(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.pending.extend_from_slice(chunk);
        Lines {
            buffer: self,
            start: 0,
        }
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn remainder_len(&self) -> usize {
        self.pending.len()
    }

    /// Flushes the trailing partial line once the transport has ended.
    ///
    /// The remainder is returned only when it is non-empty, valid UTF-8 and
    /// starts like an SSE field. Anything else is discarded.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        self.scanned = 0;

        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            return None;
        }

        let line = match String::from_utf8(rest) {
            Ok(line) => line,
            Err(e) => {
                log::debug!("discarding undecodable trailing remainder: {}", e);
                return None;
            }
        };
        let line = line.trim_end_matches(['\r', '\n']).to_string();

        if is_sse_field(&line) {
            Some(line)
        } else {
            log::debug!(
                "discarding malformed trailing remainder ({} bytes)",
                line.len()
            );
            None
        }
    }
}

/// Lazy iterator over the lines completed by one [`LineBuffer::push`].
pub struct Lines<'a> {
    buffer: &'a mut LineBuffer,
    /// Start of the first unread line within `buffer.pending`
    start: usize,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let buffer = &mut *self.buffer;
        let from = buffer.scanned.max(self.start);

        match buffer.pending[from..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = from + offset;
                let line = decode_line(&buffer.pending[self.start..end]);
                self.start = end + 1;
                buffer.scanned = self.start;
                Some(line)
            }
            None => {
                buffer.scanned = buffer.pending.len();
                None
            }
        }
    }
}

impl Drop for Lines<'_> {
    fn drop(&mut self) {
        if self.start > 0 {
            self.buffer.pending.drain(..self.start);
            self.buffer.scanned -= self.start;
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn is_sse_field(line: &str) -> bool {
    line.starts_with(':')
        || ["data:", "event:", "id:", "retry:"]
            .iter()
            .any(|prefix| line.starts_with(prefix))
}

/// One parsed JSON increment, reduced to the first choice.
///
/// `delta` is kept as an untyped JSON object so that a single malformed field
/// cannot make the whole increment unreadable; the normalizer pulls fields out
/// one by one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaPayload {
    pub delta: Map<String, Value>,
    pub finish_reason: Option<String>,
}

impl DeltaPayload {
    /// Reads `choices[0].delta` and `choices[0].finish_reason` from a chunk.
    ///
    /// Chunks without choices (usage reports, role-only preambles) give an
    /// empty payload.
    pub fn from_chunk(chunk: &Value) -> Self {
        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return Self::default();
        };

        let delta = match choice.get("delta") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                log::warn!("ignoring non-object delta: {}", other);
                Map::new()
            }
        };

        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);

        Self {
            delta,
            finish_reason,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty() && self.finish_reason.is_none()
    }
}

/// Classification of one line of the body
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// A `data:` line carrying a chat-completion chunk
    Delta(DeltaPayload),
    /// The `data: [DONE]` sentinel
    Done,
    /// An `{"error": ...}` envelope sent in place of a chunk
    ProviderError(String),
    /// Blank separators, comments, other SSE fields and anything unparseable
    Ignore,
}

/// Classifies a single line. Never fails: bad input becomes [`LineEvent::Ignore`].
pub fn parse_line(line: &str) -> LineEvent {
    let line = line.trim_end_matches('\r');

    if line.trim().is_empty() {
        return LineEvent::Ignore;
    }

    if line.starts_with(':') {
        log::trace!("keep-alive comment");
        return LineEvent::Ignore;
    }

    let Some(rest) = line.strip_prefix("data:") else {
        if !is_sse_field(line) {
            log::debug!("ignoring unrecognized line: {}", truncate_for_log(line));
        }
        return LineEvent::Ignore;
    };

    let payload = rest.strip_prefix(' ').unwrap_or(rest).trim();
    if payload.is_empty() {
        return LineEvent::Ignore;
    }
    if payload == DONE_SENTINEL {
        return LineEvent::Done;
    }

    let chunk: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            log::warn!(
                "skipping undecodable data line ({}): {}",
                e,
                truncate_for_log(payload)
            );
            return LineEvent::Ignore;
        }
    };

    if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
        return LineEvent::ProviderError(provider_error_message(error));
    }

    LineEvent::Delta(DeltaPayload::from_chunk(&chunk))
}

fn provider_error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(fields) => {
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("provider reported an error");
            match fields.get("code") {
                Some(code) if !code.is_null() => format!("{} (code {})", message, code),
                _ => message.to_string(),
            }
        }
        other => other.to_string(),
    }
}

pub(crate) fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &text[..end], text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(buffer: &mut LineBuffer, chunk: &str) -> Vec<String> {
        buffer.push(chunk.as_bytes()).collect()
    }

    #[test]
    fn test_line_buffer_splits_many_lines_in_one_chunk() {
        let mut buffer = LineBuffer::new();
        let lines = collect(&mut buffer, "data: a\n\ndata: b\r\n: ping\n");
        assert_eq!(lines, vec!["data: a", "", "data: b", ": ping"]);
        assert_eq!(buffer.remainder_len(), 0);
    }

    #[test]
    fn test_line_buffer_keeps_partial_line() {
        let mut buffer = LineBuffer::new();
        assert!(collect(&mut buffer, "data: {\"choi").is_empty());
        assert!(collect(&mut buffer, "ces\":[]").is_empty());
        let lines = collect(&mut buffer, "}\ndata: [DO");
        assert_eq!(lines, vec!["data: {\"choices\":[]}"]);
        assert_eq!(buffer.remainder_len(), "data: [DO".len());
    }

    #[test]
    fn test_line_buffer_multibyte_split() {
        let line = "data: {\"content\":\"héllo ✓\"}\n";
        let bytes = line.as_bytes();
        // Split inside the three-byte check mark
        let cut = line.find('✓').unwrap() + 1;

        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(&bytes[..cut]).count(), 0);
        let lines: Vec<String> = buffer.push(&bytes[cut..]).collect();
        assert_eq!(lines, vec!["data: {\"content\":\"héllo ✓\"}"]);
    }

    #[test]
    fn test_line_buffer_unread_lines_survive_drop() {
        let mut buffer = LineBuffer::new();
        {
            let mut lines = buffer.push(b"one\ntwo\nthree\n");
            assert_eq!(lines.next().as_deref(), Some("one"));
        }
        let rest: Vec<String> = buffer.push(b"").collect();
        assert_eq!(rest, vec!["two", "three"]);
    }

    #[test]
    fn test_finish_flushes_well_formed_remainder() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"data: [DONE]").count(), 0);
        assert_eq!(buffer.finish().as_deref(), Some("data: [DONE]"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_finish_discards_malformed_remainder() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"garbage without prefix").count(), 0);
        assert_eq!(buffer.finish(), None);

        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"  \r\n").count(), 1);
        assert_eq!(buffer.push(b"   ").count(), 0);
        assert_eq!(buffer.finish(), None);

        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(&[b'd', b'a', b't', b'a', b':', 0xE2, 0x9C]).count(), 0);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_parse_line_data() {
        let event = parse_line(r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#);
        match event {
            LineEvent::Delta(payload) => {
                assert_eq!(payload.delta["content"], "Hi");
                assert_eq!(payload.finish_reason, None);
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_line_without_space_after_colon() {
        let event = parse_line(r#"data:{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        match event {
            LineEvent::Delta(payload) => {
                assert_eq!(payload.finish_reason.as_deref(), Some("stop"))
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_line_sentinel_and_noise() {
        assert_eq!(parse_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(parse_line("data: [DONE]\r"), LineEvent::Done);
        assert_eq!(parse_line(""), LineEvent::Ignore);
        assert_eq!(parse_line(": OPENROUTER PROCESSING"), LineEvent::Ignore);
        assert_eq!(parse_line("event: message"), LineEvent::Ignore);
        assert_eq!(parse_line("id: 42"), LineEvent::Ignore);
        assert_eq!(parse_line("retry: 1000"), LineEvent::Ignore);
        assert_eq!(parse_line("what is this"), LineEvent::Ignore);
        assert_eq!(parse_line("data: {not json"), LineEvent::Ignore);
        assert_eq!(parse_line("data:"), LineEvent::Ignore);
    }

    #[test]
    fn test_parse_line_provider_error() {
        let event = parse_line(r#"data: {"error":{"message":"upstream overloaded","code":502}}"#);
        assert_eq!(
            event,
            LineEvent::ProviderError("upstream overloaded (code 502)".to_string())
        );

        let event = parse_line(r#"data: {"error":"quota exceeded"}"#);
        assert_eq!(event, LineEvent::ProviderError("quota exceeded".to_string()));
    }

    #[test]
    fn test_delta_payload_without_choices() {
        let payload = DeltaPayload::from_chunk(&json!({
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }));
        assert!(payload.is_empty());

        let payload = DeltaPayload::from_chunk(&json!({
            "choices": [{"delta": "oops", "finish_reason": ""}]
        }));
        assert!(payload.is_empty());
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let text = "é".repeat(100);
        let truncated = truncate_for_log(&text);
        assert!(truncated.ends_with("(200 bytes)"));
    }
}
