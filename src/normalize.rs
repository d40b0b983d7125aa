//! Turns parsed deltas into typed [`StreamEvent`]s.
//!
//! Each field of a delta is read independently and tolerantly: a malformed
//! `images` entry does not stop the text of the same delta from coming through.
//! Text, reasoning and images are returned as soon as they are seen. Tool-call
//! fragments go into a [`ToolCallAccumulator`] and only come out as events when
//! the finish reason (or the `[DONE]` sentinel) says the model is invoking
//! tools. A body that just stops with fragments pending is a failure.

use crate::aggregator::{ToolCallAccumulator, ToolCallFragment};
use crate::sse::DeltaPayload;
use crate::types::{ImageBlock, ImageRef, StreamEvent, data_url};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Keys that carry model reasoning, in lookup order
const REASONING_KEYS: [&str; 3] = ["reasoning", "reasoning_content", "thinking"];

/// Keys that carry inline base64 image data
const INLINE_DATA_KEYS: [&str; 3] = ["b64_json", "data", "base64"];

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Finish reasons that mean "run the tools you collected"
fn is_tool_finish(reason: &str) -> bool {
    matches!(reason, "tool_calls" | "function_call")
}

/// Stateful per-stream normalizer.
///
/// Holds the tool-call accumulator and the set of images already emitted, so
/// one instance must be used for exactly one response stream. Images are
/// deduplicated on `(url, final)`: a later `final` copy of a preview still
/// comes through, while `index` alone never makes an image new.
#[derive(Debug, Default)]
pub struct DeltaNormalizer {
    accumulator: ToolCallAccumulator,
    seen_images: HashSet<(String, Option<bool>)>,
    finished: bool,
}

impl DeltaNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal `done` has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Extracts every event one delta yields.
    ///
    /// Within a delta the order is reasoning, text, images, then (on a finish
    /// reason) tool calls and `done`.
    pub fn normalize(&mut self, payload: DeltaPayload) -> Vec<StreamEvent> {
        if self.finished {
            if !payload.is_empty() {
                log::debug!("ignoring delta received after the stream finished");
            }
            return Vec::new();
        }

        let DeltaPayload {
            delta,
            finish_reason,
        } = payload;
        let mut events = Vec::new();

        if let Some(reasoning) = extract_reasoning(&delta) {
            events.push(StreamEvent::reasoning(reasoning));
        }

        let mut image_candidates = Vec::new();
        if let Some(text) = extract_content(&delta, &mut image_candidates) {
            events.push(StreamEvent::text(text));
        }

        match delta.get("images") {
            Some(Value::Array(images)) => {
                image_candidates.extend(images.iter().filter_map(parse_image));
            }
            Some(Value::Null) | None => {}
            Some(other) => log::warn!("skipping non-array images field: {}", other),
        }

        for image in image_candidates {
            if self.seen_images.insert((image.url.clone(), image.is_final)) {
                events.push(StreamEvent::Image(image));
            } else {
                log::trace!("suppressing duplicate image {}", image.url);
            }
        }

        for fragment in extract_fragments(&delta) {
            self.accumulator.push(fragment);
        }

        if let Some(reason) = finish_reason {
            if is_tool_finish(&reason) {
                events.extend(self.flush_tool_calls());
            } else {
                let discarded = self.accumulator.discard();
                if discarded > 0 {
                    log::warn!(
                        "discarding {} unfinished tool call(s) on finish reason '{}'",
                        discarded,
                        reason
                    );
                }
                log::debug!("stream finished: {}", reason);
            }
            events.push(StreamEvent::Done);
            self.finished = true;
        }

        events
    }

    /// Closes a stream on the `[DONE]` sentinel when no finish reason came
    /// first. Pending fragments are treated as a tool invocation.
    pub fn finish_stream(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        if self.accumulator.has_pending() {
            log::debug!("sentinel without finish reason; flushing pending tool calls");
        }
        let mut events = self.flush_tool_calls();
        events.push(StreamEvent::Done);
        events
    }

    /// Closes a body that ended with neither a finish reason nor the sentinel.
    ///
    /// A body cut off mid tool call must not look like a normal completion:
    /// pending fragments are discarded and the stream fails. Without pending
    /// fragments the stream ends with `done`.
    pub fn finish_truncated(&mut self) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        let discarded = self.accumulator.discard();
        if discarded > 0 {
            log::warn!(
                "body ended before completion; discarding {} unfinished tool call(s)",
                discarded
            );
            return Err(Error::transport("stream ended before completion"));
        }
        Ok(vec![StreamEvent::Done])
    }

    fn flush_tool_calls(&mut self) -> Vec<StreamEvent> {
        self.accumulator
            .finalize()
            .into_iter()
            .map(|tool_call| StreamEvent::ToolCall { tool_call })
            .collect()
    }
}

fn extract_reasoning(delta: &Map<String, Value>) -> Option<String> {
    REASONING_KEYS.iter().find_map(|key| match delta.get(*key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Object(fields) => fields
            .get("text")
            .or_else(|| fields.get("content"))
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        Value::String(_) | Value::Null => None,
        other => {
            log::warn!("skipping malformed {} field: {}", key, other);
            None
        }
    })
}

/// Reads `content`, which is either a string or an array of typed parts.
/// Image parts are pushed onto `images`.
fn extract_content(delta: &Map<String, Value>, images: &mut Vec<ImageRef>) -> Option<String> {
    match delta.get("content")? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::String(_) | Value::Null => None,
        Value::Array(parts) => {
            let mut text = String::new();
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") | None if part.get("text").is_some() => {
                        if let Some(piece) = part.get("text").and_then(Value::as_str) {
                            text.push_str(piece);
                        }
                    }
                    Some("image_url") | Some("image") => images.extend(parse_image(part)),
                    other => log::debug!("skipping content part of type {:?}", other),
                }
            }
            (!text.is_empty()).then_some(text)
        }
        other => {
            log::warn!("skipping malformed content field: {}", other);
            None
        }
    }
}

/// Resolves one image reference in any of the supported encodings:
///
/// - a bare URL string, or an object with `url`
/// - a nested `image_url`, either `{ "url": ... }` or a string
/// - inline `b64_json` / `data` / `base64` with an optional `mime_type`
fn parse_image(value: &Value) -> Option<ImageRef> {
    let (url, fields) = match value {
        Value::String(url) => (Some(url.clone()), None),
        Value::Object(fields) => (resolve_image_url(fields), Some(fields)),
        other => {
            log::warn!("skipping malformed image entry: {}", other);
            return None;
        }
    };

    let Some(url) = url else {
        log::warn!("skipping image entry without a usable URL or data");
        return None;
    };

    let url = match ImageBlock::from_url(url) {
        Ok(block) => block.url().to_string(),
        Err(e) => {
            log::warn!("skipping image: {}", e);
            return None;
        }
    };

    Some(ImageRef {
        url,
        is_final: fields.and_then(|f| f.get("final")).and_then(Value::as_bool),
        index: fields
            .and_then(|f| f.get("index"))
            .and_then(Value::as_u64)
            .and_then(|i| u32::try_from(i).ok()),
    })
}

fn resolve_image_url(fields: &Map<String, Value>) -> Option<String> {
    if let Some(url) = fields.get("url").and_then(Value::as_str) {
        return Some(url.to_string());
    }

    match fields.get("image_url") {
        Some(Value::String(url)) => return Some(url.clone()),
        Some(Value::Object(nested)) => {
            if let Some(url) = nested.get("url").and_then(Value::as_str) {
                return Some(url.to_string());
            }
        }
        _ => {}
    }

    let data = INLINE_DATA_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))?;
    if data.starts_with("data:") {
        return Some(data.to_string());
    }

    let mime = fields
        .get("mime_type")
        .or_else(|| fields.get("mimeType"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_IMAGE_MIME);

    match data_url(mime, data) {
        Ok(url) => Some(url),
        Err(e) => {
            log::warn!("skipping inline image: {}", e);
            None
        }
    }
}

fn extract_fragments(delta: &Map<String, Value>) -> Vec<ToolCallFragment> {
    let mut fragments = Vec::new();

    match delta.get("tool_calls") {
        Some(Value::Array(calls)) => {
            for (position, call) in calls.iter().enumerate() {
                let Some(fields) = call.as_object() else {
                    log::warn!("skipping malformed tool call fragment: {}", call);
                    continue;
                };
                let index = fields
                    .get("index")
                    .and_then(Value::as_u64)
                    .and_then(|i| usize::try_from(i).ok())
                    .unwrap_or(position);
                let mut fragment = function_fragment(index, fields.get("function"));
                fragment.id = fields.get("id").and_then(Value::as_str).map(str::to_string);
                fragments.push(fragment);
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => log::warn!("skipping non-array tool_calls field: {}", other),
    }

    // Legacy single-call form
    if let Some(function) = delta.get("function_call").filter(|f| f.is_object()) {
        fragments.push(function_fragment(0, Some(function)));
    }

    fragments
}

fn function_fragment(index: usize, function: Option<&Value>) -> ToolCallFragment {
    let mut fragment = ToolCallFragment::new(index);
    let Some(function) = function.and_then(Value::as_object) else {
        return fragment;
    };

    fragment.name = function
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);
    fragment.arguments = match function.get("arguments") {
        Some(Value::String(chunk)) => chunk.clone(),
        Some(Value::Null) | None => String::new(),
        Some(decoded) => decoded.to_string(),
    };
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(delta: Value, finish_reason: Option<&str>) -> DeltaPayload {
        DeltaPayload {
            delta: delta.as_object().cloned().unwrap_or_default(),
            finish_reason: finish_reason.map(str::to_string),
        }
    }

    #[test]
    fn test_text_and_reasoning_are_separate() {
        let mut normalizer = DeltaNormalizer::new();
        let events = normalizer.normalize(payload(
            json!({"reasoning_content": "thinking...", "content": "Hello"}),
            None,
        ));
        assert_eq!(
            events,
            vec![StreamEvent::reasoning("thinking..."), StreamEvent::text("Hello")]
        );
    }

    #[test]
    fn test_empty_content_emits_nothing() {
        let mut normalizer = DeltaNormalizer::new();
        assert!(normalizer
            .normalize(payload(json!({"role": "assistant", "content": ""}), None))
            .is_empty());
        assert!(normalizer
            .normalize(payload(json!({"content": null}), None))
            .is_empty());
    }

    #[test]
    fn test_content_parts_concatenate() {
        let mut normalizer = DeltaNormalizer::new();
        let events = normalizer.normalize(payload(
            json!({"content": [
                {"type": "text", "text": "Here "},
                {"type": "text", "text": "you go"},
                {"type": "image_url", "image_url": {"url": "https://example.com/a.png"}}
            ]}),
            None,
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::text("Here you go"));
        assert!(matches!(&events[1], StreamEvent::Image(img) if img.url == "https://example.com/a.png"));
    }

    #[test]
    fn test_image_encodings() {
        let mut normalizer = DeltaNormalizer::new();
        let events = normalizer.normalize(payload(
            json!({"images": [
                "https://example.com/bare.png",
                {"url": "https://example.com/direct.png", "index": 1},
                {"image_url": {"url": "https://example.com/nested.png"}},
                {"image_url": "https://example.com/nested-string.png"},
                {"b64_json": "QUJD", "mime_type": "image/jpeg", "final": true},
                {"data": "REVG"}
            ]}),
            None,
        ));

        let urls: Vec<_> = events
            .iter()
            .map(|e| match e {
                StreamEvent::Image(img) => img.url.as_str(),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/bare.png",
                "https://example.com/direct.png",
                "https://example.com/nested.png",
                "https://example.com/nested-string.png",
                "data:image/jpeg;base64,QUJD",
                "data:image/png;base64,REVG",
            ]
        );
        assert!(matches!(&events[1], StreamEvent::Image(img) if img.index == Some(1)));
        assert!(matches!(&events[4], StreamEvent::Image(img) if img.is_final == Some(true)));
    }

    #[test]
    fn test_duplicate_images_suppressed_across_deltas() {
        let mut normalizer = DeltaNormalizer::new();
        let first = normalizer.normalize(payload(
            json!({"images": [{"url": "https://example.com/x.png"}]}),
            None,
        ));
        let second = normalizer.normalize(payload(
            json!({"images": [{"image_url": {"url": "https://example.com/x.png"}}]}),
            None,
        ));
        let preview_then_final = normalizer.normalize(payload(
            json!({"images": [{"url": "https://example.com/x.png", "final": true}]}),
            None,
        ));

        let indexed_copy = normalizer.normalize(payload(
            json!({"images": ["https://example.com/x.png", {"url": "https://example.com/x.png", "index": 3}]}),
            None,
        ));

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(preview_then_final.len(), 1);
        assert!(indexed_copy.is_empty());
    }

    #[test]
    fn test_malformed_field_does_not_block_others() {
        let mut normalizer = DeltaNormalizer::new();
        let events = normalizer.normalize(payload(
            json!({
                "content": "still here",
                "images": [42, {"url": "javascript:alert(1)"}, {"b64_json": "AA", "mime_type": "text/html"}],
                "tool_calls": "nope",
                "reasoning": 7
            }),
            None,
        ));
        assert_eq!(events, vec![StreamEvent::text("still here")]);
    }

    #[test]
    fn test_tool_calls_deferred_until_finish() {
        let mut normalizer = DeltaNormalizer::new();
        let early = normalizer.normalize(payload(
            json!({"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "search", "arguments": "{\"q\":"}}]}),
            None,
        ));
        assert!(early.is_empty());

        let late = normalizer.normalize(payload(
            json!({"tool_calls": [{"index": 0, "function": {"arguments": "\"rust\"}"}}]}),
            Some("tool_calls"),
        ));
        assert_eq!(late.len(), 2);
        match &late[0] {
            StreamEvent::ToolCall { tool_call } => {
                assert_eq!(tool_call.id, "call_1");
                assert_eq!(tool_call.function.arguments, "{\"q\":\"rust\"}");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
        assert_eq!(late[1], StreamEvent::Done);
        assert!(normalizer.is_finished());
    }

    #[test]
    fn test_stop_discards_fragments() {
        let mut normalizer = DeltaNormalizer::new();
        normalizer.normalize(payload(
            json!({"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "search"}}]}),
            None,
        ));
        let events = normalizer.normalize(payload(json!({}), Some("stop")));
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn test_missing_index_and_object_arguments() {
        let mut normalizer = DeltaNormalizer::new();
        let events = normalizer.normalize(payload(
            json!({"tool_calls": [
                {"id": "a", "function": {"name": "first", "arguments": {"x": 1}}},
                {"id": "b", "function": {"name": "second", "arguments": ""}}
            ]}),
            Some("tool_calls"),
        ));
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall { tool_call } => Some(tool_call),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[0].function.arguments, r#"{"x":1}"#);
        assert_eq!(calls[1].function.name, "second");
    }

    #[test]
    fn test_legacy_function_call() {
        let mut normalizer = DeltaNormalizer::new();
        normalizer.normalize(payload(
            json!({"function_call": {"name": "get_time", "arguments": "{}"}}),
            None,
        ));
        let events = normalizer.normalize(payload(json!({}), Some("function_call")));
        assert!(matches!(
            &events[0],
            StreamEvent::ToolCall { tool_call } if tool_call.function.name == "get_time" && tool_call.id.starts_with("call_")
        ));
    }

    #[test]
    fn test_finish_stream_flushes_pending() {
        let mut normalizer = DeltaNormalizer::new();
        normalizer.normalize(payload(
            json!({"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "noop", "arguments": "{}"}}]}),
            None,
        ));
        let events = normalizer.finish_stream();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::ToolCall { .. }));
        assert_eq!(events[1], StreamEvent::Done);

        assert!(normalizer.finish_stream().is_empty());
        assert!(normalizer
            .normalize(payload(json!({"content": "late"}), None))
            .is_empty());
    }

    #[test]
    fn test_truncated_body_discards_pending() {
        let mut normalizer = DeltaNormalizer::new();
        normalizer.normalize(payload(
            json!({"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "noop", "arguments": "{\"ci"}}]}),
            None,
        ));
        let err = normalizer.finish_truncated().unwrap_err();
        assert!(err.is_transport());
        assert!(normalizer.is_finished());
        assert!(normalizer.finish_truncated().unwrap().is_empty());

        let mut clean = DeltaNormalizer::new();
        clean.normalize(payload(json!({"content": "hi"}), None));
        assert_eq!(clean.finish_truncated().unwrap(), vec![StreamEvent::Done]);
    }
}
