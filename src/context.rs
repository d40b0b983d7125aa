//! Context window helpers
//!
//! Character-based token estimation and history truncation. The turn loop uses
//! [`truncate_messages`] when [`ChatOptions::max_history_messages`] is set;
//! callers managing history themselves can use the same helpers directly.
//!
//! ```rust
//! use streamchat::{estimate_tokens, truncate_messages, Message};
//!
//! let messages = vec![Message::system("Be brief"), Message::user("Hello!")];
//! if estimate_tokens(&messages) > 28_000 {
//!     let _trimmed = truncate_messages(&messages, 10, true);
//! }
//! ```
//!
//! [`ChatOptions::max_history_messages`]: crate::ChatOptions::max_history_messages

use crate::types::{ContentBlock, Message, MessageRole};

/// Flat per-image cost in characters (roughly 85 tokens for a low-detail image)
const IMAGE_CHAR_COST: usize = 340;

/// Estimates tokens at about four characters per token.
///
/// This is an approximation; leave 10-20% headroom when comparing against a
/// model's context size.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let content_chars: usize = messages
        .iter()
        .map(|message| {
            // role formatting
            8 + message
                .content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text(text) => text.text.len(),
                    ContentBlock::Image(_) => IMAGE_CHAR_COST,
                    ContentBlock::ToolUse(call) => {
                        call.id.len() + call.name.len() + call.arguments.len()
                    }
                    ContentBlock::ToolResult(result) => {
                        result.tool_use_id.len() + result.content.len()
                    }
                })
                .sum::<usize>()
        })
        .sum();

    (content_chars + 16).div_ceil(4)
}

/// Keeps the most recent `keep` messages, plus the leading system message
/// when `preserve_system` is set.
///
/// The cut never starts on a tool result. When it would, it moves back to
/// the assistant message that issued the calls, so results always travel with
/// their call and the kept window may exceed `keep`.
pub fn truncate_messages(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<Message> {
    if messages.len() <= keep {
        return messages.to_vec();
    }

    let system = messages
        .first()
        .filter(|m| preserve_system && m.role == MessageRole::System);
    let body = if system.is_some() {
        &messages[1..]
    } else {
        messages
    };

    let mut start = body.len().saturating_sub(keep);
    while start > 0 && body[start].role == MessageRole::Tool {
        start -= 1;
    }

    system
        .into_iter()
        .chain(body[start..].iter())
        .cloned()
        .collect()
}

/// Whether the estimate exceeds `limit * margin`
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let threshold = (limit as f32 * margin) as usize;
    estimate_tokens(messages) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageBlock, ToolResultBlock, ToolUseBlock};

    fn conversation(turns: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("System")];
        for i in 0..turns {
            messages.push(Message::user(format!("question {}", i)));
            messages.push(Message::assistant(vec![ContentBlock::Text(
                crate::types::TextBlock::new(format!("answer {}", i)),
            )]));
        }
        messages
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn test_estimate_tokens_counts_every_block_kind() {
        let text_only = vec![Message::user("Hello world")];
        // (8 + 11 + 16) / 4, rounded up
        assert_eq!(estimate_tokens(&text_only), 9);

        let with_image = vec![Message::user_with_blocks(vec![ContentBlock::Image(
            ImageBlock::from_url("https://example.com/cat.png").unwrap(),
        )])];
        assert!(estimate_tokens(&with_image) >= 85);

        let with_tool = vec![
            Message::assistant(vec![ContentBlock::ToolUse(ToolUseBlock {
                id: "call_1".to_string(),
                name: "search".to_string(),
                arguments: r#"{"q":"rust"}"#.to_string(),
            })]),
            Message::tool_result(ToolResultBlock::new("call_1", "found it")),
        ];
        assert!(estimate_tokens(&with_tool) > estimate_tokens(&with_tool[..1]));
    }

    #[test]
    fn test_truncate_preserves_system() {
        let messages = conversation(5);
        let truncated = truncate_messages(&messages, 4, true);

        assert_eq!(truncated.len(), 5);
        assert_eq!(truncated[0].role, MessageRole::System);
        assert_eq!(truncated[1], Message::user("question 3"));
    }

    #[test]
    fn test_truncate_without_preserve() {
        let messages = conversation(5);
        let truncated = truncate_messages(&messages, 3, false);

        assert_eq!(truncated.len(), 3);
        assert_ne!(truncated[0].role, MessageRole::System);
    }

    #[test]
    fn test_truncate_keep_all_and_zero() {
        let messages = conversation(2);
        assert_eq!(truncate_messages(&messages, 10, true), messages);
        assert_eq!(truncate_messages(&messages, 0, true).len(), 1);
        assert!(truncate_messages(&messages, 0, false).is_empty());
    }

    #[test]
    fn test_truncate_keeps_tool_results_with_their_call() {
        let messages = vec![
            Message::system("System"),
            Message::user("look it up"),
            Message::assistant(vec![ContentBlock::ToolUse(ToolUseBlock {
                id: "call_1".to_string(),
                name: "search".to_string(),
                arguments: "{}".to_string(),
            })]),
            Message::tool_result(ToolResultBlock::new("call_1", "result")),
            Message::assistant(vec![ContentBlock::Text(crate::types::TextBlock::new(
                "done",
            ))]),
        ];

        let truncated = truncate_messages(&messages, 2, true);
        assert_eq!(truncated.len(), 4);
        assert_eq!(truncated[0].role, MessageRole::System);
        assert_eq!(truncated[1], messages[2]);
        assert_eq!(truncated[2].role, MessageRole::Tool);
        assert_eq!(truncated[3].role, MessageRole::Assistant);
    }

    #[test]
    fn test_truncate_window_of_only_tool_results() {
        let messages = vec![
            Message::user("check both"),
            Message::assistant(vec![
                ContentBlock::ToolUse(ToolUseBlock {
                    id: "call_a".to_string(),
                    name: "a".to_string(),
                    arguments: "{}".to_string(),
                }),
                ContentBlock::ToolUse(ToolUseBlock {
                    id: "call_b".to_string(),
                    name: "b".to_string(),
                    arguments: "{}".to_string(),
                }),
            ]),
            Message::tool_result(ToolResultBlock::new("call_a", "a done")),
            Message::tool_result(ToolResultBlock::new("call_b", "b done")),
        ];

        let truncated = truncate_messages(&messages, 2, true);
        assert_eq!(truncated, messages[1..].to_vec());
    }

    #[test]
    fn test_is_approaching_limit() {
        let messages = vec![Message::user("x".repeat(400))];
        assert!(is_approaching_limit(&messages, 100, 0.9));
        assert!(!is_approaching_limit(&messages, 1000, 0.9));
    }
}
