//! The message store the turn loop writes into as events arrive.
//!
//! Persistence belongs to the application. The turn loop only needs somewhere
//! to grow the live assistant message, so it talks to a [`MessageStore`]. Two
//! implementations ship here: [`NullStore`] (the default) and [`MemoryStore`],
//! an in-memory store used by tests and small tools.

use crate::client::TurnStatus;
use crate::registry::ExecutionResult;
use crate::types::{ImageRef, ToolCall};
use std::sync::{Mutex, PoisonError};

/// Sink for the growing assistant message of each turn
pub trait MessageStore: Send + Sync {
    fn append_text(&self, turn_id: &str, text: &str);

    fn append_reasoning(&self, turn_id: &str, text: &str);

    fn push_image(&self, turn_id: &str, image: &ImageRef);

    fn record_tool_result(&self, turn_id: &str, call: &ToolCall, result: &ExecutionResult);

    /// Marks the message complete. Called exactly once per turn.
    fn finish(&self, turn_id: &str, status: TurnStatus);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl MessageStore for NullStore {
    fn append_text(&self, _turn_id: &str, _text: &str) {}

    fn append_reasoning(&self, _turn_id: &str, _text: &str) {}

    fn push_image(&self, _turn_id: &str, _image: &ImageRef) {}

    fn record_tool_result(&self, _turn_id: &str, _call: &ToolCall, _result: &ExecutionResult) {}

    fn finish(&self, _turn_id: &str, _status: TurnStatus) {}
}

/// One assistant message as recorded by [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredMessage {
    pub turn_id: String,
    pub text: String,
    pub reasoning: String,
    pub images: Vec<ImageRef>,
    pub tool_results: Vec<(ToolCall, ExecutionResult)>,
    pub status: Option<TurnStatus>,
}

/// Keeps every turn's message in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded messages, oldest first
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, turn_id: &str) -> Option<StoredMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.turn_id == turn_id)
            .cloned()
    }

    fn with_message(&self, turn_id: &str, update: impl FnOnce(&mut StoredMessage)) {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let position = match messages.iter().position(|m| m.turn_id == turn_id) {
            Some(position) => position,
            None => {
                messages.push(StoredMessage {
                    turn_id: turn_id.to_string(),
                    ..Default::default()
                });
                messages.len() - 1
            }
        };
        update(&mut messages[position]);
    }
}

impl MessageStore for MemoryStore {
    fn append_text(&self, turn_id: &str, text: &str) {
        self.with_message(turn_id, |m| m.text.push_str(text));
    }

    fn append_reasoning(&self, turn_id: &str, text: &str) {
        self.with_message(turn_id, |m| m.reasoning.push_str(text));
    }

    fn push_image(&self, turn_id: &str, image: &ImageRef) {
        self.with_message(turn_id, |m| m.images.push(image.clone()));
    }

    fn record_tool_result(&self, turn_id: &str, call: &ToolCall, result: &ExecutionResult) {
        self.with_message(turn_id, |m| {
            m.tool_results.push((call.clone(), result.clone()))
        });
    }

    fn finish(&self, turn_id: &str, status: TurnStatus) {
        self.with_message(turn_id, |m| m.status = Some(status));
    }
}
