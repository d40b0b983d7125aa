//! Lifecycle notifications emitted by the turn loop.
//!
//! The chat application usually has its own pub-sub bus. This crate does not
//! know about it; it writes [`LifecycleEvent`]s into whatever
//! [`NotificationSink`]s were attached to the [`Notifier`] in
//! [`ChatOptions`](crate::ChatOptions).
//!
//! ```rust,no_run
//! use streamchat::{ChatOptions, LifecycleEvent, Notifier};
//!
//! let notifier = Notifier::new().on_event(|event: &LifecycleEvent| {
//!     println!("[{}] {:?}", event.turn_id(), event);
//! });
//!
//! let options = ChatOptions::builder()
//!     .model("qwen2.5-32b-instruct")
//!     .base_url("http://localhost:1234/v1")
//!     .notifier(notifier)
//!     .build()
//!     .unwrap();
//! ```
//!
//! Sinks are called synchronously on the turn's task, so they should hand the
//! event off rather than do slow work inline.

use crate::client::TurnStatus;
use serde::Serialize;
use std::sync::Arc;

/// Something that happened during a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    TurnStarted {
        turn_id: String,
    },
    /// One stream event arrived; `kind` is [`StreamEvent::kind`](crate::StreamEvent::kind)
    DeltaReceived {
        turn_id: String,
        kind: String,
    },
    ToolInvoked {
        turn_id: String,
        call_id: String,
        name: String,
        success: bool,
        timed_out: bool,
    },
    TurnCompleted {
        turn_id: String,
        status: TurnStatus,
    },
    Error {
        turn_id: String,
        message: String,
    },
}

impl LifecycleEvent {
    pub fn turn_id(&self) -> &str {
        match self {
            LifecycleEvent::TurnStarted { turn_id }
            | LifecycleEvent::DeltaReceived { turn_id, .. }
            | LifecycleEvent::ToolInvoked { turn_id, .. }
            | LifecycleEvent::TurnCompleted { turn_id, .. }
            | LifecycleEvent::Error { turn_id, .. } => turn_id,
        }
    }
}

/// Receiver of lifecycle events
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

impl<F> NotificationSink for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn notify(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Fan-out to zero or more sinks. Cloning shares the sinks.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Adds a closure sink
    pub fn on_event<F>(self, handler: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.add_sink(Arc::new(handler))
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Delivers `event` to every sink, in registration order
    pub fn publish(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sinks", &format!("{} sink(s)", self.sinks.len()))
            .finish()
    }
}
