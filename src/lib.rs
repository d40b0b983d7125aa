//! # streamchat
//!
//! Streaming core for OpenAI-compatible chat-completion endpoints (LM Studio,
//! Ollama, llama.cpp, vLLM, OpenRouter).
//!
//! The crate turns a raw `text/event-stream` body into typed [`StreamEvent`]s,
//! keeps a registry of tools the model may call, and runs whole turns: request,
//! stream, tool execution, resubmission.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──► LineBuffer ──► parse_line ──► DeltaNormalizer ──► StreamEvent
//!  (Transport)   (sse)         (sse)      (normalize + aggregator)
//! ```
//!
//! ## Single request (`query()`)
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use streamchat::{ChatOptions, StreamEvent, query};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ChatOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!
//!     let mut events = query("What's the capital of France?", &options).await?;
//!     while let Some(event) = events.next().await {
//!         match event? {
//!             StreamEvent::Text { text } => print!("{}", text),
//!             StreamEvent::ToolCall { tool_call } => {
//!                 println!("tool requested: {}", tool_call.function.name)
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Full turns (`Client`)
//!
//! ```rust,no_run
//! use serde_json::json;
//! use streamchat::{ChatOptions, Client, RegisterOptions, client_registry, tool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let add = tool("add", "Add two numbers")
//!         .param("a", "number")
//!         .param("b", "number")
//!         .build(|args| async move {
//!             let a = args["a"].as_f64().unwrap_or(0.0);
//!             let b = args["b"].as_f64().unwrap_or(0.0);
//!             Ok(json!({ "result": a + b }))
//!         });
//!     client_registry().register_tool(add, RegisterOptions::default())?;
//!
//!     let options = ChatOptions::builder()
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!
//!     let mut client = Client::new(options)?;
//!     let outcome = client.turn("What is 2 + 3?").await?;
//!     println!("{} ({:?})", outcome.text, outcome.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - **sse**: line framing and `data:` payload classification
//! - **aggregator**: reassembly of fragmented tool calls
//! - **normalize**: provider-specific delta shapes to [`StreamEvent`]s
//! - **stream**: the cancellable event emitter
//! - **transport**: HTTP request seam
//! - **tools** / **registry**: tool definitions, validation, timed execution
//! - **client**: the turn state machine
//! - **notify** / **store**: lifecycle notifications and message persistence
//! - **config**, **context**, **retry**, **error**: supporting pieces

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Incremental tool-call assembly keyed by fragment index.
mod aggregator;

/// Turn state machine, `Client` and the one-shot `query()`.
mod client;

/// Provider presets and environment lookup.
mod config;

/// Token estimation and history truncation.
mod context;

mod error;

/// Converts decoded `delta` objects into typed events.
mod normalize;

/// Lifecycle notifications published during a turn.
mod notify;

/// Process-wide client-side and server-side tool registries.
mod registry;

/// SSE line buffering and per-line classification.
mod sse;

/// Persistence seam for assistant output.
mod store;

/// Cancellable stream from response bytes to events.
mod stream;

/// Tool definitions, handlers and schema conversion.
mod tools;

/// Sends requests and returns response bodies.
mod transport;

/// Options, messages and wire types.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Exponential backoff, usable on its own.
pub mod retry;

// --- Turns ---

pub use client::{Client, ToolExchange, TurnOutcome, TurnState, TurnStatus, query, query_with};

// --- Stream pipeline ---

pub use aggregator::{MAX_TOOL_CALL_INDEX, ToolCallAccumulator, ToolCallFragment};
pub use normalize::DeltaNormalizer;
pub use sse::{DONE_SENTINEL, DeltaPayload, LineBuffer, LineEvent, Lines, parse_line};
pub use stream::{ByteStream, EventStream, byte_stream_from_chunks, event_stream};
pub use transport::{HttpTransport, Transport};

// --- Tools ---

pub use registry::{
    ChangeListener, ClientSide, DEFAULT_TOOL_TIMEOUT, ExecutionResult, ExecutionSide,
    RegisterOptions, RegistryChange, ServerSide, ToolExecutor, ToolInfo, ToolRegistry,
    client_registry, server_registry,
};
pub use tools::{
    Tool, ToolBuilder, ToolDefinition, ToolHandler, ToolRuntime, ToolUiMetadata, tool,
};

// --- Notifications and persistence ---

pub use notify::{LifecycleEvent, NotificationSink, Notifier};
pub use store::{MemoryStore, MessageStore, NullStore, StoredMessage};

// --- Configuration ---

pub use config::{
    API_KEY_ENV, BASE_URL_ENV, MODEL_ENV, Provider, builder_from_env, get_api_key, get_base_url,
    get_model,
};
pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Errors ---

pub use error::{Error, Result};

// --- Types ---

pub use types::{
    ChatOptions, ChatOptionsBuilder, ContentBlock, FunctionCall, ImageBlock, ImageRef, Message,
    MessageRole, OpenAIContent, OpenAIContentPart, OpenAIImageUrl, OpenAIMessage, OpenAIRequest,
    StreamEvent, TextBlock, ToolCall, ToolResultBlock, ToolUseBlock,
};

/// Abort handle accepted by [`event_stream`] and [`Client::interrupt_handle`]
pub use tokio_util::sync::CancellationToken;

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The types most callers need: `use streamchat::prelude::*;`
pub mod prelude {
    pub use crate::{
        CancellationToken, ChatOptions, ChatOptionsBuilder, Client, ContentBlock, Error,
        ExecutionResult, ImageRef, LifecycleEvent, Message, Notifier, RegisterOptions, Result,
        StreamEvent, Tool, ToolCall, ToolRuntime, TurnOutcome, TurnStatus, client_registry,
        query, server_registry, tool,
    };
}
