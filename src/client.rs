//! # Turn orchestration
//!
//! Two entry points:
//!
//! - [`query()`] opens one streaming request and returns the raw
//!   [`EventStream`]. No history, no tool execution.
//! - [`Client`] keeps the conversation and runs whole turns: it sends the
//!   request, consumes the events, executes requested tools and resubmits
//!   until the model answers without tool calls.
//!
//! ## Turn states
//!
//! ```text
//!            ┌───────────────────────────────────────────┐
//!            ▼                                           │
//!        Sending ──► Streaming ──► AwaitingTools ────────┘
//!            │           │
//!            │           ├──► Complete     (done, no tool calls)
//!            ├───────────┼──► Errored      (transport failure; partial content kept)
//!            └───────────┴──► Cancelled    (interrupt; partial content kept)
//! ```
//!
//! A failing tool never ends the turn. Its error text goes back to the model
//! as that tool's result, and the model decides what to do next.
//!
//! ## Example
//!
//! ```rust,no_run
//! use streamchat::{ChatOptions, Client, TurnStatus};
//!
//! # async fn example() -> streamchat::Result<()> {
//! let options = ChatOptions::builder()
//!     .model("qwen2.5-32b-instruct")
//!     .base_url("http://localhost:1234/v1")
//!     .build()?;
//!
//! let mut client = Client::new(options)?;
//! let outcome = client.turn("What's the weather in Paris?").await?;
//! if outcome.status == TurnStatus::Complete {
//!     println!("{}", outcome.text);
//! }
//! # Ok(())
//! # }
//! ```

use crate::context::truncate_messages;
use crate::notify::LifecycleEvent;
use crate::registry::{ExecutionResult, ToolExecutor, client_registry};
use crate::retry::retry_with_backoff_conditional;
use crate::store::{MessageStore, NullStore};
use crate::stream::{ByteStream, EventStream, event_stream};
use crate::transport::{HttpTransport, Transport};
use crate::types::{
    ChatOptions, ContentBlock, ImageBlock, ImageRef, Message, MessageRole, OpenAIContent,
    OpenAIContentPart, OpenAIMessage, OpenAIRequest, StreamEvent, TextBlock, ToolCall,
    ToolResultBlock, ToolUseBlock,
};
use crate::{Error, Result};
use futures::stream::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where a turn currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    AwaitingTools,
    Complete,
    Errored,
    Cancelled,
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Complete,
    Errored,
    Cancelled,
}

impl From<TurnStatus> for TurnState {
    fn from(status: TurnStatus) -> Self {
        match status {
            TurnStatus::Complete => TurnState::Complete,
            TurnStatus::Errored => TurnState::Errored,
            TurnStatus::Cancelled => TurnState::Cancelled,
        }
    }
}

/// One executed (or abandoned) tool call and its result
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub result: ExecutionResult,
}

/// Everything a turn produced
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub status: TurnStatus,
    /// Assistant text across all rounds of the turn
    pub text: String,
    pub reasoning: String,
    pub images: Vec<ImageRef>,
    pub tool_exchanges: Vec<ToolExchange>,
    /// Set when `status` is `Errored`
    pub error: Option<Error>,
    /// The model kept requesting tools past `max_tool_iterations`
    pub iteration_limit_reached: bool,
}

impl TurnOutcome {
    fn new(turn_id: String) -> Self {
        Self {
            turn_id,
            status: TurnStatus::Complete,
            text: String::new(),
            reasoning: String::new(),
            images: Vec::new(),
            tool_exchanges: Vec::new(),
            error: None,
            iteration_limit_reached: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == TurnStatus::Complete
    }

    /// Converts an errored outcome into its error
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Assistant content collected from one response stream
#[derive(Debug, Default)]
struct RoundContent {
    text: String,
    images: Vec<ImageRef>,
    calls: Vec<ToolCall>,
}

impl RoundContent {
    fn into_message(self) -> Option<(Message, Vec<ToolCall>)> {
        let mut blocks = Vec::new();
        if !self.text.is_empty() {
            blocks.push(ContentBlock::Text(TextBlock::new(self.text)));
        }
        blocks.extend(
            self.images
                .iter()
                .filter_map(|image| ImageBlock::from_url(image.url.clone()).ok())
                .map(ContentBlock::Image),
        );
        blocks.extend(
            self.calls
                .iter()
                .map(|call| ContentBlock::ToolUse(ToolUseBlock::from(call))),
        );

        (!blocks.is_empty()).then(|| (Message::assistant(blocks), self.calls))
    }
}

/// Opens a single streaming request and returns its events.
///
/// Tools in the client-side registry are advertised, but tool calls are only
/// reported, never executed.
pub async fn query(prompt: &str, options: &ChatOptions) -> Result<EventStream> {
    let transport = HttpTransport::new(options)?;
    query_with(
        &transport,
        prompt,
        options,
        client_registry().advertised_tools(),
        CancellationToken::new(),
    )
    .await
}

/// [`query()`] over any [`Transport`], with explicit tools and abort handle
pub async fn query_with(
    transport: &dyn Transport,
    prompt: &str,
    options: &ChatOptions,
    tools: Vec<Value>,
    cancel: CancellationToken,
) -> Result<EventStream> {
    let history = [Message::user(prompt)];
    let request = build_request(options, &history, tools);
    let body = open_with_retry(transport, options, &request).await?;
    Ok(event_stream(body, cancel))
}

async fn open_with_retry(
    transport: &dyn Transport,
    options: &ChatOptions,
    request: &OpenAIRequest,
) -> Result<ByteStream> {
    match options.retry() {
        Some(config) => {
            retry_with_backoff_conditional(config.clone(), || transport.open(request)).await
        }
        None => transport.open(request).await,
    }
}

fn build_request(options: &ChatOptions, history: &[Message], tools: Vec<Value>) -> OpenAIRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !options.system_prompt().is_empty() {
        messages.push(OpenAIMessage {
            role: MessageRole::System.as_str().to_string(),
            content: Some(OpenAIContent::Text(options.system_prompt().to_string())),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    let trimmed;
    let history = match options.max_history_messages() {
        Some(keep) if history.len() > keep => {
            // the current turn's user message always survives the cut
            let keep = history
                .iter()
                .rposition(|m| m.role == MessageRole::User)
                .map_or(keep, |last_user| keep.max(history.len() - last_user));
            trimmed = truncate_messages(history, keep, true);
            log::debug!("trimmed history from {} to {} messages", history.len(), trimmed.len());
            trimmed.as_slice()
        }
        _ => history,
    };
    messages.extend(history.iter().flat_map(to_openai_messages));

    OpenAIRequest {
        model: options.model().to_string(),
        messages,
        stream: true,
        max_tokens: options.max_tokens(),
        temperature: Some(options.temperature()),
        tools: (!tools.is_empty()).then_some(tools),
    }
}

/// Converts one history message to wire form. A tool message holding
/// several results becomes one wire message per result.
fn to_openai_messages(message: &Message) -> Vec<OpenAIMessage> {
    if message.role == MessageRole::Tool {
        return message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult(result) => Some(OpenAIMessage {
                    role: MessageRole::Tool.as_str().to_string(),
                    content: Some(OpenAIContent::Text(result.content.clone())),
                    tool_calls: None,
                    tool_call_id: Some(result.tool_use_id.clone()),
                }),
                _ => None,
            })
            .collect();
    }

    let mut parts = Vec::new();
    let mut has_image = false;
    let mut tool_calls = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text(text) => parts.push(OpenAIContentPart::text(&text.text)),
            ContentBlock::Image(image) if message.role == MessageRole::User => {
                has_image = true;
                parts.push(OpenAIContentPart::image_url(image.url()));
            }
            ContentBlock::Image(_) => {}
            ContentBlock::ToolUse(call) => {
                tool_calls.push(ToolCall::new(&call.id, &call.name, &call.arguments))
            }
            ContentBlock::ToolResult(_) => {
                log::warn!("ignoring tool result outside a tool message");
            }
        }
    }

    let content = if has_image {
        Some(OpenAIContent::Parts(parts))
    } else {
        let text: String = parts
            .iter()
            .filter_map(|part| match part {
                OpenAIContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!text.is_empty() || tool_calls.is_empty()).then_some(OpenAIContent::Text(text))
    };

    vec![OpenAIMessage {
        role: message.role.as_str().to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }]
}

/// Stateful conversation client running complete turns.
///
/// History, transport, tool source and message store are owned by the client;
/// all three collaborators can be swapped with the `with_*` methods.
pub struct Client {
    options: ChatOptions,
    history: Vec<Message>,
    transport: Arc<dyn Transport>,
    tools: Arc<dyn ToolExecutor>,
    store: Arc<dyn MessageStore>,
    cancel: CancellationToken,
    state: TurnState,
}

impl Client {
    /// Creates a client using HTTP, the client-side registry and no store.
    pub fn new(options: ChatOptions) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&options)?);
        Ok(Self {
            options,
            history: Vec::new(),
            transport,
            tools: client_registry(),
            store: Arc::new(NullStore),
            cancel: CancellationToken::new(),
            state: TurnState::Idle,
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = store;
        self
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut Vec<Message> {
        &mut self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Cancels the running turn. Safe to call repeatedly; with no turn
    /// running it has no effect on the next one.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// Abort handle for the running (or next) turn.
    ///
    /// A turn that starts with the token already cancelled switches to a
    /// fresh one, so a handle only reaches turns that start before it fires.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs a turn for a text prompt
    pub async fn turn(&mut self, prompt: &str) -> Result<TurnOutcome> {
        self.turn_with_blocks(vec![ContentBlock::Text(TextBlock::new(prompt))])
            .await
    }

    /// Runs a turn for arbitrary user content (text and images).
    ///
    /// Transport failures and cancellation do not produce `Err`: they end the
    /// turn with [`TurnStatus::Errored`] or [`TurnStatus::Cancelled`] and the
    /// partial assistant content stays in history and in the store. `Err` is
    /// returned only for unusable input.
    pub async fn turn_with_blocks(&mut self, content: Vec<ContentBlock>) -> Result<TurnOutcome> {
        if content.is_empty() {
            return Err(Error::invalid_input("turn content must not be empty"));
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let cancel = self.cancel.clone();

        let turn_id = uuid::Uuid::new_v4().to_string();
        log::debug!("turn {} started", turn_id);
        self.publish(LifecycleEvent::TurnStarted {
            turn_id: turn_id.clone(),
        });
        self.history.push(Message::user_with_blocks(content));

        let mut outcome = TurnOutcome::new(turn_id.clone());
        let status = self.drive(&turn_id, &cancel, &mut outcome).await;
        outcome.status = status;
        self.state = status.into();

        if let Some(error) = &outcome.error {
            self.publish(LifecycleEvent::Error {
                turn_id: turn_id.clone(),
                message: error.to_string(),
            });
        }
        self.store.finish(&turn_id, status);
        self.publish(LifecycleEvent::TurnCompleted {
            turn_id: turn_id.clone(),
            status,
        });
        log::debug!("turn {} finished: {:?}", turn_id, status);

        Ok(outcome)
    }

    async fn drive(
        &mut self,
        turn_id: &str,
        cancel: &CancellationToken,
        outcome: &mut TurnOutcome,
    ) -> TurnStatus {
        let mut tool_rounds = 0;

        loop {
            self.state = TurnState::Sending;
            if cancel.is_cancelled() {
                return TurnStatus::Cancelled;
            }

            let request = build_request(&self.options, &self.history, self.tools.advertised_tools());
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TurnStatus::Cancelled,
                opened = open_with_retry(self.transport.as_ref(), &self.options, &request) => opened,
            };
            let body = match opened {
                Ok(body) => body,
                Err(e) => {
                    log::warn!("turn {}: request failed: {}", turn_id, e);
                    outcome.error = Some(e);
                    return TurnStatus::Errored;
                }
            };

            self.state = TurnState::Streaming;
            let (round, ended) = self.consume(turn_id, event_stream(body, cancel.clone()), outcome).await;
            let Some((message, calls)) = round.into_message() else {
                return match ended {
                    StreamEnd::Done => TurnStatus::Complete,
                    StreamEnd::Cancelled => TurnStatus::Cancelled,
                    StreamEnd::Failed(e) => {
                        outcome.error = Some(e);
                        TurnStatus::Errored
                    }
                };
            };
            self.history.push(message);

            match ended {
                StreamEnd::Done => {}
                StreamEnd::Cancelled => {
                    self.abandon_calls(turn_id, &calls, "cancelled before execution", outcome);
                    return TurnStatus::Cancelled;
                }
                StreamEnd::Failed(e) => {
                    self.abandon_calls(turn_id, &calls, "response stream failed", outcome);
                    outcome.error = Some(e);
                    return TurnStatus::Errored;
                }
            }

            if calls.is_empty() {
                return TurnStatus::Complete;
            }

            if tool_rounds >= self.options.max_tool_iterations() {
                log::warn!(
                    "turn {}: tool iteration limit ({}) reached",
                    turn_id,
                    self.options.max_tool_iterations()
                );
                outcome.iteration_limit_reached = true;
                self.abandon_calls(turn_id, &calls, "tool iteration limit reached", outcome);
                return TurnStatus::Complete;
            }
            tool_rounds += 1;

            self.state = TurnState::AwaitingTools;
            let results = self.run_tools(&calls, cancel).await;
            for (call, result) in calls.iter().zip(results) {
                match result {
                    Some(result) => {
                        self.publish(LifecycleEvent::ToolInvoked {
                            turn_id: turn_id.to_string(),
                            call_id: call.id.clone(),
                            name: call.function.name.clone(),
                            success: result.is_success(),
                            timed_out: result.timed_out,
                        });
                        self.record_result(turn_id, call, result, outcome);
                    }
                    None => self.record_result(
                        turn_id,
                        call,
                        ExecutionResult::failure("cancelled before completion"),
                        outcome,
                    ),
                }
            }

            if cancel.is_cancelled() {
                return TurnStatus::Cancelled;
            }
        }
    }

    /// Reads one response stream to its end, writing content to the store as
    /// it arrives.
    async fn consume(
        &self,
        turn_id: &str,
        mut events: EventStream,
        outcome: &mut TurnOutcome,
    ) -> (RoundContent, StreamEnd) {
        let mut round = RoundContent::default();

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("turn {}: stream failed: {}", turn_id, e);
                    return (round, StreamEnd::Failed(e));
                }
            };

            self.publish(LifecycleEvent::DeltaReceived {
                turn_id: turn_id.to_string(),
                kind: event.kind().to_string(),
            });

            match event {
                StreamEvent::Text { text } => {
                    self.store.append_text(turn_id, &text);
                    outcome.text.push_str(&text);
                    round.text.push_str(&text);
                }
                StreamEvent::Reasoning { text } => {
                    self.store.append_reasoning(turn_id, &text);
                    outcome.reasoning.push_str(&text);
                }
                StreamEvent::Image(image) => {
                    self.store.push_image(turn_id, &image);
                    outcome.images.push(image.clone());
                    round.images.push(image);
                }
                StreamEvent::ToolCall { tool_call } => round.calls.push(tool_call),
                StreamEvent::Done => return (round, StreamEnd::Done),
            }
        }

        // The emitter only ends without `Done` when cancelled
        (round, StreamEnd::Cancelled)
    }

    /// Executes one round of tool calls. `None` marks a call whose result
    /// was discarded (or never started) because of cancellation.
    async fn run_tools(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<Option<ExecutionResult>> {
        if self.options.parallel_tool_calls() {
            let all = futures::future::join_all(calls.iter().map(|call| self.tools.execute_call(call)));
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => vec![None; calls.len()],
                results = all => results.into_iter().map(Some).collect(),
            };
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if cancel.is_cancelled() {
                results.push(None);
                continue;
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.tools.execute_call(call) => Some(result),
            };
            results.push(result);
        }
        results
    }

    fn record_result(
        &mut self,
        turn_id: &str,
        call: &ToolCall,
        result: ExecutionResult,
        outcome: &mut TurnOutcome,
    ) {
        let (content, is_error) = result.to_tool_content();
        let block = if is_error {
            ToolResultBlock::error(&call.id, content)
        } else {
            ToolResultBlock::new(&call.id, content)
        };
        self.history.push(Message::tool_result(block));
        self.store.record_tool_result(turn_id, call, &result);
        outcome.tool_exchanges.push(ToolExchange {
            call: call.clone(),
            result,
        });
    }

    /// Answers calls that will not run, so history never holds a tool call
    /// without a matching result.
    fn abandon_calls(
        &mut self,
        turn_id: &str,
        calls: &[ToolCall],
        reason: &str,
        outcome: &mut TurnOutcome,
    ) {
        for call in calls {
            self.record_result(turn_id, call, ExecutionResult::failure(reason), outcome);
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        self.options.notifier().publish(&event);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("history", &self.history.len())
            .field("state", &self.state)
            .finish()
    }
}

enum StreamEnd {
    Done,
    Cancelled,
    Failed(Error),
}
