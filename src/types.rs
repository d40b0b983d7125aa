//! Core types for the streaming chat core

use crate::notify::Notifier;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Options for configuring a chat client
#[derive(Clone)]
pub struct ChatOptions {
    system_prompt: String,
    model: String,
    base_url: String,
    api_key: String,
    max_tokens: Option<u32>,
    temperature: f32,
    timeout: u64,
    max_tool_iterations: u32,
    parallel_tool_calls: bool,
    max_history_messages: Option<usize>,
    retry: Option<RetryConfig>,
    notifier: Notifier,
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("parallel_tool_calls", &self.parallel_tool_calls)
            .field("max_history_messages", &self.max_history_messages)
            .field("retry", &self.retry)
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: String::new(),
            base_url: String::new(),
            api_key: "not-needed".to_string(),
            max_tokens: Some(4096),
            temperature: 0.7,
            timeout: 60,
            max_tool_iterations: 5,
            parallel_tool_calls: false,
            max_history_messages: None,
            retry: None,
            notifier: Notifier::new(),
        }
    }
}

impl ChatOptions {
    /// Create a new builder for ChatOptions
    pub fn builder() -> ChatOptionsBuilder {
        ChatOptionsBuilder::default()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// HTTP request timeout in seconds
    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    /// Upper bound on tool round-trips within one turn
    pub fn max_tool_iterations(&self) -> u32 {
        self.max_tool_iterations
    }

    /// Whether the tool calls of one round run concurrently
    pub fn parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }

    pub fn max_history_messages(&self) -> Option<usize> {
        self.max_history_messages
    }

    pub fn retry(&self) -> Option<&RetryConfig> {
        self.retry.as_ref()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

/// Builder for ChatOptions
#[derive(Default)]
pub struct ChatOptionsBuilder {
    system_prompt: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
    max_tool_iterations: Option<u32>,
    parallel_tool_calls: Option<bool>,
    max_history_messages: Option<usize>,
    retry: Option<RetryConfig>,
    notifier: Notifier,
}

impl std::fmt::Debug for ChatOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptionsBuilder")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ChatOptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_tool_iterations(mut self, iterations: u32) -> Self {
        self.max_tool_iterations = Some(iterations);
        self
    }

    pub fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = Some(parallel);
        self
    }

    pub fn max_history_messages(mut self, keep: usize) -> Self {
        self.max_history_messages = Some(keep);
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> crate::Result<ChatOptions> {
        let model = self
            .model
            .ok_or_else(|| crate::Error::config("model is required"))?;

        let base_url = self
            .base_url
            .ok_or_else(|| crate::Error::config("base_url is required"))?;

        let temperature = self.temperature.unwrap_or(0.7);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(crate::Error::config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                temperature
            )));
        }

        Ok(ChatOptions {
            system_prompt: self.system_prompt.unwrap_or_default(),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.unwrap_or_else(|| "not-needed".to_string()),
            max_tokens: self.max_tokens.or(Some(4096)),
            temperature,
            timeout: self.timeout.unwrap_or(60),
            max_tool_iterations: self.max_tool_iterations.unwrap_or(5),
            parallel_tool_calls: self.parallel_tool_calls.unwrap_or(false),
            max_history_messages: self.max_history_messages,
            retry: self.retry,
            notifier: self.notifier,
        })
    }
}

/// Message role in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// Content block types that can appear in messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

/// Text content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Image content block, always held as a URL (remote or `data:`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageBlock {
    url: String,
}

impl ImageBlock {
    /// Accepts `http(s)://` and `data:` URLs. Control characters are rejected.
    pub fn from_url(url: impl Into<String>) -> crate::Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(crate::Error::invalid_input("image URL is empty"));
        }
        if url.chars().any(|c| c.is_control()) {
            return Err(crate::Error::invalid_input(
                "image URL contains a control character",
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:"))
        {
            return Err(crate::Error::invalid_input(format!(
                "unsupported image URL scheme: {}",
                url.split(':').next().unwrap_or_default()
            )));
        }
        Ok(Self { url })
    }

    /// Wraps raw base64 data in a `data:` URL.
    pub fn from_base64(data: &str, mime_type: &str) -> crate::Result<Self> {
        Ok(Self {
            url: data_url(mime_type, data)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Builds `data:<mime>;base64,<data>` after checking the MIME type cannot break
/// out of the URL header.
pub(crate) fn data_url(mime_type: &str, data: &str) -> crate::Result<String> {
    let mime_ok = mime_type.starts_with("image/")
        && mime_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '+' | '-' | '.'));
    if !mime_ok {
        return Err(crate::Error::invalid_input(format!(
            "invalid image MIME type: {:?}",
            mime_type
        )));
    }
    if data.is_empty() {
        return Err(crate::Error::invalid_input("image data is empty"));
    }
    Ok(format!("data:{};base64,{}", mime_type, data))
}

/// An assistant request to run a tool, as kept in history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text exactly as the model produced it
    pub arguments: String,
}

impl From<&ToolCall> for ToolUseBlock {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }
    }
}

/// Tool result block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::Text(TextBlock::new(text))],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: vec![ContentBlock::Text(TextBlock::new(text))],
        }
    }

    /// Create a user message with custom content blocks
    pub fn user_with_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }

    pub fn tool_result(result: ToolResultBlock) -> Self {
        Self {
            role: MessageRole::Tool,
            content: vec![ContentBlock::ToolResult(result)],
        }
    }
}

/// A finalized tool call, in the exact shape the chat-completions API uses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function half of a [`ToolCall`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A normalized image reference from the stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub url: String,
    /// `Some(false)` marks a progressive preview that a later `final` image replaces
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    /// Distinguishes images generated in parallel within one response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// One typed event of a streaming response.
///
/// Text, reasoning and image events arrive in wire order. Tool calls are held
/// back until the model signals it has finished requesting them, then appear in
/// ascending index order. Every completed stream ends with exactly one `Done`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text { text: String },
    Image(ImageRef),
    Reasoning { text: String },
    ToolCall { tool_call: ToolCall },
    Done,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        StreamEvent::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        StreamEvent::Reasoning { text: text.into() }
    }

    /// Short name used in logs and lifecycle notifications
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Text { .. } => "text",
            StreamEvent::Image(_) => "image",
            StreamEvent::Reasoning { .. } => "reasoning",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::Done => "done",
        }
    }
}

/// OpenAI API message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAIContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Message content: a plain string, or typed parts when images are attached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

impl OpenAIContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        OpenAIContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        OpenAIContentPart::ImageUrl {
            image_url: OpenAIImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIImageUrl {
    pub url: String,
}

/// OpenAI API request
#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_options_builder() {
        let options = ChatOptions::builder()
            .system_prompt("Test prompt")
            .model("test-model")
            .base_url("http://localhost:1234/v1/")
            .api_key("test-key")
            .max_tokens(1000)
            .temperature(0.5)
            .timeout(30)
            .max_tool_iterations(10)
            .parallel_tool_calls(true)
            .max_history_messages(20)
            .build()
            .unwrap();

        assert_eq!(options.system_prompt(), "Test prompt");
        assert_eq!(options.model(), "test-model");
        assert_eq!(options.base_url(), "http://localhost:1234/v1");
        assert_eq!(options.api_key(), "test-key");
        assert_eq!(options.max_tokens(), Some(1000));
        assert_eq!(options.temperature(), 0.5);
        assert_eq!(options.timeout(), 30);
        assert_eq!(options.max_tool_iterations(), 10);
        assert!(options.parallel_tool_calls());
        assert_eq!(options.max_history_messages(), Some(20));
    }

    #[test]
    fn test_chat_options_builder_defaults() {
        let options = ChatOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        assert_eq!(options.system_prompt(), "");
        assert_eq!(options.api_key(), "not-needed");
        assert_eq!(options.max_tokens(), Some(4096));
        assert_eq!(options.temperature(), 0.7);
        assert_eq!(options.timeout(), 60);
        assert_eq!(options.max_tool_iterations(), 5);
        assert!(!options.parallel_tool_calls());
        assert!(options.retry().is_none());
    }

    #[test]
    fn test_chat_options_builder_missing_required() {
        let result = ChatOptions::builder()
            .base_url("http://localhost:1234/v1")
            .build();
        assert!(result.is_err());

        let result = ChatOptions::builder().model("test-model").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_options_rejects_temperature_out_of_range() {
        let result = ChatOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .temperature(3.5)
            .build();
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let options = ChatOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .api_key("sk-secret")
            .build()
            .unwrap();
        let debug = format!("{:?}", options);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_stream_event_wire_shape() {
        let event = StreamEvent::ToolCall {
            tool_call: ToolCall::new("call_1", "get_weather", r#"{"city":"NYC"}"#),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["tool_call"]["id"], "call_1");
        assert_eq!(json["tool_call"]["type"], "function");
        assert_eq!(json["tool_call"]["function"]["name"], "get_weather");
        assert_eq!(json["tool_call"]["function"]["arguments"], r#"{"city":"NYC"}"#);

        let image = StreamEvent::Image(ImageRef {
            url: "https://example.com/a.png".to_string(),
            is_final: Some(true),
            index: None,
        });
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["final"], true);
        assert!(json.get("index").is_none());

        assert_eq!(
            serde_json::to_value(&StreamEvent::Done).unwrap(),
            serde_json::json!({"type": "done"})
        );
    }

    #[test]
    fn test_image_block_validation() {
        assert!(ImageBlock::from_url("https://example.com/cat.jpg").is_ok());
        assert!(ImageBlock::from_url("data:image/png;base64,AAAA").is_ok());
        assert!(ImageBlock::from_url("ftp://example.com/cat.jpg").is_err());
        assert!(ImageBlock::from_url("https://example.com\n/cat.jpg").is_err());
        assert!(ImageBlock::from_url("").is_err());

        let block = ImageBlock::from_base64("AAAA", "image/png").unwrap();
        assert_eq!(block.url(), "data:image/png;base64,AAAA");
        assert!(ImageBlock::from_base64("AAAA", "image/png;charset=utf-8").is_err());
        assert!(ImageBlock::from_base64("AAAA", "text/plain").is_err());
    }

    #[test]
    fn test_message_role_serialization() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&MessageRole::Tool).unwrap(), "\"tool\"");
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_openai_request_serialization() {
        let request = OpenAIRequest {
            model: "gpt-3.5".to_string(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: Some(OpenAIContent::Parts(vec![
                    OpenAIContentPart::text("What is this?"),
                    OpenAIContentPart::image_url("https://example.com/a.png"),
                ])),
                tool_calls: None,
                tool_call_id: None,
            }],
            stream: true,
            max_tokens: Some(100),
            temperature: Some(0.7),
            tools: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "https://example.com/a.png"
        );
        assert!(json.get("tools").is_none());
    }
}
