//! Shared helpers: SSE line builders and a transport that replays scripted
//! responses instead of talking to a server.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use streamchat::{ByteStream, ChatOptions, Error, OpenAIRequest, Result, Transport};

pub const DONE: &str = "data: [DONE]\n\n";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn options() -> ChatOptions {
    ChatOptions::builder()
        .model("test-model")
        .base_url("http://localhost:1234/v1")
        .build()
        .unwrap()
}

pub fn sse(delta: Value, finish_reason: Option<&str>) -> String {
    let chunk = json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
    });
    format!("data: {}\n\n", chunk)
}

pub fn text(content: &str) -> String {
    sse(json!({"content": content}), None)
}

pub fn reasoning(content: &str) -> String {
    sse(json!({"reasoning_content": content}), None)
}

pub fn finish(reason: &str) -> String {
    sse(json!({}), Some(reason))
}

/// First fragment of a tool call: carries id and name
pub fn tool_start(index: usize, id: &str, name: &str, arguments: &str) -> String {
    sse(
        json!({"tool_calls": [{
            "index": index,
            "id": id,
            "type": "function",
            "function": {"name": name, "arguments": arguments}
        }]}),
        None,
    )
}

/// Continuation fragment: arguments only
pub fn tool_args(index: usize, arguments: &str) -> String {
    sse(
        json!({"tool_calls": [{"index": index, "function": {"arguments": arguments}}]}),
        None,
    )
}

/// A complete response that requests one tool call
pub fn tool_call_response(id: &str, name: &str, arguments: &str) -> Vec<String> {
    vec![
        tool_start(0, id, name, arguments),
        finish("tool_calls"),
        DONE.to_string(),
    ]
}

/// A complete plain-text response
pub fn text_response(content: &str) -> Vec<String> {
    vec![text(content), finish("stop"), DONE.to_string()]
}

/// What one call to [`ScriptedTransport::open`] produces
pub enum Script {
    /// Serve these chunks, then end the body
    Chunks(Vec<String>),
    /// Serve these chunks, then fail with a transport error
    ChunksThenFail(Vec<String>, String),
    /// Serve these chunks, then never produce another byte
    ChunksThenHang(Vec<String>),
    /// Reject the request with this API error message
    Refuse(String),
}

/// Replays scripts in order and records every request it was given
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<OpenAIRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<OpenAIRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn chunk_stream(chunks: Vec<String>) -> stream::Iter<std::vec::IntoIter<Result<Vec<u8>>>> {
    let items: Vec<Result<Vec<u8>>> = chunks.into_iter().map(|c| Ok(c.into_bytes())).collect();
    stream::iter(items)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &OpenAIRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted response left");

        let body: ByteStream = match script {
            Script::Chunks(chunks) => Box::pin(chunk_stream(chunks)),
            Script::ChunksThenFail(chunks, message) => Box::pin(
                chunk_stream(chunks).chain(stream::once(async move { Err(Error::transport(message)) })),
            ),
            Script::ChunksThenHang(chunks) => {
                Box::pin(chunk_stream(chunks).chain(stream::pending()))
            }
            Script::Refuse(message) => return Err(Error::api(message)),
        };
        Ok(body)
    }
}
