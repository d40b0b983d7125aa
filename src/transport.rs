//! The seam between the turn loop and the network.
//!
//! [`Transport::open`] sends one streaming chat-completions request and hands
//! back the raw response body. Everything after that (line splitting, parsing,
//! tool-call reassembly) happens in [`event_stream`](crate::event_stream), so a
//! transport never needs to understand SSE.

use crate::stream::ByteStream;
use crate::types::{ChatOptions, OpenAIRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::time::Duration;

/// Opens a streaming response for a chat-completions request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the body once the response headers say it
    /// succeeded.
    ///
    /// # Errors
    ///
    /// [`Error::Api`] for a non-success status, [`Error::Timeout`] when the
    /// response does not start in time, [`Error::Http`] for connection failures.
    async fn open(&self, request: &OpenAIRequest) -> Result<ByteStream>;
}

/// `POST {base_url}/chat/completions` over reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    response_timeout: Duration,
}

impl HttpTransport {
    /// Builds a transport from the endpoint settings in `options`.
    ///
    /// The configured timeout bounds connecting and waiting for the response
    /// headers. It does not bound how long the body may keep streaming.
    pub fn new(options: &ChatOptions) -> Result<Self> {
        let response_timeout = Duration::from_secs(options.timeout());
        let client = reqwest::Client::builder()
            .connect_timeout(response_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: options.base_url().to_string(),
            api_key: options.api_key().to_string(),
            response_timeout,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &OpenAIRequest) -> Result<ByteStream> {
        let url = self.endpoint();
        log::debug!(
            "POST {} (model {}, {} messages)",
            url,
            request.model,
            request.messages.len()
        );

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(request)
            .send();

        let response = tokio::time::timeout(self.response_timeout, send)
            .await
            .map_err(|_| Error::timeout())?
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|e| {
                log::warn!("failed to read error response body: {}", e);
                "Unknown error (failed to read response body)".to_string()
            });
            return Err(Error::api(format!("API error {}: {}", status, body)));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| Error::transport(e.to_string()))
        });
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_options() {
        let options = ChatOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1/")
            .build()
            .unwrap();
        let transport = HttpTransport::new(&options).unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:1234/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let options = ChatOptions::builder()
            .model("m")
            .base_url("http://127.0.0.1:9/v1")
            .timeout(2)
            .build()
            .unwrap();
        let transport = HttpTransport::new(&options).unwrap();
        let request = OpenAIRequest {
            model: "m".to_string(),
            messages: Vec::new(),
            stream: true,
            max_tokens: None,
            temperature: None,
            tools: None,
        };

        let err = match transport.open(&request).await {
            Ok(_) => panic!("expected connection failure"),
            Err(e) => e,
        };
        assert!(err.is_transport());
    }
}
