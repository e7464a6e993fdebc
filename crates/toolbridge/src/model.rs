//! Chat model client.
//!
//! The conversation layer talks to a model through [`ChatModel`]. The
//! production implementation, [`HttpChatModel`], POSTs
//! `{model, messages, stream: true}` to a local endpoint and assembles the
//! line-delimited token stream into one reply. Several line shapes are
//! accepted so the same client works against Ollama's chat API, a generate
//! style bridge, or an OpenAI-compatible server-sent event stream.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Who authored a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions for the model
    System,
    /// The human
    User,
    /// The model
    Assistant,
}

/// One message in a chat exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: ChatRole,
    /// Text
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Errors from the model endpoint.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request failed or timed out
    #[error("model request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// The endpoint answered with a non-success status
    #[error("model endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },
    /// The endpoint reported an error inside the stream
    #[error("model reported an error: {0}")]
    Remote(String),
    /// A stream line was not understood
    #[error("could not decode model output line: {0}")]
    Decode(String),
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the assistant's complete reply to `messages`.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// [`ChatModel`] backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatModel {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpChatModel {
    /// Build a client for `model` at `url`, bounding each request by `timeout`.
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ModelError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
        })
    }

    /// Model name sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        tracing::debug!(
            url = %self.url,
            model = %self.model,
            messages = messages.len(),
            "sending chat request"
        );
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(ModelError::Request)?;

        let status = response.status();
        let body = response.text().await.map_err(ModelError::Request)?;
        if !status.is_success() {
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply = collect_reply(&body)?;
        tracing::debug!(chars = reply.len(), "model replied");
        Ok(reply)
    }
}

const MAX_ERROR_BODY: usize = 512;

/// One decoded line of a model stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// A piece of reply text
    Token(String),
    /// End of stream marker
    Done,
    /// A line carrying no text (keep-alives, comments, metadata)
    Skip,
}

/// Decode one line of a model stream.
pub fn parse_stream_line(line: &str) -> Result<StreamChunk, ModelError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
        return Ok(StreamChunk::Skip);
    }

    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload == "[DONE]" {
        return Ok(StreamChunk::Done);
    }

    let value: Value =
        serde_json::from_str(payload).map_err(|_| ModelError::Decode(payload.to_string()))?;

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .as_str()
            .map(str::to_string)
            .or_else(|| error.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| error.to_string());
        return Err(ModelError::Remote(message));
    }

    let token = value
        .pointer("/message/content")
        .or_else(|| value.get("response"))
        .or_else(|| value.pointer("/choices/0/delta/content"))
        .or_else(|| value.pointer("/choices/0/message/content"))
        .or_else(|| value.get("content"))
        .and_then(Value::as_str);

    Ok(match token {
        Some(text) => StreamChunk::Token(text.to_string()),
        None => StreamChunk::Skip,
    })
}

/// Assemble a complete reply from a streamed response body.
pub fn collect_reply(body: &str) -> Result<String, ModelError> {
    let mut reply = String::new();
    for line in body.lines() {
        match parse_stream_line(line) {
            Ok(StreamChunk::Token(text)) => reply.push_str(&text),
            Ok(StreamChunk::Skip) => {}
            Ok(StreamChunk::Done) => break,
            Err(ModelError::Decode(_)) if !body.trim_start().starts_with("data:") => {
                // A pretty-printed, non-streamed body spans several lines.
                return match parse_stream_line(&body.replace(['\n', '\r'], " "))? {
                    StreamChunk::Token(text) => Ok(text),
                    _ => Ok(String::new()),
                };
            }
            Err(e) => return Err(e),
        }
    }
    Ok(reply)
}
