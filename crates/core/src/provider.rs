//! Chat client trait: the abstraction over LLM backends.
//!
//! A chat client knows how to send a conversation to a model and get the
//! assistant's answer back, either as a complete message or as a stream of
//! start/delta/end events.
//!
//! Concrete HTTP clients live outside this workspace; the agent loop only
//! ever sees `Arc<dyn ChatClient>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolDefinition;

/// Pass-through options for the chat client. The loop never interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// The model to use (e.g., "gpt-4o")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// One model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The conversation so far
    pub messages: Vec<Message>,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default)]
    pub options: ChatOptions,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// A complete response from the chat client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated assistant message (may carry tool calls)
    pub message: Message,

    /// Token usage for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

/// One item of a streaming response.
#[derive(Debug, Clone)]
pub enum ChatStreamEvent {
    /// The assistant message begins.
    MessageStart,
    /// A partial text token.
    MessageDelta { delta: String },
    /// The message is complete; carries the final response and usage.
    MessageEnd { response: ChatResponse },
    /// The stream failed. Fatal for the run.
    Error(ProviderError),
}

/// The core chat client trait.
///
/// The agent loop calls `chat_stream()` without knowing which backend is
/// behind it.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Send a request and get a stream of response events.
    ///
    /// Default implementation calls `complete()` and replays the result as
    /// start, one delta, and end.
    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.send(ChatStreamEvent::MessageStart).await;
        if !response.message.content.is_empty() {
            let _ = tx
                .send(ChatStreamEvent::MessageDelta {
                    delta: response.message.content.clone(),
                })
                .await;
        }
        let _ = tx.send(ChatStreamEvent::MessageEnd { response }).await;
        Ok(rx)
    }
}
