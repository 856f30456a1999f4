//! Run outcome and agent-level errors.

use serde::{Deserialize, Serialize};
use stepwise_core::error::ProviderError;
use stepwise_core::event::Termination;
use stepwise_core::message::{Message, ToolCall};
use stepwise_core::provider::Usage;

/// The outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// The last model response, if any step completed
    pub response: Option<Message>,

    /// Full history: the caller's messages plus everything the run appended
    pub messages: Vec<Message>,

    /// Number of steps started
    pub steps: usize,

    pub termination: Termination,

    /// Summed over all steps
    pub usage: Usage,

    /// Set only for [`Termination::Error`]
    pub error: Option<String>,

    /// Client tool calls the caller must execute (ClientToolCall only)
    pub pending_client_calls: Vec<ToolCall>,
}

impl RunResult {
    /// Text of the final response, empty if there is none.
    pub fn content(&self) -> &str {
        self.response.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Chat stream ended unexpectedly: {0}")]
    Stream(String),

    #[error("Event stream closed before the run ended")]
    EventStreamClosed,

    /// The run terminated with an error; the partial result is kept.
    #[error("Run failed: {error}")]
    RunFailed {
        error: String,
        result: Box<RunResult>,
    },
}
