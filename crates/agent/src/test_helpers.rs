//! Shared test helpers for loop and processor tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stepwise_core::error::{ProviderError, ToolError};
use stepwise_core::event::AgentEvent;
use stepwise_core::message::{Message, ToolCall};
use stepwise_core::provider::{ChatClient, ChatRequest, ChatResponse, ChatStreamEvent, Usage};
use stepwise_core::tool::{Tool, ToolContext, ToolRegistry};
use tokio::sync::mpsc;

/// One scripted model turn.
pub enum Script {
    /// Streamed as start, delta (if any text), end
    Reply(ChatResponse),
    /// `chat_stream` itself fails
    Fail(ProviderError),
    /// These exact stream events, then the stream closes
    Raw(Vec<ChatStreamEvent>),
    /// The stream stays open and never yields
    Stall,
    /// Wait, then reply
    Delayed(Duration, ChatResponse),
}

/// A mock chat client that plays a script of turns in order.
///
/// Panics if more calls are made than turns scripted, unless built with
/// [`ScriptedClient::repeating`].
pub struct ScriptedClient {
    script: Mutex<VecDeque<Script>>,
    repeat: Option<ChatResponse>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
    // Keeps stalled streams open.
    stalled: Mutex<Vec<mpsc::Sender<ChatStreamEvent>>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Script::Reply).collect())
    }

    pub fn scripted(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            stalled: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same response.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::scripted(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_turn(&self, request: ChatRequest) -> Script {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(turn) = self.script.lock().unwrap().pop_front() {
            return turn;
        }
        match &self.repeat {
            Some(response) => Script::Reply(response.clone()),
            None => panic!("ScriptedClient: no more turns (call #{call})"),
        }
    }
}

fn reply_events(response: ChatResponse) -> Vec<ChatStreamEvent> {
    let mut events = vec![ChatStreamEvent::MessageStart];
    if !response.message.content.is_empty() {
        events.push(ChatStreamEvent::MessageDelta {
            delta: response.message.content.clone(),
        });
    }
    events.push(ChatStreamEvent::MessageEnd { response });
    events
}

fn replay(events: Vec<ChatStreamEvent>) -> mpsc::Receiver<ChatStreamEvent> {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        tx.try_send(event).unwrap();
    }
    rx
}

#[async_trait]
impl ChatClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        match self.next_turn(request) {
            Script::Reply(response) => Ok(response),
            Script::Fail(e) => Err(e),
            _ => panic!("ScriptedClient: turn can only be streamed"),
        }
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>, ProviderError> {
        match self.next_turn(request) {
            Script::Reply(response) => Ok(replay(reply_events(response))),
            Script::Fail(e) => Err(e),
            Script::Raw(events) => Ok(replay(events)),
            Script::Stall => {
                let (tx, rx) = mpsc::channel(1);
                self.stalled.lock().unwrap().push(tx);
                Ok(rx)
            }
            Script::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(replay(reply_events(response)))
            }
        }
    }
}

/// Create a simple text response (no tool calls).
pub fn text_response(text: &str) -> ChatResponse {
    ChatResponse {
        message: Message::assistant(text),
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
    }
}

/// Create a response that only calls tools.
pub fn tool_response(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        message: Message::assistant_with_tools("", calls),
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
    }
}

/// How a [`StaticTool`] answers.
enum Behavior {
    Output(Result<String, String>),
    CallId,
    Panic,
}

/// A tool that answers with fixed text, optionally after a delay.
pub struct StaticTool {
    name: String,
    behavior: Behavior,
    delay: Option<Duration>,
    invocations: Arc<AtomicUsize>,
}

impl StaticTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.into(),
            behavior: Behavior::Output(Ok(output.into())),
            delay: None,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A tool whose handler always fails with `reason`.
    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            behavior: Behavior::Output(Err(reason.into())),
            ..Self::new(name, "")
        }
    }

    /// A tool whose handler panics.
    pub fn panicking(name: &str) -> Self {
        Self {
            behavior: Behavior::Panic,
            ..Self::new(name, "")
        }
    }

    /// Answer with the ID of the call being executed.
    pub fn echoing_call_id(mut self) -> Self {
        self.behavior = Behavior::CallId;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Counter of handler invocations, shared with the tool.
    pub fn invocations(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed answer"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled(self.name.clone())),
            }
        }
        match &self.behavior {
            Behavior::Output(output) => {
                output
                    .clone()
                    .map_err(|reason| ToolError::ExecutionFailed {
                        tool_name: self.name.clone(),
                        reason,
                    })
            }
            Behavior::CallId => Ok(ctx.call_id.clone()),
            Behavior::Panic => panic!("{} exploded", self.name),
        }
    }
}

pub fn registry(tools: Vec<StaticTool>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(Box::new(tool));
    }
    Arc::new(registry)
}

/// Drain a raw event receiver until every sender is gone.
pub async fn collect_events(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
