//! The agent event stream.
//!
//! Everything observable during a run is an [`AgentEvent`]: the loop writes
//! them into an [`EventSink`], consumers read the other end. There is no
//! other channel of observability.
//!
//! Ordering within a run:
//! `RunStart` → (`StepStart` → message events → `StepEnd` → tool events)* →
//! `RunEnd` | `RunError`.
//!
//! A nested run's events show up in its parent's stream wrapped in
//! [`AgentEvent::Forwarded`], interleaved with the parent's own tool events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{Message, ToolCall, ToolResult};
use crate::provider::ChatResponse;

/// Why a run stopped. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model answered without tool calls.
    Complete,
    /// The step limit was reached.
    MaxSteps,
    /// The run or step deadline elapsed.
    Timeout,
    /// The caller cancelled the run.
    Cancelled,
    /// The caller's stop predicate fired.
    Custom,
    /// Every backend call of a step was denied.
    Rejected,
    /// The model called a client tool; the caller must execute it.
    ClientToolCall,
    /// The chat client failed.
    Error,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::MaxSteps => "max_steps",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Custom => "custom",
            Self::Rejected => "rejected",
            Self::ClientToolCall => "client_tool_call",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The run began. Always the first event.
    RunStart,

    /// The chat client failed; terminal.
    RunError { step: usize, error: String },

    /// A step is about to call the model.
    StepStart { step: usize },

    /// The model's response for this step is complete.
    StepEnd { step: usize, response: ChatResponse },

    MessageStart { step: usize, message_id: String },

    MessageDelta {
        step: usize,
        message_id: String,
        delta: String,
    },

    MessageEnd { step: usize, message_id: String },

    ToolCallStart { step: usize, call: ToolCall },

    ToolCallArgs {
        step: usize,
        call_id: String,
        arguments: String,
    },

    ToolCallApproved { step: usize, call_id: String },

    ToolCallRejected {
        step: usize,
        call_id: String,
        reason: String,
    },

    ToolCallExecuting { step: usize, call_id: String },

    ToolCallEnd { step: usize, call_id: String },

    ToolCallResult { step: usize, result: ToolResult },

    /// The run stopped for a non-error reason; terminal.
    RunEnd {
        step: usize,
        termination: Termination,
        /// The last model response, if any step completed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Message>,
        /// Client tool calls the caller must resolve
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pending_client_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// An event of a nested run, tagged with that run's ID.
    Forwarded {
        source: String,
        event: Box<AgentEvent>,
    },
}

impl AgentEvent {
    /// The step this event belongs to (0 for `RunStart`).
    ///
    /// For a forwarded event this is the nested run's step.
    pub fn step(&self) -> usize {
        match self {
            Self::RunStart => 0,
            Self::Forwarded { event, .. } => event.step(),
            Self::RunError { step, .. }
            | Self::StepStart { step }
            | Self::StepEnd { step, .. }
            | Self::MessageStart { step, .. }
            | Self::MessageDelta { step, .. }
            | Self::MessageEnd { step, .. }
            | Self::ToolCallStart { step, .. }
            | Self::ToolCallArgs { step, .. }
            | Self::ToolCallApproved { step, .. }
            | Self::ToolCallRejected { step, .. }
            | Self::ToolCallExecuting { step, .. }
            | Self::ToolCallEnd { step, .. }
            | Self::ToolCallResult { step, .. }
            | Self::RunEnd { step, .. } => *step,
        }
    }

    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::RunError { .. } => "run_error",
            Self::StepStart { .. } => "step_start",
            Self::StepEnd { .. } => "step_end",
            Self::MessageStart { .. } => "message_start",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallArgs { .. } => "tool_call_args",
            Self::ToolCallApproved { .. } => "tool_call_approved",
            Self::ToolCallRejected { .. } => "tool_call_rejected",
            Self::ToolCallExecuting { .. } => "tool_call_executing",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::RunEnd { .. } => "run_end",
            Self::Forwarded { .. } => "forwarded",
        }
    }

    /// Whether this event ends the stream it was emitted on. A nested run's
    /// end, seen in the parent stream, does not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunEnd { .. } | Self::RunError { .. })
    }
}

/// The write end of an event stream.
///
/// Passed explicitly wherever events must flow. Tools receive their run's
/// sink, so a nested agent can forward into the parent's stream with
/// [`EventSink::forwarding_to`].
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    upstream: Option<Arc<Upstream>>,
}

#[derive(Debug)]
struct Upstream {
    source: String,
    sink: EventSink,
}

impl EventSink {
    /// Create a sink and the receiver that reads from it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, upstream: None }, rx)
    }

    /// Also deliver every event to `parent`, wrapped as
    /// [`AgentEvent::Forwarded`] under `source`.
    ///
    /// If `parent` forwards too, the event keeps travelling up, wrapped once
    /// per level.
    pub fn forwarding_to(mut self, source: impl Into<String>, parent: EventSink) -> Self {
        self.upstream = Some(Arc::new(Upstream {
            source: source.into(),
            sink: parent,
        }));
        self
    }

    /// Deliver an event, to the parents first and then to this sink's own
    /// reader. Returns `false` when the own reader has gone away; the run
    /// carries on regardless.
    pub async fn emit(&self, event: AgentEvent) -> bool {
        let mut wrapped = event.clone();
        let mut link = self.upstream.as_deref();
        while let Some(upstream) = link {
            wrapped = AgentEvent::Forwarded {
                source: upstream.source.clone(),
                event: Box::new(wrapped),
            };
            if !upstream.sink.is_closed() {
                upstream.sink.send(wrapped.clone()).await;
            }
            link = upstream.sink.upstream.as_deref();
        }
        self.send(event).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, event: AgentEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(err) => {
                debug!(event = err.0.event_type(), "Event reader dropped");
                false
            }
        }
    }
}
