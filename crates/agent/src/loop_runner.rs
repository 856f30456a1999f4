//! The agent loop: call the model, run its tool calls, repeat until a
//! termination condition holds.
//!
//! Each run lives on its own task and owns the write end of its event
//! stream. History is grown through a [`HistoryLedger`] at the same points
//! the [`HistoryReconstructor`] commits, so [`AgentLoop::run`] can rebuild
//! the result from events alone.

use std::sync::Arc;

use stepwise_core::event::{AgentEvent, EventSink, Termination};
use stepwise_core::message::{Message, ToolCall};
use stepwise_core::provider::{ChatClient, ChatRequest, ChatResponse, ChatStreamEvent, Usage};
use stepwise_core::tool::{ToolDefinition, ToolRegistry};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::history::{HistoryLedger, HistoryReconstructor};
use crate::options::{Options, StopContext};
use crate::result::{AgentError, RunResult};
use crate::scope::{Interrupt, Scope};
use crate::stream::EventStream;
use crate::tool_processor::ToolCallProcessor;

/// Drives a chat client and a tool registry through multi-step runs.
///
/// Cheap to share: every run clones the `Arc`s it needs onto its own task.
pub struct AgentLoop {
    client: Arc<dyn ChatClient>,
    tools: Arc<ToolRegistry>,
    options: Options,
}

/// A run in progress.
///
/// `events` must be drained for the run to make progress once the event
/// buffer is full; `outcome` resolves to the loop's own view of the result.
#[derive(Debug)]
pub struct RunHandle {
    pub events: EventStream,
    pub outcome: JoinHandle<RunResult>,
}

impl AgentLoop {
    pub fn new(client: Arc<dyn ChatClient>, tools: Arc<ToolRegistry>, options: Options) -> Self {
        Self {
            client,
            tools,
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Start a run on a new task.
    ///
    /// With `forward_to` set, the parent sees every event wrapped in
    /// [`AgentEvent::Forwarded`] with this run's ID as the source.
    pub fn spawn(&self, messages: Vec<Message>, cancel: CancellationToken) -> RunHandle {
        let run_id = Uuid::new_v4();
        let (sink, rx) = EventSink::channel(self.options.event_buffer.max(1));
        let events = match &self.options.forward_to {
            Some(parent) => sink.forwarding_to(run_id.to_string(), parent.clone()),
            None => sink,
        };
        let run = Run {
            run_id,
            client: self.client.clone(),
            tools: self.tools.clone(),
            options: self.options.clone(),
            events,
        };
        RunHandle {
            events: EventStream::new(rx),
            outcome: tokio::spawn(run.drive(messages, cancel)),
        }
    }

    /// Start a run and return only its events.
    pub fn run_stream(&self, messages: Vec<Message>, cancel: CancellationToken) -> EventStream {
        self.spawn(messages, cancel).events
    }

    /// Run to completion and rebuild the result from the event stream.
    ///
    /// Timeout, cancellation and the other non-error terminations are `Ok`;
    /// only an Error termination becomes [`AgentError::RunFailed`].
    pub async fn run(
        &self,
        messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> Result<RunResult, AgentError> {
        let mut events = self.run_stream(messages.clone(), cancel);
        let mut history = HistoryReconstructor::new(messages);
        while let Some(event) = events.recv().await {
            history.apply(&event);
            if history.is_finished() {
                break;
            }
        }

        let result = history.finish()?;
        if result.termination == Termination::Error {
            return Err(AgentError::RunFailed {
                error: result.error.clone().unwrap_or_default(),
                result: Box::new(result),
            });
        }
        Ok(result)
    }
}

/// Everything one run needs, moved onto its task.
struct Run {
    run_id: Uuid,
    client: Arc<dyn ChatClient>,
    tools: Arc<ToolRegistry>,
    options: Options,
    events: EventSink,
}

/// Mutable bookkeeping of a run in progress.
struct RunState {
    ledger: HistoryLedger,
    step: usize,
    usage: Usage,
    last_response: Option<Message>,
}

impl Run {
    async fn drive(self, messages: Vec<Message>, cancel: CancellationToken) -> RunResult {
        let mut state = RunState {
            ledger: HistoryLedger::new(messages),
            step: 0,
            usage: Usage::default(),
            last_response: None,
        };
        let scope = Scope::new(cancel, self.options.timeout);
        let definitions = self.tools.definitions();

        info!(
            run_id = %self.run_id,
            messages = state.ledger.messages().len(),
            tools = definitions.len(),
            max_steps = self.options.max_steps,
            "Agent run started"
        );
        self.events.emit(AgentEvent::RunStart).await;

        loop {
            if let Some(interrupt) = scope.interrupted() {
                return self.end_interrupted(state, interrupt).await;
            }
            if self.options.max_steps > 0 && state.step >= self.options.max_steps {
                let message = format!("Reached the maximum of {} steps", self.options.max_steps);
                return self
                    .end(state, Termination::MaxSteps, Vec::new(), Some(message))
                    .await;
            }

            state.step += 1;
            let step = state.step;
            state.ledger.commit();
            self.events.emit(AgentEvent::StepStart { step }).await;
            debug!(run_id = %self.run_id, step, "Step started");

            let step_scope = scope.child(self.options.step_timeout);
            let request = self.request(&state, &definitions);
            let response = match step_scope.run(self.call_model(step, request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return self.fail(state, e).await,
                Err(interrupt) => return self.end_interrupted(state, interrupt).await,
            };

            if let Some(usage) = response.usage {
                state.usage += usage;
            }
            state.last_response = Some(response.message.clone());
            self.events
                .emit(AgentEvent::StepEnd {
                    step,
                    response: response.clone(),
                })
                .await;
            state.ledger.stage_response(response.message.clone());

            if let Some(stop) = &self.options.stop_when {
                let ctx = StopContext {
                    step,
                    response: &response,
                    messages: state.ledger.messages(),
                };
                if stop(&ctx) {
                    let message = Some("Stop condition met".to_string());
                    return self.end(state, Termination::Custom, Vec::new(), message).await;
                }
            }

            if !response.message.has_tool_calls() {
                return self.end(state, Termination::Complete, Vec::new(), None).await;
            }

            debug!(
                run_id = %self.run_id,
                step,
                tool_calls = response.message.tool_calls.len(),
                "Processing tool calls"
            );
            let processed = ToolCallProcessor {
                tools: &self.tools,
                options: &self.options,
                events: &self.events,
                scope: &step_scope,
                step,
            }
            .process(&response.message.tool_calls)
            .await;
            for result in processed.results {
                state.ledger.stage_result(result);
            }

            if let Some(interrupt) = step_scope.interrupted() {
                return self.end_interrupted(state, interrupt).await;
            }
            if processed.has_client_tools {
                let message = format!(
                    "Waiting on {} client tool call(s)",
                    processed.client_calls.len()
                );
                return self
                    .end(
                        state,
                        Termination::ClientToolCall,
                        processed.client_calls,
                        Some(message),
                    )
                    .await;
            }
            if processed.all_rejected {
                let message = Some("All tool calls were rejected".to_string());
                return self.end(state, Termination::Rejected, Vec::new(), message).await;
            }
        }
    }

    fn request(&self, state: &RunState, definitions: &[ToolDefinition]) -> ChatRequest {
        ChatRequest {
            messages: state.ledger.messages().to_vec(),
            tools: definitions.to_vec(),
            options: self.options.chat.clone(),
        }
    }

    /// Stream one model response, re-emitting it under a step-scoped ID.
    async fn call_model(&self, step: usize, request: ChatRequest) -> Result<ChatResponse, AgentError> {
        let mut stream = self.client.chat_stream(request).await?;
        let message_id = format!("step-{step}-{}", Uuid::new_v4());
        let mut started = false;
        let mut streamed = String::new();

        while let Some(event) = stream.recv().await {
            match event {
                ChatStreamEvent::MessageStart => {
                    self.start_message(step, &message_id, &mut started).await;
                }
                ChatStreamEvent::MessageDelta { delta } => {
                    self.start_message(step, &message_id, &mut started).await;
                    streamed.push_str(&delta);
                    self.events
                        .emit(AgentEvent::MessageDelta {
                            step,
                            message_id: message_id.clone(),
                            delta,
                        })
                        .await;
                }
                ChatStreamEvent::MessageEnd { mut response } => {
                    self.start_message(step, &message_id, &mut started).await;
                    if response.message.content.is_empty() {
                        response.message.content = streamed;
                    } else if streamed.is_empty() {
                        // Nothing was streamed; surface the text as one delta.
                        self.events
                            .emit(AgentEvent::MessageDelta {
                                step,
                                message_id: message_id.clone(),
                                delta: response.message.content.clone(),
                            })
                            .await;
                    }
                    self.events
                        .emit(AgentEvent::MessageEnd { step, message_id })
                        .await;
                    return Ok(response);
                }
                ChatStreamEvent::Error(e) => return Err(e.into()),
            }
        }

        Err(AgentError::Stream(format!(
            "{} closed the stream without a final message",
            self.client.name()
        )))
    }

    async fn start_message(&self, step: usize, message_id: &str, started: &mut bool) {
        if *started {
            return;
        }
        *started = true;
        self.events
            .emit(AgentEvent::MessageStart {
                step,
                message_id: message_id.to_string(),
            })
            .await;
    }

    async fn end_interrupted(&self, state: RunState, interrupt: Interrupt) -> RunResult {
        let message = match interrupt {
            Interrupt::Timeout => "Run timed out",
            Interrupt::Cancelled => "Run cancelled",
        };
        warn!(run_id = %self.run_id, step = state.step, reason = message, "Agent run interrupted");
        self.end(state, interrupt.into(), Vec::new(), Some(message.to_string()))
            .await
    }

    async fn end(
        &self,
        mut state: RunState,
        termination: Termination,
        pending_client_calls: Vec<ToolCall>,
        message: Option<String>,
    ) -> RunResult {
        state.ledger.commit();
        info!(
            run_id = %self.run_id,
            steps = state.step,
            termination = %termination,
            input_tokens = state.usage.input_tokens,
            output_tokens = state.usage.output_tokens,
            "Agent run finished"
        );

        self.events
            .emit(AgentEvent::RunEnd {
                step: state.step,
                termination,
                response: state.last_response.clone(),
                pending_client_calls: pending_client_calls.clone(),
                message,
            })
            .await;

        RunResult {
            response: state.last_response,
            messages: state.ledger.into_messages(),
            steps: state.step,
            termination,
            usage: state.usage,
            error: None,
            pending_client_calls,
        }
    }

    async fn fail(&self, mut state: RunState, error: AgentError) -> RunResult {
        state.ledger.discard();
        let error = error.to_string();
        warn!(run_id = %self.run_id, step = state.step, error = %error, "Agent run failed");

        self.events
            .emit(AgentEvent::RunError {
                step: state.step,
                error: error.clone(),
            })
            .await;

        RunResult {
            response: state.last_response,
            messages: state.ledger.into_messages(),
            steps: state.step,
            termination: Termination::Error,
            usage: state.usage,
            error: Some(error),
            pending_client_calls: Vec::new(),
        }
    }
}
