//! Tool call processing for one step: approval, dispatch, result ordering.
//!
//! Pipeline per step:
//! 1. every call gets `ToolCallStart` + `ToolCallArgs`;
//! 2. client calls are auto-approved here and end immediately (the frontend
//!    runs them);
//! 3. backend calls go through the approver one at a time; denials become
//!    error results without touching a handler;
//! 4. approved calls run sequentially, or on one worker task each when
//!    parallel execution is on;
//! 5. results come back in the order the model issued the calls.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use stepwise_core::error::ToolError;
use stepwise_core::event::{AgentEvent, EventSink};
use stepwise_core::message::{ToolCall, ToolResult};
use stepwise_core::tool::{ToolContext, ToolRegistry};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::options::Options;
use crate::scope::{Interrupt, Scope};

const DEFAULT_REJECTION: &str = "Tool call rejected";

/// What the loop needs back from one step's tool calls.
#[derive(Debug, Clone, Default)]
pub struct ProcessedCalls {
    /// One result per backend call, in call order
    pub results: Vec<ToolResult>,
    /// Every backend call was denied and there were no client calls
    pub all_rejected: bool,
    pub has_client_tools: bool,
    /// Client calls, untouched, in call order
    pub client_calls: Vec<ToolCall>,
}

pub(crate) struct ToolCallProcessor<'a> {
    pub(crate) tools: &'a Arc<ToolRegistry>,
    pub(crate) options: &'a Options,
    pub(crate) events: &'a EventSink,
    pub(crate) scope: &'a Scope,
    pub(crate) step: usize,
}

impl ToolCallProcessor<'_> {
    pub(crate) async fn process(&self, calls: &[ToolCall]) -> ProcessedCalls {
        let step = self.step;
        let mut client_calls = Vec::new();
        let mut backend: Vec<(&ToolCall, Option<ToolResult>)> = Vec::new();

        for call in calls {
            self.events
                .emit(AgentEvent::ToolCallStart {
                    step,
                    call: call.clone(),
                })
                .await;
            self.events
                .emit(AgentEvent::ToolCallArgs {
                    step,
                    call_id: call.id.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;

            if self.tools.is_client_tool(&call.name) {
                self.events
                    .emit(AgentEvent::ToolCallApproved {
                        step,
                        call_id: call.id.clone(),
                    })
                    .await;
                self.events
                    .emit(AgentEvent::ToolCallEnd {
                        step,
                        call_id: call.id.clone(),
                    })
                    .await;
                client_calls.push(call.clone());
                continue;
            }

            let rejection = self.seek_approval(call).await;
            if let Some(result) = &rejection {
                self.events
                    .emit(AgentEvent::ToolCallRejected {
                        step,
                        call_id: call.id.clone(),
                        reason: result.content.clone(),
                    })
                    .await;
                self.events
                    .emit(AgentEvent::ToolCallEnd {
                        step,
                        call_id: call.id.clone(),
                    })
                    .await;
                self.events
                    .emit(AgentEvent::ToolCallResult {
                        step,
                        result: result.clone(),
                    })
                    .await;
            } else {
                self.events
                    .emit(AgentEvent::ToolCallApproved {
                        step,
                        call_id: call.id.clone(),
                    })
                    .await;
            }
            backend.push((call, rejection));
        }

        let has_client_tools = !client_calls.is_empty();
        let all_rejected =
            !backend.is_empty() && !has_client_tools && backend.iter().all(|(_, r)| r.is_some());

        if all_rejected {
            debug!(step, rejected = backend.len(), "Every tool call rejected");
            return ProcessedCalls {
                results: backend.into_iter().filter_map(|(_, r)| r).collect(),
                all_rejected,
                has_client_tools,
                client_calls,
            };
        }

        let approved: Vec<ToolCall> = backend
            .iter()
            .filter(|(_, r)| r.is_none())
            .map(|(call, _)| (*call).clone())
            .collect();
        let mut executed = self.execute_all(approved).await.into_iter();

        // Put executed results back into the slots the approval pass left open.
        let results = backend
            .into_iter()
            .map(|(call, rejection)| {
                rejection
                    .or_else(|| executed.next())
                    .unwrap_or_else(|| ToolResult::error(&call.id, "Error: tool result missing"))
            })
            .collect();

        ProcessedCalls {
            results,
            all_rejected,
            has_client_tools,
            client_calls,
        }
    }

    /// Returns the rejection result, or `None` when the call may run.
    async fn seek_approval(&self, call: &ToolCall) -> Option<ToolResult> {
        if !self.options.requires_approval(&call.name) {
            return None;
        }
        let approver = self.options.approver.as_ref()?;

        let decision = self
            .scope
            .run(approver.approve(call, self.scope.token()))
            .await;
        match decision {
            Ok(decision) if decision.approved => None,
            Ok(decision) => {
                let reason = decision
                    .reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
                warn!(call_id = %call.id, tool = %call.name, reason = %reason, "Tool call rejected");
                Some(ToolResult::error(&call.id, reason))
            }
            Err(interrupt) => {
                let reason = match interrupt {
                    Interrupt::Timeout => "Approval timed out",
                    Interrupt::Cancelled => "Approval cancelled",
                };
                warn!(call_id = %call.id, tool = %call.name, reason, "Tool call not approved");
                Some(ToolResult::error(&call.id, reason))
            }
        }
    }

    async fn execute_all(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let timeout = self.options.handler_timeout;

        if !self.options.parallel_tools || calls.len() <= 1 {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(
                    execute_call(
                        self.tools.clone(),
                        self.events.clone(),
                        self.scope.clone(),
                        self.step,
                        call,
                        timeout,
                    )
                    .await,
                );
            }
            return results;
        }

        debug!(step = self.step, count = calls.len(), "Executing tool calls in parallel");
        let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
        let workers = calls.into_iter().map(|call| {
            tokio::spawn(execute_call(
                self.tools.clone(),
                self.events.clone(),
                self.scope.clone(),
                self.step,
                call,
                timeout,
            ))
        });

        // join_all keeps the input order, whatever order the workers finish in.
        let joined = futures::future::join_all(workers).await;
        let mut results = Vec::with_capacity(joined.len());
        for (outcome, id) in joined.into_iter().zip(ids) {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    // The worker died before reporting; close the call out here.
                    error!(call_id = %id, error = %e, "Tool worker failed");
                    let result = ToolResult::error(&id, format!("Error: tool worker failed: {e}"));
                    finish_call(self.events, self.step, &result).await;
                    result
                }
            };
            results.push(result);
        }
        results
    }
}

/// Run one approved call under its own handler timeout.
///
/// Never fails: handler errors, panics, unknown tools, timeouts and
/// cancellation all come back as error-flagged results.
async fn execute_call(
    tools: Arc<ToolRegistry>,
    events: EventSink,
    scope: Scope,
    step: usize,
    call: ToolCall,
    handler_timeout: Duration,
) -> ToolResult {
    events
        .emit(AgentEvent::ToolCallExecuting {
            step,
            call_id: call.id.clone(),
        })
        .await;

    let handler_scope = scope.child(Some(handler_timeout));
    let ctx = ToolContext {
        call_id: call.id.clone(),
        cancel: handler_scope.token(),
        events: events.clone(),
    };
    let started = Instant::now();
    let handler = AssertUnwindSafe(tools.execute(&call, &ctx)).catch_unwind();
    let outcome = handler_scope.run(handler).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(Ok(Ok(result))) => {
            debug!(call_id = %call.id, tool = %call.name, elapsed_ms, "Tool call succeeded");
            result
        }
        Ok(Ok(Err(e))) => failure(&call, e),
        Ok(Err(payload)) => {
            error!(call_id = %call.id, tool = %call.name, "Tool handler panicked");
            failure(
                &call,
                ToolError::ExecutionFailed {
                    tool_name: call.name.clone(),
                    reason: format!("handler panicked: {}", panic_message(payload.as_ref())),
                },
            )
        }
        Err(interrupt) => {
            // Let a cooperative handler that is still running wind down.
            handler_scope.cancel();
            let err = match interrupt {
                Interrupt::Timeout => ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_ms: elapsed_ms,
                },
                Interrupt::Cancelled => ToolError::Cancelled(call.name.clone()),
            };
            failure(&call, err)
        }
    };

    finish_call(&events, step, &result).await;
    result
}

/// Emit the closing pair every executed call gets.
async fn finish_call(events: &EventSink, step: usize, result: &ToolResult) {
    events
        .emit(AgentEvent::ToolCallEnd {
            step,
            call_id: result.call_id.clone(),
        })
        .await;
    events
        .emit(AgentEvent::ToolCallResult {
            step,
            result: result.clone(),
        })
        .await;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn failure(call: &ToolCall, err: ToolError) -> ToolResult {
    warn!(call_id = %call.id, tool = %call.name, error = %err, "Tool call failed");
    ToolResult::error(&call.id, format!("Error: {err}"))
}
