//! Conversation history bookkeeping.
//!
//! [`HistoryLedger`] is the single definition of how a run grows its history:
//! a step's assistant message and tool results are staged, then committed
//! when the next step starts or the run ends. The agent loop drives a ledger
//! directly; [`HistoryReconstructor`] drives one from the event stream at the
//! same commit points, so both produce the same messages.

use stepwise_core::event::{AgentEvent, Termination};
use stepwise_core::message::{Message, ToolCall, ToolResult};
use stepwise_core::provider::Usage;

use crate::result::{AgentError, RunResult};

#[derive(Debug, Clone, Default)]
pub struct HistoryLedger {
    messages: Vec<Message>,
    staged_response: Option<Message>,
    staged_results: Vec<ToolResult>,
}

impl HistoryLedger {
    pub fn new(initial: Vec<Message>) -> Self {
        Self {
            messages: initial,
            staged_response: None,
            staged_results: Vec::new(),
        }
    }

    /// Stage this step's assistant message, replacing anything staged before.
    pub fn stage_response(&mut self, message: Message) {
        self.staged_response = Some(message);
        self.staged_results.clear();
    }

    pub fn stage_result(&mut self, result: ToolResult) {
        self.staged_results.push(result);
    }

    /// Append the staged message and its results.
    ///
    /// Results are ordered by their call's position in the assistant message,
    /// whatever order they were staged in; parallel tools finish in any order.
    pub fn commit(&mut self) {
        let Some(response) = self.staged_response.take() else {
            self.staged_results.clear();
            return;
        };

        let mut results = std::mem::take(&mut self.staged_results);
        results.sort_by_key(|r| {
            response
                .tool_calls
                .iter()
                .position(|c| c.id == r.call_id)
                .unwrap_or(usize::MAX)
        });

        self.messages.push(response);
        self.messages
            .extend(results.iter().map(Message::from_tool_result));
    }

    /// Drop anything staged (the step failed).
    pub fn discard(&mut self) {
        self.staged_response = None;
        self.staged_results.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Rebuilds a [`RunResult`] from a run's events.
///
/// Needs only the messages the run was started with; it never looks at the
/// loop's own state, so the run may live on another task or machine.
#[derive(Debug)]
pub struct HistoryReconstructor {
    ledger: HistoryLedger,
    steps: usize,
    usage: Usage,
    last_response: Option<Message>,
    outcome: Option<Outcome>,
}

#[derive(Debug)]
struct Outcome {
    termination: Termination,
    response: Option<Message>,
    error: Option<String>,
    pending_client_calls: Vec<ToolCall>,
}

impl HistoryReconstructor {
    pub fn new(initial: Vec<Message>) -> Self {
        Self {
            ledger: HistoryLedger::new(initial),
            steps: 0,
            usage: Usage::default(),
            last_response: None,
            outcome: None,
        }
    }

    /// Feed the next event, in emission order.
    pub fn apply(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::StepStart { step } => {
                self.ledger.commit();
                self.steps = *step;
            }
            AgentEvent::StepEnd { response, .. } => {
                if let Some(usage) = response.usage {
                    self.usage += usage;
                }
                self.ledger.stage_response(response.message.clone());
                self.last_response = Some(response.message.clone());
            }
            AgentEvent::ToolCallResult { result, .. } => {
                self.ledger.stage_result(result.clone());
            }
            AgentEvent::RunEnd {
                step,
                termination,
                response,
                pending_client_calls,
                ..
            } => {
                self.ledger.commit();
                self.steps = *step;
                self.outcome = Some(Outcome {
                    termination: *termination,
                    response: response.clone(),
                    error: None,
                    pending_client_calls: pending_client_calls.clone(),
                });
            }
            AgentEvent::RunError { step, error } => {
                self.ledger.discard();
                self.steps = *step;
                self.outcome = Some(Outcome {
                    termination: Termination::Error,
                    response: self.last_response.clone(),
                    error: Some(error.clone()),
                    pending_client_calls: Vec::new(),
                });
            }
            AgentEvent::RunStart
            | AgentEvent::MessageStart { .. }
            | AgentEvent::MessageDelta { .. }
            | AgentEvent::MessageEnd { .. }
            | AgentEvent::ToolCallStart { .. }
            | AgentEvent::ToolCallArgs { .. }
            | AgentEvent::ToolCallApproved { .. }
            | AgentEvent::ToolCallRejected { .. }
            | AgentEvent::ToolCallExecuting { .. }
            | AgentEvent::ToolCallEnd { .. } => {}
            // A nested run's history is its own.
            AgentEvent::Forwarded { .. } => {}
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// The rebuilt result; fails if no terminal event was seen.
    pub fn finish(self) -> Result<RunResult, AgentError> {
        let outcome = self.outcome.ok_or(AgentError::EventStreamClosed)?;
        Ok(RunResult {
            response: outcome.response,
            messages: self.ledger.into_messages(),
            steps: self.steps,
            termination: outcome.termination,
            usage: self.usage,
            error: outcome.error,
            pending_client_calls: outcome.pending_client_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::message::Role;
    use stepwise_core::provider::ChatResponse;

    fn response(content: &str, calls: Vec<ToolCall>, usage: Usage) -> ChatResponse {
        ChatResponse {
            message: Message::assistant_with_tools(content, calls),
            usage: Some(usage),
            model: "mock-model".into(),
        }
    }

    #[test]
    fn ledger_orders_results_by_call_position() {
        let mut ledger = HistoryLedger::new(vec![Message::user("go")]);
        ledger.stage_response(Message::assistant_with_tools(
            "",
            vec![
                ToolCall::new("a", "t", "{}"),
                ToolCall::new("b", "t", "{}"),
                ToolCall::new("c", "t", "{}"),
            ],
        ));
        ledger.stage_result(ToolResult::success("c", "3"));
        ledger.stage_result(ToolResult::success("a", "1"));
        ledger.stage_result(ToolResult::success("b", "2"));
        ledger.commit();

        let contents: Vec<&str> = ledger.messages()[2..]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["1", "2", "3"]);
    }

    #[test]
    fn commit_without_staged_response_is_noop() {
        let mut ledger = HistoryLedger::new(vec![Message::user("hi")]);
        ledger.commit();
        ledger.commit();
        assert_eq!(ledger.messages().len(), 1);
    }

    #[test]
    fn replay_tool_step_then_answer() {
        let call = ToolCall::new("c1", "get_weather", "{}");
        let first = response("checking", vec![call.clone()], Usage::new(10, 5));
        let second = response("It is 72F", vec![], Usage::new(20, 7));

        let mut rec = HistoryReconstructor::new(vec![Message::user("weather?")]);
        let events = vec![
            AgentEvent::RunStart,
            AgentEvent::StepStart { step: 1 },
            AgentEvent::StepEnd {
                step: 1,
                response: first,
            },
            AgentEvent::ToolCallStart {
                step: 1,
                call: call.clone(),
            },
            AgentEvent::ToolCallResult {
                step: 1,
                result: ToolResult::success("c1", "72F"),
            },
            AgentEvent::StepStart { step: 2 },
            AgentEvent::StepEnd {
                step: 2,
                response: second.clone(),
            },
            AgentEvent::RunEnd {
                step: 2,
                termination: Termination::Complete,
                response: Some(second.message.clone()),
                pending_client_calls: vec![],
                message: None,
            },
        ];
        for event in &events {
            rec.apply(event);
        }
        assert!(rec.is_finished());

        let result = rec.finish().unwrap();
        assert_eq!(result.steps, 2);
        assert_eq!(result.termination, Termination::Complete);
        assert_eq!(result.usage, Usage::new(30, 12));
        assert_eq!(result.content(), "It is 72F");
        let roles: Vec<Role> = result.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[test]
    fn run_error_discards_nothing_committed() {
        let mut rec = HistoryReconstructor::new(vec![Message::user("hi")]);
        rec.apply(&AgentEvent::RunStart);
        rec.apply(&AgentEvent::StepStart { step: 1 });
        rec.apply(&AgentEvent::RunError {
            step: 1,
            error: "boom".into(),
        });

        let result = rec.finish().unwrap();
        assert_eq!(result.termination, Termination::Error);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.messages.len(), 1);
        assert!(result.response.is_none());
    }

    #[test]
    fn forwarded_events_leave_history_alone() {
        let mut rec = HistoryReconstructor::new(vec![Message::user("hi")]);
        rec.apply(&AgentEvent::RunStart);
        rec.apply(&AgentEvent::StepStart { step: 1 });
        rec.apply(&AgentEvent::StepEnd {
            step: 1,
            response: response("", vec![ToolCall::new("c1", "delegate", "{}")], Usage::new(1, 1)),
        });
        let nested = |event| AgentEvent::Forwarded {
            source: "child".into(),
            event: Box::new(event),
        };
        rec.apply(&nested(AgentEvent::StepStart { step: 1 }));
        rec.apply(&nested(AgentEvent::StepEnd {
            step: 1,
            response: response("inner", vec![], Usage::new(50, 50)),
        }));
        rec.apply(&nested(AgentEvent::RunEnd {
            step: 1,
            termination: Termination::Complete,
            response: None,
            pending_client_calls: vec![],
            message: None,
        }));
        assert!(!rec.is_finished());

        rec.apply(&AgentEvent::ToolCallResult {
            step: 1,
            result: ToolResult::success("c1", "inner"),
        });
        rec.apply(&AgentEvent::RunEnd {
            step: 1,
            termination: Termination::Custom,
            response: None,
            pending_client_calls: vec![],
            message: None,
        });

        let result = rec.finish().unwrap();
        assert_eq!(result.steps, 1);
        assert_eq!(result.usage, Usage::new(1, 1));
        assert_eq!(result.messages.len(), 3);
    }

    #[test]
    fn missing_terminal_event_is_an_error() {
        let mut rec = HistoryReconstructor::new(vec![]);
        rec.apply(&AgentEvent::RunStart);
        assert!(matches!(rec.finish(), Err(AgentError::EventStreamClosed)));
    }
}
