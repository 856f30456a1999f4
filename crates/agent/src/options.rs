//! Run options for the agent loop.
//!
//! A plain struct: start from [`Options::default`] (or
//! [`Options::from_config`]) and override fields directly or with the
//! `with_*` builders.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use stepwise_config::LoopConfig;
use stepwise_core::approval::Approver;
use stepwise_core::event::EventSink;
use stepwise_core::message::Message;
use stepwise_core::provider::{ChatOptions, ChatResponse};

/// Default step limit.
pub const DEFAULT_MAX_STEPS: usize = 10;
/// Default per-handler timeout.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);
/// Default event channel capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 128;

/// What the stop predicate sees after each step.
pub struct StopContext<'a> {
    pub step: usize,
    pub response: &'a ChatResponse,
    /// Committed history, not yet including this step's response
    pub messages: &'a [Message],
}

/// Caller-supplied termination check, evaluated after every step.
pub type StopPredicate = Arc<dyn Fn(&StopContext<'_>) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Options {
    /// Maximum model steps (0 = unlimited, discouraged)
    pub max_steps: usize,

    /// Overall run timeout
    pub timeout: Option<Duration>,

    /// Timeout for a single step (model call plus its tool calls)
    pub step_timeout: Option<Duration>,

    /// Timeout for one tool handler invocation
    pub handler_timeout: Duration,

    /// Execute approved tool calls of a step concurrently
    pub parallel_tools: bool,

    /// Approval gate for backend tool calls
    pub approver: Option<Arc<dyn Approver>>,

    /// When set, only these tool names need approval
    pub approval_required_for: Option<HashSet<String>>,

    /// Custom stop condition
    pub stop_when: Option<StopPredicate>,

    /// Passed through to the chat client untouched
    pub chat: ChatOptions,

    /// Parent stream that also receives every event, wrapped as
    /// `Forwarded`. A nested agent sets this to its tool's `ctx.events`.
    pub forward_to: Option<EventSink>,

    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout: None,
            step_timeout: None,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            parallel_tools: true,
            approver: None,
            approval_required_for: None,
            stop_when: None,
            chat: ChatOptions::default(),
            forward_to: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Options {
    /// Merge file/env configuration into the defaults.
    pub fn from_config(config: &LoopConfig) -> Self {
        let approval_required_for = if config.approval.require_for.is_empty() {
            None
        } else {
            Some(config.approval.require_for.iter().cloned().collect())
        };

        Self {
            max_steps: config.max_steps,
            timeout: config.timeout(),
            step_timeout: config.step_timeout(),
            handler_timeout: config.handler_timeout(),
            parallel_tools: config.parallel_tools,
            approval_required_for,
            event_buffer: config.event_buffer,
            ..Self::default()
        }
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_parallel_tools(mut self, enabled: bool) -> Self {
        self.parallel_tools = enabled;
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    /// Restrict approval to the named tools.
    pub fn with_approval_required_for<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approval_required_for = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_stop_when(
        mut self,
        predicate: impl Fn(&StopContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.stop_when = Some(Arc::new(predicate));
        self
    }

    pub fn with_chat_options(mut self, chat: ChatOptions) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_forward_to(mut self, sink: EventSink) -> Self {
        self.forward_to = Some(sink);
        self
    }

    /// Whether a backend call to `tool_name` must go through the approver.
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        if self.approver.is_none() {
            return false;
        }
        match &self.approval_required_for {
            Some(names) => names.contains(tool_name),
            None => true,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("max_steps", &self.max_steps)
            .field("timeout", &self.timeout)
            .field("step_timeout", &self.step_timeout)
            .field("handler_timeout", &self.handler_timeout)
            .field("parallel_tools", &self.parallel_tools)
            .field("approver", &self.approver.is_some())
            .field("approval_required_for", &self.approval_required_for)
            .field("stop_when", &self.stop_when.is_some())
            .field("chat", &self.chat)
            .field("forward_to", &self.forward_to.is_some())
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

/// Stop once the model has called the named tool.
pub fn stop_on_tool(name: impl Into<String>) -> StopPredicate {
    let name = name.into();
    Arc::new(move |ctx: &StopContext<'_>| {
        ctx.response.message.tool_calls.iter().any(|c| c.name == name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::approval::{ApprovalDecision, FnApprover};
    use stepwise_core::message::ToolCall;

    fn approve_all() -> Arc<dyn Approver> {
        Arc::new(FnApprover(|_: &ToolCall| ApprovalDecision::approve()))
    }

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.max_steps, 10);
        assert_eq!(options.handler_timeout, Duration::from_secs(30));
        assert!(options.parallel_tools);
        assert!(options.timeout.is_none());
        assert!(options.approver.is_none());
    }

    #[test]
    fn no_approver_means_no_approval() {
        let options = Options::default().with_approval_required_for(["shell"]);
        assert!(!options.requires_approval("shell"));
    }

    #[test]
    fn allow_list_limits_approval() {
        let options = Options::default()
            .with_approver(approve_all())
            .with_approval_required_for(["X"]);
        assert!(options.requires_approval("X"));
        assert!(!options.requires_approval("Y"));

        let everything = Options::default().with_approver(approve_all());
        assert!(everything.requires_approval("Y"));
    }

    #[test]
    fn from_config_maps_fields() {
        let config = LoopConfig::from_toml_str(
            r#"
max_steps = 3
timeout_secs = 60
parallel_tools = false
[approval]
require_for = ["deploy"]
"#,
        )
        .unwrap();
        let options = Options::from_config(&config);
        assert_eq!(options.max_steps, 3);
        assert_eq!(options.timeout, Some(Duration::from_secs(60)));
        assert!(options.step_timeout.is_none());
        assert!(!options.parallel_tools);
        assert!(
            options
                .approval_required_for
                .as_ref()
                .is_some_and(|names| names.contains("deploy"))
        );
    }

    #[test]
    fn stop_on_tool_predicate() {
        let predicate = stop_on_tool("finish");
        let mut message = Message::assistant("");
        message.tool_calls = vec![ToolCall::new("c1", "finish", "{}")];
        let response = ChatResponse {
            message,
            usage: None,
            model: "m".into(),
        };
        let ctx = StopContext {
            step: 1,
            response: &response,
            messages: &[],
        };
        assert!(predicate(&ctx));
    }
}
