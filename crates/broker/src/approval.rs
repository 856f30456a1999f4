//! Tool-call approval backed by a [`CorrelationBroker`].
//!
//! The agent asks; the call is parked under its tool-call ID until someone
//! calls [`ApprovalBroker::approve_call`] or [`ApprovalBroker::deny_call`].
//! A timeout or cancellation counts as a denial.

use std::time::Duration;

use async_trait::async_trait;
use stepwise_config::ApprovalConfig;
use stepwise_core::approval::{ApprovalDecision, Approver};
use stepwise_core::message::ToolCall;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{BrokerError, CorrelationBroker};

pub struct ApprovalBroker {
    broker: CorrelationBroker<ToolCall, ApprovalDecision>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self {
            broker: CorrelationBroker::new(),
        }
    }

    /// A broker using the configured approval timeout.
    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self::new().with_timeout(config.timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.broker = self.broker.with_timeout(timeout);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.broker.timeout()
    }

    /// Observe each call as it starts waiting for a decision.
    pub fn with_on_submit(
        mut self,
        callback: impl Fn(&str, &ToolCall) + Send + Sync + 'static,
    ) -> Self {
        self.broker = self.broker.with_on_submit(callback);
        self
    }

    /// Approve the pending call with this ID.
    pub fn approve_call(&self, call_id: &str) -> Result<(), BrokerError> {
        self.decide(call_id, ApprovalDecision::approve())
    }

    /// Deny the pending call with this ID.
    pub fn deny_call(&self, call_id: &str, reason: Option<&str>) -> Result<(), BrokerError> {
        let decision = ApprovalDecision {
            approved: false,
            reason: reason.map(str::to_string),
        };
        self.decide(call_id, decision)
    }

    pub fn decide(&self, call_id: &str, decision: ApprovalDecision) -> Result<(), BrokerError> {
        info!(call_id, approved = decision.approved, "Approval decision");
        self.broker.respond(call_id, decision)
    }

    /// Tool-call IDs awaiting a decision.
    pub fn pending(&self) -> Vec<String> {
        self.broker.pending_ids()
    }
}

impl Default for ApprovalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Approver for ApprovalBroker {
    async fn approve(&self, call: &ToolCall, cancel: CancellationToken) -> ApprovalDecision {
        match self
            .broker
            .wait(Some(call.id.clone()), call.clone(), &cancel)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(call_id = %call.id, tool = %call.name, error = %e, "Approval not obtained");
                let reason = match e {
                    BrokerError::Timeout { .. } => "Approval timed out",
                    BrokerError::Cancelled(_) => "Approval cancelled",
                    _ => "Approval unavailable",
                };
                ApprovalDecision::deny(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn wait_for_pending(broker: &ApprovalBroker, id: &str) {
        while !broker.pending().iter().any(|p| p == id) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn approval_round_trip() {
        let broker = Arc::new(ApprovalBroker::new());
        let call = ToolCall::new("call_7", "shell", r#"{"cmd":"ls"}"#);

        let task = {
            let broker = broker.clone();
            let call = call.clone();
            tokio::spawn(async move { broker.approve(&call, CancellationToken::new()).await })
        };

        wait_for_pending(&broker, "call_7").await;
        broker.approve_call("call_7").unwrap();

        assert!(task.await.unwrap().approved);
    }

    #[tokio::test]
    async fn denial_carries_reason() {
        let broker = Arc::new(ApprovalBroker::new());
        let call = ToolCall::new("call_8", "shell", "{}");

        let task = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.approve(&call, CancellationToken::new()).await })
        };

        wait_for_pending(&broker, "call_8").await;
        broker.deny_call("call_8", Some("not on a Friday")).unwrap();

        let decision = task.await.unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("not on a Friday"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_denial() {
        let broker = ApprovalBroker::new().with_timeout(Duration::from_secs(1));
        let call = ToolCall::new("call_9", "shell", "{}");

        let decision = broker.approve(&call, CancellationToken::new()).await;
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("Approval timed out"));
        assert!(broker.pending().is_empty());
    }

    #[test]
    fn from_config_uses_approval_timeout() {
        let config = ApprovalConfig {
            require_for: vec![],
            timeout_secs: 42,
        };
        assert_eq!(
            ApprovalBroker::from_config(&config).timeout(),
            Duration::from_secs(42)
        );
        assert_eq!(ApprovalBroker::new().timeout(), crate::DEFAULT_TIMEOUT);
    }

    #[test]
    fn deciding_unknown_call_errors() {
        let broker = ApprovalBroker::new();
        assert!(matches!(
            broker.approve_call("nope"),
            Err(BrokerError::NoSuchRequest(_))
        ));
    }
}
