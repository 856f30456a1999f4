//! Approval gate for backend tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::message::ToolCall;

/// The outcome of asking an approver about one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,

    /// Why the call was denied; surfaced to the model as the tool result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether a tool call may run.
///
/// The agent asks one call at a time; an implementation may block on a human
/// (see the broker crate) as long as it honours `cancel`.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, call: &ToolCall, cancel: CancellationToken) -> ApprovalDecision;
}

/// Adapts a synchronous closure into an [`Approver`].
pub struct FnApprover<F>(pub F);

#[async_trait]
impl<F> Approver for FnApprover<F>
where
    F: Fn(&ToolCall) -> ApprovalDecision + Send + Sync,
{
    async fn approve(&self, call: &ToolCall, _cancel: CancellationToken) -> ApprovalDecision {
        (self.0)(call)
    }
}
