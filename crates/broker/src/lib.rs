//! Human-in-the-loop plumbing for Stepwise.
//!
//! A [`CorrelationBroker`] parks a caller until a response for its request ID
//! arrives from elsewhere (a UI, an HTTP handler, a chat channel), the
//! timeout elapses, or the caller is cancelled. Two thin front-ends reuse it:
//!
//! - [`ApprovalBroker`]: gates tool calls; plugs into the agent as an `Approver`
//! - [`HumanInput`]: confirm / free-text / multiple-choice prompts

pub mod approval;
pub mod broker;
pub mod input;

pub use approval::ApprovalBroker;
pub use broker::{BrokerError, CorrelationBroker, DEFAULT_TIMEOUT};
pub use input::{HumanInput, InputKind, InputRequest, InputResponse};
