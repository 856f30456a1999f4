//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the Stepwise tool-calling
//! agent engine. This crate has **no runtime logic of its own**; it defines
//! the vocabulary that the broker and the agent loop are written against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`ChatClient`]: the model backend (streaming or not)
//! - [`Tool`]: a backend-executed capability, collected in a [`ToolRegistry`]
//! - [`Approver`]: the human-in-the-loop gate for tool calls
//!
//! Everything observable during a run is an [`AgentEvent`], delivered
//! through an [`EventSink`].

pub mod approval;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use approval::{ApprovalDecision, Approver, FnApprover};
pub use error::{ProviderError, ToolError};
pub use event::{AgentEvent, EventSink, Termination};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use provider::{ChatClient, ChatOptions, ChatRequest, ChatResponse, ChatStreamEvent, Usage};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolRegistry};
