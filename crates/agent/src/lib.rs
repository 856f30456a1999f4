//! The agent loop: the heart of Stepwise.
//!
//! A run follows a **call → act → observe** cycle:
//!
//! 1. **Check** termination conditions (cancel, deadline, step limit)
//! 2. **Call** the chat client in streaming mode
//! 3. **If tool calls**: approve, execute, append results, loop back to 1
//! 4. **If text only**: the run is complete
//!
//! Everything a run does is observable as an ordered stream of
//! [`AgentEvent`](stepwise_core::AgentEvent)s, and the final history can be
//! rebuilt from that stream alone with a [`HistoryReconstructor`].

pub mod history;
pub mod loop_runner;
pub mod options;
pub mod result;
pub mod scope;
pub mod stream;
pub mod tool_processor;

#[cfg(test)]
mod test_helpers;

pub use history::{HistoryLedger, HistoryReconstructor};
pub use loop_runner::{AgentLoop, RunHandle};
pub use options::{Options, StopContext, StopPredicate, stop_on_tool};
pub use result::{AgentError, RunResult};
pub use scope::Interrupt;
pub use stream::EventStream;
pub use tool_processor::ProcessedCalls;
