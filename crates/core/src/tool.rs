//! Tool trait and registry: the abstraction over agent capabilities.
//!
//! Two kinds of tools exist:
//! - **backend tools** implement [`Tool`] and are executed by the agent loop;
//! - **client tools** are only declared (a [`ToolDefinition`]); when the model
//!   calls one, the loop halts and hands the call back to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::event::EventSink;
use crate::message::{ToolCall, ToolResult};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// What a handler gets besides its arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// ID of the call being executed
    pub call_id: String,

    /// Cancelled when the handler timeout, the step or run deadline elapses,
    /// or the run is cancelled
    pub cancel: CancellationToken,

    /// The calling run's event sink. A nested agent forwards into it.
    pub events: EventSink,
}

/// The core Tool trait.
///
/// Implementations should watch `ctx.cancel` for long-running work.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments and return its output text.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Built once, then shared read-only (`Arc<ToolRegistry>`) with the agent
/// loop and its parallel tool workers.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    client_tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            client_tools: HashMap::new(),
        }
    }

    /// Register a backend tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.client_tools.remove(&name);
        self.tools.insert(name, tool);
    }

    /// Declare a client tool, executed by the frontend rather than here.
    pub fn register_client(&mut self, definition: ToolDefinition) {
        self.tools.remove(&definition.name);
        self.client_tools.insert(definition.name.clone(), definition);
    }

    /// Get a backend tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn is_client_tool(&self, name: &str) -> bool {
        self.client_tools.contains_key(name)
    }

    /// All tool definitions, backend and client, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| t.to_definition())
            .chain(self.client_tools.values().cloned())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a backend tool call.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let arguments = call.parse_arguments()?;
        let output = tool.execute(arguments, ctx).await?;
        Ok(ToolResult::success(&call.id, output))
    }

    /// List all registered tool names (backend and client).
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tools
            .keys()
            .chain(self.client_tools.keys())
            .map(|s| s.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
