// Tool execution subsystem
//
// - `routes`: route matching (exact/prefix/regex/glob) and invoke kinds
// - `dispatch`: route selection and invocation with per-tool timeout
// - `discovery`: assembling the effective tool set for a spec
// - `runner`: the assistant <-> tool loop

pub mod discovery;
pub mod dispatch;
pub mod routes;
pub mod runner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::message::UnifiedTool;

/// Progress counters threaded into tool invocations for telemetry.
/// Omitted entirely when the budget is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProgress {
    pub tool_call_number: u32,
    pub tool_call_total: u32,
    pub tool_calls_remaining: u32,
    pub final_tool_call: bool,
}

/// Context handed to a tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    /// Original tool name (what routes match on)
    pub tool: String,
    /// Sanitized name as it appeared on the wire
    pub wire_name: String,
    pub call_id: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ToolProgress>,
}

/// In-process tool handler ("module" invoke kind)
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    async fn handle(&self, ctx: &ToolContext) -> Result<Value>;
}

/// Registry of in-process handlers, keyed by the handler name a route's
/// manifest references (default `handle`)
#[derive(Default, Clone)]
pub struct ModuleHandlerRegistry {
    handlers: HashMap<String, Arc<dyn ModuleHandler>>,
}

impl ModuleHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a name
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ModuleHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The assembled tool set for one run
#[derive(Debug, Clone, Default)]
pub struct DiscoveredTools {
    /// Tools with sanitized wire names
    pub tools: Vec<UnifiedTool>,
    /// sanitized wire name -> original name
    pub tool_name_map: HashMap<String, String>,
    /// MCP servers that actually contributed tools
    pub mcp_servers: Vec<String>,
}

impl DiscoveredTools {
    /// Resolve a wire name back to the original tool name
    pub fn original_name<'a>(&'a self, wire_name: &'a str) -> &'a str {
        self.tool_name_map
            .get(wire_name)
            .map(String::as_str)
            .unwrap_or(wire_name)
    }
}
