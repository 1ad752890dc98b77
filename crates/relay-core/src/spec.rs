// Call specifications
//
// The JSON envelopes callers POST to the gateway. `LlmCallSpec` drives the
// coordinator; `VectorCallSpec` and `EmbeddingCallSpec` drive the retrieval
// endpoints directly. Validation stays structural here (required fields,
// enums in range, arrays where expected); semantic checks happen downstream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};
use crate::message::{Message, UnifiedTool};

/// One provider/model choice in priority order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmPriorityEntry {
    pub provider: String,
    pub model: String,
    /// Per-provider setting overrides, deep-merged over the spec settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,
}

/// How vector stores participate in a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorContextMode {
    /// Stores only feed tool discovery
    #[default]
    Discovery,
    /// Expose the built-in vector_search tool
    Tool,
    /// Both
    Both,
}

/// Vector retrieval configuration for an LLM call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorContext {
    #[serde(default)]
    pub mode: VectorContextMode,
    /// Wire name for the built-in search tool
    #[serde(default = "default_vector_tool_name")]
    pub tool_name: String,
    /// Default number of matches per query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
}

fn default_vector_tool_name() -> String {
    "vector_search".to_string()
}

impl Default for VectorContext {
    fn default() -> Self {
        Self {
            mode: VectorContextMode::default(),
            tool_name: default_vector_tool_name(),
            top_k: None,
        }
    }
}

impl VectorContext {
    /// Whether the built-in search tool is exposed
    pub fn exposes_tool(&self) -> bool {
        matches!(self.mode, VectorContextMode::Tool | VectorContextMode::Both)
    }
}

/// Provider-agnostic call specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCallSpec {
    pub messages: Vec<Message>,

    /// Providers to try, highest priority first
    pub llm_priority: Vec<LlmPriorityEntry>,

    /// Inline tool definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<UnifiedTool>,

    /// Registry tools referenced by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_tool_names: Vec<String>,

    /// MCP server ids to source tools from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,

    /// Vector stores to consult, highest priority first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector_priority: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_context: Option<VectorContext>,

    /// Loose settings map; partitioned by the coordinator
    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl LlmCallSpec {
    /// Structural validation: required fields present, shapes as expected
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(GatewayError::validation("messages must not be empty"));
        }
        if self.llm_priority.is_empty() {
            return Err(GatewayError::validation("llmPriority must not be empty"));
        }
        for (i, entry) in self.llm_priority.iter().enumerate() {
            if entry.provider.trim().is_empty() {
                return Err(GatewayError::validation(format!(
                    "llmPriority[{i}].provider must not be empty"
                )));
            }
            if entry.model.trim().is_empty() {
                return Err(GatewayError::validation(format!(
                    "llmPriority[{i}].model must not be empty"
                )));
            }
        }
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(GatewayError::validation("tool name must not be empty"));
            }
        }
        Ok(())
    }

    /// True when any tool source is configured
    pub fn wants_tools(&self) -> bool {
        !self.tools.is_empty()
            || !self.function_tool_names.is_empty()
            || !self.mcp_servers.is_empty()
            || !self.vector_priority.is_empty()
            || self.vector_context.is_some()
    }

    /// Metadata value accessor
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

// ============================================================================
// Vector and embedding call specs
// ============================================================================

/// Query payload for a vector call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

/// Spec for `/vector/run` and `/vector/stream`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorCallSpec {
    /// Single store, or
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    /// stores in priority order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub store_priority: Vec<String>,
    pub query: VectorQuery,
}

impl VectorCallSpec {
    pub fn validate(&self) -> Result<()> {
        if self.store.is_none() && self.store_priority.is_empty() {
            return Err(GatewayError::validation(
                "one of store or storePriority is required",
            ));
        }
        if self.query.text.is_none() && self.query.vector.is_none() {
            return Err(GatewayError::validation(
                "query requires text or vector",
            ));
        }
        Ok(())
    }

    /// Stores to try in order
    pub fn stores(&self) -> Vec<String> {
        match &self.store {
            Some(store) => vec![store.clone()],
            None => self.store_priority.clone(),
        }
    }
}

/// Spec for `/vector/embeddings/run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingCallSpec {
    /// Embedding providers to try, highest priority first
    pub provider_priority: Vec<String>,
    pub input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl EmbeddingCallSpec {
    pub fn validate(&self) -> Result<()> {
        if self.provider_priority.is_empty() {
            return Err(GatewayError::validation(
                "providerPriority must not be empty",
            ));
        }
        if self.input.is_empty() {
            return Err(GatewayError::validation("input must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_spec_parses_and_validates() {
        let spec: LlmCallSpec = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "llmPriority": [{"provider": "openai", "model": "gpt-4o"}]
        }))
        .unwrap();
        spec.validate().unwrap();
        assert!(!spec.wants_tools());
    }

    #[test]
    fn empty_priority_fails_validation() {
        let spec: LlmCallSpec = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "llmPriority": []
        }))
        .unwrap();
        assert!(matches!(
            spec.validate(),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn tool_sources_flip_wants_tools() {
        let spec: LlmCallSpec = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "llmPriority": [{"provider": "openai", "model": "gpt-4o"}],
            "functionToolNames": ["echo.text"]
        }))
        .unwrap();
        assert!(spec.wants_tools());
    }

    #[test]
    fn vector_context_defaults() {
        let ctx: VectorContext = serde_json::from_value(json!({"mode": "tool"})).unwrap();
        assert!(ctx.exposes_tool());
        assert_eq!(ctx.tool_name, "vector_search");

        let ctx: VectorContext = serde_json::from_value(json!({})).unwrap();
        assert!(!ctx.exposes_tool());
    }

    #[test]
    fn vector_spec_requires_store_and_query() {
        let spec: VectorCallSpec = serde_json::from_value(json!({
            "storePriority": ["kb"],
            "query": {"text": "find me"}
        }))
        .unwrap();
        spec.validate().unwrap();
        assert_eq!(spec.stores(), vec!["kb".to_string()]);

        let spec: VectorCallSpec =
            serde_json::from_value(json!({"query": {"text": "x"}})).unwrap();
        assert!(spec.validate().is_err());
    }
}
