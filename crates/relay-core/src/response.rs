// Unified response types
//
// LlmResponse is what every compat normalizes a provider response into.
// Finish reasons map onto a small closed set; unrecognized vendor values
// pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ContentPart, Reasoning, Role, ToolCall};

/// Normalized finish reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    /// Vendor-specific value passed through as-is
    #[serde(untagged)]
    Other(String),
}

impl FinishReason {
    /// Normalize a vendor finish/stop reason string
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" | "completed" => FinishReason::Stop,
            "length" | "max_tokens" | "max_output_tokens" | "incomplete" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Token usage counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    /// True when no counter is populated
    pub fn is_empty(&self) -> bool {
        *self == Usage::default()
    }

    /// Merge counters from a later partial (later values win where present)
    pub fn merge(&mut self, other: &Usage) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(prompt_tokens);
        take!(completion_tokens);
        take!(total_tokens);
        take!(reasoning_tokens);
        take!(cached_tokens);
        take!(audio_tokens);
        take!(cost);
    }
}

/// Response from a provider, normalized to the unified model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub provider: String,
    pub model: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    /// Provider-shaped raw payload plus gateway annotations (tool results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl LlmResponse {
    /// Create an empty assistant response shell for a provider/model pair
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            role: Role::Assistant,
            content: Vec::new(),
            tool_calls: None,
            finish_reason: None,
            usage: None,
            reasoning: None,
            raw: None,
        }
    }

    /// First text part, when present
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|p| p.as_text())
    }

    /// Check if this response requests tool execution
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}
