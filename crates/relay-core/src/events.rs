// Streaming event envelope
//
// Every compat's streaming state machine normalizes vendor deltas into this
// canonical event stream; the tool loop injects tool-result events between
// rounds and the HTTP facade writes each event as one SSE `data:` frame.
//
// Tool-call lifecycle per round:
//   start -> arguments_delta* -> end -> result

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::Usage;

/// Tool-call lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ToolEvent {
    /// A tool call opened in the stream
    Start {
        #[serde(rename = "callId")]
        call_id: String,
        name: String,
    },
    /// A chunk of the arguments JSON buffer
    ArgumentsDelta {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "argumentsDelta")]
        arguments_delta: String,
    },
    /// The call closed; `arguments` is the complete folded buffer
    End {
        #[serde(rename = "callId")]
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The gateway executed the call and produced a result
    Result {
        #[serde(rename = "callId")]
        call_id: String,
        /// Original (unsanitized) tool name
        tool: String,
        result: Value,
        #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ToolEvent {
    /// The call id this event belongs to
    pub fn call_id(&self) -> &str {
        match self {
            ToolEvent::Start { call_id, .. }
            | ToolEvent::ArgumentsDelta { call_id, .. }
            | ToolEvent::End { call_id, .. }
            | ToolEvent::Result { call_id, .. } => call_id,
        }
    }
}

/// Terminal error payload for the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One event in the outbound stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmStreamEvent {
    /// Incremental text
    Delta { text: String },
    /// Tool-call lifecycle
    Tool {
        #[serde(flatten)]
        event: ToolEvent,
    },
    /// Final or partial usage counters
    Usage { usage: Usage },
    /// Incremental reasoning text
    Reasoning {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Terminal error
    Error { error: StreamError },
}

impl LlmStreamEvent {
    /// Incremental text event
    pub fn delta(text: impl Into<String>) -> Self {
        LlmStreamEvent::Delta { text: text.into() }
    }

    /// Terminal error event
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        LlmStreamEvent::Error {
            error: StreamError {
                message: message.into(),
                code: code.map(str::to_string),
            },
        }
    }
}
