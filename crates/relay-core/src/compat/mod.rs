// Compat modules
//
// A compat translates the unified data model to and from one provider wire
// format, for both request/response and streaming. Streaming state is
// per-stream: every stream gets its own `CompatStreamState` because the
// machines hold mutable maps keyed by block/item/call id.
//
// SDK-style compats (the Responses family) fail `build_payload` and expose
// the exchange through `SdkCompat`; the provider manager dispatches to the
// SDK methods when present.

mod anthropic;
mod openai_chat;
mod responses;

pub use anthropic::AnthropicMessagesCompat;
pub use openai_chat::OpenAiChatCompat;
pub use responses::OpenAiResponsesCompat;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::events::LlmStreamEvent;
use crate::message::{Message, Reasoning, ToolCall, ToolChoice, UnifiedTool};
use crate::provider::ProviderManifest;
use crate::response::{FinishReason, LlmResponse, Usage};
use crate::settings::ProviderSettings;

/// Everything a compat needs to build a payload
#[derive(Debug, Clone, Copy)]
pub struct CompatRequest<'a> {
    pub model: &'a str,
    /// Aggregated system text (leading system messages joined with "\n\n")
    pub system: Option<&'a str>,
    /// Conversation without the aggregated leading system messages
    pub messages: &'a [Message],
    pub settings: &'a ProviderSettings,
    pub tools: &'a [UnifiedTool],
    pub tool_choice: &'a ToolChoice,
    pub streaming: bool,
}

/// Identity of the provider a response came from
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    pub provider: &'a str,
    pub model: &'a str,
}

/// Output of feeding one stream chunk into the state machine
#[derive(Debug, Default)]
pub struct StreamParse {
    pub events: Vec<LlmStreamEvent>,
    /// Sticky once the stream terminated because of tool calls
    pub finished_with_tool_calls: bool,
}

/// Aggregates collected over a whole stream
#[derive(Debug, Default)]
pub struct StreamFinal {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning: Option<Reasoning>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
}

/// Per-stream tool-call state machine
pub trait CompatStreamState: Send {
    /// Feed one decoded SSE data chunk; returns canonical events
    fn on_chunk(&mut self, chunk: &Value) -> StreamParse;

    /// Drain the aggregates after the stream ended
    fn finish(&mut self) -> StreamFinal;
}

/// SDK-style call path for compats that own their own exchange
#[async_trait]
pub trait SdkCompat: Send + Sync {
    async fn call(
        &self,
        client: &reqwest::Client,
        manifest: &ProviderManifest,
        request: &CompatRequest<'_>,
    ) -> Result<(LlmResponse, Value)>;

    /// Build the streaming HTTP request; the manager drives the SSE frames
    /// through `new_stream_state` like any other compat
    fn streaming_request(
        &self,
        manifest: &ProviderManifest,
        request: &CompatRequest<'_>,
    ) -> Result<(String, Value)>;
}

impl std::fmt::Debug for dyn Compat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compat").field("id", &self.id()).finish()
    }
}

/// Per-provider translator
pub trait Compat: Send + Sync {
    fn id(&self) -> &'static str;

    /// Unified request -> wire payload. SDK-only compats fail this.
    fn build_payload(&self, request: &CompatRequest<'_>) -> Result<Value>;

    /// Raw provider response -> unified response
    fn parse_response(&self, raw: Value, ctx: &ResponseContext<'_>) -> Result<LlmResponse>;

    /// Flags merged into the payload when streaming
    fn streaming_flags(&self) -> Value;

    /// Unified tools -> wire tool list
    fn serialize_tools(&self, tools: &[UnifiedTool]) -> Value;

    /// Unified tool choice -> wire tool choice (None = omit)
    fn serialize_tool_choice(&self, choice: &ToolChoice) -> Option<Value>;

    /// Compat-consumed provider extras; returns the leftovers
    fn apply_provider_extensions(&self, _payload: &mut Value, extras: Map<String, Value>) -> Map<String, Value> {
        extras
    }

    /// Fresh state machine for one stream
    fn new_stream_state(&self) -> Box<dyn CompatStreamState>;

    /// SDK call path, when this compat is SDK-style
    fn sdk(&self) -> Option<&dyn SdkCompat> {
        None
    }
}

/// Resolve a built-in compat by id
pub fn builtin(id: &str) -> Option<Arc<dyn Compat>> {
    match id {
        "openai-chat" => Some(Arc::new(OpenAiChatCompat)),
        "anthropic-messages" => Some(Arc::new(AnthropicMessagesCompat)),
        "openai-responses" => Some(Arc::new(OpenAiResponsesCompat)),
        _ => None,
    }
}

/// Ids of all built-in compats
pub fn builtin_ids() -> &'static [&'static str] {
    &["openai-chat", "anthropic-messages", "openai-responses"]
}

// ============================================================================
// Shared reasoning extraction
// ============================================================================

/// Extract normalized reasoning from a provider message/delta object.
///
/// Scans the fields providers are known to use (`reasoning`,
/// `reasoning_details`, `reasoning_content`, `thinking`, `analysis`). When
/// `reasoning_details` is a rich list the entire list is preserved in
/// `metadata.rawDetails` for loss-free round-tripping, and any signature
/// found lands in `metadata.signature`.
pub(crate) fn extract_reasoning(value: &Value) -> Option<Reasoning> {
    let mut text = String::new();
    let mut metadata = Map::new();

    if let Some(details) = value.get("reasoning_details").and_then(Value::as_array) {
        if !details.is_empty() {
            for detail in details {
                if let Some(t) = detail
                    .get("text")
                    .or_else(|| detail.get("summary"))
                    .and_then(Value::as_str)
                {
                    text.push_str(t);
                }
                if let Some(sig) = detail.get("signature").and_then(Value::as_str) {
                    metadata.insert("signature".to_string(), Value::String(sig.to_string()));
                }
            }
            metadata.insert("rawDetails".to_string(), Value::Array(details.clone()));
        }
    }

    if text.is_empty() {
        for key in ["reasoning", "reasoning_content", "thinking", "analysis"] {
            match value.get(key) {
                Some(Value::String(s)) if !s.is_empty() => {
                    text = s.clone();
                    break;
                }
                Some(Value::Object(obj)) => {
                    if let Some(s) = obj
                        .get("text")
                        .or_else(|| obj.get("content"))
                        .and_then(Value::as_str)
                    {
                        text = s.to_string();
                        if let Some(sig) = obj.get("signature").and_then(Value::as_str) {
                            metadata
                                .insert("signature".to_string(), Value::String(sig.to_string()));
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    if text.is_empty() && metadata.is_empty() {
        return None;
    }

    Some(Reasoning {
        text,
        redacted: false,
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(Value::Object(metadata))
        },
    })
}

/// Parse a folded arguments buffer into structured arguments.
/// Invalid JSON degrades to an empty object, matching what providers do
/// when a stream is cut mid-arguments.
pub(crate) fn parse_arguments(buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(buffer).unwrap_or_else(|_| Value::Object(Map::new()))
}
