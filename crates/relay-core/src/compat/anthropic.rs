// Anthropic Messages compat
//
// Translates the unified model to and from the Messages API. Two contract
// points dominate this file:
//
// - Signed thinking blocks must be re-sent unaltered on every assistant
//   turn, placed FIRST in the assistant content, with the signature
//   verbatim. The unified `redacted` flag is ignored for this provider.
// - When thinking is requested but some prior assistant message lacks
//   reasoning, the request downgrades (thinking is not enabled) to stay
//   inside the API contract.
//
// Streaming is block-indexed: `content_block_start` maps an index to a
// call id, `input_json_delta` folds into the arguments buffer, END fires on
// `content_block_stop`, and all per-message state flushes on
// `message_start` / `message_stop`.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

use super::{
    parse_arguments, Compat, CompatRequest, CompatStreamState, ResponseContext, StreamFinal,
    StreamParse,
};
use crate::error::{GatewayError, Result};
use crate::events::{LlmStreamEvent, ToolEvent};
use crate::message::{
    ContentPart, DocumentSource, Message, Reasoning, Role, ToolCall, ToolChoice, UnifiedTool,
};
use crate::response::{FinishReason, LlmResponse, Usage};
use crate::settings::DEFAULT_REASONING_BUDGET;

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Anthropic Messages translator
pub struct AnthropicMessagesCompat;

impl AnthropicMessagesCompat {
    fn convert_image(url: &str) -> Value {
        if let Some(rest) = url.strip_prefix("data:") {
            // data:image/png;base64,AAAA...
            let (media_type, data) = match rest.split_once(";base64,") {
                Some((mime, data)) => (mime.to_string(), data.to_string()),
                None => ("image/jpeg".to_string(), rest.to_string()),
            };
            json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data}
            })
        } else {
            json!({
                "type": "image",
                "source": {"type": "url", "url": url}
            })
        }
    }

    fn convert_document(
        source: &DocumentSource,
        mime_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<Value> {
        let source_value = match source {
            DocumentSource::Base64 { data } => json!({
                "type": "base64",
                "media_type": mime_type.unwrap_or("application/pdf"),
                "data": data
            }),
            DocumentSource::Url { url } => json!({"type": "url", "url": url}),
            DocumentSource::FileId { file_id } => json!({"type": "file", "file_id": file_id}),
            DocumentSource::Filepath { .. } => {
                return Err(GatewayError::compat(
                    "filepath document sources must be resolved before dispatch",
                ))
            }
        };
        let mut block = Map::new();
        block.insert("type".to_string(), json!("document"));
        block.insert("source".to_string(), source_value);
        if let Some(title) = filename {
            block.insert("title".to_string(), json!(title));
        }
        Ok(Value::Object(block))
    }

    fn convert_parts(parts: &[ContentPart]) -> Result<Vec<Value>> {
        let mut blocks = Vec::new();
        for part in parts {
            match part {
                // Whitespace-only text blocks are rejected by the API
                ContentPart::Text { text } if text.trim().is_empty() => {}
                ContentPart::Text { text } => blocks.push(json!({"type": "text", "text": text})),
                ContentPart::Image { image_url } => blocks.push(Self::convert_image(image_url)),
                ContentPart::Document {
                    source,
                    mime_type,
                    filename,
                    ..
                } => blocks.push(Self::convert_document(
                    source,
                    mime_type.as_deref(),
                    filename.as_deref(),
                )?),
                ContentPart::ToolResult { result, .. } => blocks.push(json!({
                    "type": "text",
                    "text": serde_json::to_string(result).unwrap_or_default()
                })),
            }
        }
        Ok(blocks)
    }

    /// Thinking block for an assistant turn. Emitted even when the unified
    /// reasoning is marked redacted: a signed block must be re-sent
    /// verbatim or the signature breaks.
    fn thinking_block(reasoning: &Reasoning) -> Value {
        let mut block = Map::new();
        block.insert("type".to_string(), json!("thinking"));
        block.insert("thinking".to_string(), json!(reasoning.text));
        if let Some(signature) = reasoning.signature() {
            block.insert("signature".to_string(), json!(signature));
        }
        Value::Object(block)
    }

    fn convert_messages(messages: &[Message]) -> Result<Vec<Value>> {
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    // Handled by the system aggregation upstream; a stray
                    // mid-conversation system message travels as user text
                    converted.push(json!({
                        "role": "user",
                        "content": [{"type": "text", "text": msg.joined_text()}]
                    }));
                }
                Role::User => {
                    converted.push(json!({
                        "role": "user",
                        "content": Self::convert_parts(&msg.content)?
                    }));
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    // Thinking first, before any text or tool_use block
                    if let Some(reasoning) = &msg.reasoning {
                        if !reasoning.text.is_empty() || reasoning.signature().is_some() {
                            blocks.push(Self::thinking_block(reasoning));
                        }
                    }
                    blocks.extend(Self::convert_parts(&msg.content)?);
                    if let Some(calls) = &msg.tool_calls {
                        for tc in calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": tc.arguments
                            }));
                        }
                    }
                    converted.push(json!({"role": "assistant", "content": blocks}));
                }
                Role::Tool => {
                    let tool_use_id = msg.tool_call_id.clone().ok_or_else(|| {
                        GatewayError::compat("tool message without toolCallId")
                    })?;
                    let is_error = msg.content.iter().any(|p| {
                        matches!(p, ContentPart::ToolResult { is_error: Some(true), .. })
                    });
                    let mut block = Map::new();
                    block.insert("type".to_string(), json!("tool_result"));
                    block.insert("tool_use_id".to_string(), json!(tool_use_id));
                    block.insert("content".to_string(), json!(msg.joined_text()));
                    if is_error {
                        block.insert("is_error".to_string(), json!(true));
                    }
                    converted.push(json!({
                        "role": "user",
                        "content": [Value::Object(block)]
                    }));
                }
            }
        }

        Ok(converted)
    }

    /// Thinking config, or `None` when downgrading: if any prior assistant
    /// message lacks reasoning, enabling thinking would violate the API
    /// contract (every assistant turn must then start with a thinking
    /// block).
    fn thinking_config(request: &CompatRequest<'_>) -> Option<Value> {
        let reasoning = request.settings.reasoning.as_ref()?;
        if !reasoning.enabled && reasoning.budget.is_none() {
            // Effort/exclude alone do not enable thinking on this provider
            return None;
        }

        let downgrade = request
            .messages
            .iter()
            .any(|m| m.role == Role::Assistant && m.reasoning.is_none());
        if downgrade {
            debug!("thinking requested but a prior assistant message lacks reasoning; downgrading");
            return None;
        }

        let budget = reasoning.budget.unwrap_or(DEFAULT_REASONING_BUDGET);
        Some(json!({"type": "enabled", "budget_tokens": budget}))
    }
}

impl Compat for AnthropicMessagesCompat {
    fn id(&self) -> &'static str {
        "anthropic-messages"
    }

    fn build_payload(&self, request: &CompatRequest<'_>) -> Result<Value> {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(request.model));
        payload.insert(
            "messages".to_string(),
            Value::Array(Self::convert_messages(request.messages)?),
        );
        // max_tokens is required by the API
        payload.insert(
            "max_tokens".to_string(),
            json!(request.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if let Some(system) = request.system {
            payload.insert("system".to_string(), json!(system));
        }
        if let Some(v) = request.settings.temperature {
            payload.insert("temperature".to_string(), json!(v));
        }
        if let Some(v) = request.settings.top_p {
            payload.insert("top_p".to_string(), json!(v));
        }
        if let Some(stop) = &request.settings.stop {
            if !stop.is_empty() {
                payload.insert("stop_sequences".to_string(), json!(stop));
            }
        }
        if let Some(thinking) = Self::thinking_config(request) {
            payload.insert("thinking".to_string(), thinking);
        }

        if !request.tools.is_empty() {
            payload.insert("tools".to_string(), self.serialize_tools(request.tools));
            if let Some(choice) = self.serialize_tool_choice(request.tool_choice) {
                payload.insert("tool_choice".to_string(), choice);
            }
        }

        Ok(Value::Object(payload))
    }

    fn parse_response(&self, raw: Value, ctx: &ResponseContext<'_>) -> Result<LlmResponse> {
        let blocks = raw
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::compat("response missing content blocks"))?;

        let mut response = LlmResponse::new(ctx.provider, ctx.model);
        let mut tool_calls = Vec::new();

        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        response.content.push(ContentPart::text(text));
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                    tool_calls.push(ToolCall::new(id, name, input));
                }
                Some("thinking") => {
                    let text = block
                        .get("thinking")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let mut reasoning = Reasoning::new(text);
                    if let Some(sig) = block.get("signature").and_then(Value::as_str) {
                        reasoning.metadata = Some(json!({"signature": sig}));
                    }
                    response.reasoning = Some(reasoning);
                }
                _ => {}
            }
        }

        if !tool_calls.is_empty() {
            response.tool_calls = Some(tool_calls);
        }
        response.finish_reason = raw
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(FinishReason::normalize);
        if let Some(usage) = raw.get("usage") {
            response.usage = Some(parse_usage(usage));
        }
        response.raw = Some(raw);
        Ok(response)
    }

    fn streaming_flags(&self) -> Value {
        json!({"stream": true})
    }

    fn serialize_tools(&self, tools: &[UnifiedTool]) -> Value {
        Value::Array(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description.clone().unwrap_or_default(),
                        "input_schema": tool.parameters_json_schema
                    })
                })
                .collect(),
        )
    }

    fn serialize_tool_choice(&self, choice: &ToolChoice) -> Option<Value> {
        match choice {
            ToolChoice::Auto => Some(json!({"type": "auto"})),
            ToolChoice::None => None,
            ToolChoice::Required => Some(json!({"type": "any"})),
            ToolChoice::Tool(name) => Some(json!({"type": "tool", "name": name})),
        }
    }

    fn new_stream_state(&self) -> Box<dyn CompatStreamState> {
        Box::new(AnthropicStreamState::default())
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage.get("input_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("output_tokens").and_then(Value::as_u64),
        total_tokens: match (
            usage.get("input_tokens").and_then(Value::as_u64),
            usage.get("output_tokens").and_then(Value::as_u64),
        ) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        },
        reasoning_tokens: None,
        cached_tokens: usage.get("cache_read_input_tokens").and_then(Value::as_u64),
        audio_tokens: None,
        cost: None,
    }
}

// ============================================================================
// Streaming state machine (block-indexed)
// ============================================================================

struct PendingBlock {
    call_id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct AnthropicStreamState {
    /// content block index -> in-progress tool_use
    blocks: HashMap<u64, PendingBlock>,
    completed: Vec<ToolCall>,
    text: String,
    thinking: String,
    signature: String,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    finished_with_tool_calls: bool,
}

impl AnthropicStreamState {
    fn flush_message_state(&mut self) {
        self.blocks.clear();
    }
}

impl CompatStreamState for AnthropicStreamState {
    fn on_chunk(&mut self, chunk: &Value) -> StreamParse {
        let mut events = Vec::new();

        match chunk.get("type").and_then(Value::as_str) {
            Some("message_start") => self.flush_message_state(),
            Some("content_block_start") => {
                let index = chunk.get("index").and_then(Value::as_u64).unwrap_or(0);
                let block = &chunk["content_block"];
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let call_id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    events.push(LlmStreamEvent::Tool {
                        event: ToolEvent::Start {
                            call_id: call_id.clone(),
                            name: name.clone(),
                        },
                    });
                    self.blocks.insert(
                        index,
                        PendingBlock {
                            call_id,
                            name,
                            arguments: String::new(),
                        },
                    );
                }
            }
            Some("content_block_delta") => {
                let index = chunk.get("index").and_then(Value::as_u64).unwrap_or(0);
                let delta = &chunk["delta"];
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            self.text.push_str(text);
                            events.push(LlmStreamEvent::delta(text));
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                            self.thinking.push_str(text);
                            events.push(LlmStreamEvent::Reasoning {
                                text: text.to_string(),
                                metadata: None,
                            });
                        }
                    }
                    Some("signature_delta") => {
                        if let Some(sig) = delta.get("signature").and_then(Value::as_str) {
                            self.signature.push_str(sig);
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                            if let Some(block) = self.blocks.get_mut(&index) {
                                block.arguments.push_str(partial);
                                events.push(LlmStreamEvent::Tool {
                                    event: ToolEvent::ArgumentsDelta {
                                        call_id: block.call_id.clone(),
                                        arguments_delta: partial.to_string(),
                                    },
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                let index = chunk.get("index").and_then(Value::as_u64).unwrap_or(0);
                if let Some(block) = self.blocks.remove(&index) {
                    events.push(LlmStreamEvent::Tool {
                        event: ToolEvent::End {
                            call_id: block.call_id.clone(),
                            name: block.name.clone(),
                            arguments: block.arguments.clone(),
                        },
                    });
                    self.completed.push(ToolCall::new(
                        block.call_id,
                        block.name,
                        parse_arguments(&block.arguments),
                    ));
                }
            }
            Some("message_delta") => {
                if let Some(reason) = chunk
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                {
                    let normalized = FinishReason::normalize(reason);
                    if normalized == FinishReason::ToolCalls && !self.completed.is_empty() {
                        self.finished_with_tool_calls = true;
                    }
                    self.finish_reason = Some(normalized);
                }
                if let Some(usage) = chunk.get("usage") {
                    let usage = parse_usage(usage);
                    if !usage.is_empty() {
                        self.usage = Some(usage.clone());
                        events.push(LlmStreamEvent::Usage { usage });
                    }
                }
            }
            Some("message_stop") => self.flush_message_state(),
            // ping and unknown event types are ignored
            _ => {}
        }

        StreamParse {
            events,
            finished_with_tool_calls: self.finished_with_tool_calls,
        }
    }

    fn finish(&mut self) -> StreamFinal {
        let reasoning = if self.thinking.is_empty() && self.signature.is_empty() {
            None
        } else {
            let mut reasoning = Reasoning::new(std::mem::take(&mut self.thinking));
            if !self.signature.is_empty() {
                reasoning.metadata =
                    Some(json!({"signature": std::mem::take(&mut self.signature)}));
            }
            Some(reasoning)
        };
        StreamFinal {
            text: std::mem::take(&mut self.text),
            tool_calls: std::mem::take(&mut self.completed),
            reasoning,
            usage: self.usage.take(),
            finish_reason: self.finish_reason.take(),
        }
    }
}
