// OpenAI Responses compat (SDK-style)
//
// The Responses family is SDK-only: `build_payload` fails with a clear
// error and the exchange goes through `SdkCompat`, which owns its own
// request construction. The provider manager dispatches here whenever
// `sdk()` returns Some.
//
// Streaming is item-id keyed: tool calls open via
// `response.output_item.added {type: function_call}`, argument deltas and
// done events reference `item_id` (not `call_id`), and the stream reports
// finished-with-tool-calls on `response.completed` iff any call was seen.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::{
    parse_arguments, Compat, CompatRequest, CompatStreamState, ResponseContext, SdkCompat,
    StreamFinal, StreamParse,
};
use crate::error::{GatewayError, Result};
use crate::events::{LlmStreamEvent, ToolEvent};
use crate::message::{ContentPart, Reasoning, Role, ToolCall, ToolChoice, UnifiedTool};
use crate::provider::ProviderManifest;
use crate::response::{FinishReason, LlmResponse, Usage};

/// Responses API translator
pub struct OpenAiResponsesCompat;

impl OpenAiResponsesCompat {
    /// Request body for both call and stream paths
    fn build_request_body(request: &CompatRequest<'_>) -> Result<Value> {
        let mut input = Vec::new();

        for msg in request.messages {
            match msg.role {
                Role::Assistant => {
                    let text = msg.joined_text();
                    if !text.is_empty() {
                        input.push(json!({
                            "role": "assistant",
                            "content": [{"type": "output_text", "text": text}]
                        }));
                    }
                    if let Some(calls) = &msg.tool_calls {
                        for tc in calls {
                            input.push(json!({
                                "type": "function_call",
                                "call_id": tc.id,
                                "name": tc.name,
                                "arguments": serde_json::to_string(&tc.arguments)
                                    .unwrap_or_default()
                            }));
                        }
                    }
                }
                Role::Tool => {
                    let call_id = msg.tool_call_id.clone().ok_or_else(|| {
                        GatewayError::compat("tool message without toolCallId")
                    })?;
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": msg.joined_text()
                    }));
                }
                _ => {
                    let role = if msg.role == Role::System { "system" } else { "user" };
                    let parts: Vec<Value> = msg
                        .content
                        .iter()
                        .filter_map(|part| match part {
                            ContentPart::Text { text } if !text.trim().is_empty() => {
                                Some(json!({"type": "input_text", "text": text}))
                            }
                            ContentPart::Image { image_url } => Some(json!({
                                "type": "input_image",
                                "image_url": image_url
                            })),
                            _ => None,
                        })
                        .collect();
                    if !parts.is_empty() {
                        input.push(json!({"role": role, "content": parts}));
                    }
                }
            }
        }

        let mut body = Map::new();
        body.insert("model".to_string(), json!(request.model));
        body.insert("input".to_string(), Value::Array(input));
        if let Some(system) = request.system {
            body.insert("instructions".to_string(), json!(system));
        }
        if let Some(v) = request.settings.temperature {
            body.insert("temperature".to_string(), json!(v));
        }
        if let Some(v) = request.settings.top_p {
            body.insert("top_p".to_string(), json!(v));
        }
        if let Some(v) = request.settings.max_tokens {
            body.insert("max_output_tokens".to_string(), json!(v));
        }
        // Only effort crosses over; enabled/budget/exclude have no wire form here
        if let Some(reasoning) = &request.settings.reasoning {
            if let Some(effort) = &reasoning.effort {
                body.insert("reasoning".to_string(), json!({"effort": effort}));
            }
        }
        if !request.tools.is_empty() {
            body.insert(
                "tools".to_string(),
                OpenAiResponsesCompat.serialize_tools(request.tools),
            );
            if let Some(choice) =
                OpenAiResponsesCompat.serialize_tool_choice(request.tool_choice)
            {
                body.insert("tool_choice".to_string(), choice);
            }
        }

        Ok(Value::Object(body))
    }

    fn parse_response_body(raw: Value, ctx: &ResponseContext<'_>) -> Result<LlmResponse> {
        let output = raw
            .get("output")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::compat("response missing output items"))?;

        let mut response = LlmResponse::new(ctx.provider, ctx.model);
        let mut tool_calls = Vec::new();

        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    if let Some(parts) = item.get("content").and_then(Value::as_array) {
                        for part in parts {
                            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                                if let Some(text) = part.get("text").and_then(Value::as_str) {
                                    response.content.push(ContentPart::text(text));
                                }
                            }
                        }
                    }
                }
                Some("function_call") => {
                    let id = item
                        .get("call_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let arguments = match item.get("arguments") {
                        Some(Value::String(s)) => parse_arguments(s),
                        Some(v) => v.clone(),
                        None => json!({}),
                    };
                    tool_calls.push(ToolCall::new(id, name, arguments));
                }
                Some("reasoning") => {
                    let text = item
                        .pointer("/summary/0/text")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if !text.is_empty() {
                        response.reasoning = Some(Reasoning::new(text));
                    }
                }
                _ => {}
            }
        }

        let finished_with_tools = !tool_calls.is_empty();
        if finished_with_tools {
            response.tool_calls = Some(tool_calls);
        }
        response.finish_reason = Some(if finished_with_tools {
            FinishReason::ToolCalls
        } else {
            match raw.get("status").and_then(Value::as_str) {
                Some("incomplete") => FinishReason::Length,
                _ => FinishReason::Stop,
            }
        });
        if let Some(usage) = raw.get("usage") {
            response.usage = Some(parse_usage(usage));
        }
        response.raw = Some(raw);
        Ok(response)
    }
}

impl Compat for OpenAiResponsesCompat {
    fn id(&self) -> &'static str {
        "openai-responses"
    }

    fn build_payload(&self, _request: &CompatRequest<'_>) -> Result<Value> {
        Err(GatewayError::compat(
            "openai-responses is an SDK-style compat; the provider manager must use the SDK call path",
        ))
    }

    fn parse_response(&self, raw: Value, ctx: &ResponseContext<'_>) -> Result<LlmResponse> {
        Self::parse_response_body(raw, ctx)
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
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description.clone().unwrap_or_default(),
                        "parameters": tool.parameters_json_schema
                    })
                })
                .collect(),
        )
    }

    fn serialize_tool_choice(&self, choice: &ToolChoice) -> Option<Value> {
        match choice {
            ToolChoice::Auto => Some(json!("auto")),
            ToolChoice::None => Some(json!("none")),
            ToolChoice::Required => Some(json!("required")),
            ToolChoice::Tool(name) => Some(json!({"type": "function", "name": name})),
        }
    }

    fn new_stream_state(&self) -> Box<dyn CompatStreamState> {
        Box::new(ResponsesStreamState::default())
    }

    fn sdk(&self) -> Option<&dyn SdkCompat> {
        Some(self)
    }
}

#[async_trait]
impl SdkCompat for OpenAiResponsesCompat {
    async fn call(
        &self,
        client: &reqwest::Client,
        manifest: &ProviderManifest,
        request: &CompatRequest<'_>,
    ) -> Result<(LlmResponse, Value)> {
        let body = Self::build_request_body(request)?;
        let url = manifest.endpoint.url(request.model);

        let mut http = client.post(&url);
        for (name, value) in &manifest.endpoint.headers {
            http = http.header(name, value);
        }
        let response = http
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("request failed: {e}"), false, None))?;

        let status = response.status();
        let raw: Value = if status.is_success() {
            response.json().await.map_err(|e| {
                GatewayError::provider(format!("invalid response body: {e}"), false, None)
            })?
        } else {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::provider(
                format!("responses API error ({status}): {text}"),
                crate::provider::scan_rate_limit(&manifest.retry_words, &text, ""),
                Some(status.as_u16()),
            ));
        };

        let parsed = Self::parse_response_body(
            raw.clone(),
            &ResponseContext {
                provider: &manifest.id,
                model: request.model,
            },
        )?;
        Ok((parsed, body))
    }

    fn streaming_request(
        &self,
        manifest: &ProviderManifest,
        request: &CompatRequest<'_>,
    ) -> Result<(String, Value)> {
        let mut body = Self::build_request_body(request)?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".to_string(), json!(true));
        }
        Ok((manifest.endpoint.streaming_url(request.model), body))
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage.get("input_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("output_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
        reasoning_tokens: usage
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64),
        cached_tokens: usage
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_u64),
        audio_tokens: None,
        cost: None,
    }
}

// ============================================================================
// Streaming state machine (item-id keyed)
// ============================================================================

struct PendingItem {
    call_id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct ResponsesStreamState {
    /// item_id -> in-progress function call
    items: HashMap<String, PendingItem>,
    completed: Vec<ToolCall>,
    text: String,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    finished_with_tool_calls: bool,
}

impl CompatStreamState for ResponsesStreamState {
    fn on_chunk(&mut self, chunk: &Value) -> StreamParse {
        let mut events = Vec::new();

        match chunk.get("type").and_then(Value::as_str) {
            Some("response.output_text.delta") => {
                if let Some(delta) = chunk.get("delta").and_then(Value::as_str) {
                    self.text.push_str(delta);
                    events.push(LlmStreamEvent::delta(delta));
                }
            }
            Some("response.output_item.added") => {
                let item = &chunk["item"];
                if item.get("type").and_then(Value::as_str) == Some("function_call") {
                    let item_id = item
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let call_id = item
                        .get("call_id")
                        .and_then(Value::as_str)
                        .unwrap_or(&item_id)
                        .to_string();
                    let name = item
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
                    self.items.insert(
                        item_id,
                        PendingItem {
                            call_id,
                            name,
                            arguments: String::new(),
                        },
                    );
                }
            }
            Some("response.function_call_arguments.delta") => {
                let item_id = chunk
                    .get("item_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if let Some(item) = self.items.get_mut(item_id) {
                    if let Some(delta) = chunk.get("delta").and_then(Value::as_str) {
                        item.arguments.push_str(delta);
                        events.push(LlmStreamEvent::Tool {
                            event: ToolEvent::ArgumentsDelta {
                                call_id: item.call_id.clone(),
                                arguments_delta: delta.to_string(),
                            },
                        });
                    }
                }
            }
            Some("response.function_call_arguments.done") => {
                let item_id = chunk
                    .get("item_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if let Some(mut item) = self.items.remove(item_id) {
                    // The done event carries the authoritative buffer
                    if let Some(full) = chunk.get("arguments").and_then(Value::as_str) {
                        item.arguments = full.to_string();
                    }
                    events.push(LlmStreamEvent::Tool {
                        event: ToolEvent::End {
                            call_id: item.call_id.clone(),
                            name: item.name.clone(),
                            arguments: item.arguments.clone(),
                        },
                    });
                    self.completed.push(ToolCall::new(
                        item.call_id,
                        item.name,
                        parse_arguments(&item.arguments),
                    ));
                }
            }
            Some("response.completed") => {
                self.finished_with_tool_calls = !self.completed.is_empty();
                self.finish_reason = Some(if self.finished_with_tool_calls {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                });
                if let Some(usage) = chunk.pointer("/response/usage") {
                    let usage = parse_usage(usage);
                    if !usage.is_empty() {
                        self.usage = Some(usage.clone());
                        events.push(LlmStreamEvent::Usage { usage });
                    }
                }
                self.items.clear();
            }
            _ => {}
        }

        StreamParse {
            events,
            finished_with_tool_calls: self.finished_with_tool_calls,
        }
    }

    fn finish(&mut self) -> StreamFinal {
        StreamFinal {
            text: std::mem::take(&mut self.text),
            tool_calls: std::mem::take(&mut self.completed),
            reasoning: None,
            usage: self.usage.take(),
            finish_reason: self.finish_reason.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::settings::ProviderSettings;
    use serde_json::json;

    #[test]
    fn build_payload_is_sdk_only() {
        let messages = vec![Message::user("hi")];
        let s = ProviderSettings::default();
        let err = OpenAiResponsesCompat
            .build_payload(&CompatRequest {
                model: "gpt-test",
                system: None,
                messages: &messages,
                settings: &s,
                tools: &[],
                tool_choice: &ToolChoice::Auto,
                streaming: false,
            })
            .unwrap_err();
        assert!(err.to_string().contains("SDK"));
        assert!(OpenAiResponsesCompat.sdk().is_some());
    }

    #[test]
    fn request_body_maps_roles_and_tool_outputs() {
        let messages = vec![
            Message::user("question"),
            Message::assistant_with_tools(
                vec![ContentPart::text("calling")],
                vec![ToolCall::new("call-1", "lookup", json!({"q": 1}))],
            ),
            Message::tool_result("call-1", vec![ContentPart::text("result text")]),
        ];
        let s = ProviderSettings::default();
        let body = OpenAiResponsesCompat::build_request_body(&CompatRequest {
            model: "gpt-test",
            system: Some("sys"),
            messages: &messages,
            settings: &s,
            tools: &[],
            tool_choice: &ToolChoice::Auto,
            streaming: false,
        })
        .unwrap();

        assert_eq!(body["instructions"], "sys");
        let input = body["input"].as_array().unwrap();
        assert_eq!(input[0]["role"], "user");
        assert_eq!(input[1]["content"][0]["type"], "output_text");
        assert_eq!(input[2]["type"], "function_call");
        assert_eq!(input[2]["call_id"], "call-1");
        assert_eq!(input[3]["type"], "function_call_output");
        assert_eq!(input[3]["output"], "result text");
    }

    #[test]
    fn item_id_stream_keys_deltas_by_item_not_call() {
        let mut state = ResponsesStreamState::default();

        state.on_chunk(&json!({
            "type": "response.output_item.added",
            "item": {"type": "function_call", "id": "item-9", "call_id": "call-1", "name": "t"}
        }));
        // Delta references item_id, never call_id
        let parse = state.on_chunk(&json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item-9",
            "delta": "{\"k\":"
        }));
        assert!(matches!(
            &parse.events[0],
            LlmStreamEvent::Tool { event: ToolEvent::ArgumentsDelta { call_id, .. } }
                if call_id == "call-1"
        ));

        let parse = state.on_chunk(&json!({
            "type": "response.function_call_arguments.done",
            "item_id": "item-9",
            "arguments": "{\"k\":2}"
        }));
        assert!(matches!(
            &parse.events[0],
            LlmStreamEvent::Tool { event: ToolEvent::End { call_id, arguments, .. } }
                if call_id == "call-1" && arguments == "{\"k\":2}"
        ));

        let parse = state.on_chunk(&json!({
            "type": "response.completed",
            "response": {"usage": {"input_tokens": 3, "output_tokens": 2, "total_tokens": 5}}
        }));
        assert!(parse.finished_with_tool_calls);

        let fin = state.finish();
        assert_eq!(fin.tool_calls[0].arguments, json!({"k": 2}));
        assert_eq!(fin.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(fin.usage.unwrap().total_tokens, Some(5));
    }

    #[test]
    fn completed_without_calls_is_a_plain_stop() {
        let mut state = ResponsesStreamState::default();
        state.on_chunk(&json!({"type": "response.output_text.delta", "delta": "Hi"}));
        let parse = state.on_chunk(&json!({"type": "response.completed", "response": {}}));
        assert!(!parse.finished_with_tool_calls);
        let fin = state.finish();
        assert_eq!(fin.text, "Hi");
        assert_eq!(fin.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn parse_response_collects_output_items() {
        let raw = json!({
            "status": "completed",
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "Answer"}]},
                {"type": "function_call", "call_id": "call-2", "name": "t", "arguments": "{\"a\":1}"}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 2, "total_tokens": 3}
        });
        let response = OpenAiResponsesCompat
            .parse_response(
                raw,
                &ResponseContext {
                    provider: "openai-responses",
                    model: "gpt-test",
                },
            )
            .unwrap();
        assert_eq!(response.first_text(), Some("Answer"));
        assert_eq!(response.tool_calls.as_ref().unwrap()[0].id, "call-2");
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
    }
}
