// OpenAI Chat Completions compat
//
// Translates the unified model to and from the Chat Completions wire
// format. Streaming tool calls are index-first: the first delta for a call
// carries `id` + `index`, later deltas may carry only `index`, and the END
// events are synthesized when `finish_reason = tool_calls` arrives. State
// resets unconditionally on any terminal finish reason so nothing leaks
// across streams.

use serde_json::{json, Map, Value};

use super::{
    extract_reasoning, parse_arguments, Compat, CompatRequest, CompatStreamState, ResponseContext,
    StreamFinal, StreamParse,
};
use crate::error::{GatewayError, Result};
use crate::events::{LlmStreamEvent, ToolEvent};
use crate::message::{ContentPart, DocumentSource, Message, Role, ToolCall, ToolChoice, UnifiedTool};
use crate::response::{FinishReason, LlmResponse, Usage};

/// Chat Completions translator
pub struct OpenAiChatCompat;

impl OpenAiChatCompat {
    fn convert_role(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn convert_part(part: &ContentPart) -> Result<Option<Value>> {
        match part {
            ContentPart::Text { text } => {
                // Empty text parts are rejected by the API
                if text.trim().is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(json!({"type": "text", "text": text})))
                }
            }
            ContentPart::Image { image_url } => Ok(Some(json!({
                "type": "image_url",
                "image_url": {"url": image_url}
            }))),
            ContentPart::Document {
                source,
                mime_type,
                filename,
                ..
            } => match source {
                DocumentSource::Base64 { data } => {
                    let mime = mime_type.as_deref().unwrap_or("application/pdf");
                    Ok(Some(json!({
                        "type": "file",
                        "file": {
                            "filename": filename.clone().unwrap_or_else(|| "document".to_string()),
                            "file_data": format!("data:{mime};base64,{data}")
                        }
                    })))
                }
                DocumentSource::FileId { file_id } => Ok(Some(json!({
                    "type": "file",
                    "file": {"file_id": file_id}
                }))),
                DocumentSource::Url { .. } => Err(GatewayError::compat(
                    "openai-chat does not accept URL document sources; inline the data as base64",
                )),
                DocumentSource::Filepath { .. } => Err(GatewayError::compat(
                    "filepath document sources must be resolved before dispatch",
                )),
            },
            ContentPart::ToolResult { result, .. } => Ok(Some(json!({
                "type": "text",
                "text": serde_json::to_string(result).unwrap_or_default()
            }))),
        }
    }

    fn convert_message(msg: &Message) -> Result<Value> {
        let mut out = Map::new();
        out.insert(
            "role".to_string(),
            Value::String(Self::convert_role(msg.role).to_string()),
        );
        if let Some(name) = &msg.name {
            out.insert("name".to_string(), Value::String(name.clone()));
        }

        match msg.role {
            Role::Tool => {
                if let Some(id) = &msg.tool_call_id {
                    out.insert("tool_call_id".to_string(), Value::String(id.clone()));
                }
                // Tool results travel as plain text content
                out.insert(
                    "content".to_string(),
                    Value::String(msg.joined_text()),
                );
            }
            _ => {
                let only_text = msg
                    .content
                    .iter()
                    .all(|p| matches!(p, ContentPart::Text { .. }));
                if only_text {
                    let text = msg.joined_text();
                    out.insert(
                        "content".to_string(),
                        if text.is_empty() && msg.has_tool_calls() {
                            Value::Null
                        } else {
                            Value::String(text)
                        },
                    );
                } else {
                    let parts: Vec<Value> = msg
                        .content
                        .iter()
                        .map(Self::convert_part)
                        .collect::<Result<Vec<_>>>()?
                        .into_iter()
                        .flatten()
                        .collect();
                    out.insert("content".to_string(), Value::Array(parts));
                }

                if let Some(calls) = &msg.tool_calls {
                    let wire_calls: Vec<Value> = calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::to_string(&tc.arguments)
                                        .unwrap_or_default()
                                }
                            })
                        })
                        .collect();
                    if !wire_calls.is_empty() {
                        out.insert("tool_calls".to_string(), Value::Array(wire_calls));
                    }
                }
            }
        }

        Ok(Value::Object(out))
    }

    fn reasoning_block(request: &CompatRequest<'_>) -> Option<Value> {
        let reasoning = request.settings.reasoning.as_ref()?;
        let mut block = Map::new();
        if reasoning.enabled {
            block.insert("enabled".to_string(), Value::Bool(true));
        }
        if let Some(effort) = &reasoning.effort {
            block.insert("effort".to_string(), Value::String(effort.clone()));
        } else if let Some(budget) = reasoning.budget {
            // Budget applies only when no effort was requested
            block.insert("max_tokens".to_string(), json!(budget));
        }
        if let Some(exclude) = &reasoning.exclude {
            block.insert("exclude".to_string(), exclude.clone());
        }
        if block.is_empty() {
            None
        } else {
            Some(Value::Object(block))
        }
    }
}

impl Compat for OpenAiChatCompat {
    fn id(&self) -> &'static str {
        "openai-chat"
    }

    fn build_payload(&self, request: &CompatRequest<'_>) -> Result<Value> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for msg in request.messages {
            messages.push(Self::convert_message(msg)?);
        }

        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::String(request.model.to_string()));
        payload.insert("messages".to_string(), Value::Array(messages));

        let s = request.settings;
        if let Some(v) = s.temperature {
            payload.insert("temperature".to_string(), json!(v));
        }
        if let Some(v) = s.top_p {
            payload.insert("top_p".to_string(), json!(v));
        }
        if let Some(v) = s.max_tokens {
            payload.insert("max_tokens".to_string(), json!(v));
        }
        if let Some(stop) = &s.stop {
            if !stop.is_empty() {
                payload.insert("stop".to_string(), json!(stop));
            }
        }
        if let Some(format) = &s.response_format {
            payload.insert("response_format".to_string(), format.clone());
        }
        if let Some(v) = s.seed {
            payload.insert("seed".to_string(), json!(v));
        }
        if let Some(v) = s.frequency_penalty {
            payload.insert("frequency_penalty".to_string(), json!(v));
        }
        if let Some(v) = s.presence_penalty {
            payload.insert("presence_penalty".to_string(), json!(v));
        }
        if let Some(bias) = &s.logit_bias {
            payload.insert("logit_bias".to_string(), bias.clone());
        }
        if let Some(v) = s.logprobs {
            payload.insert("logprobs".to_string(), json!(v));
        }
        if let Some(v) = s.top_logprobs {
            payload.insert("top_logprobs".to_string(), json!(v));
        }
        if let Some(reasoning) = Self::reasoning_block(request) {
            payload.insert("reasoning".to_string(), reasoning);
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
        let message = raw
            .pointer("/choices/0/message")
            .ok_or_else(|| GatewayError::compat("response missing choices[0].message"))?;

        let mut response = LlmResponse::new(ctx.provider, ctx.model);

        match message.get("content") {
            Some(Value::String(text)) if !text.is_empty() => {
                response.content.push(ContentPart::text(text));
            }
            Some(Value::Array(parts)) => {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        response.content.push(ContentPart::text(text));
                    }
                }
            }
            _ => {}
        }

        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            let parsed: Vec<ToolCall> = calls
                .iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let function = tc.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments = match function.get("arguments") {
                        Some(Value::String(s)) => parse_arguments(s),
                        Some(v) => v.clone(),
                        None => json!({}),
                    };
                    Some(ToolCall::new(id, name, arguments))
                })
                .collect();
            if !parsed.is_empty() {
                response.tool_calls = Some(parsed);
            }
        }

        response.finish_reason = raw
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(FinishReason::normalize);

        if let Some(usage) = raw.get("usage") {
            response.usage = Some(parse_usage(usage));
        }

        response.reasoning = extract_reasoning(message);
        response.raw = Some(raw);
        Ok(response)
    }

    fn streaming_flags(&self) -> Value {
        json!({"stream": true, "stream_options": {"include_usage": true}})
    }

    fn serialize_tools(&self, tools: &[UnifiedTool]) -> Value {
        Value::Array(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description.clone().unwrap_or_default(),
                            "parameters": tool.parameters_json_schema
                        }
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
            ToolChoice::Tool(name) => Some(json!({
                "type": "function",
                "function": {"name": name}
            })),
        }
    }

    /// Wire-level knobs this API accepts verbatim; anything else stays
    /// unconsumed
    fn apply_provider_extensions(
        &self,
        payload: &mut Value,
        extras: Map<String, Value>,
    ) -> Map<String, Value> {
        const PASSTHROUGH: &[&str] = &["user", "parallel_tool_calls", "service_tier", "store"];
        let mut leftover = Map::new();
        let Some(obj) = payload.as_object_mut() else {
            return extras;
        };
        for (key, value) in extras {
            if PASSTHROUGH.contains(&key.as_str()) {
                obj.insert(key, value);
            } else {
                leftover.insert(key, value);
            }
        }
        leftover
    }

    fn new_stream_state(&self) -> Box<dyn CompatStreamState> {
        Box::new(OpenAiChatStreamState::default())
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
        reasoning_tokens: usage
            .pointer("/completion_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64),
        cached_tokens: usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64),
        audio_tokens: usage
            .pointer("/completion_tokens_details/audio_tokens")
            .and_then(Value::as_u64),
        cost: None,
    }
}

// ============================================================================
// Streaming state machine (index-first)
// ============================================================================

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    ended: bool,
}

#[derive(Default)]
struct OpenAiChatStreamState {
    /// index -> in-progress call; indices are sparse and provider-ordered
    calls: Vec<Option<PendingCall>>,
    completed: Vec<ToolCall>,
    text: String,
    reasoning_text: String,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    finished_with_tool_calls: bool,
}

impl OpenAiChatStreamState {
    fn slot(&mut self, index: usize) -> &mut PendingCall {
        while self.calls.len() <= index {
            self.calls.push(None);
        }
        self.calls[index].get_or_insert_with(PendingCall::default)
    }

    /// Close every open call in index order, emitting END events
    fn close_open_calls(&mut self, events: &mut Vec<LlmStreamEvent>) {
        for slot in self.calls.iter_mut() {
            let Some(call) = slot else { continue };
            if call.ended || call.id.is_empty() {
                continue;
            }
            call.ended = true;
            events.push(LlmStreamEvent::Tool {
                event: ToolEvent::End {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            });
            self.completed.push(ToolCall::new(
                call.id.clone(),
                call.name.clone(),
                parse_arguments(&call.arguments),
            ));
        }
        self.calls.clear();
    }
}

impl CompatStreamState for OpenAiChatStreamState {
    fn on_chunk(&mut self, chunk: &Value) -> StreamParse {
        let mut events = Vec::new();

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            let usage = parse_usage(usage);
            if !usage.is_empty() {
                self.usage = Some(usage.clone());
                events.push(LlmStreamEvent::Usage { usage });
            }
        }

        let Some(choice) = chunk.pointer("/choices/0") else {
            return StreamParse {
                events,
                finished_with_tool_calls: self.finished_with_tool_calls,
            };
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(Value::as_str) {
                if !content.is_empty() {
                    self.text.push_str(content);
                    events.push(LlmStreamEvent::delta(content));
                }
            }

            if let Some(reasoning) = delta
                .get("reasoning")
                .or_else(|| delta.get("reasoning_content"))
                .and_then(Value::as_str)
            {
                if !reasoning.is_empty() {
                    self.reasoning_text.push_str(reasoning);
                    events.push(LlmStreamEvent::Reasoning {
                        text: reasoning.to_string(),
                        metadata: None,
                    });
                }
            }

            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tc in calls {
                    let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                    let slot = self.slot(index);

                    if let Some(id) = tc.get("id").and_then(Value::as_str) {
                        slot.id = id.to_string();
                    }
                    if let Some(name) = tc.pointer("/function/name").and_then(Value::as_str) {
                        let starting = slot.name.is_empty();
                        slot.name.push_str(name);
                        if starting && !slot.id.is_empty() {
                            events.push(LlmStreamEvent::Tool {
                                event: ToolEvent::Start {
                                    call_id: slot.id.clone(),
                                    name: slot.name.clone(),
                                },
                            });
                        }
                    }
                    if let Some(args) = tc.pointer("/function/arguments").and_then(Value::as_str) {
                        if !args.is_empty() {
                            slot.arguments.push_str(args);
                            let call_id = slot.id.clone();
                            events.push(LlmStreamEvent::Tool {
                                event: ToolEvent::ArgumentsDelta {
                                    call_id,
                                    arguments_delta: args.to_string(),
                                },
                            });
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            let normalized = FinishReason::normalize(reason);
            if normalized == FinishReason::ToolCalls {
                self.close_open_calls(&mut events);
                self.finished_with_tool_calls = !self.completed.is_empty();
            } else {
                // Terminal reason without tool calls: drop any half-open
                // state so nothing leaks across streams
                self.calls.clear();
            }
            self.finish_reason = Some(normalized);
        }

        StreamParse {
            events,
            finished_with_tool_calls: self.finished_with_tool_calls,
        }
    }

    fn finish(&mut self) -> StreamFinal {
        let reasoning = if self.reasoning_text.is_empty() {
            None
        } else {
            Some(crate::message::Reasoning::new(std::mem::take(
                &mut self.reasoning_text,
            )))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{partition_settings, ProviderSettings};
    use serde_json::json;

    fn settings(v: Value) -> ProviderSettings {
        partition_settings(v.as_object().unwrap()).provider
    }

    fn request<'a>(
        messages: &'a [Message],
        settings: &'a ProviderSettings,
        tools: &'a [UnifiedTool],
        choice: &'a ToolChoice,
    ) -> CompatRequest<'a> {
        CompatRequest {
            model: "gpt-test",
            system: Some("Be helpful"),
            messages,
            settings,
            tools,
            tool_choice: choice,
            streaming: false,
        }
    }

    #[test]
    fn payload_carries_system_settings_and_tools() {
        let messages = vec![Message::user("hi")];
        let settings = settings(json!({"temperature": 0.3, "maxTokens": 128, "stop": ["END"]}));
        let tools = vec![UnifiedTool::new("echo_text", json!({"type": "object"}))
            .with_description("Echo")];
        let choice = ToolChoice::Auto;

        let payload = OpenAiChatCompat
            .build_payload(&request(&messages, &settings, &tools, &choice))
            .unwrap();

        assert_eq!(payload["model"], "gpt-test");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][0]["content"], "Be helpful");
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(payload["temperature"], json!(0.3));
        assert_eq!(payload["max_tokens"], json!(128));
        assert_eq!(payload["stop"], json!(["END"]));
        assert_eq!(payload["tools"][0]["function"]["name"], "echo_text");
        assert_eq!(payload["tool_choice"], "auto");
    }

    #[test]
    fn reasoning_effort_beats_budget() {
        let messages = vec![Message::user("hi")];
        let s = settings(json!({"reasoning": {"effort": "high", "budget": 2048}}));
        let payload = OpenAiChatCompat
            .build_payload(&request(&messages, &s, &[], &ToolChoice::Auto))
            .unwrap();
        assert_eq!(payload["reasoning"]["effort"], "high");
        assert!(payload["reasoning"].get("max_tokens").is_none());

        let s = settings(json!({"reasoning": {"budget": 2048}}));
        let payload = OpenAiChatCompat
            .build_payload(&request(&messages, &s, &[], &ToolChoice::Auto))
            .unwrap();
        assert_eq!(payload["reasoning"]["max_tokens"], json!(2048));
    }

    #[test]
    fn assistant_tool_calls_round_trip_as_strings() {
        let messages = vec![Message::assistant_with_tools(
            vec![],
            vec![ToolCall::new("call-1", "lookup", json!({"q": "x"}))],
        )];
        let s = ProviderSettings::default();
        let payload = OpenAiChatCompat
            .build_payload(&CompatRequest {
                model: "gpt-test",
                system: None,
                messages: &messages,
                settings: &s,
                tools: &[],
                tool_choice: &ToolChoice::Auto,
                streaming: false,
            })
            .unwrap();
        let call = &payload["messages"][0]["tool_calls"][0];
        assert_eq!(call["function"]["name"], "lookup");
        assert_eq!(call["function"]["arguments"], r#"{"q":"x"}"#);
        assert_eq!(payload["messages"][0]["content"], Value::Null);
    }

    #[test]
    fn url_documents_are_rejected() {
        let messages = vec![Message {
            role: Role::User,
            content: vec![ContentPart::Document {
                source: DocumentSource::Url {
                    url: "https://x/doc.pdf".into(),
                },
                mime_type: None,
                filename: None,
                provider_options: None,
            }],
            name: None,
            tool_calls: None,
            tool_call_id: None,
            reasoning: None,
        }];
        let s = ProviderSettings::default();
        let err = OpenAiChatCompat
            .build_payload(&request(&messages, &s, &[], &ToolChoice::Auto))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Compat(_)));
    }

    #[test]
    fn provider_extensions_pass_known_wire_keys_through() {
        let mut payload = json!({"model": "gpt-test"});
        let mut extras = Map::new();
        extras.insert("user".to_string(), json!("caller-7"));
        extras.insert("mystery".to_string(), json!(true));

        let leftover = OpenAiChatCompat.apply_provider_extensions(&mut payload, extras);
        assert_eq!(payload["user"], "caller-7");
        assert_eq!(leftover.len(), 1);
        assert!(leftover.contains_key("mystery"));
    }

    #[test]
    fn parse_response_extracts_tool_calls_and_usage() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call-1",
                        "type": "function",
                        "function": {"name": "echo_text", "arguments": "{\"text\":\"hi\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 11, "completion_tokens": 4, "total_tokens": 15}
        });
        let response = OpenAiChatCompat
            .parse_response(
                raw,
                &ResponseContext {
                    provider: "openai",
                    model: "gpt-test",
                },
            )
            .unwrap();
        let calls = response.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "echo_text");
        assert_eq!(calls[0].arguments, json!({"text": "hi"}));
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, Some(15));
        assert!(response.raw.is_some());
    }

    // ─── Streaming ───────────────────────────────────────────────────────

    fn tool_events(parse: &StreamParse) -> Vec<&ToolEvent> {
        parse
            .events
            .iter()
            .filter_map(|e| match e {
                LlmStreamEvent::Tool { event } => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn index_first_stream_synthesizes_end_on_finish() {
        let mut state = OpenAiChatStreamState::default();

        let parse = state.on_chunk(&json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call-1",
                "function": {"name": "lookup", "arguments": ""}
            }]}}]
        }));
        assert!(matches!(
            tool_events(&parse)[0],
            ToolEvent::Start { call_id, name } if call_id == "call-1" && name == "lookup"
        ));

        // Later deltas carry only the index
        let parse = state.on_chunk(&json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "{\"q\":\"rust\"}"}
            }]}}]
        }));
        assert!(matches!(
            tool_events(&parse)[0],
            ToolEvent::ArgumentsDelta { call_id, .. } if call_id == "call-1"
        ));

        let parse = state.on_chunk(&json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }));
        assert!(parse.finished_with_tool_calls);
        assert!(matches!(
            tool_events(&parse)[0],
            ToolEvent::End { call_id, arguments, .. }
                if call_id == "call-1" && arguments == "{\"q\":\"rust\"}"
        ));

        let fin = state.finish();
        assert_eq!(fin.tool_calls.len(), 1);
        assert_eq!(fin.tool_calls[0].arguments, json!({"q": "rust"}));
        assert_eq!(fin.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn terminal_stop_resets_half_open_state() {
        let mut state = OpenAiChatStreamState::default();
        state.on_chunk(&json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call-x", "function": {"name": "t", "arguments": "{"}
            }]}}]
        }));
        let parse = state.on_chunk(&json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}]
        }));
        assert!(!parse.finished_with_tool_calls);
        let fin = state.finish();
        assert!(fin.tool_calls.is_empty());
        assert_eq!(fin.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn text_and_usage_accumulate() {
        let mut state = OpenAiChatStreamState::default();
        state.on_chunk(&json!({"choices": [{"delta": {"content": "Hello "}}]}));
        state.on_chunk(&json!({"choices": [{"delta": {"content": "world"}}]}));
        state.on_chunk(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}));
        let parse = state.on_chunk(&json!({
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }));
        assert!(matches!(parse.events[0], LlmStreamEvent::Usage { .. }));

        let fin = state.finish();
        assert_eq!(fin.text, "Hello world");
        assert_eq!(fin.usage.unwrap().total_tokens, Some(7));
    }
}
