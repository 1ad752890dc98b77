// Tool loop
//
// Drives the assistant <-> tool <-> assistant cycle within a single run.
// Each round: append the assistant turn, execute its tool calls
// (sequentially by default, joined in parallel when enabled), append the
// tool messages, prune history, and call the provider again. The budget
// caps total tool calls; once it rejects, remaining calls get
// budget-exhausted payloads and, when enabled, a synthetic final prompt
// forces one concluding text-only turn with the tool set cleared.
//
// Tool failures of any shape become tool-result payloads the model can
// observe; they never abort the loop.

use futures::future::join_all;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::budget::ToolCallBudget;
use crate::compat::{Compat, CompatRequest};
use crate::error::Result;
use crate::events::{LlmStreamEvent, ToolEvent};
use crate::message::{ContentPart, Message, ToolCall, ToolChoice};
use crate::provider::{ProviderManager, ProviderManifest};
use crate::prune::{prune_reasoning, prune_tool_results};
use crate::response::LlmResponse;
use crate::settings::{ProviderSettings, RuntimeSettings};
use crate::tools::dispatch::ToolDispatcher;
use crate::tools::{DiscoveredTools, ToolContext, ToolProgress};

/// Synthetic user message appended once the budget is exhausted
pub const FINAL_PROMPT_TEXT: &str =
    "All tool calls have been consumed. Provide your final answer using the information gathered so far.";

/// Countdown notice appended to tool messages when enabled
pub fn countdown_text(used: u32, max: u32, remaining: u32) -> String {
    format!("Tool calls used {used} of {max} - {remaining} remaining.")
}

/// One executed (or rejected) tool call, ready to become a tool message
struct CallResult {
    call_id: String,
    original: String,
    value: Value,
    is_error: bool,
}

/// Outcome of one round of tool execution
struct RoundOutcome {
    /// The budget rejected at least one call this round
    rejected: bool,
}

/// Everything one loop run needs, borrowed for the duration of the run
pub struct ToolLoop<'a> {
    pub manager: &'a ProviderManager,
    pub manifest: &'a ProviderManifest,
    pub compat: &'a dyn Compat,
    pub dispatcher: &'a ToolDispatcher,
    pub discovered: &'a DiscoveredTools,
    pub settings: &'a ProviderSettings,
    pub runtime: &'a RuntimeSettings,
    pub extras: &'a Map<String, Value>,
    pub model: &'a str,
}

impl<'a> ToolLoop<'a> {
    fn new_budget(&self) -> ToolCallBudget {
        ToolCallBudget::new(self.runtime.max_tool_iterations)
    }

    fn request<'m>(
        &'m self,
        messages: &'m [Message],
        with_tools: bool,
        streaming: bool,
    ) -> (CompatRequest<'m>, &'m [crate::message::UnifiedTool]) {
        static NO_TOOLS: &[crate::message::UnifiedTool] = &[];
        static CHOICE: ToolChoice = ToolChoice::Auto;
        let tools: &[crate::message::UnifiedTool] = if with_tools {
            &self.discovered.tools
        } else {
            NO_TOOLS
        };
        (
            CompatRequest {
                model: self.model,
                system: None,
                messages,
                settings: self.settings,
                tools,
                tool_choice: &CHOICE,
                streaming,
            },
            tools,
        )
    }

    /// Append the assistant turn a response (or stream aggregate) produced
    fn push_assistant_message(&self, messages: &mut Vec<Message>, response: &LlmResponse) {
        let mut msg = Message {
            role: crate::message::Role::Assistant,
            content: response.content.clone(),
            name: None,
            tool_calls: response.tool_calls.clone(),
            tool_call_id: None,
            // Carried so providers that require signed reasoning keep
            // working across turns
            reasoning: response.reasoning.clone(),
        };
        if msg.content.is_empty() && !msg.has_tool_calls() {
            msg.content.push(ContentPart::text(""));
        }
        messages.push(msg);
    }

    /// Execute one round of tool calls and append the tool messages.
    async fn execute_round(
        &self,
        messages: &mut Vec<Message>,
        calls: &[ToolCall],
        budget: &mut ToolCallBudget,
        events: Option<&mpsc::Sender<LlmStreamEvent>>,
        tool_results: &mut Vec<Value>,
    ) -> RoundOutcome {
        let total = calls.len();
        let mut rejected = false;
        let mut results: Vec<CallResult> = Vec::with_capacity(total);

        // Budget is consumed in invocation order regardless of execution
        // mode; calls past the rejection point all get exhausted payloads
        let mut admitted: Vec<(&ToolCall, Option<ToolProgress>)> = Vec::new();
        for call in calls.iter() {
            if rejected || !budget.consume(1) {
                rejected = true;
                results.push(CallResult {
                    call_id: call.id.clone(),
                    original: self.discovered.original_name(&call.name).to_string(),
                    value: json!({"error": "tool_call_budget_exhausted"}),
                    is_error: true,
                });
                continue;
            }
            // Progress counters are omitted entirely on unbounded budgets
            let progress = budget.max_calls().map(|max| ToolProgress {
                tool_call_number: budget.used(),
                tool_call_total: max,
                tool_calls_remaining: budget.remaining().unwrap_or(0),
                final_tool_call: budget.remaining() == Some(0),
            });
            admitted.push((call, progress));
        }

        let executed = if self.runtime.parallel_tool_execution {
            // Launch together, join; sibling errors do not cancel anything
            join_all(
                admitted
                    .iter()
                    .map(|(call, progress)| self.execute_call(call, *progress)),
            )
            .await
        } else {
            let mut out = Vec::with_capacity(admitted.len());
            for (call, progress) in &admitted {
                out.push(self.execute_call(call, *progress).await);
            }
            out
        };

        // Merge executed + rejected back into invocation order
        let mut merged: Vec<CallResult> = executed;
        merged.extend(results);
        merged.sort_by_key(|r| {
            calls
                .iter()
                .position(|c| c.id == r.call_id)
                .unwrap_or(usize::MAX)
        });

        for result in merged {
            tool_results.push(json!({
                "tool": result.original,
                "callId": result.call_id,
                "result": result.value,
                "isError": result.is_error,
            }));

            if let Some(tx) = events {
                let _ = tx
                    .send(LlmStreamEvent::Tool {
                        event: ToolEvent::Result {
                            call_id: result.call_id.clone(),
                            tool: result.original.clone(),
                            result: result.value.clone(),
                            is_error: result.is_error,
                        },
                    })
                    .await;
            }

            messages.push(self.tool_message(result, budget));
        }

        RoundOutcome { rejected }
    }

    /// Invoke one admitted call via the dispatcher, converting any failure
    /// shape into an observable tool-result payload
    async fn execute_call(&self, call: &ToolCall, progress: Option<ToolProgress>) -> CallResult {
        let original = self.discovered.original_name(&call.name).to_string();
        let ctx = ToolContext {
            tool: original.clone(),
            wire_name: call.name.clone(),
            call_id: call.id.clone(),
            arguments: call.arguments.clone(),
            progress,
        };

        match self.dispatcher.dispatch(&ctx).await {
            Ok(value) => CallResult {
                call_id: call.id.clone(),
                original,
                value,
                is_error: false,
            },
            Err(e) => {
                debug!(tool = %original, error = %e, "tool execution failed");
                CallResult {
                    call_id: call.id.clone(),
                    original: original.clone(),
                    value: json!({
                        "error": "tool_execution_failed",
                        "message": e.to_string(),
                        "tool": original,
                    }),
                    is_error: true,
                }
            }
        }
    }

    /// Build the tool message for one call result: stringified text (with
    /// truncation), optional countdown, and the structured tool_result part
    fn tool_message(&self, result: CallResult, budget: &ToolCallBudget) -> Message {
        let stringified = match &result.value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        };

        let mut parts = Vec::new();
        match self.runtime.tool_result_max_chars {
            Some(limit) if stringified.chars().count() > limit => {
                let mut truncated: String = stringified.chars().take(limit).collect();
                truncated.push('…');
                parts.push(ContentPart::text(truncated));
                parts.push(ContentPart::text(format!(
                    "[Result truncated to {limit} characters]"
                )));
            }
            _ => parts.push(ContentPart::text(stringified)),
        }

        parts.push(ContentPart::ToolResult {
            tool_name: result.original,
            result: result.value,
            is_error: result.is_error.then_some(true),
        });

        if self.runtime.countdown_enabled {
            if let (Some(max), Some(remaining)) = (budget.max_calls(), budget.remaining()) {
                parts.push(ContentPart::text(countdown_text(
                    budget.used(),
                    max,
                    remaining,
                )));
            }
        }

        Message::tool_result(result.call_id, parts)
    }

    fn prune(&self, messages: &mut [Message]) {
        prune_tool_results(messages, self.runtime.preserve_tool_results);
        prune_reasoning(messages, self.runtime.preserve_reasoning);
    }

    /// Annotate the final response with the accumulated tool results
    fn finalize(&self, mut response: LlmResponse, tool_results: Vec<Value>) -> LlmResponse {
        if !tool_results.is_empty() {
            let raw = response.raw.take().unwrap_or_else(|| json!({}));
            let mut raw = match raw {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("response".to_string(), other);
                    map
                }
            };
            raw.insert("toolResults".to_string(), Value::Array(tool_results));
            response.raw = Some(Value::Object(raw));
        }
        response
    }

    // ========================================================================
    // Non-streaming loop
    // ========================================================================

    /// Drive the loop starting from an initial response that carries tool
    /// calls. Returns the concluding response.
    pub async fn run(
        &self,
        messages: &mut Vec<Message>,
        initial: LlmResponse,
    ) -> Result<LlmResponse> {
        let mut budget = self.new_budget();
        let mut tool_results = Vec::new();
        let mut last = initial;

        loop {
            let calls = match &last.tool_calls {
                Some(calls) if !calls.is_empty() => calls.clone(),
                _ => return Ok(self.finalize(last, tool_results)),
            };

            self.push_assistant_message(messages, &last);
            let outcome = self
                .execute_round(messages, &calls, &mut budget, None, &mut tool_results)
                .await;
            self.prune(messages);

            if outcome.rejected || budget.exhausted() {
                if self.runtime.final_prompt_enabled {
                    messages.push(Message::user(FINAL_PROMPT_TEXT));
                    let (request, _) = self.request(messages, false, false);
                    let response = self
                        .manager
                        .execute(self.manifest, self.compat, &request, self.extras.clone())
                        .await?;
                    return Ok(self.finalize(response, tool_results));
                }
                if outcome.rejected {
                    // Budget rejected mid-round: no further provider calls
                    return Ok(self.finalize(last, tool_results));
                }
            }

            let (request, _) = self.request(messages, true, false);
            last = self
                .manager
                .execute(self.manifest, self.compat, &request, self.extras.clone())
                .await?;
        }
    }

    // ========================================================================
    // Streaming loop
    // ========================================================================

    /// Drive streaming rounds, forwarding every canonical event into `tx`.
    /// The first provider stream is opened inside; the loop restarts
    /// streaming after each tool round until a round produces no calls.
    pub async fn run_streaming(
        &self,
        messages: &mut Vec<Message>,
        tx: &mpsc::Sender<LlmStreamEvent>,
    ) -> Result<()> {
        let mut budget = self.new_budget();
        let mut tool_results = Vec::new();
        let mut with_tools = true;
        let mut concluding = false;

        loop {
            let (request, _) = self.request(messages, with_tools, true);
            let mut stream = self
                .manager
                .execute_streaming(self.manifest, self.compat, &request, self.extras.clone())
                .await?;

            while let Some(event) = stream.next_event().await {
                if tx.send(event).await.is_err() {
                    // Consumer went away; dropping the stream cancels the
                    // provider read without awaiting it
                    return Ok(());
                }
            }
            let fin = stream.finish().await?;

            if fin.tool_calls.is_empty() || concluding {
                return Ok(());
            }

            // Materialize the assistant turn from the stream aggregates
            let mut response = LlmResponse::new(&self.manifest.id, self.model);
            if !fin.text.is_empty() {
                response.content.push(ContentPart::text(&fin.text));
            }
            response.tool_calls = Some(fin.tool_calls.clone());
            response.reasoning = fin.reasoning.clone();
            self.push_assistant_message(messages, &response);

            let outcome = self
                .execute_round(
                    messages,
                    &fin.tool_calls,
                    &mut budget,
                    Some(tx),
                    &mut tool_results,
                )
                .await;
            self.prune(messages);

            if outcome.rejected || budget.exhausted() {
                if self.runtime.final_prompt_enabled {
                    messages.push(Message::user(FINAL_PROMPT_TEXT));
                    with_tools = false;
                    concluding = true;
                    continue;
                }
                if outcome.rejected {
                    return Ok(());
                }
                // Budget exactly spent: one concluding streamed turn
                concluding = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::tools::routes::ProcessRoute;
    use crate::tools::{ModuleHandler, ModuleHandlerRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    // A provider double: serves a queue of canned chat-completions
    // responses, one per request, and counts requests.
    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<Value>>,
        requests: Arc<AtomicUsize>,
        bodies: Arc<std::sync::Mutex<Vec<Value>>>,
    }

    impl Respond for ScriptedProvider {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            self.bodies.lock().unwrap().push(body);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.is_empty() {
                json!({"choices": [{"message": {"content": "fallback"}, "finish_reason": "stop"}]})
            } else {
                responses.remove(0)
            };
            ResponseTemplate::new(200).set_body_json(next)
        }
    }

    fn tool_call_response(id: &str, name: &str, args: Value) -> Value {
        json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": serde_json::to_string(&args).unwrap()
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })
    }

    fn text_response(text: &str) -> Value {
        json!({
            "choices": [{
                "message": {"content": text},
                "finish_reason": "stop"
            }]
        })
    }

    struct EchoHandler;

    #[async_trait]
    impl ModuleHandler for EchoHandler {
        async fn handle(&self, ctx: &ToolContext) -> Result<Value> {
            Ok(json!({"result": ctx.arguments.get("text").cloned().unwrap_or(Value::Null)}))
        }
    }

    /// Handler that records concurrent executions
    struct ConcurrencyProbe {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        output: String,
    }

    #[async_trait]
    impl ModuleHandler for ConcurrencyProbe {
        async fn handle(&self, _ctx: &ToolContext) -> Result<Value> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(self.output))
        }
    }

    struct Fixture {
        _server: MockServer,
        manifest: ProviderManifest,
        manager: ProviderManager,
        dispatcher: ToolDispatcher,
        discovered: DiscoveredTools,
        requests: Arc<AtomicUsize>,
        bodies: Arc<std::sync::Mutex<Vec<Value>>>,
        _tmp: tempfile::TempDir,
    }

    async fn fixture(responses: Vec<Value>, modules: ModuleHandlerRegistry) -> Fixture {
        let server = MockServer::start().await;
        let requests = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(std::sync::Mutex::new(Vec::new()));
        Mock::given(method("POST"))
            .respond_with(ScriptedProvider {
                responses: std::sync::Mutex::new(responses),
                requests: requests.clone(),
                bodies: bodies.clone(),
            })
            .mount(&server)
            .await;

        let manifest: ProviderManifest = serde_json::from_value(json!({
            "id": "scripted",
            "compat": "openai-chat",
            "endpoint": {"urlTemplate": format!("{}/v1/chat", server.uri())}
        }))
        .unwrap();

        let routes: Arc<Vec<ProcessRoute>> = Arc::new(
            serde_json::from_value(json!([{
                "id": "echo",
                "match": {"type": "prefix", "pattern": "echo"},
                "invoke": {"kind": "module", "handler": "echo"}
            }, {
                "id": "probe",
                "match": {"type": "prefix", "pattern": "probe"},
                "invoke": {"kind": "module", "handler": "probe"}
            }]))
            .unwrap(),
        );

        let mut discovered = DiscoveredTools::default();
        discovered.tools = vec![
            crate::message::UnifiedTool::new("echo_text", json!({"type": "object"})),
            crate::message::UnifiedTool::new("probe_a", json!({"type": "object"})),
            crate::message::UnifiedTool::new("probe_b", json!({"type": "object"})),
        ];
        discovered
            .tool_name_map
            .insert("echo_text".to_string(), "echo.text".to_string());
        discovered
            .tool_name_map
            .insert("probe_a".to_string(), "probe.a".to_string());
        discovered
            .tool_name_map
            .insert("probe_b".to_string(), "probe.b".to_string());

        let tmp = tempfile::tempdir().unwrap();
        Fixture {
            manifest,
            manager: ProviderManager::new().with_log_root(tmp.path()),
            dispatcher: ToolDispatcher::new(routes, modules),
            discovered,
            requests,
            bodies,
            _server: server,
            _tmp: tmp,
        }
    }

    fn runtime(v: Value) -> RuntimeSettings {
        RuntimeSettings::from_map(v.as_object().unwrap())
    }

    fn echo_modules() -> ModuleHandlerRegistry {
        let mut modules = ModuleHandlerRegistry::new();
        modules.register("echo", Arc::new(EchoHandler));
        modules
    }

    async fn run_loop(
        fixture: &Fixture,
        runtime_settings: &RuntimeSettings,
        initial: LlmResponse,
        messages: &mut Vec<Message>,
    ) -> LlmResponse {
        let settings = ProviderSettings::default();
        let extras = Map::new();
        let compat = crate::compat::builtin("openai-chat").unwrap();
        let tool_loop = ToolLoop {
            manager: &fixture.manager,
            manifest: &fixture.manifest,
            compat: compat.as_ref(),
            dispatcher: &fixture.dispatcher,
            discovered: &fixture.discovered,
            settings: &settings,
            runtime: runtime_settings,
            extras: &extras,
            model: "gpt-test",
        };
        tool_loop.run(messages, initial).await.unwrap()
    }

    fn initial_with_call(id: &str, name: &str, args: Value) -> LlmResponse {
        let mut response = LlmResponse::new("scripted", "gpt-test");
        response.tool_calls = Some(vec![ToolCall::new(id, name, args)]);
        response
    }

    #[tokio::test]
    async fn single_tool_cycle_returns_final_answer() {
        let fixture = fixture(vec![text_response("Final answer")], echo_modules()).await;
        let runtime_settings = runtime(json!({"maxToolIterations": 2}));
        let mut messages = vec![Message::user("Please call tools")];

        let result = run_loop(
            &fixture,
            &runtime_settings,
            initial_with_call("call-1", "echo_text", json!({"text": "hi"})),
            &mut messages,
        )
        .await;

        assert_eq!(result.first_text(), Some("Final answer"));
        let tool_results = result.raw.as_ref().unwrap()["toolResults"]
            .as_array()
            .unwrap();
        assert_eq!(tool_results[0]["tool"], "echo.text");
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 1);

        // History: user, assistant (tool calls), tool result
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn zero_budget_with_final_prompt_makes_exactly_one_more_call_without_tools() {
        let fixture = fixture(vec![text_response("Concluded")], echo_modules()).await;
        let runtime_settings = runtime(json!({
            "maxToolIterations": 0,
            "toolFinalPromptEnabled": true
        }));
        let mut messages = vec![Message::user("go")];

        let result = run_loop(
            &fixture,
            &runtime_settings,
            initial_with_call("call-1", "echo_text", json!({"text": "hi"})),
            &mut messages,
        )
        .await;

        assert_eq!(result.first_text(), Some("Concluded"));
        // One provider call from the loop (the initial call happened
        // before the loop)
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 1);

        // The follow-up request carried no tools
        let bodies = fixture.bodies.lock().unwrap();
        assert!(bodies[0].get("tools").is_none());

        // Final prompt user message present
        let final_prompt = messages
            .iter()
            .find(|m| m.role == Role::User && m.first_text() == Some(FINAL_PROMPT_TEXT));
        assert!(final_prompt.is_some());

        // The tool message carries the budget-exhausted payload
        let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
        let has_exhausted = tool_msg.content.iter().any(|p| {
            matches!(
                p,
                ContentPart::ToolResult { result, .. }
                    if result["error"] == "tool_call_budget_exhausted"
            )
        });
        assert!(has_exhausted);
    }

    #[tokio::test]
    async fn budget_cap_limits_provider_requests() {
        // Provider always asks for another tool call; with max 2 the loop
        // must stop after max + 1 requests from the loop's perspective
        let fixture = fixture(
            vec![
                tool_call_response("call-2", "echo_text", json!({"text": "b"})),
                tool_call_response("call-3", "echo_text", json!({"text": "c"})),
                tool_call_response("call-4", "echo_text", json!({"text": "d"})),
            ],
            echo_modules(),
        )
        .await;
        let runtime_settings = runtime(json!({"maxToolIterations": 2}));
        let mut messages = vec![Message::user("go")];

        let result = run_loop(
            &fixture,
            &runtime_settings,
            initial_with_call("call-1", "echo_text", json!({"text": "a"})),
            &mut messages,
        )
        .await;

        // initial(external) + round1 follow-up + round2 follow-up = 2 loop calls
        assert_eq!(fixture.requests.load(Ordering::SeqCst), 2);
        // The last response still carries its unexecuted call; its tool
        // message records the exhaustion
        assert!(result.has_tool_calls());
        let exhausted_count = messages
            .iter()
            .filter(|m| {
                m.role == Role::Tool
                    && m.content.iter().any(|p| {
                        matches!(
                            p,
                            ContentPart::ToolResult { result, .. }
                                if result["error"] == "tool_call_budget_exhausted"
                        )
                    })
            })
            .count();
        assert_eq!(exhausted_count, 1);
    }

    #[tokio::test]
    async fn parallel_execution_truncates_and_overlaps() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut modules = ModuleHandlerRegistry::new();
        modules.register(
            "probe",
            Arc::new(ConcurrencyProbe {
                current: current.clone(),
                peak: peak.clone(),
                output: "X".repeat(40),
            }),
        );

        let fixture = fixture(vec![text_response("done")], modules).await;
        let runtime_settings = runtime(json!({
            "parallelToolExecution": true,
            "toolResultMaxChars": 8,
            "maxToolIterations": 5
        }));
        let mut messages = vec![Message::user("go")];

        let mut initial = LlmResponse::new("scripted", "gpt-test");
        initial.tool_calls = Some(vec![
            ToolCall::new("call-a", "probe_a", json!({})),
            ToolCall::new("call-b", "probe_b", json!({})),
        ]);

        run_loop(&fixture, &runtime_settings, initial, &mut messages).await;

        assert!(peak.load(Ordering::SeqCst) >= 2, "tools must overlap");

        let tool_messages: Vec<&Message> =
            messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_messages.len(), 2);
        for msg in tool_messages {
            let first_text = msg.first_text().unwrap();
            assert!(first_text.ends_with('…'));
            assert!(first_text.chars().count() <= 9);
            let has_marker = msg
                .content
                .iter()
                .filter_map(|p| p.as_text())
                .any(|t| t.to_lowercase().contains("truncated"));
            assert!(has_marker);
        }
    }

    #[tokio::test]
    async fn tool_errors_become_observable_results() {
        // No route matches "ghost_tool", so dispatch fails; the loop must
        // convert that into a tool message and keep going
        let fixture = fixture(vec![text_response("recovered")], echo_modules()).await;
        let runtime_settings = runtime(json!({"maxToolIterations": 3}));
        let mut messages = vec![Message::user("go")];

        let result = run_loop(
            &fixture,
            &runtime_settings,
            initial_with_call("call-1", "ghost_tool", json!({})),
            &mut messages,
        )
        .await;

        assert_eq!(result.first_text(), Some("recovered"));
        let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
        let payload = tool_msg
            .content
            .iter()
            .find_map(|p| match p {
                ContentPart::ToolResult { result, .. } => Some(result),
                _ => None,
            })
            .unwrap();
        assert_eq!(payload["error"], "tool_execution_failed");
        assert_eq!(payload["tool"], "ghost_tool");
    }

    #[tokio::test]
    async fn countdown_text_appended_when_enabled() {
        let fixture = fixture(vec![text_response("ok")], echo_modules()).await;
        let runtime_settings = runtime(json!({
            "maxToolIterations": 3,
            "toolCountdownEnabled": "yes"
        }));
        let mut messages = vec![Message::user("go")];

        run_loop(
            &fixture,
            &runtime_settings,
            initial_with_call("call-1", "echo_text", json!({"text": "hi"})),
            &mut messages,
        )
        .await;

        let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
        let countdown = tool_msg
            .content
            .iter()
            .filter_map(|p| p.as_text())
            .find(|t| t.starts_with("Tool calls used"));
        assert_eq!(countdown, Some("Tool calls used 1 of 3 - 2 remaining."));
    }

    #[tokio::test]
    async fn pruning_between_rounds_respects_preserve_policy() {
        let fixture = fixture(
            vec![
                tool_call_response("call-2", "echo_text", json!({"text": "two"})),
                tool_call_response("call-3", "echo_text", json!({"text": "three"})),
                text_response("done"),
            ],
            echo_modules(),
        )
        .await;
        let runtime_settings = runtime(json!({
            "maxToolIterations": 10,
            "preserveToolResults": 1
        }));
        let mut messages = vec![Message::user("go")];

        run_loop(
            &fixture,
            &runtime_settings,
            initial_with_call("call-1", "echo_text", json!({"text": "one"})),
            &mut messages,
        )
        .await;

        let redacted: Vec<bool> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| {
                m.content.iter().any(|p| {
                    matches!(
                        p,
                        ContentPart::ToolResult { result, .. }
                            if result.get("redacted") == Some(&json!(true))
                    )
                })
            })
            .collect();
        assert_eq!(redacted.len(), 3);
        // All but the last cycle redacted
        assert_eq!(redacted, vec![true, true, false]);
    }
}
