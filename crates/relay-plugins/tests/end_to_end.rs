// End-to-end: plugin registry + coordinator against a mock provider
//
// Exercises the laziness contract (a providers-only spec loads nothing
// else) and the full tool cycle through manifests loaded from disk.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use relay_core::error::Result;
use relay_core::provider::ProviderManager;
use relay_core::spec::LlmCallSpec;
use relay_core::tools::{ModuleHandler, ModuleHandlerRegistry, ToolContext};
use relay_core::Coordinator;
use relay_plugins::PluginRegistry;

struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<Value>>,
    requests: Arc<AtomicUsize>,
}

impl Respond for ScriptedProvider {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        let next = if responses.is_empty() {
            json!({"choices": [{"message": {"content": "fallback"}, "finish_reason": "stop"}]})
        } else {
            responses.remove(0)
        };
        ResponseTemplate::new(200).set_body_json(next)
    }
}

struct EchoHandler;

#[async_trait]
impl ModuleHandler for EchoHandler {
    async fn handle(&self, ctx: &ToolContext) -> Result<Value> {
        Ok(json!({"result": ctx.arguments.get("text").cloned().unwrap_or(Value::Null)}))
    }
}

fn write(dir: &std::path::Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

struct Harness {
    registry: Arc<PluginRegistry>,
    coordinator: Coordinator,
    requests: Arc<AtomicUsize>,
    _server: MockServer,
    _plugins: tempfile::TempDir,
    _logs: tempfile::TempDir,
}

async fn harness(responses: Vec<Value>) -> Harness {
    let server = MockServer::start().await;
    let requests = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .respond_with(ScriptedProvider {
            responses: std::sync::Mutex::new(responses),
            requests: requests.clone(),
        })
        .mount(&server)
        .await;

    let plugins = tempfile::tempdir().unwrap();
    write(
        plugins.path(),
        "providers/mock.yaml",
        &format!(
            "id: mock\ncompat: openai-chat\nendpoint:\n  urlTemplate: \"{}/v1/chat/completions\"\nretryWords: [\"rate limit\"]\n",
            server.uri()
        ),
    );
    write(
        plugins.path(),
        "tools/echo.yaml",
        "name: echo.text\ndescription: Echo text\nparametersJsonSchema:\n  type: object\n  properties:\n    text:\n      type: string\n",
    );
    write(
        plugins.path(),
        "routes/default.yaml",
        "- id: echo\n  match:\n    type: prefix\n    pattern: \"echo\"\n  invoke:\n    kind: module\n    handler: echo\n",
    );

    let registry = Arc::new(PluginRegistry::new(plugins.path()));
    let mut modules = ModuleHandlerRegistry::new();
    modules.register("echo", Arc::new(EchoHandler));

    let logs = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::new(registry.clone(), modules)
        .with_manager(ProviderManager::new().with_log_root(logs.path()));

    Harness {
        registry,
        coordinator,
        requests,
        _server: server,
        _plugins: plugins,
        _logs: logs,
    }
}

fn spec(v: Value) -> LlmCallSpec {
    serde_json::from_value(v).unwrap()
}

fn tool_call_response_named(id: &str, name: &str, args: Value) -> Value {
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

#[tokio::test]
async fn provider_only_spec_loads_no_other_category() {
    let harness = harness(vec![json!({
        "choices": [{"message": {"content": "Hello"}, "finish_reason": "stop"}]
    })])
    .await;

    let response = harness
        .coordinator
        .run(spec(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "llmPriority": [{"provider": "mock", "model": "gpt-test"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.first_text(), Some("Hello"));
    assert!(harness.registry.providers_loaded());
    assert!(harness.registry.compat_modules_loaded());
    assert!(!harness.registry.tools_loaded());
    assert!(!harness.registry.mcp_servers_loaded());
    assert!(!harness.registry.vector_stores_loaded());
    assert!(!harness.registry.process_routes_loaded());
}

#[tokio::test]
async fn single_tool_cycle_through_manifests() {
    let harness = harness(vec![
        json!({
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
            }]
        }),
        json!({
            "choices": [{"message": {"content": "Final answer"}, "finish_reason": "stop"}]
        }),
    ])
    .await;

    let response = harness
        .coordinator
        .run(spec(json!({
            "messages": [{"role": "user", "content": "Please call tools"}],
            "llmPriority": [{"provider": "mock", "model": "gpt-test"}],
            "functionToolNames": ["echo.text"],
            "settings": {"maxToolIterations": 2}
        })))
        .await
        .unwrap();

    assert_eq!(response.first_text(), Some("Final answer"));
    let tool_results = response.raw.as_ref().unwrap()["toolResults"]
        .as_array()
        .unwrap();
    assert_eq!(tool_results[0]["tool"], "echo.text");
    assert_eq!(tool_results[0]["result"]["result"], "hi");

    assert_eq!(harness.requests.load(Ordering::SeqCst), 2);
    assert!(harness.registry.tools_loaded());
    assert!(harness.registry.process_routes_loaded());
    assert!(!harness.registry.mcp_servers_loaded());
}

#[tokio::test]
async fn unknown_provider_is_a_validation_failure() {
    let harness = harness(vec![]).await;
    let err = harness
        .coordinator
        .run(spec(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "llmPriority": [{"provider": "ghost", "model": "m"}]
        })))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown provider: ghost"));
}

#[tokio::test]
async fn budget_exhaustion_with_final_prompt_end_to_end() {
    let harness = harness(vec![
        json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call-1",
                        "type": "function",
                        "function": {"name": "echo_text", "arguments": "{\"text\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }),
        json!({
            "choices": [{"message": {"content": "Wrapped up"}, "finish_reason": "stop"}]
        }),
    ])
    .await;

    let response = harness
        .coordinator
        .run(spec(json!({
            "messages": [{"role": "user", "content": "go"}],
            "llmPriority": [{"provider": "mock", "model": "gpt-test"}],
            "functionToolNames": ["echo.text"],
            "settings": {"maxToolIterations": 0, "toolFinalPromptEnabled": true}
        })))
        .await
        .unwrap();

    // Exactly two provider calls: the initial one and the final prompt
    assert_eq!(harness.requests.load(Ordering::SeqCst), 2);
    assert_eq!(response.first_text(), Some("Wrapped up"));
    let tool_results = response.raw.as_ref().unwrap()["toolResults"]
        .as_array()
        .unwrap();
    assert_eq!(
        tool_results[0]["result"]["error"],
        "tool_call_budget_exhausted"
    );
}

#[tokio::test]
async fn vector_context_alone_exposes_the_builtin_search_route() {
    // No vectorPriority: the tool must still be discovered and its route
    // must still resolve; the storeless query fails as a tool error the
    // model can observe, not as route-not-found
    let harness = harness(vec![
        tool_call_response_named("call-1", "vector_search", json!({"query": "docs"})),
        json!({
            "choices": [{"message": {"content": "No stores available"}, "finish_reason": "stop"}]
        }),
    ])
    .await;

    let response = harness
        .coordinator
        .run(spec(json!({
            "messages": [{"role": "user", "content": "search please"}],
            "llmPriority": [{"provider": "mock", "model": "gpt-test"}],
            "vectorContext": {"mode": "tool"},
            "settings": {"maxToolIterations": 2}
        })))
        .await
        .unwrap();

    assert_eq!(response.first_text(), Some("No stores available"));
    let tool_results = response.raw.as_ref().unwrap()["toolResults"]
        .as_array()
        .unwrap();
    assert_eq!(tool_results[0]["tool"], "vector_search");
    assert_eq!(tool_results[0]["result"]["error"], "tool_execution_failed");
    let message = tool_results[0]["result"]["message"].as_str().unwrap();
    assert!(
        message.contains("no vector stores configured"),
        "expected the built-in route to answer, got: {message}"
    );
    assert!(!message.contains("no route matches"));
    // Vector manifests were never needed for this spec
    assert!(!harness.registry.vector_stores_loaded());
}

#[tokio::test]
async fn streaming_tool_cycle_emits_ordered_events() {
    // Two scripted SSE streams: the first ends in a tool call, the second
    // streams the concluding text
    struct SseScript {
        bodies: std::sync::Mutex<Vec<String>>,
    }
    impl Respond for SseScript {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let mut bodies = self.bodies.lock().unwrap();
            let body = if bodies.is_empty() {
                "data: [DONE]\n\n".to_string()
            } else {
                bodies.remove(0)
            };
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body)
        }
    }

    let first_stream = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call-1\",\"function\":{\"name\":\"echo_text\",\"arguments\":\"{\\\"text\\\":\\\"hi\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: [DONE]\n\n",
    )
    .to_string();
    let second_stream = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Fin\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"al\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    )
    .to_string();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(SseScript {
            bodies: std::sync::Mutex::new(vec![first_stream, second_stream]),
        })
        .mount(&server)
        .await;

    let plugins = tempfile::tempdir().unwrap();
    write(
        plugins.path(),
        "providers/mock.yaml",
        &format!(
            "id: mock\ncompat: openai-chat\nendpoint:\n  urlTemplate: \"{}/v1/chat\"\n",
            server.uri()
        ),
    );
    write(
        plugins.path(),
        "tools/echo.yaml",
        "name: echo.text\nparametersJsonSchema:\n  type: object\n",
    );
    write(
        plugins.path(),
        "routes/default.yaml",
        "- id: echo\n  match:\n    type: prefix\n    pattern: \"echo\"\n  invoke:\n    kind: module\n    handler: echo\n",
    );

    let registry = Arc::new(PluginRegistry::new(plugins.path()));
    let mut modules = ModuleHandlerRegistry::new();
    modules.register("echo", Arc::new(EchoHandler));
    let logs = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(
        Coordinator::new(registry, modules)
            .with_manager(ProviderManager::new().with_log_root(logs.path())),
    );

    let mut rx = coordinator
        .stream(spec(json!({
            "messages": [{"role": "user", "content": "go"}],
            "llmPriority": [{"provider": "mock", "model": "gpt-test"}],
            "functionToolNames": ["echo.text"],
            "settings": {"maxToolIterations": 2}
        })))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(serde_json::to_value(&event).unwrap());
    }

    let phases: Vec<String> = events
        .iter()
        .filter(|e| e["type"] == "tool")
        .map(|e| e["phase"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        phases,
        vec!["start", "arguments_delta", "end", "result"],
        "tool lifecycle must be ordered: {events:?}"
    );

    let result_event = events
        .iter()
        .find(|e| e["type"] == "tool" && e["phase"] == "result")
        .unwrap();
    assert_eq!(result_event["tool"], "echo.text");
    assert_eq!(result_event["result"]["result"], "hi");

    let text: String = events
        .iter()
        .filter(|e| e["type"] == "delta")
        .map(|e| e["text"].as_str().unwrap())
        .collect();
    assert_eq!(text, "Final");

    // No error event anywhere
    assert!(events.iter().all(|e| e["type"] != "error"));
}

#[tokio::test]
async fn per_provider_settings_deep_merge_into_the_payload() {
    let server = MockServer::start().await;
    let bodies: Arc<std::sync::Mutex<Vec<Value>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    struct CaptureBody {
        bodies: Arc<std::sync::Mutex<Vec<Value>>>,
    }
    impl Respond for CaptureBody {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            self.bodies.lock().unwrap().push(body);
            ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]
            }))
        }
    }
    Mock::given(method("POST"))
        .respond_with(CaptureBody {
            bodies: bodies.clone(),
        })
        .mount(&server)
        .await;

    let plugins = tempfile::tempdir().unwrap();
    write(
        plugins.path(),
        "providers/mock.yaml",
        &format!(
            "id: mock\ncompat: openai-chat\nendpoint:\n  urlTemplate: \"{}/v1/chat/completions\"\n",
            server.uri()
        ),
    );
    let registry = Arc::new(PluginRegistry::new(plugins.path()));
    let logs = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::new(registry, ModuleHandlerRegistry::new())
        .with_manager(ProviderManager::new().with_log_root(logs.path()));

    coordinator
        .run(spec(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "llmPriority": [{
                "provider": "mock",
                "model": "gpt-test",
                "settings": {"temperature": 0.9, "reasoning": {"effort": "high"}}
            }],
            "settings": {
                "temperature": 0.1,
                "maxTokens": 64,
                "reasoning": {"enabled": true}
            }
        })))
        .await
        .unwrap();

    let body = bodies.lock().unwrap()[0].clone();
    // Per-provider scalar wins; spec-level keys survive; reasoning merged
    assert_eq!(body["temperature"], json!(0.9));
    assert_eq!(body["max_tokens"], json!(64));
    assert_eq!(body["reasoning"]["enabled"], json!(true));
    assert_eq!(body["reasoning"]["effort"], "high");
}
