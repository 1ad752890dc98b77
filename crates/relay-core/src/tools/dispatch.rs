// Tool route dispatcher
//
// Selects a route for each tool call and invokes it. Selection order:
// configured routes (first match wins), then the virtual MCP route for
// server-qualified names, then the built-in vector_search handler when the
// spec exposes it. Every invocation runs under a timeout; hitting it is a
// fatal ToolExecutionError (which the loop then converts into a
// tool-result payload like any other tool failure).

use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::retrieval::mcp::McpManager;
use crate::retrieval::vector::{matches_to_value, VectorManager};
use crate::spec::{VectorContext, VectorQuery};
use crate::tools::routes::{select_route, InvokeSpec, ProcessRoute};
use crate::tools::{ModuleHandlerRegistry, ToolContext};

/// Default per-tool timeout when the route declares none
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Routes tool calls to their invocation targets
pub struct ToolDispatcher {
    routes: Arc<Vec<ProcessRoute>>,
    modules: ModuleHandlerRegistry,
    mcp: Option<Arc<McpManager>>,
    vector: Option<Arc<VectorManager>>,
    vector_context: Option<VectorContext>,
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(routes: Arc<Vec<ProcessRoute>>, modules: ModuleHandlerRegistry) -> Self {
        Self {
            routes,
            modules,
            mcp: None,
            vector: None,
            vector_context: None,
            client: reqwest::Client::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_mcp(mut self, mcp: Arc<McpManager>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn with_vector(mut self, vector: Arc<VectorManager>, context: VectorContext) -> Self {
        self.vector = Some(vector);
        self.vector_context = Some(context);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Invoke the tool named in `ctx` (by original name) and return its
    /// structured result
    pub async fn dispatch(&self, ctx: &ToolContext) -> Result<Value> {
        if let Some(route) = select_route(&self.routes, &ctx.tool) {
            debug!(tool = %ctx.tool, route = %route.id, "dispatching via configured route");
            let timeout = route
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout);
            return self.invoke_with_timeout(timeout, self.invoke(route, ctx)).await;
        }

        // Virtual MCP route for <server>.<tool> / <server>_<tool>
        if let Some(mcp) = &self.mcp {
            if mcp.resolve_qualified(&ctx.tool).is_some() {
                debug!(tool = %ctx.tool, "dispatching via virtual MCP route");
                return self
                    .invoke_with_timeout(
                        self.default_timeout,
                        mcp.call_tool(None, &ctx.tool, &ctx.arguments),
                    )
                    .await;
            }
        }

        // Built-in vector_search
        if let (Some(vector), Some(context)) = (&self.vector, &self.vector_context) {
            if context.exposes_tool() && ctx.tool == context.tool_name {
                return self
                    .invoke_with_timeout(
                        self.default_timeout,
                        self.invoke_vector_search(vector, context, ctx),
                    )
                    .await;
            }
        }

        Err(GatewayError::tool(format!(
            "no route matches tool {}",
            ctx.tool
        )))
    }

    async fn invoke_with_timeout<F>(&self, timeout: Duration, fut: F) -> Result<Value>
    where
        F: std::future::Future<Output = Result<Value>>,
    {
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| GatewayError::tool(format!("tool timed out after {timeout:?}")))?
    }

    async fn invoke(&self, route: &ProcessRoute, ctx: &ToolContext) -> Result<Value> {
        match &route.invoke {
            InvokeSpec::Module { handler } => self.invoke_module(handler, ctx).await,
            InvokeSpec::Http { url, headers } => self.invoke_http(url, headers, ctx).await,
            InvokeSpec::Command { command, args, env } => {
                self.invoke_command(command, args, env, ctx).await
            }
            InvokeSpec::Mcp { server } => {
                let mcp = self
                    .mcp
                    .as_ref()
                    .ok_or_else(|| GatewayError::tool("MCP route configured but no MCP manager"))?;
                mcp.call_tool(server.as_deref(), &ctx.tool, &ctx.arguments)
                    .await
                    .map_err(|e| GatewayError::tool(e.to_string()))
            }
        }
    }

    async fn invoke_module(&self, handler: &str, ctx: &ToolContext) -> Result<Value> {
        let module = self
            .modules
            .get(handler)
            .ok_or_else(|| GatewayError::tool(format!("unknown module handler: {handler}")))?;
        let result = module.handle(ctx).await?;
        // Non-object results are wrapped so every tool result is addressable
        Ok(match result {
            Value::Object(_) => result,
            other => json!({"result": other}),
        })
    }

    async fn invoke_http(
        &self,
        url: &str,
        headers: &std::collections::HashMap<String, String>,
        ctx: &ToolContext,
    ) -> Result<Value> {
        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .json(ctx)
            .send()
            .await
            .map_err(|e| GatewayError::tool(format!("http tool request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::tool(format!(
                "http tool returned {status}: {body}"
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| GatewayError::tool(format!("http tool returned invalid JSON: {e}")))
    }

    async fn invoke_command(
        &self,
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        ctx: &ToolContext,
    ) -> Result<Value> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::tool(format!("failed to spawn {command}: {e}")))?;

        let mut input = serde_json::to_string(ctx)
            .map_err(|e| GatewayError::tool(format!("context serialization failed: {e}")))?;
        input.push('\n');

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::tool("command stdin unavailable"))?;
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| GatewayError::tool(format!("stdin write failed: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GatewayError::tool(format!("command wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::tool(format!(
                "{command} exited with {}: {stderr}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(stdout.trim())
            .map_err(|e| GatewayError::tool(format!("{command} produced invalid JSON: {e}")))
    }

    async fn invoke_vector_search(
        &self,
        vector: &VectorManager,
        context: &VectorContext,
        ctx: &ToolContext,
    ) -> Result<Value> {
        let query_text = ctx
            .arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::tool("vector_search requires a query string"))?;
        let top_k = ctx
            .arguments
            .get("topK")
            .and_then(Value::as_u64)
            .or(context.top_k);
        let query = VectorQuery {
            text: Some(query_text.to_string()),
            vector: None,
            top_k,
            filter: None,
        };

        let matches = match ctx.arguments.get("store").and_then(Value::as_str) {
            Some(store) => vector.query_store(store, &query).await,
            None => vector.query(&query).await,
        }
        .map_err(|e| GatewayError::tool(e.to_string()))?;

        Ok(matches_to_value(&matches))
    }
}
