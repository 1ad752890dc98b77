// MCP client pool
//
// Speaks the Model Context Protocol over stdio: each configured server is a
// child process exchanging newline-delimited JSON-RPC. Connections are lazy
// (spawned on first use) and per-server failures stay isolated: discovery
// logs and skips a broken server instead of failing the run.
//
// The protocol subset used here: `initialize`, `notifications/initialized`,
// `tools/list`, `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::message::UnifiedTool;

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "relay";

/// MCP server manifest, loaded from the plugin registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerManifest {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// One live stdio connection
struct McpConnection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl McpConnection {
    async fn spawn(manifest: &McpServerManifest) -> Result<Self> {
        let mut command = Command::new(&manifest.command);
        command
            .args(&manifest.args)
            .envs(&manifest.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &manifest.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            GatewayError::mcp(format!("failed to spawn MCP server {}: {e}", manifest.id))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::mcp("MCP server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::mcp("MCP server stdout unavailable"))?;

        let mut connection = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        };

        connection
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {}
                }),
            )
            .await?;
        connection
            .notify("notifications/initialized", json!({}))
            .await?;

        Ok(connection)
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| GatewayError::mcp(format!("serialize failed: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatewayError::mcp(format!("write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| GatewayError::mcp(format!("flush failed: {e}")))?;
        Ok(())
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    /// Send a request and wait for its response; server-initiated
    /// notifications arriving in between are ignored.
    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await?;

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| GatewayError::mcp(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(GatewayError::mcp("MCP server closed the connection"));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
                debug!("skipping non-JSON line from MCP server");
                continue;
            };
            if message.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = message.get("error") {
                return Err(GatewayError::mcp(format!(
                    "{method} failed: {}",
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                )));
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn close(mut self) {
        let _ = self.child.kill().await;
    }
}

/// Pool of lazily-connected MCP servers
pub struct McpManager {
    manifests: HashMap<String, McpServerManifest>,
    connections: Mutex<HashMap<String, McpConnection>>,
}

impl McpManager {
    pub fn new(manifests: Vec<McpServerManifest>) -> Self {
        Self {
            manifests: manifests.into_iter().map(|m| (m.id.clone(), m)).collect(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Configured server ids
    pub fn server_ids(&self) -> Vec<String> {
        self.manifests.keys().cloned().collect()
    }

    /// Issue one JSON-RPC request on a (lazily spawned) server connection.
    /// A failed exchange leaves the connection in an unknown state, so it
    /// is dropped and the next call reconnects.
    async fn request_on(&self, server_id: &str, method: &str, params: Value) -> Result<Value> {
        let manifest = self
            .manifests
            .get(server_id)
            .ok_or_else(|| GatewayError::mcp(format!("unknown MCP server: {server_id}")))?;

        let mut connections = self.connections.lock().await;
        if !connections.contains_key(server_id) {
            let connection = McpConnection::spawn(manifest).await?;
            connections.insert(server_id.to_string(), connection);
        }
        let connection = connections
            .get_mut(server_id)
            .expect("connection just inserted");

        let result = connection.request(method, params).await;
        if result.is_err() {
            if let Some(stale) = connections.remove(server_id) {
                stale.close().await;
            }
        }
        result
    }

    /// List the tools one server offers
    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<UnifiedTool>> {
        let result = self.request_on(server_id, "tools/list", json!({})).await?;

        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name")?.as_str()?;
                let mut unified = UnifiedTool::new(
                    // Server-qualified so the virtual MCP route can find it
                    format!("{server_id}.{name}"),
                    tool.get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object"})),
                );
                if let Some(description) = tool.get("description").and_then(Value::as_str) {
                    unified = unified.with_description(description);
                }
                Some(unified)
            })
            .collect())
    }

    /// Invoke a tool. `tool_name` may be server-qualified
    /// (`<server>.<tool>` or `<server>_<tool>`); an explicit `server`
    /// overrides the prefix.
    pub async fn call_tool(
        &self,
        server: Option<&str>,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<Value> {
        let (server_id, bare_name) = match server {
            Some(server_id) => (
                server_id.to_string(),
                self.strip_server_prefix(server_id, tool_name),
            ),
            None => self
                .resolve_qualified(tool_name)
                .ok_or_else(|| {
                    GatewayError::mcp(format!("no MCP server resolves tool {tool_name}"))
                })?,
        };

        let params = json!({"name": bare_name, "arguments": arguments});
        let result = self.request_on(&server_id, "tools/call", params).await?;

        // Prefer structured content; fall back to joined text blocks
        if let Some(structured) = result.get("structuredContent") {
            return Ok(structured.clone());
        }
        if let Some(content) = result.get("content").and_then(Value::as_array) {
            let text: String = content
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                return Ok(parsed);
            }
            return Ok(json!({"result": text}));
        }
        Ok(result)
    }

    fn strip_server_prefix(&self, server_id: &str, tool_name: &str) -> String {
        for separator in ['.', '_'] {
            let prefix = format!("{server_id}{separator}");
            if let Some(bare) = tool_name.strip_prefix(&prefix) {
                return bare.to_string();
            }
        }
        tool_name.to_string()
    }

    /// Resolve `<server>.<tool>` / `<server>_<tool>` against configured ids
    pub fn resolve_qualified(&self, tool_name: &str) -> Option<(String, String)> {
        for server_id in self.manifests.keys() {
            for separator in ['.', '_'] {
                let prefix = format!("{server_id}{separator}");
                if let Some(bare) = tool_name.strip_prefix(&prefix) {
                    return Some((server_id.clone(), bare.to_string()));
                }
            }
        }
        None
    }

    /// Kill every child process
    pub async fn close(&self) {
        let mut connections = self.connections.lock().await;
        for (id, connection) in connections.drain() {
            debug!(server = %id, "closing MCP connection");
            connection.close().await;
        }
    }
}
