// Tool discovery
//
// Assembles the effective tool set for one spec from four sources, in
// order: inline spec tools, registry tools named by functionToolNames,
// MCP server listings, and vector-recommended tools. A built-in
// vector_search tool is synthesized when the spec exposes it.
//
// Deduplication is by original name with earlier sources winning; wire
// names are sanitized last, and the alias map resolves every wire name
// back to its origin.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::message::{ContentPart, Role, UnifiedTool};
use crate::registry::PluginSource;
use crate::retrieval::mcp::McpManager;
use crate::retrieval::vector::VectorManager;
use crate::sanitize::sanitize_tool_name;
use crate::spec::{LlmCallSpec, VectorQuery};
use crate::tools::DiscoveredTools;

/// Build the effective tool set for `spec`
pub async fn discover_tools(
    spec: &LlmCallSpec,
    registry: &dyn PluginSource,
    mcp: Option<&Arc<McpManager>>,
    vector: Option<&Arc<VectorManager>>,
) -> Result<DiscoveredTools> {
    let mut tools: Vec<UnifiedTool> = Vec::new();

    // 1. Inline tools
    tools.extend(spec.tools.iter().cloned());

    // 2. Registry tools; unknown names fail fast
    tools.extend(registry.tools(&spec.function_tool_names).await?);

    // 3. MCP server listings; a broken server is skipped, a server that
    //    lists nothing is dropped from the active set
    let mut active_mcp_servers = Vec::new();
    if let Some(mcp) = mcp {
        for server_id in &spec.mcp_servers {
            match mcp.list_tools(server_id).await {
                Ok(server_tools) if server_tools.is_empty() => {
                    warn!(server = %server_id, "MCP server lists no tools; dropping");
                }
                Ok(server_tools) => {
                    tools.extend(server_tools);
                    active_mcp_servers.push(server_id.clone());
                }
                Err(e) => {
                    warn!(server = %server_id, error = %e, "MCP tool listing failed; skipping server");
                }
            }
        }
    }

    // 4. Vector-recommended tools; failures are recoverable warnings
    if let Some(vector) = vector {
        if !spec.vector_priority.is_empty() {
            if let Some(query_text) = derive_vector_query(spec) {
                let query = VectorQuery {
                    text: Some(query_text),
                    vector: None,
                    top_k: spec.vector_context.as_ref().and_then(|c| c.top_k),
                    filter: None,
                };
                match vector.query(&query).await {
                    Ok(matches) => {
                        for hit in matches {
                            if let Some(tool) = match_as_tool(&hit.payload) {
                                tools.push(tool);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "vector tool discovery failed; continuing without recommendations");
                    }
                }
            }
        }
    }

    // 5. Built-in vector_search: exposed whenever the context asks for it,
    //    whether or not any store resolved
    if let Some(context) = &spec.vector_context {
        if context.exposes_tool() {
            let store_ids = vector.map(|v| v.store_ids()).unwrap_or_default();
            tools.push(vector_search_tool(&context.tool_name, &store_ids));
        }
    }

    // 6. Dedup by original name (earlier sources win), then sanitize
    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut deduped = Vec::new();
    for tool in tools {
        if seen.insert(tool.name.clone(), ()).is_none() {
            deduped.push(tool);
        }
    }

    let mut tool_name_map = HashMap::new();
    let mut wire_tools = Vec::with_capacity(deduped.len());
    for mut tool in deduped {
        let original = tool.name.clone();
        let mut wire_name = sanitize_tool_name(&original);
        if tool_name_map.contains_key(&wire_name) {
            let mut n = 2usize;
            loop {
                let candidate = format!("{wire_name}_{n}");
                if !tool_name_map.contains_key(&candidate) {
                    wire_name = candidate;
                    break;
                }
                n += 1;
            }
        }
        tool_name_map.insert(wire_name.clone(), original);
        tool.name = wire_name;
        wire_tools.push(tool);
    }

    Ok(DiscoveredTools {
        tools: wire_tools,
        tool_name_map,
        mcp_servers: active_mcp_servers,
    })
}

/// Query text for vector recommendation: explicit `metadata.vectorQuery`,
/// else the most recent user text part
fn derive_vector_query(spec: &LlmCallSpec) -> Option<String> {
    if let Some(query) = spec.metadata_str("vectorQuery") {
        return Some(query.to_string());
    }
    spec.messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .find_map(|m| {
            m.content.iter().find_map(|p| match p {
                ContentPart::Text { text } if !text.trim().is_empty() => Some(text.clone()),
                _ => None,
            })
        })
}

/// A vector match that looks like a unified tool becomes one
fn match_as_tool(payload: &Value) -> Option<UnifiedTool> {
    let candidate = payload.get("tool").unwrap_or(payload);
    let name = candidate.get("name")?.as_str()?;
    let schema = candidate
        .get("parametersJsonSchema")
        .or_else(|| candidate.get("parameters"))?
        .clone();
    if !schema.is_object() {
        return None;
    }
    let mut tool = UnifiedTool::new(name, schema);
    if let Some(description) = candidate.get("description").and_then(Value::as_str) {
        tool = tool.with_description(description);
    }
    Some(tool)
}

/// The built-in search tool definition
fn vector_search_tool(name: &str, store_ids: &[String]) -> UnifiedTool {
    let stores = if store_ids.is_empty() {
        "the configured stores".to_string()
    } else {
        store_ids.join(", ")
    };
    UnifiedTool::new(
        name,
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query text"},
                "topK": {"type": "number", "description": "Maximum matches to return"},
                "store": {"type": "string", "description": "Restrict the search to one store"}
            },
            "required": ["query"]
        }),
    )
    .with_description(format!(
        "Semantic search over the connected vector stores: {stores}"
    ))
}
