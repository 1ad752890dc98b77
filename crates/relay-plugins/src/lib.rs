// Filesystem plugin registry
//
// Implements relay-core's PluginSource over a plugins directory:
//
//   plugins/
//     providers/*.yaml       one provider manifest per file
//     tools/*.yaml           one tool definition per file
//     mcp/*.yaml             one MCP server manifest per file
//     vector-stores/*.yaml   one vector store manifest per file
//     embeddings/*.yaml      one embedding provider manifest per file
//     routes/*.yaml          each file an ordered list of process routes
//
// Every category is lazy and cached: nothing is read until the first
// lookup that needs it, and an empty input set triggers zero loads. The
// per-category `*_loaded` flags expose exactly that contract to tests.

mod loader;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

use relay_core::compat::{self, Compat};
use relay_core::error::{GatewayError, Result};
use relay_core::message::UnifiedTool;
use relay_core::provider::ProviderManifest;
use relay_core::registry::PluginSource;
use relay_core::retrieval::embedding::{
    builtin_embedding_compat, EmbeddingCompat, EmbeddingProviderManifest,
};
use relay_core::retrieval::mcp::McpServerManifest;
use relay_core::retrieval::vector::{builtin_store_compat, VectorStoreCompat, VectorStoreManifest};
use relay_core::tools::routes::ProcessRoute;

use loader::{load_keyed_category, load_route_files};

/// Lazy, cached, filesystem-backed plugin registry
pub struct PluginRegistry {
    root: PathBuf,
    providers: OnceCell<HashMap<String, Arc<ProviderManifest>>>,
    tools: OnceCell<HashMap<String, UnifiedTool>>,
    mcp_servers: OnceCell<HashMap<String, Arc<McpServerManifest>>>,
    vector_stores: OnceCell<HashMap<String, Arc<VectorStoreManifest>>>,
    embeddings: OnceCell<HashMap<String, Arc<EmbeddingProviderManifest>>>,
    routes: OnceCell<Arc<Vec<ProcessRoute>>>,
    compats: OnceCell<HashMap<String, Arc<dyn Compat>>>,
}

impl PluginRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            providers: OnceCell::new(),
            tools: OnceCell::new(),
            mcp_servers: OnceCell::new(),
            vector_stores: OnceCell::new(),
            embeddings: OnceCell::new(),
            routes: OnceCell::new(),
            compats: OnceCell::new(),
        }
    }

    fn dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    // Category load-state flags; the laziness contract tested end-to-end
    pub fn providers_loaded(&self) -> bool {
        self.providers.initialized()
    }

    pub fn tools_loaded(&self) -> bool {
        self.tools.initialized()
    }

    pub fn mcp_servers_loaded(&self) -> bool {
        self.mcp_servers.initialized()
    }

    pub fn vector_stores_loaded(&self) -> bool {
        self.vector_stores.initialized()
    }

    pub fn embeddings_loaded(&self) -> bool {
        self.embeddings.initialized()
    }

    pub fn process_routes_loaded(&self) -> bool {
        self.routes.initialized()
    }

    pub fn compat_modules_loaded(&self) -> bool {
        self.compats.initialized()
    }

    async fn providers(&self) -> Result<&HashMap<String, Arc<ProviderManifest>>> {
        let dir = self.dir("providers");
        self.providers
            .get_or_try_init(|| async move {
                load_keyed_category::<ProviderManifest>(&dir, |m| m.id.clone())
                    .await
                    .map(|map| map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
            })
            .await
    }

    async fn tool_map(&self) -> Result<&HashMap<String, UnifiedTool>> {
        let dir = self.dir("tools");
        self.tools
            .get_or_try_init(|| async move {
                load_keyed_category::<UnifiedTool>(&dir, |t| t.name.clone()).await
            })
            .await
    }

    async fn mcp_map(&self) -> Result<&HashMap<String, Arc<McpServerManifest>>> {
        let dir = self.dir("mcp");
        self.mcp_servers
            .get_or_try_init(|| async move {
                load_keyed_category::<McpServerManifest>(&dir, |m| m.id.clone())
                    .await
                    .map(|map| map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
            })
            .await
    }

    async fn vector_map(&self) -> Result<&HashMap<String, Arc<VectorStoreManifest>>> {
        let dir = self.dir("vector-stores");
        self.vector_stores
            .get_or_try_init(|| async move {
                load_keyed_category::<VectorStoreManifest>(&dir, |m| m.id.clone())
                    .await
                    .map(|map| map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
            })
            .await
    }

    async fn embedding_map(&self) -> Result<&HashMap<String, Arc<EmbeddingProviderManifest>>> {
        let dir = self.dir("embeddings");
        self.embeddings
            .get_or_try_init(|| async move {
                load_keyed_category::<EmbeddingProviderManifest>(&dir, |m| m.id.clone())
                    .await
                    .map(|map| map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
            })
            .await
    }
}

#[async_trait]
impl PluginSource for PluginRegistry {
    async fn provider(&self, id: &str) -> Result<Arc<ProviderManifest>> {
        self.providers().await?.get(id).cloned().ok_or_else(|| {
            GatewayError::plugin(format!("unknown provider: {id} (no manifest in providers/)"))
        })
    }

    async fn tool(&self, name: &str) -> Result<UnifiedTool> {
        self.tool_map().await?.get(name).cloned().ok_or_else(|| {
            GatewayError::plugin(format!("unknown tool: {name} (no manifest in tools/)"))
        })
    }

    async fn tools(&self, names: &[String]) -> Result<Vec<UnifiedTool>> {
        // Zero loads on an empty input set
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let map = self.tool_map().await?;
        names
            .iter()
            .map(|name| {
                map.get(name).cloned().ok_or_else(|| {
                    GatewayError::plugin(format!("unknown tool: {name} (no manifest in tools/)"))
                })
            })
            .collect()
    }

    async fn mcp_servers(&self, ids: &[String]) -> Result<Vec<Arc<McpServerManifest>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let map = self.mcp_map().await?;
        ids.iter()
            .map(|id| {
                map.get(id).cloned().ok_or_else(|| {
                    GatewayError::plugin(format!("unknown MCP server: {id} (no manifest in mcp/)"))
                })
            })
            .collect()
    }

    async fn vector_store(&self, id: &str) -> Result<Arc<VectorStoreManifest>> {
        self.vector_map().await?.get(id).cloned().ok_or_else(|| {
            GatewayError::plugin(format!(
                "unknown vector store: {id} (no manifest in vector-stores/)"
            ))
        })
    }

    async fn vector_store_compat(&self, kind: &str) -> Result<Arc<dyn VectorStoreCompat>> {
        builtin_store_compat(kind)
            .ok_or_else(|| GatewayError::plugin(format!("unknown vector store kind: {kind}")))
    }

    async fn embedding_provider(&self, id: &str) -> Result<Arc<EmbeddingProviderManifest>> {
        self.embedding_map().await?.get(id).cloned().ok_or_else(|| {
            GatewayError::plugin(format!(
                "unknown embedding provider: {id} (no manifest in embeddings/)"
            ))
        })
    }

    async fn embedding_compat(&self, kind: &str) -> Result<Arc<dyn EmbeddingCompat>> {
        builtin_embedding_compat(kind)
            .ok_or_else(|| GatewayError::plugin(format!("unknown embedding kind: {kind}")))
    }

    async fn process_routes(&self) -> Result<Arc<Vec<ProcessRoute>>> {
        let dir = self.dir("routes");
        self.routes
            .get_or_try_init(|| async move { load_route_files(&dir).await.map(Arc::new) })
            .await
            .cloned()
    }

    async fn compat(&self, id: &str) -> Result<Arc<dyn Compat>> {
        let table = self
            .compats
            .get_or_try_init(|| async {
                let mut table: HashMap<String, Arc<dyn Compat>> = HashMap::new();
                for builtin_id in compat::builtin_ids() {
                    if let Some(module) = compat::builtin(builtin_id) {
                        table.insert((*builtin_id).to_string(), module);
                    }
                }
                Ok::<_, GatewayError>(table)
            })
            .await?;
        table
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::plugin(format!("unknown compat module: {id}")))
    }
}

/// Convenience: does the plugins root exist at all
pub fn plugins_root_exists(root: &Path) -> bool {
    root.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn seeded_registry() -> (tempfile::TempDir, PluginRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "providers/openai.yaml",
            r#"
id: openai
compat: openai-chat
endpoint:
  urlTemplate: "https://api.openai.com/v1/chat/completions"
  headers:
    Authorization: "Bearer ${OPENAI_API_KEY}"
retryWords: ["rate limit"]
"#,
        );
        write(
            tmp.path(),
            "tools/echo.yaml",
            r#"
name: echo.text
description: Echo text back
parametersJsonSchema:
  type: object
  properties:
    text:
      type: string
"#,
        );
        write(
            tmp.path(),
            "mcp/kb.yaml",
            r#"
id: kb
command: kb-server
args: ["--stdio"]
"#,
        );
        write(
            tmp.path(),
            "vector-stores/docs.yaml",
            r#"
id: docs
kind: http
endpoint:
  url: "https://vectors.internal/query"
"#,
        );
        write(
            tmp.path(),
            "routes/default.yaml",
            r#"
- id: echo
  match:
    type: prefix
    pattern: "echo."
  invoke:
    kind: module
    handler: echo
- id: remote
  match:
    type: glob
    pattern: "remote.*"
  invoke:
    kind: http
    url: "https://tools.internal/run"
"#,
        );
        let registry = PluginRegistry::new(tmp.path());
        (tmp, registry)
    }

    #[tokio::test]
    async fn provider_lookup_loads_only_providers() {
        let (_tmp, registry) = seeded_registry();

        let manifest = registry.provider("openai").await.unwrap();
        assert_eq!(manifest.compat, "openai-chat");
        assert_eq!(manifest.retry_words, vec!["rate limit"]);

        assert!(registry.providers_loaded());
        assert!(!registry.tools_loaded());
        assert!(!registry.mcp_servers_loaded());
        assert!(!registry.vector_stores_loaded());
        assert!(!registry.process_routes_loaded());
        assert!(!registry.compat_modules_loaded());
    }

    #[tokio::test]
    async fn empty_inputs_trigger_zero_loads() {
        let (_tmp, registry) = seeded_registry();

        assert!(registry.tools(&[]).await.unwrap().is_empty());
        assert!(registry.mcp_servers(&[]).await.unwrap().is_empty());
        assert!(!registry.tools_loaded());
        assert!(!registry.mcp_servers_loaded());
    }

    #[tokio::test]
    async fn unknown_names_are_clear_errors() {
        let (_tmp, registry) = seeded_registry();

        let err = registry.provider("ghost").await.unwrap_err();
        assert!(err.to_string().contains("unknown provider: ghost"));

        let err = registry
            .tools(&["echo.text".to_string(), "ghost".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool: ghost"));
    }

    #[tokio::test]
    async fn caches_serve_repeat_lookups() {
        let (tmp, registry) = seeded_registry();

        let first = registry.tool("echo.text").await.unwrap();
        // Delete the backing file; the cached category must still answer
        fs::remove_file(tmp.path().join("tools/echo.yaml")).unwrap();
        let second = registry.tool("echo.text").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn route_files_preserve_order() {
        let (_tmp, registry) = seeded_registry();
        let routes = registry.process_routes().await.unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].id, "echo");
        assert_eq!(routes[1].id, "remote");
        assert!(registry.process_routes_loaded());
    }

    #[tokio::test]
    async fn compat_resolution_uses_builtin_table() {
        let (_tmp, registry) = seeded_registry();
        let compat = registry.compat("anthropic-messages").await.unwrap();
        assert_eq!(compat.id(), "anthropic-messages");
        assert!(registry.compat_modules_loaded());

        let err = registry.compat("nope").await.unwrap_err();
        assert!(err.to_string().contains("unknown compat module"));
    }

    #[tokio::test]
    async fn missing_category_directory_is_empty_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::new(tmp.path());
        let err = registry.provider("any").await.unwrap_err();
        assert!(err.to_string().contains("unknown provider"));
        assert!(registry.process_routes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mcp_and_vector_manifests_parse() {
        let (_tmp, registry) = seeded_registry();

        let servers = registry.mcp_servers(&["kb".to_string()]).await.unwrap();
        assert_eq!(servers[0].command, "kb-server");

        let store = registry.vector_store("docs").await.unwrap();
        assert_eq!(store.kind, "http");
        assert!(registry.vector_store_compat("http").await.is_ok());
    }
}
