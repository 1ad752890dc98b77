// Plugin source contract
//
// The coordinator, tool discovery, and dispatcher never touch the plugin
// filesystem directly; they go through this trait. The filesystem-backed
// implementation lives in the relay-plugins crate. Keeping the contract
// here keeps the runtime registry-agnostic and lets tests substitute an
// in-memory source.
//
// Implementations are lazy and cached per category: resolving with an
// empty input set must trigger zero loads, and a spec that only names a
// provider must not cause tool, MCP, or vector manifests to load.

use async_trait::async_trait;
use std::sync::Arc;

use crate::compat::Compat;
use crate::error::Result;
use crate::message::UnifiedTool;
use crate::provider::ProviderManifest;
use crate::retrieval::embedding::{EmbeddingCompat, EmbeddingProviderManifest};
use crate::retrieval::mcp::McpServerManifest;
use crate::retrieval::vector::{VectorStoreCompat, VectorStoreManifest};
use crate::tools::routes::ProcessRoute;

/// Lazily-loaded plugin lookups
#[async_trait]
pub trait PluginSource: Send + Sync {
    /// Provider manifest by id; unknown ids are clear errors
    async fn provider(&self, id: &str) -> Result<Arc<ProviderManifest>>;

    /// Registry tool by original name
    async fn tool(&self, name: &str) -> Result<UnifiedTool>;

    /// Registry tools by name, failing fast on the first unknown name.
    /// An empty input returns empty without loading anything.
    async fn tools(&self, names: &[String]) -> Result<Vec<UnifiedTool>>;

    /// MCP server manifests by id. An empty input returns empty without
    /// loading anything.
    async fn mcp_servers(&self, ids: &[String]) -> Result<Vec<Arc<McpServerManifest>>>;

    /// Vector store manifest by id
    async fn vector_store(&self, id: &str) -> Result<Arc<VectorStoreManifest>>;

    /// Adapter factory for a vector store kind
    async fn vector_store_compat(&self, kind: &str) -> Result<Arc<dyn VectorStoreCompat>>;

    /// Embedding provider manifest by id
    async fn embedding_provider(&self, id: &str) -> Result<Arc<EmbeddingProviderManifest>>;

    /// Adapter factory for an embedding provider kind
    async fn embedding_compat(&self, kind: &str) -> Result<Arc<dyn EmbeddingCompat>>;

    /// All configured process routes, in match order
    async fn process_routes(&self) -> Result<Arc<Vec<ProcessRoute>>>;

    /// Compat module by id
    async fn compat(&self, id: &str) -> Result<Arc<dyn Compat>>;
}
