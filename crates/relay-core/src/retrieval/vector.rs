// Vector store integration
//
// Stores sit behind the `VectorStore` trait; the manager walks a priority
// list and treats per-store failures as recoverable (log, try the next).
// Only all-stores-failed surfaces as an error. The built-in HTTP adapter
// posts queries to the endpoint named in the store manifest.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::spec::VectorQuery;

/// Vector store manifest, loaded from the plugin registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStoreManifest {
    pub id: String,
    /// Adapter kind; resolved through the vector-store compat table
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub endpoint: VectorEndpoint,
}

fn default_kind() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub payload: Value,
}

/// A queryable vector store
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn id(&self) -> &str;

    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>>;

    /// Release underlying resources
    async fn close(&self) {}
}

/// Builds a concrete store from its manifest
pub trait VectorStoreCompat: Send + Sync {
    fn kind(&self) -> &'static str;
    fn build(&self, manifest: &VectorStoreManifest) -> Result<Arc<dyn VectorStore>>;
}

/// Built-in adapter kinds
pub fn builtin_store_compat(kind: &str) -> Option<Arc<dyn VectorStoreCompat>> {
    match kind {
        "http" => Some(Arc::new(HttpVectorStoreCompat)),
        _ => None,
    }
}

struct HttpVectorStoreCompat;

impl VectorStoreCompat for HttpVectorStoreCompat {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn build(&self, manifest: &VectorStoreManifest) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(HttpVectorStore {
            id: manifest.id.clone(),
            endpoint: manifest.endpoint.clone(),
            client: reqwest::Client::new(),
        }))
    }
}

/// HTTP-backed store: POST the query JSON, read `{matches: [...]}` (or a
/// bare array) back
pub struct HttpVectorStore {
    id: String,
    endpoint: VectorEndpoint,
    client: reqwest::Client,
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        let mut request = self.client.post(&self.endpoint.url);
        for (name, value) in &self.endpoint.headers {
            request = request.header(name, value);
        }
        let response = request
            .json(query)
            .send()
            .await
            .map_err(|e| GatewayError::vector(format!("{}: request failed: {e}", self.id)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::vector(format!(
                "{}: returned {status}: {body}",
                self.id
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::vector(format!("{}: invalid body: {e}", self.id)))?;

        let items = raw
            .get("matches")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| raw.as_array().cloned())
            .unwrap_or_default();

        Ok(items
            .into_iter()
            .map(|item| VectorMatch {
                id: item.get("id").and_then(Value::as_str).map(str::to_string),
                score: item.get("score").and_then(Value::as_f64),
                payload: item,
            })
            .collect())
    }
}

/// Priority-fallback manager over an ordered store list
pub struct VectorManager {
    stores: Vec<Arc<dyn VectorStore>>,
}

impl VectorManager {
    pub fn new(stores: Vec<Arc<dyn VectorStore>>) -> Self {
        Self { stores }
    }

    pub fn store_ids(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Query stores in priority order; the first success wins. Individual
    /// failures are warnings; only all-failed is an error.
    pub async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        let mut last_error = None;
        for store in &self.stores {
            match store.query(query).await {
                Ok(matches) => return Ok(matches),
                Err(e) => {
                    warn!(store = %store.id(), error = %e, "vector store query failed; trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| GatewayError::vector("no vector stores configured")))
    }

    /// Query a specific store by id
    pub async fn query_store(&self, store_id: &str, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        let store = self
            .stores
            .iter()
            .find(|s| s.id() == store_id)
            .ok_or_else(|| GatewayError::vector(format!("unknown vector store: {store_id}")))?;
        store.query(query).await
    }

    pub async fn close(&self) {
        for store in &self.stores {
            store.close().await;
        }
    }
}

/// Build a tool-search result value for the built-in vector_search tool
pub fn matches_to_value(matches: &[VectorMatch]) -> Value {
    json!({
        "matches": matches
            .iter()
            .map(|m| &m.payload)
            .collect::<Vec<_>>()
    })
}
