// Embedding provider integration
//
// Mirrors the vector side: providers behind a trait, an HTTP adapter
// speaking the common embeddings wire shape, and a manager that tries
// providers in priority order. Only fatal-all-providers surfaces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::response::Usage;

/// Embedding provider manifest, loaded from the plugin registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingProviderManifest {
    pub id: String,
    /// Adapter kind; resolved through the embedding compat table
    #[serde(default = "default_kind")]
    pub kind: String,
    pub endpoint: EmbeddingEndpoint,
    /// Default model when the call spec names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_kind() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Result of one embedding call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResult {
    pub provider: String,
    pub model: Option<String>,
    pub embeddings: Vec<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// An embedding provider
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn embed(&self, input: &[String], model: Option<&str>) -> Result<EmbeddingResult>;

    async fn close(&self) {}
}

/// Builds a concrete provider from its manifest
pub trait EmbeddingCompat: Send + Sync {
    fn kind(&self) -> &'static str;
    fn build(&self, manifest: &EmbeddingProviderManifest) -> Result<Arc<dyn EmbeddingProvider>>;
}

/// Built-in adapter kinds
pub fn builtin_embedding_compat(kind: &str) -> Option<Arc<dyn EmbeddingCompat>> {
    match kind {
        "http" => Some(Arc::new(HttpEmbeddingCompat)),
        _ => None,
    }
}

struct HttpEmbeddingCompat;

impl EmbeddingCompat for HttpEmbeddingCompat {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn build(&self, manifest: &EmbeddingProviderManifest) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::new(HttpEmbeddingProvider {
            id: manifest.id.clone(),
            endpoint: manifest.endpoint.clone(),
            default_model: manifest.model.clone(),
            client: reqwest::Client::new(),
        }))
    }
}

/// HTTP-backed provider speaking the `{model, input} -> {data: [{embedding}]}`
/// wire shape
pub struct HttpEmbeddingProvider {
    id: String,
    endpoint: EmbeddingEndpoint,
    default_model: Option<String>,
    client: reqwest::Client,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, input: &[String], model: Option<&str>) -> Result<EmbeddingResult> {
        let model = model
            .map(str::to_string)
            .or_else(|| self.default_model.clone());

        let mut body = serde_json::Map::new();
        body.insert("input".to_string(), serde_json::json!(input));
        if let Some(model) = &model {
            body.insert("model".to_string(), serde_json::json!(model));
        }

        let mut request = self.client.post(&self.endpoint.url);
        for (name, value) in &self.endpoint.headers {
            request = request.header(name, value);
        }
        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::embedding(format!("{}: request failed: {e}", self.id)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::embedding(format!(
                "{}: returned {status}: {text}",
                self.id
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::embedding(format!("{}: invalid body: {e}", self.id)))?;

        let embeddings: Vec<Vec<f32>> = raw
            .get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        item.get("embedding").and_then(Value::as_array).map(|xs| {
                            xs.iter()
                                .filter_map(|x| x.as_f64().map(|f| f as f32))
                                .collect()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if embeddings.len() != input.len() {
            return Err(GatewayError::embedding(format!(
                "{}: expected {} embeddings, got {}",
                self.id,
                input.len(),
                embeddings.len()
            )));
        }

        let usage = raw.get("usage").map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64),
            total_tokens: u.get("total_tokens").and_then(Value::as_u64),
            ..Default::default()
        });

        Ok(EmbeddingResult {
            provider: self.id.clone(),
            model,
            embeddings,
            usage,
        })
    }
}

/// Fallback manager over an ordered provider list
pub struct EmbeddingManager {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
}

impl EmbeddingManager {
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { providers }
    }

    /// Try providers in priority order; the first success wins
    pub async fn embed(&self, input: &[String], model: Option<&str>) -> Result<EmbeddingResult> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.embed(input, model).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(provider = %provider.id(), error = %e, "embedding provider failed; trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| GatewayError::embedding("no embedding providers configured")))
    }

    pub async fn close(&self) {
        for provider in &self.providers {
            provider.close().await;
        }
    }
}
