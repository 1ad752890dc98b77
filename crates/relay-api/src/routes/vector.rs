// /vector/run, /vector/stream, /vector/embeddings/run
//
// Direct retrieval endpoints: stores and providers are resolved from the
// registry per request (unknown ids are 400s), queried with priority
// fallback, and closed before the response leaves.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use relay_core::retrieval::embedding::{EmbeddingManager, EmbeddingProvider};
use relay_core::retrieval::vector::{VectorManager, VectorStore};
use relay_core::spec::{EmbeddingCallSpec, VectorCallSpec};
use relay_core::PluginSource;

use crate::error::ApiError;
use crate::server::{admit, AppState};
use crate::sse::sse_response;

async fn build_vector_manager(
    state: &AppState,
    store_ids: &[String],
) -> Result<VectorManager, ApiError> {
    let mut stores: Vec<Arc<dyn VectorStore>> = Vec::new();
    for id in store_ids {
        let manifest = state.registry.vector_store(id).await?;
        let compat = state.registry.vector_store_compat(&manifest.kind).await?;
        stores.push(compat.build(&manifest)?);
    }
    Ok(VectorManager::new(stores))
}

async fn build_embedding_manager(
    state: &AppState,
    provider_ids: &[String],
) -> Result<EmbeddingManager, ApiError> {
    let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();
    for id in provider_ids {
        let manifest = state.registry.embedding_provider(id).await?;
        let compat = state.registry.embedding_compat(&manifest.kind).await?;
        providers.push(compat.build(&manifest)?);
    }
    Ok(EmbeddingManager::new(providers))
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::validation(format!("invalid spec: {e}")))
}

/// POST /vector/run
pub async fn run(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let (_permit, value) = admit(
        &state,
        &parts.headers,
        peer,
        &state.admission.vector_run,
        body,
    )
    .await?;
    let spec: VectorCallSpec = parse(value)?;
    spec.validate()?;

    let manager = build_vector_manager(&state, &spec.stores()).await?;
    let result = tokio::time::timeout(state.config.request_timeout, manager.query(&spec.query))
        .await
        .map_err(|_| ApiError::request_timeout())?;
    manager.close().await;

    let matches = result?;
    Ok(Json(json!({"type": "response", "data": {"matches": matches}})).into_response())
}

/// POST /vector/stream
pub async fn stream(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let (permit, value) = admit(
        &state,
        &parts.headers,
        peer,
        &state.admission.vector_stream,
        body,
    )
    .await?;
    let spec: VectorCallSpec = parse(value)?;
    spec.validate()?;

    let manager = build_vector_manager(&state, &spec.stores()).await?;
    let (tx, rx) = mpsc::channel::<Value>(16);

    tokio::spawn(async move {
        match manager.query(&spec.query).await {
            Ok(matches) => {
                for item in matches {
                    let event = json!({"type": "match", "data": item});
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                let event = json!({
                    "type": "error",
                    "error": {"code": e.code(), "message": e.to_string()}
                });
                let _ = tx.send(event).await;
            }
        }
        manager.close().await;
    });

    Ok(sse_response(
        rx,
        state.config.stream_idle_timeout,
        state.config.request_timeout,
        permit,
    ))
}

/// POST /vector/embeddings/run
pub async fn embeddings_run(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let (_permit, value) = admit(
        &state,
        &parts.headers,
        peer,
        &state.admission.embedding_run,
        body,
    )
    .await?;
    let spec: EmbeddingCallSpec = parse(value)?;
    spec.validate()?;

    let manager = build_embedding_manager(&state, &spec.provider_priority).await?;
    let result = tokio::time::timeout(
        state.config.request_timeout,
        manager.embed(&spec.input, spec.model.as_deref()),
    )
    .await
    .map_err(|_| ApiError::request_timeout())?;
    manager.close().await;

    let data = result?;
    Ok(Json(json!({"type": "response", "data": data})).into_response())
}
