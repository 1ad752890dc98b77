// Router assembly and the shared request pipeline
//
// Every endpoint runs the same admission pipeline before any work:
// authenticate (identity = API key or client IP), rate-limit on that
// identity, enforce the JSON content type, acquire an admission permit
// from the endpoint family's limiter, then read the body under its byte
// and time limits. Method enforcement (405) and CORS preflight
// short-circuiting come from the router layers.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use relay_core::tools::ModuleHandlerRegistry;
use relay_plugins::PluginRegistry;

use crate::admission::{Admission, AdmissionLimiter};
use crate::auth::authenticate;
use crate::body::{read_json, require_json};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use crate::routes;

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<PluginRegistry>,
    pub modules: ModuleHandlerRegistry,
    pub rate_limiter: Arc<RateLimiter>,
    pub admission: Arc<Admission>,
}

impl AppState {
    pub fn new(config: ServerConfig, modules: ModuleHandlerRegistry) -> Self {
        let registry = Arc::new(PluginRegistry::new(&config.plugins_dir));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_rps,
            config.rate_limit_burst,
        ));
        let admission = Arc::new(Admission::new(&config));
        Self {
            config: Arc::new(config),
            registry,
            modules,
            rate_limiter,
            admission,
        }
    }
}

/// The shared per-request pipeline: steps 1-7 of the request contract.
/// Returns the admission permit and the parsed JSON body.
pub async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    peer: SocketAddr,
    limiter: &AdmissionLimiter,
    body: Body,
) -> Result<(OwnedSemaphorePermit, Value), ApiError> {
    let identity = authenticate(&state.config, headers, peer)?;
    if !state.rate_limiter.check(&identity) {
        return Err(ApiError::rate_limited());
    }
    require_json(headers)?;
    let permit = limiter.acquire().await?;
    let value = read_json(
        body,
        state.config.max_body_bytes,
        state.config.body_read_timeout,
    )
    .await?;
    Ok((permit, value))
}

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(routes::llm::run))
        .route("/stream", post(routes::llm::stream))
        .route("/vector/run", post(routes::vector::run))
        .route("/vector/stream", post(routes::vector::stream))
        .route("/vector/embeddings/run", post(routes::vector::embeddings_run))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
}
