// /run and /stream
//
// Both create a short-lived coordinator per request. /run applies the
// request timeout with deferred permit release: on timeout the worker task
// keeps running (and logs its eventual outcome) but its result is
// discarded, so a runaway provider call cannot starve new requests while
// still counting against capacity until it unwinds.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

use relay_core::spec::LlmCallSpec;
use relay_core::Coordinator;

use crate::error::ApiError;
use crate::server::{admit, AppState};
use crate::sse::{bridge_events, sse_response};

fn parse_spec(value: serde_json::Value) -> Result<LlmCallSpec, ApiError> {
    let spec: LlmCallSpec = serde_json::from_value(value)
        .map_err(|e| ApiError::validation(format!("invalid call spec: {e}")))?;
    spec.validate()?;
    Ok(spec)
}

/// POST /run
pub async fn run(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let (permit, value) = admit(
        &state,
        &parts.headers,
        peer,
        &state.admission.llm_run,
        body,
    )
    .await?;
    let spec = parse_spec(value)?;

    let coordinator = Coordinator::new(state.registry.clone(), state.modules.clone());
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        // Permit rides with the worker: released when the coordinator
        // actually unwinds, not when the client gives up
        let _permit = permit;
        let result = coordinator.run(spec).await;
        if let Err(discarded) = done_tx.send(result) {
            match discarded {
                Ok(_) => warn!("discarding response that completed after the request timeout"),
                Err(e) => warn!(error = %e, "discarding failure that completed after the request timeout"),
            }
        }
    });

    match tokio::time::timeout(state.config.request_timeout, done_rx).await {
        Err(_) => Err(ApiError::request_timeout()),
        Ok(Err(_)) => Err(ApiError::internal("worker task dropped its result")),
        Ok(Ok(result)) => {
            let response = result?;
            Ok(Json(json!({"type": "response", "data": response})).into_response())
        }
    }
}

/// POST /stream
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
        &state.admission.llm_stream,
        body,
    )
    .await?;
    let spec = parse_spec(value)?;

    let coordinator = Arc::new(Coordinator::new(
        state.registry.clone(),
        state.modules.clone(),
    ));
    // Resolution failures surface as a JSON error before headers are sent;
    // everything later arrives in-stream
    let events = coordinator.stream(spec).await?;

    Ok(sse_response(
        bridge_events(events),
        state.config.stream_idle_timeout,
        state.config.request_timeout,
        permit,
    ))
}
