// Provider manager
//
// Owns the HTTP exchange with a provider: builds the payload (via the
// payload builder, or the compat's SDK path when present), issues the
// request, classifies failures, and parses SSE streams into canonical
// events.
//
// Failure classification: any HTTP response is accepted at the transport
// layer; status >= 400 surfaces as ProviderExecution with `is_rate_limit`
// set iff any manifest retry word occurs (case-insensitive) in the
// serialized body or the response headers. The gateway itself never
// retries.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::compat::{Compat, CompatRequest, ResponseContext, StreamFinal};
use crate::error::{GatewayError, Result};
use crate::events::LlmStreamEvent;
use crate::logging::{CallLogger, LogCategory};
use crate::payload::build_provider_payload;
use crate::provider::ProviderManifest;
use crate::response::LlmResponse;
use crate::sanitize::redact_headers;

/// Serialize response headers for the rate-limit scan and for logging
fn headers_text(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rate-limit classification: case-insensitive retry-word scan over the
/// serialized body and headers
pub fn scan_rate_limit(retry_words: &[String], body: &str, headers_text: &str) -> bool {
    if retry_words.is_empty() {
        return false;
    }
    let body = body.to_lowercase();
    let headers = headers_text.to_lowercase();
    retry_words.iter().any(|word| {
        let word = word.to_lowercase();
        body.contains(&word) || headers.contains(&word)
    })
}

/// Stream handle returned by `execute_streaming`
///
/// Events drain through a bounded channel; the aggregates arrive on a
/// oneshot once the producer finishes. Dropping the handle closes the
/// channel, which the producer observes on its next send and aborts the
/// underlying response stream without being awaited.
#[derive(Debug)]
pub struct ProviderStream {
    events: mpsc::Receiver<LlmStreamEvent>,
    final_rx: oneshot::Receiver<StreamFinal>,
}

impl ProviderStream {
    /// Next canonical event, or `None` when the stream ended
    pub async fn next_event(&mut self) -> Option<LlmStreamEvent> {
        self.events.recv().await
    }

    /// Aggregates collected over the whole stream; call after the events
    /// drained
    pub async fn finish(self) -> Result<StreamFinal> {
        drop(self.events);
        self.final_rx
            .await
            .map_err(|_| GatewayError::provider("stream ended without final state", false, None))
    }
}

/// Performs the HTTP exchange with providers
pub struct ProviderManager {
    client: Client,
    log_root: PathBuf,
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderManager {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            log_root: PathBuf::from("logs"),
        }
    }

    /// Override the log sink root (tests point this at a temp dir)
    pub fn with_log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    fn open_logger(&self) -> CallLogger {
        CallLogger::open(
            &self.log_root,
            LogCategory::Llm,
            &uuid::Uuid::now_v7().to_string(),
        )
    }

    fn method(manifest: &ProviderManifest) -> Method {
        Method::from_bytes(manifest.endpoint.method.as_bytes()).unwrap_or(Method::POST)
    }

    fn log_request(logger: &CallLogger, url: &str, manifest: &ProviderManifest, payload: &Value) {
        let redacted = redact_headers(&manifest.endpoint.headers.clone().into_iter().collect());
        logger.log(&json!({
            "event": "request",
            "provider": manifest.id,
            "url": url,
            "headers": redacted,
            "payload": payload,
        }));
    }

    /// Non-streaming call
    pub async fn execute(
        &self,
        manifest: &ProviderManifest,
        compat: &dyn Compat,
        request: &CompatRequest<'_>,
        extras: Map<String, Value>,
    ) -> Result<LlmResponse> {
        let logger = self.open_logger();

        if let Some(sdk) = compat.sdk() {
            if !extras.is_empty() {
                info!(
                    provider = %manifest.id,
                    keys = ?extras.keys().collect::<Vec<_>>(),
                    "unconsumed provider extras (SDK path)"
                );
            }
            let (response, body) = sdk.call(&self.client, manifest, request).await?;
            Self::log_request(&logger, &manifest.endpoint.url(request.model), manifest, &body);
            logger.log(&json!({"event": "response", "data": response.raw}));
            return Ok(response);
        }

        let built = build_provider_payload(manifest, compat, request, extras)?;
        if !built.unconsumed_extras.is_empty() {
            info!(
                provider = %manifest.id,
                keys = ?built.unconsumed_extras.keys().collect::<Vec<_>>(),
                "unconsumed provider extras"
            );
        }

        let url = manifest.endpoint.url(request.model);
        Self::log_request(&logger, &url, manifest, &built.payload);

        let mut http = self.client.request(Self::method(manifest), &url);
        for (name, value) in &manifest.endpoint.headers {
            http = http.header(name, value);
        }
        let response = http
            .json(&built.payload)
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("request failed: {e}"), false, None))?;

        let status = response.status();
        let response_headers = headers_text(response.headers());

        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            let rate_limited =
                scan_rate_limit(&manifest.retry_words, &body, &response_headers);
            logger.log(&json!({
                "event": "error",
                "status": status.as_u16(),
                "rateLimited": rate_limited,
                "body": body,
            }));
            return Err(GatewayError::provider(
                format!("{} returned {status}: {body}", manifest.id),
                rate_limited,
                Some(status.as_u16()),
            ));
        }

        let raw: Value = response.json().await.map_err(|e| {
            GatewayError::provider(format!("invalid response body: {e}"), false, None)
        })?;
        logger.log(&json!({"event": "response", "status": status.as_u16(), "data": raw}));

        compat.parse_response(
            raw,
            &ResponseContext {
                provider: &manifest.id,
                model: request.model,
            },
        )
    }

    /// Streaming call: the returned handle drains canonical events and then
    /// yields the stream aggregates
    pub async fn execute_streaming(
        &self,
        manifest: &ProviderManifest,
        compat: &dyn Compat,
        request: &CompatRequest<'_>,
        extras: Map<String, Value>,
    ) -> Result<ProviderStream> {
        let logger = self.open_logger();

        let (url, payload) = match compat.sdk() {
            Some(sdk) => sdk.streaming_request(manifest, request)?,
            None => {
                let built = build_provider_payload(manifest, compat, request, extras)?;
                if !built.unconsumed_extras.is_empty() {
                    info!(
                        provider = %manifest.id,
                        keys = ?built.unconsumed_extras.keys().collect::<Vec<_>>(),
                        "unconsumed provider extras"
                    );
                }
                (manifest.endpoint.streaming_url(request.model), built.payload)
            }
        };

        Self::log_request(&logger, &url, manifest, &payload);

        let headers = manifest.endpoint.effective_streaming_headers();
        let mut http = self.client.request(Self::method(manifest), &url);
        for (name, value) in &headers {
            http = http.header(name, value);
        }
        let response = http
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("request failed: {e}"), false, None))?;

        let status = response.status();
        let response_headers = headers_text(response.headers());

        if status.as_u16() != 200 {
            // Drain and join the body so the classification sees all of it
            let body = response.text().await.unwrap_or_default();
            let rate_limited =
                scan_rate_limit(&manifest.retry_words, &body, &response_headers);
            logger.log(&json!({
                "event": "error",
                "status": status.as_u16(),
                "rateLimited": rate_limited,
                "body": body,
            }));
            return Err(GatewayError::provider(
                format!("{} returned {status}: {body}", manifest.id),
                rate_limited,
                Some(status.as_u16()),
            ));
        }

        let mut state = compat.new_stream_state();
        let (event_tx, event_rx) = mpsc::channel::<LlmStreamEvent>(64);
        let (final_tx, final_rx) = oneshot::channel::<StreamFinal>();

        tokio::spawn(async move {
            let mut sse = response.bytes_stream().eventsource();

            'outer: while let Some(frame) = sse.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "provider stream read error");
                        let _ = event_tx
                            .send(LlmStreamEvent::error(
                                format!("stream read error: {e}"),
                                Some("provider_error"),
                            ))
                            .await;
                        break;
                    }
                };

                if frame.data == "[DONE]" {
                    break;
                }
                // Malformed JSON data lines are silently skipped
                let Ok(chunk) = serde_json::from_str::<Value>(&frame.data) else {
                    debug!("skipping malformed SSE data line");
                    continue;
                };

                let parse = state.on_chunk(&chunk);
                for event in parse.events {
                    logger.log(&json!({"event": "stream", "data": event}));
                    if event_tx.send(event).await.is_err() {
                        // Receiver gone: stop reading, drop the response
                        break 'outer;
                    }
                }
            }

            let _ = final_tx.send(state.finish());
        });

        Ok(ProviderStream {
            events: event_rx,
            final_rx,
        })
    }
}
