// SSE lifecycle
//
// Each event leaves as exactly `data: <json>\n\n`. Comments are allowed
// but unused; `[DONE]` is never emitted — the stream ends with connection
// close. Two clocks run per stream: an idle window that resets on every
// event, and an absolute request deadline measured from stream start. When
// either wins the race against the next event, a terminal error event is
// written and the connection closes; the upstream producer is cancelled by
// dropping its channel, never awaited (a blocked generator must not hang
// the connection).

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use relay_core::events::LlmStreamEvent;

/// One wire frame
fn frame(event: &Value) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {json}\n\n"))
}

fn error_value(message: &str, code: &str) -> Value {
    serde_json::to_value(LlmStreamEvent::error(message, Some(code)))
        .unwrap_or_else(|_| Value::Null)
}

/// Wrap a JSON event stream into an SSE response.
///
/// The admission permit rides inside the writer task and is released when
/// the stream finishes or times out.
pub fn sse_response(
    mut events: mpsc::Receiver<Value>,
    idle_timeout: Duration,
    request_timeout: Duration,
    permit: OwnedSemaphorePermit,
) -> Response {
    let (frame_tx, frame_rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);

    tokio::spawn(async move {
        let _permit = permit;
        let deadline = Instant::now() + request_timeout;

        loop {
            // The shorter of the two remaining windows races next()
            let idle = tokio::time::sleep(idle_timeout);
            tokio::pin!(idle);

            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            // Back-pressure: a slow client parks us here
                            if frame_tx.send(Ok(frame(&event))).await.is_err() {
                                debug!("SSE client disconnected");
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let event = error_value("Request timeout", "timeout");
                    let _ = frame_tx.send(Ok(frame(&event))).await;
                    break;
                }
                _ = &mut idle => {
                    let event = error_value("Stream idle timeout", "stream_idle_timeout");
                    let _ = frame_tx.send(Ok(frame(&event))).await;
                    break;
                }
            }
        }
        // Dropping `events` here closes the channel; the producer observes
        // it on its next send and unwinds on its own time
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(ReceiverStream::new(frame_rx)))
        .expect("static header set is valid")
}

/// Bridge a typed event channel into the JSON channel the SSE writer
/// consumes. Dropping the SSE side propagates cancellation upstream.
pub fn bridge_events(
    mut events: mpsc::Receiver<LlmStreamEvent>,
) -> mpsc::Receiver<Value> {
    let (tx, rx) = mpsc::channel::<Value>(16);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            let value = serde_json::to_value(&event).unwrap_or(Value::Null);
                            if tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                // The SSE writer went away (timeout or disconnect); drop
                // the upstream receiver so the producer unwinds
                _ = tx.closed() => break,
            }
        }
    });
    rx
}
