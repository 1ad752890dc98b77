// Bounded body reading
//
// Bodies are read manually so the byte cap and the read timeout apply
// before any JSON parsing: 413 past the cap, 408 past the deadline.

use axum::body::Body;
use axum::http::HeaderMap;
use bytes::BytesMut;
use futures::StreamExt;
use std::time::Duration;

use crate::error::ApiError;

/// Require `Content-Type: application/json`
pub fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    let ok = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(';').next().is_some_and(|m| m.trim() == "application/json"));
    if ok {
        Ok(())
    } else {
        Err(ApiError::unsupported_media_type())
    }
}

/// Read the full body under a byte cap and a read timeout, then parse JSON
pub async fn read_json(
    body: Body,
    max_bytes: usize,
    read_timeout: Duration,
) -> Result<serde_json::Value, ApiError> {
    let collected = tokio::time::timeout(read_timeout, async {
        let mut stream = body.into_data_stream();
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ApiError::validation(format!("body read failed: {e}")))?;
            if buffer.len() + chunk.len() > max_bytes {
                return Err(ApiError::body_too_large(max_bytes));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    })
    .await
    .map_err(|_| ApiError::body_read_timeout())??;

    serde_json::from_slice(&collected)
        .map_err(|e| ApiError::validation(format!("invalid JSON body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_json_under_the_cap() {
        let value = read_json(
            Body::from(r#"{"a": 1}"#),
            1024,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let err = read_json(Body::from(vec![b'x'; 100]), 10, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_is_408() {
        // A body stream that never produces data
        let (mut tx, body) = {
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(1);
            (
                tx,
                Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx)),
            )
        };
        let _ = &mut tx; // keep the sender alive so the stream stalls

        let err = read_json(body, 1024, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::REQUEST_TIMEOUT);
        drop(tx);
    }

    #[test]
    fn content_type_check_allows_charset_suffix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(require_json(&headers).is_ok());

        headers.insert("content-type", "text/plain".parse().unwrap());
        assert!(require_json(&headers).is_err());
        assert!(require_json(&HeaderMap::new()).is_err());
    }
}
