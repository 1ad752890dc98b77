// Authentication and identity
//
// Auth is optional: with no configured API keys every request passes and
// the rate-limit key falls back to the client IP (optionally trusting
// proxy headers). With keys configured, a valid bearer token is required
// and the key index becomes the identity.

use axum::http::HeaderMap;
use std::net::SocketAddr;

use crate::config::ServerConfig;
use crate::error::ApiError;

/// Resolve the caller identity used as the rate-limit key
pub fn authenticate(
    config: &ServerConfig,
    headers: &HeaderMap,
    peer: SocketAddr,
) -> Result<String, ApiError> {
    if !config.api_keys.is_empty() {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(ApiError::unauthorized)?;

        let index = config
            .api_keys
            .iter()
            .position(|key| key == token)
            .ok_or_else(ApiError::unauthorized)?;
        return Ok(format!("key-{index}"));
    }

    Ok(client_ip(config, headers, peer))
}

fn client_ip(config: &ServerConfig, headers: &HeaderMap, peer: SocketAddr) -> String {
    if config.trust_proxy_headers {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }
    }
    peer.ip().to_string()
}
