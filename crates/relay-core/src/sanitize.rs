// Name sanitization and header redaction
//
// Provider wire formats restrict tool names to [A-Za-z0-9_-]{1,64};
// sanitization is many-to-one, so the tool loop keeps an alias map from
// sanitized names back to the originals.

use std::collections::HashMap;

const MAX_NAME_LEN: usize = 64;

/// Header names whose values never reach a log sink
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "api-key",
    "cookie",
    "set-cookie",
];

fn sanitize(input: &str, fallback: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    };

    cleaned.chars().take(MAX_NAME_LEN).collect()
}

/// Sanitize a tool name for the provider wire.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`, the empty string becomes
/// `"tool"`, and the result is truncated to 64 characters. Idempotent.
pub fn sanitize_tool_name(name: &str) -> String {
    sanitize(name, "tool")
}

/// Sanitize an id (batch ids, log path segments); same character class and
/// cap as tool names.
pub fn sanitize_id(id: &str) -> String {
    sanitize(id, "id")
}

/// Build the alias map `sanitized -> original` for a list of tool names.
///
/// When two originals collide on the same sanitized form, the first one
/// wins; later collisions get a numeric suffix so every wire name resolves
/// unambiguously.
pub fn build_alias_map<'a>(names: impl IntoIterator<Item = &'a str>) -> HashMap<String, String> {
    let mut aliases: HashMap<String, String> = HashMap::new();
    for original in names {
        let mut sanitized = sanitize_tool_name(original);
        if aliases.contains_key(&sanitized) {
            let mut n = 2usize;
            loop {
                let candidate = format!(
                    "{}_{}",
                    &sanitized[..sanitized.len().min(MAX_NAME_LEN - 1 - n.to_string().len())],
                    n
                );
                if !aliases.contains_key(&candidate) {
                    sanitized = candidate;
                    break;
                }
                n += 1;
            }
        }
        aliases.insert(sanitized, original.to_string());
    }
    aliases
}

/// Redact sensitive header values before logging.
///
/// Matching is case-insensitive on the header name; values are replaced
/// with `"[REDACTED]"`.
pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lowered = name.to_ascii_lowercase();
            if SENSITIVE_HEADERS.contains(&lowered.as_str()) {
                (name.clone(), "[REDACTED]".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
