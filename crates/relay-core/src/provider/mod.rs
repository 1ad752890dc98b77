// Provider manifests
//
// A provider is data: which compat translates for it, where its endpoint
// lives, which headers to send, which words mark a rate-limited failure, and
// how declarative payload extensions project spec-side settings into the
// outgoing payload. The HTTP exchange itself lives in `manager`.

mod manager;

pub use manager::{scan_rate_limit, ProviderManager, ProviderStream};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP endpoint description for a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEndpoint {
    /// URL with `{model}` placeholder
    pub url_template: String,
    /// Streaming URL override; falls back to `url_template`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_url_template: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Merged over `headers` for streaming requests
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub streaming_headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl ProviderEndpoint {
    /// Substitute `{model}` into the non-streaming URL
    pub fn url(&self, model: &str) -> String {
        self.url_template.replace("{model}", model)
    }

    /// Substitute `{model}` into the streaming URL (falls back to `url`)
    pub fn streaming_url(&self, model: &str) -> String {
        self.streaming_url_template
            .as_deref()
            .unwrap_or(&self.url_template)
            .replace("{model}", model)
    }

    /// Effective headers for a streaming request
    pub fn effective_streaming_headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        headers.extend(self.streaming_headers.clone());
        headers
    }
}

/// Expected JSON shape of an extension value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionValueType {
    Scalar,
    Array,
    Object,
}

impl ExtensionValueType {
    /// Whether `value` matches this shape
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            ExtensionValueType::Scalar => {
                matches!(value, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))
            }
            ExtensionValueType::Array => matches!(value, Value::Array(_)),
            ExtensionValueType::Object => matches!(value, Value::Object(_)),
        }
    }
}

/// One declarative payload extension: project a spec-side setting into a
/// position within the outgoing payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadExtension {
    /// Setting key on the spec side
    pub setting: String,
    /// Dotted path within the payload (e.g. `generationConfig.topK`)
    pub target: String,
    /// Shape guard; mismatched values are returned as leftovers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ExtensionValueType>,
}

/// Provider manifest, loaded from the plugin registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderManifest {
    pub id: String,
    /// Compat module id (`openai-chat`, `anthropic-messages`, ...)
    pub compat: String,
    pub endpoint: ProviderEndpoint,
    /// Case-insensitive markers of a rate-limited failure in body or headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_words: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_extensions: Vec<PayloadExtension>,
}

impl ProviderManifest {
    /// Setting keys claimed by payload extensions
    pub fn extension_setting_keys(&self) -> Vec<&str> {
        self.payload_extensions
            .iter()
            .map(|e| e.setting.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_template_substitution() {
        let endpoint: ProviderEndpoint = serde_json::from_value(json!({
            "urlTemplate": "https://api.example.com/v1/models/{model}/generate",
            "streamingUrlTemplate": "https://api.example.com/v1/models/{model}/stream"
        }))
        .unwrap();
        assert_eq!(
            endpoint.url("gpt-test"),
            "https://api.example.com/v1/models/gpt-test/generate"
        );
        assert_eq!(
            endpoint.streaming_url("gpt-test"),
            "https://api.example.com/v1/models/gpt-test/stream"
        );
        assert_eq!(endpoint.method, "POST");
    }

    #[test]
    fn streaming_headers_merge_over_base() {
        let endpoint: ProviderEndpoint = serde_json::from_value(json!({
            "urlTemplate": "https://x/{model}",
            "headers": {"Accept": "application/json", "X-Common": "1"},
            "streamingHeaders": {"Accept": "text/event-stream"}
        }))
        .unwrap();
        let headers = endpoint.effective_streaming_headers();
        assert_eq!(headers["Accept"], "text/event-stream");
        assert_eq!(headers["X-Common"], "1");
    }

    #[test]
    fn extension_value_type_guard() {
        assert!(ExtensionValueType::Scalar.accepts(&json!("x")));
        assert!(ExtensionValueType::Scalar.accepts(&json!(3)));
        assert!(!ExtensionValueType::Scalar.accepts(&json!([1])));
        assert!(ExtensionValueType::Array.accepts(&json!([1])));
        assert!(ExtensionValueType::Object.accepts(&json!({"a": 1})));
        assert!(!ExtensionValueType::Object.accepts(&json!(1)));
    }
}
