// Unified message types
//
// The provider-agnostic data model every compat translates from and to.
// Wire casing is camelCase (`toolCallId`, `imageUrl`, ...); a bare string is
// accepted wherever a content-part list is expected and becomes a single
// text part.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message (instructions)
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Source of a document content part
///
/// `Filepath` is a local-only source; the coordinator resolves it to
/// `Base64` before anything reaches a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentSource {
    /// Inline base64 payload
    Base64 { data: String },
    /// Remote URL
    Url { url: String },
    /// Provider-side file id
    FileId {
        #[serde(rename = "fileId")]
        file_id: String,
    },
    /// Local filesystem path (resolved before dispatch)
    Filepath { path: String },
}

/// A single content part within a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content
    Text { text: String },
    /// Image content (data URL or HTTP URL)
    Image {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
    /// Document content (PDF and friends)
    Document {
        source: DocumentSource,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(rename = "providerOptions", skip_serializing_if = "Option::is_none")]
        provider_options: Option<Value>,
    },
    /// Structured tool result
    ToolResult {
        #[serde(rename = "toolName")]
        tool_name: String,
        result: Value,
        #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentPart {
    /// Create a text content part
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Get text if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Reasoning attached to an assistant message
///
/// Some providers sign reasoning blocks; when `metadata.signature` is set it
/// must round-trip verbatim on subsequent requests (mutation breaks the
/// signature). The `redacted` flag marks pruned reasoning but does not
/// suppress emission for providers whose contract requires signed thinking
/// blocks to be re-sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub redacted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Reasoning {
    /// Create reasoning with plain text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            redacted: false,
            metadata: None,
        }
    }

    /// Provider-issued signature, when present in metadata
    pub fn signature(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("signature")?.as_str()
    }
}

/// A tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within the message
    pub id: String,
    pub name: String,
    /// Structured arguments (compats parse vendor JSON strings into this)
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            metadata: None,
        }
    }
}

/// Provider-agnostic tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments object
    #[serde(rename = "parametersJsonSchema")]
    pub parameters_json_schema: Value,
}

impl UnifiedTool {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters_json_schema: schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Tool choice hint forwarded to providers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    /// Force a specific tool by (sanitized) name
    #[serde(untagged)]
    Tool(String),
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// Ordered content parts; a bare JSON string deserializes to one text part
    #[serde(deserialize_with = "content_parts")]
    pub content: Vec<ContentPart>,

    /// Optional participant name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls requested by the assistant (assistant messages only)
    #[serde(rename = "toolCalls", skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Correlates a tool message with the call it answers (tool messages only)
    #[serde(rename = "toolCallId", skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Reasoning emitted alongside an assistant message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
}

fn content_parts<'de, D>(deserializer: D) -> std::result::Result<Vec<ContentPart>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrParts {
        Text(String),
        Parts(Vec<ContentPart>),
    }

    Ok(match StringOrParts::deserialize(deserializer)? {
        StringOrParts::Text(text) => vec![ContentPart::Text { text }],
        StringOrParts::Parts(parts) => parts,
    })
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(content)],
            name: None,
            tool_calls: None,
            tool_call_id: None,
            reasoning: None,
        }
    }

    /// Create an assistant message carrying tool calls
    pub fn assistant_with_tools(content: Vec<ContentPart>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            name: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            reasoning: None,
        }
    }

    /// Create a tool message answering `tool_call_id`
    pub fn tool_result(tool_call_id: impl Into<String>, content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Tool,
            content,
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            reasoning: None,
        }
    }

    /// First text part, when present
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|p| p.as_text())
    }

    /// Concatenated text of all text parts
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Check if this message has tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_content_becomes_one_text_part() {
        let msg: Message = serde_json::from_value(json!({
            "role": "user",
            "content": "Hello"
        }))
        .unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.first_text(), Some("Hello"));
    }

    #[test]
    fn content_parts_round_trip_camel_case() {
        let msg: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}],
            "toolCalls": [{"id": "call-1", "name": "echo", "arguments": {"x": 1}}]
        }))
        .unwrap();
        assert!(msg.has_tool_calls());

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["toolCalls"][0]["id"], "call-1");
        assert_eq!(back["content"][0]["type"], "text");
    }

    #[test]
    fn document_source_variants() {
        let src: DocumentSource = serde_json::from_value(json!({"path": "/tmp/a.pdf"})).unwrap();
        assert_eq!(
            src,
            DocumentSource::Filepath {
                path: "/tmp/a.pdf".into()
            }
        );

        let src: DocumentSource = serde_json::from_value(json!({"fileId": "file-9"})).unwrap();
        assert_eq!(src, DocumentSource::FileId { file_id: "file-9".into() });

        let src: DocumentSource = serde_json::from_value(json!({"data": "aGk="})).unwrap();
        assert_eq!(src, DocumentSource::Base64 { data: "aGk=".into() });
    }

    #[test]
    fn reasoning_signature_accessor() {
        let mut r = Reasoning::new("thinking");
        assert_eq!(r.signature(), None);
        r.metadata = Some(json!({"signature": "sig-1"}));
        assert_eq!(r.signature(), Some("sig-1"));
    }

    #[test]
    fn tool_choice_serialization() {
        assert_eq!(serde_json::to_value(ToolChoice::Auto).unwrap(), json!("auto"));
        assert_eq!(
            serde_json::to_value(ToolChoice::Tool("search".into())).unwrap(),
            json!("search")
        );
        let parsed: ToolChoice = serde_json::from_value(json!("required")).unwrap();
        assert_eq!(parsed, ToolChoice::Required);
        let parsed: ToolChoice = serde_json::from_value(json!("my_tool")).unwrap();
        assert_eq!(parsed, ToolChoice::Tool("my_tool".into()));
    }
}
