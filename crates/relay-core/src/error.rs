// Error types for the gateway runtime
//
// One enum covers the whole runtime. The recovery contract:
// - Tool errors are always converted into tool-result payloads by the loop,
//   never surfaced as fatal (unless the route itself is missing).
// - Provider failures are not retried here; `is_rate_limit` is exposed so a
//   caller can implement its own retry policy.
// - Vector and MCP partial failures are logged and skipped by discovery.

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur while executing a call spec
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bad call spec, unknown tool, unknown MCP server
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider transport or non-2xx response
    #[error("Provider execution error: {message}")]
    ProviderExecution {
        message: String,
        /// Set when the failure classified as a rate limit (retry-word scan)
        is_rate_limit: bool,
        /// HTTP status, when the failure happened above the transport layer
        status: Option<u16>,
    },

    /// Tool route not found, tool timeout, invalid tool output
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Compat translation failure (unsupported content, SDK-only compat misuse)
    #[error("Compat error: {0}")]
    Compat(String),

    /// Plugin registry failure (unknown name, unreadable manifest)
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// MCP server failure
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Vector store failure (all stores in priority order failed)
    #[error("Vector store error: {0}")]
    Vector(String),

    /// Embedding provider failure (all providers in priority order failed)
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Filesystem failure (document preprocessing, log sinks)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    /// Create a provider execution error
    pub fn provider(msg: impl Into<String>, is_rate_limit: bool, status: Option<u16>) -> Self {
        GatewayError::ProviderExecution {
            message: msg.into(),
            is_rate_limit,
            status,
        }
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        GatewayError::ToolExecution(msg.into())
    }

    /// Create a compat error
    pub fn compat(msg: impl Into<String>) -> Self {
        GatewayError::Compat(msg.into())
    }

    /// Create a plugin error
    pub fn plugin(msg: impl Into<String>) -> Self {
        GatewayError::Plugin(msg.into())
    }

    /// Create an MCP error
    pub fn mcp(msg: impl Into<String>) -> Self {
        GatewayError::Mcp(msg.into())
    }

    /// Create a vector store error
    pub fn vector(msg: impl Into<String>) -> Self {
        GatewayError::Vector(msg.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        GatewayError::Embedding(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        GatewayError::Timeout(msg.into())
    }

    /// Whether this error classified as a rate limit
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            GatewayError::ProviderExecution {
                is_rate_limit: true,
                ..
            }
        )
    }

    /// Short machine-readable code for the HTTP/SSE error envelope
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::ProviderExecution {
                is_rate_limit: true,
                ..
            } => "provider_rate_limited",
            GatewayError::ProviderExecution { .. } => "provider_error",
            GatewayError::ToolExecution(_) => "tool_execution_error",
            GatewayError::Compat(_) => "compat_error",
            GatewayError::Plugin(_) => "plugin_error",
            GatewayError::Mcp(_) => "mcp_error",
            GatewayError::Vector(_) => "vector_error",
            GatewayError::Embedding(_) => "embedding_error",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Io(_) => "io_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}
