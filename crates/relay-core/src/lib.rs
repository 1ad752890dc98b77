// Relay core runtime
//
// The runtime between the call-spec boundary and the remote providers:
// unified data model, per-provider compat modules, the provider manager,
// the tool subsystem, and the coordinator that drives a call end-to-end.
// The HTTP facade (relay-api) and the filesystem plugin registry
// (relay-plugins) sit on top of this crate.

pub mod budget;
pub mod compat;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod events;
pub mod logging;
pub mod message;
pub mod payload;
pub mod provider;
pub mod prune;
pub mod registry;
pub mod response;
pub mod retrieval;
pub mod sanitize;
pub mod settings;
pub mod spec;
pub mod tools;

pub use budget::ToolCallBudget;
pub use coordinator::Coordinator;
pub use error::{GatewayError, Result};
pub use events::{LlmStreamEvent, StreamError, ToolEvent};
pub use message::{
    ContentPart, DocumentSource, Message, Reasoning, Role, ToolCall, ToolChoice, UnifiedTool,
};
pub use registry::PluginSource;
pub use response::{FinishReason, LlmResponse, Usage};
pub use spec::{EmbeddingCallSpec, LlmCallSpec, LlmPriorityEntry, VectorCallSpec, VectorContext};
