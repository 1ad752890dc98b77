// Call coordinator
//
// Executes one LlmCallSpec end-to-end: resolves the first provider in the
// priority list, deep-merges its setting overrides, partitions settings,
// preprocesses document content, lazily assembles the tool stack (only
// when the spec names a tool source), makes the initial provider call, and
// hands off to the tool loop when the response asks for tools. A batch id
// from the spec metadata scopes the call's log sinks.
//
// One coordinator lives for one request; `close` drains the lazy
// subsystems (MCP pool, vector adapters).

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::compat::Compat;
use crate::document::resolve_document_sources;
use crate::error::{GatewayError, Result};
use crate::events::LlmStreamEvent;
use crate::logging::with_batch_id;
use crate::message::Message;
use crate::provider::{ProviderManager, ProviderManifest};
use crate::registry::PluginSource;
use crate::response::LlmResponse;
use crate::retrieval::mcp::McpManager;
use crate::retrieval::vector::{VectorManager, VectorStore};
use crate::settings::{deep_merge, partition_settings, PartitionedSettings};
use crate::spec::LlmCallSpec;
use crate::tools::discovery::discover_tools;
use crate::tools::dispatch::ToolDispatcher;
use crate::tools::runner::ToolLoop;
use crate::tools::{DiscoveredTools, ModuleHandlerRegistry};

/// The lazily-built tool subsystem for one run
struct ToolStack {
    discovered: DiscoveredTools,
    dispatcher: ToolDispatcher,
    mcp: Option<Arc<McpManager>>,
    vector: Option<Arc<VectorManager>>,
}

impl ToolStack {
    async fn close(&self) {
        if let Some(mcp) = &self.mcp {
            mcp.close().await;
        }
        if let Some(vector) = &self.vector {
            vector.close().await;
        }
    }
}

/// Resolved provider identity for one run
struct ResolvedProvider {
    manifest: Arc<ProviderManifest>,
    compat: Arc<dyn Compat>,
    model: String,
    settings: PartitionedSettings,
}

/// Per-request coordinator
pub struct Coordinator {
    registry: Arc<dyn PluginSource>,
    manager: ProviderManager,
    modules: ModuleHandlerRegistry,
}

impl Coordinator {
    pub fn new(registry: Arc<dyn PluginSource>, modules: ModuleHandlerRegistry) -> Self {
        Self {
            registry,
            manager: ProviderManager::new(),
            modules,
        }
    }

    /// Override the provider manager (tests point its log root elsewhere)
    pub fn with_manager(mut self, manager: ProviderManager) -> Self {
        self.manager = manager;
        self
    }

    async fn resolve_provider(&self, spec: &LlmCallSpec) -> Result<ResolvedProvider> {
        let entry = spec
            .llm_priority
            .first()
            .ok_or_else(|| GatewayError::validation("llmPriority must not be empty"))?;

        let manifest = self.registry.provider(&entry.provider).await?;
        let compat = self.registry.compat(&manifest.compat).await?;

        // Per-provider settings deep-merge over the spec settings
        let mut merged = Value::Object(spec.settings.clone());
        if let Some(overrides) = &entry.settings {
            deep_merge(&mut merged, &Value::Object(overrides.clone()));
        }
        let merged_map = merged.as_object().cloned().unwrap_or_default();

        Ok(ResolvedProvider {
            manifest,
            compat,
            model: entry.model.clone(),
            settings: partition_settings(&merged_map),
        })
    }

    /// Assemble the tool stack. Called only when the spec names a tool
    /// source; a spec without tools never touches tool, MCP, or vector
    /// plugins.
    async fn build_tool_stack(&self, spec: &LlmCallSpec) -> Result<ToolStack> {
        let mcp = if spec.mcp_servers.is_empty() {
            None
        } else {
            let manifests = self.registry.mcp_servers(&spec.mcp_servers).await?;
            Some(Arc::new(McpManager::new(
                manifests.iter().map(|m| (**m).clone()).collect(),
            )))
        };

        let mut stores: Vec<Arc<dyn VectorStore>> = Vec::new();
        for store_id in &spec.vector_priority {
            // Partial failures are skipped; discovery continues with
            // the remaining stores
            let built = async {
                let manifest = self.registry.vector_store(store_id).await?;
                let compat = self.registry.vector_store_compat(&manifest.kind).await?;
                compat.build(&manifest)
            }
            .await;
            match built {
                Ok(store) => stores.push(store),
                Err(e) => {
                    warn!(store = %store_id, error = %e, "vector store unavailable; skipping");
                }
            }
        }
        // A vectorContext-only spec still gets a manager (with zero
        // stores) so the built-in search tool and its route stay
        // available; queries against it fail as ordinary tool errors
        let vector = if stores.is_empty() && spec.vector_context.is_none() {
            None
        } else {
            Some(Arc::new(VectorManager::new(stores)))
        };

        let discovered =
            discover_tools(spec, self.registry.as_ref(), mcp.as_ref(), vector.as_ref()).await?;

        let routes = self.registry.process_routes().await?;
        let mut dispatcher = ToolDispatcher::new(routes, self.modules.clone());
        if let Some(mcp) = &mcp {
            dispatcher = dispatcher.with_mcp(mcp.clone());
        }
        // Keyed off the context, not off whether any store resolved
        if let Some(context) = &spec.vector_context {
            let manager = vector
                .clone()
                .unwrap_or_else(|| Arc::new(VectorManager::new(Vec::new())));
            dispatcher = dispatcher.with_vector(manager, context.clone());
        }

        Ok(ToolStack {
            discovered,
            dispatcher,
            mcp,
            vector,
        })
    }

    /// Execute the spec and return the concluding response
    pub async fn run(&self, spec: LlmCallSpec) -> Result<LlmResponse> {
        spec.validate()?;
        let batch_id = spec.metadata_str("batchId").map(str::to_string);
        with_batch_id(batch_id, self.run_inner(spec)).await
    }

    async fn run_inner(&self, spec: LlmCallSpec) -> Result<LlmResponse> {
        let resolved = self.resolve_provider(&spec).await?;

        let mut messages: Vec<Message> = spec.messages.clone();
        resolve_document_sources(&mut messages).await?;

        // Tool stack only exists when a tool source is configured
        let stack = if spec.wants_tools() {
            Some(self.build_tool_stack(&spec).await?)
        } else {
            None
        };

        let result = self
            .drive(&resolved, &mut messages, stack.as_ref())
            .await;

        if let Some(stack) = &stack {
            stack.close().await;
        }
        result
    }

    async fn drive(
        &self,
        resolved: &ResolvedProvider,
        messages: &mut Vec<Message>,
        stack: Option<&ToolStack>,
    ) -> Result<LlmResponse> {
        let empty_tools = DiscoveredTools::default();
        let discovered = stack.map(|s| &s.discovered).unwrap_or(&empty_tools);
        let tool_choice = crate::message::ToolChoice::Auto;

        let request = crate::compat::CompatRequest {
            model: &resolved.model,
            system: None,
            messages: messages.as_slice(),
            settings: &resolved.settings.provider,
            tools: &discovered.tools,
            tool_choice: &tool_choice,
            streaming: false,
        };
        let initial = self
            .manager
            .execute(
                resolved.manifest.as_ref(),
                resolved.compat.as_ref(),
                &request,
                resolved.settings.extras.clone(),
            )
            .await?;

        let Some(stack) = stack else {
            return Ok(initial);
        };
        if !initial.has_tool_calls() {
            return Ok(initial);
        }

        let tool_loop = ToolLoop {
            manager: &self.manager,
            manifest: resolved.manifest.as_ref(),
            compat: resolved.compat.as_ref(),
            dispatcher: &stack.dispatcher,
            discovered: &stack.discovered,
            settings: &resolved.settings.provider,
            runtime: &resolved.settings.runtime,
            extras: &resolved.settings.extras,
            model: &resolved.model,
        };
        tool_loop.run(messages, initial).await
    }

    /// Execute the spec as a stream of canonical events.
    ///
    /// Resolution errors surface synchronously; everything after the
    /// spawn arrives in-stream, with failures as terminal error events.
    /// Dropping the receiver cancels the producer on its next send.
    pub async fn stream(
        self: Arc<Self>,
        spec: LlmCallSpec,
    ) -> Result<mpsc::Receiver<LlmStreamEvent>> {
        spec.validate()?;
        let resolved = self.resolve_provider(&spec).await?;

        let (tx, rx) = mpsc::channel::<LlmStreamEvent>(64);
        let coordinator = self.clone();
        let batch_id = spec.metadata_str("batchId").map(str::to_string);

        tokio::spawn(with_batch_id(batch_id, async move {
            if let Err(e) = coordinator.stream_inner(&resolved, spec, &tx).await {
                let _ = tx
                    .send(LlmStreamEvent::error(e.to_string(), Some(e.code())))
                    .await;
            }
        }));

        Ok(rx)
    }

    async fn stream_inner(
        &self,
        resolved: &ResolvedProvider,
        spec: LlmCallSpec,
        tx: &mpsc::Sender<LlmStreamEvent>,
    ) -> Result<()> {
        let mut messages: Vec<Message> = spec.messages.clone();
        resolve_document_sources(&mut messages).await?;

        let stack = if spec.wants_tools() {
            Some(self.build_tool_stack(&spec).await?)
        } else {
            None
        };

        let empty_tools = DiscoveredTools::default();
        // A routeless dispatcher stands in when the spec configures no
        // tools; the loop then never executes a round
        let fallback_dispatcher =
            ToolDispatcher::new(Arc::new(Vec::new()), ModuleHandlerRegistry::new());
        let tool_loop = ToolLoop {
            manager: &self.manager,
            manifest: resolved.manifest.as_ref(),
            compat: resolved.compat.as_ref(),
            dispatcher: stack
                .as_ref()
                .map(|s| &s.dispatcher)
                .unwrap_or(&fallback_dispatcher),
            discovered: stack.as_ref().map(|s| &s.discovered).unwrap_or(&empty_tools),
            settings: &resolved.settings.provider,
            runtime: &resolved.settings.runtime,
            extras: &resolved.settings.extras,
            model: &resolved.model,
        };

        let result = tool_loop.run_streaming(&mut messages, tx).await;

        if let Some(stack) = &stack {
            stack.close().await;
        }
        result
    }
}
