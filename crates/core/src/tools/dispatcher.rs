use super::accumulator::ToolCall;
use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use serde_json::{Value, json};
use std::{collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc};
use tracing::{info, warn};
use wanda_realtime_types::ToolDefinition;

/// A locally implemented function the remote model may invoke.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The exact name the model uses to call this tool.
    fn name(&self) -> &str;

    /// The definition advertised to the model in the session configuration.
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool. An error is reported to the model as a tool error.
    async fn call(&self, arguments: Value) -> anyhow::Result<Value>;
}

/// Result of one dispatched call. Every variant is sent back to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    /// No handler is registered under this name. Not a fault.
    UnknownTool { name: String, expected: Vec<String> },
    /// The handler ran and failed.
    Failed { message: String },
}

impl ToolOutcome {
    /// The JSON value submitted as the tool output.
    pub fn to_output_payload(&self) -> Value {
        match self {
            Self::Success(value) => value.clone(),
            Self::UnknownTool { name, expected } => json!({
                "error": "unknown_function",
                "message": format!(
                    "Unknown function: {name}. Must be {}.",
                    expected.join(" or ")
                ),
            }),
            Self::Failed { message } => json!({
                "error": "tool_error",
                "message": message,
            }),
        }
    }

    /// The serialized tool output carried by `function_call_output`.
    pub fn to_output_string(&self) -> String {
        self.to_output_payload().to_string()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Fixed registry of tools, matched by exact name.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    handlers: Arc<BTreeMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration. A later handler with the same name
    /// replaces the earlier one.
    pub fn with_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        let handlers = Arc::make_mut(&mut self.handlers);
        handlers.insert(handler.name().to_string(), handler);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs one call to completion. Never fails: handler errors and panics
    /// both become [`ToolOutcome::Failed`].
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let Some(handler) = self.handlers.get(&call.name).cloned() else {
            warn!(call_id = %call.call_id, name = %call.name, "unknown tool requested");
            return ToolOutcome::UnknownTool {
                name: call.name.clone(),
                expected: self.names(),
            };
        };

        info!(call_id = %call.call_id, name = %call.name, "dispatching tool call");
        let result = AssertUnwindSafe(handler.call(call.arguments.clone()))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(value)) => ToolOutcome::Success(value),
            Ok(Err(e)) => {
                warn!(call_id = %call.call_id, name = %call.name, error = %e, "tool call failed");
                ToolOutcome::Failed {
                    message: format!("{e:#}"),
                }
            }
            Err(_) => {
                warn!(call_id = %call.call_id, name = %call.name, "tool handler panicked");
                ToolOutcome::Failed {
                    message: format!("{} failed", call.name),
                }
            }
        }
    }

    /// Owned variant of [`Self::dispatch`] for running calls concurrently
    /// from the session loop. Resolves to the call identifier and outcome.
    pub fn spawn_dispatch(&self, call: ToolCall) -> BoxFuture<'static, (String, ToolOutcome)> {
        let dispatcher = self.clone();
        async move {
            let outcome = dispatcher.dispatch(&call).await;
            (call.call_id, outcome)
        }
        .boxed()
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.names())
            .finish()
    }
}
