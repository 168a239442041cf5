//! Block execution: resolves inputs, dispatches by block family, writes the
//! output into the run context, and appends exactly one log record per
//! invocation.

mod agent;
mod condition;
mod route;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::context::{BlockLog, ExecutionContext};
use crate::control::ControlFlowTracker;
use crate::error::EngineError;
use crate::provider::ProviderRegistry;
use crate::registry::{BlockCatalog, ToolRegistry};
use crate::resolver::Resolver;
use crate::workflow::{Block, SerializedWorkflow, kind};

/// Executes individual blocks for one run. Holds only borrows; all per-run
/// state lives in the [`ExecutionContext`] and [`ControlFlowTracker`].
pub struct BlockRunner<'a> {
    workflow: &'a SerializedWorkflow,
    context: &'a ExecutionContext,
    tracker: &'a ControlFlowTracker,
    tools: &'a dyn ToolRegistry,
    catalog: &'a dyn BlockCatalog,
    providers: &'a ProviderRegistry,
}

impl<'a> BlockRunner<'a> {
    pub fn new(
        workflow: &'a SerializedWorkflow,
        context: &'a ExecutionContext,
        tracker: &'a ControlFlowTracker,
        tools: &'a dyn ToolRegistry,
        catalog: &'a dyn BlockCatalog,
        providers: &'a ProviderRegistry,
    ) -> Self {
        Self {
            workflow,
            context,
            tracker,
            tools,
            catalog,
            providers,
        }
    }

    pub fn workflow(&self) -> &'a SerializedWorkflow {
        self.workflow
    }

    pub fn context(&self) -> &'a ExecutionContext {
        self.context
    }

    pub fn tracker(&self) -> &'a ControlFlowTracker {
        self.tracker
    }

    pub(crate) fn tools(&self) -> &dyn ToolRegistry {
        self.tools
    }

    pub(crate) fn catalog(&self) -> &dyn BlockCatalog {
        self.catalog
    }

    pub(crate) fn providers(&self) -> &ProviderRegistry {
        self.providers
    }

    /// Resolve a block's parameters against the current run state. Runs
    /// before its layer executes, so a block never observes the outputs of
    /// its own layer siblings.
    pub fn resolve_inputs(&self, block: &Block) -> Result<Map<String, Value>, EngineError> {
        Resolver::new(self.workflow, self.context).resolve_inputs(block)
    }

    /// Execute one block with pre-resolved inputs. Writes the output to the
    /// run context and appends the invocation's log record before returning.
    pub async fn execute(
        &self,
        block: &Block,
        inputs: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        let started_at = Utc::now();
        debug!(block = %block.id, block_kind = %block.metadata.kind, "executing block");
        let result = self.dispatch(block, inputs).await;
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        match &result {
            Ok(output) => {
                self.context.set_state(&block.id, output.clone());
                self.context.push_log(BlockLog {
                    block_id: block.id.clone(),
                    block_title: block.metadata.title.clone(),
                    block_type: block.metadata.kind.clone(),
                    started_at,
                    ended_at,
                    duration_ms,
                    success: true,
                    output: Some(output.clone()),
                    error: None,
                });
            }
            Err(error) => {
                self.context.push_log(BlockLog {
                    block_id: block.id.clone(),
                    block_title: block.metadata.title.clone(),
                    block_type: block.metadata.kind.clone(),
                    started_at,
                    ended_at,
                    duration_ms,
                    success: false,
                    output: None,
                    error: Some(error.to_string()),
                });
            }
        }
        result
    }

    /// Record a failure that happened before dispatch (input resolution).
    pub fn log_failure(&self, block: &Block, error: &EngineError) {
        let now = Utc::now();
        self.context.push_log(BlockLog {
            block_id: block.id.clone(),
            block_title: block.metadata.title.clone(),
            block_type: block.metadata.kind.clone(),
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            success: false,
            output: None,
            error: Some(error.to_string()),
        });
    }

    async fn dispatch(
        &self,
        block: &Block,
        inputs: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        if !block.enabled {
            return Err(EngineError::DisabledBlock(block.id.clone()));
        }
        match block.metadata.kind.as_str() {
            kind::ROUTER => route::run_router(self, block, &inputs).await,
            kind::EVALUATOR => route::run_evaluator(self, block, &inputs).await,
            kind::CONDITION => condition::run(self, block, &inputs),
            kind::AGENT => agent::run(self, block, &inputs).await,
            _ => self.run_tool_block(block, &inputs).await,
        }
    }

    /// Any non-control block is a tool invocation; the output is wrapped
    /// under the conventional `response` key.
    async fn run_tool_block(
        &self,
        block: &Block,
        inputs: &Map<String, Value>,
    ) -> Result<Value, EngineError> {
        let tool_id = block.config.tool.as_str();
        if self.tools.get_tool(tool_id).is_none() {
            return Err(EngineError::ToolNotFound(tool_id.to_string()));
        }
        let outcome = self.tools.execute_tool(tool_id, inputs).await;
        if !outcome.success {
            return Err(EngineError::ToolFailed {
                tool: tool_id.to_string(),
                message: outcome
                    .error
                    .unwrap_or_else(|| "tool reported failure".to_string()),
            });
        }
        Ok(json!({"response": outcome.output.unwrap_or(Value::Null)}))
    }
}

/// Read a string parameter, treating absent and null alike.
pub(crate) fn str_param<'m>(inputs: &'m Map<String, Value>, key: &str) -> Option<&'m str> {
    inputs.get(key).and_then(Value::as_str)
}
