//! The layered scheduler and the public engine entry point.
//!
//! Blocks execute in dependency layers: the ready queue is snapshotted,
//! filtered through the control-flow tracker, and executed as one concurrent
//! batch. Completions relax outgoing edges under the decision rules, and
//! bounded loops re-arm their members by recomputing intra-loop indegrees.

mod graph;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{Instrument as _, debug};

use crate::block::BlockRunner;
use crate::context::{CancelSignal, ExecutionContext, ExecutionResult, RunMetadata, cancel_pair};
use crate::control::ControlFlowTracker;
use crate::error::EngineError;
use crate::provider::ProviderRegistry;
use crate::registry::{BlockCatalog, ToolRegistry};
use crate::workflow::{Block, SerializedWorkflow};

pub use graph::{EdgePlan, outgoing_indexed};

/// The workflow execution engine. Holds the run-independent collaborators;
/// every call to [`Engine::execute`] gets its own context, so runs may
/// overlap freely in one process.
pub struct Engine {
    tools: Arc<dyn ToolRegistry>,
    catalog: Arc<dyn BlockCatalog>,
    providers: Arc<ProviderRegistry>,
}

impl Engine {
    pub fn new(
        tools: Arc<dyn ToolRegistry>,
        catalog: Arc<dyn BlockCatalog>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            tools,
            catalog,
            providers,
        }
    }

    /// Execute a workflow to completion and return the result, logs, and
    /// timing. Fatal block errors end the run with `success: false`.
    pub async fn execute(
        &self,
        workflow: &SerializedWorkflow,
        initial_block_states: HashMap<String, Value>,
        environment: HashMap<String, String>,
        workflow_id: impl Into<String>,
    ) -> ExecutionResult {
        let (_handle, signal) = cancel_pair();
        self.execute_with_signal(workflow, initial_block_states, environment, workflow_id, signal)
            .await
    }

    /// Like [`Engine::execute`] but cancellable. When the signal fires the
    /// scheduler stops dispatching, drops in-flight block futures at their
    /// next suspension point, and returns a `Cancelled` failure with the
    /// logs accumulated so far.
    pub async fn execute_with_signal(
        &self,
        workflow: &SerializedWorkflow,
        initial_block_states: HashMap<String, Value>,
        environment: HashMap<String, String>,
        workflow_id: impl Into<String>,
        cancel: CancelSignal,
    ) -> ExecutionResult {
        let context = ExecutionContext::new(workflow_id, initial_block_states, environment);
        let span = crate::observability::run_span(context.workflow_id(), context.run_id());
        self.run(workflow, context, cancel).instrument(span).await
    }

    async fn run(
        &self,
        workflow: &SerializedWorkflow,
        context: ExecutionContext,
        mut cancel: CancelSignal,
    ) -> ExecutionResult {
        let tracker = ControlFlowTracker::new();
        let runner = BlockRunner::new(
            workflow,
            &context,
            &tracker,
            self.tools.as_ref(),
            self.catalog.as_ref(),
            &self.providers,
        );
        let mut plan = EdgePlan::classify(workflow);
        let mut iterations: HashMap<&String, u32> =
            workflow.loops.keys().map(|id| (id, 0)).collect();
        let mut queue: Vec<String> = workflow
            .blocks
            .iter()
            .filter(|b| plan.indegree(&b.id) == 0)
            .map(|b| b.id.clone())
            .collect();
        let mut last_output = Value::Null;
        debug!("run started");

        let run_error: Option<EngineError> = 'run: loop {
            if queue.is_empty() {
                break None;
            }
            let mut layer: Vec<&Block> = Vec::with_capacity(queue.len());
            for id in std::mem::take(&mut queue) {
                let Some(block) = workflow.block(&id) else {
                    break 'run Some(EngineError::BlockNotFound(id));
                };
                if !block.enabled || block.is_loop_container() {
                    continue;
                }
                if !tracker.is_block_active(workflow, &plan, &block.id) {
                    continue;
                }
                layer.push(block);
            }
            if layer.is_empty() {
                continue;
            }
            debug!(blocks = ?layer.iter().map(|b| b.id.as_str()).collect::<Vec<_>>(), "dispatching layer");

            // Inputs for the whole layer resolve before anything runs, so a
            // block never observes a layer sibling's output.
            let mut prepared = Vec::with_capacity(layer.len());
            for block in &layer {
                match runner.resolve_inputs(block) {
                    Ok(inputs) => prepared.push((*block, inputs)),
                    Err(error) => {
                        runner.log_failure(block, &error);
                        break 'run Some(error);
                    }
                }
            }

            let runner_ref = &runner;
            let joined = futures::future::join_all(prepared.into_iter().map(
                |(block, inputs)| async move { (block, runner_ref.execute(block, inputs).await) },
            ));
            let results = tokio::select! {
                results = joined => results,
                _ = cancel.cancelled() => break 'run Some(EngineError::Cancelled),
            };

            let mut executed: Vec<&Block> = Vec::with_capacity(results.len());
            let mut failure: Option<EngineError> = None;
            for (block, result) in results {
                match result {
                    Ok(output) => {
                        last_output = output;
                        executed.push(block);
                    }
                    Err(error) => failure = failure.or(Some(error)),
                }
            }
            if let Some(error) = failure {
                break 'run Some(error);
            }

            let mut next: Vec<String> = Vec::new();
            for block in &executed {
                relax_outgoing(workflow, &mut plan, &tracker, &iterations, block, &mut next);
            }

            // Loop reset: a loop whose evaluator just chose to stay inside
            // re-arms its members for another iteration, up to the bound.
            for (loop_id, body) in &workflow.loops {
                if !executed.iter().any(|b| body.contains(&b.id)) {
                    continue;
                }
                let done = iterations.get(loop_id).copied().unwrap_or(0);
                if done + 1 >= body.max_iterations {
                    continue;
                }
                let continues = executed.iter().any(|b| {
                    b.is_evaluator()
                        && body.contains(&b.id)
                        && tracker
                            .decision(&b.id)
                            .is_some_and(|chosen| body.contains(&chosen))
                });
                if !continues {
                    continue;
                }
                debug!(loop_id = %loop_id, iteration = done + 1, "loop re-armed");
                plan.reset_loop(workflow, body);
                for node in &body.nodes {
                    if plan.indegree(node) == 0 {
                        push_unique(&mut next, node);
                    }
                }
                if let Some(count) = iterations.get_mut(loop_id) {
                    *count += 1;
                }
            }

            queue = next;
        };

        let ended_at = Utc::now();
        let started_at = context.started_at();
        let (success, error) = match run_error {
            None => (true, None),
            Some(err) => (false, Some(err.to_string())),
        };
        debug!(success, "run finished");
        ExecutionResult {
            success,
            output: last_output,
            error,
            logs: context.logs(),
            metadata: RunMetadata {
                started_at,
                ended_at,
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
            },
        }
    }
}

/// Relax the outgoing edges of a completed block under the decision rules:
/// deciders relax only their chosen edge (with a direct, one-shot enqueue
/// for evaluator targets inside a loop body that still has iteration
/// budget), condition edges relax only the selected branch, and plain edges
/// relax unconditionally.
fn relax_outgoing(
    workflow: &SerializedWorkflow,
    plan: &mut EdgePlan,
    tracker: &ControlFlowTracker,
    iterations: &HashMap<&String, u32>,
    block: &Block,
    next: &mut Vec<String>,
) {
    let decision = tracker.decision(&block.id);
    for (idx, conn) in outgoing_indexed(workflow, &block.id) {
        if block.is_decider() {
            let Some(chosen) = decision.as_deref() else {
                continue;
            };
            if conn.target != chosen {
                continue;
            }
            if block.is_evaluator()
                && let Some((loop_id, body)) = workflow.loop_containing(&conn.target)
            {
                let done = iterations.get(loop_id).copied().unwrap_or(0);
                if done + 1 < body.max_iterations {
                    push_unique(next, &conn.target);
                }
                continue;
            }
            if plan.counted(idx) {
                if plan.relax(&conn.target) {
                    push_unique(next, &conn.target);
                }
            } else {
                push_unique(next, &conn.target);
            }
        } else if let Some(condition_id) = conn.condition_id() {
            if tracker.condition_choice(&block.id).as_deref() == Some(condition_id) {
                push_unique(next, &conn.target);
            }
        } else if plan.relax(&conn.target) {
            push_unique(next, &conn.target);
        }
    }
}

fn push_unique(queue: &mut Vec<String>, id: &str) {
    if !queue.iter().any(|existing| existing == id) {
        queue.push(id.to_string());
    }
}
