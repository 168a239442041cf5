//! Edge classification and indegree bookkeeping for the layered scheduler.
//!
//! Each connection is classified once at scheduler start as *counted*
//! (contributes to indegree) or *uncounted* (activation depends on a runtime
//! decision): condition-branch edges are uncounted, and an evaluator's edges
//! count only when the target's parameters textually reference the evaluator.

use std::collections::HashMap;

use crate::workflow::{Connection, Loop, SerializedWorkflow, normalize_title};

/// Immutable edge classification plus the live indegree table for one run.
pub struct EdgePlan {
    counted: Vec<bool>,
    indegree: HashMap<String, i64>,
}

impl EdgePlan {
    /// Classify every connection and compute initial indegrees.
    pub fn classify(workflow: &SerializedWorkflow) -> Self {
        let counted: Vec<bool> = workflow
            .connections
            .iter()
            .map(|conn| {
                if conn.condition_id().is_some() {
                    return false;
                }
                let source_is_evaluator = workflow
                    .block(&conn.source)
                    .map(|b| b.is_evaluator())
                    .unwrap_or(false);
                if source_is_evaluator {
                    return target_references_evaluator(workflow, conn);
                }
                true
            })
            .collect();

        let mut indegree: HashMap<String, i64> =
            workflow.blocks.iter().map(|b| (b.id.clone(), 0)).collect();
        for (idx, conn) in workflow.connections.iter().enumerate() {
            if counted[idx] {
                *indegree.entry(conn.target.clone()).or_insert(0) += 1;
            }
        }
        Self { counted, indegree }
    }

    /// Whether the connection at `idx` contributes to indegree.
    pub fn counted(&self, idx: usize) -> bool {
        self.counted.get(idx).copied().unwrap_or(true)
    }

    pub fn indegree(&self, block_id: &str) -> i64 {
        self.indegree.get(block_id).copied().unwrap_or(0)
    }

    /// Satisfy one counted inbound edge of `block_id`. Returns true when the
    /// indegree just reached zero (the block becomes ready). An indegree that
    /// is already zero stays zero and does not re-ready the block.
    pub fn relax(&mut self, block_id: &str) -> bool {
        let entry = self.indegree.entry(block_id.to_string()).or_insert(0);
        if *entry > 0 {
            *entry -= 1;
            *entry == 0
        } else {
            false
        }
    }

    /// Recompute indegrees for a loop body from intra-loop counted edges
    /// only, so its members become schedulable again for the next iteration.
    /// Blocks outside the loop are unaffected.
    pub fn reset_loop(&mut self, workflow: &SerializedWorkflow, body: &Loop) {
        for node in &body.nodes {
            let intra = workflow
                .connections
                .iter()
                .enumerate()
                .filter(|(idx, c)| {
                    self.counted(*idx) && c.target == *node && body.contains(&c.source)
                })
                .count();
            self.indegree.insert(node.clone(), intra as i64);
        }
    }
}

/// Whether the edge's target consumes the evaluator's output: its params,
/// rendered as a flat string, reference the evaluator by id or by
/// normalized title.
fn target_references_evaluator(workflow: &SerializedWorkflow, conn: &Connection) -> bool {
    let (Some(evaluator), Some(target)) =
        (workflow.block(&conn.source), workflow.block(&conn.target))
    else {
        return true;
    };
    let flat = serde_json::Value::Object(target.config.params.clone()).to_string();
    flat.contains(&format!("<{}", evaluator.id))
        || flat.contains(&format!("<{}", normalize_title(&evaluator.metadata.title)))
}

/// Connections out of `block_id` with their indices into the connection list.
pub fn outgoing_indexed<'a>(
    workflow: &'a SerializedWorkflow,
    block_id: &str,
) -> Vec<(usize, &'a Connection)> {
    workflow
        .connections
        .iter()
        .enumerate()
        .filter(|(_, c)| c.source == block_id)
        .collect()
}
