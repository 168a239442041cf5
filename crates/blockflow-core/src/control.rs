//! Control-flow decision tracking: which path each router/evaluator chose,
//! which branch each condition selected, and the reachability tests the
//! scheduler consults before running a block.

use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;

use crate::runtime::EdgePlan;
use crate::workflow::{Connection, SerializedWorkflow};

/// Per-run decision state. Decisions are recorded by concurrently executing
/// blocks and consulted by every subsequent layer until the run ends.
#[derive(Default)]
pub struct ControlFlowTracker {
    router_decisions: DashMap<String, String>,
    evaluator_decisions: DashMap<String, String>,
    active_condition_paths: DashMap<String, String>,
}

impl ControlFlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_router(&self, router_id: &str, chosen_block_id: &str) {
        self.router_decisions
            .insert(router_id.to_string(), chosen_block_id.to_string());
    }

    pub fn record_evaluator(&self, evaluator_id: &str, chosen_block_id: &str) {
        self.evaluator_decisions
            .insert(evaluator_id.to_string(), chosen_block_id.to_string());
    }

    pub fn record_condition(&self, condition_block_id: &str, condition_id: &str) {
        self.active_condition_paths
            .insert(condition_block_id.to_string(), condition_id.to_string());
    }

    /// The chosen target of a router or evaluator, if it has decided.
    pub fn decision(&self, block_id: &str) -> Option<String> {
        self.router_decisions
            .get(block_id)
            .or_else(|| self.evaluator_decisions.get(block_id))
            .map(|entry| entry.clone())
    }

    /// The selected branch of a condition block, if it has run.
    pub fn condition_choice(&self, block_id: &str) -> Option<String> {
        self.active_condition_paths
            .get(block_id)
            .map(|entry| entry.clone())
    }

    /// Breadth-first reachability from `chosen_start`, never traversing edges
    /// that originate at a router or evaluator other than `decision_block`.
    /// The decision block itself is always considered reachable.
    pub fn is_in_chosen_path(
        &self,
        workflow: &SerializedWorkflow,
        target: &str,
        chosen_start: &str,
        decision_block: &str,
    ) -> bool {
        if target == decision_block || target == chosen_start {
            return true;
        }
        let mut visited: HashSet<&str> = HashSet::from([chosen_start]);
        let mut frontier: VecDeque<&str> = VecDeque::from([chosen_start]);
        while let Some(current) = frontier.pop_front() {
            if blocks_decisions_elsewhere(workflow, current, decision_block) {
                continue;
            }
            for conn in workflow.outgoing(current) {
                if conn.target == target {
                    return true;
                }
                if visited.insert(&conn.target) {
                    frontier.push_back(&conn.target);
                }
            }
        }
        false
    }

    /// Whether the scheduler may run `block_id` given the decisions so far.
    ///
    /// Two gates apply. First, decision stickiness: a block governed by a
    /// decided router/evaluator must lie in the chosen path. Second, a block
    /// whose inbound edges are all uncounted may only run once one of them is
    /// live (its condition branch was selected, or its evaluator chose it).
    pub fn is_block_active(
        &self,
        workflow: &SerializedWorkflow,
        plan: &EdgePlan,
        block_id: &str,
    ) -> bool {
        for entry in self.router_decisions.iter().chain(self.evaluator_decisions.iter()) {
            let (decider, chosen) = (entry.key(), entry.value());
            if decider == block_id {
                continue;
            }
            if governed_by(workflow, decider).contains(block_id)
                && !self.is_in_chosen_path(workflow, block_id, chosen, decider)
            {
                return false;
            }
        }

        let inbound: Vec<(usize, &Connection)> = workflow
            .connections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.target == block_id)
            .collect();
        if !inbound.is_empty() && inbound.iter().all(|(idx, _)| !plan.counted(*idx)) {
            return inbound.iter().any(|(_, conn)| self.edge_live(conn));
        }
        true
    }

    /// An uncounted edge is live once its gating decision selects it.
    fn edge_live(&self, conn: &Connection) -> bool {
        if let Some(condition_id) = conn.condition_id() {
            return self.condition_choice(&conn.source).as_deref() == Some(condition_id);
        }
        self.decision(&conn.source).as_deref() == Some(conn.target.as_str())
    }
}

fn blocks_decisions_elsewhere(
    workflow: &SerializedWorkflow,
    block_id: &str,
    decision_block: &str,
) -> bool {
    block_id != decision_block
        && workflow
            .block(block_id)
            .map(|b| b.is_decider())
            .unwrap_or(false)
}

/// All blocks a decider governs: reachable from it without crossing another
/// router or evaluator. The decider itself is not part of the set.
fn governed_by(workflow: &SerializedWorkflow, decider: &str) -> HashSet<String> {
    let mut governed: HashSet<String> = HashSet::new();
    let mut frontier: VecDeque<&str> = VecDeque::from([decider]);
    let mut visited: HashSet<&str> = HashSet::from([decider]);
    while let Some(current) = frontier.pop_front() {
        if blocks_decisions_elsewhere(workflow, current, decider) {
            continue;
        }
        for conn in workflow.outgoing(current) {
            governed.insert(conn.target.clone());
            if visited.insert(&conn.target) {
                frontier.push_back(&conn.target);
            }
        }
    }
    governed
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::workflow::{Block, BlockConfig, BlockMetadata};
    use serde_json::json;

    fn make_block(id: &str, block_kind: &str) -> Block {
        Block {
            id: id.to_string(),
            enabled: true,
            metadata: BlockMetadata {
                kind: block_kind.to_string(),
                title: id.to_string(),
                description: String::new(),
            },
            config: BlockConfig {
                tool: String::new(),
                params: json!({}).as_object().cloned().unwrap(),
            },
            inputs: serde_json::Value::Null,
            outputs: serde_json::Value::Null,
        }
    }

    fn conn(source: &str, target: &str) -> Connection {
        Connection {
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
        }
    }

    /// router -> (x -> x2, y -> y2)
    fn router_workflow() -> SerializedWorkflow {
        SerializedWorkflow {
            blocks: vec![
                make_block("r1", "router"),
                make_block("x1", "function"),
                make_block("x2", "function"),
                make_block("y1", "function"),
                make_block("y2", "function"),
            ],
            connections: vec![
                conn("r1", "x1"),
                conn("r1", "y1"),
                conn("x1", "x2"),
                conn("y1", "y2"),
            ],
            loops: HashMap::new(),
        }
    }

    #[test]
    fn chosen_path_reaches_descendants() {
        let wf = router_workflow();
        let tracker = ControlFlowTracker::new();
        assert!(tracker.is_in_chosen_path(&wf, "x1", "x1", "r1"));
        assert!(tracker.is_in_chosen_path(&wf, "x2", "x1", "r1"));
        assert!(tracker.is_in_chosen_path(&wf, "r1", "x1", "r1"));
        assert!(!tracker.is_in_chosen_path(&wf, "y1", "x1", "r1"));
        assert!(!tracker.is_in_chosen_path(&wf, "y2", "x1", "r1"));
    }

    #[test]
    fn traversal_stops_at_other_deciders() {
        let mut wf = router_workflow();
        // x1 is itself a router; its subtree must not leak into r1's chosen path
        wf.blocks[1].metadata.kind = "router".to_string();
        let tracker = ControlFlowTracker::new();
        assert!(tracker.is_in_chosen_path(&wf, "x1", "x1", "r1"));
        assert!(!tracker.is_in_chosen_path(&wf, "x2", "x1", "r1"));
    }

    #[test]
    fn stickiness_excludes_unchosen_subtree() {
        let wf = router_workflow();
        let plan = EdgePlan::classify(&wf);
        let tracker = ControlFlowTracker::new();
        tracker.record_router("r1", "x1");
        assert!(tracker.is_block_active(&wf, &plan, "x1"));
        assert!(tracker.is_block_active(&wf, &plan, "x2"));
        assert!(!tracker.is_block_active(&wf, &plan, "y1"));
        assert!(!tracker.is_block_active(&wf, &plan, "y2"));
        // the decider itself stays live
        assert!(tracker.is_block_active(&wf, &plan, "r1"));
    }

    #[test]
    fn unrelated_blocks_are_unaffected_by_decisions() {
        let mut wf = router_workflow();
        wf.blocks.push(make_block("solo", "function"));
        let plan = EdgePlan::classify(&wf);
        let tracker = ControlFlowTracker::new();
        tracker.record_router("r1", "x1");
        assert!(tracker.is_block_active(&wf, &plan, "solo"));
    }

    #[test]
    fn condition_targets_wait_for_their_branch() {
        let wf = SerializedWorkflow {
            blocks: vec![
                make_block("c1", "condition"),
                make_block("x1", "function"),
                make_block("y1", "function"),
            ],
            connections: vec![
                Connection {
                    source: "c1".to_string(),
                    target: "x1".to_string(),
                    source_handle: Some("condition-if-1".to_string()),
                },
                Connection {
                    source: "c1".to_string(),
                    target: "y1".to_string(),
                    source_handle: Some("condition-else-1".to_string()),
                },
            ],
            loops: HashMap::new(),
        };
        let plan = EdgePlan::classify(&wf);
        let tracker = ControlFlowTracker::new();
        assert!(!tracker.is_block_active(&wf, &plan, "x1"));
        assert!(!tracker.is_block_active(&wf, &plan, "y1"));
        tracker.record_condition("c1", "else-1");
        assert!(!tracker.is_block_active(&wf, &plan, "x1"));
        assert!(tracker.is_block_active(&wf, &plan, "y1"));
    }
}
