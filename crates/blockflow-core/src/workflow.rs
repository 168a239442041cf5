//! Serialized workflow data model: blocks, connections, and bounded loops.
//!
//! A workflow arrives fully serialized from the authoring side. The engine
//! never mutates it; per-run state lives in [`crate::context::ExecutionContext`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Source handles with this prefix mark an edge as a condition branch.
pub const CONDITION_HANDLE_PREFIX: &str = "condition-";

/// Block types with engine-level semantics. Anything else dispatches as a tool block.
pub mod kind {
    pub const AGENT: &str = "agent";
    pub const ROUTER: &str = "router";
    pub const EVALUATOR: &str = "evaluator";
    pub const CONDITION: &str = "condition";
    pub const FUNCTION: &str = "function";
    /// Editor-side loop container; carries no runtime semantics.
    pub const LOOP: &str = "loop";
}

/// A complete serialized workflow: blocks, connections, and the loop map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedWorkflow {
    pub blocks: Vec<Block>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub loops: HashMap<String, Loop>,
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    /// Disabled blocks never run.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub metadata: BlockMetadata,
    pub config: BlockConfig,
    /// Advisory input schema; not enforced by the engine.
    #[serde(default)]
    pub inputs: serde_json::Value,
    /// Advisory output schema; not enforced by the engine.
    #[serde(default)]
    pub outputs: serde_json::Value,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Block family tag; see [`kind`].
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Tool binding and raw parameters. Parameter values may contain unresolved
/// `<block.path>` and `{{VAR}}` references until the resolver runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A directed edge. A `condition-<id>` source handle marks the edge as
/// governed by that condition branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Connection {
    /// The condition id this edge is governed by, if any.
    pub fn condition_id(&self) -> Option<&str> {
        self.source_handle
            .as_deref()
            .and_then(|h| h.strip_prefix(CONDITION_HANDLE_PREFIX))
    }
}

/// A bounded loop, identified structurally by the block ids of its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loop {
    pub nodes: Vec<String>,
    pub max_iterations: u32,
}

impl Loop {
    pub fn contains(&self, block_id: &str) -> bool {
        self.nodes.iter().any(|n| n == block_id)
    }
}

impl Block {
    pub fn is_router(&self) -> bool {
        self.metadata.kind == kind::ROUTER
    }

    pub fn is_evaluator(&self) -> bool {
        self.metadata.kind == kind::EVALUATOR
    }

    /// Routers and evaluators both select a single downstream path.
    pub fn is_decider(&self) -> bool {
        self.is_router() || self.is_evaluator()
    }

    pub fn is_condition(&self) -> bool {
        self.metadata.kind == kind::CONDITION
    }

    pub fn is_agent(&self) -> bool {
        self.metadata.kind == kind::AGENT
    }

    pub fn is_loop_container(&self) -> bool {
        self.metadata.kind == kind::LOOP
    }
}

/// Title normalization used for reference lookup: lowercase, whitespace removed.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

impl SerializedWorkflow {
    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Resolve a reference name to a block: exact id match first, then
    /// normalized title.
    pub fn block_by_reference(&self, name: &str) -> Option<&Block> {
        if let Some(block) = self.block(name) {
            return Some(block);
        }
        let wanted = normalize_title(name);
        self.blocks
            .iter()
            .find(|b| normalize_title(&b.metadata.title) == wanted)
    }

    /// Connections out of `block_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.connections.iter().filter(move |c| c.source == block_id)
    }

    /// Connections into `block_id`, in declaration order.
    pub fn incoming<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.connections.iter().filter(move |c| c.target == block_id)
    }

    /// The loop whose body contains `block_id`, if any.
    pub fn loop_containing(&self, block_id: &str) -> Option<(&String, &Loop)> {
        self.loops.iter().find(|(_, lp)| lp.contains(block_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_block(id: &str, title: &str) -> Block {
        Block {
            id: id.to_string(),
            enabled: true,
            metadata: BlockMetadata {
                kind: "function".to_string(),
                title: title.to_string(),
                description: String::new(),
            },
            config: BlockConfig {
                tool: "noop".to_string(),
                params: serde_json::Map::new(),
            },
            inputs: serde_json::Value::Null,
            outputs: serde_json::Value::Null,
        }
    }

    fn sample_workflow() -> SerializedWorkflow {
        SerializedWorkflow {
            blocks: vec![sample_block("a1", "First Step"), sample_block("b1", "Second Step")],
            connections: vec![Connection {
                source: "a1".to_string(),
                target: "b1".to_string(),
                source_handle: None,
            }],
            loops: HashMap::new(),
        }
    }

    #[test]
    fn block_lookup_by_id_and_title() {
        let wf = sample_workflow();
        assert_eq!(wf.block_by_reference("a1").unwrap().id, "a1");
        assert_eq!(wf.block_by_reference("firststep").unwrap().id, "a1");
        assert_eq!(wf.block_by_reference("SecondStep").unwrap().id, "b1");
        assert!(wf.block_by_reference("missing").is_none());
    }

    #[test]
    fn normalize_title_strips_whitespace_and_case() {
        assert_eq!(normalize_title("Weather Check 2"), "weathercheck2");
        assert_eq!(normalize_title(" already-normal "), "already-normal");
    }

    #[test]
    fn condition_handle_parsing() {
        let conn = Connection {
            source: "c1".to_string(),
            target: "x1".to_string(),
            source_handle: Some("condition-branch-7".to_string()),
        };
        assert_eq!(conn.condition_id(), Some("branch-7"));
        let plain = Connection {
            source: "c1".to_string(),
            target: "x1".to_string(),
            source_handle: Some("output".to_string()),
        };
        assert_eq!(plain.condition_id(), None);
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let raw = json!({
            "blocks": [{
                "id": "a1",
                "metadata": {"type": "agent", "title": "Agent 1"},
                "config": {"tool": "", "params": {"model": "gpt-4o"}}
            }],
            "connections": [{"source": "a1", "target": "b1", "sourceHandle": "condition-x"}],
            "loops": {"loop-1": {"nodes": ["a1"], "maxIterations": 3}}
        });
        let wf: SerializedWorkflow = serde_json::from_value(raw).unwrap();
        assert!(wf.blocks[0].enabled, "enabled defaults to true");
        assert_eq!(wf.connections[0].condition_id(), Some("x"));
        assert_eq!(wf.loops["loop-1"].max_iterations, 3);
        let back = serde_json::to_string(&wf).unwrap();
        let restored: SerializedWorkflow = serde_json::from_str(&back).unwrap();
        assert_eq!(restored, wf);
    }

    #[test]
    fn loop_membership() {
        let lp = Loop {
            nodes: vec!["g1".to_string(), "e1".to_string()],
            max_iterations: 5,
        };
        assert!(lp.contains("g1"));
        assert!(!lp.contains("z1"));
    }
}
