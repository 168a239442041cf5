//! Consumed collaborator interfaces: the tool registry the engine executes
//! tools through, and the block catalog that maps block types to tool ids
//! for agent tool formatting. The engine defines these seams; hosts
//! implement them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared shape of one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParamSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A tool the engine can invoke by id with a parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: HashMap<String, ToolParamSpec>,
}

/// Result of a tool invocation. A `success: false` outcome fails the calling
/// block with the tool's error message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(message.into()),
        }
    }
}

/// Tool lookup and execution, provided by the host.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn get_tool(&self, tool_id: &str) -> Option<ToolDescriptor>;

    async fn execute_tool(
        &self,
        tool_id: &str,
        params: &serde_json::Map<String, Value>,
    ) -> ToolOutcome;
}

/// Catalog entry for a block type; `tool_id` is the tool that backs it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub tool_id: String,
}

/// Maps block types to their backing tools, provided by the host. Used when
/// expanding an agent block's `tools` list into provider function specs.
pub trait BlockCatalog: Send + Sync {
    fn get_block(&self, block_type: &str) -> Option<CatalogEntry>;
}
