//! Router and evaluator blocks: a single provider call whose response names
//! exactly one outgoing target. The chosen path is recorded with the
//! control-flow tracker and gates the rest of the run.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::block::{BlockRunner, str_param};
use crate::error::EngineError;
use crate::provider::{ChatMessage, ProviderRequest, TokenUsage};
use crate::value;
use crate::workflow::Block;

pub(crate) const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Decider {
    Router,
    Evaluator,
}

pub(crate) async fn run_router(
    runner: &BlockRunner<'_>,
    block: &Block,
    inputs: &Map<String, Value>,
) -> Result<Value, EngineError> {
    run_decider(runner, block, inputs, Decider::Router).await
}

pub(crate) async fn run_evaluator(
    runner: &BlockRunner<'_>,
    block: &Block,
    inputs: &Map<String, Value>,
) -> Result<Value, EngineError> {
    run_decider(runner, block, inputs, Decider::Evaluator).await
}

async fn run_decider(
    runner: &BlockRunner<'_>,
    block: &Block,
    inputs: &Map<String, Value>,
    decider: Decider,
) -> Result<Value, EngineError> {
    let prompt = str_param(inputs, "prompt").unwrap_or_default().to_string();
    let content = str_param(inputs, "content").unwrap_or_default().to_string();
    let model = str_param(inputs, "model").unwrap_or(DEFAULT_MODEL).to_string();
    let api_key = str_param(inputs, "apiKey").unwrap_or_default().to_string();
    let temperature = inputs.get("temperature").and_then(Value::as_f64).unwrap_or(0.0);

    let targets: Vec<&Block> = {
        let workflow = runner.workflow();
        let mut targets = Vec::new();
        for conn in workflow.outgoing(&block.id) {
            let target = workflow
                .block(&conn.target)
                .ok_or_else(|| EngineError::BlockNotFound(conn.target.clone()))?;
            targets.push(target);
        }
        targets
    };

    let request = ProviderRequest {
        model: model.clone(),
        system_prompt: Some(destinations_prompt(runner, &targets)),
        messages: vec![ChatMessage::user(prompt.clone())],
        temperature: Some(temperature),
        max_tokens: None,
        api_key: api_key.clone(),
        response_format: None,
        functions: Vec::new(),
    };

    let driver = runner.providers().driver_for_model(&model)?;
    let payload = driver.transform_request(&request)?;
    let raw = runner
        .providers()
        .transport()
        .send(&driver.id(), payload, &api_key)
        .await?;
    let response = driver.transform_response(&raw)?;

    let decision = response.content.trim().to_lowercase();
    let mut matching = targets.iter().filter(|t| t.id.to_lowercase() == decision);
    let chosen = match (matching.next(), matching.next()) {
        (Some(block), None) => *block,
        _ => {
            return Err(EngineError::BadDecision {
                decider: block.id.clone(),
                decision,
            });
        }
    };
    debug!(block = %block.id, chosen = %chosen.id, "path selected");

    match decider {
        Decider::Router => runner.tracker().record_router(&block.id, &chosen.id),
        Decider::Evaluator => runner.tracker().record_evaluator(&block.id, &chosen.id),
    }

    let tokens = response.tokens.unwrap_or_default();
    let echoed = match decider {
        Decider::Router => prompt,
        Decider::Evaluator => content,
    };
    Ok(json!({
        "response": {
            "content": echoed,
            "model": response.model,
            "tokens": tokens_json(&tokens),
            "selectedPath": {
                "blockId": chosen.id,
                "blockType": chosen.metadata.kind,
                "blockTitle": chosen.metadata.title,
            },
        }
    }))
}

pub(crate) fn tokens_json(tokens: &TokenUsage) -> Value {
    json!({
        "prompt": tokens.prompt,
        "completion": tokens.completion,
        "total": tokens.total,
    })
}

/// Deterministic system prompt listing every outgoing target with its
/// identity, parameters, and current state.
fn destinations_prompt(runner: &BlockRunner<'_>, targets: &[&Block]) -> String {
    let mut prompt = String::from(
        "You direct workflow traffic. Based on the user's request, choose exactly one \
         of the destination blocks listed below.\n\nDestinations:\n",
    );
    for target in targets {
        let state = runner
            .context()
            .state(&target.id)
            .map(|v| value::compact(&v))
            .unwrap_or_else(|| "null".to_string());
        prompt.push_str(&format!(
            "- id: {}\n  type: {}\n  title: {}\n  description: {}\n  params: {}\n  state: {}\n",
            target.id,
            target.metadata.kind,
            target.metadata.title,
            target.metadata.description,
            value::compact(&Value::Object(target.config.params.clone())),
            state,
        ));
    }
    prompt.push_str("\nRespond with the id of exactly one destination block and nothing else.");
    prompt
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::context::ExecutionContext;
    use crate::control::ControlFlowTracker;
    use crate::provider::{ProviderRegistry, ProviderTransport};
    use crate::registry::{BlockCatalog, CatalogEntry, ToolOutcome, ToolRegistry};
    use crate::workflow::{BlockConfig, BlockMetadata, SerializedWorkflow};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoTools;

    #[async_trait]
    impl ToolRegistry for NoTools {
        fn get_tool(&self, _tool_id: &str) -> Option<crate::registry::ToolDescriptor> {
            None
        }

        async fn execute_tool(
            &self,
            _tool_id: &str,
            _params: &Map<String, Value>,
        ) -> ToolOutcome {
            ToolOutcome::fail("no tools in this test")
        }
    }

    struct NoCatalog;

    impl BlockCatalog for NoCatalog {
        fn get_block(&self, _block_type: &str) -> Option<CatalogEntry> {
            None
        }
    }

    struct NoTransport;

    #[async_trait]
    impl ProviderTransport for NoTransport {
        async fn send(
            &self,
            provider: &crate::provider::ProviderId,
            _payload: Value,
            _api_key: &str,
        ) -> Result<Value, crate::provider::ProviderError> {
            Err(crate::provider::ProviderError::transport(
                provider.clone(),
                "unused",
            ))
        }
    }

    fn make_block(id: &str, block_kind: &str, title: &str, params: Value) -> Block {
        Block {
            id: id.to_string(),
            enabled: true,
            metadata: BlockMetadata {
                kind: block_kind.to_string(),
                title: title.to_string(),
                description: String::new(),
            },
            config: BlockConfig {
                tool: String::new(),
                params: params.as_object().cloned().unwrap_or_default(),
            },
            inputs: Value::Null,
            outputs: Value::Null,
        }
    }

    #[test]
    fn destinations_prompt_lists_targets_in_order() {
        let workflow = SerializedWorkflow {
            blocks: vec![
                make_block("x1", "function", "Handle X", json!({"note": "left"})),
                make_block("y1", "function", "Handle Y", json!({})),
            ],
            connections: Vec::new(),
            loops: HashMap::new(),
        };
        let ctx = ExecutionContext::new(
            "wf",
            HashMap::from([("x1".to_string(), json!({"response": {"done": true}}))]),
            HashMap::new(),
        );
        let tracker = ControlFlowTracker::new();
        let providers = ProviderRegistry::builder()
            .transport(Arc::new(NoTransport))
            .build()
            .unwrap();
        let runner = BlockRunner::new(&workflow, &ctx, &tracker, &NoTools, &NoCatalog, &providers);
        let targets: Vec<&Block> = workflow.blocks.iter().collect();
        let prompt = destinations_prompt(&runner, &targets);
        let x_at = prompt.find("id: x1").unwrap();
        let y_at = prompt.find("id: y1").unwrap();
        assert!(x_at < y_at);
        assert!(prompt.contains("{\"note\":\"left\"}"));
        assert!(prompt.contains("{\"response\":{\"done\":true}}"));
        assert!(prompt.contains("state: null"), "unexecuted target state is null");
    }
}
