//! Condition blocks: an ordered `if` / `else if` / `else` chain evaluated
//! against the upstream block's output. Exactly one branch is selected and
//! recorded; its `condition-<id>` edge becomes the live path.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::block::BlockRunner;
use crate::error::EngineError;
use crate::expr;
use crate::resolver::Resolver;
use crate::value::truthy;
use crate::workflow::Block;

const ELSE_TITLE: &str = "else";

#[derive(Debug, Clone, Deserialize)]
struct ConditionBranch {
    id: String,
    title: String,
    #[serde(default)]
    value: String,
}

pub(crate) fn run(
    runner: &BlockRunner<'_>,
    block: &Block,
    inputs: &Map<String, Value>,
) -> Result<Value, EngineError> {
    let branches = parse_branches(inputs)?;
    let source = source_block(runner, block)?;
    let source_output = runner.context().state(&source.id).unwrap_or(Value::Null);
    let scope = evaluation_scope(&source_output);

    let resolver = Resolver::new(runner.workflow(), runner.context());
    let mut selected: Option<(&ConditionBranch, bool)> = None;
    for branch in &branches {
        if branch.title == ELSE_TITLE {
            selected = Some((branch, true));
            break;
        }
        let resolved = resolver.resolve_param(block, "condition", &Value::String(branch.value.clone()))?;
        let text = match &resolved {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let outcome = expr::evaluate(&text, &scope).map_err(|e| EngineError::Expression(e.to_string()))?;
        if truthy(&outcome) {
            selected = Some((branch, true));
            break;
        }
    }
    let Some((branch, outcome)) = selected else {
        return Err(EngineError::NoConditionMatch);
    };
    debug!(block = %block.id, branch = %branch.id, "condition branch selected");
    runner.tracker().record_condition(&block.id, &branch.id);

    let selected_path = runner
        .workflow()
        .outgoing(&block.id)
        .find(|c| c.condition_id() == Some(branch.id.as_str()))
        .and_then(|c| runner.workflow().block(&c.target))
        .map(|target| {
            json!({
                "blockId": target.id,
                "blockType": target.metadata.kind,
                "blockTitle": target.metadata.title,
            })
        })
        .unwrap_or(Value::Null);

    let content = if branch.title == ELSE_TITLE {
        "no prior condition matched; took the else branch".to_string()
    } else {
        format!("matched {} condition: {}", branch.title, branch.value)
    };
    let result = if outcome { source_output } else { Value::Bool(false) };
    Ok(json!({
        "response": {
            "result": result,
            "content": content,
            "condition": {
                "result": outcome,
                "selectedConditionId": branch.id,
                "selectedPath": selected_path,
            },
        }
    }))
}

/// `params.conditions` is a serialized ordered sequence of branches; accept
/// both the JSON-string and already-structured forms.
fn parse_branches(inputs: &Map<String, Value>) -> Result<Vec<ConditionBranch>, EngineError> {
    let raw = inputs
        .get("conditions")
        .ok_or_else(|| EngineError::ConditionConfig("missing conditions parameter".to_string()))?;
    let branches: Vec<ConditionBranch> = match raw {
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| EngineError::ConditionConfig(e.to_string()))?,
        other => serde_json::from_value(other.clone())
            .map_err(|e| EngineError::ConditionConfig(e.to_string()))?,
    };
    if branches.is_empty() {
        return Err(EngineError::ConditionConfig("empty conditions list".to_string()));
    }
    Ok(branches)
}

/// The evaluation substrate is the unique non-condition predecessor's
/// output. Zero or several candidates is an authoring error; fail fast
/// rather than pick one arbitrarily.
fn source_block<'w>(
    runner: &BlockRunner<'w>,
    block: &Block,
) -> Result<&'w Block, EngineError> {
    let workflow = runner.workflow();
    let mut sources = workflow
        .incoming(&block.id)
        .filter_map(|c| workflow.block(&c.source))
        .filter(|b| !b.is_condition());
    match (sources.next(), sources.next()) {
        (Some(source), None) => Ok(source),
        _ => Err(EngineError::ConditionSource(block.id.clone())),
    }
}

/// Scope for branch expressions: the fields of the source's `response`
/// object, with `agent1` aliasing the full output.
fn evaluation_scope(source_output: &Value) -> Map<String, Value> {
    let mut scope = match source_output.get("response") {
        Some(Value::Object(fields)) => fields.clone(),
        _ => match source_output {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        },
    };
    scope.insert("agent1".to_string(), source_output.clone());
    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_exposes_response_fields_and_alias() {
        let output = json!({"response": {"n": 7, "label": "hot"}});
        let scope = evaluation_scope(&output);
        assert_eq!(scope["n"], json!(7));
        assert_eq!(scope["label"], json!("hot"));
        assert_eq!(scope["agent1"], output);
    }

    #[test]
    fn scope_falls_back_to_whole_object() {
        let output = json!({"n": 3});
        let scope = evaluation_scope(&output);
        assert_eq!(scope["n"], json!(3));
    }

    #[test]
    fn branches_parse_from_string_and_value_forms() {
        let as_string = json!({
            "conditions": "[{\"id\":\"b-1\",\"title\":\"if\",\"value\":\"n > 1\"}]"
        });
        let branches = parse_branches(as_string.as_object().unwrap()).unwrap();
        assert_eq!(branches[0].id, "b-1");

        let as_value = json!({
            "conditions": [{"id": "b-2", "title": "else", "value": ""}]
        });
        let branches = parse_branches(as_value.as_object().unwrap()).unwrap();
        assert_eq!(branches[0].title, "else");
    }

    #[test]
    fn malformed_branches_fail() {
        let bad = json!({"conditions": "not json"});
        assert!(matches!(
            parse_branches(bad.as_object().unwrap()),
            Err(EngineError::ConditionConfig(_))
        ));
        let missing = json!({});
        assert!(matches!(
            parse_branches(missing.as_object().unwrap()),
            Err(EngineError::ConditionConfig(_))
        ));
    }
}
