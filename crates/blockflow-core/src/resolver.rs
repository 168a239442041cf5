//! Reference resolution: rewrites a block's raw `params` into resolved
//! inputs by expanding `<block.path>` references against recorded block
//! outputs and `{{NAME}}` references against the environment map.
//!
//! A `<...>` span counts as a block reference only when its interior is a
//! dotted identifier chain, so comparison operators inside condition
//! expressions (`a < b && c > d`) are never mistaken for references.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::value;
use crate::workflow::{Block, SerializedWorkflow, kind};

static BLOCK_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)>").expect("block ref regex"));
static ENV_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("env ref regex"));

/// Resolves one block's inputs against the current run state. Resolution is
/// read-only and deterministic: the same context yields the same inputs.
pub struct Resolver<'a> {
    workflow: &'a SerializedWorkflow,
    context: &'a ExecutionContext,
}

impl<'a> Resolver<'a> {
    pub fn new(workflow: &'a SerializedWorkflow, context: &'a ExecutionContext) -> Self {
        Self { workflow, context }
    }

    /// Resolve every parameter of `block`. Condition blocks are exempt: their
    /// branch expressions are resolved one at a time during evaluation.
    pub fn resolve_inputs(&self, block: &Block) -> Result<Map<String, Value>, EngineError> {
        if block.is_condition() {
            return Ok(block.config.params.clone());
        }
        let mut resolved = Map::new();
        for (key, raw) in &block.config.params {
            resolved.insert(key.clone(), self.resolve_value(block, key, raw)?);
        }
        Ok(resolved)
    }

    /// Resolve a single parameter value under the policies for `key`.
    pub fn resolve_param(
        &self,
        block: &Block,
        key: &str,
        raw: &Value,
    ) -> Result<Value, EngineError> {
        self.resolve_value(block, key, raw)
    }

    fn resolve_value(&self, block: &Block, key: &str, raw: &Value) -> Result<Value, EngineError> {
        match raw {
            Value::String(text) => self.resolve_string(block, key, text),
            Value::Array(items) => {
                let resolved = items
                    .iter()
                    .map(|item| self.resolve_value(block, key, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_value(block, key, v)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, block: &Block, key: &str, text: &str) -> Result<Value, EngineError> {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for caps in BLOCK_REF.captures_iter(text) {
            let whole = caps.get(0).expect("match 0 always present");
            let reference = &caps[1];
            out.push_str(&text[cursor..whole.start()]);
            out.push_str(&self.render_reference(block, key, reference)?);
            cursor = whole.end();
        }
        out.push_str(&text[cursor..]);

        let substituted = self.substitute_environment(&out)?;
        Ok(value::reparse_if_json(substituted))
    }

    fn substitute_environment(&self, text: &str) -> Result<String, EngineError> {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for caps in ENV_REF.captures_iter(text) {
            let whole = caps.get(0).expect("match 0 always present");
            let name = &caps[1];
            let resolved = self
                .context
                .environment(name)
                .ok_or_else(|| EngineError::MissingEnvironment(name.to_string()))?;
            out.push_str(&text[cursor..whole.start()]);
            out.push_str(resolved);
            cursor = whole.end();
        }
        out.push_str(&text[cursor..]);
        Ok(out)
    }

    fn render_reference(
        &self,
        block: &Block,
        key: &str,
        reference: &str,
    ) -> Result<String, EngineError> {
        let mut parts = reference.split('.');
        let name = parts.next().unwrap_or_default();
        let source = self
            .workflow
            .block_by_reference(name)
            .ok_or_else(|| EngineError::UnknownReference(name.to_string()))?;
        if !source.enabled {
            return Err(EngineError::DisabledReference(source.id.clone()));
        }
        let state = self.context.state(&source.id).ok_or_else(|| EngineError::InvalidPath {
            block: source.id.clone(),
            path: reference.to_string(),
            reason: "block has produced no output".to_string(),
        })?;
        let target = value::drill(&state, parts).map_err(|e| EngineError::InvalidPath {
            block: source.id.clone(),
            path: reference.to_string(),
            reason: e.to_string(),
        })?;
        Ok(render_policy(block, key, target))
    }
}

/// Per-parameter substitution policy: function code gets JSON-encoded text,
/// `context` keeps strings verbatim and pretty-prints structures, everything
/// else splices compact JSON or bare scalars.
fn render_policy(block: &Block, key: &str, substituted: &Value) -> String {
    if key == "code" && block.metadata.kind == kind::FUNCTION {
        return match substituted {
            Value::Object(_) | Value::Array(_) => value::pretty(substituted),
            scalar => scalar.to_string(),
        };
    }
    if key == "context" {
        return match substituted {
            Value::String(s) => s.clone(),
            other => value::pretty(other),
        };
    }
    match substituted {
        Value::Object(_) | Value::Array(_) => value::compact(substituted),
        scalar => value::stringify_scalar(scalar),
    }
}
