//! Condition-branch expression evaluation, embedded via [`rhai`].
//!
//! Each evaluation builds a fresh engine and a [`Scope`] seeded only with
//! the fields of the assembled condition object, so expressions can reach
//! nothing beyond it: no imports, no globals, no process state. Print
//! output is discarded and an operation cap bounds runaway scripts.
//! Reading a missing map property yields `()` (falsy); referencing an
//! undeclared variable is an evaluation error.

use rhai::{Dynamic, Engine, Scope};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ExprError(pub String);

/// Condition branches are short comparisons, not programs.
const MAX_OPERATIONS: u64 = 10_000;

/// Parse and evaluate `input` against the given scope fields, returning the
/// result as a JSON value.
pub fn evaluate(input: &str, scope_fields: &Map<String, Value>) -> Result<Value, ExprError> {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.on_print(|_| {});

    let mut scope = Scope::new();
    for (name, value) in scope_fields {
        let dynamic =
            rhai::serde::to_dynamic(value).map_err(|e| ExprError(e.to_string()))?;
        scope.push_dynamic(name.clone(), dynamic);
    }

    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, input)
        .map_err(|e| ExprError(e.to_string()))?;
    rhai::serde::from_dynamic::<Value>(&result).map_err(|e| ExprError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::truthy;
    use serde_json::json;

    fn scope() -> Map<String, Value> {
        json!({
            "n": 7,
            "name": "alice",
            "flags": {"ready": true, "retries": 0},
            "agent1": {"response": {"n": 7}}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn eval_truthy(input: &str) -> bool {
        truthy(&evaluate(input, &scope()).unwrap())
    }

    #[test]
    fn comparisons() {
        assert!(!eval_truthy("n > 10"));
        assert!(eval_truthy("n > 5"));
        assert!(eval_truthy("n >= 7"));
        assert!(eval_truthy("n <= 7"));
        assert!(!eval_truthy("n < 7"));
    }

    #[test]
    fn equality() {
        assert!(eval_truthy("n == 7"));
        assert!(eval_truthy(r#"name == "alice""#));
        assert!(eval_truthy(r#"name != "bob""#));
        assert!(eval_truthy("n == 7.0"), "int/float comparison is numeric");
    }

    #[test]
    fn boolean_connectives() {
        assert!(eval_truthy("n > 5 && n < 10"));
        assert!(eval_truthy(r#"n > 10 || name == "alice""#));
        assert!(eval_truthy("!(n > 10)"));
        assert!(!eval_truthy("!flags.ready"));
    }

    #[test]
    fn member_access_and_alias() {
        assert!(eval_truthy("flags.ready"));
        assert!(eval_truthy("agent1.response.n == 7"));
        assert!(!eval_truthy("flags.retries"));
    }

    #[test]
    fn missing_property_reads_as_unit() {
        assert_eq!(evaluate("flags.absent", &scope()).unwrap(), Value::Null);
        assert!(!eval_truthy("flags.absent"));
    }

    #[test]
    fn undeclared_variable_is_an_error() {
        assert!(evaluate("missing > 3", &scope()).is_err());
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(evaluate("1 + 2 * 3", &scope()).unwrap(), json!(7));
        assert_eq!(evaluate("(1 + 2) * 3", &scope()).unwrap(), json!(9));
        assert_eq!(evaluate("10 % 3", &scope()).unwrap(), json!(1));
        assert_eq!(evaluate("-n + 10", &scope()).unwrap(), json!(3));
        assert!(eval_truthy("n * 2 == 14"));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            evaluate(r#"name + "!""#, &scope()).unwrap(),
            json!("alice!")
        );
    }

    #[test]
    fn syntax_errors_are_fatal() {
        assert!(evaluate("n >", &scope()).is_err());
        assert!(evaluate("n 7", &scope()).is_err());
    }

    #[test]
    fn type_mismatch_arithmetic_is_fatal() {
        assert!(evaluate("flags - 1", &scope()).is_err());
    }

    #[test]
    fn runaway_scripts_hit_the_operation_cap() {
        assert!(evaluate("while true {}", &scope()).is_err());
    }

    #[test]
    fn scope_exposes_nothing_beyond_the_seeded_fields() {
        let empty = Map::new();
        assert!(evaluate("n", &empty).is_err());
        assert!(evaluate("flags", &empty).is_err());
    }
}
