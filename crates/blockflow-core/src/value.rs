//! Helpers over `serde_json::Value` trees: dotted-path lookup, truthiness,
//! and the stringification policies used when splicing values into parameters.

use serde_json::Value;

/// Why a dotted-path lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrillError {
    /// A non-terminal segment landed on something that is not an object.
    NotAnObject { segment: String },
    /// The segment is absent from the object it indexes into.
    Missing { segment: String },
}

impl std::fmt::Display for DrillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrillError::NotAnObject { segment } => {
                write!(f, "segment \"{segment}\" indexes into a non-object value")
            }
            DrillError::Missing { segment } => write!(f, "segment \"{segment}\" not found"),
        }
    }
}

/// Walk `root` down a dotted path. Every non-terminal step must land on an
/// object; an absent terminal value is an error, not a null.
pub fn drill<'a, 'p, I>(root: &'a Value, segments: I) -> Result<&'a Value, DrillError>
where
    I: IntoIterator<Item = &'p str>,
{
    let mut current = root;
    for segment in segments {
        match current {
            Value::Object(map) => {
                current = map.get(segment).ok_or_else(|| DrillError::Missing {
                    segment: segment.to_string(),
                })?;
            }
            _ => {
                return Err(DrillError::NotAnObject {
                    segment: segment.to_string(),
                });
            }
        }
    }
    Ok(current)
}

/// JavaScript-flavored truthiness: `null`, `false`, `0`, `NaN`, and the empty
/// string are falsy; everything else (including `{}` and `[]`) is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Scalar-to-text used for plain parameter substitution: strings are spliced
/// without quotes, everything else uses its JSON form.
pub fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compact JSON for composite values.
pub fn compact(value: &Value) -> String {
    value.to_string()
}

/// Pretty-printed JSON, used for `context`-style parameters.
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// If the text looks like a JSON object or array and parses, return the
/// parsed structure; otherwise keep the original string.
pub fn reparse_if_json(text: String) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            return parsed;
        }
    }
    Value::String(text)
}
