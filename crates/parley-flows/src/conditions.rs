use serde_json::Value;

use crate::types::{Condition, ConditionOperator};

/// Walk a dotted path through the context, yielding `None` on any missing
/// segment.
pub fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Evaluate one condition. Never panics or errors: a type mismatch or a
/// missing field simply evaluates to false (except `exists`, which is the
/// operator that asks about absence).
pub fn evaluate(condition: &Condition, context: &Value) -> bool {
    let resolved = resolve_path(context, &condition.field);

    match condition.operator {
        ConditionOperator::Equals => resolved == Some(&condition.value),
        ConditionOperator::Contains => match (resolved.and_then(Value::as_str), condition.value.as_str()) {
            (Some(haystack), Some(needle)) => {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
        ConditionOperator::Gt => match (resolved.and_then(Value::as_f64), condition.value.as_f64()) {
            (Some(left), Some(right)) => left > right,
            _ => false,
        },
        ConditionOperator::Lt => match (resolved.and_then(Value::as_f64), condition.value.as_f64()) {
            (Some(left), Some(right)) => left < right,
            _ => false,
        },
        ConditionOperator::Exists => {
            let exists = !matches!(resolved, None | Some(Value::Null));
            // `value: false` inverts the check: the field must be absent.
            if condition.value == Value::Bool(false) {
                !exists
            } else {
                exists
            }
        }
    }
}
