//! Built-in demo methods: `helloworld`, `echo` and `sum`.

use super::{MethodError, MethodRegistry, MethodResult};
use crate::error::Result;
use serde_json::{json, Number, Value};

pub(super) fn load() -> Result<MethodRegistry> {
    Ok(MethodRegistry::new()
        .with_method("helloworld", |_| Ok(json!("hello world")))
        .with_method("echo", |params| Ok(params))
        .with_method("sum", sum))
}

/// Add two numbers given either as `[a, b]` or as `{"a": .., "b": ..}`.
///
/// Two integers give an integer, anything else a float.
fn sum(params: Value) -> MethodResult {
    let (a, b) = match &params {
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        Value::Object(map) => match (map.get("a"), map.get("b")) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(MethodError::invalid_params("sum expects {\"a\": n, \"b\": n}")),
        },
        _ => return Err(MethodError::invalid_params("sum expects [a, b] or {\"a\": n, \"b\": n}")),
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x
            .checked_add(y)
            .map(|total| json!(total))
            .ok_or_else(|| MethodError::new("sum overflowed"));
    }

    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Number::from_f64(x + y)
            .map(Value::Number)
            .ok_or_else(|| MethodError::new("sum is not a finite number")),
        _ => Err(MethodError::invalid_params("sum operands must be numbers")),
    }
}
