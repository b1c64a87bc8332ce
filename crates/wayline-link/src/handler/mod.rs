//! One handler per `message_type`. Handlers are synchronous and may block on
//! the vehicle; the server runs them off the async executor.

pub mod navigation;
pub mod settings;
pub mod status;

use serde_json::Value;

/// Numbers from the workstation sometimes arrive as strings.
pub(crate) fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn lenient_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_and_numeric_strings() {
        assert_eq!(lenient_f64(&json!(3.5)), Some(3.5));
        assert_eq!(lenient_f64(&json!(" 51.02 ")), Some(51.02));
        assert_eq!(lenient_i64(&json!("6330")), Some(6330));
        assert_eq!(lenient_i64(&json!(1.5)), None);
        assert_eq!(lenient_f64(&json!(null)), None);
    }
}
