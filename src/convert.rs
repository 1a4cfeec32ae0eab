//! JSON <-> document value conversion utilities

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::value::{Document, Value};

const DECIMAL_KEY: &str = "$numberDecimal";

/// Convert serde_json::Value to a document value.
///
/// `{"$numberDecimal": "1.50"}` becomes a decimal, as in extended JSON.
pub fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => {
            if obj.len() == 1
                && let Some(serde_json::Value::String(raw)) = obj.get(DECIMAL_KEY)
                && let Ok(d) = Decimal::from_str(raw)
            {
                return Value::Decimal(d);
            }
            Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, json_to_value(v)))
                    .collect::<Document>(),
            )
        }
    }
}

/// Convert a document value to serde_json::Value
pub fn value_to_json(v: Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => serde_json::Value::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Decimal(d) => {
            let mut obj = serde_json::Map::new();
            obj.insert(DECIMAL_KEY.to_string(), serde_json::Value::String(d.to_string()));
            serde_json::Value::Object(obj)
        }
        Value::String(s) => serde_json::Value::String(s),
        Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(value_to_json).collect()),
        Value::Object(obj) => serde_json::Value::Object(
            obj.into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        json_to_value(v)
    }
}
