//! Chart specs arrive as protobuf `Struct` JSON (`structValue` / `listValue`
//! / `stringValue` wrappers). Vega-Lite wants plain JSON, so the wrappers are
//! peeled off recursively. Ordinary objects and arrays pass through.

use serde_json::{Map, Value};

const SCALAR_KINDS: [&str; 3] = ["stringValue", "numberValue", "boolValue"];

/// Convert a protobuf-style value tree into plain JSON.
pub fn normalize_chart_spec(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(unwrapped) = unwrap_kind(map) {
                return unwrapped;
            }
            if is_struct(map) {
                if let Some(Value::Object(fields)) = map.get("fields") {
                    return normalize_fields(fields);
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_chart_spec(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_chart_spec).collect()),
        other => other.clone(),
    }
}

/// A single-key `{ "<kind>Value": ... }` wrapper.
fn unwrap_kind(map: &Map<String, Value>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (kind, inner) = map.iter().next()?;
    match kind.as_str() {
        "structValue" => Some(match inner {
            Value::Object(s) => match s.get("fields") {
                Some(Value::Object(fields)) => normalize_fields(fields),
                _ => Value::Object(Map::new()),
            },
            other => normalize_chart_spec(other),
        }),
        "listValue" => Some(match inner.get("values") {
            Some(Value::Array(values)) => {
                Value::Array(values.iter().map(normalize_chart_spec).collect())
            }
            _ => Value::Array(Vec::new()),
        }),
        "nullValue" => Some(Value::Null),
        k if SCALAR_KINDS.contains(&k) => Some(inner.clone()),
        _ => None,
    }
}

/// A bare top-level `Struct`: `{ "fields": { k: <wrapped value>, ... } }`.
fn is_struct(map: &Map<String, Value>) -> bool {
    if map.len() != 1 {
        return false;
    }
    match map.get("fields") {
        Some(Value::Object(fields)) => fields.values().all(|v| match v {
            Value::Object(m) => m.len() == 1 && unwrap_kind(m).is_some(),
            _ => false,
        }),
        _ => false,
    }
}

fn normalize_fields(fields: &Map<String, Value>) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), normalize_chart_spec(v)))
            .collect(),
    )
}
