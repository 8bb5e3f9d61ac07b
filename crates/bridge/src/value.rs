//! Conversions between JSON values and script values.

use rhai::{Array, Dynamic, Map};
use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("non-finite number {0} has no JSON representation")]
    NonFinite(f64),
    #[error("values of type `{type_name}` cannot be converted to JSON")]
    Unsupported { type_name: &'static str },
}

/// Convert a JSON value into a script value.
///
/// Integers that fit in `i64` become script integers; every other number
/// becomes a float.
#[must_use]
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => n.as_i64().map_or_else(
            || Dynamic::from(n.as_f64().unwrap_or(f64::NAN)),
            Dynamic::from,
        ),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            Dynamic::from_array(items.iter().map(json_to_dynamic).collect::<Array>())
        }
        Value::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.as_str().into(), json_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Convert a script value into JSON.
///
/// # Errors
/// Returns error for non-finite floats and script types with no JSON form
/// (timestamps, function pointers, custom types).
pub fn dynamic_to_json(value: &Dynamic) -> Result<Value, ValueError> {
    let value = value.flatten_clone();

    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::Number(i.into()));
    }
    if let Ok(f) = value.as_float() {
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or(ValueError::NonFinite(f));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Value::String(c.to_string()));
    }
    if value.is_string() {
        return value
            .into_immutable_string()
            .map(|s| Value::String(s.to_string()))
            .map_err(|type_name| ValueError::Unsupported { type_name });
    }
    if value.is_array() {
        let items = value
            .into_array()
            .map_err(|type_name| ValueError::Unsupported { type_name })?;
        return items
            .iter()
            .map(dynamic_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if value.is_blob() {
        let bytes = value
            .into_blob()
            .map_err(|type_name| ValueError::Unsupported { type_name })?;
        return Ok(Value::Array(
            bytes.into_iter().map(|b| Value::Number(b.into())).collect(),
        ));
    }
    if value.is_map() {
        let type_name = value.type_name();
        let map = value
            .try_cast::<Map>()
            .ok_or(ValueError::Unsupported { type_name })?;
        let mut object = serde_json::Map::with_capacity(map.len());
        for (key, item) in &map {
            object.insert(key.to_string(), dynamic_to_json(item)?);
        }
        return Ok(Value::Object(object));
    }

    Err(ValueError::Unsupported {
        type_name: value.type_name(),
    })
}
