// JSON codec.

use serde_json::{Map, Value, json};

use super::{CommandResult, Measures};
use crate::error::CoreError;

/// An object is one group; an array of objects is one group per element.
///
/// Invalid JSON fails the whole message. A non-object array element fails
/// only its own group.
pub fn decode_groups(
    payload: &[u8],
    attr_hint: Option<&str>,
) -> Result<Vec<Result<Measures, CoreError>>, CoreError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| CoreError::malformed(format!("invalid JSON: {e}")))?;

    match value {
        Value::Object(map) => Ok(vec![Ok(into_group(map))]),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(into_group(map)),
                other => Err(CoreError::malformed(format!(
                    "array element {i} is {}, expected an object",
                    kind(&other)
                ))),
            })
            .collect()),
        scalar => match attr_hint {
            Some(name) => {
                let mut group = Measures::new();
                group.insert(name.to_owned(), scalar);
                Ok(vec![Ok(group)])
            }
            None => Err(CoreError::malformed(format!(
                "expected an object or array, got {}",
                kind(&scalar)
            ))),
        },
    }
}

/// Strict form of [`decode_groups`]: the first malformed group fails all.
pub fn decode_measures(payload: &[u8], attr_hint: Option<&str>) -> Result<Vec<Measures>, CoreError> {
    decode_groups(payload, attr_hint)?.into_iter().collect()
}

pub fn encode_measures(groups: &[Measures]) -> Value {
    let mut objects: Vec<Value> = groups
        .iter()
        .map(|g| Value::Object(g.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
        .collect();
    if objects.len() == 1 {
        objects.swap_remove(0)
    } else {
        Value::Array(objects)
    }
}

/// `{name: value}` for structured values, `{name: {"data": value}}` otherwise.
pub fn encode_command(name: &str, value: &Value) -> Value {
    let body = match value {
        Value::Object(_) => value.clone(),
        scalar => json!({ "data": scalar }),
    };
    let mut map = Map::new();
    map.insert(name.to_owned(), body);
    Value::Object(map)
}

/// Every key of the result object is one command result.
pub fn decode_results(payload: &[u8]) -> Result<Vec<CommandResult>, CoreError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| CoreError::malformed(format!("invalid JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(CoreError::malformed("command result must be a JSON object"));
    };

    Ok(map
        .into_iter()
        .map(|(name, value)| CommandResult {
            device_id: None,
            name,
            value,
        })
        .collect())
}

fn into_group(map: Map<String, Value>) -> Measures {
    map.into_iter().collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
