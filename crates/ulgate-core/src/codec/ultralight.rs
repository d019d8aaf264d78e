// Ultra Light 2.0 text codec.
//
//   measures   t|21.5|h|40#t|22.0      ('#' separates groups)
//   command    PING|data=22            (object values as k=v pairs)
//   result     dev1@PING|pong

use serde_json::Value;

use super::{CommandResult, Measures, ul_text};
use crate::error::CoreError;

const GROUP_SEP: char = '#';
const FIELD_SEP: char = '|';

/// Decode `name|value|name|value#...` into measurement groups.
///
/// Empty groups are skipped. Each group decodes on its own, so a malformed
/// group leaves its siblings intact. A group holding a single bare value is
/// keyed by `attr_hint`; without one it is malformed.
pub fn decode_groups(payload: &str, attr_hint: Option<&str>) -> Vec<Result<Measures, CoreError>> {
    payload
        .split(GROUP_SEP)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| decode_group(raw, attr_hint))
        .collect()
}

/// Strict form of [`decode_groups`]: the first malformed group fails all.
pub fn decode_measures(payload: &str, attr_hint: Option<&str>) -> Result<Vec<Measures>, CoreError> {
    decode_groups(payload, attr_hint).into_iter().collect()
}

fn decode_group(raw: &str, attr_hint: Option<&str>) -> Result<Measures, CoreError> {
    let tokens: Vec<&str> = raw.split(FIELD_SEP).map(str::trim).collect();
    let mut group = Measures::new();

    if let [single] = tokens.as_slice() {
        let Some(name) = attr_hint else {
            return Err(CoreError::malformed(format!(
                "bare value {single:?} without an attribute name"
            )));
        };
        group.insert(name.to_owned(), Value::String((*single).to_owned()));
        return Ok(group);
    }

    if tokens.len() % 2 != 0 {
        return Err(CoreError::malformed(format!(
            "odd number of fields ({}) in group {raw:?}",
            tokens.len()
        )));
    }

    for pair in tokens.chunks_exact(2) {
        let (name, value) = (pair[0], pair[1]);
        if name.is_empty() {
            return Err(CoreError::malformed(format!("empty attribute name in {raw:?}")));
        }
        group.insert(name.to_owned(), Value::String(value.to_owned()));
    }
    Ok(group)
}

pub fn encode_measures(groups: &[Measures]) -> String {
    groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|(k, v)| format!("{k}{FIELD_SEP}{}", ul_text(v)))
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect::<Vec<_>>()
        .join("#")
}

/// `name|value` for scalars, `name|k1=v1|k2=v2` for objects, `name|` for null.
pub fn encode_command(name: &str, value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut out = name.to_owned();
            for (k, v) in map {
                out.push(FIELD_SEP);
                out.push_str(k);
                out.push('=');
                out.push_str(&ul_text(v));
            }
            out
        }
        other => format!("{name}{FIELD_SEP}{}", ul_text(other)),
    }
}

/// Decode `name|result` or `device@name|result`, one per `#` group.
pub fn decode_results(payload: &str) -> Result<Vec<CommandResult>, CoreError> {
    let mut results = Vec::new();

    for raw in payload.split(GROUP_SEP) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let Some((head, result)) = raw.split_once(FIELD_SEP) else {
            return Err(CoreError::malformed(format!(
                "command result {raw:?} has no '|' separator"
            )));
        };

        let (device_id, name) = match head.split_once('@') {
            Some((device, name)) => (Some(device.trim().to_owned()), name.trim()),
            None => (None, head.trim()),
        };
        if name.is_empty() {
            return Err(CoreError::malformed(format!("command result {raw:?} has no name")));
        }

        results.push(CommandResult {
            device_id,
            name: name.to_owned(),
            value: Value::String(result.trim().to_owned()),
        });
    }

    Ok(results)
}
