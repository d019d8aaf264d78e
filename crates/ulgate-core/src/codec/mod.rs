//! Payload codec set.
//!
//! Pure functions over byte slices: no I/O, no shared state. Every decode
//! failure is a [`CoreError::MalformedPayload`]; nothing in here panics on
//! device input.
//!
//! | encoding   | measures                       | commands                  |
//! |------------|--------------------------------|---------------------------|
//! | Ultra Light| `a|1|b|2#c|3`                  | `name|value`, `name|k=v`  |
//! | JSON       | object, or array of objects    | `{name: value}`           |
//! | compact    | Ultra Light + vendor fields    | `name|v1,v2,...`          |

pub mod compact;
pub mod json;
pub mod ultralight;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{PayloadEncoding, PendingCommand};

/// One measurement group: attribute names to raw values, in payload order.
pub type Measures = IndexMap<String, Value>;

/// A command result reported by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    /// Device id embedded in the payload (`dev@cmd|result`), if any.
    pub device_id: Option<String>,
    pub name: String,
    pub value: Value,
}

/// Decode a measurement payload into its groups, each decoded on its own.
///
/// The outer error covers the whole message (not UTF-8, not JSON); a
/// malformed group only fails its own slot. `attr_hint` names the
/// attribute for single-value shorthand payloads (MQTT `/attrs/{attr}`
/// topics).
pub fn decode_groups(
    encoding: PayloadEncoding,
    payload: &[u8],
    attr_hint: Option<&str>,
) -> Result<Vec<Result<Measures, CoreError>>, CoreError> {
    match encoding {
        PayloadEncoding::UltraLight => Ok(ultralight::decode_groups(text(payload)?, attr_hint)),
        PayloadEncoding::Json => json::decode_groups(payload, attr_hint),
        PayloadEncoding::Compact => Ok(ultralight::decode_groups(text(payload)?, attr_hint)
            .into_iter()
            .map(|group| group.and_then(compact::expand))
            .collect()),
    }
}

/// Decode a measurement payload, failing on the first malformed group.
pub fn decode_measures(
    encoding: PayloadEncoding,
    payload: &[u8],
    attr_hint: Option<&str>,
) -> Result<Vec<Measures>, CoreError> {
    decode_groups(encoding, payload, attr_hint)?.into_iter().collect()
}

/// Decode a command result payload.
///
/// Devices frequently answer in JSON regardless of their measurement
/// encoding, so a body starting with `{` is always read as JSON.
pub fn decode_results(
    encoding: PayloadEncoding,
    payload: &[u8],
) -> Result<Vec<CommandResult>, CoreError> {
    let raw = text(payload)?;
    if encoding == PayloadEncoding::Json || raw.trim_start().starts_with('{') {
        json::decode_results(payload)
    } else {
        ultralight::decode_results(raw)
    }
}

/// Encode a single command for a push transport.
pub fn encode_command(encoding: PayloadEncoding, name: &str, value: &Value) -> Bytes {
    match encoding {
        PayloadEncoding::UltraLight => Bytes::from(ultralight::encode_command(name, value)),
        PayloadEncoding::Json => Bytes::from(json::encode_command(name, value).to_string()),
        PayloadEncoding::Compact => Bytes::from(compact::encode_command(name, value)),
    }
}

/// Encode the commands handed to a polling device, one per response slot.
pub fn encode_polled(encoding: PayloadEncoding, commands: &[PendingCommand]) -> Bytes {
    match encoding {
        PayloadEncoding::Json => {
            let slots: Vec<Value> = commands
                .iter()
                .map(|c| json::encode_command(&c.name, &c.value))
                .collect();
            Bytes::from(Value::Array(slots).to_string())
        }
        PayloadEncoding::UltraLight | PayloadEncoding::Compact => {
            let slots: Vec<String> = commands
                .iter()
                .map(|c| match encoding {
                    PayloadEncoding::Compact => compact::encode_command(&c.name, &c.value),
                    _ => ultralight::encode_command(&c.name, &c.value),
                })
                .collect();
            Bytes::from(slots.join("#"))
        }
    }
}

/// Encode measurement groups (device simulators, round-trip checks).
pub fn encode_measures(encoding: PayloadEncoding, groups: &[Measures]) -> Result<Bytes, CoreError> {
    match encoding {
        PayloadEncoding::UltraLight => Ok(Bytes::from(ultralight::encode_measures(groups))),
        PayloadEncoding::Json => Ok(Bytes::from(json::encode_measures(groups).to_string())),
        PayloadEncoding::Compact => Err(CoreError::Unsupported {
            operation: "measure encoding for compact payloads".into(),
        }),
    }
}

fn text(payload: &[u8]) -> Result<&str, CoreError> {
    std::str::from_utf8(payload).map_err(|e| CoreError::malformed(format!("payload is not UTF-8: {e}")))
}

/// Render a JSON value as Ultra Light text.
pub(crate) fn ul_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
