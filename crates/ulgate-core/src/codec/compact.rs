// Vendor compact attribute formats.
//
// A compact attribute carries comma-separated positional fields, e.g. the
// GSM cell report `P1|214,7,d22,b00,-64,`. Each known attribute name maps to
// a descriptor listing the typed segments; decoding replaces the attribute
// with `{NAME}_1..{NAME}_n` plus any composite attribute the format defines.

use serde_json::{Number, Value};

use super::{Measures, ul_text, ultralight};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    /// Unsigned decimal, integer or fractional.
    Numeric,
    /// Hexadecimal, rendered as a decimal integer.
    Hex,
    /// Decimal with optional sign.
    Signed,
    /// `0` or `1`.
    Flag,
}

struct Format {
    name: &'static str,
    segments: &'static [Segment],
    min_fields: usize,
    /// Composite attribute built from the first two fields as `"a,b"`.
    composite: Option<&'static str>,
}

const FORMATS: &[Format] = &[
    // mcc, mnc, lac, cell id, dbm
    Format {
        name: "P1",
        segments: &[
            Segment::Numeric,
            Segment::Numeric,
            Segment::Hex,
            Segment::Hex,
            Segment::Signed,
        ],
        min_fields: 5,
        composite: None,
    },
    // voltage, state, charger, charging, mode, disconnection
    Format {
        name: "B",
        segments: &[
            Segment::Numeric,
            Segment::Numeric,
            Segment::Flag,
            Segment::Flag,
            Segment::Numeric,
            Segment::Numeric,
        ],
        min_fields: 6,
        composite: None,
    },
    // lat, lon, altitude, speed, heading, fix
    Format {
        name: "GPS",
        segments: &[
            Segment::Signed,
            Segment::Signed,
            Segment::Signed,
            Segment::Numeric,
            Segment::Numeric,
            Segment::Numeric,
        ],
        min_fields: 2,
        composite: Some("location"),
    },
];

fn format_for(name: &str) -> Option<&'static Format> {
    FORMATS.iter().find(|f| f.name == name)
}

/// Whether `name` is a known compact attribute.
pub fn is_compact(name: &str) -> bool {
    format_for(name).is_some()
}

/// Replace every compact attribute of a group by its expanded fields.
///
/// Attributes that are not compact, or whose value is not a string, pass
/// through in place.
pub fn expand(group: Measures) -> Result<Measures, CoreError> {
    let mut out = Measures::with_capacity(group.len());
    for (name, value) in group {
        match (format_for(&name), &value) {
            (Some(format), Value::String(raw)) => {
                for (sub, v) in decode(format, raw)? {
                    out.insert(sub, v);
                }
            }
            _ => {
                out.insert(name, value);
            }
        }
    }
    Ok(out)
}

/// Decode a single compact value for attribute `name`.
pub fn decode_attribute(name: &str, raw: &str) -> Result<Measures, CoreError> {
    let format = format_for(name)
        .ok_or_else(|| CoreError::malformed(format!("{name} is not a compact attribute")))?;
    Ok(decode(format, raw)?.into_iter().collect())
}

fn decode(format: &Format, raw: &str) -> Result<Vec<(String, Value)>, CoreError> {
    let mut fields: Vec<&str> = raw.split(',').map(str::trim).collect();
    if fields.len() > 1 && fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }

    let max = format.segments.len();
    if fields.len() < format.min_fields || fields.len() > max {
        return Err(CoreError::malformed(format!(
            "{} expects {}..={max} fields, got {}",
            format.name,
            format.min_fields,
            fields.len()
        )));
    }

    let mut out = Vec::with_capacity(fields.len() + 1);
    for (i, (field, segment)) in fields.iter().zip(format.segments).enumerate() {
        let value = parse_segment(*segment, field).ok_or_else(|| {
            CoreError::malformed(format!(
                "{} field {} ({field:?}) is not a valid {segment:?} value",
                format.name,
                i + 1
            ))
        })?;
        out.push((format!("{}_{}", format.name, i + 1), value));
    }

    if let (Some(composite), [first, second, ..]) = (format.composite, fields.as_slice()) {
        out.push((composite.to_owned(), Value::String(format!("{first},{second}"))));
    }

    Ok(out)
}

fn parse_segment(segment: Segment, field: &str) -> Option<Value> {
    match segment {
        Segment::Numeric => {
            if field.starts_with('-') || field.starts_with('+') {
                return None;
            }
            parse_decimal(field)
        }
        Segment::Signed => parse_decimal(field),
        Segment::Hex => {
            let digits = field
                .strip_prefix("0x")
                .or_else(|| field.strip_prefix("0X"))
                .unwrap_or(field);
            u64::from_str_radix(digits, 16).ok().map(Value::from)
        }
        Segment::Flag => match field {
            "0" => Some(Value::Bool(false)),
            "1" => Some(Value::Bool(true)),
            _ => None,
        },
    }
}

fn parse_decimal(field: &str) -> Option<Value> {
    if let Ok(i) = field.parse::<i64>() {
        return Some(Value::from(i));
    }
    field
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// List values become `name|v1,v2,...`; anything else is plain Ultra Light.
pub fn encode_command(name: &str, value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(ul_text).collect();
            format!("{name}|{}", fields.join(","))
        }
        other => ultralight::encode_command(name, other),
    }
}
