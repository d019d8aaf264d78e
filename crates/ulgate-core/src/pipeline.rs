//! Measurement pipeline.
//!
//! Each decoded group runs through an ordered list of named [`Stage`]s
//! over an ordered attribute map, then becomes one broker update:
//!
//! 1. [`Stage::ExpandCompact`]: vendor compact attributes into sub-attributes
//! 2. [`Stage::Alias`]: object-id aliasing and declared attribute types
//! 3. [`Stage::StaticAttributes`]: device static attributes
//! 4. [`Stage::Timestamp`]: `TimeInstant` per the device timestamp policy
//!
//! Groups of one message are issued in payload order and complete
//! independently: a failed group never blocks its siblings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use strum::Display;
use tracing::{debug, warn};
use ulgate_api::Scope;
use ulgate_api::context::types::{Attribute, Entity};

use crate::broker::ContextBroker;
use crate::codec::{Measures, compact};
use crate::error::CoreError;
use crate::model::Device;
use crate::timestamp::{TIME_INSTANT, TimestampPolicy};

/// Attribute map flowing between stages.
pub type AttrMap = IndexMap<String, Attribute>;

/// Per-request inputs shared by every stage.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub device: &'a Device,
    pub policy: TimestampPolicy,
    pub expand_compact: bool,
    /// Transport-level timestamp (`t=` on HTTP).
    pub timestamp_param: Option<&'a str>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    ExpandCompact,
    Alias,
    StaticAttributes,
    Timestamp,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::ExpandCompact,
        Stage::Alias,
        Stage::StaticAttributes,
        Stage::Timestamp,
    ];

    pub fn apply(self, ctx: &StageContext<'_>, attrs: AttrMap) -> Result<AttrMap, CoreError> {
        match self {
            Stage::ExpandCompact => Ok(expand_compact(ctx, attrs)),
            Stage::Alias => Ok(alias(ctx, attrs)),
            Stage::StaticAttributes => Ok(static_attributes(ctx, attrs)),
            Stage::Timestamp => timestamp(ctx, attrs),
        }
    }
}

/// Run every stage over one decoded group.
pub fn transform(ctx: &StageContext<'_>, group: Measures) -> Result<AttrMap, CoreError> {
    let attrs: AttrMap = group
        .into_iter()
        .map(|(name, value)| {
            let attr = Attribute::new(infer_type(&value), value);
            (name, attr)
        })
        .collect();

    Stage::ALL
        .iter()
        .try_fold(attrs, |acc, stage| stage.apply(ctx, acc))
}

// ── Stages ──────────────────────────────────────────────────────────

// Opportunistic: an attribute that merely shares a compact format's name
// keeps its value when it does not parse. Devices using the compact
// encoding were already expanded strictly by the codec.
fn expand_compact(ctx: &StageContext<'_>, attrs: AttrMap) -> AttrMap {
    if !ctx.expand_compact || !attrs.keys().any(|k| compact::is_compact(k)) {
        return attrs;
    }

    let mut out = AttrMap::with_capacity(attrs.len());
    for (name, attr) in attrs {
        let expanded = match (&attr.value, compact::is_compact(&name)) {
            (Value::String(raw), true) => match compact::decode_attribute(&name, raw) {
                Ok(fields) => Some(fields),
                Err(e) => {
                    debug!(device_id = %ctx.device.id, attribute = %name, error = %e, "not a compact value, kept as is");
                    None
                }
            },
            _ => None,
        };
        match expanded {
            Some(fields) => {
                for (sub, value) in fields {
                    out.insert(sub, Attribute::new(infer_type(&value), value));
                }
            }
            None => {
                out.insert(name, attr);
            }
        }
    }
    out
}

fn alias(ctx: &StageContext<'_>, attrs: AttrMap) -> AttrMap {
    attrs
        .into_iter()
        .map(|(wire, mut attr)| match ctx.device.mapping_for_wire(&wire) {
            Some(mapping) => {
                attr.attr_type.clone_from(&mapping.attr_type);
                (mapping.name.clone(), attr)
            }
            None => (wire, attr),
        })
        .collect()
}

fn static_attributes(ctx: &StageContext<'_>, mut attrs: AttrMap) -> AttrMap {
    for s in &ctx.device.static_attributes {
        attrs
            .entry(s.name.clone())
            .or_insert_with(|| Attribute::new(&s.attr_type, s.value.clone()));
    }
    attrs
}

fn timestamp(ctx: &StageContext<'_>, mut attrs: AttrMap) -> Result<AttrMap, CoreError> {
    let explicit = match attrs.get(TIME_INSTANT).map(|a| &a.value) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(CoreError::InvalidTimestamp {
                value: other.to_string(),
            });
        }
        None => None,
    };

    if let Some(ts) = ctx
        .policy
        .resolve(explicit.as_deref(), ctx.timestamp_param, ctx.now)?
    {
        attrs.insert(
            TIME_INSTANT.to_owned(),
            Attribute::new("DateTime", Value::String(ts)),
        );
    }
    Ok(attrs)
}

/// NGSI type for an undeclared attribute.
pub fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::Number(_) => "Number",
        Value::Bool(_) => "Boolean",
        Value::Array(_) | Value::Object(_) => "StructuredValue",
        Value::String(_) | Value::Null => "Text",
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// Per-group outcome of one inbound message.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<Result<(), CoreError>>,
}

impl BatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// First failure, in group order.
    pub fn into_first_error(self) -> Option<CoreError> {
        self.results.into_iter().find_map(Result::err)
    }
}

pub struct MeasurementPipeline {
    broker: Arc<dyn ContextBroker>,
}

impl MeasurementPipeline {
    pub fn new(broker: Arc<dyn ContextBroker>) -> Self {
        Self { broker }
    }

    /// Transform every decoded group and issue one broker update per group.
    /// Groups that failed to decode keep their error in the outcome.
    pub async fn process(
        &self,
        ctx: &StageContext<'_>,
        groups: Vec<Result<Measures, CoreError>>,
    ) -> BatchOutcome {
        let device = ctx.device;
        let scope = Scope::new(&device.service, &device.subservice);

        let updates = groups.into_iter().enumerate().map(|(index, group)| {
            let entity = group.and_then(|g| transform(ctx, g)).map(|attributes| Entity {
                id: device.entity_name.clone(),
                entity_type: device.entity_type.clone(),
                attributes,
            });
            let broker = Arc::clone(&self.broker);
            async move {
                let entity = entity.inspect_err(|e| {
                    warn!(device_id = %device.id, group = index, error = %e, "measurement group rejected");
                })?;
                if entity.attributes.is_empty() {
                    return Ok(());
                }
                debug!(
                    device_id = %device.id,
                    group = index,
                    attrs = entity.attributes.len(),
                    "updating context"
                );
                broker.update(scope, entity).await.inspect_err(|e| {
                    warn!(device_id = %device.id, group = index, error = %e, "context update failed");
                })
            }
        });

        BatchOutcome {
            results: join_all(updates).await,
        }
    }
}
