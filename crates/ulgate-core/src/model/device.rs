// ── Device and group provisioning records ──

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transport::{PayloadEncoding, TransportKind};

/// Entity type given to devices auto-provisioned through the default key.
pub const DEFAULT_ENTITY_TYPE: &str = "Thing";

/// A declared measurement attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Name the device uses on the wire. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Attribute name on the context entity.
    pub name: String,
    #[serde(rename = "type", default = "default_attr_type")]
    pub attr_type: String,
    /// Device command fed by changes to this entity attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<String>,
}

fn default_attr_type() -> String {
    "Text".into()
}

fn default_command_type() -> String {
    "command".into()
}

impl AttributeMapping {
    pub fn new(name: impl Into<String>, attr_type: impl Into<String>) -> Self {
        Self {
            object_id: None,
            name: name.into(),
            attr_type: attr_type.into(),
            reverse: None,
        }
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn with_reverse(mut self, command: impl Into<String>) -> Self {
        self.reverse = Some(command.into());
        self
    }

    /// The name this attribute carries in device payloads.
    pub fn wire_name(&self) -> &str {
        self.object_id.as_deref().unwrap_or(&self.name)
    }
}

/// A command the device accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_command_type")]
    pub command_type: String,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_type: default_command_type(),
        }
    }
}

/// A constant attribute attached to every measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAttribute {
    pub name: String,
    #[serde(rename = "type", default = "default_attr_type")]
    pub attr_type: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    /// Entity attribute changes are turned into device commands.
    Bidirectional,
    /// Entity attribute changes are pushed to the device configuration channel.
    Configuration,
}

/// A broker subscription owned by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub kind: SubscriptionKind,
    pub attributes: Vec<String>,
}

/// Identity of a device inside its tenancy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub service: String,
    pub subservice: String,
    pub device_id: String,
}

impl DeviceKey {
    pub fn new(
        service: impl Into<String>,
        subservice: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            subservice: subservice.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}#{}", self.service, self.subservice, self.device_id)
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// A provisioned device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub service: String,
    pub subservice: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub entity_name: String,
    pub entity_type: String,
    #[serde(default)]
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub encoding: PayloadEncoding,
    /// Push endpoint for HTTP devices that accept commands directly.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Fixed offset used when rendering generated timestamps.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Overrides the agent-wide timestamp flag.
    #[serde(default)]
    pub timestamp: Option<bool>,
    #[serde(default)]
    pub attributes: Vec<AttributeMapping>,
    #[serde(default)]
    pub lazy: Vec<AttributeMapping>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub static_attributes: Vec<StaticAttribute>,
    /// Opaque provisioning data the core carries but never interprets.
    #[serde(default)]
    pub internal_attributes: Value,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionRecord>,
}

impl Device {
    /// Minimal device with entity name and type derived from its id.
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        subservice: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            entity_name: id.clone(),
            entity_type: DEFAULT_ENTITY_TYPE.into(),
            id,
            service: service.into(),
            subservice: subservice.into(),
            api_key: None,
            transport: None,
            encoding: PayloadEncoding::default(),
            endpoint: None,
            timezone: None,
            timestamp: None,
            attributes: Vec::new(),
            lazy: Vec::new(),
            commands: Vec::new(),
            static_attributes: Vec::new(),
            internal_attributes: Value::Null,
            subscriptions: Vec::new(),
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(&self.service, &self.subservice, &self.id)
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Declared attribute matching a name seen on the wire, by object id or name.
    pub fn mapping_for_wire(&self, wire_name: &str) -> Option<&AttributeMapping> {
        self.attributes
            .iter()
            .find(|a| a.object_id.as_deref() == Some(wire_name))
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|a| a.object_id.is_none() && a.name == wire_name)
            })
    }

    /// Attributes whose changes are sent back to the device as commands.
    pub fn bidirectional(&self) -> impl Iterator<Item = (&AttributeMapping, &str)> {
        self.attributes
            .iter()
            .chain(self.lazy.iter())
            .filter_map(|a| a.reverse.as_deref().map(|cmd| (a, cmd)))
    }

    pub fn has_bidirectional(&self) -> bool {
        self.bidirectional().next().is_some()
    }
}

// ── Group ───────────────────────────────────────────────────────────

/// A provisioning template keyed by API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub api_key: String,
    /// Empty matches any resource path.
    #[serde(default)]
    pub resource: String,
    pub service: String,
    pub subservice: String,
    pub entity_type: String,
    #[serde(default)]
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub encoding: PayloadEncoding,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub timestamp: Option<bool>,
    #[serde(default)]
    pub attributes: Vec<AttributeMapping>,
    #[serde(default)]
    pub lazy: Vec<AttributeMapping>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub static_attributes: Vec<StaticAttribute>,
    #[serde(default)]
    pub internal_attributes: Value,
}

impl Group {
    pub fn new(
        api_key: impl Into<String>,
        service: impl Into<String>,
        subservice: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            resource: String::new(),
            service: service.into(),
            subservice: subservice.into(),
            entity_type: entity_type.into(),
            transport: None,
            encoding: PayloadEncoding::default(),
            timezone: None,
            timestamp: None,
            attributes: Vec::new(),
            lazy: Vec::new(),
            commands: Vec::new(),
            static_attributes: Vec::new(),
            internal_attributes: Value::Null,
        }
    }

    /// Whether this group serves `resource` (`None` for non-HTTP transports).
    pub fn matches_resource(&self, resource: Option<&str>) -> bool {
        self.resource.is_empty() || resource.is_none_or(|r| r == self.resource)
    }

    /// Build a device record from the group defaults.
    ///
    /// The entity is named `{entity_type}:{device_id}` and tagged with the
    /// transport the first message arrived on.
    pub fn provision(&self, device_id: &str, transport: TransportKind) -> Device {
        Device {
            id: device_id.to_owned(),
            service: self.service.clone(),
            subservice: self.subservice.clone(),
            api_key: Some(self.api_key.clone()),
            entity_name: format!("{}:{device_id}", self.entity_type),
            entity_type: self.entity_type.clone(),
            transport: Some(transport),
            encoding: self.encoding,
            endpoint: None,
            timezone: self.timezone.clone(),
            timestamp: self.timestamp,
            attributes: self.attributes.clone(),
            lazy: self.lazy.clone(),
            commands: self.commands.clone(),
            static_attributes: self.static_attributes.clone(),
            internal_attributes: self.internal_attributes.clone(),
            subscriptions: Vec::new(),
        }
    }
}
