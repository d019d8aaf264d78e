// ── Command records ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use uuid::Uuid;

use super::device::{Device, DeviceKey};

/// Lifecycle of a command inside the queue.
///
/// `Queued -> Delivered` for polling devices, `Delivering -> Delivered`
/// for push devices. A failed push never stays in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    Queued,
    Delivering,
    Delivered,
}

impl CommandState {
    /// Whether a device result can settle a command in this state.
    pub fn awaits_result(self) -> bool {
        matches!(self, Self::Delivering | Self::Delivered)
    }
}

/// Value reported in the `{command}_status` entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum CommandStatus {
    Pending,
    Delivered,
    Ok,
    Error,
    Expired,
}

/// A command tracked from creation until its result arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: Uuid,
    pub device_id: String,
    pub service: String,
    pub subservice: String,
    pub entity_name: String,
    pub entity_type: String,
    pub name: String,
    pub command_type: String,
    pub value: Value,
    pub state: CommandState,
    pub created_at: DateTime<Utc>,
}

impl PendingCommand {
    pub fn new(device: &Device, name: impl Into<String>, value: Value, state: CommandState) -> Self {
        let name = name.into();
        let command_type = device
            .command(&name)
            .map_or_else(|| "command".to_owned(), |c| c.command_type.clone());
        Self {
            id: Uuid::new_v4(),
            device_id: device.id.clone(),
            service: device.service.clone(),
            subservice: device.subservice.clone(),
            entity_name: device.entity_name.clone(),
            entity_type: device.entity_type.clone(),
            name,
            command_type,
            value,
            state,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(&self.service, &self.subservice, &self.device_id)
    }
}
