// ── Identity resolver ──
//
// (transport, api key, device id[, resource]) -> provisioned device.
//
// 1. The API key selects a group (or the default key) and with it the
//    tenancy to look the device up in.
// 2. A provisioned device wins; its transport is filled in on first contact.
// 3. Otherwise the group provisions a device tagged with the transport.
// 4. Neither: `UnknownDevice`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Defaults;
use crate::error::CoreError;
use crate::model::{DEFAULT_ENTITY_TYPE, Device, Group, TransportKind};
use crate::registry::Registry;

/// Routing hint extracted by a listener.
#[derive(Debug, Clone, Copy)]
pub struct RoutingHint<'a> {
    pub transport: TransportKind,
    pub api_key: &'a str,
    pub device_id: &'a str,
    /// HTTP resource path; `None` on MQTT/AMQP.
    pub resource: Option<&'a str>,
}

/// Outcome of a resolution, so callers can react to registry writes.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Existing(Device),
    /// Existing device whose transport was just recorded.
    Patched(Device),
    /// Device created from a group on first contact.
    Provisioned(Device),
}

impl Resolution {
    pub fn device(&self) -> &Device {
        match self {
            Self::Existing(d) | Self::Patched(d) | Self::Provisioned(d) => d,
        }
    }

    pub fn into_device(self) -> Device {
        match self {
            Self::Existing(d) | Self::Patched(d) | Self::Provisioned(d) => d,
        }
    }
}

pub struct Resolver {
    registry: Arc<dyn Registry>,
    defaults: Defaults,
}

impl Resolver {
    pub fn new(registry: Arc<dyn Registry>, defaults: Defaults) -> Self {
        Self { registry, defaults }
    }

    pub async fn resolve(&self, hint: RoutingHint<'_>) -> Result<Resolution, CoreError> {
        let group = match self.registry.find_group(hint.api_key, hint.resource).await? {
            Some(group) => Some(group),
            None if self.is_default_key(hint.api_key) => Some(self.default_group(hint.api_key)),
            None => None,
        };

        let device = match group {
            Some(ref g) => {
                self.registry
                    .find_device(&g.service, &g.subservice, hint.device_id)
                    .await?
            }
            None => None,
        };
        let device = match device {
            Some(d) => Some(d),
            None => {
                self.registry
                    .find_device_by_key(hint.api_key, hint.device_id)
                    .await?
            }
        };

        if let Some(mut device) = device {
            if device
                .api_key
                .as_deref()
                .is_some_and(|k| k != hint.api_key)
            {
                debug!(
                    device_id = hint.device_id,
                    api_key = hint.api_key,
                    "device is provisioned under a different API key"
                );
                return Err(unknown(hint));
            }
            if device.transport.is_none() {
                device.transport = Some(hint.transport);
                self.registry.store_device(device.clone()).await?;
                debug!(device_id = %device.id, transport = %hint.transport, "recorded device transport");
                return Ok(Resolution::Patched(device));
            }
            return Ok(Resolution::Existing(device));
        }

        let Some(group) = group else {
            return Err(unknown(hint));
        };

        let device = group.provision(hint.device_id, hint.transport);
        self.registry.store_device(device.clone()).await?;
        info!(
            device_id = %device.id,
            entity = %device.entity_name,
            transport = %hint.transport,
            "provisioned device from group"
        );
        Ok(Resolution::Provisioned(device))
    }

    fn is_default_key(&self, api_key: &str) -> bool {
        self.defaults.api_key.as_deref() == Some(api_key)
    }

    fn default_group(&self, api_key: &str) -> Group {
        Group::new(
            api_key,
            &self.defaults.service,
            &self.defaults.subservice,
            DEFAULT_ENTITY_TYPE,
        )
    }
}

fn unknown(hint: RoutingHint<'_>) -> CoreError {
    CoreError::UnknownDevice {
        api_key: hint.api_key.to_owned(),
        device_id: hint.device_id.to_owned(),
    }
}
