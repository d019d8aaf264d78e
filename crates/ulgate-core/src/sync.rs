// ── Broker subscriptions ──
//
// Bidirectional attributes and configuration subscriptions are backed by
// broker subscriptions whose ids live in the device record. Re-provisioning
// and restarts tear the stored ids down before creating new ones, so a
// device never ends up with two live subscriptions for the same purpose.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use ulgate_api::Scope;
use ulgate_api::context::types::{EntityRef, Subscription};

use crate::broker::ContextBroker;
use crate::error::CoreError;
use crate::model::{Device, DeviceKey, SubscriptionKind, SubscriptionRecord};
use crate::registry::Registry;

pub struct SyncManager {
    registry: Arc<dyn Registry>,
    broker: Arc<dyn ContextBroker>,
    notify_url: String,
    /// Live subscription id -> owning device.
    index: DashMap<String, (DeviceKey, SubscriptionKind)>,
}

impl SyncManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        broker: Arc<dyn ContextBroker>,
        notify_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            broker,
            notify_url: notify_url.into(),
            index: DashMap::new(),
        }
    }

    /// Provision `device` over whatever record the registry holds for it.
    ///
    /// The stored record's subscriptions are cancelled first, so a fresh
    /// record from an external provisioner does not leave the previous
    /// subscription live.
    pub async fn provision(&self, mut device: Device) -> Result<Device, CoreError> {
        let stored = self
            .registry
            .find_device(&device.service, &device.subservice, &device.id)
            .await?;
        if let Some(mut stored) = stored {
            let stale: HashSet<String> = stored.subscriptions.iter().map(|s| s.id.clone()).collect();
            self.teardown(&mut stored).await;
            device.subscriptions.retain(|s| !stale.contains(&s.id));
        }
        self.setup(device).await
    }

    /// Replace the device's bidirectional subscription and store the record.
    pub async fn setup(&self, mut device: Device) -> Result<Device, CoreError> {
        self.teardown_kind(&mut device, Some(SubscriptionKind::Bidirectional))
            .await;

        if device.has_bidirectional() {
            let attributes: Vec<String> = device.bidirectional().map(|(a, _)| a.name.clone()).collect();
            let record = self
                .create(&device, SubscriptionKind::Bidirectional, attributes)
                .await?;
            device.subscriptions.push(record);
        }

        self.registry.store_device(device.clone()).await?;
        Ok(device)
    }

    /// Subscribe to attribute changes whose values the device wants pushed
    /// on its configuration channel. A previous configuration subscription
    /// is replaced.
    pub async fn subscribe_configuration(
        &self,
        mut device: Device,
        attributes: Vec<String>,
    ) -> Result<Device, CoreError> {
        self.teardown_kind(&mut device, Some(SubscriptionKind::Configuration))
            .await;
        let record = self
            .create(&device, SubscriptionKind::Configuration, attributes)
            .await?;
        device.subscriptions.push(record);
        self.registry.store_device(device.clone()).await?;
        Ok(device)
    }

    /// Cancel every subscription held by the device.
    pub async fn teardown(&self, device: &mut Device) {
        self.teardown_kind(device, None).await;
    }

    async fn teardown_kind(&self, device: &mut Device, kind: Option<SubscriptionKind>) {
        let (stale, keep): (Vec<_>, Vec<_>) = device
            .subscriptions
            .drain(..)
            .partition(|s| kind.is_none_or(|k| s.kind == k));
        device.subscriptions = keep;

        let scope = Scope::new(&device.service, &device.subservice);
        for record in stale {
            self.index.remove(&record.id);
            match self.broker.unsubscribe(scope, &record.id).await {
                Ok(()) => debug!(device_id = %device.id, subscription = %record.id, "subscription removed"),
                Err(e) => warn!(
                    device_id = %device.id,
                    subscription = %record.id,
                    error = %e,
                    "failed to remove subscription"
                ),
            }
        }
    }

    async fn create(
        &self,
        device: &Device,
        kind: SubscriptionKind,
        attributes: Vec<String>,
    ) -> Result<SubscriptionRecord, CoreError> {
        let entity = EntityRef {
            id: device.entity_name.clone(),
            entity_type: device.entity_type.clone(),
        };
        let subscription = Subscription::for_entity(entity, attributes.clone(), &self.notify_url);
        let scope = Scope::new(&device.service, &device.subservice);
        let id = self.broker.subscribe(scope, &subscription).await?;

        self.index.insert(id.clone(), (device.key(), kind));
        info!(device_id = %device.id, subscription = %id, ?kind, "subscription created");
        Ok(SubscriptionRecord {
            id,
            kind,
            attributes,
        })
    }

    /// Owner of a live subscription.
    pub fn lookup(&self, subscription_id: &str) -> Option<(DeviceKey, SubscriptionKind)> {
        self.index.get(subscription_id).map(|r| r.value().clone())
    }

    /// Recreate every stored subscription after a restart.
    ///
    /// Returns the number of devices whose subscriptions were rebuilt.
    /// One failing device does not stop the others.
    pub async fn reconcile(&self) -> Result<usize, CoreError> {
        let devices = self.registry.list_devices(None, None).await?;
        let mut rebuilt = 0;

        for mut device in devices {
            if device.subscriptions.is_empty() && !device.has_bidirectional() {
                continue;
            }
            let mut configuration: Vec<String> = Vec::new();
            for record in &device.subscriptions {
                if record.kind != SubscriptionKind::Configuration {
                    continue;
                }
                for attribute in &record.attributes {
                    if !configuration.contains(attribute) {
                        configuration.push(attribute.clone());
                    }
                }
            }
            self.teardown(&mut device).await;

            let mut result = self.setup(device).await;
            if !configuration.is_empty() {
                result = match result {
                    Ok(device) => self.subscribe_configuration(device, configuration).await,
                    Err(e) => Err(e),
                };
            }
            match result {
                Ok(device) => {
                    debug!(device_id = %device.id, count = device.subscriptions.len(), "subscriptions rebuilt");
                    rebuilt += 1;
                }
                Err(e) => warn!(error = %e, "failed to rebuild subscriptions"),
            }
        }
        Ok(rebuilt)
    }
}
