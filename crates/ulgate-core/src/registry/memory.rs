// ── In-memory registry ──
//
// Lock-free concurrent storage with secondary indexes by API key and by
// entity name, plus a `watch`-based version counter that bumps on every
// mutation.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;

use super::Registry;
use crate::error::CoreError;
use crate::model::{Device, DeviceKey, Group};

type EntityKey = (String, String, String);

/// Registry bundled with the gateway for statically provisioned records.
pub struct MemoryRegistry {
    /// Primary storage.
    devices: DashMap<DeviceKey, Arc<Device>>,

    /// Secondary index: (api key, device id) -> key.
    by_api_key: DashMap<(String, String), DeviceKey>,

    /// Secondary index: (service, subservice, entity name) -> key.
    by_entity: DashMap<EntityKey, DeviceKey>,

    /// Groups by (api key, resource).
    groups: DashMap<(String, String), Arc<Group>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            devices: DashMap::new(),
            by_api_key: DashMap::new(),
            by_entity: DashMap::new(),
            groups: DashMap::new(),
            version,
        }
    }

    /// Insert or replace a group. Returns `true` if the pair was new.
    pub fn upsert_group(&self, group: Group) -> bool {
        let key = (group.api_key.clone(), group.resource.clone());
        let is_new = self.groups.insert(key, Arc::new(group)).is_none();
        self.bump_version();
        is_new
    }

    /// Insert or replace a device. Returns `true` if the key was new.
    pub fn upsert_device(&self, device: Device) -> bool {
        let key = device.key();

        // Drop index entries of the record being replaced.
        if let Some(old) = self.devices.get(&key).map(|r| Arc::clone(r.value())) {
            self.unindex(&old);
        }

        if let Some(ref api_key) = device.api_key {
            self.by_api_key
                .insert((api_key.clone(), device.id.clone()), key.clone());
        }
        self.by_entity.insert(entity_key(&device), key.clone());
        let is_new = self.devices.insert(key, Arc::new(device)).is_none();

        self.bump_version();
        is_new
    }

    pub fn remove(&self, key: &DeviceKey) -> Option<Arc<Device>> {
        let removed = self.devices.remove(key).map(|(_, v)| v);
        if let Some(ref device) = removed {
            self.unindex(device);
            self.bump_version();
        }
        removed
    }

    pub fn get(&self, key: &DeviceKey) -> Option<Arc<Device>> {
        self.devices.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Subscribe to the mutation counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn unindex(&self, device: &Device) {
        if let Some(ref api_key) = device.api_key {
            self.by_api_key.remove(&(api_key.clone(), device.id.clone()));
        }
        self.by_entity.remove(&entity_key(device));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn resolve(&self, key: Option<DeviceKey>) -> Option<Device> {
        key.and_then(|k| self.get(&k)).map(|d| (*d).clone())
    }
}

fn entity_key(device: &Device) -> EntityKey {
    (
        device.service.clone(),
        device.subservice.clone(),
        device.entity_name.clone(),
    )
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn find_device(
        &self,
        service: &str,
        subservice: &str,
        device_id: &str,
    ) -> Result<Option<Device>, CoreError> {
        Ok(self.resolve(Some(DeviceKey::new(service, subservice, device_id))))
    }

    async fn find_device_by_key(
        &self,
        api_key: &str,
        device_id: &str,
    ) -> Result<Option<Device>, CoreError> {
        let key = self
            .by_api_key
            .get(&(api_key.to_owned(), device_id.to_owned()))
            .map(|r| r.value().clone());
        Ok(self.resolve(key))
    }

    async fn find_device_by_entity(
        &self,
        service: &str,
        subservice: &str,
        entity_name: &str,
    ) -> Result<Option<Device>, CoreError> {
        let key = self
            .by_entity
            .get(&(service.to_owned(), subservice.to_owned(), entity_name.to_owned()))
            .map(|r| r.value().clone());
        Ok(self.resolve(key))
    }

    async fn find_group(
        &self,
        api_key: &str,
        resource: Option<&str>,
    ) -> Result<Option<Group>, CoreError> {
        // Exact resource first, then the catch-all group.
        if let Some(resource) = resource {
            if let Some(g) = self.groups.get(&(api_key.to_owned(), resource.to_owned())) {
                return Ok(Some((**g).clone()));
            }
        }
        if let Some(g) = self.groups.get(&(api_key.to_owned(), String::new())) {
            return Ok(Some((**g).clone()));
        }
        if resource.is_none() {
            let any = self
                .groups
                .iter()
                .find(|r| r.key().0 == api_key)
                .map(|r| (**r.value()).clone());
            return Ok(any);
        }
        Ok(None)
    }

    async fn list_devices(
        &self,
        service: Option<&str>,
        subservice: Option<&str>,
    ) -> Result<Vec<Device>, CoreError> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|r| service.is_none_or(|s| r.key().service == s))
            .filter(|r| subservice.is_none_or(|s| r.key().subservice == s))
            .map(|r| (**r.value()).clone())
            .collect();
        devices.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(devices)
    }

    async fn store_device(&self, device: Device) -> Result<(), CoreError> {
        self.upsert_device(device);
        Ok(())
    }

    async fn remove_device(
        &self,
        service: &str,
        subservice: &str,
        device_id: &str,
    ) -> Result<Option<Device>, CoreError> {
        Ok(self
            .remove(&DeviceKey::new(service, subservice, device_id))
            .map(|d| (*d).clone()))
    }
}
