// ── Provisioning registry seam ──
//
// The core only looks records up (and patches them back); storage and the
// administrative API live behind this trait.

mod memory;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{Device, Group};

pub use memory::MemoryRegistry;

/// Lookup service for provisioned devices and groups.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn find_device(
        &self,
        service: &str,
        subservice: &str,
        device_id: &str,
    ) -> Result<Option<Device>, CoreError>;

    /// Lookup when only the routing API key is known.
    async fn find_device_by_key(
        &self,
        api_key: &str,
        device_id: &str,
    ) -> Result<Option<Device>, CoreError>;

    async fn find_device_by_entity(
        &self,
        service: &str,
        subservice: &str,
        entity_name: &str,
    ) -> Result<Option<Device>, CoreError>;

    /// Group serving `api_key` on `resource`; a group with an empty resource
    /// matches any. `resource` is `None` for non-HTTP transports.
    async fn find_group(
        &self,
        api_key: &str,
        resource: Option<&str>,
    ) -> Result<Option<Group>, CoreError>;

    /// Devices of a tenancy; `None` widens the filter.
    async fn list_devices(
        &self,
        service: Option<&str>,
        subservice: Option<&str>,
    ) -> Result<Vec<Device>, CoreError>;

    /// Insert or replace a device record.
    async fn store_device(&self, device: Device) -> Result<(), CoreError>;

    async fn remove_device(
        &self,
        service: &str,
        subservice: &str,
        device_id: &str,
    ) -> Result<Option<Device>, CoreError>;
}
