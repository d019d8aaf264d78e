// ── Context broker seam ──
//
// The pipeline, dispatcher and sync manager talk to the broker through this
// trait; `ContextClient` is the production implementation and tests swap in
// recording fakes.

use async_trait::async_trait;
use indexmap::IndexMap;
use ulgate_api::context::types::{Attribute, Entity, Subscription};
use ulgate_api::{ContextClient, Scope};

use crate::error::CoreError;

#[async_trait]
pub trait ContextBroker: Send + Sync {
    /// Append attributes to an entity, creating it when missing.
    async fn update(&self, scope: Scope<'_>, entity: Entity) -> Result<(), CoreError>;

    async fn query(
        &self,
        scope: Scope<'_>,
        entity_id: &str,
        entity_type: &str,
        attrs: &[String],
    ) -> Result<IndexMap<String, Attribute>, CoreError>;

    /// Returns the broker-assigned subscription id.
    async fn subscribe(
        &self,
        scope: Scope<'_>,
        subscription: &Subscription,
    ) -> Result<String, CoreError>;

    async fn unsubscribe(&self, scope: Scope<'_>, subscription_id: &str) -> Result<(), CoreError>;
}

#[async_trait]
impl ContextBroker for ContextClient {
    async fn update(&self, scope: Scope<'_>, entity: Entity) -> Result<(), CoreError> {
        Ok(self.update_entity(scope, entity).await?)
    }

    async fn query(
        &self,
        scope: Scope<'_>,
        entity_id: &str,
        entity_type: &str,
        attrs: &[String],
    ) -> Result<IndexMap<String, Attribute>, CoreError> {
        Ok(self
            .query_attributes(scope, entity_id, Some(entity_type), attrs)
            .await?)
    }

    async fn subscribe(
        &self,
        scope: Scope<'_>,
        subscription: &Subscription,
    ) -> Result<String, CoreError> {
        Ok(ContextClient::subscribe(self, scope, subscription).await?)
    }

    async fn unsubscribe(&self, scope: Scope<'_>, subscription_id: &str) -> Result<(), CoreError> {
        Ok(ContextClient::unsubscribe(self, scope, subscription_id).await?)
    }
}
