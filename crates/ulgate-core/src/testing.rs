// ── Recording fakes for unit tests ──

#![allow(clippy::unwrap_used)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use ulgate_api::Scope;
use ulgate_api::context::types::{Attribute, Entity, Subscription};

use crate::broker::ContextBroker;
use crate::error::CoreError;
use crate::model::PayloadEncoding;
use crate::outbound::Outbound;

#[derive(Default)]
pub(crate) struct RecordingBroker {
    pub updates: Mutex<Vec<Entity>>,
    pub subscriptions: Mutex<Vec<(String, Subscription)>>,
    pub unsubscribed: Mutex<Vec<String>>,
    pub attributes: Mutex<IndexMap<String, Attribute>>,
    pub fail: AtomicBool,
    next_id: AtomicUsize,
}

impl RecordingBroker {
    pub fn updates(&self) -> Vec<Entity> {
        self.updates.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), CoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::BackendUnavailable {
                message: "broker down".into(),
                status: Some(503),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContextBroker for RecordingBroker {
    async fn update(&self, _scope: Scope<'_>, entity: Entity) -> Result<(), CoreError> {
        self.check()?;
        self.updates.lock().unwrap().push(entity);
        Ok(())
    }

    async fn query(
        &self,
        _scope: Scope<'_>,
        _entity_id: &str,
        _entity_type: &str,
        attrs: &[String],
    ) -> Result<IndexMap<String, Attribute>, CoreError> {
        self.check()?;
        let stored = self.attributes.lock().unwrap();
        Ok(stored
            .iter()
            .filter(|(k, _)| attrs.is_empty() || attrs.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn subscribe(
        &self,
        _scope: Scope<'_>,
        subscription: &Subscription,
    ) -> Result<String, CoreError> {
        self.check()?;
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .lock()
            .unwrap()
            .push((id.clone(), subscription.clone()));
        Ok(id)
    }

    async fn unsubscribe(&self, _scope: Scope<'_>, subscription_id: &str) -> Result<(), CoreError> {
        self.unsubscribed
            .lock()
            .unwrap()
            .push(subscription_id.to_owned());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingOutbound {
    pub sent: Mutex<Vec<(String, Bytes)>>,
    pub reply: Mutex<Option<Bytes>>,
    pub fail: AtomicBool,
}

impl RecordingOutbound {
    pub fn sent(&self) -> Vec<(String, Bytes)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(
        &self,
        address: &str,
        _encoding: PayloadEncoding,
        payload: Bytes,
    ) -> Result<Option<Bytes>, ulgate_api::Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ulgate_api::Error::NotConnected { transport: "test" });
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_owned(), payload));
        Ok(self.reply.lock().unwrap().clone())
    }
}
