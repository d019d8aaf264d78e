#![allow(clippy::unwrap_used, dead_code)]
// Shared fakes and request helpers for the scenario tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use indexmap::IndexMap;
use tower::ServiceExt;

use ulgate_api::Scope;
use ulgate_api::context::types::{Attribute, Entity, Subscription};
use ulgate_core::{
    Agent, AgentConfig, ContextBroker, CoreError, Defaults, MemoryRegistry, Outbound, Outbounds,
    PayloadEncoding,
};

// ── Fakes ───────────────────────────────────────────────────────────

/// Broker that records every call.
#[derive(Default)]
pub struct FakeBroker {
    updates: Mutex<Vec<(String, String, Entity)>>,
    subscriptions: Mutex<Vec<Subscription>>,
    unsubscribed: Mutex<Vec<String>>,
    pub attributes: Mutex<IndexMap<String, Attribute>>,
    pub fail: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeBroker {
    pub fn updates(&self) -> Vec<Entity> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, e)| e.clone())
            .collect()
    }

    pub fn scopes(&self) -> Vec<(String, String)> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(s, p, _)| (s.clone(), p.clone()))
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextBroker for FakeBroker {
    async fn update(&self, scope: Scope<'_>, entity: Entity) -> Result<(), CoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::BackendUnavailable {
                message: "broker down".into(),
                status: Some(503),
            });
        }
        self.updates.lock().unwrap().push((
            scope.service.to_owned(),
            scope.subservice.to_owned(),
            entity,
        ));
        Ok(())
    }

    async fn query(
        &self,
        _scope: Scope<'_>,
        _entity_id: &str,
        _entity_type: &str,
        attrs: &[String],
    ) -> Result<IndexMap<String, Attribute>, CoreError> {
        Ok(self
            .attributes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| attrs.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn subscribe(
        &self,
        _scope: Scope<'_>,
        subscription: &Subscription,
    ) -> Result<String, CoreError> {
        self.subscriptions
            .lock()
            .unwrap()
            .push(subscription.clone());
        Ok(format!("sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn unsubscribe(&self, _scope: Scope<'_>, id: &str) -> Result<(), CoreError> {
        self.unsubscribed.lock().unwrap().push(id.to_owned());
        Ok(())
    }
}

/// Device transport that records every send.
#[derive(Default)]
pub struct FakeOutbound {
    sent: Mutex<Vec<(String, Bytes)>>,
    pub fail: AtomicBool,
}

impl FakeOutbound {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(to, body)| (to.clone(), String::from_utf8_lossy(body).into_owned()))
            .collect()
    }
}

#[async_trait]
impl Outbound for FakeOutbound {
    async fn send(
        &self,
        address: &str,
        _encoding: PayloadEncoding,
        payload: Bytes,
    ) -> Result<Option<Bytes>, ulgate_api::Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ulgate_api::Error::NotConnected { transport: "MQTT" });
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_owned(), payload));
        Ok(None)
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub agent: Agent,
    pub registry: Arc<MemoryRegistry>,
    pub broker: Arc<FakeBroker>,
    pub outbound: Arc<FakeOutbound>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AgentConfig {
            defaults: Defaults {
                service: "smartcity".into(),
                ..Defaults::default()
            },
            ..AgentConfig::default()
        })
    }

    pub fn with_config(config: AgentConfig) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let broker = Arc::new(FakeBroker::default());
        let outbound = Arc::new(FakeOutbound::default());
        let outbounds = Outbounds {
            http: Some(outbound.clone()),
            mqtt: Some(outbound.clone()),
            amqp: Some(outbound.clone()),
        };
        let agent = Agent::new(config, registry.clone(), broker.clone(), outbounds);
        Self {
            agent,
            registry,
            broker,
            outbound,
        }
    }

    pub fn south(&self) -> Router {
        ulgate_core::transport::south::router(self.agent.clone(), "/iot/d")
    }

    pub fn north(&self) -> Router {
        ulgate_core::transport::north::router(self.agent.clone())
    }
}

// ── Requests ────────────────────────────────────────────────────────

pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

pub fn post(uri: &str, content_type: &str, body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type)
        .body(Body::from(body.into()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// `POST /v2/op/update` for one entity.
pub fn command_update(service: &str, subservice: &str, entity: serde_json::Value) -> Request<Body> {
    let body = serde_json::json!({ "actionType": "update", "entities": [entity] });
    Request::builder()
        .method("POST")
        .uri("/v2/op/update")
        .header("content-type", "application/json")
        .header("fiware-service", service)
        .header("fiware-servicepath", subservice)
        .body(Body::from(body.to_string()))
        .unwrap()
}
