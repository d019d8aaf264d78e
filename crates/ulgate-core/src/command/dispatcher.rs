// ── Command dispatcher ──
//
// Push devices:  PENDING -> send -> DELIVERED | ERROR (not retried)
// Poll devices:  PENDING -> queued -> DELIVERED on the next poll
// Either:        result correlated -> OK, or swept -> EXPIRED
//
// The delivery binding is selected once per device and cached until the
// device record changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};
use ulgate_api::Scope;
use ulgate_api::context::types::{Attribute, Entity};

use super::queue::{CommandQueue, Expiry};
use crate::address;
use crate::broker::ContextBroker;
use crate::codec::{self, CommandResult};
use crate::config::Defaults;
use crate::error::CoreError;
use crate::model::{CommandState, CommandStatus, Device, DeviceKey, PendingCommand, TransportKind};
use crate::outbound::{Outbound, delivery_failed};
use crate::pipeline::infer_type;

/// How commands reach one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// HTTP device without an endpoint: commands wait for its next poll.
    HttpPoll,
    HttpPush { endpoint: String },
    Mqtt { topic: String },
    Amqp { routing_key: String },
}

impl Binding {
    pub fn select(device: &Device, defaults: &Defaults) -> Self {
        let transport = device.transport.unwrap_or(defaults.transport);
        let api_key = device
            .api_key
            .as_deref()
            .or(defaults.api_key.as_deref())
            .unwrap_or_default();
        match transport {
            TransportKind::Http => match device.endpoint.as_deref() {
                Some(endpoint) if !endpoint.is_empty() => Self::HttpPush {
                    endpoint: endpoint.to_owned(),
                },
                _ => Self::HttpPoll,
            },
            TransportKind::Mqtt => Self::Mqtt {
                topic: address::command(transport, api_key, &device.id),
            },
            TransportKind::Amqp => Self::Amqp {
                routing_key: address::command(transport, api_key, &device.id),
            },
        }
    }

    pub fn transport(&self) -> TransportKind {
        match self {
            Self::HttpPoll | Self::HttpPush { .. } => TransportKind::Http,
            Self::Mqtt { .. } => TransportKind::Mqtt,
            Self::Amqp { .. } => TransportKind::Amqp,
        }
    }

    /// Push destination; `None` for polling devices.
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::HttpPoll => None,
            Self::HttpPush { endpoint } => Some(endpoint),
            Self::Mqtt { topic } => Some(topic),
            Self::Amqp { routing_key } => Some(routing_key),
        }
    }
}

/// Outbound senders per transport. A missing sender means that transport
/// is disabled and pushes over it fail.
#[derive(Clone, Default)]
pub struct Outbounds {
    pub http: Option<Arc<dyn Outbound>>,
    pub mqtt: Option<Arc<dyn Outbound>>,
    pub amqp: Option<Arc<dyn Outbound>>,
}

impl Outbounds {
    pub fn get(&self, transport: TransportKind) -> Option<&Arc<dyn Outbound>> {
        match transport {
            TransportKind::Http => self.http.as_ref(),
            TransportKind::Mqtt => self.mqtt.as_ref(),
            TransportKind::Amqp => self.amqp.as_ref(),
        }
    }
}

pub struct Dispatcher {
    queue: CommandQueue,
    broker: Arc<dyn ContextBroker>,
    outbounds: Outbounds,
    defaults: Defaults,
    bindings: DashMap<DeviceKey, Binding>,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn ContextBroker>, outbounds: Outbounds, defaults: Defaults) -> Self {
        Self {
            queue: CommandQueue::new(),
            broker,
            outbounds,
            defaults,
            bindings: DashMap::new(),
        }
    }

    /// Hold at most `capacity` commands per device.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue = CommandQueue::with_capacity(capacity);
        self
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Cached binding for `device`, selected on first use.
    pub fn binding(&self, device: &Device) -> Binding {
        let key = device.key();
        if let Some(binding) = self.bindings.get(&key) {
            return binding.clone();
        }
        let binding = Binding::select(device, &self.defaults);
        self.bindings.insert(key, binding.clone());
        binding
    }

    /// Forget the cached binding after the device record changed.
    pub fn invalidate(&self, key: &DeviceKey) {
        self.bindings.remove(key);
    }

    /// Drop everything held for a deprovisioned device.
    pub fn forget(&self, key: &DeviceKey) -> usize {
        self.invalidate(key);
        self.queue.purge(key)
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Push or enqueue one command. Returns the state it was left in.
    ///
    /// A failed push is reported as `ERROR` on the entity, removed from
    /// the queue and returned as [`CoreError::DeliveryFailed`].
    pub async fn dispatch(
        &self,
        device: &Device,
        name: &str,
        value: Value,
    ) -> Result<CommandState, CoreError> {
        let binding = self.binding(device);
        let Some(destination) = binding.address() else {
            let command = PendingCommand::new(device, name, value, CommandState::Queued);
            self.enqueue(&command).await;
            self.report(&command, CommandStatus::Pending, None).await;
            debug!(device_id = %device.id, command = name, "command queued for polling");
            return Ok(CommandState::Queued);
        };

        let command = PendingCommand::new(device, name, value, CommandState::Delivering);
        let Some(outbound) = self.outbounds.get(binding.transport()) else {
            let reason = format!("{} transport is not enabled", binding.transport());
            self.report(&command, CommandStatus::Error, Some(Value::String(reason.clone())))
                .await;
            return Err(CoreError::DeliveryFailed {
                device_id: device.id.clone(),
                command: name.to_owned(),
                reason,
            });
        };

        self.enqueue(&command).await;
        self.report(&command, CommandStatus::Pending, None).await;

        let payload = codec::encode_command(device.encoding, name, &command.value);
        match outbound.send(destination, device.encoding, payload).await {
            Ok(reply) => {
                if self.queue.mark_delivered(&command.key(), command.id).await {
                    self.report(&command, CommandStatus::Delivered, None).await;
                }
                debug!(device_id = %device.id, command = name, to = destination, "command delivered");
                if let Some(body) = reply {
                    self.settle_reply(device, &body).await;
                }
                Ok(CommandState::Delivered)
            }
            Err(e) => {
                self.queue.remove(&command.key(), command.id).await;
                warn!(device_id = %device.id, command = name, error = %e, "command delivery failed");
                self.report(&command, CommandStatus::Error, Some(Value::String(e.to_string())))
                    .await;
                Err(delivery_failed(&device.id, name, &e))
            }
        }
    }

    /// Track a command; one evicted from a full queue is reported expired.
    async fn enqueue(&self, command: &PendingCommand) {
        if let Some(evicted) = self.queue.push(command.clone()).await {
            warn!(
                device_id = %evicted.device_id,
                command = %evicted.name,
                "command queue full, oldest command expired"
            );
            let info = Value::String("evicted from a full command queue".into());
            self.report(&evicted, CommandStatus::Expired, Some(info)).await;
        }
    }

    /// Correlate results carried in the body of a synchronous push.
    async fn settle_reply(&self, device: &Device, body: &[u8]) {
        match codec::decode_results(device.encoding, body) {
            Ok(results) => {
                for result in results {
                    // A miss is already logged.
                    let _ = self.handle_result(device, result).await;
                }
            }
            Err(e) => {
                debug!(device_id = %device.id, error = %e, "push reply carries no command result");
            }
        }
    }

    // ── Poll ────────────────────────────────────────────────────────

    /// Hand every queued command to a polling device and mark it delivered.
    pub async fn poll(&self, device: &Device) -> Vec<PendingCommand> {
        let commands = self.queue.take_queued(&device.key()).await;
        if commands.is_empty() {
            return commands;
        }

        let entity = commands.iter().fold(
            Entity::new(&device.entity_name, &device.entity_type),
            |entity, c| {
                entity.with_attribute(
                    status_attr(&c.name),
                    Attribute::text(CommandStatus::Delivered.to_string()),
                )
            },
        );
        let scope = Scope::new(&device.service, &device.subservice);
        if let Err(e) = self.broker.update(scope, entity).await {
            warn!(device_id = %device.id, error = %e, "failed to report polled commands");
        }
        debug!(device_id = %device.id, count = commands.len(), "commands handed to polling device");
        commands
    }

    // ── Results ─────────────────────────────────────────────────────

    /// Settle a pending command with the device's result.
    ///
    /// The entity gets a single update carrying `{cmd}_status = OK` and
    /// `{cmd}_info = result`. A result nothing waits for is logged and
    /// returned as [`CoreError::CorrelationMiss`].
    pub async fn handle_result(
        &self,
        device: &Device,
        result: CommandResult,
    ) -> Result<(), CoreError> {
        if let Some(claimed) = result.device_id.as_deref().filter(|c| *c != device.id) {
            debug!(device_id = %device.id, claimed, "result names another device id");
        }

        let Some(command) = self.queue.correlate(&device.key(), &result.name).await else {
            warn!(device_id = %device.id, command = %result.name, "command result matches no pending command");
            return Err(CoreError::CorrelationMiss {
                device_id: device.id.clone(),
                command: result.name,
            });
        };

        let entity = status_entity(&command, CommandStatus::Ok, Some(result.value));
        let scope = Scope::new(&command.service, &command.subservice);
        self.broker.update(scope, entity).await?;
        info!(device_id = %device.id, command = %command.name, "command completed");
        Ok(())
    }

    // ── Expiration ──────────────────────────────────────────────────

    /// Remove commands past their age limit and report them `EXPIRED`.
    pub async fn expire(&self, expiry: Expiry, now: DateTime<Utc>) -> usize {
        let expired = self.queue.expire(expiry, now).await;
        for command in &expired {
            info!(device_id = %command.device_id, command = %command.name, "command expired");
            self.report(command, CommandStatus::Expired, None).await;
        }
        expired.len()
    }

    /// Mirror a transition on the entity. Failures are logged only: the
    /// command itself already moved on.
    async fn report(&self, command: &PendingCommand, status: CommandStatus, info: Option<Value>) {
        let entity = status_entity(command, status, info);
        let scope = Scope::new(&command.service, &command.subservice);
        if let Err(e) = self.broker.update(scope, entity).await {
            warn!(
                device_id = %command.device_id,
                command = %command.name,
                status = %status,
                error = %e,
                "failed to report command status"
            );
        }
    }
}

fn status_attr(command: &str) -> String {
    format!("{command}_status")
}

fn status_entity(command: &PendingCommand, status: CommandStatus, info: Option<Value>) -> Entity {
    let entity = Entity::new(&command.entity_name, &command.entity_type)
        .with_attribute(status_attr(&command.name), Attribute::text(status.to_string()));
    match info {
        Some(Value::String(text)) => {
            entity.with_attribute(format!("{}_info", command.name), Attribute::text(text))
        }
        Some(value) => entity.with_attribute(
            format!("{}_info", command.name),
            Attribute::new(infer_type(&value), value),
        ),
        None => entity,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::PayloadEncoding;
    use crate::testing::{RecordingBroker, RecordingOutbound};
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn mqtt_device() -> Device {
        let mut device = Device::new("MQTT_2", "smartcity", "/");
        device.api_key = Some("1234".into());
        device.transport = Some(TransportKind::Mqtt);
        device
    }

    fn setup() -> (Arc<RecordingBroker>, Arc<RecordingOutbound>, Dispatcher) {
        let broker = Arc::new(RecordingBroker::default());
        let outbound = Arc::new(RecordingOutbound::default());
        let outbounds = Outbounds {
            http: Some(outbound.clone()),
            mqtt: Some(outbound.clone()),
            amqp: Some(outbound.clone()),
        };
        let dispatcher = Dispatcher::new(broker.clone(), outbounds, Defaults::default());
        (broker, outbound, dispatcher)
    }

    fn statuses(broker: &RecordingBroker, attr: &str) -> Vec<Value> {
        broker
            .updates()
            .iter()
            .filter_map(|e| e.attributes.get(attr).map(|a| a.value.clone()))
            .collect()
    }

    // ── Binding selection ───────────────────────────────────────────

    #[test]
    fn binding_follows_transport_and_endpoint() {
        let defaults = Defaults::default();
        let mut device = Device::new("dev1", "s", "/");
        device.api_key = Some("k".into());
        assert_eq!(Binding::select(&device, &defaults), Binding::HttpPoll);

        device.endpoint = Some("http://dev1:9001/cmd".into());
        assert_eq!(
            Binding::select(&device, &defaults),
            Binding::HttpPush {
                endpoint: "http://dev1:9001/cmd".into()
            }
        );

        device.transport = Some(TransportKind::Amqp);
        assert_eq!(
            Binding::select(&device, &defaults).address(),
            Some(".k.dev1.cmd")
        );
    }

    #[test]
    fn binding_is_cached_until_invalidated() {
        let (_, _, dispatcher) = setup();
        let mut device = Device::new("dev1", "s", "/");
        assert_eq!(dispatcher.binding(&device), Binding::HttpPoll);

        device.endpoint = Some("http://dev1/cmd".into());
        assert_eq!(dispatcher.binding(&device), Binding::HttpPoll);

        dispatcher.invalidate(&device.key());
        assert!(matches!(dispatcher.binding(&device), Binding::HttpPush { .. }));
    }

    // ── Push ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn push_reports_pending_then_delivered() {
        let (broker, outbound, dispatcher) = setup();
        let device = mqtt_device();

        let state = dispatcher
            .dispatch(&device, "PING", json!("data=22"))
            .await
            .unwrap();
        assert_eq!(state, CommandState::Delivered);

        let sent = outbound.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "/1234/MQTT_2/cmd");
        assert_eq!(sent[0].1, Bytes::from("PING|data=22"));
        assert_eq!(
            statuses(&broker, "PING_status"),
            vec![json!("PENDING"), json!("DELIVERED")]
        );
    }

    #[tokio::test]
    async fn failed_push_is_reported_and_dropped() {
        let (broker, outbound, dispatcher) = setup();
        outbound.fail.store(true, Ordering::SeqCst);
        let device = mqtt_device();

        let err = dispatcher
            .dispatch(&device, "PING", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeliveryFailed { .. }));
        assert!(dispatcher.queue().pending(&device.key()).await.is_empty());
        assert_eq!(
            statuses(&broker, "PING_status"),
            vec![json!("PENDING"), json!("ERROR")]
        );
        assert_eq!(statuses(&broker, "PING_info").len(), 1);
    }

    #[tokio::test]
    async fn disabled_transport_fails_delivery() {
        let broker = Arc::new(RecordingBroker::default());
        let dispatcher = Dispatcher::new(broker.clone(), Outbounds::default(), Defaults::default());

        let err = dispatcher
            .dispatch(&mqtt_device(), "PING", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeliveryFailed { .. }));
        assert_eq!(statuses(&broker, "PING_status"), vec![json!("ERROR")]);
    }

    #[tokio::test]
    async fn synchronous_push_reply_is_correlated() {
        let (broker, outbound, dispatcher) = setup();
        *outbound.reply.lock().unwrap() = Some(Bytes::from("dev1@reset|done"));
        let mut device = Device::new("dev1", "s", "/");
        device.endpoint = Some("http://dev1/cmd".into());

        dispatcher.dispatch(&device, "reset", json!(null)).await.unwrap();

        assert_eq!(outbound.sent()[0].0, "http://dev1/cmd");
        assert_eq!(
            statuses(&broker, "reset_status"),
            vec![json!("PENDING"), json!("DELIVERED"), json!("OK")]
        );
        assert_eq!(statuses(&broker, "reset_info"), vec![json!("done")]);
        assert!(dispatcher.queue().pending(&device.key()).await.is_empty());
    }

    // ── Poll and results ────────────────────────────────────────────

    #[tokio::test]
    async fn poll_delivers_once() {
        let (broker, outbound, dispatcher) = setup();
        let mut device = Device::new("dev1", "s", "/");
        device.encoding = PayloadEncoding::UltraLight;

        let state = dispatcher.dispatch(&device, "on", json!("1")).await.unwrap();
        assert_eq!(state, CommandState::Queued);
        assert!(outbound.sent().is_empty());

        let first = dispatcher.poll(&device).await;
        assert_eq!(first.len(), 1);
        assert!(dispatcher.poll(&device).await.is_empty());
        assert_eq!(
            statuses(&broker, "on_status"),
            vec![json!("PENDING"), json!("DELIVERED")]
        );
    }

    #[tokio::test]
    async fn result_sets_status_and_info_in_one_update() {
        let (broker, _, dispatcher) = setup();
        let device = mqtt_device();
        dispatcher.dispatch(&device, "PING", json!("data=22")).await.unwrap();
        let before = broker.updates().len();

        dispatcher
            .handle_result(
                &device,
                CommandResult {
                    device_id: None,
                    name: "PING".into(),
                    value: json!("1234567890"),
                },
            )
            .await
            .unwrap();

        let updates = broker.updates();
        assert_eq!(updates.len(), before + 1);
        let last = updates.last().unwrap();
        assert_eq!(last.id, "MQTT_2");
        assert_eq!(last.attributes["PING_status"].value, json!("OK"));
        assert_eq!(last.attributes["PING_info"].value, json!("1234567890"));
    }

    #[tokio::test]
    async fn unexpected_result_is_a_miss() {
        let (broker, _, dispatcher) = setup();
        let err = dispatcher
            .handle_result(
                &mqtt_device(),
                CommandResult {
                    device_id: None,
                    name: "PING".into(),
                    value: json!("x"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CorrelationMiss { .. }));
        assert!(broker.updates().is_empty());
    }

    #[tokio::test]
    async fn unanswered_pushes_are_bounded_per_device() {
        let (broker, outbound, dispatcher) = setup();
        let dispatcher = dispatcher.with_queue_capacity(2);
        let device = mqtt_device();

        for name in ["a", "b", "c"] {
            dispatcher.dispatch(&device, name, json!(1)).await.unwrap();
        }

        assert_eq!(outbound.sent().len(), 3);
        let held: Vec<String> = dispatcher
            .queue()
            .pending(&device.key())
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(held, vec!["b", "c"]);
        assert_eq!(
            statuses(&broker, "a_status"),
            vec![json!("PENDING"), json!("DELIVERED"), json!("EXPIRED")]
        );
    }

    #[tokio::test]
    async fn expired_commands_are_reported() {
        let (broker, _, dispatcher) = setup();
        let device = Device::new("dev1", "s", "/");
        dispatcher.dispatch(&device, "on", json!(1)).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(
            dispatcher
                .expire(Expiry::uniform(Duration::from_secs(60)), later)
                .await,
            1
        );
        assert_eq!(
            statuses(&broker, "on_status"),
            vec![json!("PENDING"), json!("EXPIRED")]
        );
        assert!(dispatcher.poll(&device).await.is_empty());
    }
}
