// ── Agent facade ──
//
// Owns the resolver, pipeline, dispatcher and sync manager, and routes
// every inbound interaction (device messages, broker commands, broker
// notifications) through them. Listeners hold cheap clones.

use std::sync::Arc;

use axum::Router;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use ulgate_api::context::types::{Entity, Notification};
use ulgate_api::{AmqpHandle, ContextClient, DeviceClient, InboundMessage, MqttHandle, Scope};

use crate::address::{self, Channel};
use crate::broker::ContextBroker;
use crate::codec;
use crate::command::{Dispatcher, Outbounds};
use crate::config::AgentConfig;
use crate::error::CoreError;
use crate::model::{CommandState, Device, PayloadEncoding, SubscriptionKind, TransportKind};
use crate::outbound::delivery_failed;
use crate::pipeline::{BatchOutcome, MeasurementPipeline, StageContext};
use crate::registry::Registry;
use crate::resolver::{Resolution, Resolver, RoutingHint};
use crate::sync::SyncManager;
use crate::transport;

/// One inbound measurement message.
#[derive(Debug, Clone, Copy)]
pub struct Measurement<'a> {
    pub hint: RoutingHint<'a>,
    /// Encoding override (topic prefix or HTTP content type).
    pub encoding: Option<PayloadEncoding>,
    pub payload: &'a [u8],
    /// Attribute named by an `/attrs/{attr}` topic.
    pub attribute: Option<&'a str>,
    /// Transport-level timestamp (`t=` on HTTP).
    pub timestamp: Option<&'a str>,
}

/// Body of a `configuration/commands` request.
#[derive(Debug, Deserialize)]
struct ConfigurationRequest {
    #[serde(rename = "type")]
    kind: ConfigurationKind,
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ConfigurationKind {
    Configuration,
    Subscription,
}

/// Served on `GET /iot/about`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub http: bool,
    /// `None` when the transport is disabled.
    pub mqtt_connected: Option<bool>,
    pub amqp_connected: Option<bool>,
}

// ── Agent ────────────────────────────────────────────────────────────

/// The gateway runtime.
///
/// Cheaply cloneable via `Arc<AgentInner>`. [`Agent::start`] wires real
/// network clients and listeners; [`Agent::new`] takes the collaborators
/// as given and starts nothing, which is what the scenario tests drive.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    registry: Arc<dyn Registry>,
    broker: Arc<dyn ContextBroker>,
    resolver: Resolver,
    pipeline: MeasurementPipeline,
    dispatcher: Dispatcher,
    sync: SyncManager,
    outbounds: Outbounds,
    mqtt: Option<MqttHandle>,
    amqp: Option<AmqpHandle>,
    /// Stops accepting inbound work.
    listeners: CancellationToken,
    /// Drops broker connections, after in-flight work drained.
    connections: CancellationToken,
    tracker: TaskTracker,
    started_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        registry: Arc<dyn Registry>,
        broker: Arc<dyn ContextBroker>,
        outbounds: Outbounds,
    ) -> Self {
        Self::build(
            config,
            registry,
            broker,
            outbounds,
            (None, None),
            CancellationToken::new(),
        )
    }

    fn build(
        config: AgentConfig,
        registry: Arc<dyn Registry>,
        broker: Arc<dyn ContextBroker>,
        outbounds: Outbounds,
        (mqtt, amqp): (Option<MqttHandle>, Option<AmqpHandle>),
        connections: CancellationToken,
    ) -> Self {
        let resolver = Resolver::new(Arc::clone(&registry), config.defaults.clone());
        let pipeline = MeasurementPipeline::new(Arc::clone(&broker));
        let dispatcher = Dispatcher::new(
            Arc::clone(&broker),
            outbounds.clone(),
            config.defaults.clone(),
        )
        .with_queue_capacity(config.max_pending_commands);
        let sync = SyncManager::new(
            Arc::clone(&registry),
            Arc::clone(&broker),
            config.notify_url(),
        );

        Self {
            inner: Arc::new(AgentInner {
                config,
                registry,
                broker,
                resolver,
                pipeline,
                dispatcher,
                sync,
                outbounds,
                mqtt,
                amqp,
                listeners: CancellationToken::new(),
                connections,
                tracker: TaskTracker::new(),
                started_at: Utc::now(),
            }),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn sync(&self) -> &SyncManager {
        &self.inner.sync
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Connect every enabled transport, bind the HTTP listeners, rebuild
    /// stored subscriptions and start the expiration sweeper.
    pub async fn start(
        config: AgentConfig,
        registry: Arc<dyn Registry>,
    ) -> Result<Self, CoreError> {
        let broker = Arc::new(ContextClient::new(
            &config.broker.url,
            &config.broker.transport,
        )?);
        let connections = CancellationToken::new();
        let mut outbounds = Outbounds::default();
        let mut inbound = Vec::new();

        if let Some(ref http) = config.http {
            outbounds.http = Some(Arc::new(DeviceClient::new(&http.transport)?));
        }

        let mqtt = config.mqtt.clone().map(|mut mqtt| {
            if mqtt.subscriptions.is_empty() {
                mqtt.subscriptions = address::mqtt_subscriptions();
            }
            let (handle, rx) = MqttHandle::connect(mqtt, connections.clone());
            outbounds.mqtt = Some(Arc::new(handle.clone()));
            inbound.push((TransportKind::Mqtt, rx));
            handle
        });

        let amqp = config.amqp.clone().map(|amqp| {
            let (handle, rx) = AmqpHandle::connect(amqp, connections.clone());
            outbounds.amqp = Some(Arc::new(handle.clone()));
            inbound.push((TransportKind::Amqp, rx));
            handle
        });

        let agent = Self::build(
            config,
            registry,
            broker,
            outbounds,
            (mqtt, amqp),
            connections,
        );

        if let Err(e) = agent.bind_listeners().await {
            agent.inner.listeners.cancel();
            agent.inner.connections.cancel();
            return Err(e);
        }

        for (transport, rx) in inbound {
            let listener = transport::messaging::listen(
                agent.clone(),
                transport,
                rx,
                agent.inner.listeners.clone(),
            );
            agent.inner.tracker.spawn(listener);
        }

        agent
            .inner
            .tracker
            .spawn(expiration_task(agent.clone()));

        match agent.inner.sync.reconcile().await {
            Ok(0) => {}
            Ok(count) => info!(devices = count, "rebuilt stored subscriptions"),
            Err(e) => warn!(error = %e, "subscription reconciliation failed"),
        }

        info!("agent started");
        Ok(agent)
    }

    async fn bind_listeners(&self) -> Result<(), CoreError> {
        let north = bind(self.config().north.bind, "northbound").await?;
        self.serve(north, transport::north::router(self.clone()), "northbound");

        if let Some(ref http) = self.config().http {
            let south = bind(http.bind, "southbound HTTP").await?;
            let resource = self.config().defaults.resource.clone();
            self.serve(
                south,
                transport::south::router(self.clone(), &resource),
                "southbound HTTP",
            );
        }
        Ok(())
    }

    fn serve(&self, listener: TcpListener, router: Router, name: &'static str) {
        let cancel = self.inner.listeners.clone();
        self.inner.tracker.spawn(async move {
            if let Ok(addr) = listener.local_addr() {
                info!(listener = name, %addr, "listening");
            }
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(listener = name, error = %e, "listener failed");
            }
        });
    }

    /// Run a task that shutdown waits for.
    pub(crate) fn track<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(task);
    }

    /// Stop accepting inbound work, let in-flight work finish within the
    /// grace period, then drop the broker connections.
    pub async fn shutdown(&self) {
        info!("stopping listeners");
        self.inner.listeners.cancel();
        self.inner.tracker.close();

        let grace = self.inner.config.shutdown_grace;
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                grace_secs = grace.as_secs(),
                "in-flight work still running after the grace period"
            );
        }

        self.inner.connections.cancel();
        info!("agent stopped");
    }

    pub fn about(&self) -> About {
        About {
            version: env!("CARGO_PKG_VERSION"),
            started_at: self.inner.started_at,
            http: self.inner.config.http.is_some(),
            mqtt_connected: self.inner.mqtt.as_ref().map(MqttHandle::is_connected),
            amqp_connected: self.inner.amqp.as_ref().map(AmqpHandle::is_connected),
        }
    }

    // ── Provisioning ────────────────────────────────────────────────

    /// Store a device and (re)create its bidirectional subscription. The
    /// subscriptions of any record already stored for it are cancelled.
    pub async fn provision_device(&self, device: Device) -> Result<Device, CoreError> {
        self.inner.dispatcher.invalidate(&device.key());
        let device = self.inner.sync.provision(device).await?;
        info!(device_id = %device.id, entity = %device.entity_name, "device provisioned");
        Ok(device)
    }

    /// Remove a device with its subscriptions and pending commands.
    pub async fn deprovision_device(
        &self,
        service: &str,
        subservice: &str,
        device_id: &str,
    ) -> Result<Option<Device>, CoreError> {
        let Some(mut device) = self
            .inner
            .registry
            .remove_device(service, subservice, device_id)
            .await?
        else {
            return Ok(None);
        };
        self.inner.sync.teardown(&mut device).await;
        let dropped = self.inner.dispatcher.forget(&device.key());
        info!(device_id = %device.id, dropped_commands = dropped, "device deprovisioned");
        Ok(Some(device))
    }

    /// Resolve the device behind a routing hint, provisioning it from its
    /// group on first contact.
    pub async fn resolve_device(&self, hint: RoutingHint<'_>) -> Result<Device, CoreError> {
        match self.inner.resolver.resolve(hint).await? {
            Resolution::Existing(device) => Ok(device),
            Resolution::Patched(device) => {
                self.inner.dispatcher.invalidate(&device.key());
                Ok(device)
            }
            Resolution::Provisioned(device) => {
                self.inner.dispatcher.invalidate(&device.key());
                if !device.has_bidirectional() {
                    return Ok(device);
                }
                match self.inner.sync.setup(device.clone()).await {
                    Ok(device) => Ok(device),
                    Err(e) => {
                        warn!(
                            device_id = %device.id,
                            error = %e,
                            "could not subscribe bidirectional attributes"
                        );
                        Ok(device)
                    }
                }
            }
        }
    }

    // ── Southbound ──────────────────────────────────────────────────

    /// Resolve, decode and forward one measurement message.
    ///
    /// Resolution errors and undecodable messages reject the whole message;
    /// malformed groups and backend failures are reported per group in the
    /// outcome while the other groups are forwarded.
    pub async fn handle_measures(
        &self,
        measurement: Measurement<'_>,
    ) -> Result<(Device, BatchOutcome), CoreError> {
        let device = self.resolve_device(measurement.hint).await?;
        let encoding = measurement.encoding.unwrap_or(device.encoding);
        let groups = codec::decode_groups(encoding, measurement.payload, measurement.attribute)?;

        let ctx = StageContext {
            device: &device,
            policy: self.inner.config.timestamp_policy(&device),
            expand_compact: self.inner.config.compact_formats,
            timestamp_param: measurement.timestamp,
            now: Utc::now(),
        };
        let outcome = self.inner.pipeline.process(&ctx, groups).await;
        debug!(
            device_id = %device.id,
            groups = outcome.results.len(),
            delivered = outcome.delivered(),
            "measurement processed"
        );
        Ok((device, outcome))
    }

    /// Settle command results. Returns how many matched a pending command;
    /// results nothing waits for are logged and skipped.
    pub async fn handle_results(
        &self,
        hint: RoutingHint<'_>,
        encoding: Option<PayloadEncoding>,
        payload: &[u8],
    ) -> Result<usize, CoreError> {
        let device = self.resolve_device(hint).await?;
        let results = codec::decode_results(encoding.unwrap_or(device.encoding), payload)?;

        let mut settled = 0;
        for result in results {
            match self.inner.dispatcher.handle_result(&device, result).await {
                Ok(()) => settled += 1,
                Err(CoreError::CorrelationMiss { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(settled)
    }

    /// Commands waiting for a polling device, encoded for its response.
    pub async fn poll_commands(&self, device: &Device, encoding: Option<PayloadEncoding>) -> Bytes {
        let commands = self.inner.dispatcher.poll(device).await;
        if commands.is_empty() {
            return Bytes::new();
        }
        codec::encode_polled(encoding.unwrap_or(device.encoding), &commands)
    }

    /// Entry point for MQTT and AMQP deliveries. Never fails: a bad
    /// message is logged and dropped.
    pub async fn handle_message(&self, transport: TransportKind, message: InboundMessage) {
        if let Err(e) = self.route_message(transport, &message).await {
            warn!(
                %transport,
                topic = %message.topic,
                code = e.code(),
                error = %e,
                "inbound message dropped"
            );
        }
    }

    async fn route_message(
        &self,
        transport: TransportKind,
        message: &InboundMessage,
    ) -> Result<(), CoreError> {
        let address = address::parse(transport, &message.topic)?;
        let hint = RoutingHint {
            transport,
            api_key: &address.api_key,
            device_id: &address.device_id,
            resource: None,
        };

        match address.channel {
            Channel::Measures { ref attribute } => {
                self.handle_measures(Measurement {
                    hint,
                    encoding: address.encoding,
                    payload: &message.payload,
                    attribute: attribute.as_deref(),
                    timestamp: None,
                })
                .await?;
            }
            Channel::CommandResult => {
                self.handle_results(hint, address.encoding, &message.payload)
                    .await?;
            }
            Channel::ConfigurationRequest => {
                self.handle_configuration_request(hint, &message.payload)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_configuration_request(
        &self,
        hint: RoutingHint<'_>,
        payload: &[u8],
    ) -> Result<(), CoreError> {
        let device = self.resolve_device(hint).await?;
        let request: ConfigurationRequest = serde_json::from_slice(payload)
            .map_err(|e| CoreError::malformed(format!("configuration request: {e}")))?;

        match request.kind {
            ConfigurationKind::Configuration => {
                let scope = Scope::new(&device.service, &device.subservice);
                let attributes = self
                    .inner
                    .broker
                    .query(scope, &device.entity_name, &device.entity_type, &request.fields)
                    .await?;
                let values = attributes.into_iter().map(|(k, a)| (k, a.value)).collect();
                self.publish_configuration(&device, hint.transport, values)
                    .await
            }
            ConfigurationKind::Subscription => {
                self.inner
                    .sync
                    .subscribe_configuration(device, request.fields)
                    .await?;
                Ok(())
            }
        }
    }

    /// Publish `{attr: value, ..., "dt": now}` on the device's
    /// configuration channel.
    async fn publish_configuration(
        &self,
        device: &Device,
        transport: TransportKind,
        mut values: Map<String, Value>,
    ) -> Result<(), CoreError> {
        let outbound = match transport {
            TransportKind::Http => None,
            TransportKind::Mqtt | TransportKind::Amqp => self.inner.outbounds.get(transport),
        };
        let Some(outbound) = outbound else {
            return Err(CoreError::Unsupported {
                operation: format!("configuration values over {transport}"),
            });
        };

        let policy = self.inner.config.timestamp_policy(device);
        values.insert(
            "dt".into(),
            Value::String(policy.render(Utc::now().fixed_offset())),
        );

        let api_key = device
            .api_key
            .as_deref()
            .or(self.inner.config.defaults.api_key.as_deref())
            .unwrap_or_default();
        let destination = address::configuration(transport, api_key, &device.id);
        let body = Bytes::from(Value::Object(values).to_string());
        outbound
            .send(&destination, PayloadEncoding::Json, body)
            .await
            .map_err(|e| delivery_failed(&device.id, "configuration", &e))?;
        debug!(device_id = %device.id, to = %destination, "configuration published");
        Ok(())
    }

    // ── Northbound ──────────────────────────────────────────────────

    /// Dispatch the command attributes of a context-provider update.
    ///
    /// Returns the number of commands accepted. Every command is attempted;
    /// the first failure is returned after the rest ran.
    pub async fn handle_command_update(
        &self,
        scope: Scope<'_>,
        entities: Vec<Entity>,
    ) -> Result<usize, CoreError> {
        let mut dispatched = 0;
        let mut first_error = None;

        for entity in entities {
            let Some(device) = self
                .inner
                .registry
                .find_device_by_entity(scope.service, scope.subservice, &entity.id)
                .await?
            else {
                return Err(CoreError::UnknownEntity {
                    entity_id: entity.id,
                });
            };

            for (name, attr) in entity.attributes {
                if device.command(&name).is_none() {
                    if device.lazy.iter().any(|a| a.name == name) {
                        debug!(
                            device_id = %device.id,
                            attribute = %name,
                            "ignoring lazy attribute write"
                        );
                        continue;
                    }
                    first_error.get_or_insert(CoreError::UnknownCommand {
                        device_id: device.id.clone(),
                        command: name,
                    });
                    continue;
                }
                match self.inner.dispatcher.dispatch(&device, &name, attr.value).await {
                    Ok(_) => dispatched += 1,
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }

    /// React to a broker notification for one of our subscriptions.
    ///
    /// Bidirectional attributes become commands; configuration
    /// subscriptions are forwarded on the configuration channel.
    pub async fn handle_notification(
        &self,
        notification: Notification,
    ) -> Result<usize, CoreError> {
        let Some((key, kind)) = self.inner.sync.lookup(&notification.subscription_id) else {
            warn!(
                subscription = %notification.subscription_id,
                "notification for unknown subscription"
            );
            return Ok(0);
        };
        let Some(device) = self
            .inner
            .registry
            .find_device(&key.service, &key.subservice, &key.device_id)
            .await?
        else {
            warn!(device = %key, "notification for a removed device");
            return Ok(0);
        };

        match kind {
            SubscriptionKind::Bidirectional => {
                Ok(self.reverse_commands(&device, notification.data).await)
            }
            SubscriptionKind::Configuration => {
                let transport = device
                    .transport
                    .unwrap_or(self.inner.config.defaults.transport);
                let mut published = 0;
                for entity in notification.data {
                    let values = entity
                        .attributes
                        .into_iter()
                        .map(|(k, a)| (k, a.value))
                        .collect();
                    self.publish_configuration(&device, transport, values)
                        .await?;
                    published += 1;
                }
                Ok(published)
            }
        }
    }

    async fn reverse_commands(&self, device: &Device, data: Vec<Entity>) -> usize {
        let mut dispatched = 0;
        for entity in data {
            for (mapping, command) in device.bidirectional() {
                let Some(attr) = entity.attributes.get(&mapping.name) else {
                    continue;
                };
                match self
                    .inner
                    .dispatcher
                    .dispatch(device, command, attr.value.clone())
                    .await
                {
                    Ok(CommandState::Queued) => {
                        debug!(device_id = %device.id, command, "reverse command queued");
                        dispatched += 1;
                    }
                    Ok(_) => dispatched += 1,
                    Err(e) => {
                        warn!(device_id = %device.id, command, error = %e, "reverse command failed");
                    }
                }
            }
        }
        dispatched
    }

    /// Expire stale commands now.
    pub async fn sweep_expired(&self) -> usize {
        self.inner
            .dispatcher
            .expire(self.inner.config.expiry(), Utc::now())
            .await
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn bind(addr: std::net::SocketAddr, name: &str) -> Result<TcpListener, CoreError> {
    TcpListener::bind(addr).await.map_err(|e| CoreError::Config {
        message: format!("cannot bind {name} listener on {addr}: {e}"),
    })
}

/// Periodically expire commands nobody collected or answered.
async fn expiration_task(agent: Agent) {
    let mut interval = tokio::time::interval(agent.inner.config.expiration_sweep);
    interval.tick().await; // consume the immediate first tick
    let cancel = agent.inner.listeners.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let expired = agent.sweep_expired().await;
                if expired > 0 {
                    debug!(expired, "expiration sweep");
                }
            }
        }
    }
}
