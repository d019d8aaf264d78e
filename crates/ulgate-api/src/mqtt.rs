//! MQTT connection supervisor with auto-reconnect.
//!
//! Owns the `rumqttc` client lifecycle: connects, subscribes the configured
//! topic filters on every `ConnAck`, forwards inbound publications through
//! an `mpsc` channel, and reconnects with exponential backoff + jitter.
//! Publishing goes through [`MqttHandle::publish`], which fails fast with
//! [`Error::NotConnected`] while the broker is unreachable.
//!
//! # Example
//!
//! ```rust,ignore
//! use ulgate_api::mqtt::{MqttConfig, MqttHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let (handle, mut inbound) = MqttHandle::connect(MqttConfig::default(), cancel.clone());
//!
//! while let Some(msg) = inbound.recv().await {
//!     println!("{}: {} bytes", msg.topic, msg.payload.len());
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::reconnect::{ReconnectConfig, calculate_backoff};

const INBOUND_CHANNEL_CAPACITY: usize = 1024;
const REQUEST_CHANNEL_CAPACITY: usize = 100;

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Client id prefix; a short random suffix keeps concurrent gateways apart.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
    pub qos: u8,
    /// Topic filters subscribed after every (re)connection.
    pub subscriptions: Vec<String>,
    pub reconnect: ReconnectConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "ulgate".into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            qos: 1,
            subscriptions: Vec::new(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl MqttConfig {
    fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    fn options(&self) -> MqttOptions {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let client_id = format!("{}-{}", self.client_id, &suffix[..8]);

        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(ref username) = self.username {
            let password = self
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned())
                .unwrap_or_default();
            options.set_credentials(username.clone(), password);
        }
        options
    }
}

// ── InboundMessage ───────────────────────────────────────────────────

/// A publication received on one of the subscribed topic filters.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

// ── MqttHandle ───────────────────────────────────────────────────────

/// Handle to a supervised MQTT connection.
///
/// Cheaply cloneable; all clones publish through the same live client.
#[derive(Clone)]
pub struct MqttHandle {
    client: Arc<ArcSwapOption<AsyncClient>>,
    qos: QoS,
    cancel: CancellationToken,
}

impl MqttHandle {
    /// Spawn the supervisor loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously; publications
    /// before the first `ConnAck` fail with [`Error::NotConnected`].
    pub fn connect(
        config: MqttConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let client = Arc::new(ArcSwapOption::from(None));

        let handle = Self {
            client: Arc::clone(&client),
            qos: config.qos(),
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            supervise(config, client, inbound_tx, cancel).await;
        });

        (handle, inbound_rx)
    }

    /// Whether a broker session is currently established.
    pub fn is_connected(&self) -> bool {
        self.client.load().is_some()
    }

    /// Hand a publication to the client. Resolves once the request is queued
    /// on the live session.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Error> {
        let guard = self.client.load_full();
        let client = guard.ok_or(Error::NotConnected { transport: "MQTT" })?;
        debug!(topic, bytes = payload.len(), "MQTT publish");
        client
            .publish(topic, self.qos, false, payload.to_vec())
            .await?;
        Ok(())
    }

    /// Signal the supervisor to disconnect and stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Supervisor loop ──────────────────────────────────────────────────

async fn supervise(
    config: MqttConfig,
    shared: Arc<ArcSwapOption<AsyncClient>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let (client, event_loop) = AsyncClient::new(config.options(), REQUEST_CHANNEL_CAPACITY);
        info!(host = %config.host, port = config.port, attempt, "connecting to MQTT broker");

        let result = run_event_loop(&config, client, event_loop, &shared, &inbound_tx, &cancel).await;
        shared.store(None);

        match result {
            Ok(true) => {
                // Session was up; start the backoff sequence over.
                attempt = 0;
            }
            Ok(false) => break,
            Err(e) => warn!(error = %e, attempt, "MQTT connection error"),
        }

        if config.reconnect.exhausted(attempt) {
            tracing::error!(
                max_retries = ?config.reconnect.max_retries,
                "MQTT reconnection limit reached, giving up"
            );
            break;
        }

        let delay = calculate_backoff(attempt, &config.reconnect);
        info!(delay_ms = delay.as_millis(), attempt, "waiting before MQTT reconnect");
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }

    debug!("MQTT supervisor exiting");
}

/// Poll one session until it drops.
///
/// Returns `Ok(true)` when the session had been established and then closed,
/// `Ok(false)` on cancellation.
async fn run_event_loop(
    config: &MqttConfig,
    client: AsyncClient,
    mut event_loop: EventLoop,
    shared: &ArcSwapOption<AsyncClient>,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    cancel: &CancellationToken,
) -> Result<bool, Error> {
    let mut seen_active = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("MQTT event loop cancelled, disconnecting");
                let _ = client.disconnect().await;
                return Ok(false);
            }
            polled = event_loop.poll() => {
                match polled {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connection established");
                        seen_active = true;
                        for filter in &config.subscriptions {
                            client.subscribe(filter.as_str(), config.qos()).await?;
                            debug!(filter = %filter, "subscribed");
                        }
                        shared.store(Some(Arc::new(client.clone())));
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.clone(),
                        };
                        if inbound_tx.send(msg).await.is_err() {
                            debug!("inbound receiver dropped, stopping MQTT loop");
                            return Ok(false);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!("MQTT broker sent disconnect");
                        return Ok(seen_active);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if seen_active {
                            warn!(error = %e, "MQTT session lost");
                            return Ok(true);
                        }
                        return Err(Error::Mqtt(e.to_string()));
                    }
                }
            }
        }
    }
}
