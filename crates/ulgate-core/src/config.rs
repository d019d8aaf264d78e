// ── Runtime agent configuration ──
//
// These types describe how the gateway behaves and where it listens.
// They never touch disk: `ulgate-config` (or a test) builds an
// `AgentConfig` and hands it in.

use std::net::SocketAddr;
use std::time::Duration;

use ulgate_api::{AmqpConfig, MqttConfig, TransportConfig};

use crate::command::Expiry;
use crate::model::{Device, TransportKind};
use crate::timestamp::{TimestampPolicy, parse_offset};

/// Tenancy and routing defaults.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub service: String,
    pub subservice: String,
    /// API key accepted without a provisioned group.
    pub api_key: Option<String>,
    pub transport: TransportKind,
    /// HTTP resource path devices post measurements to.
    pub resource: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            service: String::new(),
            subservice: "/".into(),
            api_key: None,
            transport: TransportKind::Http,
            resource: "/iot/d".into(),
        }
    }
}

/// Southbound HTTP listener.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    /// Outbound client settings for device endpoint pushes.
    pub transport: TransportConfig,
}

/// Northbound (broker-facing) HTTP listener.
#[derive(Debug, Clone)]
pub struct NorthConfig {
    pub bind: SocketAddr,
    /// Base URL the broker uses to reach this gateway.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub transport: TransportConfig,
}

/// Full runtime configuration for an [`Agent`](crate::Agent).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub defaults: Defaults,
    /// Attach a receipt timestamp to every measurement.
    pub timestamp: bool,
    pub compress_timestamp: bool,
    /// Expand attributes named after a vendor compact format for every
    /// encoding, keeping values that do not parse.
    pub compact_formats: bool,
    /// Queued and delivered commands older than this are expired; `None`
    /// keeps queued commands until polled.
    pub polling_expiration: Option<Duration>,
    /// Age at which a delivered command still lacking a result expires
    /// when `polling_expiration` is unset.
    pub result_timeout: Duration,
    /// Commands held per device; the oldest is expired to make room.
    pub max_pending_commands: usize,
    pub expiration_sweep: Duration,
    pub shutdown_grace: Duration,
    pub north: NorthConfig,
    pub http: Option<HttpConfig>,
    pub mqtt: Option<MqttConfig>,
    pub amqp: Option<AmqpConfig>,
    pub broker: BrokerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            timestamp: false,
            compress_timestamp: false,
            compact_formats: true,
            polling_expiration: None,
            result_timeout: Duration::from_secs(3600),
            max_pending_commands: crate::command::queue::DEFAULT_CAPACITY,
            expiration_sweep: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            north: NorthConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], 4041)),
                public_url: "http://localhost:4041".into(),
            },
            http: Some(HttpConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], 7896)),
                transport: TransportConfig::default(),
            }),
            mqtt: None,
            amqp: None,
            broker: BrokerConfig {
                url: "http://localhost:1026".into(),
                transport: TransportConfig::default(),
            },
        }
    }
}

impl AgentConfig {
    /// Timestamp settings for one device, threaded through a single request.
    pub fn timestamp_policy(&self, device: &Device) -> TimestampPolicy {
        let offset = match device.timezone.as_deref().map(parse_offset) {
            Some(Ok(offset)) => offset,
            Some(Err(e)) => {
                tracing::warn!(device_id = %device.id, error = %e, "ignoring device timezone");
                TimestampPolicy::default().offset
            }
            None => TimestampPolicy::default().offset,
        };
        TimestampPolicy {
            enabled: device.timestamp.unwrap_or(self.timestamp),
            compress: self.compress_timestamp,
            offset,
        }
    }

    /// Age limits for the command expiration sweep.
    pub fn expiry(&self) -> Expiry {
        Expiry {
            queued: self.polling_expiration,
            awaiting_result: self.polling_expiration.unwrap_or(self.result_timeout),
        }
    }

    /// Subscription callback for broker notifications.
    pub fn notify_url(&self) -> String {
        format!("{}/notify", self.north.public_url.trim_end_matches('/'))
    }
}
