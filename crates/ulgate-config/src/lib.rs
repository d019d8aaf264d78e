//! On-disk configuration for the ulgate gateway.
//!
//! One TOML file, merged over built-in defaults and overridden by
//! `ULGATE_`-prefixed environment variables (`__` separates nesting levels,
//! so `ULGATE_MQTT__ENABLED=true` sets `mqtt.enabled`). The result is
//! translated into a `ulgate_core::AgentConfig` plus the static
//! [`Group`] and [`Device`] records the binary loads into the registry.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ulgate_api::{AmqpConfig, MqttConfig, TlsMode, TransportConfig};
use ulgate_core::{
    AgentConfig, AttributeMapping, BrokerConfig, CommandSpec, DEFAULT_ENTITY_TYPE, Defaults,
    Device, Group, HttpConfig, NorthConfig, PayloadEncoding, StaticAttribute, TransportKind,
};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ULGATE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub north: NorthSection,

    #[serde(default)]
    pub http: HttpSection,

    #[serde(default)]
    pub mqtt: MqttSection,

    #[serde(default)]
    pub amqp: AmqpSection,

    #[serde(default)]
    pub context_broker: BrokerSection,

    /// Statically provisioned groups.
    #[serde(default)]
    pub groups: Vec<GroupEntry>,

    /// Statically provisioned devices.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// Tenancy, routing defaults and measurement behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSection {
    /// Default `fiware-service`.
    pub service: String,
    /// Default `fiware-servicepath`.
    pub subservice: String,
    /// API key accepted without a provisioned group.
    pub default_key: Option<String>,
    /// `HTTP`, `MQTT` or `AMQP`.
    pub default_transport: String,
    pub default_resource: String,
    pub timestamp: bool,
    pub compress_timestamp: bool,
    /// `0` keeps queued commands forever.
    pub polling_expiration_secs: u64,
    /// Age limit for delivered commands without a result when
    /// `polling_expiration_secs` is `0`.
    pub result_timeout_secs: u64,
    /// Commands held per device before the oldest is expired.
    pub max_pending_commands: usize,
    pub expiration_sweep_secs: u64,
    pub shutdown_grace_secs: u64,
    pub compact_formats: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            service: String::new(),
            subservice: "/".into(),
            default_key: None,
            default_transport: "HTTP".into(),
            default_resource: "/iot/d".into(),
            timestamp: false,
            compress_timestamp: false,
            polling_expiration_secs: 0,
            result_timeout_secs: 3600,
            max_pending_commands: 100,
            expiration_sweep_secs: 30,
            shutdown_grace_secs: 5,
            compact_formats: true,
        }
    }
}

/// Broker-facing HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NorthSection {
    pub host: String,
    pub port: u16,
    /// Base URL the context broker uses for subscription callbacks.
    pub public_url: String,
}

impl Default for NorthSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4041,
            public_url: "http://localhost:4041".into(),
        }
    }
}

/// Southbound HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Device endpoint push timeout.
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".into(),
            port: 7896,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    /// Plaintext; prefer `ULGATE_MQTT__PASSWORD`.
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub qos: u8,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".into(),
            port: 1883,
            client_id: "ulgate".into(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            qos: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AmqpSection {
    pub enabled: bool,
    pub uri: String,
    pub exchange: String,
    pub queue: String,
    pub durable: bool,
}

impl Default for AmqpSection {
    fn default() -> Self {
        let defaults = AmqpConfig::default();
        Self {
            enabled: false,
            uri: defaults.uri,
            exchange: defaults.exchange,
            queue: defaults.queue,
            durable: defaults.durable,
        }
    }
}

/// NGSI-v2 context broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerSection {
    pub url: String,
    pub timeout_secs: u64,
    /// Accept self-signed broker certificates.
    pub insecure: bool,
    pub ca_cert: Option<PathBuf>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:1026".into(),
            timeout_secs: 10,
            insecure: false,
            ca_cert: None,
        }
    }
}

/// A `[[groups]]` entry. Service and subservice fall back to `[agent]`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GroupEntry {
    pub api_key: String,
    #[serde(default)]
    pub resource: String,
    pub service: Option<String>,
    pub subservice: Option<String>,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub encoding: PayloadEncoding,
    pub timezone: Option<String>,
    pub timestamp: Option<bool>,
    #[serde(default)]
    pub attributes: Vec<AttributeMapping>,
    #[serde(default)]
    pub lazy: Vec<AttributeMapping>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub static_attributes: Vec<StaticAttribute>,
}

/// A `[[devices]]` entry. The entity is named after the device id unless
/// `entity_name` says otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub id: String,
    pub service: Option<String>,
    pub subservice: Option<String>,
    pub api_key: Option<String>,
    pub entity_name: Option<String>,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub encoding: PayloadEncoding,
    /// Push endpoint; devices without one poll for commands.
    pub endpoint: Option<String>,
    pub timezone: Option<String>,
    pub timestamp: Option<bool>,
    #[serde(default)]
    pub attributes: Vec<AttributeMapping>,
    #[serde(default)]
    pub lazy: Vec<AttributeMapping>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub static_attributes: Vec<StaticAttribute>,
}

fn default_entity_type() -> String {
    DEFAULT_ENTITY_TYPE.into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "ulgate", "ulgate").map_or_else(
        || PathBuf::from("ulgate.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file, then `ULGATE_` environment variables.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the configuration.
///
/// An explicit `path` must exist; the default location may be absent, in
/// which case only defaults and the environment apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) if !p.exists() => return Err(ConfigError::NotFound { path: p.to_owned() }),
        Some(p) => p.to_owned(),
        None => config_path(),
    };
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

// ── Validation & translation ────────────────────────────────────────

impl Config {
    /// Check everything [`Config::agent_config`] would reject, without building it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent_config().map(|_| ())
    }

    /// Translate into the runtime configuration the core consumes.
    pub fn agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let agent = &self.agent;
        let transport = TransportKind::from_str(&agent.default_transport).map_err(|_| {
            ConfigError::invalid(
                "agent.default_transport",
                format!(
                    "expected 'HTTP', 'MQTT' or 'AMQP', got '{}'",
                    agent.default_transport
                ),
            )
        })?;
        if !agent.default_resource.starts_with('/') {
            return Err(ConfigError::invalid(
                "agent.default_resource",
                "must start with '/'",
            ));
        }
        if agent.expiration_sweep_secs == 0 {
            return Err(ConfigError::invalid(
                "agent.expiration_sweep_secs",
                "must be greater than zero",
            ));
        }
        if agent.result_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "agent.result_timeout_secs",
                "must be greater than zero",
            ));
        }
        if agent.max_pending_commands == 0 {
            return Err(ConfigError::invalid(
                "agent.max_pending_commands",
                "must be greater than zero",
            ));
        }

        let north = NorthConfig {
            bind: socket_addr("north", &self.north.host, self.north.port)?,
            public_url: parse_url("north.public_url", &self.north.public_url)?,
        };

        let http = if self.http.enabled {
            Some(HttpConfig {
                bind: socket_addr("http", &self.http.host, self.http.port)?,
                transport: TransportConfig {
                    tls: TlsMode::System,
                    timeout: Duration::from_secs(self.http.timeout_secs),
                },
            })
        } else {
            None
        };

        let mqtt = if self.mqtt.enabled {
            Some(self.mqtt_config()?)
        } else {
            None
        };

        let amqp = if self.amqp.enabled {
            parse_url("amqp.uri", &self.amqp.uri)?;
            Some(AmqpConfig {
                uri: self.amqp.uri.clone(),
                exchange: self.amqp.exchange.clone(),
                queue: self.amqp.queue.clone(),
                durable: self.amqp.durable,
                ..AmqpConfig::default()
            })
        } else {
            None
        };

        let broker = BrokerConfig {
            url: parse_url("context_broker.url", &self.context_broker.url)?,
            transport: TransportConfig {
                tls: self.broker_tls(),
                timeout: Duration::from_secs(self.context_broker.timeout_secs),
            },
        };

        for (i, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("devices[{i}].id"),
                    "must not be empty",
                ));
            }
        }
        for (i, group) in self.groups.iter().enumerate() {
            if group.api_key.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("groups[{i}].api_key"),
                    "must not be empty",
                ));
            }
        }

        Ok(AgentConfig {
            defaults: Defaults {
                service: agent.service.clone(),
                subservice: agent.subservice.clone(),
                api_key: agent.default_key.clone().filter(|k| !k.is_empty()),
                transport,
                resource: agent.default_resource.clone(),
            },
            timestamp: agent.timestamp,
            compress_timestamp: agent.compress_timestamp,
            compact_formats: agent.compact_formats,
            polling_expiration: (agent.polling_expiration_secs > 0)
                .then(|| Duration::from_secs(agent.polling_expiration_secs)),
            result_timeout: Duration::from_secs(agent.result_timeout_secs),
            max_pending_commands: agent.max_pending_commands,
            expiration_sweep: Duration::from_secs(agent.expiration_sweep_secs),
            shutdown_grace: Duration::from_secs(agent.shutdown_grace_secs),
            north,
            http,
            mqtt,
            amqp,
            broker,
        })
    }

    fn mqtt_config(&self) -> Result<MqttConfig, ConfigError> {
        let mqtt = &self.mqtt;
        if mqtt.port == 0 {
            return Err(ConfigError::invalid("mqtt.port", "must not be zero"));
        }
        if mqtt.qos > 2 {
            return Err(ConfigError::invalid(
                "mqtt.qos",
                format!("expected 0, 1 or 2, got {}", mqtt.qos),
            ));
        }
        Ok(MqttConfig {
            host: mqtt.host.clone(),
            port: mqtt.port,
            client_id: mqtt.client_id.clone(),
            username: mqtt.username.clone(),
            password: mqtt.password.clone().map(SecretString::from),
            keep_alive: Duration::from_secs(mqtt.keep_alive_secs),
            qos: mqtt.qos,
            ..MqttConfig::default()
        })
    }

    fn broker_tls(&self) -> TlsMode {
        if self.context_broker.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = self.context_broker.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        }
    }

    /// Static groups, with tenancy filled in from `[agent]`.
    pub fn groups(&self) -> Vec<Group> {
        self.groups
            .iter()
            .map(|entry| {
                let mut group = Group::new(
                    &entry.api_key,
                    entry.service.as_deref().unwrap_or(&self.agent.service),
                    entry
                        .subservice
                        .as_deref()
                        .unwrap_or(&self.agent.subservice),
                    &entry.entity_type,
                );
                group.resource.clone_from(&entry.resource);
                group.transport = entry.transport;
                group.encoding = entry.encoding;
                group.timezone.clone_from(&entry.timezone);
                group.timestamp = entry.timestamp;
                group.attributes.clone_from(&entry.attributes);
                group.lazy.clone_from(&entry.lazy);
                group.commands.clone_from(&entry.commands);
                group.static_attributes.clone_from(&entry.static_attributes);
                group
            })
            .collect()
    }

    /// Static devices, with tenancy filled in from `[agent]`.
    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .iter()
            .map(|entry| {
                let mut device = Device::new(
                    &entry.id,
                    entry.service.as_deref().unwrap_or(&self.agent.service),
                    entry
                        .subservice
                        .as_deref()
                        .unwrap_or(&self.agent.subservice),
                );
                if let Some(ref name) = entry.entity_name {
                    device.entity_name.clone_from(name);
                }
                device.entity_type.clone_from(&entry.entity_type);
                device.api_key.clone_from(&entry.api_key);
                device.transport = entry.transport;
                device.encoding = entry.encoding;
                device.endpoint.clone_from(&entry.endpoint);
                device.timezone.clone_from(&entry.timezone);
                device.timestamp = entry.timestamp;
                device.attributes.clone_from(&entry.attributes);
                device.lazy.clone_from(&entry.lazy);
                device.commands.clone_from(&entry.commands);
                device.static_attributes.clone_from(&entry.static_attributes);
                device
            })
            .collect()
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.mqtt.password.is_some() {
            config.mqtt.password = Some("********".into());
        }
        config
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn socket_addr(section: &str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    if port == 0 {
        return Err(ConfigError::invalid(
            format!("{section}.port"),
            "must not be zero",
        ));
    }
    let ip: IpAddr = host.parse().map_err(|_| {
        ConfigError::invalid(
            format!("{section}.host"),
            format!("expected an IP address, got '{host}'"),
        )
    })?;
    Ok(SocketAddr::new(ip, port))
}

/// Validate `raw` as a URL, returning it as written.
fn parse_url(field: &str, raw: &str) -> Result<String, ConfigError> {
    url::Url::parse(raw)
        .map(|_| raw.to_owned())
        .map_err(|e| ConfigError::invalid(field, format!("invalid URL '{raw}': {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_translate_to_http_only_agent() {
        let config = Config::default().agent_config().unwrap();
        assert!(config.http.is_some());
        assert!(config.mqtt.is_none());
        assert!(config.amqp.is_none());
        assert_eq!(config.defaults.transport, TransportKind::Http);
        assert_eq!(config.polling_expiration, None);
        assert_eq!(config.result_timeout, Duration::from_secs(3600));
        assert_eq!(config.max_pending_commands, 100);
        assert_eq!(config.north.bind.port(), 4041);
    }

    #[test]
    fn command_limits_must_be_positive() {
        let mut config = Config::default();
        config.agent.result_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("agent.result_timeout_secs"), "{err}");

        let mut config = Config::default();
        config.agent.max_pending_commands = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("agent.max_pending_commands"), "{err}");
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = Config::default();
        config.http.port = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http.port"), "{err}");
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let mut config = Config::default();
        config.agent.default_transport = "COAP".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_transport"), "{err}");
    }

    #[test]
    fn transport_name_is_case_insensitive() {
        let mut config = Config::default();
        config.agent.default_transport = "mqtt".into();
        let agent = config.agent_config().unwrap();
        assert_eq!(agent.defaults.transport, TransportKind::Mqtt);
    }

    #[test]
    fn redaction_masks_password() {
        let mut config = Config::default();
        config.mqtt.password = Some("hunter2".into());
        let shown = config.redacted().to_toml().unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("********"));
    }

    #[test]
    fn insecure_broker_wins_over_ca() {
        let mut config = Config::default();
        config.context_broker.insecure = true;
        config.context_broker.ca_cert = Some("/etc/ca.pem".into());
        assert!(matches!(config.broker_tls(), TlsMode::DangerAcceptInvalid));
    }
}
