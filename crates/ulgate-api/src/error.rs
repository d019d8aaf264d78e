use thiserror::Error;

/// Top-level error type for the `ulgate-api` crate.
///
/// Covers every failure mode across the network surfaces the gateway
/// talks to: the context broker, device HTTP endpoints, the MQTT broker,
/// and the AMQP broker. `ulgate-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Context broker ──────────────────────────────────────────────
    /// Non-success response from the context broker.
    #[error("Context broker error (HTTP {status}): {message}")]
    Broker {
        status: u16,
        message: String,
        /// NGSI error name, e.g. `"BadRequest"` or `"NotFound"`.
        code: Option<String>,
    },

    /// Subscription created but the broker did not return its id.
    #[error("Context broker did not return a subscription id")]
    MissingSubscriptionId,

    // ── Device endpoints ────────────────────────────────────────────
    /// The device endpoint answered a command push with a non-2xx status.
    #[error("Device endpoint {url} answered HTTP {status}")]
    DeviceRejected { url: String, status: u16 },

    // ── Messaging ───────────────────────────────────────────────────
    /// MQTT client request failed (queue closed, invalid topic, ...).
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// AMQP channel or connection failure.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The AMQP broker nacked a published message.
    #[error("AMQP broker rejected the message for {routing_key}")]
    PublishRejected { routing_key: String },

    /// The AMQP channel was not in confirm mode when the message was published.
    #[error("AMQP publish to {routing_key} was not confirmed")]
    PublishUnconfirmed { routing_key: String },

    /// The messaging connection is not established yet (or was lost).
    #[error("{transport} connection is not available")]
    NotConnected { transport: &'static str },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::NotConnected { .. } => true,
            Self::Broker { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Broker { status: 404, .. } => true,
            _ => false,
        }
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Mqtt(err.to_string())
    }
}
