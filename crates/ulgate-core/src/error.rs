// ── Core error types ──
//
// Every failure is scoped to the single message or command being processed;
// listeners log and drop, HTTP handlers map to a status code. The
// `From<ulgate_api::Error>` impl folds transport failures into
// `BackendUnavailable`; command pushes map theirs to `DeliveryFailed`.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Device-facing errors ─────────────────────────────────────────
    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("Unknown device {device_id} for API key {api_key}")]
    UnknownDevice { api_key: String, device_id: String },

    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    // ── Backend errors ───────────────────────────────────────────────
    #[error("Context broker unavailable: {message}")]
    BackendUnavailable {
        message: String,
        /// HTTP status returned by the broker, if it answered at all.
        status: Option<u16>,
    },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Command {command} could not be delivered to {device_id}: {reason}")]
    DeliveryFailed {
        device_id: String,
        command: String,
        reason: String,
    },

    #[error("No pending command {command} for device {device_id}")]
    CorrelationMiss { device_id: String, command: String },

    #[error("Device {device_id} declares no command {command}")]
    UnknownCommand { device_id: String, command: String },

    #[error("No device provisioned for entity {entity_id}")]
    UnknownEntity { entity_id: String },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    /// HTTP status used when the error surfaces on a synchronous transport.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MalformedPayload { .. }
            | Self::UnknownDevice { .. }
            | Self::InvalidTimestamp { .. } => 400,
            Self::UnknownEntity { .. }
            | Self::UnknownCommand { .. }
            | Self::CorrelationMiss { .. } => 404,
            Self::Unsupported { .. } => 501,
            Self::DeliveryFailed { .. } => 502,
            Self::BackendUnavailable { .. } | Self::Config { .. } | Self::Internal(_) => 500,
        }
    }

    /// Short machine-readable name for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            Self::UnknownDevice { .. } => "DEVICE_NOT_FOUND",
            Self::InvalidTimestamp { .. } => "BAD_TIMESTAMP",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
            Self::CorrelationMiss { .. } => "COMMAND_NOT_FOUND",
            Self::UnknownCommand { .. } => "COMMAND_NOT_DECLARED",
            Self::UnknownEntity { .. } => "ENTITY_NOT_FOUND",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::Config { .. } => "CONFIGURATION",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ulgate_api::Error> for CoreError {
    fn from(err: ulgate_api::Error) -> Self {
        match err {
            ulgate_api::Error::Broker { status, message, .. } => CoreError::BackendUnavailable {
                message,
                status: Some(status),
            },
            ulgate_api::Error::Transport(ref e) => CoreError::BackendUnavailable {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            ulgate_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            ulgate_api::Error::Tls(message) => CoreError::Config { message },
            other => CoreError::BackendUnavailable {
                message: other.to_string(),
                status: None,
            },
        }
    }
}
