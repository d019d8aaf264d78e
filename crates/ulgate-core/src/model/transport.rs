// ── Transport and payload encoding selectors ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Wire transport a device talks over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum TransportKind {
    Http,
    Mqtt,
    Amqp,
}

/// Device payload encoding.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum PayloadEncoding {
    /// `name|value#name|value` text.
    #[default]
    #[serde(rename = "ul", alias = "ultralight")]
    #[strum(to_string = "ul", serialize = "ultralight")]
    UltraLight,
    #[strum(to_string = "json")]
    Json,
    /// Ultra Light framing whose attribute values use vendor compact formats.
    #[strum(to_string = "compact")]
    Compact,
}

impl PayloadEncoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::UltraLight | Self::Compact => "text/plain",
        }
    }
}
