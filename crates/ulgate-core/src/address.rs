// ── MQTT topic and AMQP routing-key addressing ──
//
// Both transports share one layout; only the separator differs:
//
//   [/][ul|json/]{apikey}/{deviceId}/attrs[/{attr}]
//   [/][ul|json/]{apikey}/{deviceId}/cmdexe
//   [/][ul|json/]{apikey}/{deviceId}/configuration/commands
//
// AMQP keys use '.' (`.1234.dev1.attrs`).

use crate::error::CoreError;
use crate::model::{PayloadEncoding, TransportKind};

/// What an inbound message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Measurements; `attribute` is set for single-attribute topics.
    Measures { attribute: Option<String> },
    CommandResult,
    ConfigurationRequest,
}

/// Routing hint extracted from a topic or routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub api_key: String,
    pub device_id: String,
    /// Encoding override from a `/ul/` or `/json/` prefix.
    pub encoding: Option<PayloadEncoding>,
    pub channel: Channel,
}

fn separator(transport: TransportKind) -> char {
    match transport {
        TransportKind::Amqp => '.',
        TransportKind::Mqtt | TransportKind::Http => '/',
    }
}

/// Parse an inbound MQTT topic or AMQP routing key.
///
/// A leading `ul` or `json` segment is an encoding prefix only when the
/// segments after it still form a complete address; otherwise it is read as
/// the API key.
pub fn parse(transport: TransportKind, raw: &str) -> Result<Address, CoreError> {
    let sep = separator(transport);
    let trimmed = raw.strip_prefix(sep).unwrap_or(raw);
    let segments: Vec<&str> = trimmed.split(sep).collect();

    let encoding = match segments.first().copied() {
        Some("ul") => Some(PayloadEncoding::UltraLight),
        Some("json") => Some(PayloadEncoding::Json),
        _ => None,
    };
    if let Some(encoding) = encoding {
        if let Ok(mut addr) = route(raw, &segments[1..]) {
            addr.encoding = Some(encoding);
            return Ok(addr);
        }
    }
    route(raw, &segments)
}

fn route(raw: &str, segments: &[&str]) -> Result<Address, CoreError> {
    let [api_key, device_id, rest @ ..] = segments else {
        return Err(CoreError::malformed(format!("address {raw:?} is too short")));
    };
    if api_key.is_empty() || device_id.is_empty() {
        return Err(CoreError::malformed(format!(
            "address {raw:?} has an empty API key or device id"
        )));
    }

    let channel = match rest {
        ["attrs"] => Channel::Measures { attribute: None },
        ["attrs", attr] if !attr.is_empty() => Channel::Measures {
            attribute: Some((*attr).to_owned()),
        },
        ["cmdexe"] => Channel::CommandResult,
        ["configuration", "commands"] => Channel::ConfigurationRequest,
        _ => {
            return Err(CoreError::malformed(format!(
                "address {raw:?} does not name a known channel"
            )));
        }
    };

    Ok(Address {
        api_key: (*api_key).to_owned(),
        device_id: (*device_id).to_owned(),
        encoding: None,
        channel,
    })
}

/// Outbound command address.
pub fn command(transport: TransportKind, api_key: &str, device_id: &str) -> String {
    let s = separator(transport);
    format!("{s}{api_key}{s}{device_id}{s}cmd")
}

/// Outbound configuration values address.
pub fn configuration(transport: TransportKind, api_key: &str, device_id: &str) -> String {
    let s = separator(transport);
    format!("{s}{api_key}{s}{device_id}{s}configuration{s}values")
}

/// MQTT topic filters covering every inbound channel, with and without the
/// leading slash and encoding prefixes.
pub fn mqtt_subscriptions() -> Vec<String> {
    const SUFFIXES: &[&str] = &["attrs", "attrs/+", "cmdexe", "configuration/commands"];
    let mut filters = Vec::new();
    for lead in ["/", ""] {
        for prefix in ["", "ul/", "json/"] {
            for suffix in SUFFIXES {
                filters.push(format!("{lead}{prefix}+/+/{suffix}"));
            }
        }
    }
    filters
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mqtt_measure_topics() {
        let addr = parse(TransportKind::Mqtt, "/1234/dev1/attrs").unwrap();
        assert_eq!(addr.api_key, "1234");
        assert_eq!(addr.device_id, "dev1");
        assert_eq!(addr.channel, Channel::Measures { attribute: None });
        assert_eq!(addr.encoding, None);

        let addr = parse(TransportKind::Mqtt, "1234/dev1/attrs/temperature").unwrap();
        assert_eq!(
            addr.channel,
            Channel::Measures {
                attribute: Some("temperature".into())
            }
        );
    }

    #[test]
    fn encoding_prefix_overrides() {
        let addr = parse(TransportKind::Mqtt, "/json/1234/dev1/cmdexe").unwrap();
        assert_eq!(addr.encoding, Some(PayloadEncoding::Json));
        assert_eq!(addr.channel, Channel::CommandResult);
    }

    #[test]
    fn api_key_named_like_an_encoding() {
        let addr = parse(TransportKind::Mqtt, "/ul/dev1/attrs").unwrap();
        assert_eq!(addr.api_key, "ul");
        assert_eq!(addr.device_id, "dev1");
        assert_eq!(addr.encoding, None);
        assert_eq!(addr.channel, Channel::Measures { attribute: None });

        let addr = parse(TransportKind::Amqp, "json.dev1.attrs.temperature").unwrap();
        assert_eq!(addr.api_key, "json");
        assert_eq!(addr.device_id, "dev1");
        assert_eq!(
            addr.channel,
            Channel::Measures {
                attribute: Some("temperature".into())
            }
        );

        let addr = parse(TransportKind::Mqtt, "/ul/1234/dev1/attrs").unwrap();
        assert_eq!(addr.api_key, "1234");
        assert_eq!(addr.device_id, "dev1");
        assert_eq!(addr.encoding, Some(PayloadEncoding::UltraLight));

        let addr = parse(TransportKind::Mqtt, "/ul/ul/dev1/cmdexe").unwrap();
        assert_eq!(addr.api_key, "ul");
        assert_eq!(addr.encoding, Some(PayloadEncoding::UltraLight));
    }

    #[test]
    fn amqp_routing_keys() {
        let addr = parse(TransportKind::Amqp, ".1234.MQTT_2.configuration.commands").unwrap();
        assert_eq!(addr.device_id, "MQTT_2");
        assert_eq!(addr.channel, Channel::ConfigurationRequest);
        assert_eq!(command(TransportKind::Amqp, "1234", "dev1"), ".1234.dev1.cmd");
        assert_eq!(
            configuration(TransportKind::Amqp, "1234", "dev1"),
            ".1234.dev1.configuration.values"
        );
    }

    #[test]
    fn rejects_unknown_channels() {
        assert!(parse(TransportKind::Mqtt, "/1234/dev1/cmd").is_err());
        assert!(parse(TransportKind::Mqtt, "/1234").is_err());
        assert!(parse(TransportKind::Mqtt, "//dev1/attrs").is_err());
    }

    #[test]
    fn outbound_topics() {
        assert_eq!(command(TransportKind::Mqtt, "1234", "MQTT_2"), "/1234/MQTT_2/cmd");
        assert_eq!(
            configuration(TransportKind::Mqtt, "1234", "MQTT_2"),
            "/1234/MQTT_2/configuration/values"
        );
        let filters = mqtt_subscriptions();
        assert!(filters.contains(&"/+/+/cmdexe".to_owned()));
        assert!(filters.contains(&"json/+/+/attrs/+".to_owned()));
    }
}
