// ulgate-api: Async network clients for the ulgate IoT gateway
// (NGSI-v2 context broker, device HTTP push, MQTT, AMQP)

pub mod amqp;
pub mod context;
pub mod device;
pub mod error;
pub mod mqtt;
pub mod reconnect;
pub mod transport;

pub use amqp::{AmqpConfig, AmqpHandle};
pub use context::{ContextClient, Scope};
pub use device::DeviceClient;
pub use error::Error;
pub use mqtt::{InboundMessage, MqttConfig, MqttHandle};
pub use reconnect::ReconnectConfig;
pub use transport::{TlsMode, TransportConfig};
