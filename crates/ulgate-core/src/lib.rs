//! Protocol core of the ulgate IoT gateway.
//!
//! Devices speak Ultra Light, JSON or vendor compact payloads over HTTP,
//! MQTT or AMQP; the context broker speaks NGSI-v2. This crate sits in
//! between:
//!
//! - **[`Agent`]**: the facade every listener routes through.
//!   [`Agent::start`] connects transports and binds the HTTP servers,
//!   [`Agent::shutdown`] stops inbound work first and drops broker
//!   connections last.
//!
//! - **[`codec`]**: pure decode/encode functions per [`PayloadEncoding`].
//!
//! - **[`Resolver`]**: routing hint to provisioned device, auto-provisioning
//!   from a [`Group`] on first contact.
//!
//! - **[`MeasurementPipeline`]**: named stages over an ordered attribute map,
//!   one broker update per measurement group.
//!
//! - **[`Dispatcher`]**: per-device command binding (push or poll), the
//!   per-device [`CommandQueue`], result correlation and expiration.
//!
//! - **[`SyncManager`]**: broker subscriptions for bidirectional attributes
//!   and configuration pushes.
//!
//! Storage and the broker are behind the [`Registry`] and [`ContextBroker`]
//! traits; device transports behind [`Outbound`].

pub mod address;
pub mod agent;
pub mod broker;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod model;
pub mod outbound;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod sync;
pub mod timestamp;
pub mod transport;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use agent::{About, Agent, Measurement};
pub use broker::ContextBroker;
pub use command::{Binding, CommandQueue, Dispatcher, Expiry, Outbounds};
pub use config::{AgentConfig, BrokerConfig, Defaults, HttpConfig, NorthConfig};
pub use error::CoreError;
pub use outbound::Outbound;
pub use pipeline::{BatchOutcome, MeasurementPipeline, Stage};
pub use registry::{MemoryRegistry, Registry};
pub use resolver::{Resolution, Resolver, RoutingHint};
pub use sync::SyncManager;
pub use timestamp::TimestampPolicy;

pub use model::{
    AttributeMapping, CommandSpec, CommandState, CommandStatus, DEFAULT_ENTITY_TYPE, Device,
    DeviceKey, Group, PayloadEncoding, PendingCommand, StaticAttribute, SubscriptionKind,
    SubscriptionRecord, TransportKind,
};
