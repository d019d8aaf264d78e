// ── Domain model ──
//
// Provisioning records (devices and groups), transport/encoding selectors,
// and the command records owned by the command queue.

pub mod command;
pub mod device;
pub mod transport;

pub use command::{CommandState, CommandStatus, PendingCommand};
pub use device::{
    AttributeMapping, CommandSpec, DEFAULT_ENTITY_TYPE, Device, DeviceKey, Group, StaticAttribute,
    SubscriptionKind, SubscriptionRecord,
};
pub use transport::{PayloadEncoding, TransportKind};
