// NGSI-v2 context broker client.
//
// Base path: /v2/
// Tenancy: `fiware-service` / `fiware-servicepath` headers on every call.

mod client;
pub mod types;

pub use client::{ContextClient, Scope};
