// ── Command lifecycle ──
//
// Commands enter through the northbound API or a bidirectional
// notification, are pushed or queued by the dispatcher, and leave when a
// device result is correlated or the expiration sweeper gives up on them.
// Every transition is mirrored on the entity as `{cmd}_status`/`{cmd}_info`.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::{Binding, Dispatcher, Outbounds};
pub use queue::{CommandQueue, Expiry};
