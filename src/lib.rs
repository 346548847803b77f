// kvlink - a multi-tenant key-value bridge
//
// Linked components call a generic key-value capability; each call is routed
// to a backend connection scoped to the caller's own link. Components that
// watch a bucket get its change feed relayed to them.

// Re-export the engine
pub use kvlink_core::*;

// Re-export optional crates
#[cfg(feature = "nats")]
pub use kvlink_nats;

#[cfg(feature = "config")]
pub use kvlink_config;

pub mod links;
pub mod sink;
pub mod telemetry;

pub use links::{LinksError, StaticLink, load_links, parse_links};
pub use sink::LogSink;
