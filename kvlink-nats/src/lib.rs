//! # kvlink NATS
//!
//! NATS JetStream implementations of the kvlink backend and delivery seams.
//!
//! - [`NatsBackend`] opens one client per tenant, named after the tenant, and
//!   binds it to the JetStream key-value bucket named in the link. Clients
//!   reconnect every second for up to ten minutes.
//! - [`NatsEventSink`] forwards change events to watching components as NATS
//!   requests and waits for their reply.
//!
//! ## Example
//!
//! ```rust,ignore
//! use kvlink_core::*;
//! use kvlink_nats::{NatsBackend, NatsEventSink};
//! use std::sync::Arc;
//!
//! let sink = NatsEventSink::connect("nats://127.0.0.1:4222", "kvlink").await?;
//! let ctx = BridgeContext::new(Arc::new(NatsBackend::new()), Arc::new(sink));
//! let lifecycle = LifecycleManager::new(ctx);
//! ```

pub mod connection;
pub mod delivery;
pub mod error;

pub use connection::{
    DEFAULT_MAX_RECONNECTS, DEFAULT_RECONNECT_DELAY, NatsBackend, NatsKvConnection,
};
pub use delivery::{
    DEFAULT_DELIVERY_TIMEOUT, DEFAULT_SUBJECT_PREFIX, NatsEventSink, WATCH_ALL_OPERATION,
    watch_subject,
};
pub use error::NatsError;
