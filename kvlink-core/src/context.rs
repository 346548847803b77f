//! Shared bridge state
//!
//! A [`BridgeContext`] is built once per process and handed to the lifecycle
//! manager and the router. It owns the registry, both connection pools and the
//! watch relays.

use std::sync::Arc;

use crate::backend::KvBackend;
use crate::delivery::EventSink;
use crate::identity::{DEFAULT_CALLER_HEADER, LinkDirection};
use crate::link::LinkDefaults;
use crate::pool::ConnectionPool;
use crate::registry::LinkRegistry;
use crate::relay::WatchRelay;

/// Constant health check response.
pub const DEFAULT_HEALTH_MESSAGE: &str = "provider healthy";

/// Registry, pools and relays of one bridge.
pub struct BridgeContext {
    registry: LinkRegistry,
    inbound: ConnectionPool,
    watch: ConnectionPool,
    relays: WatchRelay,
    link_defaults: LinkDefaults,
    caller_header: String,
    health_message: String,
}

impl BridgeContext {
    /// Start building a context
    pub fn builder(backend: Arc<dyn KvBackend>, sink: Arc<dyn EventSink>) -> BridgeContextBuilder {
        BridgeContextBuilder::new(backend, sink)
    }

    /// Context with default settings
    pub fn new(backend: Arc<dyn KvBackend>, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Self::builder(backend, sink).build()
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    /// Pool of connections used by callers
    pub fn inbound_pool(&self) -> &ConnectionPool {
        &self.inbound
    }

    /// Pool of connections feeding the relays
    pub fn watch_pool(&self) -> &ConnectionPool {
        &self.watch
    }

    /// Pool serving links of `direction`
    pub fn pool(&self, direction: LinkDirection) -> &ConnectionPool {
        match direction {
            LinkDirection::Inbound => &self.inbound,
            LinkDirection::Outbound => &self.watch,
        }
    }

    pub fn relays(&self) -> &WatchRelay {
        &self.relays
    }

    pub fn link_defaults(&self) -> &LinkDefaults {
        &self.link_defaults
    }

    /// Metadata header carrying the verified caller
    pub fn caller_header(&self) -> &str {
        &self.caller_header
    }

    pub fn health_message(&self) -> &str {
        &self.health_message
    }
}

/// Builder for [`BridgeContext`].
pub struct BridgeContextBuilder {
    backend: Arc<dyn KvBackend>,
    sink: Arc<dyn EventSink>,
    link_defaults: LinkDefaults,
    caller_header: String,
    health_message: String,
}

impl BridgeContextBuilder {
    fn new(backend: Arc<dyn KvBackend>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            sink,
            link_defaults: LinkDefaults::default(),
            caller_header: DEFAULT_CALLER_HEADER.to_string(),
            health_message: DEFAULT_HEALTH_MESSAGE.to_string(),
        }
    }

    /// Set the fallbacks used while parsing link options
    pub fn link_defaults(mut self, defaults: LinkDefaults) -> Self {
        self.link_defaults = defaults;
        self
    }

    /// Set the metadata header carrying the verified caller
    pub fn caller_header(mut self, header: impl Into<String>) -> Self {
        self.caller_header = header.into();
        self
    }

    /// Set the health check response
    pub fn health_message(mut self, message: impl Into<String>) -> Self {
        self.health_message = message.into();
        self
    }

    pub fn build(self) -> Arc<BridgeContext> {
        Arc::new(BridgeContext {
            registry: LinkRegistry::new(),
            inbound: ConnectionPool::new("inbound", Arc::clone(&self.backend)),
            watch: ConnectionPool::new("watch", self.backend),
            relays: WatchRelay::new(self.sink),
            link_defaults: self.link_defaults,
            caller_header: self.caller_header,
            health_message: self.health_message,
        })
    }
}
