//! # kvlink core
//!
//! Link-scoped connection pooling and capability routing for a multi-tenant
//! key-value bridge.
//!
//! Each component linked to the bridge gets its own backend connection, scoped
//! to the bucket named in its link. Calls are authorized against the set of
//! current links on every call; components that asked to watch a bucket get
//! its change feed relayed to them by a background task.
//!
//! ## Components
//!
//! - [`LinkRegistry`] - which identities are linked, per role
//! - [`ConnectionPool`] - one backend connection per linked identity
//! - [`CapabilityRouter`] - authorizes and routes get/put/create/delete/purge/list
//! - [`WatchRelay`] - per-identity change feed relays
//! - [`LifecycleManager`] - applies host notifications in order
//!
//! ## Example
//!
//! ```rust
//! use kvlink_core::memory::{MemoryBackend, RecordingSink};
//! use kvlink_core::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> BridgeResult<()> {
//! let ctx = BridgeContext::builder(
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(RecordingSink::new()),
//! )
//! .build();
//! let lifecycle = LifecycleManager::new(Arc::clone(&ctx));
//! let router = CapabilityRouter::new(ctx);
//!
//! lifecycle
//!     .link_put(LinkDefinition::inbound("svc-1", "kvlink").with_option("bucket", "stuff"))
//!     .await?;
//!
//! let caller = TenantIdentity::new("svc-1");
//! router.put(&caller, "greeting", b"hello".to_vec()).await?;
//! assert_eq!(router.get(&caller, "greeting").await?.value, b"hello");
//!
//! lifecycle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod context;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod link;
pub mod memory;
pub mod pool;
pub mod registry;
pub mod relay;
pub mod router;

pub use backend::{
    ChangeEvent, ChangeStream, KeyStream, KeyValueEntry, KvBackend, KvConnection, Operation,
};
pub use context::{BridgeContext, BridgeContextBuilder, DEFAULT_HEALTH_MESSAGE};
pub use delivery::EventSink;
pub use error::{BackendError, BackendResult, BridgeError, BridgeResult};
pub use identity::{DEFAULT_CALLER_HEADER, LinkDirection, TenantIdentity};
pub use lifecycle::{HostNotification, LifecycleManager};
pub use link::{Credentials, LinkConfig, LinkDefaults, LinkDefinition};
pub use pool::ConnectionPool;
pub use registry::{LinkRegistry, LinkRegistryEntry};
pub use relay::{RelayState, WatchRelay};
pub use router::{CapabilityRouter, KvRequest, KvResponse};

/// Interface an inbound link must carry.
pub const KEY_VALUE_INTERFACE: &str = "key-value";

/// Interface an outbound link must carry.
pub const KEY_VALUE_WATCHER_INTERFACE: &str = "key-value-watcher";
