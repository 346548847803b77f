//! Connection pool
//!
//! Owns the live backend connection of each linked identity. Connections are
//! opened through an injected [`KvBackend`] and never shared between
//! identities.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{KvBackend, KvConnection};
use crate::error::BridgeResult;
use crate::identity::TenantIdentity;
use crate::link::{Credentials, LinkConfig};

/// Tenant connections for one link role.
pub struct ConnectionPool {
    name: &'static str,
    backend: Arc<dyn KvBackend>,
    connections: DashMap<TenantIdentity, Arc<dyn KvConnection>>,
}

impl ConnectionPool {
    /// Create an empty pool backed by `backend`
    pub fn new(name: &'static str, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            name,
            backend,
            connections: DashMap::new(),
        }
    }

    /// Open a connection for `identity`, replacing any existing one.
    ///
    /// The new connection is established before the old one is touched, so a
    /// failed open leaves the pool unchanged.
    pub async fn open(
        &self,
        identity: &TenantIdentity,
        config: &LinkConfig,
        credentials: &Credentials,
    ) -> BridgeResult<Arc<dyn KvConnection>> {
        let connection = self
            .backend
            .connect(identity, config, credentials)
            .await
            .inspect_err(|e| {
                warn!(
                    pool = self.name,
                    identity = %identity,
                    address = %config.backend_address,
                    bucket = %config.namespace,
                    error = %e,
                    "Failed to open backend connection"
                );
            })?;

        info!(
            pool = self.name,
            identity = %identity,
            bucket = %config.namespace,
            "Backend connection opened"
        );

        if let Some(previous) = self
            .connections
            .insert(identity.clone(), Arc::clone(&connection))
        {
            debug!(pool = self.name, identity = %identity, "Replacing previous connection");
            if let Err(e) = previous.close().await {
                warn!(
                    pool = self.name,
                    identity = %identity,
                    error = %e,
                    "Failed to close replaced connection"
                );
            }
        }

        Ok(connection)
    }

    /// Close and remove the connection for `identity`. No-op when absent.
    pub async fn close(&self, identity: &str) {
        let Some((identity, connection)) = self.connections.remove(identity) else {
            return;
        };

        match connection.close().await {
            Ok(()) => debug!(pool = self.name, identity = %identity, "Backend connection closed"),
            Err(e) => warn!(
                pool = self.name,
                identity = %identity,
                error = %e,
                "Failed to close backend connection"
            ),
        }
    }

    /// Connection for `identity`, if open
    pub fn get(&self, identity: &str) -> Option<Arc<dyn KvConnection>> {
        self.connections
            .get(identity)
            .map(|conn| Arc::clone(conn.value()))
    }

    /// Close every connection. Failures are logged, never returned.
    pub async fn close_all(&self) {
        let identities: Vec<TenantIdentity> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for identity in &identities {
            self.close(identity.as_str()).await;
        }

        info!(pool = self.name, closed = identities.len(), "Closed all backend connections");
    }

    /// Number of open connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Check whether `identity` has a connection
    pub fn contains(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }
}
