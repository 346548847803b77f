//! Link registry
//!
//! Records which identities are currently linked, per role, together with the
//! configuration of each link. Presence of an entry is the only thing the
//! request path checks to authorize a caller.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::identity::{LinkDirection, TenantIdentity};
use crate::link::LinkConfig;

/// A registered link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRegistryEntry {
    pub identity: TenantIdentity,
    pub direction: LinkDirection,
    pub config: Arc<LinkConfig>,
}

/// Two independent maps, one per link role.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    inbound: DashMap<TenantIdentity, LinkRegistryEntry>,
    outbound: DashMap<TenantIdentity, LinkRegistryEntry>,
}

impl LinkRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, direction: LinkDirection) -> &DashMap<TenantIdentity, LinkRegistryEntry> {
        match direction {
            LinkDirection::Inbound => &self.inbound,
            LinkDirection::Outbound => &self.outbound,
        }
    }

    /// Insert or replace the entry for `identity`.
    pub fn put(&self, direction: LinkDirection, identity: TenantIdentity, config: LinkConfig) {
        let entry = LinkRegistryEntry {
            identity: identity.clone(),
            direction,
            config: Arc::new(config),
        };

        if let Some(previous) = self.map(direction).insert(identity.clone(), entry) {
            warn!(
                identity = %identity,
                direction = %direction,
                previous_bucket = %previous.config.namespace,
                "Overwriting existing link"
            );
        } else {
            debug!(identity = %identity, direction = %direction, "Link registered");
        }
    }

    /// Remove the entry for `identity`, returning it if present.
    pub fn delete(&self, direction: LinkDirection, identity: &str) -> Option<LinkRegistryEntry> {
        self.map(direction)
            .remove(identity)
            .map(|(_, entry)| entry)
    }

    /// Check whether `identity` is linked in this role
    pub fn is_linked(&self, direction: LinkDirection, identity: &str) -> bool {
        self.map(direction).contains_key(identity)
    }

    /// Configuration of the link for `identity`
    pub fn get(&self, direction: LinkDirection, identity: &str) -> Option<Arc<LinkConfig>> {
        self.map(direction)
            .get(identity)
            .map(|entry| Arc::clone(&entry.config))
    }

    /// Number of links in this role
    pub fn len(&self, direction: LinkDirection) -> usize {
        self.map(direction).len()
    }

    /// Check whether no links exist in either role
    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty()
    }

    /// Linked identities in this role, sorted
    pub fn identities(&self, direction: LinkDirection) -> Vec<TenantIdentity> {
        let mut identities: Vec<_> = self
            .map(direction)
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }

    /// Remove every entry in both roles
    pub fn clear(&self) {
        self.inbound.clear();
        self.outbound.clear();
    }
}
