//! Outbound delivery of change events to watching tenants.

use async_trait::async_trait;

use crate::backend::ChangeEvent;
use crate::error::BridgeResult;
use crate::identity::TenantIdentity;

/// Delivers a change event to the tenant that watches the bucket.
///
/// Implementations report failures as [`crate::BridgeError::DeliveryFailure`];
/// the relay logs them and moves on to the next event.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event to `identity`.
    async fn deliver(&self, identity: &TenantIdentity, event: &ChangeEvent) -> BridgeResult<()>;
}
