//! Delivery sink for local runs

use async_trait::async_trait;
use kvlink_core::{BridgeResult, ChangeEvent, EventSink, TenantIdentity};
use tracing::info;

/// Logs every change event instead of sending it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, identity: &TenantIdentity, event: &ChangeEvent) -> BridgeResult<()> {
        info!(
            identity = %identity,
            key = %event.key,
            op = %event.operation,
            size = event.value.len(),
            "Change event"
        );
        Ok(())
    }
}
