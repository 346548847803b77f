//! Lifecycle manager
//!
//! Applies host notifications to the bridge: link setup and teardown, health
//! checks and shutdown. Setup registers the link last, so a link whose setup
//! failed is never visible to the request path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::{LinkDirection, TenantIdentity};
use crate::link::{Credentials, LinkConfig, LinkDefinition};

/// Notification sent by the host.
#[derive(Debug)]
pub enum HostNotification {
    /// A link was established or replaced
    LinkPut {
        link: LinkDefinition,
        reply: Option<oneshot::Sender<BridgeResult<()>>>,
    },
    /// A link was removed
    LinkDelete {
        direction: LinkDirection,
        identity: TenantIdentity,
    },
    /// The host asks for the health status
    HealthCheck(oneshot::Sender<String>),
    /// The process is going away
    Shutdown,
}

impl HostNotification {
    /// Link notification without a reply channel
    pub fn link_put(link: LinkDefinition) -> Self {
        Self::LinkPut { link, reply: None }
    }

    /// Link notification and the receiver of its outcome
    pub fn link_put_with_reply(
        link: LinkDefinition,
    ) -> (Self, oneshot::Receiver<BridgeResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::LinkPut {
                link,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Link removal notification
    pub fn link_delete(direction: LinkDirection, identity: impl Into<TenantIdentity>) -> Self {
        Self::LinkDelete {
            direction,
            identity: identity.into(),
        }
    }
}

/// Sequences registry, pool and relay changes for host notifications.
pub struct LifecycleManager {
    ctx: Arc<BridgeContext>,
    shut_down: AtomicBool,
}

impl LifecycleManager {
    /// Create a manager over a shared context
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self {
            ctx,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Shared context
    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Establish or replace a link.
    ///
    /// Links that do not carry the interface of their direction are ignored.
    /// When setup fails, anything left for the identity in that role is torn
    /// down and the error is returned.
    pub async fn link_put(&self, link: LinkDefinition) -> BridgeResult<()> {
        if self.is_shut_down() {
            warn!(identity = %link.peer(), "Ignoring link after shutdown");
            return Err(BridgeError::InvalidLink("bridge is shut down".to_string()));
        }

        if !link.carries_interface() {
            info!(
                direction = %link.direction,
                source_id = %link.source_id,
                target = %link.target,
                interfaces = ?link.interfaces,
                "Ignoring link without the {} interface",
                link.direction.interface()
            );
            return Ok(());
        }

        let direction = link.direction;
        let identity = link.peer().clone();

        match self.establish(direction, &identity, link).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    identity = %identity,
                    direction = %direction,
                    kind = e.kind(),
                    error = %e,
                    "Link setup failed"
                );
                self.teardown(direction, identity.as_str()).await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        direction: LinkDirection,
        identity: &TenantIdentity,
        link: LinkDefinition,
    ) -> BridgeResult<()> {
        let defaults = self.ctx.link_defaults();
        let config = LinkConfig::from_options(&link.config, defaults)?;

        let connection = {
            let credentials = Credentials::from_secrets(&link.secrets, &defaults.credentials_key)?;
            self.ctx
                .pool(direction)
                .open(identity, &config, &credentials)
                .await?
        };

        if direction == LinkDirection::Outbound {
            self.ctx
                .relays()
                .start(identity, connection, config.startup_delay())
                .await?;
        }

        info!(
            identity = %identity,
            direction = %direction,
            address = %config.backend_address,
            bucket = %config.namespace,
            "Link established"
        );
        self.ctx.registry().put(direction, identity.clone(), config);
        Ok(())
    }

    async fn teardown(&self, direction: LinkDirection, identity: &str) -> bool {
        if direction == LinkDirection::Outbound {
            self.ctx.relays().stop(identity).await;
        }
        self.ctx.pool(direction).close(identity).await;
        self.ctx.registry().delete(direction, identity).is_some()
    }

    /// Remove a link. Removing an unknown link is not an error.
    pub async fn link_delete(&self, direction: LinkDirection, identity: &str) {
        if self.teardown(direction, identity).await {
            info!(identity = %identity, direction = %direction, "Link removed");
        } else {
            debug!(identity = %identity, direction = %direction, "Removed link was not registered");
        }
    }

    /// Stop every relay, close every connection and forget every link.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already performed");
            return;
        }

        info!("Shutting down bridge");

        info!("Phase 1: stopping relays");
        self.ctx.relays().stop_all().await;

        info!("Phase 2: closing backend connections");
        self.ctx.inbound_pool().close_all().await;
        self.ctx.watch_pool().close_all().await;

        info!("Phase 3: clearing link registry");
        self.ctx.registry().clear();

        info!("Bridge shut down");
    }

    /// Check whether shutdown has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Constant health response
    pub fn health_check(&self) -> String {
        self.ctx.health_message().to_string()
    }

    /// Apply notifications in order until `Shutdown` arrives or the channel
    /// closes. Both end with a shutdown.
    pub async fn run(&self, mut notifications: mpsc::Receiver<HostNotification>) {
        while let Some(notification) = notifications.recv().await {
            match notification {
                HostNotification::LinkPut { link, reply } => {
                    // failures are already logged by link_put
                    let result = self.link_put(link).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                HostNotification::LinkDelete {
                    direction,
                    identity,
                } => self.link_delete(direction, identity.as_str()).await,
                HostNotification::HealthCheck(reply) => {
                    let _ = reply.send(self.health_check());
                }
                HostNotification::Shutdown => {
                    self.shutdown().await;
                    return;
                }
            }
        }

        warn!("Host notification channel closed");
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkDefaults;
    use crate::memory::{MemoryBackend, RecordingSink};
    use std::time::Duration;

    fn manager(backend: &MemoryBackend) -> LifecycleManager {
        let ctx = BridgeContext::builder(Arc::new(backend.clone()), Arc::new(RecordingSink::new()))
            .link_defaults(LinkDefaults::default().with_backend_url("mem://local"))
            .build();
        LifecycleManager::new(ctx)
    }

    fn watcher(name: &str) -> LinkDefinition {
        LinkDefinition::outbound("kvlink", name)
            .with_option("bucket", "stuff")
            .with_option("startup_time", "0")
    }

    #[tokio::test]
    async fn test_inbound_link_put_and_delete() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        let ctx = Arc::clone(manager.context());

        manager
            .link_put(LinkDefinition::inbound("svc-1", "kvlink").with_option("bucket", "stuff"))
            .await
            .unwrap();
        assert!(ctx.registry().is_linked(LinkDirection::Inbound, "svc-1"));
        assert!(ctx.inbound_pool().contains("svc-1"));

        manager.link_delete(LinkDirection::Inbound, "svc-1").await;
        assert!(!ctx.registry().is_linked(LinkDirection::Inbound, "svc-1"));
        assert_eq!(backend.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_watch_link_starts_relay() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        let ctx = Arc::clone(manager.context());

        manager.link_put(watcher("watcher")).await.unwrap();
        assert!(ctx.relays().is_running("watcher"));
        assert!(ctx.registry().is_linked(LinkDirection::Outbound, "watcher"));
        assert!(!ctx.registry().is_linked(LinkDirection::Inbound, "watcher"));

        manager.link_delete(LinkDirection::Outbound, "watcher").await;
        assert_eq!(ctx.relays().active_count(), 0);
        assert_eq!(backend.watchers("mem://local", "stuff"), 0);
    }

    #[tokio::test]
    async fn test_link_without_interface_is_ignored() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);

        let link = LinkDefinition::new(LinkDirection::Inbound, "svc-1", "kvlink")
            .with_interface("blobstore")
            .with_option("bucket", "stuff");
        manager.link_put(link).await.unwrap();

        assert!(manager.context().registry().is_empty());
        assert_eq!(backend.connects(), 0);
    }

    #[tokio::test]
    async fn test_failed_setup_leaves_link_absent() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);
        let manager = manager(&backend);

        let err = manager
            .link_put(LinkDefinition::inbound("svc-1", "kvlink").with_option("bucket", "stuff"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::BackendUnavailable(_)));
        assert!(manager.context().registry().is_empty());
    }

    #[tokio::test]
    async fn test_failed_relink_tears_down() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        let ctx = Arc::clone(manager.context());

        manager
            .link_put(LinkDefinition::inbound("svc-1", "kvlink").with_option("bucket", "stuff"))
            .await
            .unwrap();

        let err = manager
            .link_put(LinkDefinition::inbound("svc-1", "kvlink"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_link");
        assert!(!ctx.registry().is_linked(LinkDirection::Inbound, "svc-1"));
        assert!(!ctx.inbound_pool().contains("svc-1"));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);

        manager.link_put(watcher("watcher")).await.unwrap();
        manager.shutdown().await;
        manager.shutdown().await;

        assert!(manager.is_shut_down());
        assert_eq!(backend.open_connections(), 0);

        let err = manager.link_put(watcher("late")).await.unwrap_err();
        assert_eq!(err, BridgeError::InvalidLink("bridge is shut down".into()));
        assert!(!err.is_retryable());
        assert_eq!(backend.connects(), 1);
    }

    #[tokio::test]
    async fn test_run_loop() {
        let backend = MemoryBackend::new();
        let manager = Arc::new(manager(&backend));
        let (tx, rx) = mpsc::channel(8);

        let runner = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run(rx).await })
        };

        let (put, outcome) = HostNotification::link_put_with_reply(watcher("watcher"));
        tx.send(put).await.unwrap();
        assert!(outcome.await.unwrap().is_ok());

        let (health_tx, health_rx) = oneshot::channel();
        tx.send(HostNotification::HealthCheck(health_tx)).await.unwrap();
        assert_eq!(health_rx.await.unwrap(), "provider healthy");

        tx.send(HostNotification::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backend.open_connections(), 0);
    }
}
