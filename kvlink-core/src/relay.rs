//! Watch relays
//!
//! One background task per watching identity. The task owns the change feed of
//! the identity's bucket, waits out the startup grace period, then forwards
//! every event to the [`EventSink`] until it is cancelled or the feed ends.
//!
//! ```text
//! Idle -> Subscribing -> Relaying -> Stopped
//!                  \____________________^  (cancelled during the delay)
//! ```

use dashmap::DashMap;
use futures::StreamExt;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{ChangeStream, KvConnection};
use crate::delivery::EventSink;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::TenantIdentity;

/// Observable state of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Subscribing,
    Relaying,
    Stopped,
}

impl RelayState {
    /// Check if the relay still holds its subscription
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Subscribing | Self::Relaying)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Subscribing => write!(f, "subscribing"),
            Self::Relaying => write!(f, "relaying"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct RelayHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<RelayState>,
}

impl RelayHandle {
    async fn stop(self, identity: &TenantIdentity) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(identity = %identity, error = %e, "Relay task did not exit cleanly");
        }
    }
}

/// Owns every running relay, keyed by the watching identity.
pub struct WatchRelay {
    sink: Arc<dyn EventSink>,
    relays: DashMap<TenantIdentity, RelayHandle>,
}

impl WatchRelay {
    /// Create a relay registry delivering to `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            relays: DashMap::new(),
        }
    }

    /// Start relaying the change feed of `connection` to `identity`.
    ///
    /// Any relay already running for `identity` is stopped first. The
    /// subscription is made before returning, so a failure to subscribe is
    /// reported here; `startup_delay` is waited out inside the task.
    pub async fn start(
        &self,
        identity: &TenantIdentity,
        connection: Arc<dyn KvConnection>,
        startup_delay: Duration,
    ) -> BridgeResult<()> {
        if self.stop(identity.as_str()).await {
            debug!(identity = %identity, "Replaced running relay");
        }

        let (state_tx, state_rx) = watch::channel(RelayState::Idle);
        state_tx.send_replace(RelayState::Subscribing);

        let feed = connection.watch().await.map_err(|e| {
            warn!(identity = %identity, error = %e, "Failed to subscribe to change feed");
            BridgeError::from(e)
        })?;

        let token = CancellationToken::new();
        let task = tokio::spawn(relay_events(
            identity.clone(),
            feed,
            Arc::clone(&self.sink),
            startup_delay,
            token.clone(),
            state_tx,
        ));

        info!(
            identity = %identity,
            startup_delay_secs = startup_delay.as_secs(),
            "Relay started"
        );

        self.relays.insert(
            identity.clone(),
            RelayHandle {
                token,
                task,
                state: state_rx,
            },
        );
        Ok(())
    }

    /// Cancel the relay for `identity` and wait for it to exit.
    ///
    /// Returns false when no relay was registered.
    pub async fn stop(&self, identity: &str) -> bool {
        let Some((identity, handle)) = self.relays.remove(identity) else {
            return false;
        };
        handle.stop(&identity).await;
        info!(identity = %identity, "Relay stopped");
        true
    }

    /// Cancel every relay and wait for all of them
    pub async fn stop_all(&self) {
        let identities: Vec<TenantIdentity> =
            self.relays.iter().map(|entry| entry.key().clone()).collect();

        let handles: Vec<_> = identities
            .iter()
            .filter_map(|identity| self.relays.remove(identity))
            .collect();

        for (_, handle) in &handles {
            handle.token.cancel();
        }

        let count = handles.len();
        join_all(
            handles
                .into_iter()
                .map(|(identity, handle)| async move { handle.stop(&identity).await }),
        )
        .await;

        info!(stopped = count, "Stopped all relays");
    }

    /// Current state of the relay for `identity`
    pub fn state(&self, identity: &str) -> Option<RelayState> {
        self.relays
            .get(identity)
            .map(|handle| *handle.state.borrow())
    }

    /// Receiver that follows the state of the relay for `identity`
    pub fn subscribe_state(&self, identity: &str) -> Option<watch::Receiver<RelayState>> {
        self.relays.get(identity).map(|handle| handle.state.clone())
    }

    /// Check if a relay for `identity` holds its subscription
    pub fn is_running(&self, identity: &str) -> bool {
        self.state(identity).is_some_and(|state| state.is_running())
    }

    /// Number of relays holding a subscription
    pub fn active_count(&self) -> usize {
        self.relays
            .iter()
            .filter(|handle| handle.state.borrow().is_running())
            .count()
    }
}

async fn relay_events(
    identity: TenantIdentity,
    mut feed: ChangeStream,
    sink: Arc<dyn EventSink>,
    startup_delay: Duration,
    token: CancellationToken,
    state: watch::Sender<RelayState>,
) {
    if !startup_delay.is_zero() {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(identity = %identity, "Cancelled during startup delay");
                state.send_replace(RelayState::Stopped);
                return;
            }
            _ = tokio::time::sleep(startup_delay) => {}
        }
    }

    state.send_replace(RelayState::Relaying);
    debug!(identity = %identity, "Relaying change events");

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = feed.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(identity = %identity, error = %e, "Change feed error");
                continue;
            }
            None => {
                info!(identity = %identity, "Change feed ended");
                break;
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(identity = %identity, key = %event.key, "Abandoned in-flight delivery");
                break;
            }
            result = sink.deliver(&identity, &event) => {
                if let Err(e) = result {
                    warn!(
                        identity = %identity,
                        key = %event.key,
                        op = %event.operation,
                        error = %e,
                        "Failed to deliver change event"
                    );
                }
            }
        }
    }

    drop(feed);
    state.send_replace(RelayState::Stopped);
}
