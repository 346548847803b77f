//! NATS JetStream key-value backend

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use kvlink_core::{
    BackendError, BackendResult, ChangeEvent, ChangeStream, Credentials, KeyStream, KvBackend,
    KvConnection, LinkConfig, Operation, TenantIdentity,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::NatsError;

/// Key filter matching every key in a bucket.
const ALL_KEYS: &str = ">";

/// Delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Reconnect attempts before giving up; ten minutes at the default delay.
pub const DEFAULT_MAX_RECONNECTS: usize = 600;

/// Build client options for a connection made on behalf of `name`.
pub(crate) fn connect_options(
    name: &str,
    credentials: &Credentials,
    reconnect_delay: Duration,
    max_reconnects: usize,
) -> Result<ConnectOptions, NatsError> {
    let options = match credentials.expose() {
        Some(creds) => ConnectOptions::with_credentials(creds)
            .map_err(|e| NatsError::Credentials(e.to_string()))?,
        None => ConnectOptions::new(),
    };

    let client_name = name.to_string();
    Ok(options
        .name(name)
        .max_reconnects(max_reconnects)
        .reconnect_delay_callback(move |_attempts| reconnect_delay)
        .event_callback(move |event| {
            let client_name = client_name.clone();
            async move {
                match event {
                    Event::Connected => info!(client = %client_name, "NATS connection established"),
                    Event::Disconnected => warn!(client = %client_name, "NATS connection lost"),
                    other => warn!(client = %client_name, event = %other, "NATS connection event"),
                }
            }
        }))
}

/// Opens one NATS connection and key-value bucket per tenant.
#[derive(Debug, Clone)]
pub struct NatsBackend {
    reconnect_delay: Duration,
    max_reconnects: usize,
}

impl Default for NatsBackend {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
        }
    }
}

impl NatsBackend {
    /// Create a backend with the default reconnect policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay between reconnect attempts
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the number of reconnect attempts
    pub fn with_max_reconnects(mut self, max: usize) -> Self {
        self.max_reconnects = max;
        self
    }
}

#[async_trait]
impl KvBackend for NatsBackend {
    async fn connect(
        &self,
        identity: &TenantIdentity,
        config: &LinkConfig,
        credentials: &Credentials,
    ) -> BackendResult<Arc<dyn KvConnection>> {
        let options = connect_options(
            identity.as_str(),
            credentials,
            self.reconnect_delay,
            self.max_reconnects,
        )?;

        info!(
            identity = %identity,
            url = %config.backend_address,
            anonymous = credentials.is_anonymous(),
            "Connecting to NATS"
        );

        let client = options
            .connect(config.backend_address.as_str())
            .await
            .map_err(|e| NatsError::Connection(e.to_string()))?;

        let store = jetstream::new(client.clone())
            .get_key_value(config.namespace.clone())
            .await
            .map_err(|e| NatsError::Bucket {
                bucket: config.namespace.clone(),
                reason: e.to_string(),
            })?;

        debug!(identity = %identity, bucket = %config.namespace, "Opened key-value bucket");

        Ok(Arc::new(NatsKvConnection {
            identity: identity.clone(),
            bucket: config.namespace.clone(),
            handles: Mutex::new(Some(Handles { client, store })),
        }))
    }
}

struct Handles {
    client: Client,
    store: kv::Store,
}

/// One tenant's NATS connection and bucket.
pub struct NatsKvConnection {
    identity: TenantIdentity,
    bucket: String,
    handles: Mutex<Option<Handles>>,
}

impl NatsKvConnection {
    fn store(&self) -> BackendResult<kv::Store> {
        self.handles
            .lock()
            .as_ref()
            .map(|handles| handles.store.clone())
            .ok_or(BackendError::Closed)
    }
}

fn operation_error(err: impl std::fmt::Display) -> BackendError {
    BackendError::Operation(err.to_string())
}

pub(crate) fn to_operation(operation: kv::Operation) -> Operation {
    match operation {
        kv::Operation::Put => Operation::Put,
        kv::Operation::Delete => Operation::Delete,
        kv::Operation::Purge => Operation::Purge,
    }
}

#[async_trait]
impl KvConnection for NatsKvConnection {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let value = self.store()?.get(key).await.map_err(operation_error)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> BackendResult<()> {
        self.store()?
            .put(key, Bytes::from(value))
            .await
            .map_err(operation_error)?;
        Ok(())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> BackendResult<()> {
        match self.store()?.create(key, Bytes::from(value)).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => {
                Err(BackendError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(operation_error(e)),
        }
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.store()?.delete(key).await.map_err(operation_error)
    }

    async fn purge(&self, key: &str) -> BackendResult<()> {
        self.store()?.purge(key).await.map_err(operation_error)
    }

    async fn list_keys(&self) -> BackendResult<KeyStream> {
        let keys = self.store()?.keys().await.map_err(operation_error)?;
        Ok(Box::pin(keys.map(|key| key.map_err(operation_error))))
    }

    /// Latest value of every key first, then live updates.
    async fn watch(&self) -> BackendResult<ChangeStream> {
        let watch = self
            .store()?
            .watch_with_history(ALL_KEYS)
            .await
            .map_err(operation_error)?;
        debug!(identity = %self.identity, bucket = %self.bucket, "Watching bucket");

        Ok(Box::pin(watch.map(|entry| {
            entry
                .map(|entry| {
                    ChangeEvent::new(entry.key, entry.value.to_vec(), to_operation(entry.operation))
                })
                .map_err(operation_error)
        })))
    }

    async fn close(&self) -> BackendResult<()> {
        let Some(handles) = self.handles.lock().take() else {
            return Ok(());
        };

        debug!(identity = %self.identity, bucket = %self.bucket, "Closing NATS connection");
        handles
            .client
            .flush()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.handles.lock().is_none()
    }
}
