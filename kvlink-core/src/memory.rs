//! In-process backend and delivery sink
//!
//! [`MemoryBackend`] keeps buckets in memory, keyed by backend address and
//! bucket name, and fans changes out over a broadcast channel. It counts every
//! store operation and every open connection so callers can assert on backend
//! traffic. [`RecordingSink`] records deliveries instead of sending them.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::{
    ChangeEvent, ChangeStream, KeyStream, KvBackend, KvConnection, Operation, ensure_open,
};
use crate::delivery::EventSink;
use crate::error::{BackendError, BackendResult, BridgeError, BridgeResult};
use crate::identity::TenantIdentity;
use crate::link::{Credentials, LinkConfig};

const FEED_CAPACITY: usize = 1024;

struct Bucket {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Bucket {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn emit(&self, event: ChangeEvent) {
        // no subscribers is fine
        let _ = self.changes.send(event);
    }
}

#[derive(Default)]
struct Counters {
    operations: AtomicU64,
    connects: AtomicU64,
    open: AtomicUsize,
    unavailable: AtomicBool,
}

/// In-memory key-value backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    buckets: Arc<DashMap<(String, String), Arc<Bucket>>>,
    counters: Arc<Counters>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, address: &str, namespace: &str) -> Arc<Bucket> {
        let bucket = self
            .buckets
            .entry((address.to_string(), namespace.to_string()))
            .or_insert_with(|| Arc::new(Bucket::new()));
        Arc::clone(bucket.value())
    }

    /// Make connects and operations fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.counters.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store operations attempted through any connection
    pub fn operations(&self) -> u64 {
        self.counters.operations.load(Ordering::SeqCst)
    }

    /// Successful connects
    pub fn connects(&self) -> u64 {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Active change-feed subscriptions on a bucket
    pub fn watchers(&self, address: &str, namespace: &str) -> usize {
        self.buckets
            .get(&(address.to_string(), namespace.to_string()))
            .map(|bucket| bucket.changes.receiver_count())
            .unwrap_or(0)
    }

    /// Write directly into a bucket, bypassing any connection.
    ///
    /// Emits a put event like a write from another client would.
    pub fn seed(&self, address: &str, namespace: &str, key: &str, value: impl Into<Vec<u8>>) {
        let bucket = self.bucket(address, namespace);
        let value = value.into();
        bucket.entries.lock().insert(key.to_string(), value.clone());
        bucket.emit(ChangeEvent::new(key, value, Operation::Put));
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn connect(
        &self,
        identity: &TenantIdentity,
        config: &LinkConfig,
        _credentials: &Credentials,
    ) -> BackendResult<Arc<dyn KvConnection>> {
        if self.counters.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Connection(format!(
                "{} is unavailable",
                config.backend_address
            )));
        }

        let bucket = self.bucket(&config.backend_address, &config.namespace);
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        debug!(identity = %identity, bucket = %config.namespace, "Memory connection opened");

        Ok(Arc::new(MemoryConnection {
            bucket,
            counters: Arc::clone(&self.counters),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }))
    }
}

/// Connection to one in-memory bucket.
pub struct MemoryConnection {
    bucket: Arc<Bucket>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl MemoryConnection {
    fn begin(&self) -> BackendResult<()> {
        self.counters.operations.fetch_add(1, Ordering::SeqCst);
        ensure_open(self)?;
        if self.counters.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Operation("backend unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvConnection for MemoryConnection {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.begin()?;
        Ok(self.bucket.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> BackendResult<()> {
        self.begin()?;
        self.bucket
            .entries
            .lock()
            .insert(key.to_string(), value.clone());
        self.bucket.emit(ChangeEvent::new(key, value, Operation::Put));
        Ok(())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> BackendResult<()> {
        self.begin()?;
        {
            let mut entries = self.bucket.entries.lock();
            if entries.contains_key(key) {
                return Err(BackendError::AlreadyExists(key.to_string()));
            }
            entries.insert(key.to_string(), value.clone());
        }
        self.bucket.emit(ChangeEvent::new(key, value, Operation::Put));
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.begin()?;
        self.bucket.entries.lock().remove(key);
        self.bucket
            .emit(ChangeEvent::new(key, Vec::new(), Operation::Delete));
        Ok(())
    }

    async fn purge(&self, key: &str) -> BackendResult<()> {
        self.begin()?;
        self.bucket.entries.lock().remove(key);
        self.bucket
            .emit(ChangeEvent::new(key, Vec::new(), Operation::Purge));
        Ok(())
    }

    async fn list_keys(&self) -> BackendResult<KeyStream> {
        self.begin()?;
        let keys: Vec<BackendResult<String>> =
            self.bucket.entries.lock().keys().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(keys)))
    }

    /// Replays the latest value of every key as a put, then follows changes.
    async fn watch(&self) -> BackendResult<ChangeStream> {
        self.begin()?;
        let (current, receiver) = {
            // writers emit after releasing the lock, so nothing falls between
            // the snapshot and the subscription
            let entries = self.bucket.entries.lock();
            let current: Vec<BackendResult<ChangeEvent>> = entries
                .iter()
                .map(|(key, value)| {
                    Ok(ChangeEvent::new(key.as_str(), value.clone(), Operation::Put))
                })
                .collect();
            (current, self.bucket.changes.subscribe())
        };
        let shutdown = self.shutdown.clone();

        let feed = stream::unfold((receiver, shutdown), |(mut receiver, shutdown)| async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    next = receiver.recv() => next,
                };
                match next {
                    Ok(event) => return Some((Ok(event), (receiver, shutdown))),
                    Err(RecvError::Lagged(missed)) => {
                        let err = BackendError::Operation(format!(
                            "change feed lagged by {missed} events"
                        ));
                        return Some((Err(err), (receiver, shutdown)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream::iter(current).chain(feed)))
    }

    async fn close(&self) -> BackendResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Delivery sink that records events in memory.
#[derive(Clone, Default)]
pub struct RecordingSink {
    delivered: Arc<Mutex<Vec<(TenantIdentity, ChangeEvent)>>>,
    failing: Arc<Mutex<HashSet<TenantIdentity>>>,
    attempts: Arc<AtomicU64>,
    latency: Option<Duration>,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every delivery for `latency` before recording it
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make deliveries to `identity` fail (or succeed again)
    pub fn set_failing(&self, identity: impl Into<TenantIdentity>, failing: bool) {
        let identity = identity.into();
        let mut set = self.failing.lock();
        if failing {
            set.insert(identity);
        } else {
            set.remove(&identity);
        }
    }

    /// Every recorded delivery, in order
    pub fn delivered(&self) -> Vec<(TenantIdentity, ChangeEvent)> {
        self.delivered.lock().clone()
    }

    /// Recorded deliveries for one identity
    pub fn delivered_to(&self, identity: &str) -> Vec<ChangeEvent> {
        self.delivered
            .lock()
            .iter()
            .filter(|(id, _)| id.as_str() == identity)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Delivery attempts, including failed ones
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, identity: &TenantIdentity, event: &ChangeEvent) -> BridgeResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.lock().contains(identity) {
            return Err(BridgeError::DeliveryFailure(format!(
                "{identity} rejected event for key {}",
                event.key
            )));
        }

        self.delivered.lock().push((identity.clone(), event.clone()));
        Ok(())
    }
}
