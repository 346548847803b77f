//! Traits for backend key-value store implementations.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{BackendError, BackendResult};
use crate::identity::TenantIdentity;
use crate::link::{Credentials, LinkConfig};

/// A stream of keys, in backend order.
pub type KeyStream = Pin<Box<dyn Stream<Item = BackendResult<String>> + Send>>;

/// A change feed. Dropping it releases the subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = BackendResult<ChangeEvent>> + Send>>;

/// A stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Kind of mutation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Put,
    Delete,
    Purge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => write!(f, "put"),
            Self::Delete => write!(f, "delete"),
            Self::Purge => write!(f, "purge"),
        }
    }
}

/// One mutation observed on a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    pub value: Vec<u8>,
    #[serde(rename = "op")]
    pub operation: Operation,
}

impl ChangeEvent {
    /// Create a new change event
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, operation: Operation) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            operation,
        }
    }
}

/// Factory for tenant-scoped connections.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Open a connection to the bucket named by `config` on behalf of `identity`.
    async fn connect(
        &self,
        identity: &TenantIdentity,
        config: &LinkConfig,
        credentials: &Credentials,
    ) -> BackendResult<Arc<dyn KvConnection>>;
}

/// A live connection to one tenant's bucket.
///
/// Operations started after [`KvConnection::close`] fail with
/// [`BackendError::Closed`].
#[async_trait]
pub trait KvConnection: Send + Sync {
    /// Get the value of a key. Deleted and purged keys are absent.
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn put(&self, key: &str, value: Vec<u8>) -> BackendResult<()>;

    /// Write a value only if the key does not exist.
    async fn create(&self, key: &str, value: Vec<u8>) -> BackendResult<()>;

    /// Delete a key, leaving a tombstone.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Delete a key and its history.
    async fn purge(&self, key: &str) -> BackendResult<()>;

    /// Enumerate live keys.
    async fn list_keys(&self) -> BackendResult<KeyStream>;

    /// Subscribe to every change on the bucket.
    async fn watch(&self) -> BackendResult<ChangeStream>;

    /// Close the connection.
    async fn close(&self) -> BackendResult<()>;

    /// Check if the connection has been closed.
    fn is_closed(&self) -> bool;
}

/// Reject an operation on a closed connection.
pub(crate) fn ensure_open(conn: &dyn KvConnection) -> Result<(), BackendError> {
    if conn.is_closed() {
        Err(BackendError::Closed)
    } else {
        Ok(())
    }
}
