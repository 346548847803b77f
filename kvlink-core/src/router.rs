//! Capability router
//!
//! The request path. Every call is authorized against the registry at call
//! time, resolved to the caller's own connection and translated into a
//! [`BridgeResult`].

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::backend::{KeyValueEntry, KvConnection};
use crate::context::BridgeContext;
use crate::error::{BackendError, BackendResult, BridgeError, BridgeResult};
use crate::identity::{LinkDirection, TenantIdentity};

/// A key-value call as decoded by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum KvRequest {
    Get { key: String },
    Put { key: String, value: Vec<u8> },
    Create { key: String, value: Vec<u8> },
    Delete { key: String },
    Purge { key: String },
    ListKeys,
}

impl KvRequest {
    /// Operation name, for logs
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Put { .. } => "put",
            Self::Create { .. } => "create",
            Self::Delete { .. } => "delete",
            Self::Purge { .. } => "purge",
            Self::ListKeys => "list_keys",
        }
    }
}

/// Successful result of a [`KvRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvResponse {
    Entry(KeyValueEntry),
    Keys(Vec<String>),
    Done,
}

/// Routes key-value calls to the caller's backend connection.
#[derive(Clone)]
pub struct CapabilityRouter {
    ctx: Arc<BridgeContext>,
}

impl CapabilityRouter {
    /// Create a router over a shared context
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Identify the caller from transport metadata.
    ///
    /// Only the header configured on the context is consulted.
    pub fn caller_from_metadata(
        &self,
        metadata: &HashMap<String, String>,
    ) -> BridgeResult<TenantIdentity> {
        TenantIdentity::from_metadata(metadata, self.ctx.caller_header()).ok_or_else(|| {
            warn!(header = %self.ctx.caller_header(), "Request from unknown origin");
            BridgeError::Unauthorized
        })
    }

    fn resolve(
        &self,
        caller: &TenantIdentity,
        operation: &str,
    ) -> BridgeResult<Arc<dyn KvConnection>> {
        let registry = self.ctx.registry();
        if !registry.is_linked(LinkDirection::Inbound, caller.as_str()) {
            warn!(identity = %caller, operation, "Rejected call from unlinked identity");
            return Err(BridgeError::Unauthorized);
        }

        if let Some(connection) = self.ctx.inbound_pool().get(caller.as_str()) {
            return Ok(connection);
        }

        // the link may have been removed between the two lookups
        if !registry.is_linked(LinkDirection::Inbound, caller.as_str()) {
            warn!(identity = %caller, operation, "Link removed during call");
            return Err(BridgeError::Unauthorized);
        }

        error!(identity = %caller, operation, "Linked identity has no backend connection");
        Err(BridgeError::InternalInconsistency(caller.to_string()))
    }

    /// Run `op` on the caller's connection.
    ///
    /// A connection closed under the call is resolved again: a relinked
    /// caller is retried on its new connection, a removed link reports
    /// Unauthorized.
    async fn call<T, F, Fut>(
        &self,
        caller: &TenantIdentity,
        operation: &'static str,
        op: F,
    ) -> BridgeResult<T>
    where
        F: Fn(Arc<dyn KvConnection>) -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let connection = self.resolve(caller, operation)?;
        match op(connection).await {
            Err(BackendError::Closed) => {
                debug!(identity = %caller, operation, "Connection closed during call");
                let connection = self.resolve(caller, operation)?;
                op(connection)
                    .await
                    .map_err(|e| backend_failure(caller, operation, e))
            }
            result => result.map_err(|e| backend_failure(caller, operation, e)),
        }
    }

    /// Get the value stored under `key`
    pub async fn get(&self, caller: &TenantIdentity, key: &str) -> BridgeResult<KeyValueEntry> {
        let value = self
            .call(caller, "get", move |connection| async move {
                connection.get(key).await
            })
            .await?;

        match value {
            Some(value) => Ok(KeyValueEntry {
                key: key.to_string(),
                value,
            }),
            None => Err(BridgeError::NotFound(key.to_string())),
        }
    }

    /// Store `value` under `key`
    pub async fn put(
        &self,
        caller: &TenantIdentity,
        key: &str,
        value: Vec<u8>,
    ) -> BridgeResult<()> {
        self.call(caller, "put", move |connection| {
            let value = value.clone();
            async move { connection.put(key, value).await }
        })
        .await
    }

    /// Store `value` under `key` unless the key already exists
    pub async fn create(
        &self,
        caller: &TenantIdentity,
        key: &str,
        value: Vec<u8>,
    ) -> BridgeResult<()> {
        self.call(caller, "create", move |connection| {
            let value = value.clone();
            async move { connection.create(key, value).await }
        })
        .await
    }

    /// Delete `key`
    pub async fn delete(&self, caller: &TenantIdentity, key: &str) -> BridgeResult<()> {
        self.call(caller, "delete", move |connection| async move {
            connection.delete(key).await
        })
        .await
    }

    /// Purge `key` and its history
    pub async fn purge(&self, caller: &TenantIdentity, key: &str) -> BridgeResult<()> {
        self.call(caller, "purge", move |connection| async move {
            connection.purge(key).await
        })
        .await
    }

    /// Every key in the caller's bucket, in backend order
    pub async fn list_keys(&self, caller: &TenantIdentity) -> BridgeResult<Vec<String>> {
        let mut stream = self
            .call(caller, "list_keys", |connection| async move {
                connection.list_keys().await
            })
            .await?;

        let mut keys = Vec::new();
        while let Some(key) = stream.next().await {
            keys.push(key.map_err(|e| backend_failure(caller, "list_keys", e))?);
        }

        debug!(identity = %caller, count = keys.len(), "Listed keys");
        Ok(keys)
    }

    /// Run a decoded request on behalf of `caller`
    pub async fn dispatch(
        &self,
        caller: &TenantIdentity,
        request: KvRequest,
    ) -> BridgeResult<KvResponse> {
        debug!(identity = %caller, operation = request.operation(), "Dispatching call");
        match request {
            KvRequest::Get { key } => self.get(caller, &key).await.map(KvResponse::Entry),
            KvRequest::Put { key, value } => {
                self.put(caller, &key, value).await.map(|_| KvResponse::Done)
            }
            KvRequest::Create { key, value } => {
                self.create(caller, &key, value).await.map(|_| KvResponse::Done)
            }
            KvRequest::Delete { key } => self.delete(caller, &key).await.map(|_| KvResponse::Done),
            KvRequest::Purge { key } => self.purge(caller, &key).await.map(|_| KvResponse::Done),
            KvRequest::ListKeys => self.list_keys(caller).await.map(KvResponse::Keys),
        }
    }
}

fn backend_failure(
    caller: &TenantIdentity,
    operation: &str,
    err: BackendError,
) -> BridgeError {
    let err = BridgeError::from(err);
    if err.is_retryable() {
        warn!(identity = %caller, operation, error = %err, "Backend call failed");
    }
    err
}
