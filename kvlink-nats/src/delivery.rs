//! Change event delivery over NATS request/reply

use std::time::Duration;

use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use kvlink_core::{
    BridgeResult, ChangeEvent, Credentials, DEFAULT_CALLER_HEADER, EventSink, TenantIdentity,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::connection::{DEFAULT_MAX_RECONNECTS, DEFAULT_RECONNECT_DELAY, connect_options};
use crate::error::NatsError;

/// Operation path the watching component serves.
pub const WATCH_ALL_OPERATION: &str = "key-value-watcher.watch-all";

/// Default subject prefix for deliveries.
pub const DEFAULT_SUBJECT_PREFIX: &str = "kvlink";

/// Default time to wait for a consumer's reply.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct DeliveryReply {
    #[serde(default)]
    error: Option<String>,
}

/// Delivers change events to watching components with NATS requests.
///
/// Each event is sent as JSON to `<prefix>.<identity>.key-value-watcher.watch-all`
/// with the identity in the `target` header, and the consumer's reply is
/// awaited.
#[derive(Clone)]
pub struct NatsEventSink {
    client: Client,
    subject_prefix: String,
    timeout: Duration,
}

impl NatsEventSink {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// Connect a dedicated client for deliveries
    pub async fn connect(url: &str, name: &str) -> Result<Self, NatsError> {
        let options = connect_options(
            name,
            &Credentials::anonymous(),
            DEFAULT_RECONNECT_DELAY,
            DEFAULT_MAX_RECONNECTS,
        )?;

        info!(url = %url, "Connecting delivery client to NATS");
        let client = options
            .connect(url)
            .await
            .map_err(|e| NatsError::Connection(e.to_string()))?;

        Ok(Self::new(client))
    }

    /// Set the subject prefix
    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Set how long to wait for a reply
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(
        &self,
        identity: &TenantIdentity,
        event: &ChangeEvent,
    ) -> Result<(), NatsError> {
        let subject = watch_subject(&self.subject_prefix, identity);
        let payload = Bytes::from(serde_json::to_vec(event)?);

        let mut headers = HeaderMap::new();
        headers.insert(DEFAULT_CALLER_HEADER, identity.as_str());

        debug!(subject = %subject, key = %event.key, "Delivering change event");

        let reply = tokio::time::timeout(
            self.timeout,
            self.client.request_with_headers(subject, headers, payload),
        )
        .await
        .map_err(|_| NatsError::Timeout(self.timeout.as_secs()))?
        .map_err(|e| NatsError::Request(e.to_string()))?;

        check_reply(&reply.payload)
    }
}

/// Subject events for `identity` are sent to
pub fn watch_subject(prefix: &str, identity: &TenantIdentity) -> String {
    format!("{}.{}.{}", prefix, identity, WATCH_ALL_OPERATION)
}

fn check_reply(payload: &[u8]) -> Result<(), NatsError> {
    if payload.is_empty() {
        return Ok(());
    }

    // replies that are not JSON objects carry no error
    match serde_json::from_slice::<DeliveryReply>(payload) {
        Ok(DeliveryReply { error: Some(error) }) => Err(NatsError::Request(error)),
        _ => Ok(()),
    }
}

#[async_trait]
impl EventSink for NatsEventSink {
    async fn deliver(&self, identity: &TenantIdentity, event: &ChangeEvent) -> BridgeResult<()> {
        self.request(identity, event).await.map_err(Into::into)
    }
}
