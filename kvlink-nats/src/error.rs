//! Error types for the NATS integration

use kvlink_core::{BackendError, BridgeError};
use thiserror::Error;

/// Errors raised while talking to NATS.
#[derive(Error, Debug)]
pub enum NatsError {
    /// Failed to connect to the server
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Credential content was rejected by the client
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// The key-value bucket could not be opened
    #[error("Bucket '{bucket}' unavailable: {reason}")]
    Bucket { bucket: String, reason: String },

    /// A request got no reply in time
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// A request failed or was answered with an error
    #[error("Request failed: {0}")]
    Request(String),

    /// Failed to encode or decode a payload
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<NatsError> for BackendError {
    fn from(err: NatsError) -> Self {
        match err {
            NatsError::Connection(_) | NatsError::Credentials(_) | NatsError::Bucket { .. } => {
                BackendError::Connection(err.to_string())
            }
            other => BackendError::Operation(other.to_string()),
        }
    }
}

impl From<NatsError> for BridgeError {
    fn from(err: NatsError) -> Self {
        match err {
            NatsError::Timeout(_) | NatsError::Request(_) | NatsError::Serialization(_) => {
                BridgeError::DeliveryFailure(err.to_string())
            }
            other => BridgeError::BackendUnavailable(other.to_string()),
        }
    }
}
