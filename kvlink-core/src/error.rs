//! Error types for bridge operations

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced to callers, the host and the logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The caller has no link. Never says anything about the key.
    #[error("Unauthorized")]
    Unauthorized,

    /// The key does not exist in the tenant's bucket
    #[error("Key not found: {0}")]
    NotFound(String),

    /// `create` collided with an existing key
    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    /// Connecting to or talking to the backend failed
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An authorized identity has no pooled connection
    #[error("Internal inconsistency: linked identity {0} has no connection")]
    InternalInconsistency(String),

    /// A change event could not be forwarded to its consumer
    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    /// The link definition could not be turned into a usable configuration
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Secret material could not be decoded
    #[error("Credentials error: {0}")]
    Credentials(String),
}

impl BridgeError {
    /// Stable label for logs and transport mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::InternalInconsistency(_) => "internal_inconsistency",
            Self::DeliveryFailure(_) => "delivery_failure",
            Self::InvalidLink(_) => "invalid_link",
            Self::Credentials(_) => "credentials",
        }
    }

    /// Check if retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::DeliveryFailure(_))
    }
}

/// Errors reported by a backend store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Failed to establish or keep the connection
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Key already present on create
    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    /// The connection was closed before the operation started
    #[error("Connection closed")]
    Closed,

    /// Any other failed operation
    #[error("Operation failed: {0}")]
    Operation(String),
}

impl From<BackendError> for BridgeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::AlreadyExists(key) => BridgeError::AlreadyExists(key),
            other => BridgeError::BackendUnavailable(other.to_string()),
        }
    }
}
