//! Tenant identities and link roles

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

/// Metadata field the transport uses for the verified caller identity.
pub const DEFAULT_CALLER_HEADER: &str = "target";

/// Opaque name of a party on one side of a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantIdentity(String);

impl TenantIdentity {
    /// Create a new identity
    ///
    /// # Examples
    ///
    /// ```
    /// use kvlink_core::TenantIdentity;
    ///
    /// let id = TenantIdentity::new("svc-1");
    /// assert_eq!(id.as_str(), "svc-1");
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the transport-verified caller from call metadata.
    ///
    /// Returns `None` when the header is missing or empty.
    ///
    /// ```
    /// use kvlink_core::TenantIdentity;
    /// use std::collections::HashMap;
    ///
    /// let mut metadata = HashMap::new();
    /// metadata.insert("target".to_string(), "svc-1".to_string());
    ///
    /// let caller = TenantIdentity::from_metadata(&metadata, "target");
    /// assert_eq!(caller, Some(TenantIdentity::new("svc-1")));
    /// ```
    pub fn from_metadata(metadata: &HashMap<String, String>, header: &str) -> Option<Self> {
        metadata
            .get(header)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TenantIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which side of a link the bridge sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// The peer calls the key-value capability on us
    Inbound,
    /// We relay the peer's bucket change feed to it
    Outbound,
}

impl LinkDirection {
    /// Interface name a link must carry to be honored in this direction.
    pub fn interface(&self) -> &'static str {
        match self {
            Self::Inbound => crate::KEY_VALUE_INTERFACE,
            Self::Outbound => crate::KEY_VALUE_WATCHER_INTERFACE,
        }
    }
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}
