//! Link definitions, per-link configuration and credentials
//!
//! A host hands the bridge a [`LinkDefinition`] whenever a component is linked
//! to it. The raw string map of that definition is parsed into a [`LinkConfig`]
//! and its secrets are resolved into [`Credentials`], which only live until the
//! backend connection has been made.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::identity::{LinkDirection, TenantIdentity};

/// Link option holding the backend address.
pub const URL_OPTION: &str = "url";
/// Link option holding the bucket name.
pub const BUCKET_OPTION: &str = "bucket";
/// Link option holding the consumer's estimated startup time in seconds.
pub const STARTUP_TIME_OPTION: &str = "startup_time";
/// Secret entry holding base64-encoded backend credentials.
pub const DEFAULT_CREDENTIALS_KEY: &str = "nats-credentials";
/// Startup delay used when a link does not carry a usable one.
pub const DEFAULT_STARTUP_DELAY_SECS: u64 = 30;
/// Backend address used when a link does not carry one.
pub const DEFAULT_BACKEND_URL: &str = "nats://127.0.0.1:4222";

/// Process-wide fallbacks applied while parsing link options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDefaults {
    /// Backend address when `url` is absent
    pub backend_url: String,
    /// Startup delay when `startup_time` is absent or malformed
    pub startup_delay_secs: u64,
    /// Secret entry that carries the credentials
    pub credentials_key: String,
}

impl Default for LinkDefaults {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            startup_delay_secs: DEFAULT_STARTUP_DELAY_SECS,
            credentials_key: DEFAULT_CREDENTIALS_KEY.to_string(),
        }
    }
}

impl LinkDefaults {
    /// Set the fallback backend address
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Set the fallback startup delay
    pub fn with_startup_delay_secs(mut self, secs: u64) -> Self {
        self.startup_delay_secs = secs;
        self
    }

    /// Set the secret entry that carries the credentials
    pub fn with_credentials_key(mut self, key: impl Into<String>) -> Self {
        self.credentials_key = key.into();
        self
    }
}

/// Configuration of a single link. Replaced wholesale on re-link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Backend address, e.g. `nats://127.0.0.1:4222`
    pub backend_address: String,
    /// Bucket the link is scoped to
    pub namespace: String,
    /// Grace period before relaying change events
    pub startup_delay_secs: u64,
    /// Every option the link carried, verbatim
    #[serde(default)]
    pub raw_options: HashMap<String, String>,
}

impl LinkConfig {
    /// Create a configuration for a backend address and bucket
    ///
    /// # Examples
    ///
    /// ```
    /// use kvlink_core::LinkConfig;
    ///
    /// let config = LinkConfig::new("nats://127.0.0.1:4222", "stuff").with_startup_delay(0);
    /// assert_eq!(config.namespace, "stuff");
    /// ```
    pub fn new(backend_address: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            backend_address: backend_address.into(),
            namespace: namespace.into(),
            startup_delay_secs: DEFAULT_STARTUP_DELAY_SECS,
            raw_options: HashMap::new(),
        }
    }

    /// Set the startup delay in seconds
    pub fn with_startup_delay(mut self, secs: u64) -> Self {
        self.startup_delay_secs = secs;
        self
    }

    /// Parse the raw option map of a link.
    ///
    /// `bucket` is required. `url` and `startup_time` fall back to `defaults`;
    /// a `startup_time` that is not a non-negative integer is treated as absent.
    pub fn from_options(
        options: &HashMap<String, String>,
        defaults: &LinkDefaults,
    ) -> BridgeResult<Self> {
        let namespace = options
            .get(BUCKET_OPTION)
            .map(|bucket| bucket.trim())
            .filter(|bucket| !bucket.is_empty())
            .ok_or_else(|| {
                BridgeError::InvalidLink(format!("missing '{}' option", BUCKET_OPTION))
            })?;

        let backend_address = options
            .get(URL_OPTION)
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .unwrap_or(&defaults.backend_url);

        let startup_delay_secs = match options.get(STARTUP_TIME_OPTION) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(
                    value = %raw,
                    fallback = defaults.startup_delay_secs,
                    "Ignoring malformed startup_time option"
                );
                defaults.startup_delay_secs
            }),
            None => defaults.startup_delay_secs,
        };

        Ok(Self {
            backend_address: backend_address.to_string(),
            namespace: namespace.to_string(),
            startup_delay_secs,
            raw_options: options.clone(),
        })
    }

    /// Startup delay as a duration
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

/// Secret material for one backend connection.
#[derive(Default)]
pub struct Credentials {
    creds: Option<SecretString>,
}

impl Credentials {
    /// No credentials; the backend is contacted anonymously
    pub fn anonymous() -> Self {
        Self { creds: None }
    }

    /// Wrap already-decoded credential content
    pub fn from_content(content: impl Into<String>) -> Self {
        let content: String = content.into();
        Self {
            creds: Some(SecretString::new(content.into())),
        }
    }

    /// Resolve credentials from a link's secrets.
    ///
    /// The entry at `key` holds base64-encoded credential-file content. A
    /// missing entry yields anonymous credentials.
    pub fn from_secrets(secrets: &HashMap<String, SecretString>, key: &str) -> BridgeResult<Self> {
        let Some(encoded) = secrets.get(key) else {
            warn!(
                secret = key,
                "No credentials provided, connecting anonymously"
            );
            return Ok(Self::anonymous());
        };

        let decoded = STANDARD
            .decode(encoded.expose_secret().trim())
            .map_err(|e| {
                BridgeError::Credentials(format!("'{}' is not valid base64: {}", key, e))
            })?;
        let content = String::from_utf8(decoded)
            .map_err(|_| BridgeError::Credentials(format!("'{}' is not valid UTF-8", key)))?;

        Ok(Self::from_content(content))
    }

    /// Credential content, if any
    pub fn expose(&self) -> Option<&str> {
        self.creds.as_ref().map(|creds| creds.expose_secret())
    }

    /// Check whether no credentials are present
    pub fn is_anonymous(&self) -> bool {
        self.creds.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("anonymous", &self.is_anonymous())
            .finish()
    }
}

/// A link as announced by the host.
#[derive(Debug)]
pub struct LinkDefinition {
    /// Side of the link the bridge sits on
    pub direction: LinkDirection,
    /// Component on the source end
    pub source_id: TenantIdentity,
    /// Component on the target end
    pub target: TenantIdentity,
    /// Interfaces the link was established for
    pub interfaces: Vec<String>,
    /// Raw link options
    pub config: HashMap<String, String>,
    /// Link secrets
    pub secrets: HashMap<String, SecretString>,
}

impl LinkDefinition {
    /// Create a link definition with no interfaces, options or secrets
    pub fn new(
        direction: LinkDirection,
        source_id: impl Into<TenantIdentity>,
        target: impl Into<TenantIdentity>,
    ) -> Self {
        Self {
            direction,
            source_id: source_id.into(),
            target: target.into(),
            interfaces: Vec::new(),
            config: HashMap::new(),
            secrets: HashMap::new(),
        }
    }

    /// Inbound link from a calling component, carrying the `key-value` interface
    pub fn inbound(caller: impl Into<TenantIdentity>, bridge: impl Into<TenantIdentity>) -> Self {
        Self::new(LinkDirection::Inbound, caller, bridge)
            .with_interface(crate::KEY_VALUE_INTERFACE)
    }

    /// Outbound link to a watching component, carrying the `key-value-watcher` interface
    pub fn outbound(bridge: impl Into<TenantIdentity>, watcher: impl Into<TenantIdentity>) -> Self {
        Self::new(LinkDirection::Outbound, bridge, watcher)
            .with_interface(crate::KEY_VALUE_WATCHER_INTERFACE)
    }

    /// Add an interface
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Add a link option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Add a link secret
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.secrets.insert(key.into(), SecretString::new(value.into()));
        self
    }

    /// The identity this link is keyed by: the bridge's counterpart.
    ///
    /// Inbound links are keyed by the caller (`source_id`), outbound links by
    /// the component receiving events (`target`).
    pub fn peer(&self) -> &TenantIdentity {
        match self.direction {
            LinkDirection::Inbound => &self.source_id,
            LinkDirection::Outbound => &self.target,
        }
    }

    /// Check whether the link carries the interface its direction requires
    pub fn carries_interface(&self) -> bool {
        let wanted = self.direction.interface();
        self.interfaces.iter().any(|interface| interface == wanted)
    }
}
