//! Typed process settings

use crate::{ConfigError, ConfigManagerBuilder, ConfigValidator, Result, Validate};
use kvlink_core::{DEFAULT_CALLER_HEADER, DEFAULT_HEALTH_MESSAGE, LinkDefaults};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Accepted values of `log_format`.
pub const LOG_FORMATS: &[&str] = &["json", "pretty", "compact"];

const URL_SCHEMES: &[&str] = &["nats", "tls", "ws", "wss"];

/// Settings of one bridge process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Backend address for links that carry no `url`
    pub default_backend_url: String,
    /// Startup delay for links that carry no usable `startup_time`
    pub default_startup_delay_secs: u64,
    /// Secret entry holding base64 credentials
    pub credentials_secret_key: String,
    /// Metadata header carrying the verified caller
    pub caller_header: String,
    /// Health check response
    pub health_message: String,
    /// NATS server used to deliver change events
    pub rpc_url: String,
    /// First token of delivery subjects
    pub delivery_subject_prefix: String,
    /// How long a consumer may take to acknowledge an event
    pub delivery_timeout_secs: u64,
    pub log_level: String,
    /// One of [`LOG_FORMATS`]
    pub log_format: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        let links = LinkDefaults::default();
        Self {
            default_backend_url: links.backend_url,
            default_startup_delay_secs: links.startup_delay_secs,
            credentials_secret_key: links.credentials_key,
            caller_header: DEFAULT_CALLER_HEADER.to_string(),
            health_message: DEFAULT_HEALTH_MESSAGE.to_string(),
            rpc_url: "nats://127.0.0.1:4222".to_string(),
            delivery_subject_prefix: "kvlink".to_string(),
            delivery_timeout_secs: 10,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl BridgeSettings {
    /// Load settings from defaults, an optional file and the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigManagerBuilder::new().load_dotenv(None);
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_file(path);
        }

        builder.build()?.load_validated()
    }

    /// Fallbacks applied while parsing link options
    pub fn to_link_defaults(&self) -> LinkDefaults {
        LinkDefaults::default()
            .with_backend_url(self.default_backend_url.clone())
            .with_startup_delay_secs(self.default_startup_delay_secs)
            .with_credentials_key(self.credentials_secret_key.clone())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl Validate for BridgeSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::has_scheme(&self.default_backend_url, URL_SCHEMES, "default_backend_url")?;
        ConfigValidator::has_scheme(&self.rpc_url, URL_SCHEMES, "rpc_url")?;
        ConfigValidator::not_empty(&self.credentials_secret_key, "credentials_secret_key")?;
        ConfigValidator::not_empty(&self.caller_header, "caller_header")?;
        ConfigValidator::not_empty(&self.delivery_subject_prefix, "delivery_subject_prefix")?;
        ConfigValidator::in_range(self.delivery_timeout_secs, 1, 300, "delivery_timeout_secs")?;
        ConfigValidator::not_empty(&self.log_level, "log_level")?;
        ConfigValidator::one_of(&self.log_format, LOG_FORMATS, "log_format")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = BridgeSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.health_message, "provider healthy");
        assert_eq!(settings.caller_header, "target");
        assert_eq!(settings.delivery_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_to_link_defaults() {
        let settings = BridgeSettings {
            default_backend_url: "nats://kv.internal:4222".into(),
            default_startup_delay_secs: 5,
            credentials_secret_key: "creds".into(),
            ..Default::default()
        };
        let defaults = settings.to_link_defaults();

        assert_eq!(defaults.backend_url, "nats://kv.internal:4222");
        assert_eq!(defaults.startup_delay_secs, 5);
        assert_eq!(defaults.credentials_key, "creds");
    }

    #[test]
    fn test_validation_failures() {
        let timeout = BridgeSettings {
            delivery_timeout_secs: 0,
            ..Default::default()
        };
        assert!(timeout.validate().is_err());

        let format = BridgeSettings {
            log_format: "xml".into(),
            ..Default::default()
        };
        assert!(format.validate().is_err());

        let url = BridgeSettings {
            rpc_url: "localhost:4222".into(),
            ..Default::default()
        };
        assert!(url.validate().is_err());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let settings: BridgeSettings =
            serde_json::from_str(r#"{"log_format": "pretty"}"#).unwrap();
        assert_eq!(settings.log_format, "pretty");
        assert_eq!(settings.default_startup_delay_secs, 30);
    }
}
