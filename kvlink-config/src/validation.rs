// Configuration validation

use crate::{ConfigError, Result};
use std::fmt::Display;

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within an inclusive range
    pub fn in_range<T: PartialOrd + Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that a value is in a list of allowed values
    pub fn one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
        if !allowed.contains(&value) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be one of {}, got '{}'",
                field,
                allowed.join(", "),
                value
            )));
        }
        Ok(())
    }

    /// Validate that a URL uses one of the given schemes and names a host
    pub fn has_scheme(value: &str, schemes: &[&str], field: &str) -> Result<()> {
        let valid = value
            .split_once("://")
            .is_some_and(|(scheme, rest)| schemes.contains(&scheme) && !rest.is_empty());

        if !valid {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a {} URL",
                field,
                schemes.join("/")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(5, 1, 300, "field").is_ok());
        assert!(ConfigValidator::in_range(0, 1, 300, "field").is_err());

        let err = ConfigValidator::in_range(301, 1, 300, "timeout").unwrap_err();
        assert!(err.to_string().contains("between 1 and 300"));
    }

    #[test]
    fn test_one_of_validation() {
        let allowed = ["json", "pretty"];
        assert!(ConfigValidator::one_of("json", &allowed, "field").is_ok());
        assert!(ConfigValidator::one_of("xml", &allowed, "field").is_err());
    }

    #[test]
    fn test_scheme_validation() {
        let schemes = ["nats", "tls"];
        assert!(ConfigValidator::has_scheme("nats://127.0.0.1:4222", &schemes, "url").is_ok());
        assert!(ConfigValidator::has_scheme("tls://kv.internal", &schemes, "url").is_ok());
        assert!(ConfigValidator::has_scheme("http://example.com", &schemes, "url").is_err());
        assert!(ConfigValidator::has_scheme("nats://", &schemes, "url").is_err());
        assert!(ConfigValidator::has_scheme("127.0.0.1:4222", &schemes, "url").is_err());
    }
}
