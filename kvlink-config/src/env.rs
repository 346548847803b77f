// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::env;

/// Prefix of every kvlink environment variable.
pub const DEFAULT_ENV_PREFIX: &str = "KVLINK";

/// Loads prefixed environment variables as configuration keys.
///
/// `KVLINK_DELIVERY_TIMEOUT_SECS=5` becomes `delivery_timeout_secs = 5`.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a loader for variables starting with `<prefix>_`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn strip<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')
            .filter(|rest| !rest.is_empty())
    }

    /// Load every prefixed variable, coercing numbers and booleans
    pub fn load(&self) -> HashMap<String, Value> {
        env::vars()
            .filter_map(|(key, value)| {
                self.strip(&key)
                    .map(|name| (name.to_lowercase(), coerce_value(&value)))
            })
            .collect()
    }

    /// Load a single variable by its unprefixed name
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = format!("{}_{}", self.prefix, key.to_uppercase());
        env::var(&full_key).map_err(|_| ConfigError::KeyNotFound(full_key))
    }

    /// Load a single variable, falling back to `default`
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

/// Interpret an environment string as the JSON value it most likely means.
pub fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(flag) = trimmed.parse::<bool>() {
        return Value::Bool(flag);
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>()
        && float.is_finite()
    {
        return Value::from(float);
    }
    Value::String(raw.to_string())
}
