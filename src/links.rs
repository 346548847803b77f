//! Static link definitions
//!
//! Lets the binary stand in for a host: a TOML file lists the links to apply
//! at startup.
//!
//! ```toml
//! [[links]]
//! direction = "inbound"
//! source_id = "svc-1"
//! target = "kvlink"
//!
//! [links.config]
//! bucket = "stuff"
//!
//! [[links]]
//! direction = "outbound"
//! source_id = "kvlink"
//! target = "watcher"
//!
//! [links.config]
//! bucket = "stuff"
//! startup_time = "5"
//! ```

use kvlink_core::{LinkDefinition, LinkDirection, TenantIdentity};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors reading a links file
#[derive(Error, Debug)]
pub enum LinksError {
    #[error("Failed to read links file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse links file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct LinksFile {
    #[serde(default)]
    links: Vec<StaticLink>,
}

/// One link as written in a links file.
#[derive(Debug, Deserialize)]
pub struct StaticLink {
    pub direction: LinkDirection,
    pub source_id: TenantIdentity,
    pub target: TenantIdentity,
    /// Defaults to the interface the direction requires
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

impl From<StaticLink> for LinkDefinition {
    fn from(link: StaticLink) -> Self {
        let mut definition = LinkDefinition::new(link.direction, link.source_id, link.target);

        if link.interfaces.is_empty() {
            definition = definition.with_interface(link.direction.interface());
        } else {
            definition.interfaces = link.interfaces;
        }

        definition.config = link.config;
        for (key, value) in link.secrets {
            definition = definition.with_secret(key, value);
        }
        definition
    }
}

/// Parse link definitions from TOML text
pub fn parse_links(content: &str) -> Result<Vec<LinkDefinition>, LinksError> {
    let file: LinksFile = toml::from_str(content)?;
    Ok(file.links.into_iter().map(LinkDefinition::from).collect())
}

/// Read link definitions from a TOML file
pub fn load_links(path: impl AsRef<Path>) -> Result<Vec<LinkDefinition>, LinksError> {
    let content = std::fs::read_to_string(path)?;
    parse_links(&content)
}
