//! peerlink CLI configuration
//!
//! Loaded from a TOML file; every section and field falls back to its
//! default when missing.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use peerlink_ble::{BridgeConfig, LocalAdvertisement};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// GATT bridge settings
    pub bridge: BridgeConfig,

    /// What the local node advertises
    pub identity: IdentityConfig,

    pub logging: LoggingConfig,
}

/// Values served on the peer-id and multiaddress characteristics
///
/// Plain strings are served as their UTF-8 bytes; a `0x` prefix marks a hex
/// encoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub peer_id: String,
    pub multiaddr: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            peer_id: "QmPeerlinkLocal".to_string(),
            multiaddr: "/ble/QmPeerlinkLocal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable verbose logging output
    pub verbose: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.bridge.validate()?;
        if self.identity.peer_id.is_empty() {
            return Err(CliError::Config("identity.peer_id must not be empty".to_string()));
        }
        if self.identity.multiaddr.is_empty() {
            return Err(CliError::Config("identity.multiaddr must not be empty".to_string()));
        }
        Ok(())
    }

    /// Local values for the read-only characteristics
    pub fn advertisement(&self) -> Result<LocalAdvertisement> {
        Ok(LocalAdvertisement::new(
            decode_value(&self.identity.peer_id)?,
            decode_value(&self.identity.multiaddr)?,
        ))
    }
}

fn decode_value(value: &str) -> Result<Vec<u8>> {
    match value.strip_prefix("0x") {
        Some(encoded) => Ok(hex::decode(encoded)?),
        None => Ok(value.as_bytes().to_vec()),
    }
}
