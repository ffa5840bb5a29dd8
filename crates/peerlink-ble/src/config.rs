//! BLE bridge configuration

use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{MAX_ATT_MTU, MIN_ATT_MTU};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the GATT bridge
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum time a queued write waits for the remote's ready signal
    pub ready_timeout: Duration,
    /// ATT MTU assumed until the link reports a negotiated value
    pub default_mtu: u16,
    /// Trim read fragments to what fits in one response
    pub clamp_read_fragments: bool,
    /// Open the client link back to a newly connected remote
    pub connect_back: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            // Stays under the 25s D-Bus method timeout of BlueZ
            ready_timeout: Duration::from_secs(20),
            default_mtu: MIN_ATT_MTU,
            clamp_read_fragments: true,
            connect_back: true,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the readiness timeout
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the MTU assumed before negotiation
    pub fn with_default_mtu(mut self, mtu: u16) -> Self {
        self.default_mtu = mtu;
        self
    }

    /// Enable or disable read fragment clamping
    pub fn with_clamp_read_fragments(mut self, enabled: bool) -> Self {
        self.clamp_read_fragments = enabled;
        self
    }

    /// Enable or disable connect-back on first connection
    pub fn with_connect_back(mut self, enabled: bool) -> Self {
        self.connect_back = enabled;
        self
    }

    /// Check the configuration for values the bridge cannot run with
    pub fn validate(&self) -> BridgeResult<()> {
        if self.ready_timeout.is_zero() {
            return Err(BridgeError::InvalidConfiguration {
                reason: "ready_timeout must be greater than zero".to_string(),
            });
        }
        if !(MIN_ATT_MTU..=MAX_ATT_MTU).contains(&self.default_mtu) {
            return Err(BridgeError::InvalidConfiguration {
                reason: format!(
                    "default_mtu {} outside {}..={}",
                    self.default_mtu, MIN_ATT_MTU, MAX_ATT_MTU
                ),
            });
        }
        Ok(())
    }
}
