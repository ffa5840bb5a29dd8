//! Error types for the BLE bridge

use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors produced by the BLE bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Failed to attach characteristic {uuid}: {reason}")]
    CharacteristicRegistration { uuid: Uuid, reason: String },

    #[error("Unknown characteristic: {uuid}")]
    UnknownCharacteristic { uuid: Uuid },

    #[error("Device not found: {address}")]
    DeviceNotFound { address: String },

    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: &'static str, event: String },

    #[error("Device closed: {address}")]
    DeviceClosed { address: String },

    #[error("Handshake timeout after {duration_ms}ms")]
    HandshakeTimeout { duration_ms: u64 },

    #[error("Failed to send GATT response: {0}")]
    ResponseFailed(String),

    #[error("Network core error: {0}")]
    Core(String),

    #[error("Invalid bridge configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("BLE platform error: {0}")]
    Platform(String),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
