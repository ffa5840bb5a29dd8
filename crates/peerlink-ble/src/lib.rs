//! Bluetooth Low Energy GATT transport bridge
//!
//! This crate exposes a peer-to-peer networking core over a BLE GATT server.
//! Remotes read the local peer ID and multiaddress from fixed characteristics,
//! signal readiness, stream payload bytes through a writer characteristic and
//! close the link through a closer characteristic.
//!
//! ## Architecture
//!
//! - [`protocol`] - Service and characteristic UUIDs, ATT constants, GATT status codes
//! - [`registry`] - The characteristic registry and service builder
//! - [`device`] - Per-remote state and its lifecycle state machine
//! - [`tracker`] - Connection tracking keyed by link address
//! - [`framer`] - Offset-based read framing and MTU clamping
//! - [`gate`] - The readiness gate payload bytes wait on
//! - [`dispatcher`] - Routing of platform callbacks to handlers
//! - [`collaborators`] - Interfaces to the networking core and the platform
//! - [`memory`] - In-memory collaborators for simulation and tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peerlink_ble::{
//!     build_service, BridgeConfig, GattDispatcher, InMemoryCore, LocalAdvertisement, ResponseLog,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let local = LocalAdvertisement::new(b"QmLocalPeer".to_vec(), b"/ble/QmLocalPeer".to_vec());
//! let service = build_service(&local)?;
//!
//! let dispatcher = GattDispatcher::builder(service, Arc::new(InMemoryCore::new()), Arc::new(ResponseLog::new()))
//!     .with_config(BridgeConfig::new().with_default_mtu(185))
//!     .build()?;
//!
//! // A platform adapter now feeds callbacks through `GattServerCallbacks`
//! # let _ = dispatcher;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! With the `bluez` feature on Linux, [`bluez::BluezBridge`] serves the
//! registry through BlueZ and connects back to remotes with btleplug. Other
//! platforms drive [`GattServerCallbacks`] from their own adapter layer.

pub mod collaborators;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod gate;
pub mod latch;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod tracker;
pub mod worker;

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub mod bluez;

// Public API exports
pub use collaborators::{
    GattResponse, LinkOpener, NetworkCore, NoopLinkOpener, PendingResponse, RequestId, ResponseSink,
};
pub use config::BridgeConfig;
pub use device::{DeviceAddress, DeviceEvent, DeviceState, LinkHandle, RemoteDevice, RemoteIdentity};
pub use dispatcher::{
    DescriptorRequest, GattDispatcher, GattDispatcherBuilder, GattServerCallbacks, LinkState, ReadRequest,
    WriteRequest,
};
pub use error::{BridgeError, BridgeResult};
pub use framer::{clamp_to_mtu, frame, Fragment};
pub use gate::{await_ready, GateOutcome};
pub use latch::{Latch, LatchState, WaitOutcome};
pub use memory::{InMemoryCore, ResponseLog, StaticLinkOpener};
pub use protocol::{
    GattStatus, ACCEPT_CHARACTERISTIC_UUID, CLOSER_CHARACTERISTIC_UUID, MULTIADDR_CHARACTERISTIC_UUID,
    PEERLINK_SERVICE_UUID, PEER_ID_CHARACTERISTIC_UUID, READY_CHARACTERISTIC_UUID,
    WRITER_CHARACTERISTIC_UUID,
};
pub use registry::{build_service, Access, CharacteristicDescriptor, CharacteristicKind, GattService, LocalAdvertisement};
pub use tracker::{ConnectionTracker, Tracked};
