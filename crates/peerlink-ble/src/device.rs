//! Remote device state
//!
//! One [`RemoteDevice`] exists per link address known to the BLE layer. It
//! owns the platform link handle, the negotiated MTU, the connected and ready
//! latches, the remote's identity once learned, and the sending half of its
//! ordered writer queue. State changes go through [`DeviceState::transition`]
//! under the device's own lock, so transitions for one device are serialized
//! while other devices proceed independently.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{BridgeError, BridgeResult};
use crate::latch::Latch;
use crate::protocol::MIN_ATT_MTU;
use crate::worker::PendingWrite;

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Link address of a remote device, normalized to upper case
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Opaque platform handle of the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkHandle(pub u64);

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Peer ID and multiaddress a remote advertises
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub peer_id: Vec<u8>,
    pub multiaddr: Vec<u8>,
}

impl RemoteIdentity {
    pub fn new(peer_id: impl Into<Vec<u8>>, multiaddr: impl Into<Vec<u8>>) -> Self {
        Self {
            peer_id: peer_id.into(),
            multiaddr: multiaddr.into(),
        }
    }
}

impl fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.peer_id))
    }
}

// ----------------------------------------------------------------------------
// State Machine
// ----------------------------------------------------------------------------

/// Lifecycle of a remote device
///
/// Entries are created lazily on the first connected event, so a tracked
/// device starts at `Connected`. `Disconnected` and `Connecting` describe the
/// link before it has an entry; [`RemoteDevice::connected`] walks through
/// them once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Closed,
}

/// Events that move a device through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    LinkConnecting,
    LinkConnected,
    ReadySignal,
    CloseSignal,
    LinkDisconnected,
    HandshakeTimeout,
}

impl DeviceState {
    pub fn name(self) -> &'static str {
        match self {
            DeviceState::Disconnected => "Disconnected",
            DeviceState::Connecting => "Connecting",
            DeviceState::Connected => "Connected",
            DeviceState::Ready => "Ready",
            DeviceState::Closed => "Closed",
        }
    }

    /// Next state after `event`
    pub fn transition(self, event: DeviceEvent) -> BridgeResult<DeviceState> {
        use DeviceEvent::*;
        use DeviceState::*;

        match (self, event) {
            (Disconnected, LinkConnecting) => Ok(Connecting),
            (Disconnected | Connecting, LinkConnected) => Ok(Connected),

            // The platform may report the same link as connected more than once
            (Connecting, LinkConnecting) => Ok(Connecting),
            (Connected, LinkConnected | LinkConnecting) => Ok(Connected),
            (Ready, LinkConnected | LinkConnecting) => Ok(Ready),

            (Connected | Ready, ReadySignal) => Ok(Ready),

            (_, CloseSignal | LinkDisconnected | HandshakeTimeout) => Ok(Closed),

            (from, event) => Err(BridgeError::InvalidTransition {
                from: from.name(),
                event: format!("{:?}", event),
            }),
        }
    }

    /// Whether payload bytes may be forwarded in this state
    pub fn accepts_payload(self) -> bool {
        self == DeviceState::Ready
    }
}

// ----------------------------------------------------------------------------
// Remote Device
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct DeviceInner {
    state: DeviceState,
    mtu: u16,
    identity: Option<RemoteIdentity>,
    registered: bool,
    writes: Option<mpsc::UnboundedSender<PendingWrite>>,
}

/// A remote peer currently known to the BLE layer
#[derive(Debug)]
pub struct RemoteDevice {
    address: DeviceAddress,
    handle: LinkHandle,
    connected: Latch,
    ready: Latch,
    inner: Mutex<DeviceInner>,
    write_queue: Mutex<Option<mpsc::UnboundedReceiver<PendingWrite>>>,
}

impl RemoteDevice {
    /// Create a device for a link that just reported connected
    pub fn connected(address: DeviceAddress, handle: LinkHandle, mtu: u16) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = DeviceState::Disconnected
            .transition(DeviceEvent::LinkConnecting)
            .and_then(|s| s.transition(DeviceEvent::LinkConnected))
            .unwrap_or(DeviceState::Connected);

        let device = Self {
            address,
            handle,
            connected: Latch::new(),
            ready: Latch::new(),
            inner: Mutex::new(DeviceInner {
                state,
                mtu: mtu.max(MIN_ATT_MTU),
                identity: None,
                registered: false,
                writes: Some(tx),
            }),
            write_queue: Mutex::new(Some(rx)),
        };
        device.connected.release();
        device
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle
    }

    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == DeviceState::Closed
    }

    pub fn mtu(&self) -> u16 {
        self.inner.lock().mtu
    }

    pub fn set_mtu(&self, mtu: u16) {
        let mtu = mtu.max(MIN_ATT_MTU);
        let mut inner = self.inner.lock();
        if inner.mtu != mtu {
            debug!("MTU for {} changed {} -> {}", self.address, inner.mtu, mtu);
            inner.mtu = mtu;
        }
    }

    pub fn identity(&self) -> Option<RemoteIdentity> {
        self.inner.lock().identity.clone()
    }

    pub fn set_identity(&self, identity: RemoteIdentity) {
        let mut inner = self.inner.lock();
        if inner.identity.is_none() {
            debug!("Learned identity {} for {}", identity, self.address);
            inner.identity = Some(identity);
        }
    }

    /// Latch released once the link is connected
    pub fn connected_latch(&self) -> &Latch {
        &self.connected
    }

    /// Latch released once the remote signals ready
    pub fn ready_latch(&self) -> &Latch {
        &self.ready
    }

    /// Apply a lifecycle event and settle latches accordingly
    pub fn apply(&self, event: DeviceEvent) -> BridgeResult<DeviceState> {
        let mut inner = self.inner.lock();
        let from = inner.state;
        let to = from.transition(event)?;
        inner.state = to;

        match to {
            DeviceState::Connected => {
                self.connected.release();
            }
            DeviceState::Ready => {
                self.connected.release();
                if self.ready.release() {
                    info!("Device {} is ready", self.address);
                }
            }
            DeviceState::Closed => {
                self.connected.close();
                self.ready.close();
                // Dropping the sender lets the writer worker drain and exit
                inner.writes = None;
                if from != DeviceState::Closed {
                    info!("Device {} closed on {:?}", self.address, event);
                }
            }
            DeviceState::Disconnected | DeviceState::Connecting => {}
        }

        Ok(to)
    }

    /// Queue a write for ordered forwarding. Gives the write back if the
    /// device no longer accepts writes.
    pub fn enqueue_write(&self, write: PendingWrite) -> Result<(), PendingWrite> {
        let inner = self.inner.lock();
        match &inner.writes {
            Some(tx) if inner.state != DeviceState::Closed => tx.send(write).map_err(|e| e.0),
            _ => Err(write),
        }
    }

    /// Take the receiving half of the writer queue; only the first call gets it
    pub fn take_write_queue(&self) -> Option<mpsc::UnboundedReceiver<PendingWrite>> {
        self.write_queue.lock().take()
    }

    /// Identity to publish if the device is ready, known and not yet
    /// published. Returns it at most once per device.
    pub fn take_registration(&self) -> Option<RemoteIdentity> {
        let mut inner = self.inner.lock();
        if inner.registered || inner.state != DeviceState::Ready {
            return None;
        }
        let identity = inner.identity.clone()?;
        inner.registered = true;
        Some(identity)
    }
}
