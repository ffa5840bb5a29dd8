//! Connection tracker
//!
//! Maps link addresses to [`RemoteDevice`] entries. Connected events may
//! arrive more than once for the same link and may race with GATT requests,
//! so creation is insert-if-absent and repeated events only re-signal the
//! existing entry. A closed entry stays closed for its link; only a connect
//! on a different link handle replaces it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::device::{DeviceAddress, DeviceEvent, LinkHandle, RemoteDevice};
use crate::error::{BridgeError, BridgeResult};

/// Result of [`ConnectionTracker::on_link_connected`]
#[derive(Debug, Clone)]
pub enum Tracked {
    /// A fresh entry was created for this connection
    Created(Arc<RemoteDevice>),
    /// The address was already tracked
    Existing(Arc<RemoteDevice>),
}

impl Tracked {
    pub fn device(&self) -> &Arc<RemoteDevice> {
        match self {
            Tracked::Created(device) | Tracked::Existing(device) => device,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Tracked::Created(_))
    }
}

/// Registry of remote devices keyed by link address
#[derive(Debug)]
pub struct ConnectionTracker {
    devices: DashMap<DeviceAddress, Arc<RemoteDevice>>,
    default_mtu: u16,
}

impl ConnectionTracker {
    pub fn new(default_mtu: u16) -> Self {
        Self {
            devices: DashMap::new(),
            default_mtu,
        }
    }

    /// Track a link that reported connected
    pub fn on_link_connected(&self, address: &DeviceAddress, handle: LinkHandle) -> Tracked {
        match self.devices.entry(address.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() && entry.get().handle() != handle {
                    // A closed entry is terminal; only a new link starts over
                    let device = Arc::new(RemoteDevice::connected(address.clone(), handle, self.default_mtu));
                    entry.insert(device.clone());
                    info!("Device {} reconnected on {}", address, handle);
                    return Tracked::Created(device);
                }

                let device = entry.get().clone();
                if let Err(e) = device.apply(DeviceEvent::LinkConnected) {
                    debug!("Ignoring repeated connect for {}: {}", address, e);
                }
                Tracked::Existing(device)
            }
            Entry::Vacant(entry) => {
                let device = Arc::new(RemoteDevice::connected(address.clone(), handle, self.default_mtu));
                entry.insert(device.clone());
                info!("Device {} connected on {}", address, handle);
                Tracked::Created(device)
            }
        }
    }

    /// Note a link that is still connecting. Entries are only created on
    /// connected, so an unknown address is ignored and a tracked one keeps
    /// its state.
    pub fn on_link_connecting(&self, address: &DeviceAddress) {
        match self.devices.get(address) {
            Some(device) => {
                if let Err(e) = device.apply(DeviceEvent::LinkConnecting) {
                    debug!("Ignoring connecting event for {}: {}", address, e);
                }
            }
            None => debug!("Link to {} connecting", address),
        }
    }

    /// Remove the entry for a disconnected link and close it, freeing waiters
    pub fn on_link_disconnected(&self, address: &DeviceAddress) -> Option<Arc<RemoteDevice>> {
        let (_, device) = self.devices.remove(address)?;
        // Closing is valid from every state
        let _ = device.apply(DeviceEvent::LinkDisconnected);
        info!("Device {} disconnected", address);
        Some(device)
    }

    /// Find the entry for `address` without blocking on any device
    pub fn lookup(&self, address: &DeviceAddress) -> BridgeResult<Arc<RemoteDevice>> {
        self.devices
            .get(address)
            .map(|device| device.clone())
            .ok_or_else(|| BridgeError::DeviceNotFound {
                address: address.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Addresses currently tracked, sorted
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let mut addresses: Vec<_> = self.devices.iter().map(|e| e.key().clone()).collect();
        addresses.sort();
        addresses
    }
}
