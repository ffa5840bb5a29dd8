//! Connection watcher
//!
//! BlueZ does not call the GATT application on link changes, so the watcher
//! polls the adapter's devices and reports connects and disconnects to the
//! dispatcher. Requests often arrive before the next poll; the request
//! closures and the watcher share one [`LinkHandles`] table so both report
//! the same handle for a link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bluer::Adapter;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error};

use crate::device::{DeviceAddress, LinkHandle};
use crate::dispatcher::{GattDispatcher, GattServerCallbacks, LinkState};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Link handles of the remotes currently connected to the adapter
#[derive(Debug, Default)]
pub(super) struct LinkHandles {
    next: AtomicU64,
    handles: DashMap<DeviceAddress, LinkHandle>,
}

impl LinkHandles {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Handle of the link to `address`, assigned on first sight. The flag
    /// is true when the handle was just assigned.
    pub(super) fn assign(&self, address: &DeviceAddress) -> (LinkHandle, bool) {
        match self.handles.entry(address.clone()) {
            Entry::Occupied(entry) => (*entry.get(), false),
            Entry::Vacant(entry) => {
                let handle = LinkHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
                entry.insert(handle);
                (handle, true)
            }
        }
    }

    pub(super) fn release(&self, address: &DeviceAddress) -> Option<LinkHandle> {
        self.handles.remove(address).map(|(_, handle)| handle)
    }

    pub(super) fn addresses(&self) -> Vec<DeviceAddress> {
        self.handles.iter().map(|entry| entry.key().clone()).collect()
    }
}

pub(super) async fn watch_connections(
    adapter: Adapter,
    dispatcher: Arc<GattDispatcher>,
    handles: Arc<LinkHandles>,
) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        // Links assigned by a request after this point are not judged this round
        let known = handles.addresses();

        let addresses = match adapter.device_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                error!("Failed to query device addresses: {}", e);
                continue;
            }
        };

        let mut now_connected = Vec::new();
        for address in addresses {
            let Ok(device) = adapter.device(address) else {
                continue;
            };
            match device.is_connected().await {
                Ok(true) => now_connected.push(DeviceAddress::new(address.to_string())),
                Ok(false) => {}
                Err(e) => debug!("Failed to query connection state for {}: {}", address, e),
            }
        }

        for address in &now_connected {
            let (handle, assigned) = handles.assign(address);
            if assigned {
                dispatcher.on_connection_state_change(address, handle, LinkState::Connected);
            }
        }

        for address in known.iter().filter(|address| !now_connected.contains(address)) {
            if let Some(handle) = handles.release(address) {
                dispatcher.on_connection_state_change(address, handle, LinkState::Disconnected);
            }
        }
    }
}
