//! In-memory collaborators
//!
//! Record what the bridge hands to the core and the platform so the CLI
//! simulator and the tests can observe it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::collaborators::{GattResponse, LinkOpener, NetworkCore, RequestId, ResponseSink};
use crate::device::{DeviceAddress, LinkHandle, RemoteIdentity};
use crate::error::{BridgeError, BridgeResult};

/// Wait on `notify` until `done` holds or `timeout` elapses
async fn wait_until(notify: &Notify, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        // Created before the check so a notification in between is not lost
        let notified = notify.notified();
        if done() {
            return true;
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return done();
        }
    }
}

// ----------------------------------------------------------------------------
// Network Core
// ----------------------------------------------------------------------------

/// Core that records ingested chunks and registered peers
#[derive(Debug, Default)]
pub struct InMemoryCore {
    ingested: Mutex<Vec<(LinkHandle, Vec<u8>)>>,
    registered: Mutex<Vec<RemoteIdentity>>,
    fail_ingest: AtomicBool,
    changed: Notify,
}

impl InMemoryCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `ingest_bytes` call fail
    pub fn set_fail_ingest(&self, fail: bool) {
        self.fail_ingest.store(fail, Ordering::SeqCst);
    }

    /// Ingested chunks in the order they arrived
    pub fn ingested(&self) -> Vec<(LinkHandle, Vec<u8>)> {
        self.ingested.lock().clone()
    }

    /// Concatenated stream ingested for one link
    pub fn ingested_bytes(&self, handle: LinkHandle) -> Vec<u8> {
        self.ingested
            .lock()
            .iter()
            .filter(|(h, _)| *h == handle)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    pub fn registered(&self) -> Vec<RemoteIdentity> {
        self.registered.lock().clone()
    }

    pub async fn wait_for_ingested(&self, chunks: usize, timeout: Duration) -> bool {
        wait_until(&self.changed, timeout, || self.ingested.lock().len() >= chunks).await
    }

    pub async fn wait_for_registered(&self, peers: usize, timeout: Duration) -> bool {
        wait_until(&self.changed, timeout, || self.registered.lock().len() >= peers).await
    }
}

#[async_trait]
impl NetworkCore for InMemoryCore {
    async fn ingest_bytes(&self, handle: LinkHandle, bytes: Vec<u8>) -> BridgeResult<()> {
        if self.fail_ingest.load(Ordering::SeqCst) {
            return Err(BridgeError::Core(format!("ingest refused on {}", handle)));
        }

        debug!("Core ingested {} bytes on {}", bytes.len(), handle);
        self.ingested.lock().push((handle, bytes));
        self.changed.notify_waiters();
        Ok(())
    }

    async fn register_peer(&self, identity: RemoteIdentity) -> BridgeResult<()> {
        debug!("Core registered peer {}", identity);
        self.registered.lock().push(identity);
        self.changed.notify_waiters();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Response Log
// ----------------------------------------------------------------------------

/// Response sink that keeps every answer
#[derive(Debug, Default)]
pub struct ResponseLog {
    responses: Mutex<Vec<GattResponse>>,
    changed: Notify,
}

impl ResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responses(&self) -> Vec<GattResponse> {
        self.responses.lock().clone()
    }

    pub fn response_for(&self, request_id: RequestId) -> Option<GattResponse> {
        self.responses
            .lock()
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    /// Wait for the answer to `request_id`
    pub async fn wait_for(&self, request_id: RequestId, timeout: Duration) -> Option<GattResponse> {
        wait_until(&self.changed, timeout, || self.response_for(request_id).is_some()).await;
        self.response_for(request_id)
    }
}

impl ResponseSink for ResponseLog {
    fn send_response(&self, response: GattResponse) -> BridgeResult<()> {
        self.responses.lock().push(response);
        self.changed.notify_waiters();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Link Opener
// ----------------------------------------------------------------------------

/// Link opener that answers from a fixed table of identities
#[derive(Debug, Default)]
pub struct StaticLinkOpener {
    identities: DashMap<DeviceAddress, RemoteIdentity>,
}

impl StaticLinkOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, address: DeviceAddress, identity: RemoteIdentity) -> Self {
        self.identities.insert(address, identity);
        self
    }
}

#[async_trait]
impl LinkOpener for StaticLinkOpener {
    async fn open_link(&self, address: &DeviceAddress) -> BridgeResult<Option<RemoteIdentity>> {
        Ok(self.identities.get(address).map(|identity| identity.clone()))
    }
}
