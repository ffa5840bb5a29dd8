//! Interfaces to the collaborators outside the bridge
//!
//! The bridge calls into a [`NetworkCore`] with payload bytes and ready
//! peers, answers platform requests through a [`ResponseSink`], and opens the
//! client link back to new remotes through a [`LinkOpener`]. None of these
//! are implemented here beyond the in-memory versions in [`crate::memory`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::device::{DeviceAddress, LinkHandle, RemoteIdentity};
use crate::error::BridgeResult;
use crate::protocol::GattStatus;

// ----------------------------------------------------------------------------
// Network Core
// ----------------------------------------------------------------------------

/// The peer-to-peer core the bridge feeds
#[async_trait]
pub trait NetworkCore: Send + Sync {
    /// Hand bytes written by a remote to the core's inbound stream for `handle`
    async fn ingest_bytes(&self, handle: LinkHandle, bytes: Vec<u8>) -> BridgeResult<()>;

    /// Publish a ready remote to the core's peer store
    async fn register_peer(&self, identity: RemoteIdentity) -> BridgeResult<()>;
}

/// Opens the client side of the two-way link to a remote
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Connect back to `address` and read its identity if it exposes one
    async fn open_link(&self, address: &DeviceAddress) -> BridgeResult<Option<RemoteIdentity>>;
}

/// Link opener for platforms that connect back on their own
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLinkOpener;

#[async_trait]
impl LinkOpener for NoopLinkOpener {
    async fn open_link(&self, _address: &DeviceAddress) -> BridgeResult<Option<RemoteIdentity>> {
        Ok(None)
    }
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

/// Platform identifier of one read or write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Answer to one platform request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattResponse {
    pub address: DeviceAddress,
    pub request_id: RequestId,
    pub status: GattStatus,
    pub offset: usize,
    pub value: Vec<u8>,
}

/// The platform's send-response primitive
///
/// Called from callback threads and worker tasks alike, so implementations
/// must not block.
pub trait ResponseSink: Send + Sync {
    fn send_response(&self, response: GattResponse) -> BridgeResult<()>;
}

/// A request that still owes the remote an answer
///
/// Consuming the guard sends the answer. Dropping it unanswered sends a
/// failure, so no request can stall the remote's request queue.
pub struct PendingResponse {
    sink: Arc<dyn ResponseSink>,
    address: DeviceAddress,
    request_id: RequestId,
    offset: usize,
    answered: bool,
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("address", &self.address)
            .field("request_id", &self.request_id)
            .field("offset", &self.offset)
            .field("answered", &self.answered)
            .finish()
    }
}

impl PendingResponse {
    pub fn new(
        sink: Arc<dyn ResponseSink>,
        address: DeviceAddress,
        request_id: RequestId,
        offset: usize,
    ) -> Self {
        Self {
            sink,
            address,
            request_id,
            offset,
            answered: false,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Answer with success and `value`
    pub fn success(self, value: Vec<u8>) {
        self.respond(GattStatus::Success, value);
    }

    /// Answer with a non-success status and no value
    pub fn failure(self, status: GattStatus) {
        self.respond(status, Vec::new());
    }

    pub fn respond(mut self, status: GattStatus, value: Vec<u8>) {
        self.send(status, value);
    }

    fn send(&mut self, status: GattStatus, value: Vec<u8>) {
        self.answered = true;
        let response = GattResponse {
            address: self.address.clone(),
            request_id: self.request_id,
            status,
            offset: self.offset,
            value,
        };

        debug!(
            "Answering {} from {} with {:?} ({} bytes)",
            self.request_id,
            self.address,
            status,
            response.value.len()
        );
        if let Err(e) = self.sink.send_response(response) {
            warn!("Failed to answer {} from {}: {}", self.request_id, self.address, e);
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.answered {
            warn!(
                "{} from {} dropped without an answer, sending failure",
                self.request_id, self.address
            );
            self.send(GattStatus::Failure, Vec::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ResponseLog;

    fn pending(log: &Arc<ResponseLog>, id: u32) -> PendingResponse {
        PendingResponse::new(log.clone(), DeviceAddress::new("AA:00"), RequestId(id), 4)
    }

    #[test]
    fn test_answered_once() {
        let log = Arc::new(ResponseLog::new());
        pending(&log, 1).success(b"abc".to_vec());

        let responses = log.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, GattStatus::Success);
        assert_eq!(responses[0].offset, 4);
        assert_eq!(responses[0].value, b"abc");
    }

    #[test]
    fn test_drop_sends_failure() {
        let log = Arc::new(ResponseLog::new());
        drop(pending(&log, 7));

        let response = log.response_for(RequestId(7)).unwrap();
        assert_eq!(response.status, GattStatus::Failure);
        assert!(response.value.is_empty());
        assert_eq!(log.responses().len(), 1);
    }

    #[test]
    fn test_failure_carries_status() {
        let log = Arc::new(ResponseLog::new());
        pending(&log, 2).failure(GattStatus::WriteNotPermitted);
        assert_eq!(
            log.response_for(RequestId(2)).unwrap().status,
            GattStatus::WriteNotPermitted
        );
    }
}
