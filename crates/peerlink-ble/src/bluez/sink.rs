//! Oneshot-backed response sink

use std::sync::atomic::{AtomicU32, Ordering};

use bluer::gatt::local::ReqError;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::collaborators::{GattResponse, RequestId, ResponseSink};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::GattStatus;

/// Hands each dispatcher answer to the bluer request waiting for it
#[derive(Debug, Default)]
pub struct ChannelResponseSink {
    next_id: AtomicU32,
    waiting: DashMap<RequestId, oneshot::Sender<GattResponse>>,
}

impl ChannelResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id and the receiver its answer arrives on
    pub fn open(&self) -> (RequestId, oneshot::Receiver<GattResponse>) {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(request_id, tx);
        (request_id, rx)
    }

    /// Allocate a request id nobody waits on, for requests that are never
    /// answered
    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn pending(&self) -> usize {
        self.waiting.len()
    }
}

impl ResponseSink for ChannelResponseSink {
    fn send_response(&self, response: GattResponse) -> BridgeResult<()> {
        let request_id = response.request_id;
        let (_, tx) = self
            .waiting
            .remove(&request_id)
            .ok_or_else(|| BridgeError::ResponseFailed(format!("{} is not waiting", request_id)))?;

        // The receiver is gone when BlueZ gave up on the request
        tx.send(response)
            .map_err(|_| BridgeError::ResponseFailed(format!("{} was abandoned", request_id)))
    }
}

/// Map a dispatcher answer onto bluer's request result
pub(super) fn into_result(response: GattResponse) -> Result<Vec<u8>, ReqError> {
    match response.status {
        GattStatus::Success => Ok(response.value),
        GattStatus::ReadNotPermitted | GattStatus::WriteNotPermitted => Err(ReqError::NotPermitted),
        GattStatus::RequestNotSupported => Err(ReqError::NotSupported),
        GattStatus::InvalidOffset => Err(ReqError::InvalidOffset),
        GattStatus::Failure => Err(ReqError::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAddress;

    fn response(request_id: RequestId, status: GattStatus) -> GattResponse {
        GattResponse {
            address: DeviceAddress::new("AA:01"),
            request_id,
            status,
            offset: 0,
            value: b"v".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_answer_reaches_waiter() {
        let sink = ChannelResponseSink::new();
        let (id, rx) = sink.open();

        sink.send_response(response(id, GattStatus::Success)).unwrap();
        assert_eq!(into_result(rx.await.unwrap()).unwrap(), b"v");
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_unanswered_ids_not_waiting() {
        let sink = ChannelResponseSink::new();
        let command = sink.next_request_id();
        let (request, _rx) = sink.open();

        assert_ne!(command, request);
        assert_eq!(sink.pending(), 1);
        assert!(sink.send_response(response(command, GattStatus::Success)).is_err());
    }

    #[test]
    fn test_unknown_or_abandoned_request() {
        let sink = ChannelResponseSink::new();
        assert!(sink.send_response(response(RequestId(99), GattStatus::Success)).is_err());

        let (id, rx) = sink.open();
        drop(rx);
        assert!(matches!(
            sink.send_response(response(id, GattStatus::Failure)),
            Err(BridgeError::ResponseFailed(_))
        ));
    }
}
