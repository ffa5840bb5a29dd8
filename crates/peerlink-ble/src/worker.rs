//! Per-device writer worker
//!
//! Writes to the writer characteristic are queued on the device and drained
//! by one task per device, so forwarding to the core keeps the order writes
//! arrived in and never blocks the platform callback thread. Each queued
//! write waits on the readiness gate before it is forwarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::collaborators::{NetworkCore, PendingResponse};
use crate::device::{DeviceEvent, RemoteDevice};
use crate::gate::{await_ready, GateOutcome};
use crate::protocol::GattStatus;

/// One writer-characteristic write waiting to be forwarded
#[derive(Debug)]
pub struct PendingWrite {
    value: Vec<u8>,
    responder: Option<PendingResponse>,
}

impl PendingWrite {
    /// `responder` is `None` for writes without response
    pub fn new(value: Vec<u8>, responder: Option<PendingResponse>) -> Self {
        Self { value, responder }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Answer the remote with `status` without forwarding
    pub fn fail(self, status: GattStatus) {
        if let Some(responder) = self.responder {
            responder.failure(status);
        }
    }

    fn forwarded(self) {
        if let Some(responder) = self.responder {
            responder.success(self.value);
        }
    }
}

/// Drains one device's writer queue
pub struct WriterWorker {
    device: Arc<RemoteDevice>,
    core: Arc<dyn NetworkCore>,
    ready_timeout: Duration,
    queue: mpsc::UnboundedReceiver<PendingWrite>,
}

impl WriterWorker {
    pub fn new(
        device: Arc<RemoteDevice>,
        core: Arc<dyn NetworkCore>,
        ready_timeout: Duration,
        queue: mpsc::UnboundedReceiver<PendingWrite>,
    ) -> Self {
        Self {
            device,
            core,
            ready_timeout,
            queue,
        }
    }

    /// Run until the device closes and the queue is drained
    pub async fn run(mut self) {
        debug!("Writer worker started for {}", self.device.address());

        while let Some(write) = self.queue.recv().await {
            match await_ready(&self.device, self.ready_timeout).await {
                GateOutcome::Ready => self.forward(write).await,
                GateOutcome::TimedOut => {
                    warn!(
                        "{} not ready after {:?}, closing",
                        self.device.address(),
                        self.ready_timeout
                    );
                    // Closing fails every write still queued behind this one
                    let _ = self.device.apply(DeviceEvent::HandshakeTimeout);
                    write.fail(GattStatus::Failure);
                }
                GateOutcome::Closed => {
                    debug!(
                        "Dropping {} byte write for closed {}",
                        write.len(),
                        self.device.address()
                    );
                    write.fail(GattStatus::Failure);
                }
            }
        }

        debug!("Writer worker stopped for {}", self.device.address());
    }

    async fn forward(&self, write: PendingWrite) {
        let handle = self.device.handle();
        match self.core.ingest_bytes(handle, write.value.clone()).await {
            Ok(()) => {
                debug!("Forwarded {} bytes on {}", write.len(), handle);
                write.forwarded();
            }
            Err(e) => {
                error!("Core rejected {} bytes on {}: {}", write.len(), handle, e);
                write.fail(GattStatus::Failure);
            }
        }
    }
}

/// Publish the device to the core's peer store if it is due
///
/// A device is due once it is ready and its identity is known. Each device is
/// published at most once; failures are logged and not retried.
pub async fn publish_peer(device: Arc<RemoteDevice>, core: Arc<dyn NetworkCore>) {
    let Some(identity) = device.take_registration() else {
        return;
    };

    match core.register_peer(identity.clone()).await {
        Ok(()) => info!("Registered peer {} at {}", identity, device.address()),
        Err(e) => error!("Failed to register peer {} at {}: {}", identity, device.address(), e),
    }
}
