//! GATT request dispatcher
//!
//! The platform adapter translates its callbacks into calls on the
//! [`GattServerCallbacks`] table, which [`GattDispatcher`] implements. Reads
//! are answered on the calling thread. Writer payloads are handed to the
//! device's worker task; everything else is answered inline. Every request
//! that carries a request id is answered exactly once.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{LinkOpener, NetworkCore, NoopLinkOpener, PendingResponse, RequestId, ResponseSink};
use crate::config::BridgeConfig;
use crate::device::{DeviceAddress, DeviceEvent, LinkHandle, RemoteDevice, RemoteIdentity};
use crate::error::{BridgeError, BridgeResult};
use crate::framer::{clamp_to_mtu, frame};
use crate::protocol::GattStatus;
use crate::registry::{CharacteristicKind, GattService};
use crate::tracker::{ConnectionTracker, Tracked};
use crate::worker::{publish_peer, PendingWrite, WriterWorker};

// ----------------------------------------------------------------------------
// Callback Table
// ----------------------------------------------------------------------------

/// Link state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Remote read of a characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: DeviceAddress,
    pub request_id: RequestId,
    pub characteristic: Uuid,
    pub offset: usize,
}

/// Remote write to a characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub address: DeviceAddress,
    pub request_id: RequestId,
    pub characteristic: Uuid,
    pub offset: usize,
    pub value: Vec<u8>,
    pub response_needed: bool,
    /// Part of a queued (prepared) write
    pub prepared: bool,
}

/// Remote read or write of a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRequest {
    pub address: DeviceAddress,
    pub request_id: RequestId,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
    pub offset: usize,
    pub response_needed: bool,
}

/// Callbacks a GATT server platform delivers
///
/// Implementations are invoked on platform threads and must not block them.
pub trait GattServerCallbacks: Send + Sync {
    fn on_connection_state_change(&self, address: &DeviceAddress, handle: LinkHandle, state: LinkState);
    fn on_characteristic_read(&self, request: ReadRequest);
    fn on_characteristic_write(&self, request: WriteRequest);
    fn on_descriptor_read(&self, request: DescriptorRequest);
    fn on_descriptor_write(&self, request: DescriptorRequest);
    fn on_execute_write(&self, address: &DeviceAddress, request_id: RequestId, execute: bool);
    fn on_mtu_changed(&self, address: &DeviceAddress, mtu: u16);
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Builder for [`GattDispatcher`]
pub struct GattDispatcherBuilder {
    service: GattService,
    core: Arc<dyn NetworkCore>,
    sink: Arc<dyn ResponseSink>,
    opener: Arc<dyn LinkOpener>,
    config: BridgeConfig,
    runtime: Option<Handle>,
}

impl GattDispatcherBuilder {
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_link_opener(mut self, opener: Arc<dyn LinkOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Runtime that worker and connect-back tasks are spawned on. Defaults to
    /// the runtime `build` is called from.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> BridgeResult<GattDispatcher> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| BridgeError::Platform(e.to_string()))?,
        };

        Ok(GattDispatcher {
            tracker: ConnectionTracker::new(self.config.default_mtu),
            service: Arc::new(self.service),
            core: self.core,
            sink: self.sink,
            opener: self.opener,
            config: self.config,
            runtime,
        })
    }
}

/// Routes platform callbacks to characteristic handlers and device state
pub struct GattDispatcher {
    service: Arc<GattService>,
    tracker: ConnectionTracker,
    core: Arc<dyn NetworkCore>,
    sink: Arc<dyn ResponseSink>,
    opener: Arc<dyn LinkOpener>,
    config: BridgeConfig,
    runtime: Handle,
}

impl GattDispatcher {
    pub fn builder(
        service: GattService,
        core: Arc<dyn NetworkCore>,
        sink: Arc<dyn ResponseSink>,
    ) -> GattDispatcherBuilder {
        GattDispatcherBuilder {
            service,
            core,
            sink,
            opener: Arc::new(NoopLinkOpener),
            config: BridgeConfig::default(),
            runtime: None,
        }
    }

    pub fn service(&self) -> &GattService {
        &self.service
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Record an identity learned outside connect-back and publish the
    /// device if it is already ready
    pub fn on_remote_identity(&self, address: &DeviceAddress, identity: RemoteIdentity) -> BridgeResult<()> {
        let device = self.tracker.lookup(address)?;
        device.set_identity(identity);
        self.spawn_publish(device);
        Ok(())
    }

    /// Treat a request from `address` as proof its link is up
    ///
    /// Platforms that learn about connections later than the requests on
    /// them call this before dispatching each request, so a remote that
    /// connects and signals ready at once is tracked before the ready write
    /// is handled. Tracked addresses are left alone.
    pub fn on_link_activity(&self, address: &DeviceAddress, handle: LinkHandle) {
        if self.tracker.lookup(address).is_err() {
            debug!("Request from untracked {} on {}, treating link as connected", address, handle);
            self.on_connection_state_change(address, handle, LinkState::Connected);
        }
    }

    fn pending(&self, address: &DeviceAddress, request_id: RequestId, offset: usize) -> PendingResponse {
        PendingResponse::new(self.sink.clone(), address.clone(), request_id, offset)
    }

    fn on_created(&self, device: Arc<RemoteDevice>) {
        if let Some(queue) = device.take_write_queue() {
            let worker = WriterWorker::new(device.clone(), self.core.clone(), self.config.ready_timeout, queue);
            self.runtime.spawn(worker.run());
        }

        if self.config.connect_back {
            let opener = self.opener.clone();
            let core = self.core.clone();
            self.runtime.spawn(async move {
                match opener.open_link(device.address()).await {
                    Ok(Some(identity)) => {
                        device.set_identity(identity);
                        publish_peer(device, core).await;
                    }
                    Ok(None) => debug!("No identity read back from {}", device.address()),
                    Err(e) => warn!("Connect-back to {} failed: {}", device.address(), e),
                }
            });
        }
    }

    fn spawn_publish(&self, device: Arc<RemoteDevice>) {
        self.runtime.spawn(publish_peer(device, self.core.clone()));
    }

    /// Bytes a read of `kind` returns before framing
    fn read_value(&self, kind: CharacteristicKind) -> &[u8] {
        match kind {
            CharacteristicKind::PeerId | CharacteristicKind::Multiaddress => {
                self.service.value_of(kind).unwrap_or_default()
            }
            _ => &[],
        }
    }

    fn handle_write(&self, kind: CharacteristicKind, request: WriteRequest, responder: Option<PendingResponse>) {
        let address = &request.address;

        match kind {
            CharacteristicKind::Accept => {
                debug!("Accept write from {} ({} bytes)", address, request.value.len());
                answer(responder, GattStatus::Success);
            }
            CharacteristicKind::Writer => {
                let device = match self.tracker.lookup(address) {
                    Ok(device) => device,
                    Err(e) => {
                        warn!("Writer write rejected: {}", e);
                        return answer(responder, GattStatus::Failure);
                    }
                };

                debug!("Queueing {} bytes from {}", request.value.len(), address);
                if let Err(write) = device.enqueue_write(PendingWrite::new(request.value, responder)) {
                    warn!("Writer write from closed {} rejected", address);
                    write.fail(GattStatus::Failure);
                }
            }
            CharacteristicKind::ReadySignal => {
                let device = match self.tracker.lookup(address) {
                    Ok(device) => device,
                    Err(e) => {
                        warn!("Ready signal rejected: {}", e);
                        return answer(responder, GattStatus::Failure);
                    }
                };

                match device.apply(DeviceEvent::ReadySignal) {
                    Ok(_) => {
                        answer(responder, GattStatus::Success);
                        self.spawn_publish(device);
                    }
                    Err(e) => {
                        warn!("Ready signal from {} rejected: {}", address, e);
                        answer(responder, GattStatus::Failure);
                    }
                }
            }
            CharacteristicKind::Closer => match self.tracker.lookup(address) {
                Ok(device) => {
                    let _ = device.apply(DeviceEvent::CloseSignal);
                    answer(responder, GattStatus::Success);
                }
                Err(e) => {
                    warn!("Close signal rejected: {}", e);
                    answer(responder, GattStatus::Failure);
                }
            },
            CharacteristicKind::Multiaddress | CharacteristicKind::PeerId => {
                answer(responder, GattStatus::WriteNotPermitted);
            }
        }
    }
}

/// Answer a request that may not want a response
fn answer(responder: Option<PendingResponse>, status: GattStatus) {
    if let Some(responder) = responder {
        responder.respond(status, Vec::new());
    }
}

impl GattServerCallbacks for GattDispatcher {
    fn on_connection_state_change(&self, address: &DeviceAddress, handle: LinkHandle, state: LinkState) {
        debug!("Link {} ({}) state {:?}", address, handle, state);
        match state {
            LinkState::Connecting => self.tracker.on_link_connecting(address),
            LinkState::Connected => {
                if let Tracked::Created(device) = self.tracker.on_link_connected(address, handle) {
                    self.on_created(device);
                }
            }
            LinkState::Disconnecting => {}
            LinkState::Disconnected => {
                self.tracker.on_link_disconnected(address);
            }
        }
    }

    fn on_characteristic_read(&self, request: ReadRequest) {
        let responder = self.pending(&request.address, request.request_id, request.offset);

        let Some(descriptor) = self.service.characteristic(request.characteristic) else {
            warn!(
                "Read of unknown characteristic {} from {}",
                request.characteristic, request.address
            );
            return responder.failure(GattStatus::Failure);
        };
        if !descriptor.access.read {
            warn!("Read of write-only {} from {}", descriptor.kind.name(), request.address);
            return responder.failure(GattStatus::ReadNotPermitted);
        }

        let value = self.read_value(descriptor.kind);
        let mut fragment = frame(value, request.offset);
        if self.config.clamp_read_fragments {
            let mtu = self
                .tracker
                .lookup(&request.address)
                .map(|device| device.mtu())
                .unwrap_or(self.config.default_mtu);
            fragment = clamp_to_mtu(fragment, mtu);
        }

        if fragment.past_end {
            debug!(
                "Read of {} at offset {} past end ({} bytes)",
                descriptor.kind.name(),
                request.offset,
                value.len()
            );
        }
        responder.success(fragment.body.to_vec());
    }

    fn on_characteristic_write(&self, request: WriteRequest) {
        let responder = request
            .response_needed
            .then(|| self.pending(&request.address, request.request_id, request.offset));

        let Some(kind) = self
            .service
            .characteristic(request.characteristic)
            .map(|descriptor| descriptor.kind)
        else {
            warn!(
                "Write to unknown characteristic {} from {}",
                request.characteristic, request.address
            );
            return answer(responder, GattStatus::Failure);
        };

        if request.prepared {
            debug!("Prepared write to {} from {} not supported", kind.name(), request.address);
            return answer(responder, GattStatus::RequestNotSupported);
        }

        self.handle_write(kind, request, responder);
    }

    fn on_descriptor_read(&self, request: DescriptorRequest) {
        debug!("Descriptor read {} from {}", request.descriptor, request.address);
        self.pending(&request.address, request.request_id, request.offset)
            .failure(GattStatus::RequestNotSupported);
    }

    fn on_descriptor_write(&self, request: DescriptorRequest) {
        debug!("Descriptor write {} from {}", request.descriptor, request.address);
        if request.response_needed {
            self.pending(&request.address, request.request_id, request.offset)
                .failure(GattStatus::RequestNotSupported);
        }
    }

    fn on_execute_write(&self, address: &DeviceAddress, request_id: RequestId, execute: bool) {
        // Prepared writes are refused, so nothing is ever pending
        debug!("Execute write ({}) from {}", execute, address);
        self.pending(address, request_id, 0).success(Vec::new());
    }

    fn on_mtu_changed(&self, address: &DeviceAddress, mtu: u16) {
        match self.tracker.lookup(address) {
            Ok(device) => {
                device.set_mtu(mtu);
                info!("MTU for {} is now {}", address, device.mtu());
            }
            Err(_) => debug!("MTU {} reported for untracked {}", mtu, address),
        }
    }
}
