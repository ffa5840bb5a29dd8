//! BlueZ GATT application and advertisement

use std::sync::Arc;

use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicRead, CharacteristicReadRequest,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, Service,
};
use bluer::gatt::WriteOp;
use bluer::Adapter;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::link::BtleplugLinkOpener;
use super::sink::{into_result, ChannelResponseSink};
use super::watcher::{watch_connections, LinkHandles};
use super::platform_error;
use crate::collaborators::{LinkOpener, NetworkCore, NoopLinkOpener};
use crate::config::BridgeConfig;
use crate::device::DeviceAddress;
use crate::dispatcher::{GattDispatcher, GattServerCallbacks, ReadRequest, WriteRequest};
use crate::error::BridgeResult;
use crate::protocol::MIN_ATT_MTU;
use crate::registry::{CharacteristicDescriptor, GattService};

/// The bridge running on the local BlueZ adapter
///
/// Dropping it unregisters the application, stops advertising and stops the
/// connection watcher.
pub struct BluezBridge {
    dispatcher: Arc<GattDispatcher>,
    adapter: Adapter,
    _app_handle: ApplicationHandle,
    _adv_handle: AdvertisementHandle,
    watcher: JoinHandle<()>,
}

impl BluezBridge {
    /// Register `service` on the default adapter and start advertising it
    pub async fn start(
        service: GattService,
        core: Arc<dyn NetworkCore>,
        config: BridgeConfig,
        local_name: Option<String>,
    ) -> BridgeResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| platform_error("BlueZ session", e))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| platform_error("BLE adapter", e))?;

        if !adapter.is_powered().await.unwrap_or(false) {
            info!("Powering on Bluetooth adapter {}", adapter.name());
            adapter
                .set_powered(true)
                .await
                .map_err(|e| platform_error("Failed to power on adapter", e))?;
        }

        let opener: Arc<dyn LinkOpener> = if config.connect_back {
            Arc::new(BtleplugLinkOpener::new().await?)
        } else {
            Arc::new(NoopLinkOpener)
        };

        let sink = Arc::new(ChannelResponseSink::new());
        let service_uuid = service.uuid;
        let dispatcher = Arc::new(
            GattDispatcher::builder(service, core, sink.clone())
                .with_config(config)
                .with_link_opener(opener)
                .build()?,
        );

        let handles = Arc::new(LinkHandles::new());
        let app = application(&dispatcher, &sink, &handles);
        let app_handle = adapter
            .serve_gatt_application(app)
            .await
            .map_err(|e| platform_error("Failed to register GATT service", e))?;
        info!("GATT service {} registered on {}", service_uuid, adapter.name());

        let advertisement = Advertisement {
            service_uuids: vec![service_uuid].into_iter().collect(),
            discoverable: Some(true),
            local_name,
            ..Default::default()
        };
        let adv_handle = adapter
            .advertise(advertisement)
            .await
            .map_err(|e| platform_error("Failed to start advertising", e))?;
        info!("Advertising service {}", service_uuid);

        let watcher = tokio::spawn(watch_connections(adapter.clone(), dispatcher.clone(), handles));

        Ok(Self {
            dispatcher,
            adapter,
            _app_handle: app_handle,
            _adv_handle: adv_handle,
            watcher,
        })
    }

    pub fn dispatcher(&self) -> &Arc<GattDispatcher> {
        &self.dispatcher
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }
}

impl Drop for BluezBridge {
    fn drop(&mut self) {
        self.watcher.abort();
        info!("Stopped GATT service on {}", self.adapter.name());
    }
}

/// BlueZ application holding the bridge service
fn application(
    dispatcher: &Arc<GattDispatcher>,
    sink: &Arc<ChannelResponseSink>,
    handles: &Arc<LinkHandles>,
) -> Application {
    let characteristics = dispatcher
        .service()
        .characteristics()
        .iter()
        .map(|descriptor| characteristic(descriptor, dispatcher, sink, handles))
        .collect();

    Application {
        services: vec![Service {
            uuid: dispatcher.service().uuid,
            primary: dispatcher.service().primary,
            characteristics,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn characteristic(
    descriptor: &CharacteristicDescriptor,
    dispatcher: &Arc<GattDispatcher>,
    sink: &Arc<ChannelResponseSink>,
    handles: &Arc<LinkHandles>,
) -> Characteristic {
    let uuid = descriptor.uuid;
    debug!("Registering {} characteristic {}", descriptor.kind.name(), uuid);

    let read = descriptor.access.read.then(|| {
        let dispatcher = dispatcher.clone();
        let sink = sink.clone();
        let handles = handles.clone();
        CharacteristicRead {
            read: true,
            fun: Box::new(move |req: CharacteristicReadRequest| {
                let dispatcher = dispatcher.clone();
                let sink = sink.clone();
                let handles = handles.clone();
                Box::pin(async move {
                    let address = DeviceAddress::new(req.device_address.to_string());
                    observe_request(&dispatcher, &handles, &address, req.mtu);

                    let (request_id, answer) = sink.open();
                    dispatcher.on_characteristic_read(ReadRequest {
                        address,
                        request_id,
                        characteristic: uuid,
                        offset: req.offset as usize,
                    });
                    into_result(answer.await.map_err(|_| ReqError::Failed)?)
                })
            }),
            ..Default::default()
        }
    });

    let write = descriptor.access.write.then(|| {
        let dispatcher = dispatcher.clone();
        let sink = sink.clone();
        let handles = handles.clone();
        CharacteristicWrite {
            write: true,
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(
                move |value: Vec<u8>, req: CharacteristicWriteRequest| {
                    let dispatcher = dispatcher.clone();
                    let sink = sink.clone();
                    let handles = handles.clone();
                    Box::pin(async move {
                        let address = DeviceAddress::new(req.device_address.to_string());
                        observe_request(&dispatcher, &handles, &address, req.mtu);

                        let mut request = WriteRequest {
                            address,
                            request_id: sink.next_request_id(),
                            characteristic: uuid,
                            offset: req.offset as usize,
                            value,
                            response_needed: !matches!(req.op_type, WriteOp::Command),
                            prepared: matches!(req.op_type, WriteOp::Reliable),
                        };

                        // Write commands are never answered
                        if !request.response_needed {
                            dispatcher.on_characteristic_write(request);
                            return Ok(());
                        }

                        let (request_id, answer) = sink.open();
                        request.request_id = request_id;
                        dispatcher.on_characteristic_write(request);
                        into_result(answer.await.map_err(|_| ReqError::Failed)?).map(|_| ())
                    })
                },
            )),
            ..Default::default()
        }
    });

    Characteristic {
        uuid,
        read,
        write,
        ..Default::default()
    }
}

/// A request proves the link is up, and BlueZ reports the negotiated MTU on
/// each request rather than as an event
fn observe_request(dispatcher: &GattDispatcher, handles: &LinkHandles, address: &DeviceAddress, mtu: u16) {
    let (handle, _) = handles.assign(address);
    dispatcher.on_link_activity(address, handle);

    if let Ok(device) = dispatcher.tracker().lookup(address) {
        if device.mtu() != mtu.max(MIN_ATT_MTU) {
            dispatcher.on_mtu_changed(address, mtu);
        }
    }
}
