//! End-to-end scenarios for the GATT bridge
//!
//! These tests drive the dispatcher through its callback table the way a
//! platform adapter would, with the in-memory core, response log and link
//! opener standing in for the networking core and the BLE stack.

use std::sync::Arc;
use std::time::Duration;

use peerlink_ble::*;

const WAIT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Test Harness
// ----------------------------------------------------------------------------

struct Harness {
    dispatcher: GattDispatcher,
    core: Arc<InMemoryCore>,
    log: Arc<ResponseLog>,
    next_request: u32,
}

impl Harness {
    fn new(config: BridgeConfig, opener: StaticLinkOpener) -> Self {
        let local = LocalAdvertisement::new(b"QmLocalPeer".to_vec(), b"/ble/QmLocalPeer".to_vec());
        let service = build_service(&local).unwrap();
        let core = Arc::new(InMemoryCore::new());
        let log = Arc::new(ResponseLog::new());

        let dispatcher = GattDispatcher::builder(service, core.clone(), log.clone())
            .with_config(config)
            .with_link_opener(Arc::new(opener))
            .build()
            .unwrap();

        Self {
            dispatcher,
            core,
            log,
            next_request: 0,
        }
    }

    fn with_defaults() -> Self {
        Self::new(BridgeConfig::new().with_connect_back(false), StaticLinkOpener::new())
    }

    fn connect(&self, address: &str, handle: u64) {
        self.dispatcher.on_connection_state_change(
            &DeviceAddress::new(address),
            LinkHandle(handle),
            LinkState::Connected,
        );
    }

    fn disconnect(&self, address: &str, handle: u64) {
        self.dispatcher.on_connection_state_change(
            &DeviceAddress::new(address),
            LinkHandle(handle),
            LinkState::Disconnected,
        );
    }

    fn write(&mut self, address: &str, kind: CharacteristicKind, value: &[u8]) -> RequestId {
        self.next_request += 1;
        let request_id = RequestId(self.next_request);
        self.dispatcher.on_characteristic_write(WriteRequest {
            address: DeviceAddress::new(address),
            request_id,
            characteristic: kind.uuid(),
            offset: 0,
            value: value.to_vec(),
            response_needed: true,
            prepared: false,
        });
        request_id
    }

    /// Write command: forwarded like a write request but never answered
    fn write_command(&mut self, address: &str, value: &[u8]) -> RequestId {
        self.next_request += 1;
        let request_id = RequestId(self.next_request);
        self.dispatcher.on_characteristic_write(WriteRequest {
            address: DeviceAddress::new(address),
            request_id,
            characteristic: CharacteristicKind::Writer.uuid(),
            offset: 0,
            value: value.to_vec(),
            response_needed: false,
            prepared: false,
        });
        request_id
    }

    fn read(&mut self, address: &str, kind: CharacteristicKind, offset: usize) -> GattResponse {
        self.next_request += 1;
        let request_id = RequestId(self.next_request);
        self.dispatcher.on_characteristic_read(ReadRequest {
            address: DeviceAddress::new(address),
            request_id,
            characteristic: kind.uuid(),
            offset,
        });
        // Reads are answered before the callback returns
        self.log.response_for(request_id).unwrap()
    }

    async fn answer(&self, request_id: RequestId) -> GattResponse {
        self.log.wait_for(request_id, WAIT).await.unwrap()
    }

    fn device(&self, address: &str) -> Arc<RemoteDevice> {
        self.dispatcher
            .tracker()
            .lookup(&DeviceAddress::new(address))
            .unwrap()
    }
}

fn identity(name: &str) -> RemoteIdentity {
    RemoteIdentity::new(name.as_bytes().to_vec(), format!("/ble/{}", name).into_bytes())
}

// ----------------------------------------------------------------------------
// Handshake and Forwarding
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_writes_before_ready_are_held_then_forwarded_in_order() {
    let address = "AA:BB:CC:00:00:0A";
    let opener = StaticLinkOpener::new().with_identity(DeviceAddress::new(address), identity("QmRemoteA"));
    let mut harness = Harness::new(BridgeConfig::new(), opener);
    harness.connect(address, 10);

    let payload: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
    let writes: Vec<_> = payload
        .chunks(200)
        .map(|chunk| harness.write(address, CharacteristicKind::Writer, chunk))
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.core.ingested().is_empty());
    assert!(harness.core.registered().is_empty());
    assert!(harness.log.response_for(writes[0]).is_none());

    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    assert_eq!(harness.answer(ready).await.status, GattStatus::Success);

    assert!(harness.core.wait_for_ingested(3, WAIT).await);
    assert_eq!(harness.core.ingested_bytes(LinkHandle(10)), payload);
    for (write, chunk) in writes.iter().zip(payload.chunks(200)) {
        let response = harness.answer(*write).await;
        assert_eq!(response.status, GattStatus::Success);
        assert_eq!(response.value, chunk);
    }

    assert!(harness.core.wait_for_registered(1, WAIT).await);
    assert_eq!(harness.core.registered(), vec![identity("QmRemoteA")]);
}

#[tokio::test]
async fn test_registration_happens_once_and_only_after_ready() {
    let address = "AA:BB:CC:00:00:0B";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 11);

    harness
        .dispatcher
        .on_remote_identity(&DeviceAddress::new(address), identity("QmRemoteB"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.core.registered().is_empty());

    for _ in 0..3 {
        let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
        assert_eq!(harness.answer(ready).await.status, GattStatus::Success);
    }
    harness.connect(address, 11);

    assert!(harness.core.wait_for_registered(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.core.registered().len(), 1);
}

#[tokio::test]
async fn test_identity_learned_after_ready_registers() {
    let address = "AA:BB:CC:00:00:0C";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 12);

    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    harness.answer(ready).await;
    assert!(!harness.core.wait_for_registered(1, Duration::from_millis(20)).await);

    harness
        .dispatcher
        .on_remote_identity(&DeviceAddress::new(address), identity("QmRemoteC"))
        .unwrap();
    assert!(harness.core.wait_for_registered(1, WAIT).await);
}

// ----------------------------------------------------------------------------
// Closure and Timeouts
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_releases_blocked_write() {
    let address = "AA:BB:CC:00:00:0D";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 13);

    let write = harness.write(address, CharacteristicKind::Writer, b"stalled");
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.disconnect(address, 13);

    let response = harness.answer(write).await;
    assert_eq!(response.status, GattStatus::Failure);
    assert!(harness.core.ingested().is_empty());
    assert!(harness.dispatcher.tracker().is_empty());
}

#[tokio::test]
async fn test_writes_after_close_are_never_forwarded() {
    let address = "AA:BB:CC:00:00:0E";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 14);

    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    harness.answer(ready).await;
    let close = harness.write(address, CharacteristicKind::Closer, &[1]);
    assert_eq!(harness.answer(close).await.status, GattStatus::Success);
    assert_eq!(harness.device(address).state(), DeviceState::Closed);

    let write = harness.write(address, CharacteristicKind::Writer, b"too late");
    assert_eq!(harness.answer(write).await.status, GattStatus::Failure);

    // A closed device cannot become ready again
    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    assert_eq!(harness.answer(ready).await.status, GattStatus::Failure);
    assert!(harness.core.ingested().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_fails_write_and_closes_device() {
    let address = "AA:BB:CC:00:00:0F";
    let config = BridgeConfig::new()
        .with_connect_back(false)
        .with_ready_timeout(Duration::from_secs(2));
    let mut harness = Harness::new(config, StaticLinkOpener::new());
    harness.connect(address, 15);

    let first = harness.write(address, CharacteristicKind::Writer, b"one");
    let second = harness.write(address, CharacteristicKind::Writer, b"two");

    assert_eq!(harness.answer(first).await.status, GattStatus::Failure);
    assert_eq!(harness.answer(second).await.status, GattStatus::Failure);
    assert_eq!(harness.device(address).state(), DeviceState::Closed);

    let third = harness.write(address, CharacteristicKind::Writer, b"three");
    assert_eq!(harness.answer(third).await.status, GattStatus::Failure);
    assert!(harness.core.ingested().is_empty());
}

#[tokio::test]
async fn test_write_commands_forwarded_without_answer() {
    let address = "AA:BB:CC:00:00:15";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 5);
    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    harness.answer(ready).await;

    let command = harness.write_command(address, b"no-reply");
    assert!(harness.core.wait_for_ingested(1, WAIT).await);
    assert_eq!(harness.core.ingested_bytes(LinkHandle(5)), b"no-reply");
    assert!(harness.log.response_for(command).is_none());
}

#[tokio::test]
async fn test_unknown_device_write_fails() {
    let mut harness = Harness::with_defaults();
    let write = harness.write("AA:BB:CC:00:00:99", CharacteristicKind::Writer, b"who");
    assert_eq!(harness.answer(write).await.status, GattStatus::Failure);
}

// ----------------------------------------------------------------------------
// Connection Tracking
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_repeated_connected_events_keep_one_device() {
    let address = "AA:BB:CC:00:00:10";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 16);
    let first = harness.device(address);
    harness.connect(address, 16);
    harness.connect(address, 16);

    assert_eq!(harness.dispatcher.tracker().len(), 1);
    assert!(Arc::ptr_eq(&first, &harness.device(address)));
    assert_eq!(first.connected_latch().state(), LatchState::Released);

    // One worker drains the queue; every write is forwarded exactly once
    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    harness.answer(ready).await;
    let write = harness.write(address, CharacteristicKind::Writer, b"once");
    harness.answer(write).await;
    assert_eq!(harness.core.ingested().len(), 1);
}

#[tokio::test]
async fn test_reconnect_after_close_starts_fresh() {
    let address = "AA:BB:CC:00:00:11";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 17);
    let close = harness.write(address, CharacteristicKind::Closer, &[1]);
    harness.answer(close).await;

    harness.connect(address, 18);
    let device = harness.device(address);
    assert_eq!(device.state(), DeviceState::Connected);
    assert_eq!(device.handle(), LinkHandle(18));

    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    harness.answer(ready).await;
    let write = harness.write(address, CharacteristicKind::Writer, b"again");
    assert_eq!(harness.answer(write).await.status, GattStatus::Success);
    assert_eq!(harness.core.ingested_bytes(LinkHandle(18)), b"again");
}

#[tokio::test]
async fn test_repeated_connect_on_closed_link_stays_closed() {
    let address = "AA:BB:CC:00:00:12";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 1);
    let close = harness.write(address, CharacteristicKind::Closer, &[1]);
    assert_eq!(harness.answer(close).await.status, GattStatus::Success);
    let closed = harness.device(address);

    // The platform repeats the connected event for the same link
    harness.connect(address, 1);
    assert!(Arc::ptr_eq(&closed, &harness.device(address)));
    assert_eq!(closed.state(), DeviceState::Closed);

    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    assert_eq!(harness.answer(ready).await.status, GattStatus::Failure);
    let write = harness.write(address, CharacteristicKind::Writer, b"after-close");
    assert_eq!(harness.answer(write).await.status, GattStatus::Failure);
    assert!(harness.core.ingested().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ready_write_before_connected_event() {
    let address = "AA:BB:CC:00:00:13";
    let config = BridgeConfig::new()
        .with_connect_back(false)
        .with_ready_timeout(Duration::from_secs(2));
    let mut harness = Harness::new(config, StaticLinkOpener::new());

    // The adapter sees the ready request before its connection poll runs
    harness
        .dispatcher
        .on_link_activity(&DeviceAddress::new(address), LinkHandle(1));
    let ready = harness.write(address, CharacteristicKind::ReadySignal, &[1]);
    assert_eq!(harness.answer(ready).await.status, GattStatus::Success);

    // The late connected event for the same link changes nothing
    harness.connect(address, 1);
    assert_eq!(harness.device(address).state(), DeviceState::Ready);
    assert_eq!(harness.dispatcher.tracker().len(), 1);

    let write = harness.write(address, CharacteristicKind::Writer, b"hi");
    assert_eq!(harness.answer(write).await.status, GattStatus::Success);
    assert_eq!(harness.core.ingested_bytes(LinkHandle(1)), b"hi");
}

#[tokio::test]
async fn test_link_activity_leaves_tracked_device_alone() {
    let address = "AA:BB:CC:00:00:14";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 3);
    let device = harness.device(address);
    let close = harness.write(address, CharacteristicKind::Closer, &[1]);
    harness.answer(close).await;

    harness
        .dispatcher
        .on_link_activity(&DeviceAddress::new(address), LinkHandle(3));
    assert!(Arc::ptr_eq(&device, &harness.device(address)));
    assert_eq!(device.state(), DeviceState::Closed);
}

#[tokio::test]
async fn test_stalled_device_does_not_block_others() {
    let mut harness = Harness::with_defaults();
    harness.connect("AA:01", 1);
    harness.connect("AA:02", 2);

    let stalled = harness.write("AA:01", CharacteristicKind::Writer, b"waiting");
    let ready = harness.write("AA:02", CharacteristicKind::ReadySignal, &[1]);
    harness.answer(ready).await;
    let write = harness.write("AA:02", CharacteristicKind::Writer, b"flowing");

    assert_eq!(harness.answer(write).await.status, GattStatus::Success);
    assert_eq!(harness.core.ingested_bytes(LinkHandle(2)), b"flowing");
    assert!(harness.log.response_for(stalled).is_none());
}

// ----------------------------------------------------------------------------
// Reads
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_read_past_end_is_empty_success() {
    let mut harness = Harness::with_defaults();
    let len = b"/ble/QmLocalPeer".len();

    let response = harness.read("AA:01", CharacteristicKind::Multiaddress, len + 5);
    assert_eq!(response.status, GattStatus::Success);
    assert!(response.value.is_empty());
}

#[tokio::test]
async fn test_long_read_reassembles_value() {
    let local = LocalAdvertisement::new((0..300u32).map(|i| i as u8).collect::<Vec<_>>(), b"/ble/x".to_vec());
    let log = Arc::new(ResponseLog::new());
    let dispatcher = GattDispatcher::builder(build_service(&local).unwrap(), Arc::new(InMemoryCore::new()), log.clone())
        .with_config(BridgeConfig::new().with_connect_back(false))
        .build()
        .unwrap();

    let address = DeviceAddress::new("AA:01");
    dispatcher.on_connection_state_change(&address, LinkHandle(1), LinkState::Connected);
    dispatcher.on_mtu_changed(&address, 64);

    let mut reassembled = Vec::new();
    for id in 0.. {
        dispatcher.on_characteristic_read(ReadRequest {
            address: address.clone(),
            request_id: RequestId(id),
            characteristic: PEER_ID_CHARACTERISTIC_UUID,
            offset: reassembled.len(),
        });
        let response = log.response_for(RequestId(id)).unwrap();
        assert_eq!(response.status, GattStatus::Success);
        assert!(response.value.len() <= 63);
        if response.value.is_empty() {
            break;
        }
        reassembled.extend(response.value);
    }

    assert_eq!(reassembled, local.peer_id);
}

#[tokio::test]
async fn test_every_request_answered_once() {
    let address = "AA:BB:CC:00:00:12";
    let mut harness = Harness::with_defaults();
    harness.connect(address, 19);

    let mut ids = Vec::new();
    for kind in CharacteristicKind::ALL {
        ids.push(harness.write(address, kind, b"x"));
    }
    harness.disconnect(address, 19);

    for id in &ids {
        harness.answer(*id).await;
    }
    for kind in CharacteristicKind::ALL {
        harness.read(address, kind, 0);
    }

    let responses = harness.log.responses();
    assert_eq!(responses.len(), ids.len() + CharacteristicKind::ALL.len());
    let mut seen: Vec<_> = responses.iter().map(|r| r.request_id).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), responses.len());
}
