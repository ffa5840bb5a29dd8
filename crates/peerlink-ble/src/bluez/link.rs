//! Connect-back through btleplug

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use super::platform_error;
use crate::collaborators::LinkOpener;
use crate::device::{DeviceAddress, RemoteIdentity};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{MULTIADDR_CHARACTERISTIC_UUID, PEER_ID_CHARACTERISTIC_UUID};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens the client link to a remote and reads its identity characteristics
pub struct BtleplugLinkOpener {
    adapter: Adapter,
}

impl BtleplugLinkOpener {
    pub async fn new() -> BridgeResult<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| platform_error("Failed to create BLE manager", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| platform_error("Failed to get BLE adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::Platform("No BLE adapters available".to_string()))?;

        Ok(Self { adapter })
    }

    async fn find(&self, address: &DeviceAddress) -> BridgeResult<Option<Peripheral>> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| platform_error("Failed to list peripherals", e))?;

        Ok(peripherals
            .into_iter()
            .find(|p| DeviceAddress::new(p.address().to_string()) == *address))
    }
}

async fn read_characteristic(peripheral: &Peripheral, uuid: Uuid) -> BridgeResult<Option<Vec<u8>>> {
    let Some(characteristic) = peripheral.characteristics().into_iter().find(|c| c.uuid == uuid) else {
        return Ok(None);
    };

    peripheral
        .read(&characteristic)
        .await
        .map(Some)
        .map_err(|e| platform_error("Failed to read characteristic", e))
}

#[async_trait]
impl LinkOpener for BtleplugLinkOpener {
    async fn open_link(&self, address: &DeviceAddress) -> BridgeResult<Option<RemoteIdentity>> {
        let Some(peripheral) = self.find(address).await? else {
            debug!("{} not seen by the central adapter", address);
            return Ok(None);
        };

        if !peripheral.is_connected().await.unwrap_or(false) {
            match timeout(CONNECT_TIMEOUT, peripheral.connect()).await {
                Ok(Ok(())) => info!("Connected back to {}", address),
                Ok(Err(e)) => return Err(platform_error("Connect-back failed", e)),
                Err(_) => return Err(BridgeError::Platform(format!("Connect-back to {} timed out", address))),
            }
        }

        peripheral
            .discover_services()
            .await
            .map_err(|e| platform_error("Failed to discover services", e))?;

        let peer_id = read_characteristic(&peripheral, PEER_ID_CHARACTERISTIC_UUID).await?;
        let multiaddr = read_characteristic(&peripheral, MULTIADDR_CHARACTERISTIC_UUID).await?;
        Ok(peer_id
            .zip(multiaddr)
            .map(|(peer_id, multiaddr)| RemoteIdentity::new(peer_id, multiaddr)))
    }
}
