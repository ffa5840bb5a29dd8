//! Network core used by `serve`
//!
//! Logs what the bridge delivers instead of handing it to a peer-to-peer
//! stack.

use async_trait::async_trait;
use tracing::info;

use peerlink_ble::{BridgeResult, LinkHandle, NetworkCore, RemoteIdentity};

pub struct LoggingCore;

#[async_trait]
impl NetworkCore for LoggingCore {
    async fn ingest_bytes(&self, handle: LinkHandle, bytes: Vec<u8>) -> BridgeResult<()> {
        info!("{} delivered {} bytes: {}", handle, bytes.len(), hex::encode(&bytes));
        Ok(())
    }

    async fn register_peer(&self, identity: RemoteIdentity) -> BridgeResult<()> {
        info!(
            "Peer {} ready at {}",
            identity,
            String::from_utf8_lossy(&identity.multiaddr)
        );
        Ok(())
    }
}
