//! Characteristic registry
//!
//! Declares the fixed GATT layout the bridge exposes and builds it into a
//! [`GattService`] once, at service-registration time. A service missing any
//! characteristic cannot take part in the handshake, so [`build_service`]
//! fails instead of returning a partial service.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{
    ACCEPT_CHARACTERISTIC_UUID, CLOSER_CHARACTERISTIC_UUID, MAX_ATTRIBUTE_VALUE_LEN,
    MULTIADDR_CHARACTERISTIC_UUID, PEERLINK_SERVICE_UUID, PEER_ID_CHARACTERISTIC_UUID,
    READY_CHARACTERISTIC_UUID, WRITER_CHARACTERISTIC_UUID,
};

// ----------------------------------------------------------------------------
// Characteristic Kinds
// ----------------------------------------------------------------------------

/// The characteristics of the bridge service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacteristicKind {
    Accept,
    Multiaddress,
    PeerId,
    Writer,
    ReadySignal,
    Closer,
}

impl CharacteristicKind {
    /// Every characteristic, in registration order
    pub const ALL: [CharacteristicKind; 6] = [
        CharacteristicKind::Accept,
        CharacteristicKind::Multiaddress,
        CharacteristicKind::PeerId,
        CharacteristicKind::Writer,
        CharacteristicKind::ReadySignal,
        CharacteristicKind::Closer,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            CharacteristicKind::Accept => ACCEPT_CHARACTERISTIC_UUID,
            CharacteristicKind::Multiaddress => MULTIADDR_CHARACTERISTIC_UUID,
            CharacteristicKind::PeerId => PEER_ID_CHARACTERISTIC_UUID,
            CharacteristicKind::Writer => WRITER_CHARACTERISTIC_UUID,
            CharacteristicKind::ReadySignal => READY_CHARACTERISTIC_UUID,
            CharacteristicKind::Closer => CLOSER_CHARACTERISTIC_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == uuid)
    }

    /// Access the characteristic is declared with
    pub fn access(self) -> Access {
        match self {
            CharacteristicKind::Accept => Access::READ_WRITE,
            CharacteristicKind::Multiaddress | CharacteristicKind::PeerId => Access::READ,
            CharacteristicKind::Writer
            | CharacteristicKind::ReadySignal
            | CharacteristicKind::Closer => Access::WRITE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CharacteristicKind::Accept => "accept",
            CharacteristicKind::Multiaddress => "multiaddress",
            CharacteristicKind::PeerId => "peer-id",
            CharacteristicKind::Writer => "writer",
            CharacteristicKind::ReadySignal => "ready",
            CharacteristicKind::Closer => "closer",
        }
    }
}

/// Read/write permissions and properties of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub const READ: Access = Access {
        read: true,
        write: false,
    };
    pub const WRITE: Access = Access {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Access = Access {
        read: true,
        write: true,
    };
}

// ----------------------------------------------------------------------------
// Descriptors and Service
// ----------------------------------------------------------------------------

/// One declared characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDescriptor {
    pub kind: CharacteristicKind,
    pub uuid: Uuid,
    pub access: Access,
    /// Current value, only held by read-only characteristics
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_value")]
    pub value: Option<Vec<u8>>,
}

impl CharacteristicDescriptor {
    pub fn new(kind: CharacteristicKind) -> Self {
        Self {
            kind,
            uuid: kind.uuid(),
            access: kind.access(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.value = Some(value);
        self
    }
}

/// Primary service holding the bridge characteristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub primary: bool,
    characteristics: Vec<CharacteristicDescriptor>,
}

impl GattService {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
            characteristics: Vec::new(),
        }
    }

    /// Attach a characteristic, rejecting duplicates and unusable values
    pub fn add_characteristic(&mut self, characteristic: CharacteristicDescriptor) -> BridgeResult<()> {
        let uuid = characteristic.uuid;
        let reject = move |reason: String| BridgeError::CharacteristicRegistration { uuid, reason };

        if self.characteristic(uuid).is_some() {
            return Err(reject("already attached".to_string()));
        }
        if let Some(value) = &characteristic.value {
            if characteristic.access.write {
                return Err(reject("only read-only characteristics carry a value".to_string()));
            }
            if value.len() > MAX_ATTRIBUTE_VALUE_LEN {
                return Err(reject(format!(
                    "value is {} bytes (max: {})",
                    value.len(),
                    MAX_ATTRIBUTE_VALUE_LEN
                )));
            }
        }

        self.characteristics.push(characteristic);
        Ok(())
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }

    pub fn characteristics(&self) -> &[CharacteristicDescriptor] {
        &self.characteristics
    }

    /// Current value of a read-only characteristic
    pub fn value_of(&self, kind: CharacteristicKind) -> Option<&[u8]> {
        self.characteristic(kind.uuid())
            .and_then(|c| c.value.as_deref())
    }
}

/// What the local node advertises on its read-only characteristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAdvertisement {
    pub peer_id: Vec<u8>,
    pub multiaddr: Vec<u8>,
}

impl LocalAdvertisement {
    pub fn new(peer_id: impl Into<Vec<u8>>, multiaddr: impl Into<Vec<u8>>) -> Self {
        Self {
            peer_id: peer_id.into(),
            multiaddr: multiaddr.into(),
        }
    }
}

/// Build the bridge service with all six characteristics attached
pub fn build_service(local: &LocalAdvertisement) -> BridgeResult<GattService> {
    let mut service = GattService::new(PEERLINK_SERVICE_UUID);

    for kind in CharacteristicKind::ALL {
        let descriptor = CharacteristicDescriptor::new(kind);
        let descriptor = match kind {
            CharacteristicKind::PeerId => descriptor.with_value(local.peer_id.clone()),
            CharacteristicKind::Multiaddress => descriptor.with_value(local.multiaddr.clone()),
            _ => descriptor,
        };
        service.add_characteristic(descriptor)?;
    }

    tracing::debug!(
        "Built service {} with {} characteristics",
        service.uuid,
        service.characteristics.len()
    );
    Ok(service)
}

mod hex_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
