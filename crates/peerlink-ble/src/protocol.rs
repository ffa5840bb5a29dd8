//! BLE protocol constants: service layout, ATT limits and response status codes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Primary service grouping every bridge characteristic
pub const PEERLINK_SERVICE_UUID: Uuid = Uuid::from_u128(0xA06C6AB8_886F_4D56_82FC_2CF8610D6664);

/// Accept characteristic (read + write)
pub const ACCEPT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6F110ECA_9FCC_4BB3_AB45_6F13565E2E34);

/// Multiaddress advertisement characteristic (read)
pub const MULTIADDR_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x9B827770_DC72_4C55_B8AE_0870C7AC15A8);

/// Peer ID advertisement characteristic (read)
pub const PEER_ID_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0EF50D30_E208_4315_B323_D05E0A23E6B3);

/// Payload writer characteristic (write)
pub const WRITER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x000CBD77_8D30_4EFF_9ADD_AC5F10C2CC1C);

/// Ready signal characteristic (write)
pub const READY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xD27DE0B5_2170_4C59_9C0B_750C760C74E6);

/// Close signal characteristic (write)
pub const CLOSER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xAD127A46_D065_4D72_B15A_EB2B3DA20561);

// ----------------------------------------------------------------------------
// ATT Limits
// ----------------------------------------------------------------------------

/// Minimum ATT MTU every LE link starts with
pub const MIN_ATT_MTU: u16 = 23;

/// Largest ATT MTU a link may negotiate
pub const MAX_ATT_MTU: u16 = 517;

/// Opcode byte preceding the value in a read response
pub const ATT_READ_RESPONSE_OVERHEAD: usize = 1;

/// Longest value an attribute may hold
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 512;

// ----------------------------------------------------------------------------
// Response Status
// ----------------------------------------------------------------------------

/// Status carried by a GATT response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    RequestNotSupported,
    InvalidOffset,
    Failure,
}

impl GattStatus {
    /// Numeric status as handed to the platform stack
    pub fn code(self) -> u16 {
        match self {
            GattStatus::Success => 0x00,
            GattStatus::ReadNotPermitted => 0x02,
            GattStatus::WriteNotPermitted => 0x03,
            GattStatus::RequestNotSupported => 0x06,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::Failure => 0x101,
        }
    }

    pub fn is_success(self) -> bool {
        self == GattStatus::Success
    }
}

/// Largest value slice that fits in one read response on a link with `mtu`
pub fn max_read_payload(mtu: u16) -> usize {
    (mtu.max(MIN_ATT_MTU) as usize).saturating_sub(ATT_READ_RESPONSE_OVERHEAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_match_wire_contract() {
        assert_eq!(
            PEERLINK_SERVICE_UUID.to_string(),
            "a06c6ab8-886f-4d56-82fc-2cf8610d6664"
        );
        assert_eq!(
            WRITER_CHARACTERISTIC_UUID.to_string(),
            "000cbd77-8d30-4eff-9add-ac5f10c2cc1c"
        );
        assert_eq!(
            PEER_ID_CHARACTERISTIC_UUID.to_string(),
            "0ef50d30-e208-4315-b323-d05e0a23e6b3"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GattStatus::Success.code(), 0);
        assert_eq!(GattStatus::Failure.code(), 257);
        assert!(GattStatus::Success.is_success());
        assert!(!GattStatus::WriteNotPermitted.is_success());
    }

    #[test]
    fn test_max_read_payload() {
        assert_eq!(max_read_payload(23), 22);
        assert_eq!(max_read_payload(185), 184);
        // Below the ATT floor the floor applies
        assert_eq!(max_read_payload(5), 22);
    }
}
