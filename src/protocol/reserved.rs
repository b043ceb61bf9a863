//! Packet types owned by the protocol itself.

use serde::{Deserialize, Serialize};

pub const CONFIRMATION: &str = "Confirmation";
pub const CHECKSUM_FAIL_RESEND: &str = "CheckSumFailResend";
pub const ALIVE_TEST: &str = "AliveTestPacket";
pub const CONNECTION_SETUP: &str = "ConnectionSetup";
pub const UNMANAGED: &str = "Unmanaged";
pub const NESTED_PACKET: &str = "NestedPacket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservedPacketType {
    Confirmation,
    CheckSumFailResend,
    AliveTest,
    ConnectionSetup,
    Unmanaged,
    NestedPacket,
}

impl ReservedPacketType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            CONFIRMATION => Some(Self::Confirmation),
            CHECKSUM_FAIL_RESEND => Some(Self::CheckSumFailResend),
            // "PingPacket" is accepted as an alias
            ALIVE_TEST | "PingPacket" => Some(Self::AliveTest),
            CONNECTION_SETUP => Some(Self::ConnectionSetup),
            UNMANAGED => Some(Self::Unmanaged),
            NESTED_PACKET => Some(Self::NestedPacket),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Confirmation => CONFIRMATION,
            Self::CheckSumFailResend => CHECKSUM_FAIL_RESEND,
            Self::AliveTest => ALIVE_TEST,
            Self::ConnectionSetup => CONNECTION_SETUP,
            Self::Unmanaged => UNMANAGED,
            Self::NestedPacket => NESTED_PACKET,
        }
    }
}

/// Whether `name` belongs to the protocol and may not carry application handlers
pub fn is_reserved(name: &str) -> bool {
    ReservedPacketType::from_name(name).is_some()
}

/// Payload of an alive-test packet; the id pairs a response with its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliveTest {
    Request(u64),
    Response(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        for name in [
            CONFIRMATION,
            CHECKSUM_FAIL_RESEND,
            ALIVE_TEST,
            "PingPacket",
            CONNECTION_SETUP,
            UNMANAGED,
            NESTED_PACKET,
        ] {
            assert!(is_reserved(name), "{name}");
        }
        assert!(!is_reserved("Message"));
        assert_eq!(ReservedPacketType::from_name("PingPacket").map(|t| t.name()), Some(ALIVE_TEST));
    }
}
