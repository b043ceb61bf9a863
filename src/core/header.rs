//! Packet header: small enumerated keys mapped to integer or string values.

use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Integer-valued header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeaderLongItem {
    TotalPayloadSize,
    ReceiveConfirmationRequired,
    PacketCreationTime,
    PacketSequenceNumber,
}

/// String-valued header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeaderStringItem {
    PacketType,
    CheckSumHash,
    RequestedReturnPacketType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    longs: BTreeMap<HeaderLongItem, i64>,
    strings: BTreeMap<HeaderStringItem, String>,
}

impl PacketHeader {
    pub fn new(packet_type: impl Into<String>, payload_size: usize) -> Self {
        let mut header = Self::default();
        header.set_string(HeaderStringItem::PacketType, packet_type);
        header.set_long(HeaderLongItem::TotalPayloadSize, payload_size as i64);
        header
    }

    pub fn long(&self, item: HeaderLongItem) -> Option<i64> {
        self.longs.get(&item).copied()
    }

    pub fn set_long(&mut self, item: HeaderLongItem, value: i64) {
        self.longs.insert(item, value);
    }

    pub fn string(&self, item: HeaderStringItem) -> Option<&str> {
        self.strings.get(&item).map(String::as_str)
    }

    pub fn set_string(&mut self, item: HeaderStringItem, value: impl Into<String>) {
        self.strings.insert(item, value.into());
    }

    pub fn remove_string(&mut self, item: HeaderStringItem) -> Option<String> {
        self.strings.remove(&item)
    }

    pub fn packet_type(&self) -> &str {
        self.string(HeaderStringItem::PacketType).unwrap_or_default()
    }

    pub fn total_payload_size(&self) -> usize {
        self.long(HeaderLongItem::TotalPayloadSize)
            .unwrap_or(0)
            .max(0) as usize
    }

    pub fn receive_confirmation_required(&self) -> bool {
        self.long(HeaderLongItem::ReceiveConfirmationRequired)
            .is_some_and(|v| v != 0)
    }

    pub fn sequence_number(&self) -> Option<u64> {
        self.long(HeaderLongItem::PacketSequenceNumber)
            .map(|v| v as u64)
    }

    pub fn creation_time(&self) -> Option<i64> {
        self.long(HeaderLongItem::PacketCreationTime)
    }

    pub fn checksum(&self) -> Option<&str> {
        self.string(HeaderStringItem::CheckSumHash)
    }

    pub fn requested_return_type(&self) -> Option<&str> {
        self.string(HeaderStringItem::RequestedReturnPacketType)
    }

    /// Packet type present and payload size non-negative
    pub fn validate(&self) -> Result<()> {
        match self.string(HeaderStringItem::PacketType) {
            Some(t) if !t.is_empty() => {}
            _ => return Err(ProtocolError::Serialization(constants::ERR_EMPTY_HEADER.into())),
        }
        match self.long(HeaderLongItem::TotalPayloadSize) {
            Some(size) if size >= 0 => Ok(()),
            Some(size) => Err(ProtocolError::Serialization(format!(
                "Negative payload size in header: {size}"
            ))),
            None => Err(ProtocolError::Serialization(
                "Packet header is missing the payload size".into(),
            )),
        }
    }
}

/// Hex-encoded SHA-256 of a payload, as carried in `CheckSumHash`
pub fn compute_checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header_is_valid() {
        let header = PacketHeader::new("Message", 5);
        assert!(header.validate().is_ok());
        assert_eq!(header.packet_type(), "Message");
        assert_eq!(header.total_payload_size(), 5);
        assert!(!header.receive_confirmation_required());
        assert_eq!(header.sequence_number(), None);
    }

    #[test]
    fn test_missing_type_rejected() {
        let mut header = PacketHeader::default();
        header.set_long(HeaderLongItem::TotalPayloadSize, 1);
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_negative_size_rejected() {
        let mut header = PacketHeader::new("T", 0);
        header.set_long(HeaderLongItem::TotalPayloadSize, -1);
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            compute_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
