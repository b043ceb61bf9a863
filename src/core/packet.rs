//! A packet: header plus transform-pipeline output.

use crate::core::header::{compute_checksum, HeaderLongItem, HeaderStringItem, PacketHeader};
use crate::core::pipeline::{PipelineConfig, Primitive, TransformPipeline};
use crate::error::Result;
use crate::utils::time::current_timestamp_millis;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    header: PacketHeader,
    payload: Bytes,
}

impl Packet {
    /// Wrap an already-processed payload, recording its size in the header
    pub fn new(mut header: PacketHeader, payload: Bytes) -> Self {
        header.set_long(HeaderLongItem::TotalPayloadSize, payload.len() as i64);
        Self { header, payload }
    }

    /// Packet whose payload bytes are sent without any transformation
    pub fn raw(packet_type: &str, payload: Bytes) -> Self {
        Self::new(PacketHeader::new(packet_type, payload.len()), payload)
    }

    /// Run `value` through the pipeline and stamp the header options from `config`
    pub fn build<T: Serialize + ?Sized>(
        packet_type: &str,
        value: &T,
        config: &PipelineConfig,
        pipeline: &TransformPipeline,
    ) -> Result<Self> {
        let payload = pipeline.forward(value, config)?;
        Ok(Self::new(Self::header_for(packet_type, config), payload))
    }

    pub fn build_array<P: Primitive>(
        packet_type: &str,
        values: &[P],
        config: &PipelineConfig,
        pipeline: &TransformPipeline,
    ) -> Result<Self> {
        let payload = pipeline.forward_array(values, config)?;
        Ok(Self::new(Self::header_for(packet_type, config), payload))
    }

    fn header_for(packet_type: &str, config: &PipelineConfig) -> PacketHeader {
        let mut header = PacketHeader::new(packet_type, 0);
        if config.receive_confirmation_required {
            header.set_long(HeaderLongItem::ReceiveConfirmationRequired, 1);
        }
        if config.include_creation_time {
            header.set_long(HeaderLongItem::PacketCreationTime, current_timestamp_millis());
        }
        header
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut PacketHeader {
        &mut self.header
    }

    pub fn packet_type(&self) -> &str {
        self.header.packet_type()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_parts(self) -> (PacketHeader, Bytes) {
        (self.header, self.payload)
    }

    /// Record the payload hash in the header
    pub fn with_checksum(mut self) -> Self {
        let hash = compute_checksum(&self.payload);
        self.header.set_string(HeaderStringItem::CheckSumHash, hash);
        self
    }

    /// `None` when the packet carries no hash
    pub fn verify_checksum(&self) -> Option<bool> {
        self.header
            .checksum()
            .map(|expected| compute_checksum(&self.payload) == expected)
    }

    pub fn decode<T: DeserializeOwned>(
        &self,
        config: &PipelineConfig,
        pipeline: &TransformPipeline,
    ) -> Result<T> {
        pipeline.reverse(&self.payload, config)
    }

    pub fn decode_array<P: Primitive>(
        &self,
        config: &PipelineConfig,
        pipeline: &TransformPipeline,
    ) -> Result<Vec<P>> {
        pipeline.reverse_array(&self.payload, config)
    }
}
