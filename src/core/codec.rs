//! # Packet Codec
//!
//! Wire framing for managed connections:
//!
//! ```text
//! [HeaderLen(1)] [Header(HeaderLen)] [Payload(TotalPayloadSize)]
//! ```
//!
//! The header is serialized with the connection's header format and never
//! passes through data processors. A header that serializes to more than 255
//! bytes cannot be framed. A zero length byte at a packet boundary is a
//! keep-alive and carries no packet.
//!
//! `PacketCodec` also implements `tokio_util` `Encoder`/`Decoder` so it can
//! drive a `Framed` stream directly.

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::header::PacketHeader;
use crate::core::packet::Packet;
use crate::core::serialization::{deserialize, serialize, SerializationFormat};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest serialized header the one-byte length prefix can describe
pub const MAX_HEADER_LEN: usize = u8::MAX as usize;

/// Wire representation of one packet, header and payload kept apart so the
/// payload is never copied into a combined buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Length prefix followed by the serialized header
    pub header: Bytes,
    pub payload: Bytes,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contiguous copy, used for the resend cache and tests
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len());
        out.put_slice(&self.header);
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// Result of looking for a header at the front of received bytes
#[derive(Debug)]
pub enum HeaderParse {
    /// More bytes are needed before the header can be decoded
    Incomplete,
    Complete {
        header: PacketHeader,
        /// Prefix byte plus serialized header
        header_len: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    header_format: SerializationFormat,
    max_payload: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(SerializationFormat::default())
    }
}

impl PacketCodec {
    /// Codec for a connection whose default serializer is `serializer`
    pub fn new(serializer: SerializationFormat) -> Self {
        Self {
            header_format: serializer.header_format(),
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn header_format(&self) -> SerializationFormat {
        self.header_format
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Length prefix plus serialized header.
    ///
    /// # Errors
    /// `ProtocolError::Serialization` if the header serializes past 255 bytes.
    pub fn encode_header(&self, header: &PacketHeader) -> Result<Bytes> {
        let encoded = serialize(header, self.header_format)?;
        if encoded.is_empty() || encoded.len() > MAX_HEADER_LEN {
            return Err(ProtocolError::Serialization(format!(
                "{} ({} bytes for packet type '{}')",
                constants::ERR_HEADER_TOO_LARGE,
                encoded.len(),
                header.packet_type()
            )));
        }

        let mut out = BytesMut::with_capacity(1 + encoded.len());
        out.put_u8(encoded.len() as u8);
        out.put_slice(&encoded);
        Ok(out.freeze())
    }

    pub fn frame(&self, packet: &Packet) -> Result<Frame> {
        let header = self.encode_header(packet.header())?;
        Ok(Frame {
            header,
            payload: packet.payload().clone(),
        })
    }

    /// Decode the header at the front of `raw`, which must not start with a
    /// keep-alive byte.
    pub fn try_parse_header(&self, raw: &[u8]) -> Result<HeaderParse> {
        let Some(&len) = raw.first() else {
            return Ok(HeaderParse::Incomplete);
        };
        if len == 0 {
            return Err(ProtocolError::Communication(
                "Zero-length header where a packet was expected".into(),
            ));
        }

        let header_len = 1 + len as usize;
        if raw.len() < header_len {
            return Ok(HeaderParse::Incomplete);
        }

        let header: PacketHeader = deserialize(&raw[1..header_len], self.header_format)?;
        header.validate()?;
        Ok(HeaderParse::Complete { header, header_len })
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let frame = self.frame(&item)?;
        dst.reserve(frame.len());
        dst.put_slice(&frame.header);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        while src.first() == Some(&0) {
            src.advance(1);
        }

        let (header, header_len) = match self.try_parse_header(src)? {
            HeaderParse::Incomplete => return Ok(None),
            HeaderParse::Complete { header, header_len } => (header, header_len),
        };

        let payload_len = header.total_payload_size();
        if payload_len > self.max_payload {
            return Err(ProtocolError::OversizedPacket(payload_len));
        }
        if src.len() < header_len + payload_len {
            src.reserve(header_len + payload_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(payload_len).freeze();
        Ok(Some(Packet::new(header, payload)))
    }
}
