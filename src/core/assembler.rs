//! # Packet Assembler
//!
//! Reassembles whole packets from arbitrary fragments of a byte stream.
//!
//! Received chunks are kept as a queue of `Bytes`. Payloads that sit inside a
//! single chunk are extracted without copying; payloads spanning chunks are
//! gathered into one buffer.
//!
//! Socket reads go through [`PacketAssembler::read_from`], which reads into an
//! owned `BytesMut`, splits off the filled part as a new chunk and keeps the
//! unused tail of the allocation as the next receive buffer.

use crate::core::codec::{HeaderParse, PacketCodec};
use crate::core::header::PacketHeader;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Below this much spare capacity a fresh receive buffer is reserved
const MIN_READ_SPACE: usize = 64;

pub struct PacketAssembler {
    chunks: VecDeque<Bytes>,
    /// Bytes currently queued in `chunks`
    buffered: usize,
    /// Bytes received over the assembler's lifetime, keep-alives excluded
    total_bytes_read: u64,
    /// Bytes needed to complete the packet being assembled; 0 between packets
    expected: usize,
    pending_header: Option<PacketHeader>,
    receive: BytesMut,
    receive_size: usize,
}

impl PacketAssembler {
    pub fn new(receive_size: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            buffered: 0,
            total_bytes_read: 0,
            expected: 0,
            pending_header: None,
            receive: BytesMut::with_capacity(receive_size),
            receive_size,
        }
    }

    /// Read once from `reader` into the receive buffer and queue what arrived.
    ///
    /// Returns the byte count; 0 means the peer closed the stream.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.receive.capacity() - self.receive.len() < MIN_READ_SPACE {
            self.receive.reserve(self.receive_size);
        }

        let read = reader.read_buf(&mut self.receive).await?;
        if read > 0 {
            let chunk = self.receive.split().freeze();
            self.append(chunk);
        }
        Ok(read)
    }

    /// Queue a received chunk.
    ///
    /// A lone zero byte arriving between packets is a keep-alive and is dropped
    /// without being counted.
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        if chunk.len() == 1 && chunk[0] == 0 && self.expected == 0 && self.buffered == 0 {
            trace!("Keep-alive byte received");
            return;
        }

        self.total_bytes_read += chunk.len() as u64;
        self.buffered += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Bytes still needed by the packet being assembled
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Extract the next complete packet, if one is buffered.
    ///
    /// # Errors
    /// - `ProtocolError::OversizedPacket` if a header announces a payload larger
    ///   than the codec allows
    /// - header decoding errors from the codec
    pub fn try_extract_one(&mut self, codec: &PacketCodec) -> Result<Option<Packet>> {
        if self.pending_header.is_none() {
            loop {
                let Some(first) = self.peek_first() else {
                    self.expected = 0;
                    return Ok(None);
                };
                if first != 0 {
                    break;
                }
                // Keep-alive byte coalesced into a larger chunk
                self.discard_leading_bytes(1)?;
            }

            let header_total = 1 + self.peek_first().unwrap_or(0) as usize;
            if self.buffered < header_total {
                self.expected = header_total - self.buffered;
                return Ok(None);
            }

            let raw = self.leading_bytes(header_total)?;
            match codec.try_parse_header(&raw)? {
                HeaderParse::Incomplete => {
                    self.expected = header_total - self.buffered.min(header_total);
                    return Ok(None);
                }
                HeaderParse::Complete { header, header_len } => {
                    let size = header.total_payload_size();
                    if size > codec.max_payload() {
                        return Err(ProtocolError::OversizedPacket(size));
                    }
                    self.discard_leading_bytes(header_len)?;
                    self.pending_header = Some(header);
                }
            }
        }

        let size = self
            .pending_header
            .as_ref()
            .map(PacketHeader::total_payload_size)
            .unwrap_or(0);
        if self.buffered < size {
            self.expected = size - self.buffered;
            return Ok(None);
        }

        let payload = self.leading_bytes(size)?;
        self.discard_leading_bytes(size)?;
        self.expected = 0;
        Ok(self
            .pending_header
            .take()
            .map(|header| Packet::new(header, payload)))
    }

    /// Remove exactly `count` bytes from the front of the queue.
    ///
    /// # Errors
    /// `ProtocolError::Communication` if fewer than `count` bytes are buffered.
    pub fn discard_leading_bytes(&mut self, count: usize) -> Result<()> {
        if count > self.buffered {
            return Err(ProtocolError::Communication(format!(
                "{} ({count} requested, {} buffered)",
                constants::ERR_DISCARD_OVERRUN,
                self.buffered
            )));
        }

        let mut remaining = count;
        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= remaining {
                remaining -= front.len();
                self.chunks.pop_front();
            } else {
                let _ = front.split_to(remaining);
                remaining = 0;
            }
        }
        self.buffered -= count;
        Ok(())
    }

    /// Everything buffered as one chunk, for connections without framing
    pub fn take_all(&mut self) -> Option<Bytes> {
        if self.buffered == 0 {
            return None;
        }
        let all = if self.chunks.len() == 1 {
            self.chunks.pop_front()
        } else {
            let mut out = BytesMut::with_capacity(self.buffered);
            self.chunks.drain(..).for_each(|c| out.extend_from_slice(&c));
            Some(out.freeze())
        };
        self.chunks.clear();
        self.buffered = 0;
        all
    }

    fn peek_first(&self) -> Option<u8> {
        self.chunks.front().and_then(|c| c.first().copied())
    }

    /// The first `count` bytes without consuming them; zero-copy when they lie
    /// in the front chunk.
    fn leading_bytes(&self, count: usize) -> Result<Bytes> {
        if count > self.buffered {
            return Err(ProtocolError::Communication(
                constants::ERR_DISCARD_OVERRUN.into(),
            ));
        }
        match self.chunks.front() {
            None => Ok(Bytes::new()),
            Some(front) if front.len() >= count => Ok(front.slice(..count)),
            Some(_) => {
                let mut out = BytesMut::with_capacity(count);
                for chunk in &self.chunks {
                    let take = (count - out.len()).min(chunk.len());
                    out.extend_from_slice(&chunk[..take]);
                    if out.len() == count {
                        break;
                    }
                }
                Ok(out.freeze())
            }
        }
    }
}
