//! # Transform Pipeline
//!
//! Turns application values into payload bytes and back:
//!
//! ```text
//! forward:  value -> serializer -> processor[0] -> processor[1] -> ... -> payload
//! reverse:  payload -> ... -> processor[1] -> processor[0] -> deserializer -> value
//! ```
//!
//! Processors ping-pong between two pooled scratch buffers, so a chain of any
//! length uses two allocations.
//!
//! Arrays of fixed-width primitives take a fast path: serialization is skipped,
//! processors run over the little-endian element bytes, and the element count
//! is appended as an 8-byte trailer after the last stage. Single-byte arrays
//! with no processors pass through unchanged.

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::processor::{ProcessorKind, ProcessorOptions, OPTION_PASSWORD};
use crate::core::serialization::{deserialize, serialize_into, SerializationFormat};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Priority;
use crate::utils::buffer_pool::{BufferPool, PooledBuffer};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Length of the element-count trailer on primitive array payloads
pub const ARRAY_TRAILER_LEN: usize = 8;

/// Serializer, processor chain and send/receive options for one packet type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub serializer: SerializationFormat,
    /// Applied in order on send, in reverse order on receive
    pub processors: Vec<ProcessorKind>,
    pub options: ProcessorOptions,
    /// Sender waits for the peer to acknowledge receipt
    pub receive_confirmation_required: bool,
    /// Stamp outgoing headers with the creation time
    pub include_creation_time: bool,
    /// Dispatcher priority for incoming packets of this type
    pub priority: Priority,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(SerializationFormat::default())
    }
}

impl PipelineConfig {
    pub fn new(serializer: SerializationFormat) -> Self {
        Self {
            serializer,
            processors: Vec::new(),
            options: ProcessorOptions::new(),
            receive_confirmation_required: false,
            include_creation_time: false,
            priority: Priority::Normal,
        }
    }

    /// Configuration used for reserved protocol packets
    pub fn internal() -> Self {
        Self::new(SerializationFormat::Bincode).with_priority(Priority::Highest)
    }

    pub fn with_processor(mut self, kind: ProcessorKind) -> Self {
        self.processors.push(kind);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.with_option(OPTION_PASSWORD, password)
    }

    pub fn with_confirmation(mut self, required: bool) -> Self {
        self.receive_confirmation_required = required;
        self
    }

    pub fn with_creation_time(mut self, include: bool) -> Self {
        self.include_creation_time = include;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Whether payloads produced with `other` can be decoded with `self`:
    /// same serializer and the same set of processors.
    pub fn is_compatible_with(&self, other: &PipelineConfig) -> bool {
        let ours: BTreeSet<_> = self.processors.iter().collect();
        let theirs: BTreeSet<_> = other.processors.iter().collect();
        self.serializer == other.serializer && ours == theirs
    }
}

/// Fixed-width element types eligible for the array fast path.
pub trait Primitive: Copy + Send + Sync + 'static {
    /// Encoded width in bytes
    const WIDTH: usize;

    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from exactly `WIDTH` bytes
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64);

/// Serializer plus processor chain, shared by every connection of a
/// `NetworkComms` instance.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    pool: BufferPool,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` and run the processor chain over it.
    pub fn forward<T: Serialize + ?Sized>(&self, value: &T, config: &PipelineConfig) -> Result<Bytes> {
        let mut current = self.pool.acquire();
        serialize_into(value, config.serializer, &mut current)?;
        let out = self.run_forward(current, config)?;
        Ok(Bytes::from(out))
    }

    /// Undo the processor chain in reverse order and deserialize.
    pub fn reverse<T: DeserializeOwned>(&self, data: &[u8], config: &PipelineConfig) -> Result<T> {
        if config.processors.is_empty() {
            return deserialize(data, config.serializer);
        }
        let plain = self.run_reverse(data, config)?;
        deserialize(&plain, config.serializer)
    }

    /// Primitive array fast path, see the module docs.
    pub fn forward_array<P: Primitive>(&self, values: &[P], config: &PipelineConfig) -> Result<Bytes> {
        let raw_len = values.len() * P::WIDTH;
        if P::WIDTH == 1 && config.processors.is_empty() {
            let mut out = Vec::with_capacity(raw_len);
            values.iter().for_each(|v| v.write_le(&mut out));
            return Ok(Bytes::from(out));
        }

        let mut current = self.pool.acquire();
        current.reserve(raw_len);
        values.iter().for_each(|v| v.write_le(&mut current));

        let mut out = self.run_forward(current, config)?;
        out.extend_from_slice(&(values.len() as u64).to_le_bytes());
        Ok(Bytes::from(out))
    }

    pub fn reverse_array<P: Primitive>(&self, data: &[u8], config: &PipelineConfig) -> Result<Vec<P>> {
        if P::WIDTH == 1 && config.processors.is_empty() {
            return Ok(data.iter().map(|b| P::read_le(std::slice::from_ref(b))).collect());
        }

        if data.len() < ARRAY_TRAILER_LEN {
            return Err(ProtocolError::Serialization(constants::ERR_ARRAY_TRAILER.into()));
        }
        let (body, trailer) = data.split_at(data.len() - ARRAY_TRAILER_LEN);
        let mut count_bytes = [0u8; ARRAY_TRAILER_LEN];
        count_bytes.copy_from_slice(trailer);
        let count = u64::from_le_bytes(count_bytes) as usize;

        // The trailer is read first so the destination can be sized before decoding
        let expected = count
            .checked_mul(P::WIDTH)
            .filter(|len| *len <= MAX_PAYLOAD_SIZE)
            .ok_or_else(|| {
                ProtocolError::Serialization(format!("Array element count {count} is out of range"))
            })?;

        let decode = |raw: &[u8]| -> Result<Vec<P>> {
            if raw.len() != expected {
                return Err(ProtocolError::Serialization(format!(
                    "Array payload holds {} bytes, expected {expected}",
                    raw.len()
                )));
            }
            let mut values = Vec::with_capacity(count);
            values.extend(raw.chunks_exact(P::WIDTH).map(P::read_le));
            Ok(values)
        };

        if config.processors.is_empty() {
            decode(body)
        } else {
            let raw = self.run_reverse(body, config)?;
            decode(&raw)
        }
    }

    fn run_forward(&self, mut current: PooledBuffer, config: &PipelineConfig) -> Result<Vec<u8>> {
        if config.processors.is_empty() {
            return Ok(current.take());
        }

        let mut scratch = self.pool.acquire();
        for kind in &config.processors {
            scratch.clear();
            kind.processor()
                .forward(&current, &mut scratch, &config.options)
                .map_err(|e| stage_error(*kind, e))?;
            std::mem::swap(&mut current, &mut scratch);
        }
        Ok(current.take())
    }

    fn run_reverse(&self, data: &[u8], config: &PipelineConfig) -> Result<PooledBuffer> {
        let mut current = self.pool.acquire();
        let mut scratch = self.pool.acquire();

        let mut stages = config.processors.iter().rev();
        if let Some(kind) = stages.next() {
            kind.processor()
                .reverse(data, &mut current, &config.options)
                .map_err(|e| stage_error(*kind, e))?;
        }
        for kind in stages {
            scratch.clear();
            kind.processor()
                .reverse(&current, &mut scratch, &config.options)
                .map_err(|e| stage_error(*kind, e))?;
            std::mem::swap(&mut current, &mut scratch);
        }
        Ok(current)
    }
}

fn stage_error(kind: ProcessorKind, err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::Serialization(_) => err,
        other => ProtocolError::Serialization(format!("{} stage failed: {other}", kind.name())),
    }
}
