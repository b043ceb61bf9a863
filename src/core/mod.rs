//! # Core Protocol Components
//!
//! Packet representation, framing and payload transformation.
//!
//! ## Components
//! - **Header**: packet type plus typed option maps
//! - **Packet**: header and processed payload
//! - **Codec**: header-length-prefixed framing, also usable as a tokio codec
//! - **Assembler**: rebuilds packets from arbitrary stream fragments
//! - **Serialization**: Bincode, JSON, MessagePack and raw UTF-8 formats
//! - **Processor**: reversible byte transforms (LZ4, Zstd, XChaCha20-Poly1305)
//! - **Pipeline**: serializer followed by processors, and its inverse
//!
//! ## Wire Format
//! ```text
//! [HeaderLength(1)] [Header(N <= 255)] [Payload(TotalPayloadSize)]
//! ```
//!
//! ## Limits
//! - Serialized headers longer than 255 bytes fail framing
//! - Payloads above the configured maximum (16MB default) are rejected
//!   before any allocation

pub mod assembler;
pub mod codec;
pub mod header;
pub mod packet;
pub mod pipeline;
pub mod processor;
pub mod serialization;
