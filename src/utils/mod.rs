//! # Utility Modules
//!
//! Supporting utilities for compression, cryptography, logging, and timing.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with decompression size limits
//! - **Crypto**: XChaCha20-Poly1305 AEAD with password-derived keys
//! - **Buffer Pool**: reusable scratch buffers for the transform pipeline
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: thread-safe counters
//! - **Sent Packet Cache**: bounded store of recently sent frames for resends
//! - **Time**: timestamp helpers
//! - **Timeout**: protocol timeout defaults and async wrappers
//!
//! ## Security
//! - Nonces from the OS RNG (getrandom)
//! - Decompression bomb protection (16MB limit)
//! - Key material zeroed on drop (zeroize)

pub mod buffer_pool;
pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod sent_packet_cache;
pub mod time;
pub mod timeout;
