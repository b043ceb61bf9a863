//! # Data Processors
//!
//! Reversible byte-transform stages run by the transform pipeline after
//! serialization: compression (LZ4, Zstd) and encryption (XChaCha20-Poly1305).
//!
//! Each processor reads one scratch buffer and appends to the other; the
//! pipeline swaps the two between stages.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::compression::{self, CompressionKind, DEFAULT_ZSTD_LEVEL};
use crate::utils::crypto::Crypto;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-keyed processor options, e.g. `Password` for encryption
pub type ProcessorOptions = BTreeMap<String, String>;

/// Option key holding the shared encryption password
pub const OPTION_PASSWORD: &str = "Password";

/// Option key holding the zstd compression level
pub const OPTION_COMPRESSION_LEVEL: &str = "CompressionLevel";

/// Identity of a data processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessorKind {
    Lz4,
    Zstd,
    ChaCha20Poly1305,
}

impl ProcessorKind {
    /// The processor implementing this identity
    pub fn processor(self) -> &'static dyn DataProcessor {
        match self {
            ProcessorKind::Lz4 => &Lz4Compressor,
            ProcessorKind::Zstd => &ZstdCompressor,
            ProcessorKind::ChaCha20Poly1305 => &ChaChaEncrypter,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessorKind::Lz4 => "LZ4",
            ProcessorKind::Zstd => "Zstd",
            ProcessorKind::ChaCha20Poly1305 => "XChaCha20Poly1305",
        }
    }
}

/// One reversible byte-transform stage.
///
/// `forward` and `reverse` append their result to `output`, which the
/// pipeline hands over empty.
pub trait DataProcessor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    fn forward(&self, input: &[u8], output: &mut Vec<u8>, options: &ProcessorOptions) -> Result<()>;

    fn reverse(&self, input: &[u8], output: &mut Vec<u8>, options: &ProcessorOptions) -> Result<()>;
}

pub struct Lz4Compressor;

impl DataProcessor for Lz4Compressor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Lz4
    }

    fn forward(&self, input: &[u8], output: &mut Vec<u8>, _options: &ProcessorOptions) -> Result<()> {
        compression::compress_into(input, CompressionKind::Lz4, 0, output)
    }

    fn reverse(&self, input: &[u8], output: &mut Vec<u8>, _options: &ProcessorOptions) -> Result<()> {
        compression::decompress_into(input, CompressionKind::Lz4, output)
    }
}

pub struct ZstdCompressor;

impl DataProcessor for ZstdCompressor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Zstd
    }

    fn forward(&self, input: &[u8], output: &mut Vec<u8>, options: &ProcessorOptions) -> Result<()> {
        let level = match options.get(OPTION_COMPRESSION_LEVEL) {
            Some(raw) => raw.parse::<i32>().map_err(|_| {
                ProtocolError::Serialization(format!("Invalid compression level option: {raw}"))
            })?,
            None => DEFAULT_ZSTD_LEVEL,
        };
        compression::compress_into(input, CompressionKind::Zstd, level, output)
    }

    fn reverse(&self, input: &[u8], output: &mut Vec<u8>, _options: &ProcessorOptions) -> Result<()> {
        compression::decompress_into(input, CompressionKind::Zstd, output)
    }
}

pub struct ChaChaEncrypter;

impl ChaChaEncrypter {
    fn crypto(options: &ProcessorOptions) -> Result<Crypto> {
        let password = options
            .get(OPTION_PASSWORD)
            .ok_or_else(|| ProtocolError::Serialization(constants::ERR_MISSING_PASSWORD.into()))?;
        Ok(Crypto::from_password(password))
    }
}

impl DataProcessor for ChaChaEncrypter {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::ChaCha20Poly1305
    }

    fn forward(&self, input: &[u8], output: &mut Vec<u8>, options: &ProcessorOptions) -> Result<()> {
        Self::crypto(options)?.seal_into(input, output)
    }

    fn reverse(&self, input: &[u8], output: &mut Vec<u8>, options: &ProcessorOptions) -> Result<()> {
        Self::crypto(options)?.open_into(input, output)
    }
}
