use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{ProtocolError, Result};
use std::io::Read;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompressionKind {
    Lz4,
    Zstd,
}

/// Maximum output size for decompression (align with MAX_PAYLOAD_SIZE to prevent DoS)
const MAX_DECOMPRESSION_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Default zstd level when the caller does not supply one
pub const DEFAULT_ZSTD_LEVEL: i32 = 1;

/// Compresses `data`, appending the compressed form to `out`.
///
/// LZ4 output is prefixed with the uncompressed length (4 bytes, little-endian),
/// matching `lz4_flex::decompress_size_prepended`.
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress_into(data: &[u8], kind: CompressionKind, level: i32, out: &mut Vec<u8>) -> Result<()> {
    match kind {
        CompressionKind::Lz4 => {
            let start = out.len();
            let bound = lz4_flex::block::get_maximum_output_size(data.len());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.resize(start + 4 + bound, 0);
            let written = lz4_flex::block::compress_into(data, &mut out[start + 4..])
                .map_err(|_| ProtocolError::CompressionFailure)?;
            out.truncate(start + 4 + written);
            Ok(())
        }
        CompressionKind::Zstd => zstd::stream::copy_encode(data, &mut *out, level)
            .map_err(|_| ProtocolError::CompressionFailure),
    }
}

/// Decompresses `data`, appending the original bytes to `out`.
///
/// Enforces a maximum output size limit to prevent decompression bombs (DoS attacks).
/// The limit is set to MAX_PAYLOAD_SIZE to align with protocol packet limits.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds MAX_DECOMPRESSION_SIZE
pub fn decompress_into(data: &[u8], kind: CompressionKind, out: &mut Vec<u8>) -> Result<()> {
    match kind {
        CompressionKind::Lz4 => {
            // Validate the claimed size before allocating for it
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }

            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }

            let start = out.len();
            out.resize(start + claimed_size, 0);
            let written = lz4_flex::block::decompress_into(&data[4..], &mut out[start..])
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            if written != claimed_size {
                return Err(ProtocolError::DecompressionFailure);
            }
            Ok(())
        }
        CompressionKind::Zstd => {
            let start = out.len();
            let mut reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            // Read in chunks to enforce size limit
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() - start > MAX_DECOMPRESSION_SIZE {
                            return Err(ProtocolError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(())
        }
    }
}

/// Compresses data into a new buffer using the default level
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    compress_into(data, kind, DEFAULT_ZSTD_LEVEL, &mut out)?;
    Ok(out)
}

/// Decompresses data into a new buffer
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decompress_into(data, kind, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lz4_compression_roundtrip() {
        let original = b"Hello, World! This is a test of LZ4 compression.";
        let compressed = compress(original, CompressionKind::Lz4).unwrap();
        let decompressed = decompress(&compressed, CompressionKind::Lz4).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lz4_output_matches_size_prepended_format() {
        let original = vec![7u8; 4096];
        let compressed = compress(&original, CompressionKind::Lz4).unwrap();
        let decoded = lz4_flex::decompress_size_prepended(&compressed).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_compression_roundtrip() {
        let original = b"Hello, World! This is a test of Zstd compression.";
        let compressed = compress(original, CompressionKind::Zstd).unwrap();
        let decompressed = decompress(&compressed, CompressionKind::Zstd).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_appends_to_existing_output() {
        let mut out = b"prefix".to_vec();
        compress_into(b"abcabcabc", CompressionKind::Zstd, 3, &mut out).unwrap();
        assert!(out.starts_with(b"prefix"));

        let mut plain = Vec::new();
        decompress_into(&out[6..], CompressionKind::Zstd, &mut plain).unwrap();
        assert_eq!(plain, b"abcabcabc");
    }

    #[test]
    fn test_lz4_oom_attack_prevention() {
        // Claims to decompress to 3+ GB (0xbbbb602b bytes)
        let malicious_payload = vec![0x2b, 0x60, 0xbb, 0xbb];

        let result = decompress(&malicious_payload, CompressionKind::Lz4);
        assert!(
            result.is_err(),
            "Should reject malicious payload claiming huge output size"
        );
    }

    #[test]
    fn test_lz4_size_limit_enforcement() {
        let claimed_size = (MAX_DECOMPRESSION_SIZE + 1) as u32;
        let mut malicious = claimed_size.to_le_bytes().to_vec();
        malicious.extend_from_slice(&[0u8; 16]);

        let result = decompress(&malicious, CompressionKind::Lz4);
        assert!(result.is_err());
    }

    #[test]
    fn test_lz4_short_input_rejection() {
        let short_input = vec![0x2b, 0x60];
        let result = decompress(&short_input, CompressionKind::Lz4);
        assert!(result.is_err(), "Should reject input shorter than 4 bytes");
    }

    #[test]
    fn test_malformed_compressed_data() {
        let malformed = vec![0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff];
        let result = decompress(&malformed, CompressionKind::Lz4);
        assert!(result.is_err(), "Should reject malformed compressed data");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_empty_input_roundtrip() {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let compressed = compress(&[], kind).unwrap();
            assert!(decompress(&compressed, kind).unwrap().is_empty());
        }
    }
}
