//! Payload compression codecs
//!
//! Archive payloads are stored compressed and decoded on first read. The
//! session checks [`Codec::is_available`] before mounting, so a codec backed
//! by a dynamically loaded library can report its absence up front.

use crate::{IndexError, Result};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Maximum allowed decompressed payload size (4 GB)
///
/// Limits decompression output so a corrupt size field or a compression bomb
/// cannot exhaust memory.
pub const MAX_DECOMPRESSED_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Output buffers are grown past this size only as data actually arrives
const PREALLOCATION_LIMIT: usize = 64 * 1024 * 1024;

/// Decompression codec for archive payloads
pub trait Codec: Send + Sync {
    /// Short codec name used in log messages
    fn name(&self) -> &'static str;

    /// Whether the codec can be used in this process
    fn is_available(&self) -> bool;

    /// Decode `src` into exactly `expected_size` bytes
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Decompression`] when the data is malformed and
    /// [`IndexError::SizeMismatch`] when the output length differs from
    /// `expected_size`.
    fn decompress(&self, src: &[u8], expected_size: u64) -> Result<Vec<u8>>;
}

fn check_size(expected_size: u64) -> Result<usize> {
    if expected_size > MAX_DECOMPRESSED_SIZE {
        return Err(IndexError::Decompression(format!(
            "Declared size {expected_size} exceeds limit of {MAX_DECOMPRESSED_SIZE} bytes"
        )));
    }
    usize::try_from(expected_size).map_err(|_| {
        IndexError::Decompression(format!("Declared size {expected_size} does not fit in memory"))
    })
}

/// Zlib codec backed by flate2
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibCodec;

impl Codec for ZlibCodec {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn decompress(&self, src: &[u8], expected_size: u64) -> Result<Vec<u8>> {
        let expected = check_size(expected_size)?;
        let mut decompressed = Vec::with_capacity(expected.min(PREALLOCATION_LIMIT));

        // Read one byte past the declared size to detect overlong streams
        let limit = expected_size.saturating_add(1);
        ZlibDecoder::new(src)
            .take(limit)
            .read_to_end(&mut decompressed)
            .map_err(|e| IndexError::Decompression(format!("ZLib decompression failed: {e}")))?;

        if decompressed.len() != expected {
            return Err(IndexError::SizeMismatch {
                expected: expected_size,
                actual: decompressed.len() as u64,
            });
        }
        Ok(decompressed)
    }
}

/// Identity codec for payloads stored without compression
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredCodec;

impl Codec for StoredCodec {
    fn name(&self) -> &'static str {
        "stored"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn decompress(&self, src: &[u8], expected_size: u64) -> Result<Vec<u8>> {
        check_size(expected_size)?;
        if src.len() as u64 != expected_size {
            return Err(IndexError::SizeMismatch {
                expected: expected_size,
                actual: src.len() as u64,
            });
        }
        Ok(src.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_zlib_decompress() {
        let data = b"base\\gameplay\\gui\\fonts.inkfontfamily".repeat(20);
        let compressed = zlib(&data);

        let out = ZlibCodec
            .decompress(&compressed, data.len() as u64)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_zlib_size_mismatch() {
        let compressed = zlib(b"0123456789");

        let short = ZlibCodec.decompress(&compressed, 4);
        assert!(matches!(
            short,
            Err(IndexError::SizeMismatch { expected: 4, actual: 5 })
        ));

        let long = ZlibCodec.decompress(&compressed, 20);
        assert!(matches!(
            long,
            Err(IndexError::SizeMismatch { expected: 20, actual: 10 })
        ));
    }

    #[test]
    fn test_zlib_rejects_garbage() {
        let result = ZlibCodec.decompress(b"definitely not zlib", 10);
        assert!(matches!(result, Err(IndexError::Decompression(_))));
    }

    #[test]
    fn test_declared_size_limit() {
        let result = ZlibCodec.decompress(&zlib(b"x"), MAX_DECOMPRESSED_SIZE + 1);
        assert!(matches!(result, Err(IndexError::Decompression(_))));
    }

    #[test]
    fn test_stored_codec() {
        assert_eq!(StoredCodec.decompress(b"abc", 3).unwrap(), b"abc");
        assert!(StoredCodec.decompress(b"abc", 2).is_err());
        assert_eq!(StoredCodec.name(), "stored");
    }
}
