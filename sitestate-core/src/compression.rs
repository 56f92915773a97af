/*!
Compression adapters for snapshot bytes.

Snapshots are mostly repetitive JSON, so they are gzip-compressed before they
reach the cache by default. `NoCompression` keeps the cache human-readable.
*/

use crate::{Result, StoreError};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Compression abstraction for snapshot data
pub trait CompressionAdapter {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Name recorded in snapshot metadata
    fn algorithm_name(&self) -> &str;
}

impl<T: CompressionAdapter + ?Sized> CompressionAdapter for Box<T> {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        (**self).compress(data)
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        (**self).decompress(compressed_data)
    }

    fn algorithm_name(&self) -> &str {
        (**self).algorithm_name()
    }
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use sitestate_core::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = br#"{"nodes":[],"pageData":{}}"#;
/// let compressed = compressor.compress(data)?;
/// assert_eq!(compressor.decompress(&compressed)?, data.to_vec());
/// # Ok::<(), sitestate_core::StoreError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a gzip compressor with level 0 (none) to 9 (best)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level),
        }
    }

    /// Level 1: cheapest saves for large node sets
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    pub fn max() -> Self {
        Self::with_level(9)
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            StoreError::compression(format!("Failed to write snapshot for compression: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| StoreError::compression(format!("Failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| StoreError::compression(format!("Failed to decompress snapshot: {e}")))?;

        Ok(decompressed)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Pass-through adapter that stores snapshot JSON as-is
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}
