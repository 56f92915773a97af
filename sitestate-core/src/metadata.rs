/*!
Snapshot metadata: provenance and integrity data stored next to the
persisted build state.
*/

use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Current snapshot format version
pub const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// Format version reported for bare records written without metadata
pub const LEGACY_FORMAT_VERSION: u8 = 0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    /// Unique identifier for this save
    pub snapshot_id: String,

    pub created_at: DateTime<Utc>,

    /// SHA-256 of the serialized state record
    pub content_hash: String,

    pub format_version: u8,

    /// Size of the serialized state record in bytes
    pub uncompressed_size: usize,

    /// Size of the bytes written to the cache
    pub compressed_size: Option<usize>,

    pub compression_algorithm: String,

    /// Number of nodes in the persisted `nodes` slice
    pub node_count: usize,
}

impl SnapshotMetadata {
    /// Create metadata for a new snapshot
    ///
    /// # Example
    /// ```rust
    /// use sitestate_core::SnapshotMetadata;
    ///
    /// let metadata = SnapshotMetadata::new(3).with_content_hash(b"{}");
    /// assert_eq!(metadata.node_count, 3);
    /// assert!(metadata.verify_integrity(b"{}").is_ok());
    /// ```
    pub fn new(node_count: usize) -> Self {
        Self {
            snapshot_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            content_hash: String::new(),
            format_version: SNAPSHOT_FORMAT_VERSION,
            uncompressed_size: 0,
            compressed_size: None,
            compression_algorithm: "gzip".to_string(),
            node_count,
        }
    }

    /// Set the content hash and uncompressed size from the serialized state
    pub fn with_content_hash(mut self, state_bytes: &[u8]) -> Self {
        self.content_hash = Self::compute_hash(state_bytes);
        self.uncompressed_size = state_bytes.len();
        self
    }

    /// Describe a bare record that was cached without metadata
    ///
    /// The hash is computed here, so it only identifies the content and
    /// proves nothing about its integrity.
    pub fn legacy(state_bytes: &[u8], node_count: usize) -> Self {
        Self {
            snapshot_id: "legacy".to_string(),
            format_version: LEGACY_FORMAT_VERSION,
            ..Self::new(node_count).with_content_hash(state_bytes)
        }
    }

    pub fn with_compressed_size(mut self, compressed_size: usize) -> Self {
        self.compressed_size = Some(compressed_size);
        self
    }

    pub fn with_compression_algorithm<S: Into<String>>(mut self, algorithm: S) -> Self {
        self.compression_algorithm = algorithm.into();
        self
    }

    /// Hexadecimal SHA-256 of `data`
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Check `state_bytes` against the recorded hash
    pub fn verify_integrity(&self, state_bytes: &[u8]) -> Result<()> {
        let computed_hash = Self::compute_hash(state_bytes);
        if computed_hash == self.content_hash {
            Ok(())
        } else {
            Err(StoreError::IntegrityCheckFailed {
                expected: self.content_hash.clone(),
                actual: computed_hash,
            })
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.snapshot_id.is_empty() {
            return Err(StoreError::validation("snapshot_id cannot be empty"));
        }
        if self.content_hash.is_empty() {
            return Err(StoreError::validation("content_hash cannot be empty"));
        }
        Ok(())
    }

    /// Snapshots written by a newer format are not readable
    pub fn is_compatible(&self) -> bool {
        self.format_version <= SNAPSHOT_FORMAT_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_creation() {
        let metadata = SnapshotMetadata::new(12);
        assert_eq!(metadata.node_count, 12);
        assert_eq!(metadata.format_version, SNAPSHOT_FORMAT_VERSION);
        assert!(!metadata.snapshot_id.is_empty());
        assert!(metadata.compressed_size.is_none());
    }

    #[test]
    fn test_content_hash() {
        let hash = SnapshotMetadata::compute_hash(b"test data");
        assert_eq!(
            hash,
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_integrity_verification() {
        let data = br#"{"nodes":[]}"#;
        let metadata = SnapshotMetadata::new(0).with_content_hash(data);

        assert_eq!(metadata.uncompressed_size, data.len());
        assert!(metadata.verify_integrity(data).is_ok());

        let tampered = br#"{"nodes":[1]}"#;
        assert!(matches!(
            metadata.verify_integrity(tampered),
            Err(StoreError::IntegrityCheckFailed { .. })
        ));
    }

    #[test]
    fn test_validation() {
        let metadata = SnapshotMetadata::new(0);
        assert!(metadata.validate().is_err());

        let metadata = metadata.with_content_hash(b"{}");
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_future_format_is_incompatible() {
        let mut metadata = SnapshotMetadata::new(0);
        assert!(metadata.is_compatible());

        metadata.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        assert!(!metadata.is_compatible());
    }

    #[test]
    fn test_legacy_metadata() {
        let metadata = SnapshotMetadata::legacy(br#"{"nodes":[]}"#, 0);
        assert_eq!(metadata.format_version, LEGACY_FORMAT_VERSION);
        assert_eq!(metadata.snapshot_id, "legacy");
        assert!(metadata.is_compatible());
        assert!(metadata.validate().is_ok());
    }
}
