/*!
Snapshot codec: converts between cached bytes and the persisted subset of
`BuildState`.

The cache holds `{"metadata": ..., "state": ...}`, where the content hash in
`metadata` covers the exact bytes of `state` as written. A bare state record
without the envelope, as older builds left behind, is still read; it has no
hash to check.

Only the slices named in [`PERSISTED_SLICES`] are written. `pages`,
`nodes_by_type` and `last_action` never reach the cache; `nodes_by_type` is
rebuilt from `nodes` on load.

Loading is forgiving: an absent, unreadable or corrupt snapshot yields an
empty `BuildState` from [`SnapshotCodec::load`]. This can hide real
corruption behind what looks like a clean first build. Callers that want to
see the failure use [`SnapshotCodec::try_load`]. Saving is strict: every
failure is returned to the caller.
*/

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::compression::{CompressionAdapter, GzipCompressor, NoCompression};
use crate::config::{CacheBackend, CacheConfig, CompressionKind, DEFAULT_SNAPSHOT_KEY};
use crate::state::{
    BuildState, Component, ComponentDataDependencies, JobsV2, Module, NodeCollection,
    PendingPageDataWrites, PluginStatus, StaticQuery,
};
use crate::storage::{CacheStorage, LocalFileStorage, MemoryStorage};
use crate::{Result, SnapshotMetadata, StoreError};

/// Names of the slices written to the cache
pub const PERSISTED_SLICES: [&str; 13] = [
    "nodes",
    "status",
    "componentDataDependencies",
    "components",
    "jobsV2",
    "staticQueryComponents",
    "webpackCompilationHash",
    "pageDataStats",
    "pageData",
    "modules",
    "queryModuleDependencies",
    "pendingPageDataWrites",
    "staticQueriesByTemplate",
];

/// Top-level field left behind by caches written before per-page manifests
pub const LEGACY_JSON_DATA_PATHS: &str = "jsonDataPaths";

/// Borrowed view of the persisted slices, used on save
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRecordRef<'a> {
    nodes: &'a NodeCollection,
    status: &'a PluginStatus,
    component_data_dependencies: &'a ComponentDataDependencies,
    components: &'a BTreeMap<String, Component>,
    #[serde(rename = "jobsV2")]
    jobs_v2: &'a JobsV2,
    static_query_components: &'a BTreeMap<String, StaticQuery>,
    webpack_compilation_hash: &'a str,
    page_data_stats: &'a BTreeMap<String, u64>,
    page_data: &'a BTreeMap<String, String>,
    modules: &'a BTreeMap<String, Module>,
    query_module_dependencies: &'a BTreeMap<String, BTreeSet<String>>,
    pending_page_data_writes: &'a PendingPageDataWrites,
    static_queries_by_template: &'a BTreeMap<String, Vec<String>>,
}

impl<'a> From<&'a BuildState> for SnapshotRecordRef<'a> {
    fn from(state: &'a BuildState) -> Self {
        Self {
            nodes: &state.nodes,
            status: &state.status,
            component_data_dependencies: &state.component_data_dependencies,
            components: &state.components,
            jobs_v2: &state.jobs_v2,
            static_query_components: &state.static_query_components,
            webpack_compilation_hash: &state.webpack_compilation_hash,
            page_data_stats: &state.page_data_stats,
            page_data: &state.page_data,
            modules: &state.modules,
            query_module_dependencies: &state.query_module_dependencies,
            pending_page_data_writes: &state.pending_page_data_writes,
            static_queries_by_template: &state.static_queries_by_template,
        }
    }
}

/// Owned persisted slices, used on load. Missing slices fall back to empty;
/// fields outside the whitelist are ignored.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct SnapshotRecord {
    nodes: NodeCollection,
    status: PluginStatus,
    component_data_dependencies: ComponentDataDependencies,
    components: BTreeMap<String, Component>,
    #[serde(rename = "jobsV2")]
    jobs_v2: JobsV2,
    static_query_components: BTreeMap<String, StaticQuery>,
    webpack_compilation_hash: String,
    page_data_stats: BTreeMap<String, u64>,
    page_data: BTreeMap<String, String>,
    modules: BTreeMap<String, Module>,
    query_module_dependencies: BTreeMap<String, BTreeSet<String>>,
    pending_page_data_writes: PendingPageDataWrites,
    static_queries_by_template: BTreeMap<String, Vec<String>>,
}

impl SnapshotRecord {
    fn into_state(self) -> BuildState {
        let mut state = BuildState {
            nodes: self.nodes,
            status: self.status,
            component_data_dependencies: self.component_data_dependencies,
            components: self.components,
            jobs_v2: self.jobs_v2,
            static_query_components: self.static_query_components,
            webpack_compilation_hash: self.webpack_compilation_hash,
            page_data_stats: self.page_data_stats,
            page_data: self.page_data,
            modules: self.modules,
            query_module_dependencies: self.query_module_dependencies,
            pending_page_data_writes: self.pending_page_data_writes,
            static_queries_by_template: self.static_queries_by_template,
            ..BuildState::default()
        };
        state.reindex_nodes();
        state
    }
}

/// What `save` writes: metadata plus the state record as the exact bytes
/// the content hash was computed over
#[derive(Serialize)]
struct SnapshotEnvelope<'a> {
    metadata: &'a SnapshotMetadata,
    state: &'a RawValue,
}

/// Top-level keys of a snapshot envelope
const ENVELOPE_METADATA: &str = "metadata";
const ENVELOPE_STATE: &str = "state";

/// A record read back from the cache, hash verified where one was stored
struct CachedRecord {
    metadata: SnapshotMetadata,
    record: Map<String, Value>,
}

fn parse_record(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(record) => Ok(record),
        _ => Err(StoreError::invalid_format("Snapshot state is not an object")),
    }
}

fn record_node_count(record: &Map<String, Value>) -> usize {
    record
        .get("nodes")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Remove fields older versions wrote at the top level of the record
///
/// Returns whether anything was removed.
pub fn strip_legacy_fields(record: &mut Map<String, Value>) -> bool {
    record.remove(LEGACY_JSON_DATA_PATHS).is_some()
}

/// Reads and writes the persisted build state under one well-known key
///
/// # Example
/// ```rust
/// use sitestate_core::{BuildState, GzipCompressor, MemoryStorage, SnapshotCodec};
///
/// let codec = SnapshotCodec::new(MemoryStorage::new(), GzipCompressor::new());
/// assert!(codec.load().is_empty());
///
/// let mut state = BuildState::default();
/// state.webpack_compilation_hash = "abc".to_string();
/// codec.save(&state)?;
/// assert_eq!(codec.load().webpack_compilation_hash, "abc");
/// # Ok::<(), sitestate_core::StoreError>(())
/// ```
pub struct SnapshotCodec<S, C>
where
    S: CacheStorage,
    C: CompressionAdapter,
{
    storage: S,
    compressor: C,
    key: String,
    save_lock: Mutex<()>,
}

impl<S, C> SnapshotCodec<S, C>
where
    S: CacheStorage,
    C: CompressionAdapter,
{
    /// Create a codec storing the snapshot under `redux.state`
    pub fn new(storage: S, compressor: C) -> Self {
        Self {
            storage,
            compressor,
            key: DEFAULT_SNAPSHOT_KEY.to_string(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn with_key<K: Into<String>>(mut self, key: K) -> Self {
        self.key = key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Load the cached build state, or an empty one if that is not possible
    ///
    /// Never fails. A missing key, unreadable bytes, a checksum mismatch or
    /// a record of the wrong shape all produce `BuildState::default()`.
    pub fn load(&self) -> BuildState {
        match self.try_load() {
            Ok(Some(state)) => {
                debug!(
                    key = %self.key,
                    nodes = state.nodes.len(),
                    "Restored build state from cache"
                );
                state
            }
            Ok(None) => {
                debug!(key = %self.key, "No cached build state, starting empty");
                BuildState::default()
            }
            Err(e) => {
                debug!(key = %self.key, error = %e, "Discarding unreadable cached build state");
                #[cfg(feature = "metrics")]
                crate::observability::StoreMetrics::global().record_load_failure();
                BuildState::default()
            }
        }
    }

    /// Load the cached build state, surfacing failures
    ///
    /// # Returns
    /// `Ok(None)` if nothing is cached under the key
    pub fn try_load(&self) -> Result<Option<BuildState>> {
        Ok(self.load_snapshot()?.map(|(_, state)| state))
    }

    /// Load the cached build state together with its metadata
    ///
    /// # Errors
    /// * `StoreError::Storage` - If reading from the cache fails
    /// * `StoreError::Compression` - If the bytes cannot be decompressed
    /// * `StoreError::InvalidFormat` - If the snapshot is not UTF-8, not an
    ///   object, or written by a newer format
    /// * `StoreError::IntegrityCheckFailed` - If the content hash does not match
    /// * `StoreError::Json` - If the record does not have the expected shape
    pub fn load_snapshot(&self) -> Result<Option<(SnapshotMetadata, BuildState)>> {
        let _span = tracing::debug_span!("snapshot_load", key = %self.key).entered();

        let Some(CachedRecord {
            metadata,
            mut record,
        }) = self.read_record()?
        else {
            return Ok(None);
        };

        if strip_legacy_fields(&mut record) {
            debug!("Dropped legacy {LEGACY_JSON_DATA_PATHS} from cached state");
        }

        let record: SnapshotRecord = serde_json::from_value(Value::Object(record))?;
        Ok(Some((metadata, record.into_state())))
    }

    /// Read only the metadata of the cached snapshot
    ///
    /// A bare record cached without metadata reports
    /// [`crate::metadata::LEGACY_FORMAT_VERSION`].
    pub fn read_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        Ok(self.read_record()?.map(|cached| cached.metadata))
    }

    /// Persist the whitelisted slices of `state`
    ///
    /// Saves are serialized: a second caller waits until the first write has
    /// finished.
    ///
    /// # Returns
    /// Metadata of the written snapshot, including the compressed size
    ///
    /// # Errors
    /// * `StoreError::Validation` - If a node carries a reserved key in its
    ///   fields. Nothing is written and the previous snapshot stays in place.
    /// * `StoreError::Storage` - If the write fails
    pub fn save(&self, state: &BuildState) -> Result<SnapshotMetadata> {
        let _span = tracing::debug_span!("snapshot_save", key = %self.key).entered();
        let _guard = self
            .save_lock
            .lock()
            .map_err(|e| StoreError::storage(format!("Snapshot save lock poisoned: {e}")))?;

        for node in state.nodes.iter() {
            node.validate()?;
        }

        // The hash covers these exact bytes, which are embedded unchanged
        let state_json = serde_json::to_string(&SnapshotRecordRef::from(state))?;
        let mut metadata = SnapshotMetadata::new(state.nodes.len())
            .with_content_hash(state_json.as_bytes())
            .with_compression_algorithm(self.compressor.algorithm_name());
        metadata.validate()?;

        let state_raw = RawValue::from_string(state_json)?;
        let envelope = SnapshotEnvelope {
            metadata: &metadata,
            state: &state_raw,
        };
        let envelope_json = serde_json::to_vec(&envelope)?;
        let compressed = self.compressor.compress(&envelope_json)?;
        metadata = metadata.with_compressed_size(compressed.len());

        self.storage
            .write(&self.key, &compressed)
            .map_err(|e| StoreError::storage(format!("Failed to save build state: {e}")))?;

        #[cfg(feature = "metrics")]
        crate::observability::StoreMetrics::global().record_save(compressed.len());

        info!(
            key = %self.key,
            nodes = metadata.node_count,
            bytes = compressed.len(),
            "Saved build state"
        );
        Ok(metadata)
    }

    /// Delete the cached snapshot
    pub fn clear(&self) -> Result<()> {
        self.storage
            .delete(&self.key)
            .map_err(|e| StoreError::storage(format!("Failed to clear build state: {e}")))
    }

    pub fn snapshot_exists(&self) -> bool {
        self.storage.exists(&self.key)
    }

    fn read_record(&self) -> Result<Option<CachedRecord>> {
        let Some(bytes) = self
            .storage
            .read(&self.key)
            .map_err(|e| StoreError::storage(format!("Failed to read build state: {e}")))?
        else {
            return Ok(None);
        };

        let decompressed = self.compressor.decompress(&bytes)?;
        let text = String::from_utf8(decompressed)
            .map_err(|e| StoreError::invalid_format(format!("Invalid UTF-8 in snapshot: {e}")))?;

        let mut top: HashMap<String, Box<RawValue>> = serde_json::from_str(&text)?;
        let cached = match (top.remove(ENVELOPE_METADATA), top.remove(ENVELOPE_STATE)) {
            (Some(metadata), Some(state)) => {
                let metadata: SnapshotMetadata = serde_json::from_str(metadata.get())?;
                if !metadata.is_compatible() {
                    return Err(StoreError::invalid_format(format!(
                        "Incompatible snapshot format version: {} (current: {})",
                        metadata.format_version,
                        crate::metadata::SNAPSHOT_FORMAT_VERSION
                    )));
                }
                metadata.verify_integrity(state.get().as_bytes())?;
                CachedRecord {
                    metadata,
                    record: parse_record(state.get())?,
                }
            }
            (None, None) => {
                debug!(key = %self.key, "Cached build state has no metadata, reading bare record");
                let record = parse_record(&text)?;
                let node_count = record_node_count(&record);
                let metadata = SnapshotMetadata::legacy(text.as_bytes(), node_count)
                    .with_compression_algorithm(self.compressor.algorithm_name())
                    .with_compressed_size(bytes.len());
                CachedRecord { metadata, record }
            }
            _ => {
                return Err(StoreError::invalid_format(
                    "Snapshot envelope must hold both metadata and state",
                ))
            }
        };

        Ok(Some(cached))
    }
}

/// Object-safe view of a snapshot codec
///
/// Lets the store and the CLI work with codecs built from configuration
/// without naming their storage and compression types.
pub trait SnapshotCodecInterface: Send + Sync {
    fn key(&self) -> &str;
    fn load(&self) -> BuildState;
    fn try_load(&self) -> Result<Option<BuildState>>;
    fn load_snapshot(&self) -> Result<Option<(SnapshotMetadata, BuildState)>>;
    fn read_metadata(&self) -> Result<Option<SnapshotMetadata>>;
    fn save(&self, state: &BuildState) -> Result<SnapshotMetadata>;
    fn clear(&self) -> Result<()>;
    fn snapshot_exists(&self) -> bool;
}

impl<S, C> SnapshotCodecInterface for SnapshotCodec<S, C>
where
    S: CacheStorage + Send + Sync,
    C: CompressionAdapter + Send + Sync,
{
    fn key(&self) -> &str {
        self.key()
    }

    fn load(&self) -> BuildState {
        self.load()
    }

    fn try_load(&self) -> Result<Option<BuildState>> {
        self.try_load()
    }

    fn load_snapshot(&self) -> Result<Option<(SnapshotMetadata, BuildState)>> {
        self.load_snapshot()
    }

    fn read_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        self.read_metadata()
    }

    fn save(&self, state: &BuildState) -> Result<SnapshotMetadata> {
        self.save(state)
    }

    fn clear(&self) -> Result<()> {
        self.clear()
    }

    fn snapshot_exists(&self) -> bool {
        self.snapshot_exists()
    }
}

/// Codec for a local cache directory with gzip compression
pub fn create_default_codec<P: AsRef<std::path::Path>>(
    cache_dir: P,
) -> SnapshotCodec<LocalFileStorage, GzipCompressor> {
    SnapshotCodec::new(LocalFileStorage::new(cache_dir), GzipCompressor::new())
}

/// Build a codec from configuration
///
/// # Example
/// ```rust
/// use sitestate_core::{create_codec_from_config, CacheConfig};
///
/// let codec = create_codec_from_config(&CacheConfig::in_memory())?;
/// assert!(!codec.snapshot_exists());
/// # Ok::<(), sitestate_core::StoreError>(())
/// ```
pub fn create_codec_from_config(config: &CacheConfig) -> Result<Box<dyn SnapshotCodecInterface>> {
    config.validate()?;

    let compressor: Box<dyn CompressionAdapter + Send + Sync> = match config.compression {
        CompressionKind::Gzip => Box::new(
            config
                .compression_level
                .map(GzipCompressor::with_level)
                .unwrap_or_default(),
        ),
        CompressionKind::None => Box::new(NoCompression::new()),
    };

    match config.backend {
        CacheBackend::Local => {
            let storage = LocalFileStorage::new(config.resolved_cache_dir());
            Ok(Box::new(
                SnapshotCodec::new(storage, compressor).with_key(&config.snapshot_key),
            ))
        }
        CacheBackend::Memory => Ok(Box::new(
            SnapshotCodec::new(MemoryStorage::new(), compressor).with_key(&config.snapshot_key),
        )),
    }
}
