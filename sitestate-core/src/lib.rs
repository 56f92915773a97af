/*!
# Sitestate Core

Reducer-driven build state for a static-site generator, persisted between
runs through a cached snapshot.

- A single `BuildState` aggregate mutated only by dispatching `Action`s
- A derived `nodes_by_type` index kept in step with `nodes`
- Snapshot persistence of a fixed set of slices, with integrity checks
- A notification bus that republishes every applied action by type

## Architecture

Storage and compression are adapters behind the `CacheStorage` and
`CompressionAdapter` traits. The `SnapshotCodec` combines them; the
`StateStore` owns the live state, runs the reducers and feeds subscribers
and the `NotificationBus`.

## Usage

```rust
use std::sync::Arc;
use sitestate_core::{
    Action, GzipCompressor, MemoryStorage, Node, NotificationBus, SnapshotCodec, StateStore,
};

let storage = MemoryStorage::new();
let codec = SnapshotCodec::new(storage.clone(), GzipCompressor::new());
let mut store = StateStore::open(Box::new(codec), Arc::new(NotificationBus::new()));

store.dispatch(Action::create_node(Node::new("1", "Post")));
store.save()?;

// Next run
let codec = SnapshotCodec::new(storage, GzipCompressor::new());
let store = StateStore::open(Box::new(codec), Arc::new(NotificationBus::new()));
assert!(store.get_state().nodes_by_type.get_node("Post", "1").is_some());
# Ok::<(), sitestate_core::StoreError>(())
```
*/

pub mod action;
pub mod bus;
pub mod compression;
pub mod config;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod reducers;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod store;


pub use action::{Action, Dispatch, Dispatched};
pub use bus::{EmitReport, ListenerId, NotificationBus};
pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::{CacheBackend, CacheConfig, CompressionKind};
pub use error::{ListenerError, Result, StoreError};
pub use metadata::SnapshotMetadata;
pub use snapshot::{
    create_codec_from_config, create_default_codec, SnapshotCodec, SnapshotCodecInterface,
    PERSISTED_SLICES,
};
pub use state::{BuildState, Node, NodeCollection, NodesByType, Page};
pub use storage::{CacheStorage, LocalFileStorage, MemoryStorage};
pub use store::{StateStore, SubscriptionId};
