/*!
End-to-end tests for the build-state store: open from a cache directory,
dispatch, save, and reopen as the next run would.
*/

use mockall::mock;
use serde_json::{json, Value};
use sitestate_core::action::{ComponentDependency, JobCreated, JobEnded, PageDataSize};
use sitestate_core::state::JobV2;
use sitestate_core::{
    create_codec_from_config, Action, BuildState, CacheConfig, CacheStorage, CompressionAdapter,
    GzipCompressor, LocalFileStorage, Node, NotificationBus, Page, SnapshotCodec,
    SnapshotMetadata, StateStore, StoreError,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

mock! {
    pub FailingStorage {}
    impl CacheStorage for FailingStorage {
        fn read(&self, key: &str) -> sitestate_core::Result<Option<Vec<u8>>>;
        fn write(&self, key: &str, data: &[u8]) -> sitestate_core::Result<()>;
        fn exists(&self, key: &str) -> bool;
        fn delete(&self, key: &str) -> sitestate_core::Result<()>;
    }
}

fn open_store(cache_dir: &TempDir) -> StateStore {
    let config = CacheConfig::default_local().with_cache_dir(cache_dir.path());
    let codec = create_codec_from_config(&config).unwrap();
    StateStore::open(codec, Arc::new(NotificationBus::new()))
}

/// Write `record` to the cache the way a previous run would have
fn seed_cache(cache_dir: &TempDir, record: Value) {
    let state_json = serde_json::to_string(&record).unwrap();
    let metadata = SnapshotMetadata::new(0).with_content_hash(state_json.as_bytes());
    let container = json!({ "metadata": metadata, "state": record });

    let compressed = GzipCompressor::new()
        .compress(&serde_json::to_vec(&container).unwrap())
        .unwrap();
    LocalFileStorage::new(cache_dir.path())
        .write("redux.state", &compressed)
        .unwrap();
}

#[test]
fn test_cached_post_node_is_indexed_and_legacy_fields_dropped() {
    let cache_dir = TempDir::new().unwrap();
    seed_cache(
        &cache_dir,
        json!({
            "nodes": [{"id": "1", "internal": {"type": "Post"}}],
            "jsonDataPaths": {"/blog/": "abc123"},
            "pages": [{"path": "/blog/", "component": "src/templates/blog.js"}]
        }),
    );

    let mut store = open_store(&cache_dir);
    let state = store.get_state();

    let posts = state.nodes_by_type.get("Post").unwrap();
    assert_eq!(posts.len(), 1);
    assert!(Arc::ptr_eq(&posts["1"], state.nodes.get("1").unwrap()));
    assert_eq!(state.nodes_by_type.types().collect::<Vec<_>>(), vec!["Post"]);

    // Pages are not restored from the cache; they come back through dispatch
    assert!(state.pages.is_empty());
    store.dispatch(Action::create_page(Page::new(
        "/blog/",
        "src/templates/blog.js",
    )));
    assert!(store.get_state().pages.contains_key("/blog/"));
}

#[test]
fn test_bare_cached_record_without_metadata_is_restored() {
    let cache_dir = TempDir::new().unwrap();
    let record = json!({
        "nodes": [{"id": "1", "internal": {"type": "Post"}}],
        "jsonDataPaths": {"/blog/": "abc123"},
        "pages": [{"path": "/blog/", "component": "src/templates/blog.js"}]
    });
    let compressed = GzipCompressor::new()
        .compress(&serde_json::to_vec(&record).unwrap())
        .unwrap();
    LocalFileStorage::new(cache_dir.path())
        .write("redux.state", &compressed)
        .unwrap();

    let store = open_store(&cache_dir);
    let state = store.get_state();
    let posts = state.nodes_by_type.get("Post").unwrap();
    assert_eq!(posts.len(), 1);
    assert!(Arc::ptr_eq(&posts["1"], state.nodes.get("1").unwrap()));
    assert!(state.pages.is_empty());

    let config = CacheConfig::default_local().with_cache_dir(cache_dir.path());
    let metadata = create_codec_from_config(&config)
        .unwrap()
        .read_metadata()
        .unwrap()
        .unwrap();
    assert_eq!(metadata.format_version, 0);
    assert_eq!(metadata.node_count, 1);
}

#[test]
fn test_index_matches_nodes_after_load() {
    let cache_dir = TempDir::new().unwrap();
    let nodes: Vec<Value> = (0..50)
        .map(|i| {
            let node_type = ["Post", "Author", "Tag"][i % 3];
            json!({"id": format!("node-{i}"), "internal": {"type": node_type}})
        })
        .collect();
    seed_cache(&cache_dir, json!({ "nodes": nodes }));

    let store = open_store(&cache_dir);
    let state = store.get_state();
    assert_eq!(state.nodes.len(), 50);
    assert!(state.node_index_consistent());
    assert_eq!(state.nodes_by_type.node_count(), 50);
}

#[test]
fn test_corrupt_cache_opens_empty() {
    let cache_dir = TempDir::new().unwrap();
    std::fs::write(cache_dir.path().join("redux.state"), b"not gzip at all").unwrap();

    let store = open_store(&cache_dir);
    assert!(store.get_state().is_empty());
}

#[test]
fn test_missing_cache_dir_opens_empty() {
    let cache_dir = TempDir::new().unwrap();
    let config = CacheConfig::default_local().with_cache_dir(cache_dir.path().join("absent"));
    let codec = create_codec_from_config(&config).unwrap();

    let store = StateStore::open(codec, Arc::new(NotificationBus::new()));
    assert!(store.get_state().is_empty());
}

#[test]
fn test_save_and_reopen_keeps_persisted_slices() {
    let cache_dir = TempDir::new().unwrap();
    let mut store = open_store(&cache_dir);

    store.dispatch(vec![
        Action::create_node(Node::new("1", "Post").with_field("title", "Hello")),
        Action::create_node(Node::new("2", "Author")),
        Action::create_page(Page::new("/", "src/pages/index.js")),
        Action::CreateComponentDependency(ComponentDependency {
            path: "/".to_string(),
            node_id: Some("1".to_string()),
            connection: None,
        }),
        Action::AddPageDataStats(PageDataSize {
            page_path: "/".to_string(),
            size: 1024,
        }),
        Action::CreateJobV2(JobCreated {
            job: JobV2 {
                content_digest: "digest-1".to_string(),
                name: "IMAGE_PROCESSING".to_string(),
                inputs: vec!["src/images/a.png".to_string()],
                output_dir: "public/static".to_string(),
                args: json!({"width": 400}),
                plugin: Some("gatsby-plugin-sharp".to_string()),
            },
        }),
        Action::EndJobV2(JobEnded {
            content_digest: "digest-1".to_string(),
            result: json!({"ok": true}),
        }),
        Action::SetWebpackCompilationHash("webpack-1".to_string()),
    ]);
    let before = store.get_state().clone();
    store.save().unwrap();
    drop(store);

    let reopened = open_store(&cache_dir);
    let after = reopened.get_state();

    assert_eq!(after.nodes, before.nodes);
    assert_eq!(after.component_data_dependencies, before.component_data_dependencies);
    assert_eq!(after.page_data_stats, before.page_data_stats);
    assert_eq!(after.jobs_v2, before.jobs_v2);
    assert_eq!(after.webpack_compilation_hash, before.webpack_compilation_hash);
    assert_eq!(after.components, before.components);

    assert!(after.pages.is_empty());
    assert!(after.last_action.is_none());
    assert!(after.node_index_consistent());
}

#[test]
fn test_save_failure_reaches_caller() {
    let mut storage = MockFailingStorage::new();
    storage.expect_read().returning(|_| Ok(None));
    storage
        .expect_write()
        .times(1)
        .returning(|_, _| Err(StoreError::storage("read-only file system")));

    let codec = SnapshotCodec::new(storage, GzipCompressor::new());
    let mut store = StateStore::open(Box::new(codec), Arc::new(NotificationBus::new()));
    store.dispatch(Action::create_node(Node::new("1", "Post")));

    let err = store.save().unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
    assert!(err.to_string().contains("read-only file system"));
}

#[test]
fn test_bus_emission_per_dispatched_action() {
    let cache_dir = TempDir::new().unwrap();
    let mut store = open_store(&cache_dir);

    let received: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    for event in ["CREATE_NODE", "DELETE_NODE"] {
        let sink = Arc::clone(&received);
        store.bus().on(event, move |action: &Action| {
            sink.lock()
                .unwrap()
                .push((event.to_string(), serde_json::to_value(action).unwrap()));
            Ok(())
        });
    }

    let create = Action::create_node(Node::new("1", "Post"));
    let delete = Action::delete_node("1");
    store.dispatch(vec![Some(create.clone()), None, Some(delete.clone())]);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].0, "CREATE_NODE");
    assert_eq!(received[0].1, serde_json::to_value(&create).unwrap());
    assert_eq!(received[1].0, "DELETE_NODE");
    assert_eq!(received[1].1, serde_json::to_value(&delete).unwrap());
}

#[test]
fn test_index_stays_consistent_through_node_churn() {
    let mut state_store = StateStore::with_state(
        BuildState::default(),
        create_codec_from_config(&CacheConfig::in_memory()).unwrap(),
        Arc::new(NotificationBus::new()),
    );

    state_store.dispatch(vec![
        Action::create_node(Node::new("1", "Post")),
        Action::create_node(Node::new("2", "Post")),
        Action::create_node(Node::new("1", "Draft")),
        Action::DeleteNodes(vec!["2".to_string()]),
    ]);

    let state = state_store.get_state();
    assert!(state.node_index_consistent());
    assert!(state.nodes_by_type.get("Post").is_none());
    assert!(state.nodes_by_type.get_node("Draft", "1").is_some());
}

#[test]
fn test_delete_cache_empties_persisted_snapshot() {
    let cache_dir = TempDir::new().unwrap();
    let mut store = open_store(&cache_dir);
    store.dispatch(Action::create_node(Node::new("1", "Post")));
    store.save().unwrap();

    store.dispatch(Action::DeleteCache);
    store.save().unwrap();

    let reopened = open_store(&cache_dir);
    assert!(reopened.get_state().is_empty());
}
