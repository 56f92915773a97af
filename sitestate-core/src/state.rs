/*!
In-memory build state model.

`BuildState` is the single aggregate owned by the state store. Each field is a
named slice mutated only through reducers. Nodes are kept twice: once in the
canonical, insertion-ordered `nodes` collection and once in the derived
`nodes_by_type` index. Both hold the same `Arc<Node>`, so an index lookup
returns the very node stored in the collection.
*/

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::action::Action;
use crate::StoreError;

/// Keys owned by `Node` itself; they cannot appear in `Node::fields`
pub const RESERVED_NODE_KEYS: [&str; 4] = ["id", "parent", "children", "internal"];

/// Internal bookkeeping carried by every node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInternal {
    /// Type classifier used for the by-type index
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub content_digest: String,
    /// Plugin that created the node
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub counter: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A content unit identified by `id` and classified by `internal.node_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    pub internal: NodeInternal,
    /// Source-specific fields, kept verbatim
    ///
    /// Must not contain any of [`RESERVED_NODE_KEYS`]; a node that does is
    /// rejected by `Node::validate` and cannot be saved.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Node {
    /// Create a node with the given id and type and no other data
    ///
    /// # Example
    /// ```rust
    /// use sitestate_core::Node;
    ///
    /// let node = Node::new("1", "Post").with_field("title", "Hello");
    /// assert_eq!(node.node_type(), "Post");
    /// ```
    pub fn new<I, T>(id: I, node_type: T) -> Self
    where
        I: Into<String>,
        T: Into<String>,
    {
        Self {
            id: id.into(),
            parent: None,
            children: Vec::new(),
            internal: NodeInternal {
                node_type: node_type.into(),
                ..NodeInternal::default()
            },
            fields: Map::new(),
        }
    }

    pub fn with_parent<S: Into<String>>(mut self, parent: S) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_owner<S: Into<String>>(mut self, owner: S) -> Self {
        self.internal.owner = owner.into();
        self
    }

    pub fn with_content_digest<S: Into<String>>(mut self, digest: S) -> Self {
        self.internal.content_digest = digest.into();
        self
    }

    /// Add a source-specific field
    ///
    /// Reserved keys are dropped with a warning; use [`Node::set_field`] to
    /// get an error instead.
    pub fn with_field<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        if let Err(e) = self.set_field(key, value) {
            tracing::warn!(node = %self.id, error = %e, "Ignoring reserved node field");
        }
        self
    }

    /// Set a source-specific field, returning the previous value
    ///
    /// # Errors
    /// * `StoreError::Validation` - If `key` is one of [`RESERVED_NODE_KEYS`]
    pub fn set_field<K: Into<String>, V: Into<Value>>(
        &mut self,
        key: K,
        value: V,
    ) -> crate::Result<Option<Value>> {
        let key = key.into();
        if RESERVED_NODE_KEYS.contains(&key.as_str()) {
            return Err(StoreError::validation(format!(
                "Field '{key}' is reserved on node '{}'",
                self.id
            )));
        }
        Ok(self.fields.insert(key, value.into()))
    }

    /// Check that `fields` does not shadow a reserved key
    pub fn validate(&self) -> crate::Result<()> {
        match RESERVED_NODE_KEYS
            .iter()
            .find(|key| self.fields.contains_key(**key))
        {
            Some(key) => Err(StoreError::validation(format!(
                "Field '{key}' is reserved on node '{}'",
                self.id
            ))),
            None => Ok(()),
        }
    }

    pub fn node_type(&self) -> &str {
        &self.internal.node_type
    }
}

/// Insertion-ordered collection of nodes with unique ids
///
/// Inserting a node whose id already exists replaces it in place, keeping its
/// original position. Serialized as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCollection {
    nodes: Vec<Arc<Node>>,
    positions: HashMap<String, usize>,
}

impl NodeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node, returning the node it replaced
    pub fn insert(&mut self, node: Arc<Node>) -> Option<Arc<Node>> {
        match self.positions.get(&node.id) {
            Some(&index) => Some(std::mem::replace(&mut self.nodes[index], node)),
            None => {
                self.positions.insert(node.id.clone(), self.nodes.len());
                self.nodes.push(node);
                None
            }
        }
    }

    /// Remove a node by id, preserving the order of the remaining nodes
    pub fn remove(&mut self, id: &str) -> Option<Arc<Node>> {
        let index = self.positions.remove(id)?;
        let removed = self.nodes.remove(index);
        for (offset, node) in self.nodes[index..].iter().enumerate() {
            self.positions.insert(node.id.clone(), index + offset);
        }
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Node>> {
        self.positions.get(id).map(|&index| &self.nodes[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.iter()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.positions.clear();
    }
}

impl FromIterator<Arc<Node>> for NodeCollection {
    fn from_iter<T: IntoIterator<Item = Arc<Node>>>(iter: T) -> Self {
        let mut collection = NodeCollection::new();
        for node in iter {
            collection.insert(node);
        }
        collection
    }
}

impl FromIterator<Node> for NodeCollection {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        iter.into_iter().map(Arc::new).collect()
    }
}

impl Serialize for NodeCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.nodes.iter().map(|node| node.as_ref()))
    }
}

impl<'de> Deserialize<'de> for NodeCollection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nodes = Vec::<Node>::deserialize(deserializer)?;
        Ok(nodes.into_iter().collect())
    }
}

/// Derived two-level index: node type -> node id -> node
///
/// Never persisted. Rebuilt from `nodes` on load and kept in step by the
/// reducers afterwards. Empty type buckets are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodesByType(BTreeMap<String, BTreeMap<String, Arc<Node>>>);

impl NodesByType {
    /// Build the index from scratch
    pub fn from_nodes(nodes: &NodeCollection) -> Self {
        let mut index = NodesByType::default();
        for node in nodes.iter() {
            index.insert(Arc::clone(node));
        }
        index
    }

    pub fn insert(&mut self, node: Arc<Node>) {
        self.0
            .entry(node.internal.node_type.clone())
            .or_default()
            .insert(node.id.clone(), node);
    }

    /// Remove a node from the bucket of its type
    pub fn remove(&mut self, node: &Node) -> Option<Arc<Node>> {
        let bucket = self.0.get_mut(&node.internal.node_type)?;
        let removed = bucket.remove(&node.id);
        if bucket.is_empty() {
            self.0.remove(&node.internal.node_type);
        }
        removed
    }

    pub fn get(&self, node_type: &str) -> Option<&BTreeMap<String, Arc<Node>>> {
        self.0.get(node_type)
    }

    pub fn get_node(&self, node_type: &str, id: &str) -> Option<&Arc<Node>> {
        self.0.get(node_type).and_then(|bucket| bucket.get(id))
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of indexed nodes across all types
    pub fn node_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginStatus {
    #[serde(default)]
    pub plugins: BTreeMap<String, Value>,
    #[serde(rename = "PLUGINS_HASH", default)]
    pub plugins_hash: String,
}

/// Which pages depend on which nodes and node-type connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentDataDependencies {
    #[serde(default)]
    pub nodes: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub connections: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub component_path: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub pages: BTreeSet<String>,
    #[serde(default)]
    pub is_in_bootstrap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobV2 {
    pub content_digest: String,
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub output_dir: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedJob {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobsV2 {
    #[serde(default)]
    pub incomplete: BTreeMap<String, JobV2>,
    #[serde(default)]
    pub complete: BTreeMap<String, CompletedJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticQuery {
    pub id: String,
    pub name: String,
    pub component_path: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub hash: String,
}

/// A module imported by one or more queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    #[serde(rename = "moduleID")]
    pub module_id: String,
    pub source: String,
    #[serde(rename = "type", default)]
    pub module_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_name: Option<String>,
    #[serde(rename = "queryIDs", default)]
    pub query_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPageDataWrites {
    #[serde(default)]
    pub page_paths: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub path: String,
    /// Path of the template component rendering this page
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_path: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_creator_id: Option<String>,
}

impl Page {
    pub fn new<P: Into<String>, C: Into<String>>(path: P, component: C) -> Self {
        Self {
            path: path.into(),
            component: component.into(),
            match_path: None,
            context: Map::new(),
            plugin_creator_id: None,
        }
    }
}

/// The full in-memory build state for one process run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildState {
    pub nodes: NodeCollection,
    pub nodes_by_type: NodesByType,
    pub status: PluginStatus,
    pub component_data_dependencies: ComponentDataDependencies,
    pub components: BTreeMap<String, Component>,
    pub jobs_v2: JobsV2,
    pub static_query_components: BTreeMap<String, StaticQuery>,
    pub webpack_compilation_hash: String,
    pub page_data_stats: BTreeMap<String, u64>,
    pub page_data: BTreeMap<String, String>,
    pub modules: BTreeMap<String, Module>,
    pub query_module_dependencies: BTreeMap<String, BTreeSet<String>>,
    pub pending_page_data_writes: PendingPageDataWrites,
    pub static_queries_by_template: BTreeMap<String, Vec<String>>,
    pub pages: BTreeMap<String, Page>,
    /// Most recently applied action
    pub last_action: Option<Action>,
}

impl BuildState {
    /// True when no slice holds any data
    pub fn is_empty(&self) -> bool {
        *self == BuildState::default()
    }

    /// Rebuild `nodes_by_type` from `nodes`
    pub fn reindex_nodes(&mut self) {
        self.nodes_by_type = NodesByType::from_nodes(&self.nodes);
    }

    /// Whether `nodes_by_type` holds exactly the nodes in `nodes`
    pub fn node_index_consistent(&self) -> bool {
        if self.nodes_by_type.node_count() != self.nodes.len() {
            return false;
        }
        self.nodes.iter().all(|node| {
            self.nodes_by_type
                .get_node(node.node_type(), &node.id)
                .is_some_and(|indexed| Arc::ptr_eq(indexed, node))
        })
    }
}
