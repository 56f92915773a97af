/*!
Actions: tagged requests for a single state transition.

Actions serialize as `{"type": "CREATE_NODE", "payload": {...}}`. The `type`
tag doubles as the notification event name.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{JobV2, Module, Node, Page, StaticQuery};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchNode {
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRef {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginStatusUpdate {
    pub plugin: String,
    pub status: Value,
}

/// Records that the page at `path` reads a node or a whole node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDependency {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPaths {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedQuery {
    pub component_path: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStaticQueries {
    pub component_path: String,
    pub static_query_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDataSize {
    pub page_path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDataHash {
    pub page_path: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCreated {
    pub job: JobV2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnded {
    pub content_digest: String,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDependency {
    pub query_id: String,
    pub module_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDataWrite {
    pub component_path: String,
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWriteFlushed {
    pub page: String,
}

/// A single state transition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    CreateNode(Node),
    TouchNode(TouchNode),
    DeleteNode(NodeRef),
    DeleteNodes(Vec<String>),
    CreatePage(Page),
    DeletePage(PageRef),
    SetPluginStatus(PluginStatusUpdate),
    UpdatePluginsHash(String),
    SetWebpackCompilationHash(String),
    CreateComponentDependency(ComponentDependency),
    DeleteComponentsDependencies(ComponentPaths),
    QueryExtracted(ExtractedQuery),
    ReplaceStaticQuery(StaticQuery),
    RemoveStaticQuery(String),
    SetStaticQueriesByTemplate(TemplateStaticQueries),
    AddPageDataStats(PageDataSize),
    SetPageDataHash(PageDataHash),
    CreateJobV2(JobCreated),
    EndJobV2(JobEnded),
    RegisterModule(Module),
    CreateModuleDependency(ModuleDependency),
    AddPendingPageDataWrite(PageRef),
    AddPendingTemplateDataWrite(TemplateDataWrite),
    ClearPendingPageDataWrite(PendingWriteFlushed),
    DeleteCache,
}

impl Action {
    /// The `type` tag, also used as the notification event name
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::CreateNode(_) => "CREATE_NODE",
            Action::TouchNode(_) => "TOUCH_NODE",
            Action::DeleteNode(_) => "DELETE_NODE",
            Action::DeleteNodes(_) => "DELETE_NODES",
            Action::CreatePage(_) => "CREATE_PAGE",
            Action::DeletePage(_) => "DELETE_PAGE",
            Action::SetPluginStatus(_) => "SET_PLUGIN_STATUS",
            Action::UpdatePluginsHash(_) => "UPDATE_PLUGINS_HASH",
            Action::SetWebpackCompilationHash(_) => "SET_WEBPACK_COMPILATION_HASH",
            Action::CreateComponentDependency(_) => "CREATE_COMPONENT_DEPENDENCY",
            Action::DeleteComponentsDependencies(_) => "DELETE_COMPONENTS_DEPENDENCIES",
            Action::QueryExtracted(_) => "QUERY_EXTRACTED",
            Action::ReplaceStaticQuery(_) => "REPLACE_STATIC_QUERY",
            Action::RemoveStaticQuery(_) => "REMOVE_STATIC_QUERY",
            Action::SetStaticQueriesByTemplate(_) => "SET_STATIC_QUERIES_BY_TEMPLATE",
            Action::AddPageDataStats(_) => "ADD_PAGE_DATA_STATS",
            Action::SetPageDataHash(_) => "SET_PAGE_DATA_HASH",
            Action::CreateJobV2(_) => "CREATE_JOB_V2",
            Action::EndJobV2(_) => "END_JOB_V2",
            Action::RegisterModule(_) => "REGISTER_MODULE",
            Action::CreateModuleDependency(_) => "CREATE_MODULE_DEPENDENCY",
            Action::AddPendingPageDataWrite(_) => "ADD_PENDING_PAGE_DATA_WRITE",
            Action::AddPendingTemplateDataWrite(_) => "ADD_PENDING_TEMPLATE_DATA_WRITE",
            Action::ClearPendingPageDataWrite(_) => "CLEAR_PENDING_PAGE_DATA_WRITE",
            Action::DeleteCache => "DELETE_CACHE",
        }
    }

    pub fn create_node(node: Node) -> Self {
        Action::CreateNode(node)
    }

    pub fn delete_node<S: Into<String>>(id: S) -> Self {
        Action::DeleteNode(NodeRef { id: id.into() })
    }

    pub fn create_page(page: Page) -> Self {
        Action::CreatePage(page)
    }
}

/// Input to `StateStore::dispatch`: one action or a batch
///
/// `None` slots in a batch are skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    One(Action),
    Batch(Vec<Option<Action>>),
}

impl From<Action> for Dispatch {
    fn from(action: Action) -> Self {
        Dispatch::One(action)
    }
}

impl From<Vec<Option<Action>>> for Dispatch {
    fn from(actions: Vec<Option<Action>>) -> Self {
        Dispatch::Batch(actions)
    }
}

impl From<Vec<Action>> for Dispatch {
    fn from(actions: Vec<Action>) -> Self {
        Dispatch::Batch(actions.into_iter().map(Some).collect())
    }
}

/// Result of a dispatch, mirroring the shape of its input
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    One(Action),
    Many(Vec<Action>),
}

impl Dispatched {
    /// All applied actions in order
    pub fn into_actions(self) -> Vec<Action> {
        match self {
            Dispatched::One(action) => vec![action],
            Dispatched::Many(actions) => actions,
        }
    }
}
