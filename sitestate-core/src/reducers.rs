/*!
Slice reducers and the root reducer.

Each slice reducer only sees its own slice and the action. The root reducer
runs them all for every action, then records the action as `last_action`.
The `nodes` reducer reports what it changed so the `nodes_by_type` hook can
update the derived index incrementally instead of rebuilding it.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::action::Action;
use crate::state::{
    BuildState, CompletedJob, Component, ComponentDataDependencies, JobsV2, Module, Node,
    NodeCollection, NodesByType, Page, PendingPageDataWrites, PluginStatus, StaticQuery,
};

/// A change applied to the `nodes` slice
#[derive(Debug)]
enum NodeChange {
    Upserted {
        previous: Option<Arc<Node>>,
        current: Arc<Node>,
    },
    Removed(Arc<Node>),
}

/// Apply one action to the whole build state
pub fn reduce(state: &mut BuildState, action: &Action) {
    if let Action::DeleteCache = action {
        *state = BuildState::default();
    } else {
        let changes = reduce_nodes(&mut state.nodes, action);
        sync_nodes_by_type(&mut state.nodes_by_type, changes);

        reduce_pages(&mut state.pages, action);
        reduce_components(&mut state.components, action);
        reduce_status(&mut state.status, action);
        reduce_webpack_compilation_hash(&mut state.webpack_compilation_hash, action);
        reduce_component_data_dependencies(&mut state.component_data_dependencies, action);
        reduce_static_query_components(&mut state.static_query_components, action);
        reduce_static_queries_by_template(&mut state.static_queries_by_template, action);
        reduce_page_data_stats(&mut state.page_data_stats, action);
        reduce_page_data(&mut state.page_data, action);
        reduce_jobs_v2(&mut state.jobs_v2, action);
        reduce_modules(&mut state.modules, action);
        reduce_query_module_dependencies(&mut state.query_module_dependencies, action);
        reduce_pending_page_data_writes(&mut state.pending_page_data_writes, action);
    }

    state.last_action = Some(action.clone());
}

fn reduce_nodes(nodes: &mut NodeCollection, action: &Action) -> Vec<NodeChange> {
    match action {
        Action::CreateNode(node) => {
            let current = Arc::new(node.clone());
            let previous = nodes.insert(Arc::clone(&current));
            vec![NodeChange::Upserted { previous, current }]
        }
        Action::DeleteNode(target) => nodes
            .remove(&target.id)
            .map(NodeChange::Removed)
            .into_iter()
            .collect(),
        Action::DeleteNodes(ids) => ids
            .iter()
            .filter_map(|id| nodes.remove(id))
            .map(NodeChange::Removed)
            .collect(),
        _ => Vec::new(),
    }
}

/// Derived-index hook: keeps `nodes_by_type` in step with `nodes`
fn sync_nodes_by_type(index: &mut NodesByType, changes: Vec<NodeChange>) {
    for change in changes {
        match change {
            NodeChange::Upserted { previous, current } => {
                // the type may have changed, so drop the old entry first
                if let Some(previous) = previous {
                    index.remove(&previous);
                }
                index.insert(current);
            }
            NodeChange::Removed(node) => {
                index.remove(&node);
            }
        }
    }
}

fn reduce_pages(pages: &mut BTreeMap<String, Page>, action: &Action) {
    match action {
        Action::CreatePage(page) => {
            pages.insert(page.path.clone(), page.clone());
        }
        Action::DeletePage(target) => {
            pages.remove(&target.path);
        }
        _ => {}
    }
}

fn reduce_components(components: &mut BTreeMap<String, Component>, action: &Action) {
    match action {
        Action::CreatePage(page) => {
            components
                .entry(page.component.clone())
                .or_insert_with(|| Component {
                    component_path: page.component.clone(),
                    ..Component::default()
                })
                .pages
                .insert(page.path.clone());
        }
        Action::DeletePage(target) => {
            for component in components.values_mut() {
                component.pages.remove(&target.path);
            }
        }
        Action::QueryExtracted(extracted) => {
            if let Some(component) = components.get_mut(&extracted.component_path) {
                component.query = extracted.query.clone();
            }
        }
        _ => {}
    }
}

fn reduce_status(status: &mut PluginStatus, action: &Action) {
    match action {
        Action::SetPluginStatus(update) => {
            status
                .plugins
                .insert(update.plugin.clone(), update.status.clone());
        }
        Action::UpdatePluginsHash(hash) => {
            status.plugins_hash = hash.clone();
        }
        _ => {}
    }
}

fn reduce_webpack_compilation_hash(hash: &mut String, action: &Action) {
    if let Action::SetWebpackCompilationHash(new_hash) = action {
        *hash = new_hash.clone();
    }
}

fn reduce_component_data_dependencies(deps: &mut ComponentDataDependencies, action: &Action) {
    match action {
        Action::CreateComponentDependency(dependency) => {
            if let Some(node_id) = &dependency.node_id {
                deps.nodes
                    .entry(node_id.clone())
                    .or_default()
                    .insert(dependency.path.clone());
            }
            if let Some(connection) = &dependency.connection {
                deps.connections
                    .entry(connection.clone())
                    .or_default()
                    .insert(dependency.path.clone());
            }
        }
        Action::DeleteComponentsDependencies(removed) => {
            for paths in deps.nodes.values_mut().chain(deps.connections.values_mut()) {
                for path in &removed.paths {
                    paths.remove(path);
                }
            }
            deps.nodes.retain(|_, paths| !paths.is_empty());
            deps.connections.retain(|_, paths| !paths.is_empty());
        }
        Action::DeleteNode(target) => {
            deps.nodes.remove(&target.id);
        }
        _ => {}
    }
}

fn reduce_static_query_components(queries: &mut BTreeMap<String, StaticQuery>, action: &Action) {
    match action {
        Action::ReplaceStaticQuery(query) => {
            queries.insert(query.id.clone(), query.clone());
        }
        Action::RemoveStaticQuery(id) => {
            queries.remove(id);
        }
        _ => {}
    }
}

fn reduce_static_queries_by_template(
    by_template: &mut BTreeMap<String, Vec<String>>,
    action: &Action,
) {
    if let Action::SetStaticQueriesByTemplate(update) = action {
        by_template.insert(
            update.component_path.clone(),
            update.static_query_hashes.clone(),
        );
    }
}

fn reduce_page_data_stats(stats: &mut BTreeMap<String, u64>, action: &Action) {
    match action {
        Action::AddPageDataStats(entry) => {
            stats.insert(entry.page_path.clone(), entry.size);
        }
        Action::DeletePage(target) => {
            stats.remove(&target.path);
        }
        _ => {}
    }
}

fn reduce_page_data(page_data: &mut BTreeMap<String, String>, action: &Action) {
    match action {
        Action::SetPageDataHash(entry) => {
            page_data.insert(entry.page_path.clone(), entry.hash.clone());
        }
        Action::DeletePage(target) => {
            page_data.remove(&target.path);
        }
        _ => {}
    }
}

fn reduce_jobs_v2(jobs: &mut JobsV2, action: &Action) {
    match action {
        Action::CreateJobV2(created) => {
            jobs.incomplete
                .insert(created.job.content_digest.clone(), created.job.clone());
        }
        Action::EndJobV2(ended) => {
            let inputs = jobs
                .incomplete
                .remove(&ended.content_digest)
                .map(|job| job.inputs)
                .unwrap_or_default();
            jobs.complete.insert(
                ended.content_digest.clone(),
                CompletedJob {
                    result: ended.result.clone(),
                    inputs,
                },
            );
        }
        _ => {}
    }
}

fn reduce_modules(modules: &mut BTreeMap<String, Module>, action: &Action) {
    match action {
        Action::RegisterModule(module) => {
            let mut module = module.clone();
            if let Some(existing) = modules.get(&module.module_id) {
                module.query_ids.extend(existing.query_ids.iter().cloned());
            }
            modules.insert(module.module_id.clone(), module);
        }
        Action::CreateModuleDependency(dependency) => {
            if let Some(module) = modules.get_mut(&dependency.module_id) {
                module.query_ids.insert(dependency.query_id.clone());
            }
        }
        _ => {}
    }
}

fn reduce_query_module_dependencies(
    deps: &mut BTreeMap<String, BTreeSet<String>>,
    action: &Action,
) {
    match action {
        Action::CreateModuleDependency(dependency) => {
            deps.entry(dependency.query_id.clone())
                .or_default()
                .insert(dependency.module_id.clone());
        }
        Action::DeleteComponentsDependencies(removed) => {
            for path in &removed.paths {
                deps.remove(path);
            }
        }
        _ => {}
    }
}

fn reduce_pending_page_data_writes(pending: &mut PendingPageDataWrites, action: &Action) {
    match action {
        Action::AddPendingPageDataWrite(page) => {
            pending.page_paths.insert(page.path.clone());
        }
        Action::AddPendingTemplateDataWrite(write) => {
            pending.page_paths.extend(write.pages.iter().cloned());
        }
        Action::ClearPendingPageDataWrite(flushed) => {
            pending.page_paths.remove(&flushed.page);
        }
        Action::DeletePage(target) => {
            pending.page_paths.remove(&target.path);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{
        ComponentDependency, ComponentPaths, ExtractedQuery, JobCreated, JobEnded,
        ModuleDependency, PageRef, PendingWriteFlushed, TemplateDataWrite,
    };
    use crate::state::JobV2;
    use serde_json::json;

    fn apply(state: &mut BuildState, actions: Vec<Action>) {
        for action in &actions {
            reduce(state, action);
        }
    }

    #[test]
    fn test_create_node_updates_index() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::create_node(Node::new("1", "Post")),
                Action::create_node(Node::new("2", "Author")),
            ],
        );

        assert_eq!(state.nodes.len(), 2);
        assert!(state.node_index_consistent());
        assert!(state.nodes_by_type.get_node("Author", "2").is_some());
    }

    #[test]
    fn test_retyped_node_moves_between_buckets() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::create_node(Node::new("1", "Post")),
                Action::create_node(Node::new("1", "Draft")),
            ],
        );

        assert_eq!(state.nodes.len(), 1);
        assert!(state.nodes_by_type.get("Post").is_none());
        assert!(state.nodes_by_type.get_node("Draft", "1").is_some());
        assert!(state.node_index_consistent());
    }

    #[test]
    fn test_delete_nodes_updates_index() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::create_node(Node::new("1", "Post")),
                Action::create_node(Node::new("2", "Post")),
                Action::create_node(Node::new("3", "Author")),
                Action::delete_node("1"),
                Action::DeleteNodes(vec!["3".to_string(), "missing".to_string()]),
            ],
        );

        assert_eq!(state.nodes.len(), 1);
        assert!(state.nodes_by_type.get("Author").is_none());
        assert!(state.node_index_consistent());
    }

    #[test]
    fn test_pages_and_components() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::create_page(Page::new("/a", "src/templates/post.js")),
                Action::create_page(Page::new("/b", "src/templates/post.js")),
                Action::QueryExtracted(ExtractedQuery {
                    component_path: "src/templates/post.js".to_string(),
                    query: "{ allPost { id } }".to_string(),
                }),
                Action::DeletePage(PageRef {
                    path: "/a".to_string(),
                }),
            ],
        );

        assert_eq!(state.pages.len(), 1);
        let component = &state.components["src/templates/post.js"];
        assert_eq!(component.query, "{ allPost { id } }");
        assert_eq!(component.pages.iter().collect::<Vec<_>>(), vec!["/b"]);
    }

    #[test]
    fn test_component_dependencies_lifecycle() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::CreateComponentDependency(ComponentDependency {
                    path: "/a".to_string(),
                    node_id: Some("n1".to_string()),
                    connection: None,
                }),
                Action::CreateComponentDependency(ComponentDependency {
                    path: "/a".to_string(),
                    node_id: None,
                    connection: Some("Post".to_string()),
                }),
                Action::CreateModuleDependency(ModuleDependency {
                    query_id: "/a".to_string(),
                    module_id: "m1".to_string(),
                }),
            ],
        );
        assert!(state.component_data_dependencies.nodes["n1"].contains("/a"));
        assert!(state.query_module_dependencies["/a"].contains("m1"));

        reduce(
            &mut state,
            &Action::DeleteComponentsDependencies(ComponentPaths {
                paths: vec!["/a".to_string()],
            }),
        );
        assert!(state.component_data_dependencies.nodes.is_empty());
        assert!(state.component_data_dependencies.connections.is_empty());
        assert!(state.query_module_dependencies.is_empty());
    }

    #[test]
    fn test_job_moves_to_complete() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::CreateJobV2(JobCreated {
                    job: JobV2 {
                        content_digest: "d1".to_string(),
                        name: "IMAGE_PROCESSING".to_string(),
                        inputs: vec!["src/a.png".to_string()],
                        output_dir: "public/static".to_string(),
                        args: json!({"width": 100}),
                        plugin: Some("sharp".to_string()),
                    },
                }),
                Action::EndJobV2(JobEnded {
                    content_digest: "d1".to_string(),
                    result: json!({"ok": true}),
                }),
            ],
        );

        assert!(state.jobs_v2.incomplete.is_empty());
        let done = &state.jobs_v2.complete["d1"];
        assert_eq!(done.inputs, vec!["src/a.png".to_string()]);
        assert_eq!(done.result, json!({"ok": true}));
    }

    #[test]
    fn test_register_module_keeps_query_links() {
        let module = Module {
            module_id: "m1".to_string(),
            source: "./src/utils".to_string(),
            module_type: "default".to_string(),
            import_name: None,
            query_ids: BTreeSet::new(),
        };
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::RegisterModule(module.clone()),
                Action::CreateModuleDependency(ModuleDependency {
                    query_id: "q1".to_string(),
                    module_id: "m1".to_string(),
                }),
                Action::RegisterModule(module),
            ],
        );

        assert!(state.modules["m1"].query_ids.contains("q1"));
    }

    #[test]
    fn test_pending_writes() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::AddPendingTemplateDataWrite(TemplateDataWrite {
                    component_path: "src/templates/post.js".to_string(),
                    pages: vec!["/a".to_string(), "/b".to_string()],
                }),
                Action::ClearPendingPageDataWrite(PendingWriteFlushed {
                    page: "/a".to_string(),
                }),
            ],
        );

        let pending: Vec<&String> = state.pending_page_data_writes.page_paths.iter().collect();
        assert_eq!(pending, vec!["/b"]);
    }

    #[test]
    fn test_delete_cache_resets_everything_but_last_action() {
        let mut state = BuildState::default();
        apply(
            &mut state,
            vec![
                Action::create_node(Node::new("1", "Post")),
                Action::SetWebpackCompilationHash("abc".to_string()),
                Action::DeleteCache,
            ],
        );

        assert!(state.nodes.is_empty());
        assert!(state.nodes_by_type.is_empty());
        assert!(state.webpack_compilation_hash.is_empty());
        assert_eq!(state.last_action, Some(Action::DeleteCache));
    }

    #[test]
    fn test_last_action_recorded() {
        let mut state = BuildState::default();
        let action = Action::UpdatePluginsHash("h".to_string());
        reduce(&mut state, &action);

        assert_eq!(state.status.plugins_hash, "h");
        assert_eq!(state.last_action, Some(action));
    }
}
