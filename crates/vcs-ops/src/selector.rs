//! Turning a caller's selection into resource mappings.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::resource::{Depth, ResourceMapping, ResourcePath};
use crate::workspace::Workspace;

/// Normalizes selected paths into [`ResourceMapping`]s.
///
/// Selecting the workspace root selects every project. Paths that are not in
/// the workspace are skipped with a warning and duplicates collapse.
pub struct ResourceSelector {
    workspace: Arc<dyn Workspace>,
}

impl ResourceSelector {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }

    /// One mapping per selected resource, all at the same depth
    pub fn mappings(&self, paths: &[ResourcePath], depth: Depth) -> Vec<ResourceMapping> {
        let selection: Vec<_> = paths.iter().map(|p| (p.clone(), depth)).collect();
        self.mappings_with_depths(&selection)
    }

    /// One mapping per selected resource, each with its own depth
    pub fn mappings_with_depths(&self, selection: &[(ResourcePath, Depth)]) -> Vec<ResourceMapping> {
        let mut seen = BTreeSet::new();
        let mut mappings = Vec::new();
        for (path, depth) in selection {
            if path.is_root() {
                for project in self.workspace.projects() {
                    if seen.insert((project.path.clone(), *depth)) {
                        mappings.push(ResourceMapping::for_resource(project, *depth));
                    }
                }
                continue;
            }
            let Some(resource) = self.workspace.resource(path) else {
                tracing::warn!("Skipping {} which is not in the workspace", path);
                continue;
            };
            if seen.insert((path.clone(), *depth)) {
                mappings.push(ResourceMapping::for_resource(resource, *depth));
            }
        }
        tracing::debug!("Selected {} resource mapping(s)", mappings.len());
        mappings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::SyncState;
    use crate::workspace::MemoryWorkspace;

    fn selector() -> ResourceSelector {
        let ws = MemoryWorkspace::new();
        ws.add_file("P/src/a.txt", "a", SyncState::Clean).unwrap();
        ws.add_file("Q/b.txt", "b", SyncState::Clean).unwrap();
        ResourceSelector::new(Arc::new(ws))
    }

    #[test]
    fn test_root_selects_projects() {
        let mappings = selector().mappings(&[ResourcePath::root()], Depth::Infinite);
        let ids: Vec<_> = mappings.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, vec!["P", "Q"]);
    }

    #[test]
    fn test_missing_and_duplicate_paths() {
        let paths = vec![
            ResourcePath::new("P/src"),
            ResourcePath::new("P/missing"),
            ResourcePath::new("P/src"),
        ];
        let mappings = selector().mappings(&paths, Depth::One);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].traversals[0].depth, Depth::One);
    }
}
