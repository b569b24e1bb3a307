//! Building the traversal scope an operation acts on.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::error::Result;
use crate::resource::{Depth, Resource, ResourceMapping, ResourcePath, ResourceTraversal};
use crate::workspace::Workspace;

/// A logical model that may widen a selection.
///
/// Given the mappings a caller selected, a model returns further mappings it
/// considers part of the same logical unit.
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &str;

    fn additional_mappings(
        &self,
        selected: &[ResourceMapping],
        workspace: &dyn Workspace,
    ) -> Result<Vec<ResourceMapping>>;
}

/// The deduplicated, model-expanded traversals of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    mappings: Vec<ResourceMapping>,
    traversals: Vec<ResourceTraversal>,
}

impl Scope {
    pub fn mappings(&self) -> &[ResourceMapping] {
        &self.mappings
    }

    pub fn traversals(&self) -> &[ResourceTraversal] {
        &self.traversals
    }

    /// Root resources of every traversal
    pub fn roots(&self) -> Vec<&Resource> {
        self.traversals
            .iter()
            .flat_map(|t| t.resources.iter())
            .collect()
    }

    /// Projects touched by the scope, sorted
    pub fn projects(&self) -> Vec<ResourcePath> {
        let mut projects: Vec<_> = self
            .roots()
            .into_iter()
            .filter_map(|r| r.path.project())
            .collect();
        projects.sort();
        projects.dedup();
        projects
    }

    pub fn is_empty(&self) -> bool {
        self.traversals.iter().all(|t| t.resources.is_empty())
    }
}

/// Lazily builds and caches the [`Scope`] for a fixed set of mappings
pub struct ScopeBuilder {
    mappings: Vec<ResourceMapping>,
    models: Vec<Arc<dyn ModelProvider>>,
    consult_models: bool,
    scope: OnceLock<Arc<Scope>>,
}

impl ScopeBuilder {
    pub fn new(mappings: Vec<ResourceMapping>) -> Self {
        Self {
            mappings,
            models: Vec::new(),
            consult_models: false,
            scope: OnceLock::new(),
        }
    }

    /// Consult the given models when the scope is built
    pub fn consulting(mut self, models: Vec<Arc<dyn ModelProvider>>, enabled: bool) -> Self {
        self.models = models;
        self.consult_models = enabled;
        self
    }

    pub fn mappings(&self) -> &[ResourceMapping] {
        &self.mappings
    }

    /// Build the scope on first call and return the cached one afterwards
    pub fn build(&self, workspace: &dyn Workspace) -> Arc<Scope> {
        Arc::clone(self.scope.get_or_init(|| Arc::new(self.compute(workspace))))
    }

    fn compute(&self, workspace: &dyn Workspace) -> Scope {
        let mut mappings = self.mappings.clone();
        if self.consult_models {
            for model in &self.models {
                match model.additional_mappings(&self.mappings, workspace) {
                    Ok(extra) => {
                        for mapping in extra {
                            if !mappings.contains(&mapping) {
                                mappings.push(mapping);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Model '{}' could not expand the selection, using it unexpanded: {}",
                            model.id(),
                            e
                        );
                    }
                }
            }
        }
        let traversals =
            combine_traversals(mappings.iter().flat_map(|m| m.traversals.iter()));
        tracing::debug!(
            "Built scope of {} traversal(s) from {} mapping(s)",
            traversals.len(),
            mappings.len()
        );
        Scope { mappings, traversals }
    }
}

/// Merge traversals into the smallest equivalent set.
///
/// Each resource keeps its deepest requested depth, resources already reached
/// by an ancestor's traversal are dropped, and the remainder is grouped by
/// depth (infinite, one, zero) with paths sorted in each group.
pub fn combine_traversals<'a>(
    traversals: impl IntoIterator<Item = &'a ResourceTraversal>,
) -> Vec<ResourceTraversal> {
    let mut deepest: BTreeMap<ResourcePath, (Resource, Depth)> = BTreeMap::new();
    for traversal in traversals {
        for resource in &traversal.resources {
            deepest
                .entry(resource.path.clone())
                .and_modify(|(_, depth)| *depth = (*depth).max(traversal.depth))
                .or_insert_with(|| (resource.clone(), traversal.depth));
        }
    }

    let covered = |resource: &Resource, depth: Depth| -> bool {
        let mut ancestor = resource.path.parent();
        let mut direct = true;
        while let Some(path) = ancestor {
            if let Some((candidate, candidate_depth)) = deepest.get(&path) {
                if candidate.kind.is_container() {
                    match candidate_depth {
                        Depth::Infinite => return true,
                        Depth::One if direct && (!resource.kind.is_container() || depth == Depth::Zero) => {
                            return true
                        }
                        _ => {}
                    }
                }
            }
            direct = false;
            ancestor = path.parent();
        }
        false
    };

    let mut groups: BTreeMap<std::cmp::Reverse<Depth>, Vec<Resource>> = BTreeMap::new();
    for (resource, depth) in deepest.values() {
        if !covered(resource, *depth) {
            groups
                .entry(std::cmp::Reverse(*depth))
                .or_default()
                .push(resource.clone());
        }
    }
    groups
        .into_iter()
        .map(|(std::cmp::Reverse(depth), resources)| ResourceTraversal::new(resources, depth))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VcsError;
    use crate::resource::SyncState;
    use crate::workspace::MemoryWorkspace;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn traversal(resources: Vec<Resource>, depth: Depth) -> ResourceTraversal {
        ResourceTraversal::new(resources, depth)
    }

    #[test]
    fn test_combine_drops_covered_resources() {
        let input = vec![
            traversal(vec![Resource::folder("P/src")], Depth::Infinite),
            traversal(vec![Resource::file("P/src/a.txt")], Depth::Zero),
            traversal(vec![Resource::folder("P/src/pkg")], Depth::One),
            traversal(vec![Resource::folder("P/doc")], Depth::One),
            traversal(vec![Resource::file("P/doc/x.txt")], Depth::Zero),
            traversal(vec![Resource::folder("P/doc/img")], Depth::One),
        ];
        let combined = combine_traversals(input.iter());
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].depth, Depth::Infinite);
        assert_eq!(combined[0].resources, vec![Resource::folder("P/src")]);
        assert_eq!(combined[1].depth, Depth::One);
        assert_eq!(
            combined[1].resources,
            vec![Resource::folder("P/doc"), Resource::folder("P/doc/img")]
        );
    }

    #[test]
    fn test_combine_keeps_deepest_depth() {
        let input = vec![
            traversal(vec![Resource::folder("P/src")], Depth::Zero),
            traversal(vec![Resource::folder("P/src")], Depth::One),
        ];
        let combined = combine_traversals(input.iter());
        assert_eq!(combined, vec![traversal(vec![Resource::folder("P/src")], Depth::One)]);
    }

    #[test]
    fn test_shallow_parent_does_not_cover_nested_file() {
        let input = vec![
            traversal(vec![Resource::folder("P/src")], Depth::One),
            traversal(vec![Resource::file("P/src/pkg/File.java")], Depth::Zero),
        ];
        let combined = combine_traversals(input.iter());
        assert_eq!(combined.len(), 2);
    }

    struct CountingModel {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ModelProvider for CountingModel {
        fn id(&self) -> &str {
            "counting"
        }

        fn additional_mappings(
            &self,
            _selected: &[ResourceMapping],
            _workspace: &dyn Workspace,
        ) -> Result<Vec<ResourceMapping>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VcsError::Protocol("model unavailable".into()));
            }
            Ok(vec![ResourceMapping::for_resource(
                Resource::file("P/b.txt"),
                Depth::Zero,
            )])
        }
    }

    #[test]
    fn test_build_is_memoized_and_consults_models() {
        let ws = MemoryWorkspace::new();
        ws.add_file("P/a.txt", "a", SyncState::Clean).unwrap();
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let builder = ScopeBuilder::new(vec![ResourceMapping::for_resource(
            Resource::file("P/a.txt"),
            Depth::Zero,
        )])
        .consulting(vec![model.clone()], true);

        let first = builder.build(&ws);
        let second = builder.build(&ws);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.roots().len(), 2);
        assert_eq!(first.projects(), vec![ResourcePath::new("P")]);
    }

    #[test]
    fn test_model_failure_degrades_to_selection() {
        let ws = MemoryWorkspace::new();
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let builder = ScopeBuilder::new(vec![ResourceMapping::for_resource(
            Resource::file("P/a.txt"),
            Depth::Zero,
        )])
        .consulting(vec![model], true);
        assert_eq!(builder.build(&ws).roots().len(), 1);
    }
}
