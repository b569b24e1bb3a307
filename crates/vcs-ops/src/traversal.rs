//! Partitioning a scope by provider and classifying resources by depth.
//!
//! One command invocation carries one recursion flag, so every provider's
//! resources are split into at most a deep pass and a shallow pass. Files
//! ride along with whichever pass exists and are never sent twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::provider::RepositoryProvider;
use crate::resource::{Depth, Resource, ResourcePath};
use crate::scope::Scope;
use crate::workspace::Workspace;

/// Resources of one provider binned by how they are traversed
#[derive(Debug, Clone)]
pub struct TraversalMapEntry {
    provider: Arc<RepositoryProvider>,
    files: Vec<Resource>,
    zero_folders: Vec<Resource>,
    shallow_folders: Vec<Resource>,
    deep_folders: Vec<Resource>,
}

impl TraversalMapEntry {
    pub fn new(provider: Arc<RepositoryProvider>) -> Self {
        Self {
            provider,
            files: Vec::new(),
            zero_folders: Vec::new(),
            shallow_folders: Vec::new(),
            deep_folders: Vec::new(),
        }
    }

    pub fn provider(&self) -> &Arc<RepositoryProvider> {
        &self.provider
    }

    /// Bin a resource. A folder seen at several depths keeps the deepest.
    pub fn add(&mut self, resource: &Resource, depth: Depth) {
        if !resource.kind.is_container() {
            if !self.files.contains(resource) {
                self.files.push(resource.clone());
            }
            return;
        }
        let current = self.folder_depth(resource);
        if current.is_some_and(|d| d >= depth) {
            return;
        }
        self.zero_folders.retain(|r| r != resource);
        self.shallow_folders.retain(|r| r != resource);
        let bin = match depth {
            Depth::Zero => &mut self.zero_folders,
            Depth::One => &mut self.shallow_folders,
            Depth::Infinite => &mut self.deep_folders,
        };
        bin.push(resource.clone());
    }

    fn folder_depth(&self, resource: &Resource) -> Option<Depth> {
        if self.deep_folders.contains(resource) {
            Some(Depth::Infinite)
        } else if self.shallow_folders.contains(resource) {
            Some(Depth::One)
        } else if self.zero_folders.contains(resource) {
            Some(Depth::Zero)
        } else {
            None
        }
    }

    pub fn files(&self) -> &[Resource] {
        &self.files
    }

    /// Resources for the non-recursive pass.
    ///
    /// Files alone when there are no shallow or deep folders, shallow folders
    /// plus files when shallow folders exist, otherwise nothing.
    pub fn shallow_resources(&self) -> Vec<Resource> {
        if self.shallow_folders.is_empty() && self.deep_folders.is_empty() {
            return self.files.clone();
        }
        if !self.shallow_folders.is_empty() {
            let mut resources = self.shallow_folders.clone();
            resources.extend(self.files.iter().cloned());
            return resources;
        }
        Vec::new()
    }

    /// Resources for the recursive pass.
    ///
    /// Empty without deep folders. Files join the deep folders only when no
    /// shallow pass exists to carry them.
    pub fn deep_resources(&self) -> Vec<Resource> {
        if self.deep_folders.is_empty() {
            return Vec::new();
        }
        let mut resources = self.deep_folders.clone();
        if self.shallow_folders.is_empty() {
            resources.extend(self.files.iter().cloned());
        }
        resources
    }

    /// Folders selected at depth zero
    pub fn non_traversed_folders(&self) -> Vec<Resource> {
        self.zero_folders.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.zero_folders.is_empty()
            && self.shallow_folders.is_empty()
            && self.deep_folders.is_empty()
    }
}

/// Traversal entries keyed by project, in project order
#[derive(Debug, Clone, Default)]
pub struct TraversalMap {
    entries: BTreeMap<ResourcePath, TraversalMapEntry>,
}

impl TraversalMap {
    pub fn entries(&self) -> impl Iterator<Item = &TraversalMapEntry> {
        self.entries.values()
    }

    pub fn get(&self, project: &ResourcePath) -> Option<&TraversalMapEntry> {
        self.entries.get(project)
    }

    pub fn providers(&self) -> Vec<Arc<RepositoryProvider>> {
        self.entries.values().map(|e| Arc::clone(&e.provider)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for TraversalMap {
    type Item = TraversalMapEntry;
    type IntoIter = std::collections::btree_map::IntoValues<ResourcePath, TraversalMapEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

/// Groups a scope's traversals by owning provider
pub struct TraversalMapper;

impl TraversalMapper {
    /// Resources without a bound provider are skipped
    pub fn map(scope: &Scope, workspace: &dyn Workspace) -> TraversalMap {
        let mut map = TraversalMap::default();
        for traversal in scope.traversals() {
            for resource in &traversal.resources {
                let Some(provider) = workspace.provider_for(&resource.path) else {
                    tracing::debug!("Skipping {} which is not shared with a repository", resource);
                    continue;
                };
                map.entries
                    .entry(provider.project().clone())
                    .or_insert_with(|| TraversalMapEntry::new(provider))
                    .add(resource, traversal.depth);
            }
        }
        map
    }
}
