//! Workspace resource handles, traversal depths and resource mappings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Workspace-relative path of a resource, `/` separated.
///
/// The empty path is the workspace root and the first segment names the
/// project the resource belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// The workspace root
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Create a path, dropping empty and `.` segments
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }

    /// Last segment, empty for the root
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> Option<ResourcePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(index) => Some(Self(self.0[..index].to_string())),
            None => Some(Self::root()),
        }
    }

    pub fn join(&self, child: impl AsRef<str>) -> ResourcePath {
        if self.is_root() {
            Self::new(child)
        } else {
            Self::new(format!("{}/{}", self.0, child.as_ref()))
        }
    }

    /// The project path this resource lives in, `None` for the root
    pub fn project(&self) -> Option<ResourcePath> {
        self.segments().next().map(|s| Self(s.to_string()))
    }

    /// Whether `self` is `other` or one of its ancestors
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0
            || (other.0.len() > self.0.len()
                && other.0.starts_with(&self.0)
                && other.0.as_bytes()[self.0.len()] == b'/')
    }

    /// Path relative to `root`, `.` when both are equal
    pub fn relative_to(&self, root: &ResourcePath) -> Option<String> {
        if !root.is_prefix_of(self) {
            return None;
        }
        if self == root {
            return Some(".".to_string());
        }
        if root.is_root() {
            return Some(self.0.clone());
        }
        Some(self.0[root.0.len() + 1..].to_string())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.0)
        }
    }
}

impl From<&str> for ResourcePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of a workspace resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    File,
    Folder,
    Project,
    Root,
}

impl ResourceKind {
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::File)
    }
}

/// VCS management state of a resource as recorded in the local sync cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Not known to the repository
    Unmanaged,
    /// Excluded from version control
    Ignored,
    /// Scheduled for addition, not yet committed
    Added,
    /// Managed and unchanged
    Clean,
    /// Managed and locally modified
    Modified,
    /// Managed but no longer present locally
    Deleted,
}

impl SyncState {
    pub fn is_managed(&self) -> bool {
        matches!(self, Self::Added | Self::Clean | Self::Modified | Self::Deleted)
    }

    pub fn has_local_changes(&self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

/// Requested recursion depth of a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Depth {
    Zero,
    One,
    Infinite,
}

impl Depth {
    /// Depth applied to the children of a resource visited at this depth
    pub fn for_children(&self) -> Option<Depth> {
        match self {
            Self::Zero => None,
            Self::One => Some(Self::Zero),
            Self::Infinite => Some(Self::Infinite),
        }
    }
}

/// Handle to a resource in the live workspace.
///
/// Handles carry identity and kind only; management state is always read
/// from the workspace when needed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub path: ResourcePath,
    pub kind: ResourceKind,
}

impl Resource {
    pub fn new(path: ResourcePath, kind: ResourceKind) -> Self {
        Self { path, kind }
    }

    pub fn file(path: impl AsRef<str>) -> Self {
        Self::new(ResourcePath::new(path), ResourceKind::File)
    }

    pub fn folder(path: impl AsRef<str>) -> Self {
        Self::new(ResourcePath::new(path), ResourceKind::Folder)
    }

    pub fn project(name: impl AsRef<str>) -> Self {
        Self::new(ResourcePath::new(name), ResourceKind::Project)
    }

    pub fn is_file(&self) -> bool {
        self.kind == ResourceKind::File
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// A set of resources sharing one recursion depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTraversal {
    pub resources: Vec<Resource>,
    pub depth: Depth,
}

impl ResourceTraversal {
    pub fn new(resources: Vec<Resource>, depth: Depth) -> Self {
        Self { resources, depth }
    }

    /// Whether the traversal reaches `path`
    pub fn covers(&self, path: &ResourcePath) -> bool {
        self.resources.iter().any(|resource| {
            if resource.path == *path {
                return true;
            }
            if !resource.kind.is_container() || !resource.path.is_prefix_of(path) {
                return false;
            }
            match self.depth {
                Depth::Zero => false,
                Depth::One => path.parent().as_ref() == Some(&resource.path),
                Depth::Infinite => true,
            }
        })
    }
}

/// A caller-supplied unit of selection: a model object and the traversals it
/// maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMapping {
    /// Identifier of the model object the mapping was created for
    pub model_id: String,
    /// Identifier of the model provider that produced the mapping
    pub provider_id: String,
    pub traversals: Vec<ResourceTraversal>,
}

impl ResourceMapping {
    /// Identifier used for mappings made directly from workspace resources
    pub const RESOURCE_MODEL: &'static str = "resources";

    pub fn new(
        model_id: impl Into<String>,
        provider_id: impl Into<String>,
        traversals: Vec<ResourceTraversal>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            provider_id: provider_id.into(),
            traversals,
        }
    }

    /// Mapping for a single workspace resource at a depth
    pub fn for_resource(resource: Resource, depth: Depth) -> Self {
        let id = resource.path.as_str().to_string();
        Self::new(
            id,
            Self::RESOURCE_MODEL,
            vec![ResourceTraversal::new(vec![resource], depth)],
        )
    }

    /// Projects touched by this mapping
    pub fn projects(&self) -> Vec<ResourcePath> {
        let mut projects: Vec<_> = self
            .traversals
            .iter()
            .flat_map(|t| t.resources.iter())
            .filter_map(|r| r.path.project())
            .collect();
        projects.sort();
        projects.dedup();
        projects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalization() {
        assert_eq!(ResourcePath::new("/P//src/./a.txt").as_str(), "P/src/a.txt");
        assert!(ResourcePath::new("/").is_root());
        assert_eq!(ResourcePath::new("P/src").join("pkg/A.java").as_str(), "P/src/pkg/A.java");
        assert_eq!(ResourcePath::root().join("P").as_str(), "P");
    }

    #[test]
    fn test_parent_and_project() {
        let path = ResourcePath::new("P/src/a.txt");
        assert_eq!(path.parent(), Some(ResourcePath::new("P/src")));
        assert_eq!(path.project(), Some(ResourcePath::new("P")));
        assert_eq!(ResourcePath::new("P").parent(), Some(ResourcePath::root()));
        assert_eq!(ResourcePath::root().parent(), None);
        assert_eq!(path.name(), "a.txt");
    }

    #[test]
    fn test_prefix_respects_segment_boundaries() {
        let src = ResourcePath::new("P/src");
        assert!(src.is_prefix_of(&ResourcePath::new("P/src/a")));
        assert!(src.is_prefix_of(&src));
        assert!(!src.is_prefix_of(&ResourcePath::new("P/src2/a")));
        assert!(ResourcePath::root().is_prefix_of(&src));
    }

    #[test]
    fn test_relative_to() {
        let project = ResourcePath::new("P");
        assert_eq!(
            ResourcePath::new("P/src/a.txt").relative_to(&project).as_deref(),
            Some("src/a.txt")
        );
        assert_eq!(project.relative_to(&project).as_deref(), Some("."));
        assert_eq!(ResourcePath::new("Q/a").relative_to(&project), None);
        assert_eq!(
            project.relative_to(&ResourcePath::root()).as_deref(),
            Some("P")
        );
    }

    #[test]
    fn test_traversal_covers_by_depth() {
        let one = ResourceTraversal::new(vec![Resource::folder("P/src")], Depth::One);
        assert!(one.covers(&ResourcePath::new("P/src/a.txt")));
        assert!(!one.covers(&ResourcePath::new("P/src/pkg/b.txt")));

        let deep = ResourceTraversal::new(vec![Resource::folder("P/src")], Depth::Infinite);
        assert!(deep.covers(&ResourcePath::new("P/src/pkg/b.txt")));

        let zero = ResourceTraversal::new(vec![Resource::folder("P/src")], Depth::Zero);
        assert!(zero.covers(&ResourcePath::new("P/src")));
        assert!(!zero.covers(&ResourcePath::new("P/src/a.txt")));
    }

    #[test]
    fn test_resources_sort_by_path_then_kind() {
        let mut resources = vec![
            Resource::folder("P/src"),
            Resource::file("P/a.txt"),
            Resource::file("P/src"),
        ];
        resources.sort();
        assert_eq!(
            resources,
            vec![Resource::file("P/a.txt"), Resource::file("P/src"), Resource::folder("P/src")]
        );
    }

    #[test]
    fn test_mapping_for_resource_is_named_after_it() {
        let mapping = ResourceMapping::for_resource(Resource::file("P/a.txt"), Depth::Zero);
        assert_eq!(mapping.model_id, "P/a.txt");
        assert_eq!(mapping.provider_id, ResourceMapping::RESOURCE_MODEL);
        assert_eq!(mapping.traversals.len(), 1);
        assert_eq!(mapping.traversals[0].resources, vec![Resource::file("P/a.txt")]);
    }
}
