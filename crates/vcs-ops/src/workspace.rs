//! The live workspace and its local sync-state cache.
//!
//! Operations never own resources. They read kinds, states and contents
//! through the [`Workspace`] capability passed in the operation context.
//! Sync-state mutations must only happen while the owning provider's
//! scheduling rule is held; reads may happen at any time.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, VcsError};
use crate::provider::RepositoryProvider;
use crate::resource::{Resource, ResourceKind, ResourcePath, SyncState};
use crate::tag::Tag;

/// Access to local resources and their VCS metadata
pub trait Workspace: Send + Sync {
    /// Kind of the resource at `path`, including deleted-but-managed phantoms
    fn kind(&self, path: &ResourcePath) -> Option<ResourceKind>;

    /// Whether the resource is present locally
    fn exists(&self, path: &ResourcePath) -> bool;

    /// Direct children of a container, sorted by path
    fn members(&self, path: &ResourcePath) -> Result<Vec<Resource>>;

    /// All projects in the workspace, sorted by path
    fn projects(&self) -> Vec<Resource>;

    fn sync_state(&self, path: &ResourcePath) -> SyncState;

    fn set_sync_state(&self, path: &ResourcePath, state: SyncState) -> Result<()>;

    fn sticky_tag(&self, path: &ResourcePath) -> Option<Tag>;

    fn set_sticky_tag(&self, path: &ResourcePath, tag: Option<Tag>) -> Result<()>;

    fn contents(&self, path: &ResourcePath) -> Result<Vec<u8>>;

    /// Create or replace a file, creating missing parent folders
    fn write_file(&self, path: &ResourcePath, contents: &[u8], state: SyncState) -> Result<()>;

    /// Create a folder (a project when it is top level)
    fn create_folder(&self, path: &ResourcePath, state: SyncState) -> Result<()>;

    /// Remove a resource and everything below it, metadata included
    fn delete(&self, path: &ResourcePath) -> Result<()>;

    /// Whether a file should be transferred without keyword substitution
    fn is_binary(&self, path: &ResourcePath) -> bool;

    /// Provider bound to a project, if any
    fn provider(&self, project: &ResourcePath) -> Option<Arc<RepositoryProvider>>;

    fn bind_provider(&self, provider: Arc<RepositoryProvider>) -> Result<()>;

    fn resource(&self, path: &ResourcePath) -> Option<Resource> {
        self.kind(path).map(|kind| Resource::new(path.clone(), kind))
    }

    /// Provider owning a resource
    fn provider_for(&self, path: &ResourcePath) -> Option<Arc<RepositoryProvider>> {
        path.project().and_then(|project| self.provider(&project))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    kind: ResourceKind,
    state: SyncState,
    /// `None` for folders and for deleted phantoms
    contents: Option<Vec<u8>>,
    sticky: Option<Tag>,
}

#[derive(Debug, Default)]
struct WorkspaceState {
    entries: BTreeMap<ResourcePath, Entry>,
    providers: BTreeMap<ResourcePath, Arc<RepositoryProvider>>,
}

/// In-process workspace backed by a path map
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    state: RwLock<WorkspaceState>,
}

const BINARY_EXTENSIONS: &[&str] = &["bin", "class", "gif", "gz", "jar", "jpg", "png", "zip"];

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, WorkspaceState>> {
        self.state
            .read()
            .map_err(|_| VcsError::invariant("workspace state lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, WorkspaceState>> {
        self.state
            .write()
            .map_err(|_| VcsError::invariant("workspace state lock poisoned"))
    }

    fn container_kind(path: &ResourcePath) -> ResourceKind {
        if path.segment_count() == 1 {
            ResourceKind::Project
        } else {
            ResourceKind::Folder
        }
    }

    fn ensure_parents(state: &mut WorkspaceState, path: &ResourcePath, sync: SyncState) {
        let mut parent = path.parent();
        while let Some(folder) = parent {
            if folder.is_root() {
                break;
            }
            state.entries.entry(folder.clone()).or_insert_with(|| Entry {
                kind: Self::container_kind(&folder),
                state: sync,
                contents: None,
                sticky: None,
            });
            parent = folder.parent();
        }
    }

    /// Add a project folder
    pub fn add_project(&self, name: &str, state: SyncState) -> Result<()> {
        self.create_folder(&ResourcePath::new(name), state)
    }

    /// Add a folder, creating missing parents with the same state
    pub fn add_folder(&self, path: &str, state: SyncState) -> Result<()> {
        self.create_folder(&ResourcePath::new(path), state)
    }

    /// Add a text file, creating missing parents with the same state
    pub fn add_file(&self, path: &str, contents: &str, state: SyncState) -> Result<()> {
        self.write_file(&ResourcePath::new(path), contents.as_bytes(), state)
    }

    /// Remove local contents but keep the managed entry as a deleted phantom
    pub fn delete_locally(&self, path: &ResourcePath) -> Result<()> {
        let mut state = self.write()?;
        match state.entries.get_mut(path) {
            Some(entry) if entry.kind == ResourceKind::File => {
                entry.contents = None;
                entry.state = SyncState::Deleted;
                Ok(())
            }
            Some(_) => Err(VcsError::Validation(format!("{} is not a file", path))),
            None => Err(VcsError::ResourceNotFound(path.to_string())),
        }
    }

    /// Text contents of a file, for assertions and diff synthesis
    pub fn text(&self, path: &str) -> Option<String> {
        self.contents(&ResourcePath::new(path))
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Every path currently known, sorted
    pub fn paths(&self) -> Vec<ResourcePath> {
        self.read()
            .map(|state| state.entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Workspace for MemoryWorkspace {
    fn kind(&self, path: &ResourcePath) -> Option<ResourceKind> {
        if path.is_root() {
            return Some(ResourceKind::Root);
        }
        self.read().ok()?.entries.get(path).map(|e| e.kind)
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        if path.is_root() {
            return true;
        }
        self.read()
            .ok()
            .and_then(|state| {
                state
                    .entries
                    .get(path)
                    .map(|e| e.state != SyncState::Deleted)
            })
            .unwrap_or(false)
    }

    fn members(&self, path: &ResourcePath) -> Result<Vec<Resource>> {
        let state = self.read()?;
        if !path.is_root() {
            match state.entries.get(path) {
                Some(entry) if entry.kind.is_container() => {}
                Some(_) => return Ok(Vec::new()),
                None => return Err(VcsError::ResourceNotFound(path.to_string())),
            }
        }
        Ok(state
            .entries
            .iter()
            .filter(|(p, _)| p.parent().as_ref() == Some(path))
            .map(|(p, e)| Resource::new(p.clone(), e.kind))
            .collect())
    }

    fn projects(&self) -> Vec<Resource> {
        self.read()
            .map(|state| {
                state
                    .entries
                    .iter()
                    .filter(|(_, e)| e.kind == ResourceKind::Project)
                    .map(|(p, e)| Resource::new(p.clone(), e.kind))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sync_state(&self, path: &ResourcePath) -> SyncState {
        self.read()
            .ok()
            .and_then(|state| state.entries.get(path).map(|e| e.state))
            .unwrap_or(SyncState::Unmanaged)
    }

    fn set_sync_state(&self, path: &ResourcePath, sync: SyncState) -> Result<()> {
        let mut state = self.write()?;
        let entry = state
            .entries
            .get_mut(path)
            .ok_or_else(|| VcsError::ResourceNotFound(path.to_string()))?;
        entry.state = sync;
        Ok(())
    }

    fn sticky_tag(&self, path: &ResourcePath) -> Option<Tag> {
        self.read().ok()?.entries.get(path)?.sticky.clone()
    }

    fn set_sticky_tag(&self, path: &ResourcePath, tag: Option<Tag>) -> Result<()> {
        let mut state = self.write()?;
        let entry = state
            .entries
            .get_mut(path)
            .ok_or_else(|| VcsError::ResourceNotFound(path.to_string()))?;
        entry.sticky = tag;
        Ok(())
    }

    fn contents(&self, path: &ResourcePath) -> Result<Vec<u8>> {
        let state = self.read()?;
        state
            .entries
            .get(path)
            .and_then(|e| e.contents.clone())
            .ok_or_else(|| VcsError::ResourceNotFound(path.to_string()))
    }

    fn write_file(&self, path: &ResourcePath, contents: &[u8], sync: SyncState) -> Result<()> {
        if path.segment_count() < 2 {
            return Err(VcsError::Validation(format!(
                "{} is not inside a project",
                path
            )));
        }
        let mut state = self.write()?;
        Self::ensure_parents(&mut state, path, sync);
        let sticky = state.entries.get(path).and_then(|e| e.sticky.clone());
        state.entries.insert(
            path.clone(),
            Entry {
                kind: ResourceKind::File,
                state: sync,
                contents: Some(contents.to_vec()),
                sticky,
            },
        );
        Ok(())
    }

    fn create_folder(&self, path: &ResourcePath, sync: SyncState) -> Result<()> {
        if path.is_root() {
            return Err(VcsError::Validation("cannot create the workspace root".into()));
        }
        let mut state = self.write()?;
        if let Some(existing) = state.entries.get(path) {
            if !existing.kind.is_container() {
                return Err(VcsError::Validation(format!("{} is a file", path)));
            }
            return Ok(());
        }
        Self::ensure_parents(&mut state, path, sync);
        state.entries.insert(
            path.clone(),
            Entry {
                kind: Self::container_kind(path),
                state: sync,
                contents: None,
                sticky: None,
            },
        );
        Ok(())
    }

    fn delete(&self, path: &ResourcePath) -> Result<()> {
        let mut state = self.write()?;
        state.entries.retain(|p, _| !path.is_prefix_of(p));
        if path.segment_count() == 1 {
            state.providers.remove(path);
        }
        Ok(())
    }

    fn is_binary(&self, path: &ResourcePath) -> bool {
        let name = path.name();
        if let Some((_, ext)) = name.rsplit_once('.') {
            if BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return true;
            }
        }
        self.read()
            .ok()
            .and_then(|state| {
                state
                    .entries
                    .get(path)
                    .and_then(|e| e.contents.as_ref().map(|c| c.contains(&0)))
            })
            .unwrap_or(false)
    }

    fn provider(&self, project: &ResourcePath) -> Option<Arc<RepositoryProvider>> {
        self.read().ok()?.providers.get(project).cloned()
    }

    fn bind_provider(&self, provider: Arc<RepositoryProvider>) -> Result<()> {
        let mut state = self.write()?;
        tracing::debug!("Binding {} to {}", provider.project(), provider.location_name());
        state.providers.insert(provider.project().clone(), provider);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> MemoryWorkspace {
        let ws = MemoryWorkspace::new();
        ws.add_file("P/src/a.txt", "a\n", SyncState::Clean).unwrap();
        ws.add_file("P/src/b.txt", "b\n", SyncState::Modified).unwrap();
        ws.add_file("P/README", "r\n", SyncState::Clean).unwrap();
        ws
    }

    #[test]
    fn test_parents_are_created() {
        let ws = workspace();
        assert_eq!(ws.kind(&ResourcePath::new("P")), Some(ResourceKind::Project));
        assert_eq!(ws.kind(&ResourcePath::new("P/src")), Some(ResourceKind::Folder));
        assert_eq!(ws.projects().len(), 1);
    }

    #[test]
    fn test_members_are_direct_children() {
        let ws = workspace();
        let members = ws.members(&ResourcePath::new("P")).unwrap();
        let names: Vec<_> = members.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(names, vec!["P/README", "P/src"]);
    }

    #[test]
    fn test_deleted_phantom_is_kept() {
        let ws = workspace();
        let path = ResourcePath::new("P/src/a.txt");
        ws.delete_locally(&path).unwrap();
        assert!(!ws.exists(&path));
        assert_eq!(ws.kind(&path), Some(ResourceKind::File));
        assert_eq!(ws.sync_state(&path), SyncState::Deleted);
        assert!(ws.contents(&path).is_err());
    }

    #[test]
    fn test_delete_removes_subtree() {
        let ws = workspace();
        ws.delete(&ResourcePath::new("P/src")).unwrap();
        assert!(!ws.exists(&ResourcePath::new("P/src/b.txt")));
        assert!(ws.exists(&ResourcePath::new("P/README")));
    }

    #[test]
    fn test_binary_detection() {
        let ws = workspace();
        ws.write_file(&ResourcePath::new("P/lib/x.dat"), &[1, 0, 2], SyncState::Unmanaged)
            .unwrap();
        ws.add_file("P/logo.PNG", "", SyncState::Unmanaged).unwrap();
        assert!(ws.is_binary(&ResourcePath::new("P/lib/x.dat")));
        assert!(ws.is_binary(&ResourcePath::new("P/logo.PNG")));
        assert!(!ws.is_binary(&ResourcePath::new("P/README")));
    }
}
