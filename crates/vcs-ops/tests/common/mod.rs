//! Shared fixtures for engine tests: a memory workspace wired to a memory
//! repository, with helpers for seeding shared projects.

#![allow(dead_code)]

use std::sync::Arc;

use vcs_ops::backend::memory::MemoryRepository;
use vcs_ops::{
    Depth, MemoryWorkspace, OperationContext, ResourceMapping, ResourcePath, ResourceSelector,
    SilentConsole, SyncState,
};

/// Workspace plus the repository its projects are shared with
pub struct TestWorld {
    pub workspace: Arc<MemoryWorkspace>,
    pub repo: MemoryRepository,
}

impl TestWorld {
    pub fn new() -> Self {
        let workspace = Arc::new(MemoryWorkspace::new());
        let repo = MemoryRepository::new(workspace.clone());
        Self { workspace, repo }
    }

    /// Create `project` with `files` committed and clean locally, then share it
    pub fn checked_in(&self, project: &str, files: &[(&str, &str)]) {
        self.workspace
            .add_project(project, SyncState::Clean)
            .expect("create project");
        for (path, contents) in files {
            let full = format!("{}/{}", project, path);
            self.workspace
                .add_file(&full, contents, SyncState::Clean)
                .expect("create file");
            self.repo
                .add_remote_file(&full, contents)
                .expect("check in file");
        }
        self.repo.share(project).expect("share project");
    }

    /// Change a local file and mark it modified
    pub fn edit(&self, path: &str, contents: &str) {
        self.workspace
            .add_file(path, contents, SyncState::Modified)
            .expect("edit file");
    }

    pub fn context(&self) -> OperationContext {
        OperationContext::new(self.workspace.clone()).with_console(Arc::new(SilentConsole))
    }

    pub fn select(&self, selection: &[(&str, Depth)]) -> Vec<ResourceMapping> {
        let selection: Vec<(ResourcePath, Depth)> = selection
            .iter()
            .map(|(path, depth)| (ResourcePath::new(path), *depth))
            .collect();
        ResourceSelector::new(self.workspace.clone()).mappings_with_depths(&selection)
    }

    pub fn select_projects(&self, projects: &[&str]) -> Vec<ResourceMapping> {
        let selection: Vec<(&str, Depth)> = projects.iter().map(|p| (*p, Depth::Infinite)).collect();
        self.select(&selection)
    }
}

pub fn path(path: &str) -> ResourcePath {
    ResourcePath::new(path)
}
