//! Binding between a workspace project and a remote repository.

use std::fmt;
use std::sync::Arc;

use crate::resource::ResourcePath;
use crate::rule::SchedulingRule;
use crate::session::RepositoryLocation;

/// Narrowest lock a provider can work under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockScope {
    /// The provider's own project
    #[default]
    Project,
    /// The whole workspace; for providers that touch resources outside
    /// their project (linked folders, shared metadata)
    Workspace,
}

/// VCS binding for one project
pub struct RepositoryProvider {
    project: ResourcePath,
    location: Arc<dyn RepositoryLocation>,
    remote_root: String,
    lock_scope: LockScope,
}

impl RepositoryProvider {
    pub fn new(
        project: ResourcePath,
        location: Arc<dyn RepositoryLocation>,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            project,
            location,
            remote_root: remote_root.into(),
            lock_scope: LockScope::Project,
        }
    }

    pub fn with_lock_scope(mut self, lock_scope: LockScope) -> Self {
        self.lock_scope = lock_scope;
        self
    }

    pub fn project(&self) -> &ResourcePath {
        &self.project
    }

    pub fn location(&self) -> &Arc<dyn RepositoryLocation> {
        &self.location
    }

    pub fn location_name(&self) -> String {
        self.location.location()
    }

    /// Remote module path the project is checked out from
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    pub fn lock_scope(&self) -> LockScope {
        self.lock_scope
    }

    /// The lock this provider needs to modify its resources
    pub fn modification_rule(&self) -> SchedulingRule {
        match self.lock_scope {
            LockScope::Project => SchedulingRule::Project(self.project.clone()),
            LockScope::Workspace => SchedulingRule::Workspace,
        }
    }
}

impl fmt::Debug for RepositoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryProvider")
            .field("project", &self.project)
            .field("location", &self.location.location())
            .field("remote_root", &self.remote_root)
            .field("lock_scope", &self.lock_scope)
            .finish()
    }
}
