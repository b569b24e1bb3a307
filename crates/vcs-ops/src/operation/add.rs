//! Scheduling unmanaged resources for addition.
//!
//! The protocol's add does not recurse, so the selection is expanded
//! locally. Folders go first, parents before children, then files grouped by
//! keyword substitution mode; every group is one `add` in the same session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::context::{OperationContext, Progress};
use crate::error::Result;
use crate::operation::{arguments_for, fail_on_server_error, Pass, PassExecutor, ProviderOperation};
use crate::options::{KSubstMode, LocalOptions};
use crate::provider::RepositoryProvider;
use crate::resource::{Resource, ResourceKind, ResourceMapping, SyncState};
use crate::session::{with_session, CommandInvocation, CommandKind};
use crate::status::{Status, StatusRef};
use crate::walk::ResourceWalker;
use crate::workspace::Workspace;

/// Pass executor for `add`
#[derive(Debug, Default)]
pub struct AddExecutor {
    added: Vec<Resource>,
}

impl AddExecutor {
    /// Resources sent to the server so far
    pub fn added(&self) -> &[Resource] {
        &self.added
    }

    /// Unmanaged folders between the project and `resource`, outermost first
    fn unmanaged_parents(workspace: &dyn Workspace, resource: &Resource) -> Vec<Resource> {
        let mut parents = Vec::new();
        let mut parent = resource.path.parent();
        while let Some(path) = parent {
            if path.segment_count() < 2 {
                break;
            }
            if workspace.sync_state(&path) == SyncState::Unmanaged {
                parents.push(Resource::new(path.clone(), ResourceKind::Folder));
            }
            parent = path.parent();
        }
        parents.reverse();
        parents
    }

    /// Folders and mode-grouped files of the pass that need adding
    fn collect(
        context: &OperationContext,
        pass: &Pass,
        progress: &Progress,
    ) -> Result<(Vec<Resource>, BTreeMap<KSubstMode, Vec<Resource>>)> {
        let workspace = context.workspace.as_ref();
        let mut folders = BTreeSet::new();
        let mut files: BTreeMap<KSubstMode, Vec<Resource>> = BTreeMap::new();
        for root in &pass.resources {
            for parent in Self::unmanaged_parents(workspace, root) {
                folders.insert(parent);
            }
            let walker = ResourceWalker::new(
                Arc::clone(&context.workspace),
                root.clone(),
                pass.kind.depth(),
                progress.cancel_flag().clone(),
            )
            .skip_ignored();
            for entry in walker {
                let entry = entry?;
                if entry.state != SyncState::Unmanaged {
                    continue;
                }
                match entry.resource.kind {
                    ResourceKind::File => {
                        let mode = if workspace.is_binary(&entry.resource.path) {
                            KSubstMode::Binary
                        } else {
                            KSubstMode::TextExpand
                        };
                        let group = files.entry(mode).or_default();
                        if !group.contains(&entry.resource) {
                            group.push(entry.resource);
                        }
                    }
                    ResourceKind::Folder => {
                        folders.insert(entry.resource);
                    }
                    ResourceKind::Project | ResourceKind::Root => {}
                }
            }
        }
        Ok((folders.into_iter().collect(), files))
    }
}

impl PassExecutor for AddExecutor {
    fn name(&self) -> &str {
        "Add"
    }

    fn is_server_modification(&self) -> bool {
        true
    }

    fn execute_pass(
        &mut self,
        context: &OperationContext,
        provider: &Arc<RepositoryProvider>,
        pass: &Pass,
        progress: &mut Progress,
    ) -> Result<StatusRef> {
        let (folders, files) = Self::collect(context, pass, progress)?;
        if folders.is_empty() && files.is_empty() {
            tracing::debug!("Nothing to add on {}", provider.project());
            return Ok(Status::ok());
        }

        let root = provider.project().clone();
        let mut invocations = Vec::new();
        if !folders.is_empty() {
            invocations.push(CommandInvocation::new(
                CommandKind::Add,
                LocalOptions::new(),
                arguments_for(&folders, &root),
            ));
        }
        for (mode, group) in &files {
            let mut local = LocalOptions::new();
            if mode.is_binary() {
                local.add(mode.to_option());
            }
            invocations.push(CommandInvocation::new(
                CommandKind::Add,
                local,
                arguments_for(group, &root),
            ));
        }

        progress.begin("Add", invocations.len() as u32);
        let status = with_session(
            provider.location(),
            root,
            provider.remote_root(),
            true,
            progress,
            |session, progress| {
                let mut merged = Status::ok();
                for invocation in &invocations {
                    let mut sub = progress.split(1);
                    let status = session.execute(invocation, context.output(), &mut sub)?;
                    merged = Status::merge(&merged, &fail_on_server_error(status)?);
                }
                Ok(merged)
            },
        )?;

        self.added.extend(folders);
        self.added.extend(files.into_values().flatten());
        Ok(status)
    }
}

/// Add the selected unmanaged resources to version control
pub fn add(context: OperationContext, mappings: Vec<ResourceMapping>) -> ProviderOperation<AddExecutor> {
    ProviderOperation::new(context, mappings, AddExecutor::default())
}
