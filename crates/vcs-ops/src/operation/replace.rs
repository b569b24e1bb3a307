//! Replace local resources with repository contents.
//!
//! Before the `update -C` the selection is confirmed against local changes
//! and purged of unmanaged and locally added resources, so the server-driven
//! refresh recreates everything cleanly. Empty folders are pruned afterwards.

use std::sync::Arc;

use crate::context::{OperationContext, Progress};
use crate::error::Result;
use crate::operation::single::{CommandVariant, PassSteps, SingleCommand};
use crate::operation::{Pass, ProviderOperation};
use crate::options::LocalOption;
use crate::provider::RepositoryProvider;
use crate::resource::{Depth, Resource, ResourceKind, ResourceMapping, ResourcePath, SyncState};
use crate::session::CommandKind;
use crate::status::StatusRef;
use crate::tag::Tag;
use crate::walk::ResourceWalker;

use super::update::UpdateOptions;

/// Yes/no decision on discarding local changes
pub trait OverwritePrompt: Send + Sync {
    /// Whether local changes under `resource` may be overwritten
    fn confirm_overwrite(&self, resource: &ResourcePath) -> bool;
}

/// Prompt that always agrees
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOverwrite;

impl OverwritePrompt for AlwaysOverwrite {
    fn confirm_overwrite(&self, _resource: &ResourcePath) -> bool {
        true
    }
}

#[derive(Clone, Default)]
pub struct ReplaceOptions {
    /// Replace with this tag instead of the sticky one
    pub tag: Option<Tag>,
    /// Consulted for resources with local changes; none means overwrite
    pub prompt: Option<Arc<dyn OverwritePrompt>>,
}

/// Confirmation, purge and prune around the replace command
pub struct ReplaceSteps {
    prompt: Arc<dyn OverwritePrompt>,
    prune: bool,
    declined: Vec<ResourcePath>,
    purged: Vec<ResourcePath>,
}

impl ReplaceSteps {
    pub fn new(prompt: Arc<dyn OverwritePrompt>, prune: bool) -> Self {
        Self {
            prompt,
            prune,
            declined: Vec::new(),
            purged: Vec::new(),
        }
    }

    /// Resources left alone because the prompt declined
    pub fn declined(&self) -> &[ResourcePath] {
        &self.declined
    }

    /// Resources deleted before the command ran
    pub fn purged(&self) -> &[ResourcePath] {
        &self.purged
    }

    fn walk(context: &OperationContext, resource: &Resource, depth: Depth, progress: &Progress) -> ResourceWalker {
        ResourceWalker::new(
            Arc::clone(&context.workspace),
            resource.clone(),
            depth,
            progress.cancel_flag().clone(),
        )
        .skip_ignored()
    }

    fn has_local_changes(
        context: &OperationContext,
        resource: &Resource,
        depth: Depth,
        progress: &Progress,
    ) -> Result<bool> {
        for entry in Self::walk(context, resource, depth, progress) {
            if entry?.state.has_local_changes() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn purge(&mut self, context: &OperationContext, resource: &Resource, depth: Depth, progress: &Progress) -> Result<()> {
        let mut doomed = Vec::new();
        for entry in Self::walk(context, resource, depth, progress) {
            let entry = entry?;
            if matches!(entry.state, SyncState::Unmanaged | SyncState::Added)
                && entry.resource.kind != ResourceKind::Project
                && !doomed.iter().any(|d: &ResourcePath| d.is_prefix_of(&entry.resource.path))
            {
                doomed.push(entry.resource.path);
            }
        }
        for path in doomed {
            tracing::debug!("Purging {}", path);
            context.workspace.delete(&path)?;
            self.purged.push(path);
        }
        Ok(())
    }

    /// Delete folders under `root` that have no members left, deepest first
    fn prune(context: &OperationContext, root: &Resource, progress: &Progress) -> Result<()> {
        let mut folders = Vec::new();
        for entry in Self::walk(context, root, Depth::Infinite, progress) {
            let entry = entry?;
            if entry.resource.kind == ResourceKind::Folder && entry.resource != *root {
                folders.push(entry.resource.path);
            }
        }
        for folder in folders.into_iter().rev() {
            if context.workspace.members(&folder)?.is_empty() {
                tracing::debug!("Pruning empty folder {}", folder);
                context.workspace.delete(&folder)?;
            }
        }
        Ok(())
    }
}

impl PassSteps for ReplaceSteps {
    fn before(
        &mut self,
        context: &OperationContext,
        _provider: &Arc<RepositoryProvider>,
        pass: &Pass,
        resources: Vec<Resource>,
        progress: &mut Progress,
    ) -> Result<Vec<Resource>> {
        let depth = pass.kind.depth();
        let mut confirmed = Vec::with_capacity(resources.len());
        for resource in resources {
            progress.check_canceled()?;
            if Self::has_local_changes(context, &resource, depth, progress)?
                && !self.prompt.confirm_overwrite(&resource.path)
            {
                tracing::info!("Keeping local changes in {}", resource);
                self.declined.push(resource.path.clone());
                continue;
            }
            confirmed.push(resource);
        }
        for resource in &confirmed {
            self.purge(context, resource, depth, progress)?;
        }
        Ok(confirmed)
    }

    fn after(
        &mut self,
        context: &OperationContext,
        pass: &Pass,
        resources: &[Resource],
        status: &StatusRef,
    ) -> Result<()> {
        if !self.prune || status.is_error() || !pass.recurse() {
            return Ok(());
        }
        let progress = Progress::none();
        for resource in resources.iter().filter(|r| r.kind.is_container()) {
            Self::prune(context, resource, &progress)?;
        }
        Ok(())
    }
}

/// Replace the selection with repository contents, discarding local changes
pub fn replace(
    context: OperationContext,
    mappings: Vec<ResourceMapping>,
    options: ReplaceOptions,
) -> Result<ProviderOperation<SingleCommand<ReplaceSteps>>> {
    let prune = context.config.prune_empty_directories;
    let update = UpdateOptions {
        tag: options.tag,
        ..UpdateOptions::default()
    };
    let mut local = update.local_options(prune)?;
    local.add(LocalOption::new(LocalOption::IGNORE_LOCAL_CHANGES));
    let variant = CommandVariant::new("Replace", CommandKind::Replace).with_options(local);
    let prompt: Arc<dyn OverwritePrompt> = match options.prompt {
        Some(prompt) => prompt,
        None => Arc::new(AlwaysOverwrite),
    };
    let steps = ReplaceSteps::new(prompt, prune);
    Ok(ProviderOperation::new(
        context,
        mappings,
        SingleCommand::with_steps(variant, steps),
    ))
}
