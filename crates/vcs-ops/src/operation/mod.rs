//! Operations and the provider pipeline they run through.
//!
//! Every provider-scoped operation follows the same fixed pipeline: build
//! the scope, map it per provider, take the scheduling rule, then run the
//! deep, shallow and non-traversed passes. What differs per command lives in
//! a [`PassExecutor`].

pub mod add;
pub mod branch;
pub mod checkout;
pub mod commit;
pub mod diff;
pub mod replace;
pub mod single;
pub mod tag;
pub mod update;

use std::sync::Arc;

use crate::context::{OperationContext, Progress};
use crate::error::{Result, VcsError};
use crate::provider::RepositoryProvider;
use crate::resource::{Depth, Resource, ResourceMapping, ResourcePath};
use crate::result::{OperationResult, Outcome, ReportablePolicy};
use crate::rule::RuleCalculator;
use crate::scope::{Scope, ScopeBuilder};
use crate::status::{Status, StatusRef};
use crate::traversal::{TraversalMapEntry, TraversalMapper};

pub use add::{add, AddExecutor};
pub use branch::{BranchOperation, BranchOptions};
pub use checkout::{CheckoutOperation, CheckoutOptions};
pub use commit::{commit, CommitOptions};
pub use diff::{diff, DiffExecutor, DiffOptions};
pub use replace::{replace, AlwaysOverwrite, OverwritePrompt, ReplaceOptions, ReplaceSteps};
pub use single::{CommandVariant, NoSteps, PassSteps, RecursePolicy, SingleCommand};
pub use tag::{tag, TagAction, TagOptions, TagSteps};
pub use update::{update, UpdateOptions};

/// Something a caller can run and inspect afterwards
pub trait Operation: Send {
    fn name(&self) -> &str;

    /// Do the work, recording sub-operation statuses in [`result`](Self::result).
    ///
    /// Returns `Err` only for cancellation and unexpected failures.
    fn run(&mut self, progress: &mut Progress) -> Result<()>;

    fn result(&self) -> &OperationResult;

    /// Hint for schedulers; operations that must stay on the caller's thread
    /// return `false`
    fn can_run_in_background(&self) -> bool {
        true
    }

    /// Run, then fail if anything reportable happened
    fn execute(&mut self, progress: &mut Progress) -> Result<()> {
        self.run(progress)?;
        self.result().check()
    }

    /// Run and summarize, mapping cancellation to [`Outcome::Canceled`]
    fn run_to_outcome(&mut self, progress: &mut Progress) -> Result<Outcome> {
        match self.run(progress) {
            Ok(()) => Ok(self.result().outcome()),
            Err(VcsError::Canceled) => {
                tracing::info!("{} canceled", self.name());
                Ok(Outcome::Canceled)
            }
            Err(e) => Err(e),
        }
    }

    fn errors(&self) -> &[StatusRef] {
        self.result().errors()
    }

    fn last_error(&self) -> Option<&StatusRef> {
        self.result().last_error()
    }
}

/// Which resource set of a provider a pass covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Deep,
    Shallow,
    NonTraversed,
}

impl PassKind {
    pub fn recurse(&self) -> bool {
        matches!(self, PassKind::Deep)
    }

    /// Depth at which the pass's resources are visited locally
    pub fn depth(&self) -> Depth {
        match self {
            PassKind::Deep => Depth::Infinite,
            PassKind::Shallow => Depth::One,
            PassKind::NonTraversed => Depth::Zero,
        }
    }
}

/// One command pass over part of a provider's resources
#[derive(Debug, Clone)]
pub struct Pass {
    pub kind: PassKind,
    pub resources: Vec<Resource>,
}

impl Pass {
    pub fn recurse(&self) -> bool {
        self.kind.recurse()
    }
}

/// Paths of `resources` relative to a session root
pub fn arguments_for(resources: &[Resource], root: &ResourcePath) -> Vec<String> {
    resources
        .iter()
        .filter_map(|r| match r.path.relative_to(root) {
            Some(argument) => Some(argument),
            None => {
                tracing::warn!("{} is outside session root {}", r.path, root);
                None
            }
        })
        .collect()
}

/// Turn a server-error status into a pass failure
pub fn fail_on_server_error(status: StatusRef) -> Result<StatusRef> {
    if status.flatten().iter().any(|s| s.is_server_error()) {
        Err(VcsError::Server(status))
    } else {
        Ok(status)
    }
}

/// The command specific part of a provider operation
pub trait PassExecutor: Send {
    fn name(&self) -> &str;

    /// Whether sessions must be opened for modification
    fn is_server_modification(&self) -> bool;

    fn reportable(&self) -> ReportablePolicy {
        ReportablePolicy::default()
    }

    /// Whether depth-zero folders get a pass of their own
    fn handles_non_traversed_folders(&self) -> bool {
        false
    }

    /// Run one pass. A server error is returned as `Err(VcsError::Server)`.
    fn execute_pass(
        &mut self,
        context: &OperationContext,
        provider: &Arc<RepositoryProvider>,
        pass: &Pass,
        progress: &mut Progress,
    ) -> Result<StatusRef>;

    /// Called once per provider after its passes, with their merged status
    fn provider_finished(
        &mut self,
        _context: &OperationContext,
        _provider: &Arc<RepositoryProvider>,
        _status: &StatusRef,
    ) -> Result<()> {
        Ok(())
    }
}

/// An operation over the providers owning a selection
pub struct ProviderOperation<E> {
    context: OperationContext,
    scope: ScopeBuilder,
    executor: E,
    result: OperationResult,
}

impl<E: PassExecutor> ProviderOperation<E> {
    pub fn new(context: OperationContext, mappings: Vec<ResourceMapping>, executor: E) -> Self {
        let scope = ScopeBuilder::new(mappings)
            .consulting(context.models.clone(), context.config.consult_models);
        let result = OperationResult::new(executor.reportable());
        Self {
            context,
            scope,
            executor,
            result,
        }
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// The operation's scope, built on first use
    pub fn scope(&self) -> Arc<Scope> {
        self.scope.build(self.context.workspace.as_ref())
    }

    /// Root resources the operation traverses
    pub fn traversal_roots(&self) -> Vec<Resource> {
        self.scope().roots().into_iter().cloned().collect()
    }

    fn passes(&self, entry: &TraversalMapEntry) -> Vec<Pass> {
        let mut passes = Vec::new();
        let deep = entry.deep_resources();
        if !deep.is_empty() {
            passes.push(Pass {
                kind: PassKind::Deep,
                resources: deep,
            });
        }
        let shallow = entry.shallow_resources();
        if !shallow.is_empty() {
            passes.push(Pass {
                kind: PassKind::Shallow,
                resources: shallow,
            });
        }
        if self.executor.handles_non_traversed_folders() {
            let folders = entry.non_traversed_folders();
            if !folders.is_empty() {
                passes.push(Pass {
                    kind: PassKind::NonTraversed,
                    resources: folders,
                });
            }
        }
        passes
    }

    fn execute_provider(&mut self, entry: &TraversalMapEntry, progress: &mut Progress) -> Result<()> {
        let provider = Arc::clone(entry.provider());
        let project = provider.project().clone();
        let _rule = self.context.locks.acquire(
            provider.modification_rule(),
            progress.cancel_flag(),
            self.context.config.lock_poll_interval(),
        )?;

        let passes = self.passes(entry);
        progress.begin(&format!("{} {}", self.executor.name(), project), passes.len() as u32);

        let mut provider_status = Status::ok();
        for pass in &passes {
            progress.check_canceled()?;
            let mut sub = progress.split(1);
            tracing::debug!(
                "Running {:?} {} pass on {} ({} resource(s))",
                pass.kind,
                self.executor.name(),
                project,
                pass.resources.len()
            );
            match self.executor.execute_pass(&self.context, &provider, pass, &mut sub) {
                Ok(status) => {
                    provider_status = Status::merge(&provider_status, &status);
                    self.result.collect(status);
                }
                Err(e) if e.is_recoverable() => {
                    tracing::error!("{} failed on {}: {}", self.executor.name(), project, e);
                    let status = e.to_status();
                    provider_status = Status::merge(&provider_status, &status);
                    self.result.collect(status);
                    // remaining passes for this provider are skipped
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self
            .executor
            .provider_finished(&self.context, &provider, &provider_status)
        {
            if !e.is_recoverable() {
                return Err(e);
            }
            tracing::warn!("Post-processing failed on {}: {}", project, e);
            self.result.add_error(e.to_status());
        }
        self.result.record_provider(project, provider_status);
        progress.done();
        Ok(())
    }
}

impl<E: PassExecutor> Operation for ProviderOperation<E> {
    fn name(&self) -> &str {
        self.executor.name()
    }

    fn run(&mut self, progress: &mut Progress) -> Result<()> {
        progress.begin(self.executor.name(), 100);
        progress.check_canceled()?;

        let scope = self.scope();
        progress.worked(5);
        let map = TraversalMapper::map(&scope, self.context.workspace.as_ref());
        progress.worked(5);
        if map.is_empty() {
            tracing::info!("{}: no shared resources selected", self.executor.name());
            progress.done();
            return Ok(());
        }

        let providers = map.providers();
        let _broad_rule = if providers.len() > 1 {
            match RuleCalculator::rule_for(&providers) {
                Some(rule) => Some(self.context.locks.acquire(
                    rule,
                    progress.cancel_flag(),
                    self.context.config.lock_poll_interval(),
                )?),
                None => None,
            }
        } else {
            None
        };

        let mut per_provider = progress.split(90);
        per_provider.begin(self.executor.name(), providers.len() as u32);
        for entry in map {
            per_provider.check_canceled()?;
            let mut sub = per_provider.split(1);
            self.execute_provider(&entry, &mut sub)?;
        }
        progress.done();
        tracing::info!(
            "{} finished: {} attempted, {} problem(s)",
            self.executor.name(),
            self.result.attempted(),
            self.result.errors().len()
        );
        Ok(())
    }

    fn result(&self) -> &OperationResult {
        &self.result
    }
}
