//! Checking a remote module out into a workspace project.

use std::sync::Arc;

use crate::context::{OperationContext, Progress};
use crate::error::{Result, VcsError};
use crate::operation::{fail_on_server_error, Operation};
use crate::options::{LocalOption, LocalOptions};
use crate::provider::RepositoryProvider;
use crate::resource::ResourcePath;
use crate::result::{OperationResult, ReportablePolicy};
use crate::rule::SchedulingRule;
use crate::session::{with_session, CommandInvocation, CommandKind, RepositoryLocation};
use crate::status::Status;
use crate::tag::{Tag, TagKind};

#[derive(Debug, Clone)]
pub struct CheckoutOptions {
    /// Remote module to check out
    pub module: String,
    /// Project to create or refresh
    pub target: ResourcePath,
    /// Check out this tag instead of HEAD
    pub tag: Option<Tag>,
    /// Resolve module aliases before checking out
    pub expand_modules: bool,
}

impl CheckoutOptions {
    pub fn new(module: impl Into<String>, target: impl AsRef<str>) -> Self {
        Self {
            module: module.into(),
            target: ResourcePath::new(target),
            tag: None,
            expand_modules: true,
        }
    }
}

/// Checks a module out into a project and binds a provider to it
pub struct CheckoutOperation {
    context: OperationContext,
    location: Arc<dyn RepositoryLocation>,
    options: CheckoutOptions,
    result: OperationResult,
}

impl CheckoutOperation {
    pub fn new(
        context: OperationContext,
        location: Arc<dyn RepositoryLocation>,
        options: CheckoutOptions,
    ) -> Self {
        Self {
            context,
            location,
            options,
            result: OperationResult::new(ReportablePolicy::default()),
        }
    }

    /// Problems with the target that make the checkout pointless
    fn validate(&self) -> Result<()> {
        let target = &self.options.target;
        if target.segment_count() != 1 {
            return Err(VcsError::Validation(format!(
                "Checkout target {} must be a top-level project",
                target
            )));
        }
        if self.options.module.trim().is_empty() {
            return Err(VcsError::Validation("No module given to check out".into()));
        }
        if let Some(tag) = &self.options.tag {
            tag.validate()?;
        }
        let workspace = self.context.workspace.as_ref();
        match workspace.provider(target) {
            Some(existing)
                if existing.location_name() != self.location.location()
                    || existing.remote_root() != self.options.module =>
            {
                Err(VcsError::Validation(format!(
                    "{} is already shared with {} ({})",
                    target,
                    existing.location_name(),
                    existing.remote_root()
                )))
            }
            Some(_) => Ok(()),
            None if workspace.exists(target) => Err(VcsError::Validation(format!(
                "{} already exists and is not shared with {}",
                target,
                self.options.module
            ))),
            None => Ok(()),
        }
    }

    fn local_options(&self) -> Result<LocalOptions> {
        let mut local = LocalOptions::new().with(LocalOption::with_argument(
            LocalOption::TARGET_DIRECTORY,
            self.options.target.as_str(),
        ));
        match &self.options.tag {
            Some(tag) if tag.kind() != TagKind::Head => local.add(LocalOption::tag(tag)?),
            _ => {}
        }
        if self.context.config.prune_empty_directories {
            local.add(LocalOption::new(LocalOption::PRUNE_EMPTY_DIRECTORIES));
        }
        Ok(local)
    }
}

impl Operation for CheckoutOperation {
    fn name(&self) -> &str {
        "Checkout"
    }

    fn run(&mut self, progress: &mut Progress) -> Result<()> {
        progress.begin("Checkout", 10);
        let local = match self.validate().and_then(|_| self.local_options()) {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!("Checkout of {} refused: {}", self.options.module, e);
                self.result.collect(e.to_status());
                return Ok(());
            }
        };
        let target = self.options.target.clone();
        let _rule = self.context.locks.acquire(
            SchedulingRule::Project(target.clone()),
            progress.cancel_flag(),
            self.context.config.lock_poll_interval(),
        )?;

        let module = self.options.module.clone();
        let expand = self.options.expand_modules;
        let console = self.context.output();
        let mut session_progress = progress.split(9);
        let outcome = with_session(
            &self.location,
            ResourcePath::root(),
            "",
            true,
            &mut session_progress,
            |session, progress| {
                progress.begin("Checkout", 2);
                let mut merged = Status::ok();
                let mut modules = vec![module.clone()];
                if expand {
                    let invocation = CommandInvocation::new(
                        CommandKind::ExpandModules,
                        LocalOptions::new(),
                        vec![module.clone()],
                    );
                    let status = session.execute(&invocation, console, &mut progress.split(1))?;
                    merged = Status::merge(&merged, &fail_on_server_error(status)?);
                    let expanded = session.module_expansions();
                    if !expanded.is_empty() {
                        modules = expanded;
                    }
                }
                let remote_root = modules[0].clone();
                let invocation = CommandInvocation::new(CommandKind::Checkout, local, modules);
                let status = session.execute(&invocation, console, &mut progress.split(1))?;
                Ok((Status::merge(&merged, &fail_on_server_error(status)?), remote_root))
            },
        );

        match outcome {
            Ok((status, remote_root)) => {
                let provider =
                    RepositoryProvider::new(target.clone(), Arc::clone(&self.location), remote_root);
                self.context.workspace.bind_provider(Arc::new(provider))?;
                tracing::info!("Checked out {} into {}", self.options.module, target);
                self.result.record_provider(target, Arc::clone(&status));
                self.result.collect(status);
            }
            Err(e) if e.is_recoverable() => {
                tracing::error!("Checkout of {} failed: {}", self.options.module, e);
                let status = e.to_status();
                self.result.record_provider(target, Arc::clone(&status));
                self.result.collect(status);
            }
            Err(e) => return Err(e),
        }
        progress.done();
        Ok(())
    }

    fn result(&self) -> &OperationResult {
        &self.result
    }

    /// Binds a provider on success, so it runs on the caller's thread
    fn can_run_in_background(&self) -> bool {
        false
    }
}
