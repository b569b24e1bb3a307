//! Operations that issue one command per pass over one session.

use std::sync::Arc;

use crate::context::{OperationContext, Progress};
use crate::error::Result;
use crate::operation::{arguments_for, fail_on_server_error, Pass, PassExecutor};
use crate::options::LocalOptions;
use crate::provider::RepositoryProvider;
use crate::resource::Resource;
use crate::result::ReportablePolicy;
use crate::session::{with_session, CommandInvocation, CommandKind};
use crate::status::{Status, StatusRef};

/// How a variant's recursion flag follows the pass depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecursePolicy {
    /// `-l` on every pass that is not deep
    #[default]
    FollowPass,
    /// The command never recurses on the server; no flag is sent
    Never,
}

/// Everything that distinguishes one single-command operation from another
#[derive(Debug, Clone)]
pub struct CommandVariant {
    pub name: &'static str,
    pub command: CommandKind,
    pub local_options: LocalOptions,
    /// Sent after the local options, ahead of the resource paths
    pub operands: Vec<String>,
    pub recurse: RecursePolicy,
    pub server_modification: bool,
    pub reportable: ReportablePolicy,
    pub handles_non_traversed_folders: bool,
}

impl CommandVariant {
    pub fn new(name: &'static str, command: CommandKind) -> Self {
        Self {
            name,
            command,
            local_options: LocalOptions::new(),
            operands: Vec::new(),
            recurse: RecursePolicy::FollowPass,
            server_modification: false,
            reportable: ReportablePolicy::default(),
            handles_non_traversed_folders: false,
        }
    }

    pub fn with_options(mut self, local_options: LocalOptions) -> Self {
        self.local_options = local_options;
        self
    }

    pub fn with_operands(mut self, operands: Vec<String>) -> Self {
        self.operands = operands;
        self
    }

    pub fn server_modification(mut self) -> Self {
        self.server_modification = true;
        self
    }

    pub fn with_reportable(mut self, reportable: ReportablePolicy) -> Self {
        self.reportable = reportable;
        self
    }

    /// Local options for a pass
    pub fn local_options(&self, recurse: bool) -> LocalOptions {
        match self.recurse {
            RecursePolicy::FollowPass => self.local_options.for_recursion(recurse),
            RecursePolicy::Never => self.local_options.clone(),
        }
    }
}

/// Side effects a variant runs around its command, outside the session
pub trait PassSteps: Send {
    /// Prepare local state; returns the resources the command should cover
    fn before(
        &mut self,
        _context: &OperationContext,
        _provider: &Arc<RepositoryProvider>,
        _pass: &Pass,
        resources: Vec<Resource>,
        _progress: &mut Progress,
    ) -> Result<Vec<Resource>> {
        Ok(resources)
    }

    /// Runs after the command succeeded
    fn after(
        &mut self,
        _context: &OperationContext,
        _pass: &Pass,
        _resources: &[Resource],
        _status: &StatusRef,
    ) -> Result<()> {
        Ok(())
    }

    fn provider_finished(
        &mut self,
        _context: &OperationContext,
        _provider: &Arc<RepositoryProvider>,
        _status: &StatusRef,
    ) -> Result<()> {
        Ok(())
    }
}

/// Steps for variants with no side effects
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSteps;

impl PassSteps for NoSteps {}

/// Pass executor issuing the variant's command once per pass
pub struct SingleCommand<S = NoSteps> {
    variant: CommandVariant,
    steps: S,
}

impl SingleCommand<NoSteps> {
    pub fn new(variant: CommandVariant) -> Self {
        Self {
            variant,
            steps: NoSteps,
        }
    }
}

impl<S: PassSteps> SingleCommand<S> {
    pub fn with_steps(variant: CommandVariant, steps: S) -> Self {
        Self { variant, steps }
    }

    pub fn variant(&self) -> &CommandVariant {
        &self.variant
    }

    pub fn steps(&self) -> &S {
        &self.steps
    }
}

impl<S: PassSteps> PassExecutor for SingleCommand<S> {
    fn name(&self) -> &str {
        self.variant.name
    }

    fn is_server_modification(&self) -> bool {
        self.variant.server_modification
    }

    fn reportable(&self) -> ReportablePolicy {
        self.variant.reportable.clone()
    }

    fn handles_non_traversed_folders(&self) -> bool {
        self.variant.handles_non_traversed_folders
    }

    fn execute_pass(
        &mut self,
        context: &OperationContext,
        provider: &Arc<RepositoryProvider>,
        pass: &Pass,
        progress: &mut Progress,
    ) -> Result<StatusRef> {
        progress.begin(self.variant.name, 10);
        let mut prepare = progress.split(2);
        let resources = self
            .steps
            .before(context, provider, pass, pass.resources.clone(), &mut prepare)?;
        if resources.is_empty() {
            tracing::debug!("{}: nothing left to do on {}", self.variant.name, provider.project());
            return Ok(Status::ok());
        }

        let root = provider.project().clone();
        let invocation = CommandInvocation::new(
            self.variant.command,
            self.variant.local_options(pass.recurse()),
            arguments_for(&resources, &root),
        )
        .with_operands(self.variant.operands.clone());
        let mut command = progress.split(8);
        let status = with_session(
            provider.location(),
            root,
            provider.remote_root(),
            self.variant.server_modification,
            &mut command,
            |session, progress| session.execute(&invocation, context.output(), progress),
        )?;
        let status = fail_on_server_error(status)?;
        self.steps.after(context, pass, &resources, &status)?;
        progress.done();
        Ok(status)
    }

    fn provider_finished(
        &mut self,
        context: &OperationContext,
        provider: &Arc<RepositoryProvider>,
        status: &StatusRef,
    ) -> Result<()> {
        self.steps.provider_finished(context, provider, status)
    }
}
