//! Creating a branch: optional root tag, the branch tag itself, and an
//! optional switch of the selection onto the new branch.

use crate::context::{OperationContext, Progress};
use crate::error::{Result, VcsError};
use crate::operation::tag::{tag, TagOptions};
use crate::operation::update::{update, UpdateOptions};
use crate::operation::Operation;
use crate::resource::ResourceMapping;
use crate::result::{OperationResult, ReportablePolicy};
use crate::status::StatusCode;
use crate::tag::{Tag, TagKind};

#[derive(Debug, Clone)]
pub struct BranchOptions {
    pub branch: Tag,
    /// Version tag marking the branch point
    pub root_version: Option<Tag>,
    /// Move the selection onto the branch afterwards
    pub update: bool,
}

impl BranchOptions {
    pub fn new(branch: Tag) -> Self {
        Self {
            branch,
            root_version: None,
            update: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.branch.kind() != TagKind::Branch {
            return Err(VcsError::Validation(format!("{} is not a branch tag", self.branch)));
        }
        self.branch.validate()?;
        if let Some(version) = &self.root_version {
            if version.kind() != TagKind::Version {
                return Err(VcsError::Validation(format!("{} is not a version tag", version)));
            }
            version.validate()?;
        }
        Ok(())
    }
}

/// Composite of tag, branch tag and update, stopping at the first failing step
pub struct BranchOperation {
    context: OperationContext,
    mappings: Vec<ResourceMapping>,
    options: BranchOptions,
    result: OperationResult,
}

impl BranchOperation {
    pub fn new(
        context: OperationContext,
        mappings: Vec<ResourceMapping>,
        options: BranchOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            context,
            mappings,
            options,
            result: OperationResult::new(
                ReportablePolicy::default().with_code(StatusCode::TAG_ALREADY_EXISTS),
            ),
        })
    }

    /// Run one step and fold its statuses in; `false` stops the sequence
    fn step(&mut self, operation: &mut dyn Operation, progress: &mut Progress) -> Result<bool> {
        operation.run(progress)?;
        let failed = !operation.result().reportable_errors().is_empty();
        self.result.absorb(operation.result().clone());
        if failed {
            tracing::warn!("{} failed, not continuing the branch", operation.name());
        }
        Ok(!failed)
    }
}

impl Operation for BranchOperation {
    fn name(&self) -> &str {
        "Branch"
    }

    fn run(&mut self, progress: &mut Progress) -> Result<()> {
        progress.begin("Branch", 3);

        if let Some(version) = self.options.root_version.clone() {
            let mut root_tag = tag(
                self.context.clone(),
                self.mappings.clone(),
                TagOptions::create(version),
            )?;
            if !self.step(&mut root_tag, &mut progress.split(1))? {
                return Ok(());
            }
        } else {
            progress.worked(1);
        }

        let mut branch_tag = tag(
            self.context.clone(),
            self.mappings.clone(),
            TagOptions::create(self.options.branch.clone()),
        )?;
        if !self.step(&mut branch_tag, &mut progress.split(1))? {
            return Ok(());
        }

        if self.options.update {
            let mut switch = update(
                self.context.clone(),
                self.mappings.clone(),
                UpdateOptions::to_tag(self.options.branch.clone()),
            )?;
            self.step(&mut switch, &mut progress.split(1))?;
        }
        progress.done();
        Ok(())
    }

    fn result(&self) -> &OperationResult {
        &self.result
    }
}
