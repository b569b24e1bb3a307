//! Aggregating the statuses of many sub-operations into one outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, VcsError};
use crate::resource::ResourcePath;
use crate::status::{Status, StatusCode, StatusRef};

/// Which status codes a human has to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportablePolicy {
    codes: Vec<StatusCode>,
}

impl Default for ReportablePolicy {
    fn default() -> Self {
        Self {
            codes: StatusCode::DEFAULT_REPORTABLE.to_vec(),
        }
    }
}

impl ReportablePolicy {
    /// Also report `code`, on top of the defaults
    pub fn with_code(mut self, code: StatusCode) -> Self {
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
        self
    }

    /// A status is reportable if its code is, or if any nested child is
    pub fn is_reportable(&self, status: &Status) -> bool {
        if status.is_ok() {
            return false;
        }
        if status.is_multi() {
            return status.children().iter().any(|c| self.is_reportable(c));
        }
        self.codes.contains(&status.code())
    }
}

/// Final outcome of an operation as seen by its caller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialFailure {
        errors: Vec<StatusRef>,
        attempted: usize,
    },
    Canceled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Ordered statuses of the sub-operations run so far
#[derive(Debug, Clone, Default)]
pub struct OperationResult {
    statuses: Vec<StatusRef>,
    attempted: usize,
    providers: BTreeMap<ResourcePath, StatusRef>,
    policy: ReportablePolicy,
}

impl OperationResult {
    pub fn new(policy: ReportablePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Record the status of one attempted sub-operation.
    ///
    /// The attempt always counts; a non-OK status already recorded last by
    /// [`add_error`](Self::add_error) is not stored again.
    pub fn collect(&mut self, status: StatusRef) {
        self.attempted += 1;
        if status.is_ok() {
            return;
        }
        if self.is_last(&status) {
            return;
        }
        self.statuses.push(status);
    }

    /// Record a detailed error without counting an attempt.
    ///
    /// Recording the same status twice in a row stores it once.
    pub fn add_error(&mut self, status: StatusRef) {
        if status.is_ok() || self.is_last(&status) {
            return;
        }
        self.statuses.push(status);
    }

    fn is_last(&self, status: &StatusRef) -> bool {
        self.statuses
            .last()
            .map(|last| Arc::ptr_eq(last, status))
            .unwrap_or(false)
    }

    /// Remember the combined status of one provider's passes
    pub fn record_provider(&mut self, project: ResourcePath, status: StatusRef) {
        self.providers.insert(project, status);
    }

    /// Per-provider statuses, keyed by project
    pub fn provider_results(&self) -> &BTreeMap<ResourcePath, StatusRef> {
        &self.providers
    }

    pub fn provider_status(&self, project: &ResourcePath) -> Option<&StatusRef> {
        self.providers.get(project)
    }

    /// All recorded non-OK statuses, in order
    pub fn errors(&self) -> &[StatusRef] {
        &self.statuses
    }

    pub fn last_error(&self) -> Option<&StatusRef> {
        self.statuses.last()
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn policy(&self) -> &ReportablePolicy {
        &self.policy
    }

    pub fn reportable_errors(&self) -> Vec<StatusRef> {
        self.statuses
            .iter()
            .filter(|s| self.policy.is_reportable(s))
            .cloned()
            .collect()
    }

    /// Fold another result into this one
    pub fn absorb(&mut self, other: OperationResult) {
        self.attempted += other.attempted;
        for status in other.statuses {
            self.add_error(status);
        }
        self.providers.extend(other.providers);
    }

    pub fn outcome(&self) -> Outcome {
        let errors = self.reportable_errors();
        if errors.is_empty() {
            Outcome::Success
        } else {
            Outcome::PartialFailure {
                errors,
                attempted: self.attempted,
            }
        }
    }

    /// `Ok` unless something reportable happened.
    ///
    /// One reportable error is raised as is; several are wrapped in a
    /// multi-status summarizing how many of the attempts failed.
    pub fn check(&self) -> Result<()> {
        let mut errors = self.reportable_errors();
        match errors.len() {
            0 => Ok(()),
            1 => Err(VcsError::Reportable(errors.remove(0))),
            count => Err(VcsError::Reportable(Status::multi(
                StatusCode::OK,
                format!("{} of {} operations failed", count, self.attempted.max(count)),
                errors,
            ))),
        }
    }
}
