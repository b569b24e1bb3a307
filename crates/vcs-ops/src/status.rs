//! Command and operation statuses.
//!
//! A [`Status`] is what a protocol command returns and what the result
//! aggregator records. Statuses are shared as [`StatusRef`] so that identity
//! (not equality) can be used to avoid recording the same failure twice.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::resource::ResourcePath;

/// Shared handle to a status; identity matters for de-duplication
pub type StatusRef = Arc<Status>;

/// Severity of a status, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
    Cancel,
}

/// Numeric classification code carried by every status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: Self = Self(0);
    /// Generic failure, also used for connectivity and validation problems
    pub const UNABLE: Self = Self(-1);
    pub const SERVER_ERROR: Self = Self(-10);
    pub const NO_SUCH_TAG: Self = Self(-11);
    pub const CONFLICT: Self = Self(-12);
    pub const ERROR_LINE: Self = Self(-14);
    pub const TAG_ALREADY_EXISTS: Self = Self(-15);
    pub const INVALID_LOCAL_RESOURCE_PATH: Self = Self(-22);
    pub const INTERNAL_ERROR: Self = Self(-100);

    /// Codes that are reportable unless an operation widens the set
    pub const DEFAULT_REPORTABLE: [Self; 3] =
        [Self::SERVER_ERROR, Self::INTERNAL_ERROR, Self::UNABLE];
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a command or sub-operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    severity: Severity,
    code: StatusCode,
    message: String,
    resource: Option<ResourcePath>,
    children: Vec<StatusRef>,
}

impl Status {
    fn build(severity: Severity, code: StatusCode, message: impl Into<String>) -> StatusRef {
        Arc::new(Self {
            severity,
            code,
            message: message.into(),
            resource: None,
            children: Vec::new(),
        })
    }

    pub fn ok() -> StatusRef {
        Self::build(Severity::Ok, StatusCode::OK, "ok")
    }

    pub fn info(code: StatusCode, message: impl Into<String>) -> StatusRef {
        Self::build(Severity::Info, code, message)
    }

    pub fn warning(code: StatusCode, message: impl Into<String>) -> StatusRef {
        Self::build(Severity::Warning, code, message)
    }

    pub fn error(code: StatusCode, message: impl Into<String>) -> StatusRef {
        Self::build(Severity::Error, code, message)
    }

    /// Status a command returns when the server reported a failure
    pub fn server_error(message: impl Into<String>) -> StatusRef {
        Self::error(StatusCode::SERVER_ERROR, message)
    }

    pub fn cancel() -> StatusRef {
        Self::build(Severity::Cancel, StatusCode::OK, "canceled")
    }

    /// Create a status scoped to one resource
    pub fn for_resource(
        severity: Severity,
        code: StatusCode,
        resource: ResourcePath,
        message: impl Into<String>,
    ) -> StatusRef {
        Arc::new(Self {
            severity,
            code,
            message: message.into(),
            resource: Some(resource),
            children: Vec::new(),
        })
    }

    /// Create a multi-status; its severity is the worst of its children.
    ///
    /// With no children the result is an OK status that is not a multi, so
    /// its own code never makes it reportable.
    pub fn multi(code: StatusCode, message: impl Into<String>, children: Vec<StatusRef>) -> StatusRef {
        let severity = children
            .iter()
            .map(|c| c.severity)
            .max()
            .unwrap_or(Severity::Ok);
        Arc::new(Self {
            severity,
            code,
            message: message.into(),
            resource: None,
            children,
        })
    }

    /// Merge a newly returned status into an accumulated one.
    ///
    /// OK statuses vanish, two non-OK statuses become an info multi-status,
    /// and an existing multi-status absorbs the new status.
    pub fn merge(accumulated: &StatusRef, new: &StatusRef) -> StatusRef {
        if accumulated.is_multi() {
            if new.is_ok() {
                return Arc::clone(accumulated);
            }
            let mut children = accumulated.children.clone();
            children.push(Arc::clone(new));
            return Self::multi(accumulated.code, accumulated.message.clone(), children);
        }
        if accumulated.is_ok() {
            return Arc::clone(new);
        }
        if new.is_ok() {
            return Arc::clone(accumulated);
        }
        Self::multi(
            StatusCode::OK,
            "Command completed with warnings",
            vec![Arc::clone(accumulated), Arc::clone(new)],
        )
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn resource(&self) -> Option<&ResourcePath> {
        self.resource.as_ref()
    }

    pub fn children(&self) -> &[StatusRef] {
        &self.children
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_multi(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether the server rejected the command outright
    pub fn is_server_error(&self) -> bool {
        self.code == StatusCode::SERVER_ERROR
    }

    /// This status followed by all nested children, depth first
    pub fn flatten(self: &Arc<Self>) -> Vec<StatusRef> {
        let mut out = Vec::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(status) = stack.pop() {
            for child in status.children.iter().rev() {
                stack.push(Arc::clone(child));
            }
            out.push(status);
        }
        out
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}: {}", resource, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_ok_is_absorbed() {
        let ok = Status::ok();
        let warn = Status::warning(StatusCode::CONFLICT, "conflict");
        assert!(Arc::ptr_eq(&Status::merge(&ok, &warn), &warn));
        assert!(Arc::ptr_eq(&Status::merge(&warn, &ok), &warn));
    }

    #[test]
    fn test_merge_two_warnings_builds_multi() {
        let a = Status::warning(StatusCode::CONFLICT, "a");
        let b = Status::warning(StatusCode::ERROR_LINE, "b");
        let merged = Status::merge(&a, &b);
        assert!(merged.is_multi());
        assert_eq!(merged.children().len(), 2);
        assert_eq!(merged.severity(), Severity::Warning);

        let c = Status::server_error("c");
        let merged = Status::merge(&merged, &c);
        assert_eq!(merged.children().len(), 3);
        assert_eq!(merged.severity(), Severity::Error);
    }

    #[test]
    fn test_flatten_visits_children() {
        let inner = Status::multi(
            StatusCode::OK,
            "inner",
            vec![Status::server_error("x"), Status::ok()],
        );
        let outer = Status::multi(StatusCode::OK, "outer", vec![inner, Status::ok()]);
        let all = outer.flatten();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].message(), "outer");
        assert_eq!(all[1].message(), "inner");
        assert_eq!(all[2].message(), "x");
    }
}
