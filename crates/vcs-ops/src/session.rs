//! Sessions against a repository location and the commands sent over them.
//!
//! The protocol layer is a black box behind [`Session`]: it accepts a
//! [`CommandInvocation`] and returns a status. This module owns the pieces the
//! engine relies on around it: argument escaping, command-line logging, the
//! console listener and the close-on-drop session guard.

use std::fmt;
use std::sync::Arc;

use crate::context::Progress;
use crate::error::Result;
use crate::options::{GlobalOptions, LocalOptions};
use crate::resource::ResourcePath;
use crate::status::StatusRef;

/// Protocol request a command issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Add,
    Commit,
    Update,
    /// Update that discards local changes (`update -C`)
    Replace,
    Tag,
    Diff,
    Checkout,
    ExpandModules,
}

impl CommandKind {
    /// Request name sent to the server
    pub fn request_id(&self) -> &'static str {
        match self {
            CommandKind::Add => "add",
            CommandKind::Commit => "ci",
            CommandKind::Update | CommandKind::Replace => "update",
            CommandKind::Tag => "tag",
            CommandKind::Diff => "diff",
            CommandKind::Checkout => "co",
            CommandKind::ExpandModules => "expand-modules",
        }
    }

    /// Whether the command writes local resources or sync state
    pub fn is_workspace_modification(&self) -> bool {
        !matches!(self, CommandKind::Diff | CommandKind::ExpandModules)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Add => "add",
            CommandKind::Commit => "commit",
            CommandKind::Update => "update",
            CommandKind::Replace => "replace",
            CommandKind::Tag => "tag",
            CommandKind::Diff => "diff",
            CommandKind::Checkout => "checkout",
            CommandKind::ExpandModules => "expand-modules",
        };
        write!(f, "{}", name)
    }
}

/// One command ready to be executed on an open session.
///
/// Arguments are paths relative to the session's local root, `.` meaning the
/// root itself. Operands such as a tag name sit between the local options and
/// the paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub kind: CommandKind,
    pub global: GlobalOptions,
    pub local: LocalOptions,
    pub operands: Vec<String>,
    pub arguments: Vec<String>,
}

impl CommandInvocation {
    pub fn new(kind: CommandKind, local: LocalOptions, arguments: Vec<String>) -> Self {
        Self {
            kind,
            global: GlobalOptions::none(),
            local,
            operands: Vec::new(),
            arguments,
        }
    }

    pub fn with_operands(mut self, operands: Vec<String>) -> Self {
        self.operands = operands;
        self
    }

    /// Arguments as sent on the wire; a leading `-` would read as an option
    pub fn escaped_arguments(&self) -> Vec<String> {
        self.arguments.iter().map(|a| escape_argument(a)).collect()
    }

    /// Equivalent command line, for logs and the console
    pub fn command_line(&self, root: &ResourcePath) -> String {
        let mut line = String::from("cvs");
        for option in self.global.iter() {
            if !option.as_str().is_empty() {
                line.push(' ');
                line.push_str(option.as_str());
            }
        }
        line.push(' ');
        line.push_str(self.kind.request_id());
        for option in self.local.iter() {
            let text = option.to_string();
            if !text.is_empty() {
                line.push(' ');
                line.push_str(&text);
            }
        }
        for operand in &self.operands {
            line.push(' ');
            line.push_str(operand);
        }
        for argument in &self.arguments {
            if argument.is_empty() {
                continue;
            }
            let full = if argument == "." {
                root.clone()
            } else {
                root.join(argument)
            };
            line.push_str(&format!(" \"{}\"", full.as_str()));
        }
        line
    }
}

/// Prefix arguments that start with `-` so the server reads them as paths
pub fn escape_argument(argument: &str) -> String {
    if argument.starts_with('-') {
        format!("./{}", argument)
    } else {
        argument.to_string()
    }
}

/// Receives server output while a command runs
pub trait OutputListener: Send + Sync {
    fn message_line(&self, line: &str, root: &ResourcePath);
    fn error_line(&self, line: &str, root: &ResourcePath);

    fn command_invoked(&self, line: &str) {
        tracing::debug!("{}", line);
    }

    fn command_completed(&self, status: &StatusRef) {
        if status.is_ok() {
            tracing::debug!("Command completed");
        } else {
            tracing::warn!("Command completed with problems: {}", status);
        }
    }
}

/// Console that writes server output to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl OutputListener for TracingConsole {
    fn message_line(&self, line: &str, root: &ResourcePath) {
        tracing::info!(root = %root, "{}", line);
    }

    fn error_line(&self, line: &str, root: &ResourcePath) {
        tracing::warn!(root = %root, "{}", line);
    }
}

/// Console that drops everything, used when console output is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentConsole;

impl OutputListener for SilentConsole {
    fn message_line(&self, _line: &str, _root: &ResourcePath) {}
    fn error_line(&self, _line: &str, _root: &ResourcePath) {}
    fn command_invoked(&self, _line: &str) {}
    fn command_completed(&self, _status: &StatusRef) {}
}

/// A stateful connection to one repository location, rooted at one folder
pub trait Session: Send {
    /// Workspace folder all command arguments are relative to
    fn local_root(&self) -> &ResourcePath;

    fn is_open(&self) -> bool;

    /// Connect. Fails if the session is already open or unreachable.
    fn open(&mut self, for_modification: bool, progress: &mut Progress) -> Result<()>;

    fn execute(
        &mut self,
        invocation: &CommandInvocation,
        listener: &dyn OutputListener,
        progress: &mut Progress,
    ) -> Result<StatusRef>;

    /// Module aliases learned from the last expand-modules request
    fn module_expansions(&self) -> Vec<String>;

    /// Disconnect. A no-op on a session that is not open.
    fn close(&mut self) -> Result<()>;
}

/// Where a repository lives; a factory for sessions against it
pub trait RepositoryLocation: Send + Sync {
    /// Location string, e.g. `:pserver:user@host:/cvsroot`
    fn location(&self) -> String;

    fn create_session(&self, local_root: ResourcePath, remote_root: &str) -> Box<dyn Session>;
}

/// An open session that is closed when dropped.
///
/// Close errors on drop are logged, never raised, so early returns and
/// cancellation always release the connection.
pub struct OpenSession {
    session: Box<dyn Session>,
}

impl OpenSession {
    /// Open `session`; on failure it is still closed before returning
    pub fn open(mut session: Box<dyn Session>, for_modification: bool, progress: &mut Progress) -> Result<Self> {
        if let Err(e) = session.open(for_modification, progress) {
            if let Err(close_err) = session.close() {
                tracing::warn!("Failed to close session after open error: {}", close_err);
            }
            return Err(e);
        }
        Ok(Self { session })
    }

    pub fn local_root(&self) -> &ResourcePath {
        self.session.local_root()
    }

    /// Log, run and report one command
    pub fn execute(
        &mut self,
        invocation: &CommandInvocation,
        listener: &dyn OutputListener,
        progress: &mut Progress,
    ) -> Result<StatusRef> {
        progress.check_canceled()?;
        let line = invocation.command_line(self.session.local_root());
        listener.command_invoked(&line);
        let status = self.session.execute(invocation, listener, progress)?;
        listener.command_completed(&status);
        Ok(status)
    }

    pub fn module_expansions(&self) -> Vec<String> {
        self.session.module_expansions()
    }
}

impl Drop for OpenSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            tracing::warn!("Failed to close session on {}: {}", self.session.local_root(), e);
        }
    }
}

/// Run `body` inside a session opened against `location`
pub fn with_session<T>(
    location: &Arc<dyn RepositoryLocation>,
    local_root: ResourcePath,
    remote_root: &str,
    for_modification: bool,
    progress: &mut Progress,
    body: impl FnOnce(&mut OpenSession, &mut Progress) -> Result<T>,
) -> Result<T> {
    progress.check_canceled()?;
    let session = location.create_session(local_root, remote_root);
    let mut open = OpenSession::open(session, for_modification, progress)?;
    body(&mut open, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::LocalOption;

    #[test]
    fn test_escaped_arguments() {
        let invocation = CommandInvocation::new(
            CommandKind::Add,
            LocalOptions::new(),
            vec!["-weird.txt".into(), "src/a.txt".into()],
        );
        assert_eq!(invocation.escaped_arguments(), vec!["./-weird.txt", "src/a.txt"]);
    }

    #[test]
    fn test_command_line() {
        let local = LocalOptions::new()
            .with(LocalOption::do_not_recurse())
            .with(LocalOption::message(Some("fix")));
        let invocation = CommandInvocation::new(
            CommandKind::Commit,
            local,
            vec!["src".into(), ".".into()],
        );
        assert_eq!(
            invocation.command_line(&ResourcePath::new("P")),
            "cvs ci -l -m \"fix\" \"P/src\" \"P\""
        );
    }

    #[test]
    fn test_operands_precede_paths() {
        let local = LocalOptions::new()
            .with(LocalOption::new(LocalOption::FORCE_REASSIGNMENT))
            .with(LocalOption::do_not_recurse());
        let invocation = CommandInvocation::new(CommandKind::Tag, local, vec!["src".into()])
            .with_operands(vec!["v1".into()]);
        assert_eq!(
            invocation.command_line(&ResourcePath::new("P")),
            "cvs tag -F -l v1 \"P/src\""
        );
    }

    #[test]
    fn test_request_ids() {
        assert_eq!(CommandKind::Replace.request_id(), "update");
        assert_eq!(CommandKind::Checkout.request_id(), "co");
        assert!(!CommandKind::Diff.is_workspace_modification());
        assert!(CommandKind::Tag.is_workspace_modification());
    }
}
