//! Producing a patch for the selection.
//!
//! Managed files with local changes are diffed by the server in bounded
//! sublists; new files are unknown to the server and are rendered locally as
//! whole-file additions. Both end up in one path-sorted [`Patch`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::config::DiffFormat;
use crate::context::{OperationContext, Progress};
use crate::error::Result;
use crate::operation::{arguments_for, fail_on_server_error, Pass, PassExecutor, ProviderOperation};
use crate::options::{LocalOption, LocalOptions};
use crate::patch::{new_file_diff, Patch, PatchEntry};
use crate::provider::RepositoryProvider;
use crate::resource::{Resource, ResourceKind, ResourceMapping, ResourcePath, SyncState};
use crate::session::{with_session, CommandInvocation, CommandKind, OutputListener};
use crate::status::{Status, StatusRef};
use crate::walk::ResourceWalker;

#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Overrides `diff_format` from the configuration
    pub format: Option<DiffFormat>,
    /// Include unmanaged and newly added files
    pub include_new_files: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            format: None,
            include_new_files: true,
        }
    }
}

/// Gathers server diff output, forwarding error lines to the console
struct DiffCollector<'a> {
    console: &'a dyn OutputListener,
    text: Mutex<String>,
}

impl<'a> DiffCollector<'a> {
    fn new(console: &'a dyn OutputListener) -> Self {
        Self {
            console,
            text: Mutex::new(String::new()),
        }
    }

    fn take(&self) -> String {
        self.text
            .lock()
            .map(|mut text| std::mem::take(&mut *text))
            .unwrap_or_default()
    }
}

impl OutputListener for DiffCollector<'_> {
    fn message_line(&self, line: &str, _root: &ResourcePath) {
        if let Ok(mut text) = self.text.lock() {
            text.push_str(line);
            text.push('\n');
        }
    }

    fn error_line(&self, line: &str, root: &ResourcePath) {
        self.console.error_line(line, root);
    }

    fn command_invoked(&self, line: &str) {
        self.console.command_invoked(line);
    }

    fn command_completed(&self, status: &StatusRef) {
        self.console.command_completed(status);
    }
}

/// Split server output into per-file sections keyed by the `Index:` path
fn split_sections(text: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if let Some(path) = line.strip_prefix("Index: ") {
            sections.push((path.trim().to_string(), String::new()));
        }
        if let Some((_, body)) = sections.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    sections
}

/// Pass executor for `diff`
#[derive(Debug)]
pub struct DiffExecutor {
    format: DiffFormat,
    include_new_files: bool,
    max_arguments: usize,
    patch: Patch,
}

impl DiffExecutor {
    pub fn new(format: DiffFormat, include_new_files: bool, max_arguments: usize) -> Self {
        Self {
            format,
            include_new_files,
            max_arguments: max_arguments.max(1),
            patch: Patch::new(),
        }
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn into_patch(self) -> Patch {
        self.patch
    }

    fn local_options(&self, recurse: bool) -> LocalOptions {
        let mut local = LocalOptions::new();
        match self.format {
            DiffFormat::Unified => local.add(LocalOption::new(LocalOption::UNIFIED_FORMAT)),
            DiffFormat::Context => local.add(LocalOption::new(LocalOption::CONTEXT_FORMAT)),
            DiffFormat::Standard => {}
        }
        if self.include_new_files {
            local.add(LocalOption::new(LocalOption::INCLUDE_NEW_FILES));
        }
        local.for_recursion(recurse)
    }

    /// Split the pass's files into new and changed ones
    fn classify(
        context: &OperationContext,
        pass: &Pass,
        progress: &Progress,
    ) -> Result<(Vec<Resource>, Vec<Resource>)> {
        let mut new_files = BTreeSet::new();
        let mut changed = BTreeSet::new();
        for root in &pass.resources {
            let walker = ResourceWalker::new(
                Arc::clone(&context.workspace),
                root.clone(),
                pass.kind.depth(),
                progress.cancel_flag().clone(),
            )
            .skip_ignored();
            for entry in walker {
                let entry = entry?;
                if entry.resource.kind != ResourceKind::File {
                    continue;
                }
                match entry.state {
                    SyncState::Unmanaged | SyncState::Added => {
                        new_files.insert(entry.resource);
                    }
                    SyncState::Modified | SyncState::Deleted => {
                        changed.insert(entry.resource);
                    }
                    SyncState::Clean | SyncState::Ignored => {}
                }
            }
        }
        Ok((new_files.into_iter().collect(), changed.into_iter().collect()))
    }

    fn add_new_file(&mut self, context: &OperationContext, root: &ResourcePath, file: &Resource) -> Result<()> {
        if context.workspace.is_binary(&file.path) {
            tracing::debug!("Skipping binary file {}", file);
            return Ok(());
        }
        let contents = context.workspace.contents(&file.path)?;
        let text = String::from_utf8_lossy(&contents);
        let relative = file
            .path
            .relative_to(root)
            .unwrap_or_else(|| file.path.as_str().to_string());
        if let Some(diff) = new_file_diff(&relative, &text, self.format) {
            self.patch.add(PatchEntry {
                path: file.path.clone(),
                text: diff,
                new_file: true,
            });
        }
        Ok(())
    }
}

impl PassExecutor for DiffExecutor {
    fn name(&self) -> &str {
        "Diff"
    }

    fn is_server_modification(&self) -> bool {
        false
    }

    fn execute_pass(
        &mut self,
        context: &OperationContext,
        provider: &Arc<RepositoryProvider>,
        pass: &Pass,
        progress: &mut Progress,
    ) -> Result<StatusRef> {
        let (new_files, changed) = Self::classify(context, pass, progress)?;
        let root = provider.project().clone();
        let chunks: Vec<&[Resource]> = changed.chunks(self.max_arguments).collect();
        progress.begin("Diff", chunks.len() as u32 + 1);

        let mut status = Status::ok();
        if !chunks.is_empty() {
            let collector = DiffCollector::new(context.output());
            let local = self.local_options(pass.recurse());
            let output = with_session(
                provider.location(),
                root.clone(),
                provider.remote_root(),
                false,
                progress,
                |session, progress| {
                    let mut merged = Status::ok();
                    let mut output = String::new();
                    for chunk in &chunks {
                        let invocation = CommandInvocation::new(
                            CommandKind::Diff,
                            local.clone(),
                            arguments_for(chunk, &root),
                        );
                        let mut sub = progress.split(1);
                        let status = session.execute(&invocation, &collector, &mut sub)?;
                        merged = Status::merge(&merged, &fail_on_server_error(status)?);
                        output.push_str(&collector.take());
                    }
                    Ok((merged, output))
                },
            )?;
            status = output.0;
            for (path, text) in split_sections(&output.1) {
                self.patch.add(PatchEntry {
                    path: root.join(&path),
                    text,
                    new_file: false,
                });
            }
        }

        if self.include_new_files {
            for file in &new_files {
                progress.check_canceled()?;
                self.add_new_file(context, &root, file)?;
            }
        }
        progress.done();
        Ok(status)
    }
}

impl ProviderOperation<DiffExecutor> {
    pub fn patch(&self) -> &Patch {
        self.executor().patch()
    }
}

/// Diff the selection against the repository
pub fn diff(
    context: OperationContext,
    mappings: Vec<ResourceMapping>,
    options: DiffOptions,
) -> ProviderOperation<DiffExecutor> {
    let format = options.format.unwrap_or(context.config.diff_format);
    let executor = DiffExecutor::new(format, options.include_new_files, context.config.max_diff_arguments);
    ProviderOperation::new(context, mappings, executor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sections() {
        let text = "Index: a.txt\n====\n-x\n+y\nIndex: b/c.txt\n====\n+z\n";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "a.txt");
        assert_eq!(sections[0].1, "Index: a.txt\n====\n-x\n+y\n");
        assert_eq!(sections[1].0, "b/c.txt");
    }

    #[test]
    fn test_leading_noise_is_dropped() {
        assert!(split_sections("cvs diff: Diffing .\n").is_empty());
    }

    #[test]
    fn test_local_options_per_format() {
        let unified = DiffExecutor::new(DiffFormat::Unified, true, 10);
        assert_eq!(unified.local_options(true).to_strings(), vec!["-u", "-N"]);
        let standard = DiffExecutor::new(DiffFormat::Standard, false, 10);
        assert_eq!(standard.local_options(false).to_strings(), vec!["-l"]);
    }
}
