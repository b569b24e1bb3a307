//! In-process repository for tests and demos.
//!
//! [`MemoryRepository`] keeps server state (file revisions, tags, module
//! aliases) in memory and applies command results to a shared
//! [`Workspace`] the way a real client applies server responses. Session
//! counters, an invocation log and fault injection make the engine's
//! session and aggregation guarantees observable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use similar::TextDiff;

use crate::context::{CancelFlag, Progress};
use crate::error::{Result, VcsError};
use crate::options::{LocalOption, LocalOptions};
use crate::provider::RepositoryProvider;
use crate::resource::{ResourceKind, ResourcePath, SyncState};
use crate::session::{CommandInvocation, CommandKind, OutputListener, RepositoryLocation, Session};
use crate::status::{Severity, Status, StatusCode, StatusRef};
use crate::tag::{Tag, TagKind};
use crate::workspace::Workspace;

const REPOSITORY_ROOT: &str = "/cvsroot";

/// Failure injected into sessions
#[derive(Debug, Clone)]
pub enum Fault {
    /// Opening a session rooted in `project` (any project when `None`) fails
    RefuseConnection { project: Option<ResourcePath> },
    /// `command` returns a server-error status
    ServerError {
        command: CommandKind,
        project: Option<ResourcePath>,
    },
    /// `command` fails with a protocol error
    ProtocolFailure {
        command: CommandKind,
        project: Option<ResourcePath>,
    },
    /// `command` raises the flag and reports cancellation
    Cancel { command: CommandKind, cancel: CancelFlag },
}

impl Fault {
    fn matches_project(filter: &Option<ResourcePath>, project: Option<&ResourcePath>) -> bool {
        match filter {
            None => true,
            Some(wanted) => project == Some(wanted),
        }
    }
}

/// One command as the server received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedInvocation {
    pub kind: CommandKind,
    pub local_root: ResourcePath,
    pub local: LocalOptions,
    pub operands: Vec<String>,
    pub arguments: Vec<String>,
    pub for_modification: bool,
}

impl RecordedInvocation {
    /// Command line as the console would have shown it
    pub fn command_line(&self) -> String {
        CommandInvocation::new(self.kind, self.local.clone(), self.arguments.clone())
            .with_operands(self.operands.clone())
            .command_line(&self.local_root)
    }
}

#[derive(Debug, Default)]
struct RemoteFile {
    revisions: Vec<Vec<u8>>,
    dead: bool,
}

impl RemoteFile {
    fn head(&self) -> usize {
        self.revisions.len()
    }
}

#[derive(Debug)]
struct RemoteTag {
    kind: TagKind,
    /// Remote path to revision number (1-based)
    revisions: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct ServerState {
    files: BTreeMap<String, RemoteFile>,
    folders: BTreeSet<String>,
    tags: BTreeMap<String, RemoteTag>,
    aliases: BTreeMap<String, Vec<String>>,
    opened: usize,
    closed: usize,
    faults: Vec<Fault>,
    invocations: Vec<RecordedInvocation>,
}

impl ServerState {
    fn ensure_folders(&mut self, remote: &str) {
        let mut prefix = String::new();
        let segments: Vec<_> = remote.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            self.folders.insert(prefix.clone());
        }
    }

    fn commit_revision(&mut self, remote: &str, contents: Vec<u8>) -> usize {
        self.ensure_folders(remote);
        let file = self.files.entry(remote.to_string()).or_default();
        file.revisions.push(contents);
        file.dead = false;
        file.head()
    }

    /// Live files at or below `remote`, direct children only unless `recurse`
    fn files_under(&self, remote: &str, recurse: bool) -> Vec<String> {
        if let Some(file) = self.files.get(remote) {
            return if file.dead { Vec::new() } else { vec![remote.to_string()] };
        }
        let prefix = if remote.is_empty() {
            String::new()
        } else {
            format!("{}/", remote)
        };
        self.files
            .iter()
            .filter(|(path, file)| {
                !file.dead
                    && path.starts_with(&prefix)
                    && (recurse || !path[prefix.len()..].contains('/'))
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn module_exists(&self, module: &str) -> bool {
        self.folders.contains(module) || !self.files_under(module, true).is_empty()
    }
}

struct RepositoryInner {
    name: String,
    workspace: Arc<dyn Workspace>,
    state: Mutex<ServerState>,
}

/// Shared handle to an in-memory repository
#[derive(Clone)]
pub struct MemoryRepository {
    inner: Arc<RepositoryInner>,
}

impl MemoryRepository {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self::named("memory", workspace)
    }

    pub fn named(name: impl Into<String>, workspace: Arc<dyn Workspace>) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                name: name.into(),
                workspace,
                state: Mutex::new(ServerState::default()),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, ServerState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| VcsError::invariant("repository state poisoned"))
    }

    pub fn location(&self) -> Arc<dyn RepositoryLocation> {
        Arc::new(MemoryLocation { repo: self.clone() })
    }

    /// Provider for `project` checked out from the module of the same name
    pub fn provider(&self, project: &str) -> RepositoryProvider {
        RepositoryProvider::new(ResourcePath::new(project), self.location(), project)
    }

    /// Bind a provider for `project` in the workspace
    pub fn share(&self, project: &str) -> Result<Arc<RepositoryProvider>> {
        let provider = Arc::new(self.provider(project));
        self.inner.workspace.bind_provider(Arc::clone(&provider))?;
        Ok(provider)
    }

    /// Check a new revision of a file into the repository
    pub fn add_remote_file(&self, path: &str, contents: &str) -> Result<()> {
        self.state()?
            .commit_revision(ResourcePath::new(path).as_str(), contents.as_bytes().to_vec());
        Ok(())
    }

    pub fn add_remote_folder(&self, path: &str) -> Result<()> {
        let path = ResourcePath::new(path);
        let mut state = self.state()?;
        state.ensure_folders(&format!("{}/x", path.as_str()));
        Ok(())
    }

    /// Make `alias` expand to `modules`
    pub fn add_module_alias(&self, alias: &str, modules: &[&str]) -> Result<()> {
        self.state()?
            .aliases
            .insert(alias.to_string(), modules.iter().map(|m| m.to_string()).collect());
        Ok(())
    }

    pub fn inject(&self, fault: Fault) {
        if let Ok(mut state) = self.state() {
            state.faults.push(fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.state() {
            state.faults.clear();
        }
    }

    /// Latest live contents of a remote file
    pub fn head(&self, path: &str) -> Option<String> {
        let state = self.state().ok()?;
        let file = state.files.get(ResourcePath::new(path).as_str())?;
        if file.dead {
            return None;
        }
        file.revisions
            .last()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Revision string of a remote file's head, e.g. `1.2`
    pub fn revision(&self, path: &str) -> Option<String> {
        let state = self.state().ok()?;
        state
            .files
            .get(ResourcePath::new(path).as_str())
            .map(|f| format!("1.{}", f.head()))
    }

    pub fn is_dead(&self, path: &str) -> bool {
        self.state()
            .ok()
            .and_then(|s| s.files.get(ResourcePath::new(path).as_str()).map(|f| f.dead))
            .unwrap_or(false)
    }

    /// Remote paths carrying `tag`, sorted
    pub fn tagged_files(&self, tag: &str) -> Vec<String> {
        self.state()
            .ok()
            .and_then(|s| s.tags.get(tag).map(|t| t.revisions.keys().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn tag_kind(&self, tag: &str) -> Option<TagKind> {
        self.state().ok()?.tags.get(tag).map(|t| t.kind)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().map(|s| s.opened).unwrap_or(0)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state().map(|s| s.closed).unwrap_or(0)
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.state().map(|s| s.invocations.clone()).unwrap_or_default()
    }
}

impl fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// [`RepositoryLocation`] for a [`MemoryRepository`]
pub struct MemoryLocation {
    repo: MemoryRepository,
}

impl RepositoryLocation for MemoryLocation {
    fn location(&self) -> String {
        format!(":memory:{}:{}", self.repo.inner.name, REPOSITORY_ROOT)
    }

    fn create_session(&self, local_root: ResourcePath, remote_root: &str) -> Box<dyn Session> {
        Box::new(MemorySession {
            repo: self.repo.clone(),
            local_root,
            remote_root: remote_root.to_string(),
            open: false,
            for_modification: false,
            expansions: Vec::new(),
        })
    }
}

/// Session against a [`MemoryRepository`]
pub struct MemorySession {
    repo: MemoryRepository,
    local_root: ResourcePath,
    remote_root: String,
    open: bool,
    for_modification: bool,
    expansions: Vec<String>,
}

/// Tokens of the parsed local options a command cares about
struct Flags<'a> {
    local: &'a LocalOptions,
}

impl<'a> Flags<'a> {
    fn has(&self, option: &str) -> bool {
        self.local.contains(option)
    }

    fn argument(&self, option: &str) -> Option<&'a str> {
        self.local.find(option).and_then(|o| o.argument())
    }

    fn recurse(&self) -> bool {
        !self.has(LocalOption::DO_NOT_RECURSE)
    }
}

impl MemorySession {
    fn workspace(&self) -> &dyn Workspace {
        self.repo.inner.workspace.as_ref()
    }

    fn local_path(&self, argument: &str) -> ResourcePath {
        if argument == "." {
            self.local_root.clone()
        } else {
            self.local_root.join(argument)
        }
    }

    fn remote_path(&self, local: &ResourcePath) -> String {
        let relative = local.relative_to(&self.local_root).unwrap_or_default();
        let relative = if relative == "." { String::new() } else { relative };
        match (self.remote_root.is_empty(), relative.is_empty()) {
            (true, _) => relative,
            (false, true) => self.remote_root.clone(),
            (false, false) => format!("{}/{}", self.remote_root, relative),
        }
    }

    fn local_for_remote(&self, remote: &str) -> ResourcePath {
        if self.remote_root.is_empty() {
            return self.local_root.join(remote);
        }
        let relative = remote
            .strip_prefix(&self.remote_root)
            .unwrap_or(remote)
            .trim_start_matches('/');
        self.local_root.join(relative)
    }

    fn display(&self, local: &ResourcePath) -> String {
        local
            .relative_to(&self.local_root)
            .unwrap_or_else(|| local.as_str().to_string())
    }

    /// Local files at or below `path` including deleted phantoms
    fn local_files(&self, path: &ResourcePath, recurse: bool) -> Result<Vec<ResourcePath>> {
        let workspace = self.workspace();
        match workspace.kind(path) {
            None => Ok(Vec::new()),
            Some(ResourceKind::File) => Ok(vec![path.clone()]),
            Some(_) => {
                let mut files = Vec::new();
                let mut stack = vec![path.clone()];
                while let Some(folder) = stack.pop() {
                    for member in workspace.members(&folder)? {
                        if member.kind.is_container() {
                            if recurse {
                                stack.push(member.path);
                            }
                        } else {
                            files.push(member.path);
                        }
                    }
                }
                files.sort();
                Ok(files)
            }
        }
    }

    fn check_faults(&self, kind: CommandKind, state: &ServerState) -> Result<Option<StatusRef>> {
        let project = self.local_root.project();
        for fault in &state.faults {
            match fault {
                Fault::ServerError { command, project: filter }
                    if *command == kind && Fault::matches_project(filter, project.as_ref()) =>
                {
                    return Ok(Some(Status::server_error(format!(
                        "cvs [{} aborted]: server rejected the request",
                        kind.request_id()
                    ))));
                }
                Fault::ProtocolFailure { command, project: filter }
                    if *command == kind && Fault::matches_project(filter, project.as_ref()) =>
                {
                    return Err(VcsError::Protocol(format!(
                        "connection closed during {}",
                        kind.request_id()
                    )));
                }
                Fault::Cancel { command, cancel } if *command == kind => {
                    cancel.cancel();
                    return Err(VcsError::Canceled);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn add(&self, state: &mut ServerState, arguments: &[String], listener: &dyn OutputListener) -> Result<StatusRef> {
        let workspace = self.workspace();
        let mut result = Status::ok();
        for argument in arguments {
            let local = self.local_path(argument);
            let remote = self.remote_path(&local);
            match workspace.kind(&local) {
                Some(ResourceKind::File) => {
                    workspace.set_sync_state(&local, SyncState::Added)?;
                    listener.error_line(
                        &format!("cvs add: scheduling file `{}' for addition", self.display(&local)),
                        &self.local_root,
                    );
                }
                Some(_) => {
                    state.folders.insert(remote.clone());
                    workspace.set_sync_state(&local, SyncState::Clean)?;
                    listener.message_line(
                        &format!("Directory {}/{} added to the repository", REPOSITORY_ROOT, remote),
                        &self.local_root,
                    );
                }
                None => {
                    let warning = Status::for_resource(
                        Severity::Warning,
                        StatusCode::INVALID_LOCAL_RESOURCE_PATH,
                        local.clone(),
                        "nothing known about this resource",
                    );
                    listener.error_line(&format!("cvs add: nothing known about {}", argument), &self.local_root);
                    result = Status::merge(&result, &warning);
                }
            }
        }
        Ok(result)
    }

    fn commit(
        &self,
        state: &mut ServerState,
        arguments: &[String],
        flags: &Flags<'_>,
        listener: &dyn OutputListener,
    ) -> Result<StatusRef> {
        let workspace = self.workspace();
        let force = flags.has("-f");
        for argument in arguments {
            for file in self.local_files(&self.local_path(argument), flags.recurse())? {
                let remote = self.remote_path(&file);
                let sync = workspace.sync_state(&file);
                match sync {
                    SyncState::Modified | SyncState::Added => {}
                    SyncState::Clean if force => {}
                    SyncState::Deleted => {
                        if let Some(remote_file) = state.files.get_mut(&remote) {
                            remote_file.dead = true;
                        }
                        workspace.delete(&file)?;
                        listener.message_line(
                            &format!("Removing {};", self.display(&file)),
                            &self.local_root,
                        );
                        continue;
                    }
                    _ => continue,
                }
                let contents = workspace.contents(&file)?;
                let revision = state.commit_revision(&remote, contents);
                workspace.set_sync_state(&file, SyncState::Clean)?;
                listener.message_line(
                    &format!("{}/{},v  <--  {}", REPOSITORY_ROOT, remote, file.name()),
                    &self.local_root,
                );
                if revision == 1 {
                    listener.message_line("initial revision: 1.1", &self.local_root);
                } else {
                    listener.message_line(
                        &format!("new revision: 1.{}; previous revision: 1.{}", revision, revision - 1),
                        &self.local_root,
                    );
                }
            }
        }
        Ok(Status::ok())
    }

    /// Revision of `remote` to fetch, following an explicit or sticky tag
    fn selected_revision(state: &ServerState, remote: &str, tag: Option<&str>) -> Option<usize> {
        let file = state.files.get(remote)?;
        match tag {
            Some(name) => match state.tags.get(name) {
                Some(t) if t.kind == TagKind::Branch => t.revisions.get(remote).map(|_| file.head()),
                Some(t) => t.revisions.get(remote).copied(),
                None => None,
            },
            None if file.dead => None,
            None => Some(file.head()),
        }
    }

    fn update(
        &self,
        state: &mut ServerState,
        arguments: &[String],
        flags: &Flags<'_>,
        replace: bool,
        listener: &dyn OutputListener,
    ) -> Result<StatusRef> {
        let workspace = self.workspace();
        let explicit_tag = flags.argument(LocalOption::TAG_REVISION);
        if let Some(name) = explicit_tag {
            if !state.tags.contains_key(name) {
                listener.error_line(&format!("cvs update: tag {} is not in the repository", name), &self.local_root);
                return Ok(Status::error(
                    StatusCode::NO_SUCH_TAG,
                    format!("tag {} is not in the repository", name),
                ));
            }
        }
        let clear_sticky = flags.has(LocalOption::CLEAR_STICKY);
        let build_directories = flags.has(LocalOption::BUILD_DIRECTORIES);
        let recurse = flags.recurse();

        let mut candidates = BTreeSet::new();
        for argument in arguments {
            let local = self.local_path(argument);
            for remote in state.files_under(&self.remote_path(&local), recurse) {
                candidates.insert(self.local_for_remote(&remote));
            }
            candidates.extend(self.local_files(&local, recurse)?);
        }

        for file in candidates {
            let remote = self.remote_path(&file);
            let sync = workspace.sync_state(&file);
            let sticky = if clear_sticky {
                None
            } else {
                explicit_tag
                    .map(|name| name.to_string())
                    .or_else(|| workspace.sticky_tag(&file).map(|t| t.name().to_string()))
            };
            let display = self.display(&file);
            let Some(revision) = Self::selected_revision(state, &remote, sticky.as_deref()) else {
                if sync == SyncState::Clean || (replace && sync.is_managed() && sync != SyncState::Added) {
                    workspace.delete(&file)?;
                    listener.error_line(
                        &format!("cvs update: `{}' is no longer in the repository", display),
                        &self.local_root,
                    );
                }
                continue;
            };
            if sync == SyncState::Added || sync == SyncState::Ignored {
                continue;
            }
            if sync == SyncState::Deleted && !replace {
                continue;
            }
            if sync == SyncState::Modified && !replace {
                listener.message_line(&format!("M {}", display), &self.local_root);
                continue;
            }
            let parent_exists = file.parent().map(|p| workspace.exists(&p)).unwrap_or(false);
            if !parent_exists && !build_directories {
                continue;
            }
            let contents = state
                .files
                .get(&remote)
                .and_then(|f| f.revisions.get(revision - 1))
                .cloned()
                .unwrap_or_default();
            let unchanged = sync == SyncState::Clean
                && workspace.contents(&file).map(|c| c == contents).unwrap_or(false);
            workspace.write_file(&file, &contents, SyncState::Clean)?;
            let sticky_tag = sticky.as_deref().and_then(|name| {
                state.tags.get(name).map(|t| match t.kind {
                    TagKind::Branch => Tag::branch(name),
                    _ => Tag::version(name),
                })
            });
            workspace.set_sticky_tag(&file, sticky_tag)?;
            if !unchanged {
                listener.message_line(&format!("U {}", display), &self.local_root);
            }
        }
        Ok(Status::ok())
    }

    fn tag(
        &self,
        state: &mut ServerState,
        operands: &[String],
        arguments: &[String],
        flags: &Flags<'_>,
        listener: &dyn OutputListener,
    ) -> Result<StatusRef> {
        let workspace = self.workspace();
        let Some(name) = operands.first().map(String::as_str) else {
            return Err(VcsError::Protocol("tag request without a tag name".into()));
        };
        let mut targets = Vec::new();
        for argument in arguments {
            for file in self.local_files(&self.local_path(argument), flags.recurse())? {
                let sync = workspace.sync_state(&file);
                if matches!(sync, SyncState::Clean | SyncState::Modified) {
                    targets.push(self.remote_path(&file));
                }
            }
        }

        if flags.has(LocalOption::DELETE_TAG) {
            let Some(existing) = state.tags.get_mut(name) else {
                return Ok(Status::warning(
                    StatusCode::NO_SUCH_TAG,
                    format!("tag {} is not in the repository", name),
                ));
            };
            for remote in &targets {
                if existing.revisions.remove(remote).is_some() {
                    listener.message_line(&format!("D {}", remote), &self.local_root);
                }
            }
            if existing.revisions.is_empty() {
                state.tags.remove(name);
            }
            return Ok(Status::ok());
        }

        let force = flags.has(LocalOption::FORCE_REASSIGNMENT);
        let kind = if flags.has(LocalOption::BRANCH_TAG) {
            TagKind::Branch
        } else {
            TagKind::Version
        };
        if !force {
            if let Some(existing) = state.tags.get(name) {
                if let Some(remote) = targets.iter().find(|r| existing.revisions.contains_key(*r)) {
                    listener.error_line(
                        &format!("W {} : {} already exists : NOT MOVING tag", remote, name),
                        &self.local_root,
                    );
                    return Ok(Status::error(
                        StatusCode::TAG_ALREADY_EXISTS,
                        format!("tag {} already exists", name),
                    ));
                }
            }
        }
        let heads: Vec<(String, usize)> = targets
            .into_iter()
            .filter_map(|remote| state.files.get(&remote).map(|f| (remote, f.head())))
            .collect();
        let tag = state.tags.entry(name.to_string()).or_insert_with(|| RemoteTag {
            kind,
            revisions: BTreeMap::new(),
        });
        tag.kind = kind;
        for (remote, head) in heads {
            listener.message_line(&format!("T {}", remote), &self.local_root);
            tag.revisions.insert(remote, head);
        }
        Ok(Status::ok())
    }

    fn diff(
        &self,
        state: &ServerState,
        arguments: &[String],
        flags: &Flags<'_>,
        listener: &dyn OutputListener,
    ) -> Result<StatusRef> {
        let workspace = self.workspace();
        for argument in arguments {
            for file in self.local_files(&self.local_path(argument), flags.recurse())? {
                let remote = self.remote_path(&file);
                let Some(remote_file) = state.files.get(&remote) else {
                    continue;
                };
                let sticky = workspace.sticky_tag(&file).map(|t| t.name().to_string());
                let Some(revision) = Self::selected_revision(state, &remote, sticky.as_deref()) else {
                    continue;
                };
                let base = remote_file
                    .revisions
                    .get(revision - 1)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                let local = match workspace.sync_state(&file) {
                    SyncState::Deleted => String::new(),
                    _ => workspace
                        .contents(&file)
                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                        .unwrap_or_default(),
                };
                if base == local {
                    continue;
                }
                let display = self.display(&file);
                let body = TextDiff::from_lines(&base, &local)
                    .unified_diff()
                    .context_radius(3)
                    .header(&display, &display)
                    .to_string();
                listener.message_line(&format!("Index: {}", display), &self.local_root);
                listener.message_line(&"=".repeat(67), &self.local_root);
                listener.message_line(
                    &format!("RCS file: {}/{},v", REPOSITORY_ROOT, remote),
                    &self.local_root,
                );
                listener.message_line(&format!("retrieving revision 1.{}", revision), &self.local_root);
                listener.message_line(
                    &format!("diff -r1.{} {}", revision, file.name()),
                    &self.local_root,
                );
                for line in body.lines() {
                    listener.message_line(line, &self.local_root);
                }
            }
        }
        Ok(Status::ok())
    }

    fn expand_modules(&mut self, state: &ServerState, arguments: &[String]) -> Result<StatusRef> {
        let mut expansions = Vec::new();
        for module in arguments {
            match state.aliases.get(module) {
                Some(targets) => expansions.extend(targets.iter().cloned()),
                None => expansions.push(module.clone()),
            }
        }
        self.expansions = expansions;
        Ok(Status::ok())
    }

    fn checkout(
        &self,
        state: &ServerState,
        arguments: &[String],
        flags: &Flags<'_>,
        listener: &dyn OutputListener,
    ) -> Result<StatusRef> {
        let workspace = self.workspace();
        let tag = flags.argument(LocalOption::TAG_REVISION);
        for module in arguments {
            if !state.module_exists(module) {
                listener.error_line(&format!("cvs checkout: cannot find module `{}'", module), &self.local_root);
                return Ok(Status::server_error(format!("cannot find module `{}'", module)));
            }
            let target = ResourcePath::new(flags.argument(LocalOption::TARGET_DIRECTORY).unwrap_or(module.as_str()));
            let target = self.local_root.join(target.as_str());
            workspace.create_folder(&target, SyncState::Clean)?;
            let prefix = format!("{}/", module);
            for folder in state.folders.iter().filter(|f| f.starts_with(&prefix)) {
                workspace.create_folder(&target.join(&folder[prefix.len()..]), SyncState::Clean)?;
            }
            for remote in state.files_under(module, true) {
                let Some(revision) = Self::selected_revision(state, &remote, tag) else {
                    continue;
                };
                let contents = state
                    .files
                    .get(&remote)
                    .and_then(|f| f.revisions.get(revision - 1))
                    .cloned()
                    .unwrap_or_default();
                let local = target.join(&remote[prefix.len()..]);
                workspace.write_file(&local, &contents, SyncState::Clean)?;
                if let Some(name) = tag {
                    let sticky = match state.tags.get(name).map(|t| t.kind) {
                        Some(TagKind::Branch) => Tag::branch(name),
                        _ => Tag::version(name),
                    };
                    workspace.set_sticky_tag(&local, Some(sticky))?;
                }
                listener.message_line(&format!("U {}", local.as_str()), &self.local_root);
            }
        }
        Ok(Status::ok())
    }
}

impl Session for MemorySession {
    fn local_root(&self) -> &ResourcePath {
        &self.local_root
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self, for_modification: bool, progress: &mut Progress) -> Result<()> {
        if self.open {
            return Err(VcsError::Protocol("session is already open".into()));
        }
        progress.check_canceled()?;
        let mut state = self.repo.state()?;
        let project = self.local_root.project();
        let refused = state.faults.iter().any(|fault| {
            matches!(fault, Fault::RefuseConnection { project: filter }
                if Fault::matches_project(filter, project.as_ref()))
        });
        if refused {
            return Err(VcsError::connection(
                format!(":memory:{}:{}", self.repo.inner.name, REPOSITORY_ROOT),
                "connection refused",
            ));
        }
        state.opened += 1;
        self.open = true;
        self.for_modification = for_modification;
        tracing::trace!("Opened session on {}", self.local_root);
        Ok(())
    }

    fn execute(
        &mut self,
        invocation: &CommandInvocation,
        listener: &dyn OutputListener,
        progress: &mut Progress,
    ) -> Result<StatusRef> {
        if !self.open {
            return Err(VcsError::Protocol("session is not open".into()));
        }
        progress.check_canceled()?;
        let repo = self.repo.clone();
        let mut state = repo.state()?;
        state.invocations.push(RecordedInvocation {
            kind: invocation.kind,
            local_root: self.local_root.clone(),
            local: invocation.local.clone(),
            operands: invocation.operands.clone(),
            arguments: invocation.arguments.clone(),
            for_modification: self.for_modification,
        });
        if let Some(status) = self.check_faults(invocation.kind, &state)? {
            listener.error_line(status.message(), &self.local_root);
            return Ok(status);
        }

        let arguments = invocation.escaped_arguments();
        let flags = Flags {
            local: &invocation.local,
        };
        match invocation.kind {
            CommandKind::Add => self.add(&mut state, &arguments, listener),
            CommandKind::Commit => self.commit(&mut state, &arguments, &flags, listener),
            CommandKind::Update => self.update(&mut state, &arguments, &flags, false, listener),
            CommandKind::Replace => self.update(&mut state, &arguments, &flags, true, listener),
            CommandKind::Tag => self.tag(&mut state, &invocation.operands, &arguments, &flags, listener),
            CommandKind::Diff => self.diff(&state, &arguments, &flags, listener),
            CommandKind::ExpandModules => self.expand_modules(&state, &arguments),
            CommandKind::Checkout => self.checkout(&state, &arguments, &flags, listener),
        }
    }

    fn module_expansions(&self) -> Vec<String> {
        self.expansions.clone()
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.repo.state()?.closed += 1;
        tracing::trace!("Closed session on {}", self.local_root);
        Ok(())
    }
}
