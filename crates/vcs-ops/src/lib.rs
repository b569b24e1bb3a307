//! Client-side operation engine for a centralized version control system
//!
//! This crate turns a selection of workspace resources into batched,
//! recursion-aware commands sent over repository sessions, and reports the
//! combined outcome.
//!
//! # Design Goals
//!
//! - **One session per provider pass**: sessions are always closed, even on failure
//! - **Minimal commands**: selections are grouped into deep, shallow and non-traversed passes
//! - **Fine-grained locking**: operations hold project rules, not the whole workspace
//! - **Partial failure**: one failing provider never hides the others' results
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vcs_ops::backend::memory::MemoryRepository;
//! use vcs_ops::operation::{commit, CommitOptions, Operation};
//! use vcs_ops::{
//!     Depth, MemoryWorkspace, OperationContext, Progress, ResourcePath, ResourceSelector, SyncState,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = Arc::new(MemoryWorkspace::new());
//! workspace.add_file("P/readme.txt", "hello\n", SyncState::Modified)?;
//! let repo = MemoryRepository::new(workspace.clone());
//! repo.add_remote_file("P/readme.txt", "hi\n")?;
//! repo.share("P")?;
//!
//! let mappings = ResourceSelector::new(workspace.clone()).mappings(&[ResourcePath::new("P")], Depth::Infinite);
//! let options = CommitOptions {
//!     message: Some("Update readme".into()),
//!     force: false,
//! };
//! let mut op = commit(OperationContext::new(workspace), mappings, options);
//! op.execute(&mut Progress::none())?;
//! assert_eq!(repo.head("P/readme.txt").as_deref(), Some("hello\n"));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod operation;
pub mod options;
pub mod patch;
pub mod provider;
pub mod resource;
pub mod result;
pub mod rule;
pub mod scope;
pub mod selector;
pub mod session;
pub mod status;
pub mod tag;
pub mod traversal;
pub mod walk;
pub mod workspace;

pub use config::{DiffFormat, EngineConfig};
pub use context::{CancelFlag, OperationContext, Progress, ProgressSink};
pub use error::{Result, VcsError};
pub use operation::Operation;
pub use options::{GlobalOption, GlobalOptions, KSubstMode, LocalOption, LocalOptions};
pub use patch::{Patch, PatchEntry};
pub use provider::{LockScope, RepositoryProvider};
pub use resource::{
    Depth, Resource, ResourceKind, ResourceMapping, ResourcePath, ResourceTraversal, SyncState,
};
pub use result::{OperationResult, Outcome, ReportablePolicy};
pub use rule::{LockTable, RuleCalculator, RuleGuard, SchedulingRule};
pub use scope::{ModelProvider, Scope, ScopeBuilder};
pub use selector::ResourceSelector;
pub use session::{
    CommandInvocation, CommandKind, OutputListener, RepositoryLocation, Session, SilentConsole,
    TracingConsole,
};
pub use status::{Severity, Status, StatusCode, StatusRef};
pub use tag::{Tag, TagCache, TagKind, TagListener, TagNotifier, TagSource};
pub use traversal::{TraversalMap, TraversalMapEntry, TraversalMapper};
pub use workspace::{MemoryWorkspace, Workspace};
