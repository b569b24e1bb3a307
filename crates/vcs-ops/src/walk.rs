//! Depth-limited resource walking with an explicit work stack.

use std::sync::Arc;

use crate::context::CancelFlag;
use crate::error::Result;
use crate::resource::{Depth, Resource, SyncState};
use crate::workspace::Workspace;

/// A visited resource together with its sync state at visit time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub resource: Resource,
    pub state: SyncState,
}

/// Pre-order walk of a resource tree, children in path order.
///
/// Cancellation is checked at every pop; once canceled the walker yields a
/// single `Err(Canceled)` and then ends.
pub struct ResourceWalker {
    workspace: Arc<dyn Workspace>,
    stack: Vec<(Resource, Depth)>,
    cancel: CancelFlag,
    skip_ignored: bool,
    finished: bool,
}

impl ResourceWalker {
    pub fn new(workspace: Arc<dyn Workspace>, root: Resource, depth: Depth, cancel: CancelFlag) -> Self {
        Self {
            workspace,
            stack: vec![(root, depth)],
            cancel,
            skip_ignored: false,
            finished: false,
        }
    }

    /// Do not yield ignored resources nor descend into ignored folders
    pub fn skip_ignored(mut self) -> Self {
        self.skip_ignored = true;
        self
    }

    fn push_children(&mut self, resource: &Resource, depth: Depth) -> Result<()> {
        let Some(child_depth) = depth.for_children() else {
            return Ok(());
        };
        if !resource.kind.is_container() {
            return Ok(());
        }
        let members = self.workspace.members(&resource.path)?;
        for member in members.into_iter().rev() {
            self.stack.push((member, child_depth));
        }
        Ok(())
    }
}

impl Iterator for ResourceWalker {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Err(e) = self.cancel.check() {
                self.finished = true;
                return Some(Err(e));
            }
            let (resource, depth) = self.stack.pop()?;
            let state = self.workspace.sync_state(&resource.path);
            if self.skip_ignored && state == SyncState::Ignored {
                continue;
            }
            if let Err(e) = self.push_children(&resource, depth) {
                self.finished = true;
                return Some(Err(e));
            }
            return Some(Ok(WalkEntry { resource, state }));
        }
    }
}
