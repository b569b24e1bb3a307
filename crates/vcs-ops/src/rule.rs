//! Scheduling rules: which part of the workspace an operation locks.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::context::CancelFlag;
use crate::error::{Result, VcsError};
use crate::provider::RepositoryProvider;
use crate::resource::ResourcePath;

/// A lock over part of the workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingRule {
    /// Everything
    Workspace,
    Project(ResourcePath),
    /// Union of project locks
    Multi(Vec<SchedulingRule>),
}

impl SchedulingRule {
    /// Union of rules. Any workspace rule absorbs the rest.
    pub fn combine(rules: impl IntoIterator<Item = SchedulingRule>) -> Option<SchedulingRule> {
        let mut projects = BTreeSet::new();
        for rule in rules {
            match rule {
                SchedulingRule::Workspace => return Some(SchedulingRule::Workspace),
                SchedulingRule::Project(path) => {
                    projects.insert(path);
                }
                SchedulingRule::Multi(children) => {
                    match SchedulingRule::combine(children) {
                        Some(SchedulingRule::Workspace) => return Some(SchedulingRule::Workspace),
                        Some(combined) => projects.extend(combined.projects()),
                        None => {}
                    }
                }
            }
        }
        let mut projects: Vec<_> = projects.into_iter().map(SchedulingRule::Project).collect();
        match projects.len() {
            0 => None,
            1 => projects.pop(),
            _ => Some(SchedulingRule::Multi(projects)),
        }
    }

    fn projects(&self) -> Vec<ResourcePath> {
        match self {
            SchedulingRule::Workspace => Vec::new(),
            SchedulingRule::Project(path) => vec![path.clone()],
            SchedulingRule::Multi(children) => children.iter().flat_map(|c| c.projects()).collect(),
        }
    }

    /// Whether holding `self` is enough to run under `other`
    pub fn contains(&self, other: &SchedulingRule) -> bool {
        match (self, other) {
            (SchedulingRule::Workspace, _) => true,
            (_, SchedulingRule::Workspace) => false,
            (_, SchedulingRule::Multi(children)) => children.iter().all(|c| self.contains(c)),
            (SchedulingRule::Project(a), SchedulingRule::Project(b)) => a == b,
            (SchedulingRule::Multi(children), project) => children.iter().any(|c| c.contains(project)),
        }
    }

    /// Whether two rules may not be held by different threads at once
    pub fn conflicts_with(&self, other: &SchedulingRule) -> bool {
        match (self, other) {
            (SchedulingRule::Workspace, _) | (_, SchedulingRule::Workspace) => true,
            (SchedulingRule::Multi(children), _) => children.iter().any(|c| c.conflicts_with(other)),
            (_, SchedulingRule::Multi(children)) => children.iter().any(|c| self.conflicts_with(c)),
            (SchedulingRule::Project(a), SchedulingRule::Project(b)) => a == b,
        }
    }
}

impl fmt::Display for SchedulingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingRule::Workspace => write!(f, "workspace"),
            SchedulingRule::Project(path) => write!(f, "{}", path),
            SchedulingRule::Multi(children) => {
                let parts: Vec<_> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Computes the lock an operation needs for a set of providers
pub struct RuleCalculator;

impl RuleCalculator {
    /// Each provider's modification rule, combined.
    ///
    /// A provider that can only be locked at the workspace level forces the
    /// workspace rule for the whole set.
    pub fn rule_for(providers: &[Arc<RepositoryProvider>]) -> Option<SchedulingRule> {
        SchedulingRule::combine(providers.iter().map(|p| p.modification_rule()))
    }
}

#[derive(Debug)]
struct HeldRule {
    id: u64,
    owner: ThreadId,
    rule: SchedulingRule,
}

#[derive(Debug, Default)]
struct LockState {
    next_id: u64,
    held: Vec<HeldRule>,
}

#[derive(Debug, Default)]
struct LockTableInner {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Arbitrates scheduling rules between threads.
///
/// A rule conflicting with one held by another thread blocks until it is
/// released. The same thread may nest acquisitions freely.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    inner: Arc<LockTableInner>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, LockState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| VcsError::invariant("lock table poisoned"))
    }

    /// Block until `rule` can be held, re-checking `cancel` every `poll`
    pub fn acquire(&self, rule: SchedulingRule, cancel: &CancelFlag, poll: Duration) -> Result<RuleGuard> {
        let me = thread::current().id();
        let mut state = self.lock_state()?;
        loop {
            cancel.check()?;
            let blocked = state
                .held
                .iter()
                .any(|h| h.owner != me && h.rule.conflicts_with(&rule));
            if !blocked {
                break;
            }
            tracing::debug!("Waiting for lock {}", rule);
            let (next, _) = self
                .inner
                .released
                .wait_timeout(state, poll)
                .map_err(|_| VcsError::invariant("lock table poisoned"))?;
            state = next;
        }
        let id = state.next_id;
        state.next_id += 1;
        tracing::trace!("Acquired lock {} ({})", rule, id);
        state.held.push(HeldRule { id, owner: me, rule });
        Ok(RuleGuard {
            table: self.clone(),
            id,
        })
    }

    /// Rules currently held, in acquisition order
    pub fn held(&self) -> Vec<SchedulingRule> {
        self.lock_state()
            .map(|state| state.held.iter().map(|h| h.rule.clone()).collect())
            .unwrap_or_default()
    }

    fn release(&self, id: u64) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.held.retain(|h| h.id != id);
        }
        self.inner.released.notify_all();
    }
}

/// Releases its rule when dropped
#[derive(Debug)]
pub struct RuleGuard {
    table: LockTable,
    id: u64,
}

impl Drop for RuleGuard {
    fn drop(&mut self) {
        self.table.release(self.id);
    }
}
