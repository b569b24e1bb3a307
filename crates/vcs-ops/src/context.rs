//! Per-operation context: cancellation, weighted progress and the injected
//! collaborators every pipeline stage needs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Result, VcsError};
use crate::rule::LockTable;
use crate::scope::ModelProvider;
use crate::session::{OutputListener, SilentConsole, TracingConsole};
use crate::tag::TagNotifier;
use crate::workspace::Workspace;

/// Cooperative cancellation flag shared between a caller and an operation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(VcsError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Receives progress updates
pub trait ProgressSink: Send + Sync {
    fn task(&self, name: &str);
    /// Overall completion in `0.0..=1.0`
    fn fraction(&self, done: f64);
}

/// Hierarchical progress allocator.
///
/// A parent budget is divided into weighted children with [`Progress::split`],
/// so reported completion stays proportional however many providers or
/// passes an operation ends up running.
#[derive(Clone)]
pub struct Progress {
    sink: Option<Arc<dyn ProgressSink>>,
    cancel: CancelFlag,
    start: f64,
    span: f64,
    total: u32,
    worked: u32,
}

impl Progress {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            sink: None,
            cancel,
            start: 0.0,
            span: 1.0,
            total: 0,
            worked: 0,
        }
    }

    /// Progress that is never canceled and reports nowhere
    pub fn none() -> Self {
        Self::new(CancelFlag::new())
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Name the task and set the number of work units this level is split into
    pub fn begin(&mut self, name: &str, total: u32) {
        self.total = total;
        self.worked = 0;
        if let Some(sink) = &self.sink {
            sink.task(name);
        }
    }

    /// Carve out a child covering `work` units of this level
    pub fn split(&mut self, work: u32) -> Progress {
        let work = work.min(self.total.saturating_sub(self.worked));
        let unit = if self.total == 0 {
            0.0
        } else {
            self.span / self.total as f64
        };
        let child = Progress {
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
            start: self.current(),
            span: unit * work as f64,
            total: 0,
            worked: 0,
        };
        self.worked += work;
        child
    }

    pub fn worked(&mut self, work: u32) {
        self.worked = (self.worked + work).min(self.total);
        self.report();
    }

    pub fn done(&mut self) {
        self.worked = self.total;
        if let Some(sink) = &self.sink {
            sink.fraction(self.start + self.span);
        }
    }

    /// Completion of this level mapped onto the whole operation
    pub fn current(&self) -> f64 {
        if self.total == 0 {
            return self.start;
        }
        self.start + self.span * (self.worked as f64 / self.total as f64)
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    pub fn check_canceled(&self) -> Result<()> {
        self.cancel.check()
    }

    fn report(&self) {
        if let Some(sink) = &self.sink {
            sink.fraction(self.current());
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("start", &self.start)
            .field("span", &self.span)
            .field("total", &self.total)
            .field("worked", &self.worked)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Collaborators threaded through scope building, mapping and execution
#[derive(Clone)]
pub struct OperationContext {
    pub workspace: Arc<dyn Workspace>,
    pub locks: LockTable,
    pub console: Arc<dyn OutputListener>,
    pub config: EngineConfig,
    pub models: Vec<Arc<dyn ModelProvider>>,
    pub tags: TagNotifier,
}

impl OperationContext {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self {
            workspace,
            locks: LockTable::new(),
            console: Arc::new(TracingConsole),
            config: EngineConfig::default(),
            models: Vec::new(),
            tags: TagNotifier::new(),
        }
    }

    pub fn with_locks(mut self, locks: LockTable) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_console(mut self, console: Arc<dyn OutputListener>) -> Self {
        self.console = console;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelProvider>) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_tag_notifier(mut self, tags: TagNotifier) -> Self {
        self.tags = tags;
        self
    }

    /// Listener for server output, honoring `output_to_console`
    pub fn output(&self) -> &dyn OutputListener {
        if self.config.output_to_console {
            self.console.as_ref()
        } else {
            &SilentConsole
        }
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("config", &self.config)
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<f64>>);

    impl ProgressSink for Recorder {
        fn task(&self, _name: &str) {}
        fn fraction(&self, done: f64) {
            self.0.lock().unwrap().push(done);
        }
    }

    #[test]
    fn test_split_is_proportional() {
        let sink = Arc::new(Recorder::default());
        let mut root = Progress::none().with_sink(sink.clone());
        root.begin("op", 100);
        let _scope = root.split(10);
        let mut providers = root.split(90);
        providers.begin("providers", 3);
        let mut first = providers.split(1);
        first.begin("p1", 2);
        first.worked(2);
        let last = *sink.0.lock().unwrap().last().unwrap();
        assert!((last - 0.4).abs() < 1e-9, "got {}", last);
    }

    #[test]
    fn test_split_never_exceeds_budget() {
        let mut root = Progress::none();
        root.begin("op", 2);
        let _a = root.split(5);
        let b = root.split(1);
        assert_eq!(b.span, 0.0);
        assert!((root.current() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_is_shared() {
        let flag = CancelFlag::new();
        let mut progress = Progress::new(flag.clone());
        progress.begin("op", 2);
        let child = progress.split(1);
        assert!(child.check_canceled().is_ok());
        flag.cancel();
        assert!(matches!(child.check_canceled(), Err(VcsError::Canceled)));
    }
}
