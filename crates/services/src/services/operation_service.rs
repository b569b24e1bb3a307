//! Running engine operations off the caller's thread.
//!
//! Operations are synchronous and may block on scheduling rules or network
//! sessions, so each one runs on a tokio blocking worker. The service owns
//! the lock table and configuration shared by every context it hands out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vcs_ops::{
    CancelFlag, EngineConfig, LockTable, Operation, OperationContext, Outcome, Progress,
    ProgressSink, VcsError, Workspace,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Config(#[from] utils::UtilsError),
    #[error("Operation worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Summary of a finished operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub job_id: Uuid,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempted: usize,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl OperationReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Publishes progress fractions to a watch channel
struct WatchProgress {
    tx: watch::Sender<f64>,
}

impl ProgressSink for WatchProgress {
    fn task(&self, name: &str) {
        debug!("Progress: {}", name);
    }

    fn fraction(&self, done: f64) {
        let _ = self.tx.send(done);
    }
}

type ActiveJobs = Arc<Mutex<HashMap<Uuid, CancelFlag>>>;

enum HandleState {
    Running(JoinHandle<Result<OperationReport, VcsError>>),
    Finished(Result<OperationReport, VcsError>),
}

/// Handle to a submitted operation
pub struct OperationHandle {
    id: Uuid,
    name: String,
    cancel: CancelFlag,
    progress: watch::Receiver<f64>,
    state: HandleState,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        info!("Canceling {} ({})", self.name, self.id);
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Running(task) => task.is_finished(),
            HandleState::Finished(_) => true,
        }
    }

    /// Latest reported completion fraction, 0.0 to 1.0
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Wait for the operation and return its report
    pub async fn wait(self) -> Result<OperationReport, ServiceError> {
        let report = match self.state {
            HandleState::Running(task) => task.await??,
            HandleState::Finished(result) => result?,
        };
        Ok(report)
    }
}

/// Submits operations and tracks the ones still running
#[derive(Clone, Default)]
pub struct OperationService {
    locks: LockTable,
    config: EngineConfig,
    active: ActiveJobs,
}

impl OperationService {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            locks: LockTable::new(),
            config,
            active: ActiveJobs::default(),
        }
    }

    /// Service configured from a TOML file, or the per-user one when `None`
    pub fn from_config_file(path: Option<&Path>) -> Result<Self, ServiceError> {
        Ok(Self::new(utils::config::load_engine_config(path)?))
    }

    /// Install logging with `log_filter` as the default directives, then load
    /// the configuration. A subscriber that is already installed is kept.
    pub fn bootstrap(config_path: Option<&Path>, log_filter: &str) -> Result<Self, ServiceError> {
        if let Err(e) = utils::logging::init_tracing(log_filter) {
            debug!("Keeping existing tracing subscriber: {}", e);
        }
        let service = Self::from_config_file(config_path)?;
        info!("Operation service ready");
        Ok(service)
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// A context sharing this service's lock table and configuration
    pub fn context(&self, workspace: Arc<dyn Workspace>) -> OperationContext {
        OperationContext::new(workspace)
            .with_locks(self.locks.clone())
            .with_config(self.config.clone())
    }

    /// Jobs submitted and not yet finished
    pub fn active_jobs(&self) -> Vec<Uuid> {
        self.active
            .lock()
            .map(|jobs| jobs.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn cancel_all(&self) {
        if let Ok(jobs) = self.active.lock() {
            for (id, cancel) in jobs.iter() {
                debug!("Canceling job {}", id);
                cancel.cancel();
            }
        }
    }

    /// Run `operation` on a blocking worker, or inline when it must stay on
    /// the caller's thread.
    pub fn spawn(&self, operation: Box<dyn Operation>) -> OperationHandle {
        let id = Uuid::new_v4();
        let name = operation.name().to_string();
        let cancel = CancelFlag::new();
        let (tx, rx) = watch::channel(0.0);
        let progress = Progress::new(cancel.clone()).with_sink(Arc::new(WatchProgress { tx }));

        if let Ok(mut jobs) = self.active.lock() {
            jobs.insert(id, cancel.clone());
        }
        let background = operation.can_run_in_background();
        info!(
            "Submitting {} as job {}{}",
            name,
            id,
            if background { "" } else { " (inline)" }
        );

        let active = Arc::clone(&self.active);
        let job = move || run_job(id, operation, progress, active);
        let state = if background {
            HandleState::Running(tokio::task::spawn_blocking(job))
        } else {
            HandleState::Finished(job())
        };
        OperationHandle {
            id,
            name,
            cancel,
            progress: rx,
            state,
        }
    }
}

fn run_job(
    id: Uuid,
    mut operation: Box<dyn Operation>,
    mut progress: Progress,
    active: ActiveJobs,
) -> Result<OperationReport, VcsError> {
    let started_at = Utc::now();
    let outcome = operation.run_to_outcome(&mut progress);
    if let Ok(mut jobs) = active.lock() {
        jobs.remove(&id);
    }
    let outcome = outcome?;
    match &outcome {
        Outcome::Success => info!("Job {} ({}) succeeded", id, operation.name()),
        Outcome::PartialFailure { errors, attempted } => warn!(
            "Job {} ({}) failed: {} of {} operations",
            id,
            operation.name(),
            errors.len(),
            attempted
        ),
        Outcome::Canceled => info!("Job {} ({}) canceled", id, operation.name()),
    }
    Ok(OperationReport {
        job_id: id,
        operation: operation.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        attempted: operation.result().attempted(),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vcs_ops::backend::memory::{Fault, MemoryRepository};
    use vcs_ops::operation::{CheckoutOperation, CheckoutOptions, CommitOptions, commit};
    use vcs_ops::{
        CommandKind, Depth, MemoryWorkspace, ResourcePath, ResourceSelector, SchedulingRule,
        SilentConsole, SyncState,
    };

    use super::*;

    fn shared_project(modified: bool) -> (Arc<MemoryWorkspace>, MemoryRepository) {
        let workspace = Arc::new(MemoryWorkspace::new());
        let repo = MemoryRepository::new(workspace.clone());
        workspace.add_file("P/a.txt", "a\n", SyncState::Clean).unwrap();
        repo.add_remote_file("P/a.txt", "a\n").unwrap();
        repo.share("P").unwrap();
        if modified {
            workspace.add_file("P/a.txt", "b\n", SyncState::Modified).unwrap();
        }
        (workspace, repo)
    }

    fn commit_all(service: &OperationService, workspace: Arc<MemoryWorkspace>) -> Box<dyn Operation> {
        let mappings =
            ResourceSelector::new(workspace.clone()).mappings(&[ResourcePath::new("P")], Depth::Infinite);
        let context = service.context(workspace).with_console(Arc::new(SilentConsole));
        let options = CommitOptions {
            message: Some("from a worker".into()),
            force: false,
        };
        Box::new(commit(context, mappings, options))
    }

    #[tokio::test]
    async fn test_bootstrap_reads_config_and_tolerates_second_init() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_diff_arguments = 3\n")?;

        let first = OperationService::bootstrap(Some(&path), "warn")?;
        let second = OperationService::bootstrap(Some(&path), "warn")?;
        assert_eq!(first.config.max_diff_arguments, 3);
        assert_eq!(second.config, first.config);

        std::fs::write(&path, "lock_poll_interval_ms = 0\n")?;
        assert!(matches!(
            OperationService::bootstrap(Some(&path), "warn"),
            Err(ServiceError::Config(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_background_commit_reports_success() -> anyhow::Result<()> {
        let (workspace, repo) = shared_project(true);
        let service = OperationService::default();
        let handle = service.spawn(commit_all(&service, workspace));
        assert_eq!(handle.name(), "Commit");

        let progress = handle.progress();
        let report = handle.wait().await?;
        assert!(report.outcome.is_success());
        assert_eq!(report.attempted, 1);
        assert!(report.finished_at >= report.started_at);
        assert_eq!(*progress.borrow(), 1.0);
        assert_eq!(repo.head("P/a.txt").as_deref(), Some("b\n"));
        assert!(service.active_jobs().is_empty());

        let json: serde_json::Value = serde_json::from_str(&report.to_json()?)?;
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["operation"], "Commit");
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_not_raised() -> anyhow::Result<()> {
        let (workspace, repo) = shared_project(true);
        repo.inject(Fault::ServerError {
            command: CommandKind::Commit,
            project: None,
        });
        let service = OperationService::default();
        let report = service.spawn(commit_all(&service, workspace)).wait().await?;
        match report.outcome {
            Outcome::PartialFailure { errors, attempted } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(attempted, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_a_rule() -> anyhow::Result<()> {
        let (workspace, repo) = shared_project(true);
        let service = OperationService::default();
        let held = service.locks().acquire(
            SchedulingRule::Workspace,
            &CancelFlag::new(),
            Duration::from_millis(10),
        )?;

        let handle = service.spawn(commit_all(&service, workspace));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert_eq!(service.active_jobs(), vec![handle.id()]);
        handle.cancel();

        let report = handle.wait().await?;
        assert!(matches!(report.outcome, Outcome::Canceled));
        assert_eq!(repo.sessions_opened(), 0);
        drop(held);
        Ok(())
    }

    #[tokio::test]
    async fn test_foreground_operation_runs_inline() -> anyhow::Result<()> {
        let workspace = Arc::new(MemoryWorkspace::new());
        let repo = MemoryRepository::new(workspace.clone());
        repo.add_remote_file("module/readme.txt", "hi\n")?;

        let service = OperationService::new(EngineConfig::default());
        let context = service.context(workspace.clone()).with_console(Arc::new(SilentConsole));
        let checkout = CheckoutOperation::new(
            context,
            repo.location(),
            CheckoutOptions::new("module", "Module"),
        );
        let handle = service.spawn(Box::new(checkout));
        assert!(handle.is_finished());

        let report = handle.wait().await?;
        assert!(report.outcome.is_success());
        assert_eq!(workspace.text("Module/readme.txt").as_deref(), Some("hi\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_all_reaches_every_job() -> anyhow::Result<()> {
        let service = OperationService::default();
        let held = service.locks().acquire(
            SchedulingRule::Workspace,
            &CancelFlag::new(),
            Duration::from_millis(10),
        )?;
        let mut handles = Vec::new();
        for _ in 0..2 {
            let (workspace, _repo) = shared_project(true);
            handles.push(service.spawn(commit_all(&service, workspace)));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.cancel_all();
        for handle in handles {
            assert!(matches!(handle.wait().await?.outcome, Outcome::Canceled));
        }
        drop(held);
        Ok(())
    }
}
