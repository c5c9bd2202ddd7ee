//! JobCoordinator - the job state machine and administrative operations
//!
//! The coordinator is the only writer of job and task transitions during a
//! run: pools propose, the coordinator persists and emits progress. The
//! recovery service is the only other writer and may only end `running` jobs.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{Job, JobStatus, Task, TaskStatus};
use crate::events::{EventBus, EventEmitter};
use crate::export::{JobArtifact, write_artifact};
use crate::pool::{CancelToken, PoolContext, Proposal, WorkerPool};
use crate::scheduler::SchedulerConfig;
use crate::state::{JobChange, Reconciliation, RecoveryConfig, RecoveryService, StateEvent, StateManager};
use crate::store::{StoreStats, TaskCounts};
use crate::supervisor::{JobActivity, LockInfo, ProcessLock, ProcessProbe, ProcessRegistry, SupervisorMonitor, local_hostname};

use super::error::CoordinatorError;

const PROPOSAL_BUFFER: usize = 64;

/// Identity recorded as the owner of the jobs this process runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub pid: u32,
    pub hostname: String,
}

impl Owner {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: local_hostname(),
        }
    }
}

/// Tunables the coordinator applies to every job
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub limits: SchedulerConfig,
    pub recovery: RecoveryConfig,
    /// How long pools get to drain on shutdown before they are aborted
    pub cancel_grace: Duration,
    /// Where completed job artifacts are written
    pub export_dir: PathBuf,
}

/// Collaborators wired in by the daemon
pub struct CoordinatorDeps {
    pub state: StateManager,
    pub events: Arc<EventBus>,
    pub pool: PoolContext,
    pub registry: Arc<ProcessRegistry>,
    pub probe: Arc<dyn ProcessProbe>,
    pub lock: Option<Arc<ProcessLock>>,
    pub monitor: Option<Arc<SupervisorMonitor>>,
    pub owner: Owner,
}

/// A job with its per-status task counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub job: Job,
    pub counts: TaskCounts,
}

/// A running job as reported by `health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub id: String,
    pub name: String,
    pub pid: Option<u32>,
    pub hostname: Option<String>,
    pub percentage: f64,
}

impl From<Job> for ActiveJob {
    fn from(job: Job) -> Self {
        let percentage = job.progress_percentage();
        Self {
            id: job.id,
            name: job.name,
            pid: job.pid,
            hostname: job.hostname,
            percentage,
        }
    }
}

/// Liveness snapshot of the orchestrating process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub pid: u32,
    pub hostname: String,
    /// Current holder of the process lock, if any
    pub lock_holder: Option<LockInfo>,
    pub uptime_secs: u64,
    pub active_jobs: Vec<ActiveJob>,
    /// Collaborator processes currently tracked for reaping
    pub tracked_processes: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

struct ActiveRun {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

struct Inner {
    settings: CoordinatorSettings,
    state: StateManager,
    events: Arc<EventBus>,
    pool: PoolContext,
    registry: Arc<ProcessRegistry>,
    recovery: RecoveryService,
    lock: Option<Arc<ProcessLock>>,
    monitor: Option<Arc<SupervisorMonitor>>,
    owner: Owner,
    started: Instant,
    /// Pools dispatching right now, by job id
    active: Mutex<HashMap<String, ActiveRun>>,
}

/// Handle to the coordinator; cheap to clone
#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
}

impl JobCoordinator {
    pub fn new(settings: CoordinatorSettings, deps: CoordinatorDeps) -> Self {
        debug!(?settings, owner = ?deps.owner, "JobCoordinator::new: called");
        let recovery = RecoveryService::new(deps.state.clone(), deps.probe, deps.owner.hostname.clone());
        Self {
            inner: Arc::new(Inner {
                settings,
                state: deps.state,
                events: deps.events,
                pool: deps.pool,
                registry: deps.registry,
                recovery,
                lock: deps.lock,
                monitor: deps.monitor,
                owner: deps.owner,
                started: Instant::now(),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.inner.state
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    fn emitter(&self, job_id: &str) -> EventEmitter {
        self.inner.events.emitter_for(job_id)
    }

    // === Administrative operations ===

    /// Validate targets and store a new `pending` job
    pub async fn submit(
        &self,
        name: &str,
        targets: Vec<String>,
        workers: Option<usize>,
        timeout_secs: Option<u64>,
    ) -> Result<Job, CoordinatorError> {
        debug!(%name, targets = targets.len(), ?workers, ?timeout_secs, "JobCoordinator::submit: called");
        if targets.is_empty() {
            return Err(CoordinatorError::NoTargets);
        }
        let mut seen = HashSet::new();
        for (position, target) in targets.iter().enumerate() {
            if target.trim().is_empty() {
                return Err(CoordinatorError::BlankTarget(position));
            }
            if !seen.insert(target.as_str()) {
                return Err(CoordinatorError::DuplicateTarget(target.clone()));
            }
        }
        let total = u32::try_from(targets.len())
            .map_err(|_| CoordinatorError::InvalidState(format!("too many targets: {}", targets.len())))?;

        let workers = self.inner.settings.limits.resolve_workers(workers);
        let timeout = timeout_secs.unwrap_or(self.inner.settings.recovery.default_job_timeout_secs);
        let mut job = Job::new(name, workers, timeout);
        job.total = total;

        let tasks: Vec<Task> = targets
            .into_iter()
            .zip(0u32..)
            .map(|(target, position)| Task::new(&job.id, target, position))
            .collect();
        self.inner.state.create_job(job.clone(), tasks).await?;

        info!(job_id = %job.id, total, workers, "Job submitted");
        self.emitter(&job.id).job_submitted(&job.name, job.total);
        Ok(job)
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, CoordinatorError> {
        debug!(?status, "JobCoordinator::list_jobs: called");
        Ok(self.inner.state.list_jobs(status).await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<JobDetail, CoordinatorError> {
        debug!(%id, "JobCoordinator::get_job: called");
        let job = self.inner.state.get_job_required(id).await?;
        let counts = self.inner.state.count_tasks(id).await?;
        Ok(JobDetail { job, counts })
    }

    /// Tasks that ended `failed` or `not_found`
    pub async fn failed_tasks(&self, id: &str) -> Result<Vec<Task>, CoordinatorError> {
        debug!(%id, "JobCoordinator::failed_tasks: called");
        self.inner.state.get_job_required(id).await?;
        Ok(self
            .inner
            .state
            .list_tasks(id, &[TaskStatus::Failed, TaskStatus::NotFound])
            .await?)
    }

    /// Start a job. A job already `running` is left alone.
    pub async fn start(&self, id: &str) -> Result<Job, CoordinatorError> {
        debug!(%id, "JobCoordinator::start: called");
        let job = self.inner.state.get_job_required(id).await?;
        if job.is_running() {
            debug!(%id, "JobCoordinator::start: already running, nothing to do");
            return Ok(job);
        }
        self.ensure_idle(id).await?;
        self.launch(id, false).await
    }

    /// Stop new dispatch for a running job; in-flight tasks finish
    pub async fn cancel(&self, id: &str) -> Result<Job, CoordinatorError> {
        debug!(%id, "JobCoordinator::cancel: called");
        let current = self.inner.state.get_job_required(id).await?;
        let Some(job) = self.inner.state.apply_job_change(id, JobChange::Cancel).await? else {
            return Err(CoordinatorError::InvalidState(format!(
                "job {} is {}, only running jobs can be cancelled",
                id, current.status
            )));
        };
        info!(%id, "Job cancelled");
        self.stop_dispatch(id).await;
        self.emitter(id).status_changed(&job, "cancelled");
        Ok(job)
    }

    /// Return every `failed` task to `pending` and run the job again
    pub async fn retry_failed(&self, id: &str) -> Result<Job, CoordinatorError> {
        debug!(%id, "JobCoordinator::retry_failed: called");
        let job = self.inner.state.get_job_required(id).await?;
        if job.is_running() {
            return Err(CoordinatorError::InvalidState(format!("job {} is running", id)));
        }
        let counts = self.inner.state.count_tasks(id).await?;
        if counts.failed == 0 {
            return Err(CoordinatorError::NothingToRetry(id.to_string()));
        }
        self.ensure_idle(id).await?;
        info!(%id, failed = counts.failed, "Retrying failed tasks");
        self.launch(id, true).await
    }

    /// Run one recovery pass now
    pub async fn force_reconcile(&self) -> Result<Vec<Reconciliation>, CoordinatorError> {
        debug!("JobCoordinator::force_reconcile: called");
        let reconciled = self.inner.recovery.reconcile().await?;
        for reconciliation in &reconciled {
            self.emitter(&reconciliation.job_id).reconciled(reconciliation);
            self.stop_dispatch(&reconciliation.job_id).await;
            if reconciliation.status == JobStatus::Completed {
                self.export_completed(&reconciliation.job_id).await;
            }
        }
        Ok(reconciled)
    }

    pub async fn health(&self) -> Result<HealthReport, CoordinatorError> {
        debug!("JobCoordinator::health: called");
        self.reap_finished().await;
        let lock_holder = match &self.inner.lock {
            Some(lock) => lock.read().unwrap_or_else(|e| {
                warn!(error = %e, "Could not read process lock");
                None
            }),
            None => None,
        };
        let active_jobs = self
            .inner
            .state
            .list_jobs(Some(JobStatus::Running))
            .await?
            .into_iter()
            .map(ActiveJob::from)
            .collect();
        let last_cleanup = match &self.inner.monitor {
            Some(monitor) => monitor.last_cleanup().await,
            None => None,
        };

        Ok(HealthReport {
            pid: self.inner.owner.pid,
            hostname: self.inner.owner.hostname.clone(),
            lock_holder,
            uptime_secs: self.inner.started.elapsed().as_secs(),
            active_jobs,
            tracked_processes: self.inner.registry.count().await,
            last_cleanup,
        })
    }

    pub async fn stats(&self) -> Result<StoreStats, CoordinatorError> {
        debug!("JobCoordinator::stats: called");
        Ok(self.inner.state.stats().await?)
    }

    /// Ids of jobs whose pool is still dispatching or draining
    pub async fn dispatching(&self) -> Vec<String> {
        self.reap_finished().await;
        let mut ids: Vec<String> = self.inner.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // === Background loops ===

    /// Reconcile on the configured interval until shutdown
    pub async fn run_recovery(&self, mut shutdown: watch::Receiver<bool>) {
        debug!("JobCoordinator::run_recovery: called");
        let mut interval = tokio::time::interval(self.inner.settings.recovery.interval());
        // First tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.force_reconcile().await {
                        Ok(reconciled) if !reconciled.is_empty() => {
                            info!(count = reconciled.len(), "Recovery pass reconciled jobs");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Recovery pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("JobCoordinator::run_recovery: shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// Stop pools whose job left `running` through any writer
    pub async fn watch_state(&self, mut shutdown: watch::Receiver<bool>) {
        debug!("JobCoordinator::watch_state: called");
        let mut events = self.inner.state.subscribe_events();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(StateEvent::JobUpdated { id, status }) if status.is_terminal() => {
                        self.stop_if_not_running(&id).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "State watcher lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("JobCoordinator::watch_state: shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// Cancel running jobs, give pools the grace period to drain, then
    /// abort what is left and reclaim collaborator processes
    pub async fn shutdown(&self) {
        let runs: Vec<(String, ActiveRun)> = self.inner.active.lock().await.drain().collect();
        info!(active = runs.len(), "Coordinator shutting down");

        for (id, run) in &runs {
            match self.inner.state.apply_job_change(id, JobChange::Cancel).await {
                Ok(Some(job)) => self.emitter(id).status_changed(&job, "cancelled by shutdown"),
                Ok(None) => debug!(job_id = %id, "JobCoordinator::shutdown: job already ended"),
                Err(e) => warn!(job_id = %id, error = %e, "Could not cancel job on shutdown"),
            }
            run.cancel.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.inner.settings.cancel_grace;
        for (id, mut run) in runs {
            if tokio::time::timeout_at(deadline, &mut run.handle).await.is_err() {
                warn!(job_id = %id, "Pool did not drain in time, aborting");
                run.handle.abort();
                let _ = (&mut run.handle).await;
                self.cancel_in_flight(&id).await;
            }
            self.inner.registry.reclaim_job(&id).await;
        }
        info!("Coordinator shutdown complete");
    }

    // === Internals ===

    async fn reap_finished(&self) {
        self.inner.active.lock().await.retain(|id, run| {
            let done = run.handle.is_finished();
            if done {
                debug!(job_id = %id, "JobCoordinator::reap_finished: pool finished");
            }
            !done
        });
    }

    async fn ensure_idle(&self, id: &str) -> Result<(), CoordinatorError> {
        self.reap_finished().await;
        if self.inner.active.lock().await.contains_key(id) {
            return Err(CoordinatorError::InvalidState(format!("job {} is still stopping", id)));
        }
        Ok(())
    }

    async fn stop_dispatch(&self, id: &str) {
        if let Some(run) = self.inner.active.lock().await.get(id) {
            debug!(job_id = %id, "JobCoordinator::stop_dispatch: cancelling pool");
            run.cancel.cancel();
        }
    }

    async fn stop_if_not_running(&self, id: &str) {
        let cancel = match self.inner.active.lock().await.get(id) {
            Some(run) => run.cancel.clone(),
            None => return,
        };
        match self.inner.state.get_job(id).await {
            Ok(Some(job)) if job.is_running() => {
                debug!(job_id = %id, "JobCoordinator::stop_if_not_running: running again, keeping pool");
            }
            Ok(_) => cancel.cancel(),
            Err(e) => warn!(job_id = %id, error = %e, "Could not check job status"),
        }
    }

    /// Enter `running`, check the environment, then hand tasks to a pool
    async fn launch(&self, id: &str, reset_failed: bool) -> Result<Job, CoordinatorError> {
        let change = JobChange::Start {
            pid: self.inner.owner.pid,
            hostname: self.inner.owner.hostname.clone(),
            reset_failed,
        };
        let Some(job) = self.inner.state.apply_job_change(id, change).await? else {
            let current = self.inner.state.get_job_required(id).await?;
            return Err(CoordinatorError::InvalidState(format!(
                "cannot start job {} from {}",
                id, current.status
            )));
        };
        info!(%id, workers = job.workers, "Job started");
        let message = if reset_failed { "retrying failed tasks" } else { "started" };
        self.emitter(id).status_changed(&job, message);

        let tasks = match self.inner.state.list_tasks(id, &[TaskStatus::Pending]).await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.fail_job(id, format!("could not load tasks: {}", e)).await;
                return Err(e.into());
            }
        };

        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel(PROPOSAL_BUFFER);
        let pool = WorkerPool::new(self.inner.pool.clone(), id, job.workers, tasks, tx, cancel.clone());
        if let Err(e) = pool.preflight().await {
            self.fail_job(id, e.to_string()).await;
            return Err(e.into());
        }

        {
            let mut active = self.inner.active.lock().await;
            let this = self.clone();
            let job_id = id.to_string();
            let handle = tokio::spawn(async move { this.drive(job_id, pool, rx).await });
            active.insert(
                id.to_string(),
                ActiveRun {
                    cancel: cancel.clone(),
                    handle,
                },
            );
        }

        // A cancel that landed during pre-flight had no pool to stop
        if let Some(current) = self.inner.state.get_job(id).await?
            && !current.is_running()
        {
            debug!(%id, status = %current.status, "JobCoordinator::launch: left running during pre-flight");
            cancel.cancel();
        }
        Ok(job)
    }

    async fn drive(self, job_id: String, pool: WorkerPool, rx: mpsc::Receiver<Proposal>) {
        let (report, ()) = tokio::join!(pool.run(), self.record_proposals(&job_id, rx));
        if report.cancelled {
            info!(%job_id, finished = report.finished, reclaimed = report.reclaimed, "Pool stopped on cancel");
            return;
        }
        self.settle(&job_id).await;
    }

    /// Persist worker proposals in arrival order
    async fn record_proposals(&self, job_id: &str, mut rx: mpsc::Receiver<Proposal>) {
        let emitter = self.emitter(job_id);
        while let Some(proposal) = rx.recv().await {
            match proposal {
                Proposal::Dispatched(task) | Proposal::Requeued { task, .. } => {
                    if let Err(e) = self.inner.state.update_task(task).await {
                        error!(%job_id, error = %e, "Failed to record task transition");
                        emitter.warning(format!("could not record task transition: {}", e));
                    }
                }
                Proposal::Finished { task, records } => {
                    let target = task.target.clone();
                    let status = task.status;
                    let message = match (&task.result_summary, &task.error_detail) {
                        (Some(summary), _) if status == TaskStatus::Success => format!("{}: {}", target, summary),
                        (_, Some(detail)) => format!("{}: {}", target, detail),
                        _ => format!("{}: {}", target, status),
                    };
                    match self.inner.state.finalize_task(task, records).await {
                        Ok(Some(job)) => emitter.task_finalized(&job, &target, status, message),
                        Ok(None) => debug!(%job_id, %target, "JobCoordinator::record_proposals: duplicate outcome"),
                        Err(e) => {
                            error!(%job_id, %target, error = %e, "Failed to record task outcome");
                            emitter.warning(format!("could not record outcome of {}: {}", target, e));
                        }
                    }
                }
            }
        }
    }

    /// Close out a job whose pool ran dry
    async fn settle(&self, job_id: &str) {
        let counts = match self.inner.state.count_tasks(job_id).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(%job_id, error = %e, "Could not count tasks, leaving job to recovery");
                return;
            }
        };
        if counts.pending + counts.processing > 0 {
            let unfinished = counts.pending + counts.processing;
            self.fail_job(job_id, format!("{} tasks left unfinished", unfinished)).await;
            return;
        }

        match self.inner.state.apply_job_change(job_id, JobChange::Complete).await {
            Ok(Some(job)) => {
                info!(
                    %job_id,
                    successful = job.successful_count,
                    failed = job.failed_count,
                    not_found = job.not_found_count,
                    "Job completed"
                );
                let message = format!(
                    "completed: {} successful, {} failed, {} not found",
                    job.successful_count, job.failed_count, job.not_found_count
                );
                self.emitter(job_id).status_changed(&job, message);
                self.export_completed(job_id).await;
            }
            Ok(None) => debug!(%job_id, "JobCoordinator::settle: job already left running"),
            Err(e) => error!(%job_id, error = %e, "Failed to complete job"),
        }
    }

    async fn fail_job(&self, job_id: &str, reason: String) {
        match self
            .inner
            .state
            .apply_job_change(job_id, JobChange::Fail { reason: reason.clone() })
            .await
        {
            Ok(Some(job)) => {
                warn!(%job_id, %reason, "Job failed");
                self.emitter(job_id).status_changed(&job, reason);
            }
            Ok(None) => debug!(%job_id, "JobCoordinator::fail_job: job already left running"),
            Err(e) => error!(%job_id, error = %e, "Failed to mark job failed"),
        }
    }

    async fn export_completed(&self, job_id: &str) {
        match self.export(job_id).await {
            Ok(path) => debug!(%job_id, path = %path.display(), "JobCoordinator::export_completed: written"),
            Err(e) => {
                warn!(%job_id, error = %e, "Export failed");
                self.emitter(job_id).warning(format!("export failed: {}", e));
            }
        }
    }

    async fn export(&self, job_id: &str) -> Result<PathBuf, CoordinatorError> {
        let job = self.inner.state.get_job_required(job_id).await?;
        let tasks = self.inner.state.list_tasks(job_id, &[]).await?;
        let results = self.inner.state.list_results(job_id).await?;
        let artifact = JobArtifact::build(&job, &tasks, &results);
        let path = write_artifact(&self.inner.settings.export_dir, &artifact)?;
        self.inner
            .state
            .set_output_file(job_id, path.display().to_string())
            .await?;
        Ok(path)
    }

    /// Mark tasks of an aborted pool that never reported back
    async fn cancel_in_flight(&self, job_id: &str) {
        let tasks = match self.inner.state.list_tasks(job_id, &[TaskStatus::Processing]).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(%job_id, error = %e, "Could not list in-flight tasks");
                return;
            }
        };
        for mut task in tasks {
            task.finalize_failure(TaskStatus::Cancelled, "interrupted by shutdown");
            if let Err(e) = self.inner.state.update_task(task).await {
                warn!(%job_id, error = %e, "Could not mark task cancelled");
            }
        }
    }
}

#[async_trait]
impl JobActivity for JobCoordinator {
    async fn busy_jobs(&self) -> HashSet<String> {
        self.dispatching().await.into_iter().collect()
    }
}
