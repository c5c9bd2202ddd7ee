//! StateManager - actor that owns the Store
//!
//! Processes commands via channels so that every read-modify-write of a job
//! or task happens in one place, one command at a time.

use std::path::Path;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Job, JobStatus, ResultRecord, Task, TaskStatus};
use crate::store::{Store, StoreStats, TaskCounts};

use super::messages::{JobChange, StateCommand, StateError, StateResponse};

/// Event broadcast when persisted state changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    /// A job and its tasks were created
    JobCreated { id: String },
    /// A job changed status
    JobUpdated { id: String, status: JobStatus },
    /// A task reached a terminal status for the first time
    TaskFinalized {
        job_id: String,
        task_id: String,
        status: TaskStatus,
    },
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    /// Broadcast sender for state change notifications
    event_tx: broadcast::Sender<StateEvent>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the database at `store_path`
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "StateManager::spawn: called");
        let store = Store::open(store_path.as_ref())?;
        Ok(Self::with_store(store))
    }

    /// Spawn over a private in-memory database
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        debug!("StateManager::spawn_in_memory: called");
        Ok(Self::with_store(Store::open_in_memory()?))
    }

    fn with_store(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(256);

        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Self { tx, event_tx }
    }

    /// Subscribe to state change events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: StateEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Job operations ===

    /// Create a job together with its tasks
    pub async fn create_job(&self, job: Job, tasks: Vec<Task>) -> StateResponse<String> {
        debug!(job_id = %job.id, task_count = tasks.len(), "StateManager::create_job: called");
        let result = self.request(|reply| StateCommand::CreateJob { job, tasks, reply }).await;
        if let Ok(id) = &result {
            self.emit(StateEvent::JobCreated { id: id.clone() });
        }
        result
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &str) -> StateResponse<Option<Job>> {
        debug!(%id, "StateManager::get_job: called");
        self.request(|reply| StateCommand::GetJob {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Get a job by ID, returning error if not found
    pub async fn get_job_required(&self, id: &str) -> StateResponse<Job> {
        debug!(%id, "StateManager::get_job_required: called");
        self.get_job(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("Job {}", id)))
    }

    /// List jobs, newest first
    pub async fn list_jobs(&self, status_filter: Option<JobStatus>) -> StateResponse<Vec<Job>> {
        debug!(?status_filter, "StateManager::list_jobs: called");
        self.request(|reply| StateCommand::ListJobs { status_filter, reply })
            .await
    }

    /// Apply a status change to a job.
    ///
    /// Returns the updated job, or `None` if the change is not legal from the
    /// job's current status.
    pub async fn apply_job_change(&self, id: &str, change: JobChange) -> StateResponse<Option<Job>> {
        debug!(%id, ?change, "StateManager::apply_job_change: called");
        let result = self
            .request(|reply| StateCommand::ApplyJobChange {
                id: id.to_string(),
                change,
                reply,
            })
            .await;
        if let Ok(Some(job)) = &result {
            self.emit(StateEvent::JobUpdated {
                id: job.id.clone(),
                status: job.status,
            });
        }
        result
    }

    /// Record the aggregated artifact path of a job
    pub async fn set_output_file(&self, id: &str, path: impl Into<String>) -> StateResponse<()> {
        let path = path.into();
        debug!(%id, %path, "StateManager::set_output_file: called");
        self.request(|reply| StateCommand::SetOutputFile {
            id: id.to_string(),
            path,
            reply,
        })
        .await
    }

    // === Task operations ===

    /// List a job's tasks in submission order, optionally filtered by status
    pub async fn list_tasks(&self, job_id: &str, statuses: &[TaskStatus]) -> StateResponse<Vec<Task>> {
        debug!(%job_id, ?statuses, "StateManager::list_tasks: called");
        self.request(|reply| StateCommand::ListTasks {
            job_id: job_id.to_string(),
            statuses: statuses.to_vec(),
            reply,
        })
        .await
    }

    /// Overwrite a non-final task (dispatch, retry bookkeeping)
    pub async fn update_task(&self, task: Task) -> StateResponse<()> {
        debug!(task_id = %task.id, status = %task.status, "StateManager::update_task: called");
        self.request(|reply| StateCommand::UpdateTask { task, reply }).await
    }

    /// Finalize a processing task with its results and count the outcome.
    ///
    /// Returns the job with updated counters, or `None` if the task was no
    /// longer processing (a duplicate report).
    pub async fn finalize_task(&self, task: Task, records: Vec<ResultRecord>) -> StateResponse<Option<Job>> {
        debug!(task_id = %task.id, status = %task.status, "StateManager::finalize_task: called");
        let job_id = task.job_id.clone();
        let task_id = task.id.clone();
        let status = task.status;
        let result = self
            .request(|reply| StateCommand::FinalizeTask { task, records, reply })
            .await;
        if let Ok(Some(_)) = &result {
            self.emit(StateEvent::TaskFinalized { job_id, task_id, status });
        }
        result
    }

    /// Count a job's tasks per status
    pub async fn count_tasks(&self, job_id: &str) -> StateResponse<TaskCounts> {
        debug!(%job_id, "StateManager::count_tasks: called");
        self.request(|reply| StateCommand::CountTasks {
            job_id: job_id.to_string(),
            reply,
        })
        .await
    }

    /// List a job's result records
    pub async fn list_results(&self, job_id: &str) -> StateResponse<Vec<ResultRecord>> {
        debug!(%job_id, "StateManager::list_results: called");
        self.request(|reply| StateCommand::ListResults {
            job_id: job_id.to_string(),
            reply,
        })
        .await
    }

    /// Aggregate statistics across all jobs
    pub async fn stats(&self) -> StateResponse<StoreStats> {
        debug!("StateManager::stats: called");
        self.request(|reply| StateCommand::Stats { reply }).await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("StateManager::shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

fn apply_job_change(store: &mut Store, id: &str, change: JobChange) -> StateResponse<Option<Job>> {
    let mut job = store
        .get_job(id)?
        .ok_or_else(|| StateError::NotFound(format!("Job {}", id)))?;

    let applied = match change {
        JobChange::Start {
            pid,
            hostname,
            reset_failed,
        } => {
            if job.mark_running(pid, hostname) {
                let mut from = vec![TaskStatus::Processing, TaskStatus::Cancelled];
                if reset_failed {
                    from.push(TaskStatus::Failed);
                    job.failed_count = 0;
                }
                let reset = store.reset_tasks(id, &from)?;
                debug!(%id, reset, "apply_job_change: tasks returned to pending");
                true
            } else {
                false
            }
        }
        JobChange::Complete => job.transition(JobStatus::Completed),
        JobChange::Fail { reason } => job.mark_failed(reason),
        JobChange::Cancel => job.transition(JobStatus::Cancelled),
    };

    if !applied {
        debug!(%id, status = %job.status, "apply_job_change: change not legal from current status");
        return Ok(None);
    }
    store.update_job(&job)?;
    Ok(Some(job))
}

fn finalize_task(store: &mut Store, task: Task, records: Vec<ResultRecord>) -> StateResponse<Option<Job>> {
    let current = store
        .get_task(&task.id)?
        .ok_or_else(|| StateError::NotFound(format!("Task {}", task.id)))?;
    if current.status != TaskStatus::Processing {
        warn!(task_id = %task.id, current = %current.status, "Ignoring duplicate task finalization");
        return Ok(None);
    }

    store.finalize_task(&task, &records)?;
    let mut job = store
        .get_job(&task.job_id)?
        .ok_or_else(|| StateError::NotFound(format!("Job {}", task.job_id)))?;
    job.record_outcome(task.status);
    store.update_job(&job)?;
    Ok(Some(job))
}

fn set_output_file(store: &mut Store, id: &str, path: String) -> StateResponse<()> {
    let mut job = store
        .get_job(id)?
        .ok_or_else(|| StateError::NotFound(format!("Job {}", id)))?;
    job.output_file = Some(path);
    job.updated_at = crate::domain::now_ms();
    store.update_job(&job)?;
    Ok(())
}

/// The actor loop that owns the Store and processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateJob { job, tasks, reply } => {
                debug!(job_id = %job.id, "actor_loop: CreateJob command");
                let id = job.id.clone();
                let result = store.create_job(&job, &tasks).map(|_| id).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::GetJob { id, reply } => {
                debug!(%id, "actor_loop: GetJob command");
                let _ = reply.send(store.get_job(&id).map_err(StateError::from));
            }

            StateCommand::ListJobs { status_filter, reply } => {
                debug!(?status_filter, "actor_loop: ListJobs command");
                let _ = reply.send(store.list_jobs(status_filter).map_err(StateError::from));
            }

            StateCommand::ApplyJobChange { id, change, reply } => {
                debug!(%id, ?change, "actor_loop: ApplyJobChange command");
                let _ = reply.send(apply_job_change(&mut store, &id, change));
            }

            StateCommand::SetOutputFile { id, path, reply } => {
                debug!(%id, "actor_loop: SetOutputFile command");
                let _ = reply.send(set_output_file(&mut store, &id, path));
            }

            StateCommand::ListTasks { job_id, statuses, reply } => {
                debug!(%job_id, "actor_loop: ListTasks command");
                let _ = reply.send(store.list_tasks(&job_id, &statuses).map_err(StateError::from));
            }

            StateCommand::UpdateTask { task, reply } => {
                debug!(task_id = %task.id, "actor_loop: UpdateTask command");
                let _ = reply.send(store.update_task(&task).map_err(StateError::from));
            }

            StateCommand::FinalizeTask { task, records, reply } => {
                debug!(task_id = %task.id, "actor_loop: FinalizeTask command");
                let _ = reply.send(finalize_task(&mut store, task, records));
            }

            StateCommand::CountTasks { job_id, reply } => {
                debug!(%job_id, "actor_loop: CountTasks command");
                let _ = reply.send(store.count_tasks(&job_id).map_err(StateError::from));
            }

            StateCommand::ListResults { job_id, reply } => {
                debug!(%job_id, "actor_loop: ListResults command");
                let _ = reply.send(store.list_results(&job_id).map_err(StateError::from));
            }

            StateCommand::Stats { reply } => {
                debug!("actor_loop: Stats command");
                let _ = reply.send(store.stats().map_err(StateError::from));
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use tempfile::tempdir;

    async fn seeded(targets: &[&str]) -> (StateManager, Job, Vec<Task>) {
        let manager = StateManager::spawn_in_memory().unwrap();
        let mut job = Job::with_id("job-1", "test", 2, 60);
        let tasks: Vec<Task> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| Task::new(&job.id, *t, i as u32))
            .collect();
        job.total = tasks.len() as u32;
        manager.create_job(job.clone(), tasks.clone()).await.unwrap();
        (manager, job, tasks)
    }

    fn start() -> JobChange {
        JobChange::Start {
            pid: 42,
            hostname: "host".to_string(),
            reset_failed: false,
        }
    }

    #[tokio::test]
    async fn test_state_manager_job_crud() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path().join("jobdaemon.db")).unwrap();

        let job = Job::with_id("job-1", "test", 2, 60);
        let id = manager.create_job(job, vec![]).await.unwrap();
        assert_eq!(id, "job-1");

        let retrieved = manager.get_job("job-1").await.unwrap();
        assert_eq!(retrieved.unwrap().name, "test");

        let jobs = manager.list_jobs(Some(JobStatus::Pending)).await.unwrap();
        assert_eq!(jobs.len(), 1);

        assert!(manager.get_job("missing").await.unwrap().is_none());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_manager_get_nonexistent() {
        let manager = StateManager::spawn_in_memory().unwrap();
        assert!(manager.get_job("missing").await.unwrap().is_none());
        assert!(matches!(
            manager.get_job_required("missing").await,
            Err(StateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_target_surfaces_store_error() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let job = Job::with_id("job-1", "test", 1, 60);
        let tasks = vec![Task::new("job-1", "a", 0), Task::new("job-1", "a", 1)];
        let err = manager.create_job(job, tasks).await.unwrap_err();
        assert!(matches!(err, StateError::Store(StoreError::DuplicateTarget { .. })));
    }

    #[tokio::test]
    async fn test_cancel_pending_is_rejected() {
        let (manager, job, _) = seeded(&["a"]).await;
        let result = manager.apply_job_change(&job.id, JobChange::Cancel).await.unwrap();
        assert!(result.is_none());
        let stored = manager.get_job_required(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (manager, job, _) = seeded(&["a"]).await;
        let first = manager.apply_job_change(&job.id, start()).await.unwrap();
        assert_eq!(first.unwrap().pid, Some(42));
        let second = manager.apply_job_change(&job.id, start()).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_start_resets_in_flight_tasks() {
        let (manager, job, mut tasks) = seeded(&["a", "b"]).await;
        tasks[0].mark_processing();
        manager.update_task(tasks[0].clone()).await.unwrap();
        tasks[1].finalize_failure(TaskStatus::Cancelled, "shutdown");
        manager.update_task(tasks[1].clone()).await.unwrap();

        manager.apply_job_change(&job.id, start()).await.unwrap().unwrap();
        let counts = manager.count_tasks(&job.id).await.unwrap();
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn test_finalize_counts_once() {
        let (manager, job, mut tasks) = seeded(&["a", "b"]).await;
        manager.apply_job_change(&job.id, start()).await.unwrap();

        let task = &mut tasks[0];
        task.mark_processing();
        manager.update_task(task.clone()).await.unwrap();
        task.finalize_success("A", 0);

        let updated = manager.finalize_task(task.clone(), vec![]).await.unwrap().unwrap();
        assert_eq!(updated.successful_count, 1);

        let duplicate = manager.finalize_task(task.clone(), vec![]).await.unwrap();
        assert!(duplicate.is_none());
        let stored = manager.get_job_required(&job.id).await.unwrap();
        assert_eq!(stored.successful_count, 1);
    }

    #[tokio::test]
    async fn test_retry_start_resets_failed_only() {
        let (manager, job, mut tasks) = seeded(&["a", "b", "c"]).await;
        manager.apply_job_change(&job.id, start()).await.unwrap();
        for (task, status) in tasks.iter_mut().zip([TaskStatus::Failed, TaskStatus::NotFound, TaskStatus::Failed]) {
            task.mark_processing();
            manager.update_task(task.clone()).await.unwrap();
            task.finalize_failure(status, "boom");
            manager.finalize_task(task.clone(), vec![]).await.unwrap();
        }
        manager.apply_job_change(&job.id, JobChange::Complete).await.unwrap();
        let before = manager.get_job_required(&job.id).await.unwrap();
        assert_eq!(before.failed_count, 2);

        let retry = JobChange::Start {
            pid: 7,
            hostname: "host".to_string(),
            reset_failed: true,
        };
        let after = manager.apply_job_change(&job.id, retry).await.unwrap().unwrap();
        assert_eq!(after.failed_count, 0);
        assert_eq!(after.not_found_count, 1);

        let counts = manager.count_tasks(&job.id).await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.not_found, 1);
    }

    #[tokio::test]
    async fn test_events_broadcast_on_changes() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let mut events = manager.subscribe_events();

        let job = Job::with_id("job-1", "test", 1, 60);
        manager.create_job(job, vec![]).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            StateEvent::JobCreated {
                id: "job-1".to_string()
            }
        );

        manager.apply_job_change("job-1", start()).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            StateEvent::JobUpdated {
                id: "job-1".to_string(),
                status: JobStatus::Running
            }
        );
    }

    #[tokio::test]
    async fn test_set_output_file() {
        let (manager, job, _) = seeded(&["a"]).await;
        manager.set_output_file(&job.id, "/tmp/out.json").await.unwrap();
        let stored = manager.get_job_required(&job.id).await.unwrap();
        assert_eq!(stored.output_file.as_deref(), Some("/tmp/out.json"));
    }
}
