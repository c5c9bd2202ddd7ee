//! Crash recovery
//!
//! Reconciles jobs stuck in `running` whose real condition has diverged:
//! all work done, over time budget, or owned by a process that is gone.
//! Needs only the store and a liveness probe, never the owning process.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Job, JobStatus, now_ms};
use crate::supervisor::ProcessProbe;

use super::messages::{JobChange, StateResponse};
use super::StateManager;

/// Reconciliation schedule and job time budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecoveryConfig {
    /// Seconds between reconciliation passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Timeout for jobs submitted without one
    #[serde(default = "default_job_timeout_secs")]
    pub default_job_timeout_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_job_timeout_secs() -> u64 {
    7200
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            default_job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl RecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Why a job was reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileReason {
    /// Every task reached a terminal status
    AllTasksTerminal,
    /// Running longer than the job's timeout
    TimedOut,
    /// The owning process is no longer alive
    OwnerDead,
}

impl std::fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AllTasksTerminal => "all tasks terminal",
            Self::TimedOut => "timed out",
            Self::OwnerDead => "owner process dead",
        };
        write!(f, "{}", s)
    }
}

/// One job transition made by a reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub job_id: String,
    pub status: JobStatus,
    pub reason: ReconcileReason,
    pub detail: String,
    /// The job as stored after the transition
    pub job: Job,
}

/// Periodic reconciler of stale `running` jobs
#[derive(Clone)]
pub struct RecoveryService {
    state: StateManager,
    probe: Arc<dyn ProcessProbe>,
    hostname: String,
}

impl RecoveryService {
    pub fn new(state: StateManager, probe: Arc<dyn ProcessProbe>, hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        debug!(%hostname, "RecoveryService::new: called");
        Self { state, probe, hostname }
    }

    /// Decide what, if anything, a running job should become.
    ///
    /// Checks short-circuit in priority order: all done, timeout, dead owner.
    async fn diagnose(&self, job: &Job, now: i64) -> StateResponse<Option<(JobChange, ReconcileReason, String)>> {
        debug!(job_id = %job.id, "RecoveryService::diagnose: called");
        let counts = self.state.count_tasks(&job.id).await?;
        if counts.pending == 0 && counts.processing == 0 {
            debug!(job_id = %job.id, "RecoveryService::diagnose: all tasks terminal");
            return Ok(Some((
                JobChange::Complete,
                ReconcileReason::AllTasksTerminal,
                format!("{} of {} tasks terminal", counts.terminal(), counts.total()),
            )));
        }

        let timeout_ms = i64::try_from(job.timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        if let Some(elapsed) = job.elapsed_ms(now)
            && elapsed > timeout_ms
        {
            debug!(job_id = %job.id, elapsed, "RecoveryService::diagnose: timed out");
            let detail = format!("timed out after {}s (limit {}s)", elapsed / 1000, job.timeout_secs);
            return Ok(Some((
                JobChange::Fail { reason: detail.clone() },
                ReconcileReason::TimedOut,
                detail,
            )));
        }

        match job.pid {
            None => {
                debug!(job_id = %job.id, "RecoveryService::diagnose: running without owner");
                let detail = "running job has no owning process".to_string();
                return Ok(Some((
                    JobChange::Fail { reason: detail.clone() },
                    ReconcileReason::OwnerDead,
                    detail,
                )));
            }
            Some(pid) => {
                let local = job.hostname.as_deref().is_none_or(|h| h == self.hostname);
                if !local {
                    debug!(job_id = %job.id, "RecoveryService::diagnose: owner on another host, assuming live");
                } else if !self.probe.is_live(pid) {
                    debug!(job_id = %job.id, pid, "RecoveryService::diagnose: owner dead");
                    let detail = format!("owner process {} is gone", pid);
                    return Ok(Some((
                        JobChange::Fail { reason: detail.clone() },
                        ReconcileReason::OwnerDead,
                        detail,
                    )));
                }
            }
        }

        Ok(None)
    }

    /// Run one reconciliation pass over every running job
    pub async fn reconcile(&self) -> StateResponse<Vec<Reconciliation>> {
        debug!("RecoveryService::reconcile: called");
        let running = self.state.list_jobs(Some(JobStatus::Running)).await?;
        let now = now_ms();
        let mut results = Vec::new();

        for job in running {
            let Some((change, reason, detail)) = self.diagnose(&job, now).await? else {
                continue;
            };
            let status = change.target_status();
            match self.state.apply_job_change(&job.id, change).await? {
                Some(updated) => {
                    info!(job_id = %job.id, %status, %reason, "Reconciled job");
                    results.push(Reconciliation {
                        job_id: job.id,
                        status,
                        reason,
                        detail,
                        job: updated,
                    });
                }
                None => {
                    warn!(job_id = %job.id, "Job changed status during reconciliation, skipping");
                }
            }
        }

        if results.is_empty() {
            debug!("RecoveryService::reconcile: nothing to reconcile");
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Task, TaskStatus};
    use crate::supervisor::testing::FakeProbe;

    const HOST: &str = "test-host";

    #[test]
    fn test_recovery_config_defaults() {
        let config: RecoveryConfig = serde_yaml::from_str("interval-secs: 60").unwrap();
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.default_job_timeout_secs, 7200);
    }

    async fn running_job(state: &StateManager, id: &str, pid: u32, timeout_secs: u64, targets: &[&str]) -> Vec<Task> {
        let mut job = Job::with_id(id, id, 1, timeout_secs);
        let tasks: Vec<Task> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| Task::new(id, *t, i as u32))
            .collect();
        job.total = tasks.len() as u32;
        state.create_job(job, tasks.clone()).await.unwrap();
        state
            .apply_job_change(
                id,
                JobChange::Start {
                    pid,
                    hostname: HOST.to_string(),
                    reset_failed: false,
                },
            )
            .await
            .unwrap()
            .unwrap();
        tasks
    }

    async fn finish(state: &StateManager, task: &mut Task, status: TaskStatus) {
        task.mark_processing();
        state.update_task(task.clone()).await.unwrap();
        if status == TaskStatus::Success {
            task.finalize_success("ok", 0);
        } else {
            task.finalize_failure(status, "x");
        }
        state.finalize_task(task.clone(), vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_owner_fails_job() {
        let state = StateManager::spawn_in_memory().unwrap();
        running_job(&state, "j1", 100, 3600, &["a"]).await;
        let service = RecoveryService::new(state.clone(), Arc::new(FakeProbe::default()), HOST);

        let results = service.reconcile().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].reason, ReconcileReason::OwnerDead);
        let job = state.get_job_required("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("100"));
    }

    #[tokio::test]
    async fn test_live_owner_untouched() {
        let state = StateManager::spawn_in_memory().unwrap();
        running_job(&state, "j1", 100, 3600, &["a"]).await;
        let service = RecoveryService::new(state.clone(), Arc::new(FakeProbe::with_live(&[100])), HOST);

        assert!(service.reconcile().await.unwrap().is_empty());
        assert_eq!(state.get_job_required("j1").await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_foreign_host_owner_assumed_live() {
        let state = StateManager::spawn_in_memory().unwrap();
        running_job(&state, "j1", 100, 3600, &["a"]).await;
        let service = RecoveryService::new(state.clone(), Arc::new(FakeProbe::default()), "other-host");

        assert!(service.reconcile().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_terminal_wins_over_dead_owner() {
        let state = StateManager::spawn_in_memory().unwrap();
        let mut tasks = running_job(&state, "j1", 100, 3600, &["a", "b"]).await;
        finish(&state, &mut tasks[0], TaskStatus::Success).await;
        finish(&state, &mut tasks[1], TaskStatus::NotFound).await;
        let service = RecoveryService::new(state.clone(), Arc::new(FakeProbe::default()), HOST);

        let results = service.reconcile().await.unwrap();
        assert_eq!(results[0].reason, ReconcileReason::AllTasksTerminal);
        assert_eq!(state.get_job_required("j1").await.unwrap().status, JobStatus::Completed);
        // The reported job carries the counters at the moment of the transition
        assert_eq!(results[0].job.successful_count, 1);
        assert_eq!(results[0].job.not_found_count, 1);
        assert_eq!(results[0].job.progress_percentage(), 100.0);
    }

    #[tokio::test]
    async fn test_timeout_wins_over_dead_owner() {
        let state = StateManager::spawn_in_memory().unwrap();
        running_job(&state, "j1", 100, 0, &["a"]).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let service = RecoveryService::new(state.clone(), Arc::new(FakeProbe::default()), HOST);

        let results = service.reconcile().await.unwrap();
        assert_eq!(results[0].reason, ReconcileReason::TimedOut);
        assert_eq!(results[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let state = StateManager::spawn_in_memory().unwrap();
        running_job(&state, "j1", 100, 3600, &["a"]).await;
        running_job(&state, "j2", 200, 3600, &["b"]).await;
        let service = RecoveryService::new(state.clone(), Arc::new(FakeProbe::with_live(&[200])), HOST);

        let first = service.reconcile().await.unwrap();
        assert_eq!(first.len(), 1);
        let snapshot: Vec<(String, JobStatus)> = state
            .list_jobs(None)
            .await
            .unwrap()
            .into_iter()
            .map(|j| (j.id, j.status))
            .collect();

        let second = service.reconcile().await.unwrap();
        assert!(second.is_empty());
        let again: Vec<(String, JobStatus)> = state
            .list_jobs(None)
            .await
            .unwrap()
            .into_iter()
            .map(|j| (j.id, j.status))
            .collect();
        assert_eq!(snapshot, again);
    }

    #[tokio::test]
    async fn test_pending_and_cancelled_untouched() {
        let state = StateManager::spawn_in_memory().unwrap();
        state
            .create_job(Job::with_id("p", "p", 1, 0), vec![Task::new("p", "a", 0)])
            .await
            .unwrap();
        running_job(&state, "c", 100, 3600, &["a"]).await;
        state.apply_job_change("c", JobChange::Cancel).await.unwrap();
        let service = RecoveryService::new(state.clone(), Arc::new(FakeProbe::default()), HOST);

        assert!(service.reconcile().await.unwrap().is_empty());
        assert_eq!(state.get_job_required("p").await.unwrap().status, JobStatus::Pending);
        assert_eq!(state.get_job_required("c").await.unwrap().status, JobStatus::Cancelled);
    }
}
