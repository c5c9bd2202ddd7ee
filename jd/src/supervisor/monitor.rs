//! Periodic supervisor loop: orphan reaping and lock verification

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

use crate::domain::JobStatus;
use crate::state::StateManager;

use super::lock::ProcessLock;
use super::registry::ProcessRegistry;

/// Outcome of one monitor pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    /// Collaborator processes terminated
    pub reaped: usize,
    /// Whether the lock file still names this process
    pub lock_held: bool,
}

/// Jobs whose sessions may still be alive even though the job left `running`
#[async_trait]
pub trait JobActivity: Send + Sync {
    /// Ids of jobs with a pool still dispatching or draining
    async fn busy_jobs(&self) -> HashSet<String>;
}

/// Background supervisor for the daemon process
pub struct SupervisorMonitor {
    registry: Arc<ProcessRegistry>,
    lock: Arc<ProcessLock>,
    state: StateManager,
    interval: Duration,
    last_cleanup: RwLock<Option<DateTime<Utc>>>,
}

impl SupervisorMonitor {
    pub fn new(registry: Arc<ProcessRegistry>, lock: Arc<ProcessLock>, state: StateManager, interval: Duration) -> Self {
        debug!(?interval, "SupervisorMonitor::new: called");
        Self {
            registry,
            lock,
            state,
            interval,
            last_cleanup: RwLock::new(None),
        }
    }

    /// When the last pass finished
    pub async fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        *self.last_cleanup.read().await
    }

    /// Run one pass. Processes of running jobs and of jobs `activity` still
    /// reports busy are left alone.
    pub async fn run_once(&self, activity: &dyn JobActivity) -> MonitorReport {
        debug!("SupervisorMonitor::run_once: called");
        let mut active: HashSet<String> = match self.state.list_jobs(Some(JobStatus::Running)).await {
            Ok(jobs) => jobs.into_iter().map(|job| job.id).collect(),
            Err(e) => {
                warn!(error = %e, "Could not list running jobs, skipping orphan reaping");
                return MonitorReport {
                    reaped: 0,
                    lock_held: self.check_lock(),
                };
            }
        };
        active.extend(activity.busy_jobs().await);

        let reaped = self.registry.reap_orphans(&active).await;
        if reaped > 0 {
            info!(reaped, "Reaped orphaned collaborator processes");
        }

        let lock_held = self.check_lock();
        *self.last_cleanup.write().await = Some(Utc::now());
        MonitorReport { reaped, lock_held }
    }

    fn check_lock(&self) -> bool {
        match self.lock.is_held_by_self() {
            Ok(true) => true,
            Ok(false) => {
                error!(path = ?self.lock.path(), "Process lock no longer names this process");
                false
            }
            Err(e) => {
                error!(error = %e, "Could not read process lock");
                false
            }
        }
    }

    /// Run passes on the configured interval until shutdown
    pub async fn run(&self, activity: Arc<dyn JobActivity>, mut shutdown: watch::Receiver<bool>) {
        debug!("SupervisorMonitor::run: called");
        let mut interval = tokio::time::interval(self.interval);
        // First tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once(activity.as_ref()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("SupervisorMonitor::run: shutdown");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Job;
    use crate::state::JobChange;
    use crate::supervisor::SignalProbe;
    use crate::supervisor::probe::testing::FakeProbe;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Busy(HashSet<String>);

    #[async_trait]
    impl JobActivity for Busy {
        async fn busy_jobs(&self) -> HashSet<String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_run_once_reaps_jobs_not_running() {
        let temp = tempdir().unwrap();
        let state = StateManager::spawn_in_memory().unwrap();
        state.create_job(Job::with_id("live", "l", 1, 60), vec![]).await.unwrap();
        state
            .apply_job_change(
                "live",
                JobChange::Start {
                    pid: 1,
                    hostname: "h".to_string(),
                    reset_failed: false,
                },
            )
            .await
            .unwrap();

        let probe = Arc::new(FakeProbe::with_live(&[]));
        let registry = Arc::new(ProcessRegistry::new(probe, Duration::from_millis(10)));
        registry.register("live", 100).await;
        registry.register("gone", 200).await;

        let lock = Arc::new(ProcessLock::new(temp.path().join("lock"), Arc::new(SignalProbe)));
        let _guard = lock.acquire("sock").unwrap();

        let monitor = SupervisorMonitor::new(registry.clone(), lock, state, Duration::from_secs(30));
        assert!(monitor.last_cleanup().await.is_none());

        let report = monitor.run_once(&Busy::default()).await;
        assert!(report.lock_held);
        // Dead pids are forgotten without signalling
        assert_eq!(report.reaped, 0);
        assert_eq!(registry.count().await, 0);
        assert!(monitor.last_cleanup().await.is_some());
    }

    #[tokio::test]
    async fn test_run_once_detects_lost_lock() {
        let temp = tempdir().unwrap();
        let state = StateManager::spawn_in_memory().unwrap();
        let registry = Arc::new(ProcessRegistry::new(Arc::new(SignalProbe), Duration::from_millis(10)));
        let lock = Arc::new(ProcessLock::new(temp.path().join("lock"), Arc::new(SignalProbe)));

        let monitor = SupervisorMonitor::new(registry, lock, state, Duration::from_secs(30));
        assert!(!monitor.run_once(&Busy::default()).await.lock_held);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let temp = tempdir().unwrap();
        let state = StateManager::spawn_in_memory().unwrap();
        let registry = Arc::new(ProcessRegistry::new(Arc::new(SignalProbe), Duration::from_millis(10)));
        let lock = Arc::new(ProcessLock::new(temp.path().join("lock"), Arc::new(SignalProbe)));
        let monitor = Arc::new(SupervisorMonitor::new(registry, lock, state, Duration::from_secs(30)));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run(Arc::new(Busy::default()), rx).await }
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_once_spares_busy_job_that_left_running() {
        let temp = tempdir().unwrap();
        let state = StateManager::spawn_in_memory().unwrap();
        state.create_job(Job::with_id("draining", "d", 1, 60), vec![]).await.unwrap();

        // Pids above pid_max, so signals sent to them reach nothing
        let (draining, idle) = (2_000_000_001, 2_000_000_002);
        let probe = Arc::new(FakeProbe::with_live(&[draining, idle]));
        let registry = Arc::new(ProcessRegistry::new(probe, Duration::from_millis(10)));
        registry.register("draining", draining).await;
        registry.register("idle", idle).await;

        let lock = Arc::new(ProcessLock::new(temp.path().join("lock"), Arc::new(SignalProbe)));
        let monitor = SupervisorMonitor::new(registry.clone(), lock, state, Duration::from_secs(30));

        let busy = Busy(HashSet::from(["draining".to_string()]));
        let report = monitor.run_once(&busy).await;
        assert_eq!(report.reaped, 1);
        assert_eq!(registry.tracked().await, vec![("draining".to_string(), draining)]);
    }
}
