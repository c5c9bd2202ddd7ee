//! Registry of collaborator processes spawned on behalf of jobs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::probe::ProcessProbe;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reclaims process-level resources of a job after its pool stops
#[async_trait]
pub trait CleanupHook: Send + Sync {
    /// Terminate every process still tracked for `job_id`; returns how many
    async fn reclaim(&self, job_id: &str) -> usize;
}

/// Tracks collaborator PIDs per job
pub struct ProcessRegistry {
    probe: Arc<dyn ProcessProbe>,
    grace: Duration,
    pids: Mutex<HashMap<String, HashSet<u32>>>,
}

impl ProcessRegistry {
    pub fn new(probe: Arc<dyn ProcessProbe>, grace: Duration) -> Self {
        debug!(?grace, "ProcessRegistry::new: called");
        Self {
            probe,
            grace,
            pids: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, job_id: &str, pid: u32) {
        debug!(%job_id, pid, "ProcessRegistry::register: called");
        self.pids.lock().await.entry(job_id.to_string()).or_default().insert(pid);
    }

    pub async fn unregister(&self, job_id: &str, pid: u32) {
        debug!(%job_id, pid, "ProcessRegistry::unregister: called");
        let mut pids = self.pids.lock().await;
        if let Some(set) = pids.get_mut(job_id) {
            set.remove(&pid);
            if set.is_empty() {
                pids.remove(job_id);
            }
        }
    }

    /// Every tracked `(job_id, pid)` pair
    pub async fn tracked(&self) -> Vec<(String, u32)> {
        let pids = self.pids.lock().await;
        let mut out: Vec<(String, u32)> = pids
            .iter()
            .flat_map(|(job, set)| set.iter().map(move |pid| (job.clone(), *pid)))
            .collect();
        out.sort();
        out
    }

    /// Number of tracked processes
    pub async fn count(&self) -> usize {
        self.pids.lock().await.values().map(HashSet::len).sum()
    }

    /// Terminate all processes of `job_id`: SIGTERM, wait up to the grace
    /// period, then SIGKILL whatever is left.
    pub async fn reclaim_job(&self, job_id: &str) -> usize {
        debug!(%job_id, "ProcessRegistry::reclaim_job: called");
        let pids: Vec<u32> = match self.pids.lock().await.remove(job_id) {
            Some(set) => set.into_iter().collect(),
            None => {
                debug!(%job_id, "ProcessRegistry::reclaim_job: nothing tracked");
                return 0;
            }
        };
        let reclaimed = self.terminate(&pids).await;
        if reclaimed > 0 {
            info!(%job_id, reclaimed, "Reclaimed collaborator processes");
        }
        reclaimed
    }

    /// Reap processes of jobs no longer active and forget dead PIDs.
    ///
    /// Returns how many processes were terminated.
    pub async fn reap_orphans(&self, active_jobs: &HashSet<String>) -> usize {
        debug!(active = active_jobs.len(), "ProcessRegistry::reap_orphans: called");
        let mut orphaned = Vec::new();
        {
            let mut pids = self.pids.lock().await;
            pids.retain(|job_id, set| {
                set.retain(|pid| self.probe.is_live(*pid));
                if set.is_empty() {
                    return false;
                }
                if active_jobs.contains(job_id) {
                    return true;
                }
                warn!(%job_id, count = set.len(), "Found orphaned collaborator processes");
                orphaned.extend(set.iter().copied());
                false
            });
        }
        if orphaned.is_empty() {
            return 0;
        }
        self.terminate(&orphaned).await
    }

    async fn terminate(&self, pids: &[u32]) -> usize {
        let live: Vec<u32> = pids.iter().copied().filter(|pid| self.probe.is_live(*pid)).collect();
        if live.is_empty() {
            return 0;
        }
        for pid in &live {
            send_signal(*pid, Signal::Term);
        }

        let deadline = tokio::time::Instant::now() + self.grace;
        while tokio::time::Instant::now() < deadline && live.iter().any(|pid| self.probe.is_live(*pid)) {
            tokio::time::sleep(REAP_POLL_INTERVAL).await;
        }

        for pid in live.iter().filter(|pid| self.probe.is_live(**pid)) {
            warn!(pid, "Collaborator did not exit after SIGTERM, sending SIGKILL");
            send_signal(*pid, Signal::Kill);
        }
        live.len()
    }
}

#[async_trait]
impl CleanupHook for ProcessRegistry {
    async fn reclaim(&self, job_id: &str) -> usize {
        self.reclaim_job(job_id).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

fn send_signal(pid: u32, signal: Signal) {
    debug!(pid, ?signal, "send_signal: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal as NixSignal, kill};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        let sig = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        if let Err(e) = kill(Pid::from_raw(raw), sig) {
            debug!(pid, error = %e, "send_signal: kill failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SignalProbe;
    use crate::supervisor::probe::testing::FakeProbe;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ProcessRegistry::new(Arc::new(FakeProbe::default()), Duration::from_millis(10));
        registry.register("job-a", 10).await;
        registry.register("job-a", 11).await;
        registry.register("job-b", 20).await;
        assert_eq!(registry.count().await, 3);

        registry.unregister("job-a", 10).await;
        assert_eq!(
            registry.tracked().await,
            vec![("job-a".to_string(), 11), ("job-b".to_string(), 20)]
        );
    }

    #[tokio::test]
    async fn test_reap_forgets_dead_pids() {
        let probe = Arc::new(FakeProbe::with_live(&[10]));
        let registry = ProcessRegistry::new(probe.clone(), Duration::from_millis(10));
        registry.register("job-a", 10).await;
        registry.register("job-a", 11).await;

        let active: HashSet<String> = ["job-a".to_string()].into_iter().collect();
        assert_eq!(registry.reap_orphans(&active).await, 0);
        assert_eq!(registry.tracked().await, vec![("job-a".to_string(), 10)]);

        probe.kill(10);
        registry.reap_orphans(&active).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_reclaim_terminates_real_child() {
        let mut child = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();

        let registry = ProcessRegistry::new(Arc::new(SignalProbe), Duration::from_secs(2));
        registry.register("job-a", pid).await;

        let waiter = tokio::spawn(async move { child.wait().await });
        let reclaimed = registry.reclaim("job-a").await;
        assert_eq!(reclaimed, 1);
        let status = waiter.await.unwrap().unwrap();
        assert!(!status.success());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_reclaim_unknown_job_is_zero() {
        let registry = ProcessRegistry::new(Arc::new(SignalProbe), Duration::from_millis(10));
        assert_eq!(registry.reclaim("nope").await, 0);
    }
}
