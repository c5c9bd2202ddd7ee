//! WorkerPool - bounded concurrent execution of one job's tasks
//!
//! Workers never write state. Every transition (dispatch, requeue, final
//! outcome) is sent to the coordinator as a [`Proposal`], which persists it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::{ResultRecord, Task, TaskStatus};
use crate::driver::{DriverError, SessionFactory, SessionOutcome};
use crate::retry::{Decision, ErrorCategory, RetryPolicy};
use crate::scheduler::RateLimiter;
use crate::supervisor::CleanupHook;

use super::cancel::CancelToken;

/// A state change a worker asks the coordinator to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// Task taken off the queue and now `processing`
    Dispatched(Task),
    /// Attempt failed retryably; task is `pending` again until `delay` passes
    Requeued { task: Task, delay: Duration },
    /// Task reached its final status
    Finished { task: Task, records: Vec<ResultRecord> },
}

/// Errors that abort a pool before any task is attempted
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pre-flight failed for worker slot {slot} of {workers}: {source}")]
    Preflight {
        slot: usize,
        workers: usize,
        #[source]
        source: DriverError,
    },
}

/// Summary of one pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Tasks finalized by this run
    pub finished: u32,
    /// Attempts that ended in a retry
    pub requeued: u32,
    /// Whether the run stopped on cancellation
    pub cancelled: bool,
    /// Collaborator processes reclaimed after cancellation
    pub reclaimed: usize,
}

/// Collaborators shared by every pool the coordinator starts
#[derive(Clone)]
pub struct PoolContext {
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub factory: Arc<dyn SessionFactory>,
    pub cleanup: Arc<dyn CleanupHook>,
    pub task_timeout: Duration,
}

struct Queue {
    pending: VecDeque<Task>,
    /// Tasks not yet finalized, queued or not
    outstanding: usize,
}

enum AttemptResult {
    Finished,
    Requeued,
}

#[derive(Default)]
struct WorkerStats {
    finished: u32,
    requeued: u32,
}

struct Shared {
    job_id: String,
    ctx: PoolContext,
    queue: Mutex<Queue>,
    wake: Notify,
    proposals: mpsc::Sender<Proposal>,
    cancel: CancelToken,
}

/// Fixed-size pool of worker slots for one job
pub struct WorkerPool {
    workers: usize,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool over `tasks`, dispatched in the order given
    pub fn new(
        ctx: PoolContext,
        job_id: impl Into<String>,
        workers: usize,
        tasks: Vec<Task>,
        proposals: mpsc::Sender<Proposal>,
        cancel: CancelToken,
    ) -> Self {
        let job_id = job_id.into();
        debug!(%job_id, workers, tasks = tasks.len(), "WorkerPool::new: called");
        let outstanding = tasks.len();
        Self {
            workers: workers.max(1),
            shared: Arc::new(Shared {
                job_id,
                ctx,
                queue: Mutex::new(Queue {
                    pending: tasks.into(),
                    outstanding,
                }),
                wake: Notify::new(),
                proposals,
                cancel,
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Open and close one session per worker slot, one after another.
    ///
    /// Any failure means the execution environment is broken.
    pub async fn preflight(&self) -> Result<(), PoolError> {
        debug!(job_id = %self.shared.job_id, workers = self.workers, "WorkerPool::preflight: called");
        for slot in 0..self.workers {
            let mut session = self.shared.ctx.factory.create(&self.shared.job_id);
            let opened = session.open().await;
            session.close().await;
            if let Err(source) = opened {
                warn!(job_id = %self.shared.job_id, slot, error = %source, "Pre-flight failed");
                return Err(PoolError::Preflight {
                    slot,
                    workers: self.workers,
                    source,
                });
            }
            debug!(job_id = %self.shared.job_id, slot, "WorkerPool::preflight: slot ok");
        }
        info!(job_id = %self.shared.job_id, workers = self.workers, "Pre-flight passed");
        Ok(())
    }

    /// Run every task to a final status, or until cancelled.
    ///
    /// On cancellation in-flight attempts finish, then the cleanup hook
    /// reclaims whatever collaborator processes the job left behind.
    pub async fn run(self) -> PoolReport {
        let job_id = self.shared.job_id.clone();
        info!(%job_id, workers = self.workers, "Worker pool starting");

        let mut workers = JoinSet::new();
        for slot in 0..self.workers {
            workers.spawn(worker_loop(self.shared.clone(), slot));
        }

        let mut report = PoolReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(stats) => {
                    report.finished += stats.finished;
                    report.requeued += stats.requeued;
                }
                Err(e) => warn!(%job_id, error = %e, "Worker task failed"),
            }
        }

        report.cancelled = self.shared.cancel.is_cancelled();
        if report.cancelled {
            report.reclaimed = self.shared.ctx.cleanup.reclaim(&job_id).await;
        }
        info!(%job_id, ?report, "Worker pool finished");
        report
    }
}

async fn worker_loop(shared: Arc<Shared>, slot: usize) -> WorkerStats {
    debug!(job_id = %shared.job_id, slot, "worker_loop: started");
    let mut stats = WorkerStats::default();
    loop {
        // Register for wakeups before looking at the queue so none is missed
        let wake = shared.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        if shared.cancel.is_cancelled() {
            debug!(job_id = %shared.job_id, slot, "worker_loop: cancelled, no new dispatch");
            break;
        }

        let next = {
            let mut queue = shared.queue.lock().await;
            match queue.pending.pop_front() {
                Some(task) => Some(task),
                None if queue.outstanding == 0 => break,
                None => None,
            }
        };

        match next {
            Some(task) => match shared.attempt(task).await {
                AttemptResult::Finished => stats.finished += 1,
                AttemptResult::Requeued => stats.requeued += 1,
            },
            None => {
                tokio::select! {
                    _ = &mut wake => {}
                    _ = shared.cancel.cancelled() => {}
                }
            }
        }
    }
    debug!(job_id = %shared.job_id, slot, "worker_loop: exiting");
    stats
}

impl Shared {
    async fn propose(&self, proposal: Proposal) {
        if self.proposals.send(proposal).await.is_err() {
            warn!(job_id = %self.job_id, "Proposal channel closed, outcome not recorded");
        }
    }

    /// One attempt of one task in a fresh session
    async fn attempt(self: &Arc<Self>, mut task: Task) -> AttemptResult {
        debug!(job_id = %self.job_id, target = %task.target, retry = task.retry_count, "Shared::attempt: called");
        task.mark_processing();
        task.attempts += 1;
        self.propose(Proposal::Dispatched(task.clone())).await;

        self.ctx.limiter.admit().await;
        let outcome = self.run_session(&task.target).await;

        match self.ctx.retry.decide(task.retry_count, outcome.classify()) {
            Decision::Retry { delay } => {
                let detail = outcome.detail();
                debug!(target = %task.target, %detail, ?delay, "Shared::attempt: retrying");
                task.retry_count += 1;
                task.reset_to_pending();
                task.error_detail = Some(detail);
                self.propose(Proposal::Requeued {
                    task: task.clone(),
                    delay,
                })
                .await;
                self.requeue_after(task, delay);
                AttemptResult::Requeued
            }
            Decision::Finish(status) => {
                let records = match (status, outcome) {
                    (TaskStatus::Success, SessionOutcome::Success { summary, records }) => {
                        task.finalize_success(summary, u32::try_from(records.len()).unwrap_or(u32::MAX));
                        records
                            .into_iter()
                            .map(|point| ResultRecord::from_point(&task, point))
                            .collect()
                    }
                    (status, outcome) => {
                        task.finalize_failure(status, outcome.detail());
                        Vec::new()
                    }
                };
                info!(job_id = %self.job_id, target = %task.target, status = %task.status, "Task finalized");
                self.propose(Proposal::Finished { task, records }).await;

                self.queue.lock().await.outstanding -= 1;
                self.wake.notify_waiters();
                AttemptResult::Finished
            }
        }
    }

    /// Open, run and close one session; every failure becomes an outcome
    async fn run_session(&self, target: &str) -> SessionOutcome {
        let mut session = self.ctx.factory.create(&self.job_id);
        let outcome = match session.open().await {
            Err(e) => SessionOutcome::RetryableError {
                category: ErrorCategory::Other,
                detail: format!("session failed to open: {}", e),
            },
            Ok(()) => match tokio::time::timeout(self.ctx.task_timeout, session.run(target)).await {
                Err(_) => {
                    warn!(job_id = %self.job_id, %target, timeout = ?self.ctx.task_timeout, "Session timed out");
                    SessionOutcome::TerminalError {
                        detail: format!("session gave no result within {:?}", self.ctx.task_timeout),
                    }
                }
                Ok(Err(e)) => SessionOutcome::RetryableError {
                    category: ErrorCategory::Other,
                    detail: e.to_string(),
                },
                Ok(Ok(outcome)) => outcome,
            },
        };
        session.close().await;
        outcome
    }

    fn requeue_after(self: &Arc<Self>, task: Task, delay: Duration) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    shared.queue.lock().await.pending.push_back(task);
                    shared.wake.notify_waiters();
                }
                _ = shared.cancel.cancelled() => {
                    debug!(job_id = %shared.job_id, target = %task.target, "Retry dropped on cancel");
                }
            }
        });
    }
}
