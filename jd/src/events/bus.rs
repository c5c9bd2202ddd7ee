//! Event Bus - pub/sub for job progress events
//!
//! The EventBus uses a tokio broadcast channel to deliver events to all
//! subscribers. The coordinator emits; loggers and IPC clients subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{Job, TaskStatus};
use crate::state::Reconciliation;

use super::types::{JobEvent, Progress};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Central event bus for job activity
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no subscribers, the event is dropped.
    /// If the channel is full, the oldest events are dropped.
    pub fn emit(&self, event: JobEvent) {
        debug!(event_type = event.event_type(), job_id = event.job_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle for a specific job
    pub fn emitter_for(&self, job_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            job_id: job_id.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for emitting events about one job
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<JobEvent>,
    job_id: String,
}

impl EventEmitter {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: JobEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn job_submitted(&self, name: &str, total: u32) {
        self.emit(JobEvent::JobSubmitted {
            job_id: self.job_id.clone(),
            name: name.to_string(),
            total,
        });
    }

    pub fn status_changed(&self, job: &Job, message: impl Into<String>) {
        self.emit(JobEvent::JobStatusChanged {
            job_id: self.job_id.clone(),
            status: job.status,
            progress: Progress::from_job(job, message),
        });
    }

    pub fn task_finalized(&self, job: &Job, target: &str, task_status: TaskStatus, message: impl Into<String>) {
        self.emit(JobEvent::TaskFinalized {
            job_id: self.job_id.clone(),
            target: target.to_string(),
            task_status,
            progress: Progress::from_job(job, message),
        });
    }

    pub fn reconciled(&self, reconciliation: &Reconciliation) {
        self.emit(JobEvent::JobReconciled {
            job_id: self.job_id.clone(),
            status: reconciliation.status,
            reason: reconciliation.reason,
            detail: reconciliation.detail.clone(),
            progress: Progress::from_job(&reconciliation.job, reconciliation.detail.clone()),
        });
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(JobEvent::Warning {
            job_id: self.job_id.clone(),
            message: message.into(),
        });
    }
}
