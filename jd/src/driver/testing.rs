//! Scripted in-memory sessions for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ResultPoint;

use super::{DriverError, SessionDriver, SessionFactory, SessionOutcome};

#[derive(Default)]
struct Script {
    outcomes: Mutex<HashMap<String, VecDeque<SessionOutcome>>>,
    failing_opens: Mutex<HashSet<usize>>,
    run_delay: Mutex<Duration>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    runs: Mutex<Vec<String>>,
}

/// Factory whose sessions answer from a per-target script.
///
/// Targets without a script (or with an exhausted one) succeed.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    script: Arc<Script>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(target: &str) -> SessionOutcome {
        SessionOutcome::Success {
            summary: format!("Fund {}", target),
            records: vec![ResultPoint::new("2024-01-31", "1.0")],
        }
    }

    pub fn retryable(category: crate::retry::ErrorCategory) -> SessionOutcome {
        SessionOutcome::RetryableError {
            category,
            detail: "flaky".to_string(),
        }
    }

    /// Answer the next runs for `target` with `outcomes`, in order
    pub fn script(&self, target: &str, outcomes: Vec<SessionOutcome>) -> &Self {
        self.script
            .outcomes
            .lock()
            .unwrap()
            .insert(target.to_string(), outcomes.into());
        self
    }

    /// Make the given 0-based `open` calls fail
    pub fn fail_opens(&self, calls: &[usize]) -> &Self {
        self.script.failing_opens.lock().unwrap().extend(calls);
        self
    }

    /// Every `run` sleeps this long before answering
    pub fn run_delay(&self, delay: Duration) -> &Self {
        *self.script.run_delay.lock().unwrap() = delay;
        self
    }

    pub fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    /// Highest number of sessions running at once
    pub fn max_active(&self) -> usize {
        self.script.max_active.load(Ordering::SeqCst)
    }

    /// Targets in the order their runs started
    pub fn runs(&self) -> Vec<String> {
        self.script.runs.lock().unwrap().clone()
    }

    pub fn runs_of(&self, target: &str) -> usize {
        self.runs().iter().filter(|t| *t == target).count()
    }
}

impl SessionFactory for ScriptedFactory {
    fn create(&self, _job_id: &str) -> Box<dyn SessionDriver> {
        Box::new(ScriptedSession {
            script: self.script.clone(),
            open: false,
        })
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    open: bool,
}

#[async_trait]
impl SessionDriver for ScriptedSession {
    async fn open(&mut self) -> Result<(), DriverError> {
        let call = self.script.opens.fetch_add(1, Ordering::SeqCst);
        if self.script.failing_opens.lock().unwrap().contains(&call) {
            return Err(DriverError::NotReady(format!("scripted open failure #{}", call)));
        }
        self.open = true;
        Ok(())
    }

    async fn run(&mut self, target: &str) -> Result<SessionOutcome, DriverError> {
        if !self.open {
            return Err(DriverError::NotOpen);
        }
        self.script.runs.lock().unwrap().push(target.to_string());
        let active = self.script.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.script.run_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.active.fetch_sub(1, Ordering::SeqCst);

        let next = self
            .script
            .outcomes
            .lock()
            .unwrap()
            .get_mut(target)
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or_else(|| ScriptedFactory::success(target)))
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
        }
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cleanup hook that only counts calls
#[derive(Default)]
pub struct CountingCleanup {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl crate::supervisor::CleanupHook for CountingCleanup {
    async fn reclaim(&self, job_id: &str) -> usize {
        self.calls.lock().unwrap().push(job_id.to_string());
        0
    }
}
