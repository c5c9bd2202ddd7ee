//! Event Logger - persists events to JSONL files
//!
//! Subscribes to the EventBus and appends every event to
//! `<events-dir>/<job-id>.jsonl` for history and debugging.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, JobEvent};

fn log_path(events_dir: &Path, job_id: &str) -> PathBuf {
    events_dir.join(format!("{}.jsonl", job_id))
}

/// Event logger that writes events to per-job JSONL files
pub struct EventLogger {
    events_dir: PathBuf,
    /// Open file writers per job
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(events_dir: impl AsRef<Path>) -> Self {
        let events_dir = events_dir.as_ref().to_path_buf();
        debug!(?events_dir, "EventLogger::new: creating logger");
        Self {
            events_dir,
            writers: HashMap::new(),
        }
    }

    /// Write an event to its job's log file
    pub fn write_event(&mut self, event: &JobEvent) -> eyre::Result<()> {
        let job_id = event.job_id();
        debug!(%job_id, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(job_id) {
            fs::create_dir_all(&self.events_dir)?;
            let path = log_path(&self.events_dir, job_id);
            debug!(?path, "EventLogger: opening log file");
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.writers.insert(job_id.to_string(), BufWriter::new(file));
        }
        let Some(writer) = self.writers.get_mut(job_id) else {
            return Err(eyre::eyre!("No writer for job {}", job_id));
        };

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Close the writer for a job whose run ended
    pub fn close_job(&mut self, job_id: &str) {
        debug!(%job_id, "EventLogger::close_job");
        if let Some(mut writer) = self.writers.remove(job_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events from the bus until it closes
    pub async fn run(mut self, event_bus: Arc<EventBus>) {
        let rx = event_bus.subscribe();
        // Do not keep the bus alive from here
        drop(event_bus);
        self.run_with(rx).await;
    }

    async fn run_with(&mut self, mut rx: broadcast::Receiver<JobEvent>) {
        debug!("EventLogger::run: starting event logger");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let job_id = event.job_id().to_string();
                    if let Err(e) = self.write_event(&event) {
                        error!(%job_id, error = %e, "EventLogger: failed to write event");
                    }
                    if event.is_terminal() {
                        self.close_job(&job_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (job_id, mut writer) in self.writers.drain() {
            debug!(%job_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read the events logged for a job
pub fn read_job_events(events_dir: impl AsRef<Path>, job_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let path = log_path(events_dir.as_ref(), job_id);
    debug!(?path, "read_job_events: reading log file");
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_job_events: failed to parse line"),
        }
    }
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(event_bus: Arc<EventBus>, events_dir: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(events_dir);
    tokio::spawn(logger.run(event_bus))
}
