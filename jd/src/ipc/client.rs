//! IPC client for communicating with the daemon
//!
//! Provides a simple interface for the CLI to send requests to the daemon
//! via Unix Domain Socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::coordinator::{HealthReport, JobDetail};
use crate::domain::{Job, JobStatus, Task};
use crate::state::Reconciliation;
use crate::store::StoreStats;

use super::MAX_MESSAGE_SIZE;
use super::messages::{DaemonRequest, DaemonResponse};

/// Default timeout for IPC operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for requests that wait on a pre-flight
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(600);

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
    start_timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Set custom timeouts for quick requests and for start/retry
    pub fn with_timeouts(mut self, timeout: Duration, start_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.start_timeout = start_timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Whether a daemon answers on the socket
    pub async fn is_running(&self) -> bool {
        self.socket_exists() && self.ping().await.is_ok()
    }

    /// Check if daemon is alive and get its version and pid
    pub async fn ping(&self) -> Result<(String, u32)> {
        debug!("DaemonClient: pinging daemon");
        match self.request(DaemonRequest::Ping).await? {
            DaemonResponse::Pong { version, pid } => Ok((version, pid)),
            other => Err(unexpected(other)),
        }
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("DaemonClient: requesting daemon shutdown");
        match self.request(DaemonRequest::Shutdown).await? {
            DaemonResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn submit(
        &self,
        name: &str,
        targets: Vec<String>,
        workers: Option<usize>,
        timeout_secs: Option<u64>,
    ) -> Result<Job> {
        debug!(%name, targets = targets.len(), "DaemonClient: submitting job");
        let request = DaemonRequest::Submit {
            name: name.to_string(),
            targets,
            workers,
            timeout_secs,
        };
        self.job_request(request).await
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        match self.request(DaemonRequest::ListJobs { status }).await? {
            DaemonResponse::Jobs { jobs } => Ok(jobs),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_job(&self, id: &str) -> Result<JobDetail> {
        match self.request(DaemonRequest::GetJob { id: id.to_string() }).await? {
            DaemonResponse::Detail { detail } => Ok(detail),
            other => Err(unexpected(other)),
        }
    }

    pub async fn failed_tasks(&self, id: &str) -> Result<Vec<Task>> {
        match self.request(DaemonRequest::FailedTasks { id: id.to_string() }).await? {
            DaemonResponse::Tasks { tasks } => Ok(tasks),
            other => Err(unexpected(other)),
        }
    }

    pub async fn start(&self, id: &str) -> Result<Job> {
        self.job_request(DaemonRequest::Start { id: id.to_string() }).await
    }

    pub async fn cancel(&self, id: &str) -> Result<Job> {
        self.job_request(DaemonRequest::Cancel { id: id.to_string() }).await
    }

    pub async fn retry_failed(&self, id: &str) -> Result<Job> {
        self.job_request(DaemonRequest::RetryFailed { id: id.to_string() }).await
    }

    pub async fn reconcile(&self) -> Result<Vec<Reconciliation>> {
        match self.request(DaemonRequest::Reconcile).await? {
            DaemonResponse::Reconciled { reconciled } => Ok(reconciled),
            other => Err(unexpected(other)),
        }
    }

    pub async fn health(&self) -> Result<HealthReport> {
        match self.request(DaemonRequest::Health).await? {
            DaemonResponse::Health { report } => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        match self.request(DaemonRequest::Stats).await? {
            DaemonResponse::Stats { stats } => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    async fn job_request(&self, request: DaemonRequest) -> Result<Job> {
        match self.request(request).await? {
            DaemonResponse::Job { job } => Ok(job),
            other => Err(unexpected(other)),
        }
    }

    /// Send a request, turning an error response into `Err`
    async fn request(&self, request: DaemonRequest) -> Result<DaemonResponse> {
        match self.send_message(request).await? {
            DaemonResponse::Error { kind, message } => Err(eyre::eyre!("Daemon error ({:?}): {}", kind, message)),
            response => Ok(response),
        }
    }

    /// Send a message to the daemon and wait for response
    async fn send_message(&self, msg: DaemonRequest) -> Result<DaemonResponse> {
        debug!(?self.socket_path, ?msg, "DaemonClient: sending message");
        let read_timeout = if msg.runs_preflight() {
            self.start_timeout
        } else {
            self.timeout
        };

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")?;

        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream).take(MAX_MESSAGE_SIZE as u64 + 1);
        let mut response_line = String::new();

        tokio::time::timeout(read_timeout, async {
            let bytes_read = reader
                .read_line(&mut response_line)
                .await
                .context("Failed to read response")?;

            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Response too large: more than {} bytes", MAX_MESSAGE_SIZE));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: DaemonResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "DaemonClient: received response");
        Ok(response)
    }
}

fn unexpected(response: DaemonResponse) -> eyre::Report {
    eyre::eyre!("Unexpected response: {:?}", response)
}
