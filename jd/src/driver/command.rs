//! Session driver speaking a JSON line protocol to an external program
//!
//! The program announces `{"ready": true}` once it is up, then answers each
//! `{"target": "..."}` request with one `SessionOutcome` line.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::supervisor::ProcessRegistry;

use super::{DriverError, SessionDriver, SessionFactory, SessionOutcome};

/// External session program configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriverConfig {
    /// Executable to spawn per session
    #[serde(default)]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ReadyLine {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    target: &'a str,
}

/// Session backed by a child process
pub struct CommandDriver {
    config: Arc<DriverConfig>,
    job_id: String,
    registry: Arc<ProcessRegistry>,
    open_timeout: Duration,
    close_grace: Duration,
    child: Option<Child>,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
}

impl CommandDriver {
    pub fn new(
        config: Arc<DriverConfig>,
        job_id: impl Into<String>,
        registry: Arc<ProcessRegistry>,
        open_timeout: Duration,
        close_grace: Duration,
    ) -> Self {
        Self {
            config,
            job_id: job_id.into(),
            registry,
            open_timeout,
            close_grace,
            child: None,
            pid: None,
            stdin: None,
            stdout: None,
        }
    }

    async fn await_ready(&mut self) -> Result<(), DriverError> {
        let lines = self.stdout.as_mut().ok_or(DriverError::NotOpen)?;
        let line = match tokio::time::timeout(self.open_timeout, lines.next_line()).await {
            Err(_) => return Err(DriverError::Timeout(self.open_timeout)),
            Ok(result) => result?,
        };
        let Some(line) = line else {
            return Err(DriverError::NotReady("session exited before ready".to_string()));
        };
        match serde_json::from_str::<ReadyLine>(&line) {
            Ok(ReadyLine { ready: true }) => Ok(()),
            _ => Err(DriverError::NotReady(line)),
        }
    }
}

#[async_trait]
impl SessionDriver for CommandDriver {
    async fn open(&mut self) -> Result<(), DriverError> {
        debug!(job_id = %self.job_id, program = %self.config.program, "CommandDriver::open: called");
        if self.config.program.is_empty() {
            return Err(DriverError::NotConfigured);
        }

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(DriverError::Spawn)?;

        self.pid = child.id();
        if let Some(pid) = self.pid {
            self.registry.register(&self.job_id, pid).await;
        }
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
        self.child = Some(child);

        if let Err(e) = self.await_ready().await {
            debug!(job_id = %self.job_id, error = %e, "CommandDriver::open: not ready, closing");
            self.close().await;
            return Err(e);
        }
        debug!(job_id = %self.job_id, pid = ?self.pid, "CommandDriver::open: ready");
        Ok(())
    }

    async fn run(&mut self, target: &str) -> Result<SessionOutcome, DriverError> {
        debug!(job_id = %self.job_id, %target, "CommandDriver::run: called");
        let stdin = self.stdin.as_mut().ok_or(DriverError::NotOpen)?;
        let mut request =
            serde_json::to_string(&RunRequest { target }).map_err(|e| DriverError::Protocol(e.to_string()))?;
        request.push('\n');
        stdin.write_all(request.as_bytes()).await?;
        stdin.flush().await?;

        let lines = self.stdout.as_mut().ok_or(DriverError::NotOpen)?;
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| DriverError::Protocol("session exited without a result".to_string()))?;
        serde_json::from_str(&line).map_err(|e| DriverError::Protocol(format!("malformed result: {}", e)))
    }

    async fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        debug!(job_id = %self.job_id, pid = ?self.pid, "CommandDriver::close: called");
        // EOF on stdin asks the session to exit
        self.stdin.take();
        self.stdout.take();

        match tokio::time::timeout(self.close_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "CommandDriver::close: session exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for session exit"),
            Err(_) => {
                warn!(pid = ?self.pid, "Session did not exit within grace period, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill session");
                }
            }
        }

        if let Some(pid) = self.pid.take() {
            self.registry.unregister(&self.job_id, pid).await;
        }
    }
}

/// Creates `CommandDriver`s sharing one configuration and registry
pub struct CommandDriverFactory {
    config: Arc<DriverConfig>,
    registry: Arc<ProcessRegistry>,
    open_timeout: Duration,
    close_grace: Duration,
}

impl CommandDriverFactory {
    pub fn new(config: DriverConfig, registry: Arc<ProcessRegistry>, open_timeout: Duration, close_grace: Duration) -> Self {
        debug!(program = %config.program, "CommandDriverFactory::new: called");
        Self {
            config: Arc::new(config),
            registry,
            open_timeout,
            close_grace,
        }
    }
}

impl SessionFactory for CommandDriverFactory {
    fn create(&self, job_id: &str) -> Box<dyn SessionDriver> {
        Box::new(CommandDriver::new(
            self.config.clone(),
            job_id,
            self.registry.clone(),
            self.open_timeout,
            self.close_grace,
        ))
    }
}
