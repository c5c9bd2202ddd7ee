//! Daemon process management
//!
//! The running daemon is whoever holds the process lock. `start` spawns
//! `jd run-daemon` in the background; `stop` asks over IPC first and falls
//! back to signals.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ipc::DaemonClient;
use crate::supervisor::{LockInfo, ProcessLock, ProcessProbe};

/// Polls while waiting for the daemon to exit
const STOP_POLLS: u32 = 50;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Daemon status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    /// Live lock holder, if any
    pub holder: Option<LockInfo>,
    pub lock_file: PathBuf,
}

/// Starts, stops, and inspects the background daemon
pub struct DaemonManager {
    lock: ProcessLock,
    probe: Arc<dyn ProcessProbe>,
    client: DaemonClient,
    /// Extra arguments forwarded to `run-daemon`
    daemon_args: Vec<String>,
}

impl DaemonManager {
    pub fn new(lock: ProcessLock, probe: Arc<dyn ProcessProbe>, client: DaemonClient) -> Self {
        Self {
            lock,
            probe,
            client,
            daemon_args: Vec::new(),
        }
    }

    /// Forward `--config` to the spawned daemon
    pub fn with_config(mut self, config: Option<&PathBuf>) -> Self {
        if let Some(path) = config {
            self.daemon_args.push("--config".to_string());
            self.daemon_args.push(path.display().to_string());
        }
        self
    }

    /// PID of the live daemon, if one holds the lock
    pub fn running_pid(&self) -> Result<Option<u32>> {
        let holder = self.lock.live_holder().context("Failed to read process lock")?;
        Ok(holder.map(|info| info.pid))
    }

    /// Start the daemon
    ///
    /// This spawns a new process and returns immediately.
    pub fn start(&self) -> Result<u32> {
        debug!("DaemonManager::start: called");
        if let Some(pid) = self.running_pid()? {
            debug!(pid, "DaemonManager::start: daemon already running");
            return Err(eyre::eyre!("Daemon already running with PID {}", pid));
        }

        info!("Starting daemon...");
        let exe = std::env::current_exe().context("Failed to get current executable")?;
        debug!(?exe, args = ?self.daemon_args, "DaemonManager::start: spawning daemon process");

        let child = Command::new(&exe)
            .args(&self.daemon_args)
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        let pid = child.id();
        info!(pid, "Daemon started");
        Ok(pid)
    }

    /// Stop the daemon
    pub async fn stop(&self) -> Result<()> {
        debug!("DaemonManager::stop: called");
        let pid = self.running_pid()?.ok_or_else(|| {
            debug!("DaemonManager::stop: daemon is not running");
            eyre::eyre!("Daemon is not running")
        })?;

        info!(pid, "Stopping daemon...");
        match self.client.shutdown().await {
            Ok(()) => {
                if self.wait_for_exit(pid).await {
                    info!(pid, "Daemon stopped");
                    return Ok(());
                }
                warn!(pid, "Daemon accepted shutdown but is still running");
            }
            Err(e) => warn!(pid, error = %e, "IPC shutdown failed, falling back to SIGTERM"),
        }

        send_signal(pid, nix::sys::signal::Signal::SIGTERM).context("Failed to send SIGTERM")?;
        if !self.wait_for_exit(pid).await {
            warn!(pid, "Daemon did not stop gracefully, sending SIGKILL");
            if let Err(e) = send_signal(pid, nix::sys::signal::Signal::SIGKILL) {
                warn!(pid, error = %e, "Failed to send SIGKILL");
            }
        }

        info!(pid, "Daemon stopped");
        Ok(())
    }

    async fn wait_for_exit(&self, pid: u32) -> bool {
        for attempt in 0..STOP_POLLS {
            if !self.probe.is_live(pid) {
                debug!(pid, attempt, "DaemonManager::wait_for_exit: process exited");
                return true;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        !self.probe.is_live(pid)
    }

    /// Get the daemon status
    pub fn status(&self) -> Result<DaemonStatus> {
        debug!("DaemonManager::status: called");
        let holder = self.lock.live_holder().context("Failed to read process lock")?;
        let status = DaemonStatus {
            running: holder.is_some(),
            holder,
            lock_file: self.lock.path().to_path_buf(),
        };
        debug!(?status, "DaemonManager::status: returning");
        Ok(status)
    }
}

fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).context("PID out of range")?;
    debug!(pid, ?signal, "send_signal: called");
    kill(Pid::from_raw(raw), signal)?;
    Ok(())
}
