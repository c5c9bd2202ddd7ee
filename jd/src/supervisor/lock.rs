//! Single-instance process lock
//!
//! A JSON file naming the orchestrating process. A lock whose process is gone
//! is stale and may be taken over.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::probe::{ProcessProbe, local_hostname};

/// Name of the lock file inside the data directory
pub const LOCK_FILE_NAME: &str = "jobdaemon.lock";

/// How long an unreadable lock file is assumed to belong to a live writer
const UNREADABLE_GRACE: Duration = Duration::from_secs(10);

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Already running: pid {pid} on {hostname}")]
    AlreadyRunning { pid: u32, hostname: String },

    #[error("Lock file is unreadable and recently modified; another process may be starting")]
    Contended,

    #[error("Lock file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock file serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    /// Where the holder accepts administrative requests
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
}

/// Process lock at a fixed path
pub struct ProcessLock {
    path: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn ProcessProbe>) -> Self {
        let path = path.into();
        debug!(?path, "ProcessLock::new: called");
        Self { path, probe }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current holder, if any lock file exists
    pub fn read(&self) -> Result<Option<LockInfo>, LockError> {
        debug!(path = ?self.path, "ProcessLock::read: called");
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The current holder, if it may still be alive
    pub fn live_holder(&self) -> Result<Option<LockInfo>, LockError> {
        Ok(self.read()?.filter(|info| self.holder_is_live(info)))
    }

    /// Whether `info` describes a holder that may still be alive
    fn holder_is_live(&self, info: &LockInfo) -> bool {
        if info.hostname != local_hostname() {
            debug!(hostname = %info.hostname, "ProcessLock::holder_is_live: foreign host, assuming live");
            return true;
        }
        self.probe.is_live(info.pid)
    }

    /// Acquire the lock for this process, taking over a stale holder.
    ///
    /// The record is written to a private file first and published with a
    /// hard link, so other processes never see a partial lock. Fails with
    /// `AlreadyRunning` when a live process holds it.
    pub fn acquire(&self, endpoint: impl Into<String>) -> Result<LockGuard, LockError> {
        let endpoint = endpoint.into();
        debug!(path = ?self.path, %endpoint, "ProcessLock::acquire: called");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let info = LockInfo {
            pid: std::process::id(),
            hostname: local_hostname(),
            endpoint,
            started_at: Utc::now(),
        };

        let staging = self.staging_path(info.pid);
        {
            let mut file = File::create(&staging)?;
            file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
            file.sync_all()?;
        }
        let published = self.publish(&staging, &info);
        if let Err(e) = fs::remove_file(&staging) {
            warn!(path = ?staging, error = %e, "Could not remove staged lock file");
        }
        published?;

        info!(pid = info.pid, path = ?self.path, "Process lock acquired");
        Ok(LockGuard {
            path: self.path.clone(),
            pid: info.pid,
            info,
            released: false,
        })
    }

    fn staging_path(&self, pid: u32) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| LOCK_FILE_NAME.into());
        name.push(format!(".{}.tmp", pid));
        self.path.with_file_name(name)
    }

    /// Link the staged record into place, taking over a stale lock at most once
    fn publish(&self, staging: &Path, info: &LockInfo) -> Result<(), LockError> {
        // Two rounds: the second follows removal of a stale lock
        for _ in 0..2 {
            match fs::hard_link(staging, &self.path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match self.read() {
                        Ok(Some(existing)) if existing.pid == info.pid && existing.hostname == info.hostname => {
                            debug!("ProcessLock::publish: lock already names this process, replacing");
                        }
                        Ok(Some(existing)) if self.holder_is_live(&existing) => {
                            debug!(pid = existing.pid, "ProcessLock::publish: live holder");
                            return Err(LockError::AlreadyRunning {
                                pid: existing.pid,
                                hostname: existing.hostname,
                            });
                        }
                        Ok(Some(existing)) => {
                            warn!(pid = existing.pid, "Taking over stale process lock");
                        }
                        Ok(None) => {
                            debug!("ProcessLock::publish: lock vanished, retrying");
                            continue;
                        }
                        Err(e) => {
                            if self.is_fresh()? {
                                debug!(error = %e, "ProcessLock::publish: unreadable lock is recent");
                                return Err(LockError::Contended);
                            }
                            warn!(error = %e, "Unreadable process lock, treating as stale");
                        }
                    }
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Another process won the race after we removed the stale lock
        match self.read()? {
            Some(existing) => Err(LockError::AlreadyRunning {
                pid: existing.pid,
                hostname: existing.hostname,
            }),
            None => Err(LockError::Io(std::io::Error::other("could not create lock file"))),
        }
    }

    /// Whether the lock file was modified within `UNREADABLE_GRACE`
    fn is_fresh(&self) -> Result<bool, LockError> {
        let modified = match fs::metadata(&self.path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(modified.elapsed().map_or(true, |age| age < UNREADABLE_GRACE))
    }

    /// Whether the lock file still names this process
    pub fn is_held_by_self(&self) -> Result<bool, LockError> {
        debug!("ProcessLock::is_held_by_self: called");
        Ok(self
            .read()?
            .is_some_and(|info| info.pid == std::process::id() && info.hostname == local_hostname()))
    }
}

/// Held lock; releases on drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    pid: u32,
    info: LockInfo,
    released: bool,
}

impl LockGuard {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Remove the lock file if it still names this process
    pub fn release(mut self) -> Result<(), LockError> {
        debug!(path = ?self.path, "LockGuard::release: called");
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("LockGuard::release_inner: lock file already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let current: LockInfo = serde_json::from_str(&contents)?;
        if current.pid != self.pid {
            warn!(holder = current.pid, "Lock was taken over, leaving it in place");
            return Ok(());
        }
        fs::remove_file(&self.path)?;
        info!(path = ?self.path, "Process lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "Failed to release process lock");
        }
    }
}
