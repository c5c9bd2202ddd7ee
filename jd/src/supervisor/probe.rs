//! Process liveness probing

use tracing::debug;

/// Capability to ask whether a process is alive on this host
pub trait ProcessProbe: Send + Sync {
    /// Whether `pid` names a live process.
    ///
    /// Implementations answer `false` only when the process is known to be
    /// gone. Anything they cannot determine counts as live.
    fn is_live(&self, pid: u32) -> bool;
}

/// Signal-0 liveness probe
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    fn is_live(&self, pid: u32) -> bool {
        debug!(pid, "SignalProbe::is_live: called");
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            let Ok(raw) = i32::try_from(pid) else {
                debug!(pid, "SignalProbe::is_live: pid out of range, assuming live");
                return true;
            };
            // Sending signal 0 checks if the process exists without affecting it
            let result = match kill(Pid::from_raw(raw), None) {
                Ok(()) => true,
                Err(Errno::ESRCH) => false,
                Err(e) => {
                    debug!(pid, error = %e, "SignalProbe::is_live: undetermined, assuming live");
                    true
                }
            };
            debug!(pid, result, "SignalProbe::is_live: unix check");
            result
        }

        #[cfg(not(unix))]
        {
            debug!(pid, "SignalProbe::is_live: unsupported platform, assuming live");
            true
        }
    }
}

/// Name of this host, as recorded in lock files and job owners
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        match nix::unistd::gethostname() {
            Ok(name) => return name.to_string_lossy().into_owned(),
            Err(e) => debug!(error = %e, "local_hostname: gethostname failed"),
        }
    }
    "localhost".to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_live() {
        assert!(SignalProbe.is_live(std::process::id()));
    }

    #[test]
    fn test_exited_child_is_not_live() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!SignalProbe.is_live(pid));
    }

    #[test]
    fn test_out_of_range_pid_assumed_live() {
        assert!(SignalProbe.is_live(u32::MAX));
    }

    #[test]
    fn test_local_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }
}
