//! CLI command definitions and subcommands

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{JobStatus, TaskStatus};

/// JobDaemon - rate-limited batch orchestrator
#[derive(Parser)]
#[command(
    name = "jd",
    about = "Rate-limited, crash-recovering batch orchestrator for flaky automation sessions",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the jobdaemon daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Internal: Run as daemon process (used by `daemon start`)
    #[command(hide = true)]
    RunDaemon,

    /// Submit a job from a target file or --target arguments
    Submit {
        /// Target file: one target per line, `#` comments allowed
        file: Option<PathBuf>,

        /// Target given directly (repeatable)
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Job name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Job timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Start the job right after submitting it
        #[arg(long)]
        start: bool,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List jobs
    Jobs {
        /// Filter by status (pending, running, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<JobStatus>,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one job with its task counts
    Job {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List failed and not-found tasks of a job
    Failed {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Start a pending or finished job
    Start {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Cancel a running job
    Cancel {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Re-run the failed tasks of a job
    Retry {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Reconcile stale running jobs now
    Reconcile {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show daemon health
    Health {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show job and task statistics
    Stats {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show daemon logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Daemon management subcommands
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Ping the daemon to check if it's alive and responsive
    Ping,
}

/// Output format for query commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Problems in a target list
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetListError {
    #[error("Duplicate target '{target}' on line {line}")]
    Duplicate { target: String, line: usize },

    #[error("No targets given")]
    Empty,
}

/// Parse a target list: one target per line, blank lines and `#` comments skipped
pub fn parse_targets(content: &str) -> Result<Vec<String>, TargetListError> {
    debug!(bytes = content.len(), "parse_targets: called");
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !seen.insert(line.to_string()) {
            return Err(TargetListError::Duplicate {
                target: line.to_string(),
                line: index + 1,
            });
        }
        targets.push(line.to_string());
    }
    if targets.is_empty() {
        return Err(TargetListError::Empty);
    }
    Ok(targets)
}

/// Collect targets from an optional file plus `--target` arguments
pub fn collect_targets(file: Option<&Path>, extra: &[String]) -> eyre::Result<Vec<String>> {
    use eyre::Context;

    let mut content = match file {
        Some(path) => {
            std::fs::read_to_string(path).context(format!("Failed to read target file {}", path.display()))?
        }
        None => String::new(),
    };
    for target in extra {
        content.push('\n');
        content.push_str(target);
    }
    Ok(parse_targets(&content)?)
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
        .join("logs")
        .join("jobdaemon.log");
    debug!(?path, "get_log_path: returning path");
    path
}

pub fn paint_job_status(status: JobStatus) -> ColoredString {
    let s = status.as_str();
    match status {
        JobStatus::Pending => s.dimmed(),
        JobStatus::Running => s.cyan(),
        JobStatus::Completed => s.green(),
        JobStatus::Failed => s.red(),
        JobStatus::Cancelled => s.yellow(),
    }
}

pub fn paint_task_status(status: TaskStatus) -> ColoredString {
    let s = status.to_string();
    match status {
        TaskStatus::Success => s.green(),
        TaskStatus::Failed => s.red(),
        TaskStatus::NotFound | TaskStatus::Cancelled => s.yellow(),
        TaskStatus::Pending | TaskStatus::Processing => s.normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parse_daemon_start() {
        let cli = Cli::parse_from(["jd", "daemon", "start", "--foreground"]);
        assert!(matches!(
            cli.command,
            Command::Daemon {
                command: DaemonCommand::Start { foreground: true }
            }
        ));
    }

    #[test]
    fn test_cli_parse_submit() {
        let cli = Cli::parse_from(["jd", "submit", "-t", "a", "--target", "b", "-w", "3", "--start"]);
        match cli.command {
            Command::Submit {
                file,
                targets,
                workers,
                start,
                format,
                ..
            } => {
                assert!(file.is_none());
                assert_eq!(targets, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(workers, Some(3));
                assert!(start);
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("Expected Submit, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_jobs_filter() {
        let cli = Cli::parse_from(["jd", "jobs", "--status", "running", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::Jobs {
                status: Some(JobStatus::Running),
                format: OutputFormat::Json
            }
        ));
        assert!(Cli::try_parse_from(["jd", "jobs", "--status", "paused"]).is_err());
    }

    #[test]
    fn test_cli_global_config() {
        let cli = Cli::parse_from(["jd", "health", "--config", "/etc/jd.yml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/jd.yml")));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_targets_skips_blanks_and_comments() {
        let content = "# funds\nAAA\n\n  BBB  \n# trailing\nCCC\n";
        assert_eq!(parse_targets(content).unwrap(), vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn test_parse_targets_rejects_duplicates() {
        let err = parse_targets("AAA\nBBB\nAAA\n").unwrap_err();
        assert_eq!(
            err,
            TargetListError::Duplicate {
                target: "AAA".to_string(),
                line: 3
            }
        );
    }

    #[test]
    fn test_parse_targets_empty() {
        assert_eq!(parse_targets("# nothing\n\n").unwrap_err(), TargetListError::Empty);
    }

    #[test]
    fn test_collect_targets_merges_file_and_args() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("targets.txt");
        std::fs::write(&path, "AAA\nBBB\n").unwrap();

        let targets = collect_targets(Some(&path), &["CCC".to_string()]).unwrap();
        assert_eq!(targets, vec!["AAA", "BBB", "CCC"]);

        assert!(collect_targets(Some(&path), &["AAA".to_string()]).is_err());
        assert!(collect_targets(Some(&temp.path().join("missing")), &[]).is_err());
    }
}
