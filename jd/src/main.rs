use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use jobdaemon::cli::{Cli, Command, DaemonCommand, OutputFormat, collect_targets, get_log_path, paint_job_status, paint_task_status};
use jobdaemon::config::Config;
use jobdaemon::coordinator::{CoordinatorDeps, CoordinatorSettings, HealthReport, JobCoordinator, JobDetail, Owner};
use jobdaemon::daemon::DaemonManager;
use jobdaemon::domain::{Job, Task};
use jobdaemon::driver::CommandDriverFactory;
use jobdaemon::events::{EventBus, spawn_event_logger};
use jobdaemon::ipc::{self, DaemonClient};
use jobdaemon::pool::PoolContext;
use jobdaemon::retry::RetryPolicy;
use jobdaemon::scheduler::RateLimiter;
use jobdaemon::state::{Reconciliation, RecoveryService, StateManager};
use jobdaemon::store::StoreStats;
use jobdaemon::supervisor::{JobActivity, ProcessLock, ProcessProbe, ProcessRegistry, SignalProbe, SupervisorMonitor, local_hostname};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // The daemon and every CLI invocation share one file
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Daemon { command } => match command {
            DaemonCommand::Start { foreground } => cmd_start(&config, cli.config.as_ref(), foreground).await,
            DaemonCommand::Stop => cmd_stop(&config).await,
            DaemonCommand::Status { format } => cmd_status(&config, format),
            DaemonCommand::Ping => cmd_ping(&config).await,
        },
        Command::RunDaemon => run_daemon(&config).await,
        Command::Submit {
            file,
            targets,
            name,
            workers,
            timeout_secs,
            start,
            format,
        } => {
            let all = collect_targets(file.as_deref(), &targets)?;
            let name = name
                .or_else(|| file.as_ref().and_then(|f| f.file_name()).map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "targets".to_string());
            let client = client_for(&config).await?;
            let mut job = client.submit(&name, all, workers, timeout_secs).await?;
            if start {
                job = client.start(&job.id).await?;
            }
            print_job(&job, format)
        }
        Command::Jobs { status, format } => {
            let jobs = client_for(&config).await?.list_jobs(status).await?;
            print_jobs(&jobs, format)
        }
        Command::Job { id, format } => {
            let detail = client_for(&config).await?.get_job(&id).await?;
            print_detail(&detail, format)
        }
        Command::Failed { id, format } => {
            let tasks = client_for(&config).await?.failed_tasks(&id).await?;
            print_tasks(&tasks, format)
        }
        Command::Start { id, format } => {
            let job = client_for(&config).await?.start(&id).await?;
            print_job(&job, format)
        }
        Command::Cancel { id, format } => {
            let job = client_for(&config).await?.cancel(&id).await?;
            print_job(&job, format)
        }
        Command::Retry { id, format } => {
            let job = client_for(&config).await?.retry_failed(&id).await?;
            print_job(&job, format)
        }
        Command::Reconcile { format } => cmd_reconcile(&config, format).await,
        Command::Health { format } => {
            let report = client_for(&config).await?.health().await?;
            print_health(&report, format)
        }
        Command::Stats { format } => {
            let stats = client_for(&config).await?.stats().await?;
            print_stats(&stats, format)
        }
        Command::Logs { follow, lines } => cmd_logs(follow, lines),
    }
}

fn client(config: &Config) -> DaemonClient {
    DaemonClient::new(config.socket_path()).with_timeouts(config.ipc.timeout(), config.ipc.start_timeout())
}

/// Client for a daemon that is known to answer
async fn client_for(config: &Config) -> Result<DaemonClient> {
    let client = client(config);
    if !client.is_running().await {
        return Err(eyre::eyre!(
            "Daemon is not running (socket {}). Start it with `jd daemon start`.",
            client.socket_path().display()
        ));
    }
    Ok(client)
}

fn daemon_manager(config: &Config) -> DaemonManager {
    let probe: Arc<dyn ProcessProbe> = Arc::new(SignalProbe);
    let lock = ProcessLock::new(config.lock_path(), probe.clone());
    DaemonManager::new(lock, probe, client(config))
}

/// Start the daemon
async fn cmd_start(config: &Config, config_path: Option<&PathBuf>, foreground: bool) -> Result<()> {
    debug!(foreground, "cmd_start: called");
    let daemon = daemon_manager(config).with_config(config_path);

    if let Some(pid) = daemon.running_pid()? {
        println!("JobDaemon is already running (PID: {})", pid);
        return Ok(());
    }

    if foreground {
        println!("Starting JobDaemon in foreground mode...");
        run_daemon(config).await
    } else {
        let pid = daemon.start()?;
        println!("JobDaemon started (PID: {})", pid);
        Ok(())
    }
}

/// Stop the daemon
async fn cmd_stop(config: &Config) -> Result<()> {
    debug!("cmd_stop: called");
    let daemon = daemon_manager(config);
    let Some(pid) = daemon.running_pid()? else {
        println!("JobDaemon is not running");
        return Ok(());
    };
    daemon.stop().await?;
    println!("JobDaemon stopped (was PID: {})", pid);
    Ok(())
}

/// Show daemon status
fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_status: called");
    let status = daemon_manager(config).status()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            println!("JobDaemon Status");
            println!("----------------");
            match &status.holder {
                Some(holder) => {
                    println!("Status: {}", "running".green());
                    println!("PID: {}", holder.pid);
                    println!("Host: {}", holder.hostname);
                    println!("Endpoint: {}", holder.endpoint);
                    println!("Started: {}", holder.started_at);
                }
                None => println!("Status: {}", "stopped".dimmed()),
            }
            println!("Lock file: {}", status.lock_file.display());
        }
    }
    Ok(())
}

/// Ping the daemon via IPC to check if it's alive and responsive
async fn cmd_ping(config: &Config) -> Result<()> {
    debug!("cmd_ping: called");
    let client = client(config);
    if !client.socket_exists() {
        println!("JobDaemon is not running");
        return Ok(());
    }

    match client.ping().await {
        Ok((version, pid)) => {
            println!("Daemon is alive and responsive");
            println!("Version: {}", version);
            println!("PID: {}", pid);
        }
        Err(e) => {
            println!("Daemon socket exists but is not responding");
            println!("Error: {}", e);
        }
    }
    Ok(())
}

/// Reconcile through the daemon, or against the store when none runs
async fn cmd_reconcile(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_reconcile: called");
    let client = client(config);
    let reconciled = if client.is_running().await {
        client.reconcile().await?
    } else {
        info!("No daemon running, reconciling the store directly");
        let state = StateManager::spawn(config.db_path())?;
        let recovery = RecoveryService::new(state.clone(), Arc::new(SignalProbe), local_hostname());
        let reconciled = recovery.reconcile().await?;
        state.shutdown().await?;
        reconciled
    };
    print_reconciled(&reconciled, format)
}

fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    debug!(follow, lines, "cmd_logs: called");
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        println!("The daemon may not have been started yet.");
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let all_lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

async fn run_daemon(config: &Config) -> Result<()> {
    debug!("run_daemon: called");
    info!("Daemon starting...");

    fs::create_dir_all(config.data_dir()).context("Failed to create data directory")?;

    let probe: Arc<dyn ProcessProbe> = Arc::new(SignalProbe);
    let lock = Arc::new(ProcessLock::new(config.lock_path(), probe.clone()));
    let guard = lock.acquire(config.endpoint())?;

    let state = StateManager::spawn(config.db_path())?;
    info!("StateManager initialized");

    let events = Arc::new(EventBus::with_default_capacity());
    let logger_handle = spawn_event_logger(events.clone(), config.events_dir());

    let registry = Arc::new(ProcessRegistry::new(probe.clone(), config.pool.cancel_grace()));
    let factory = Arc::new(CommandDriverFactory::new(
        config.driver.clone(),
        registry.clone(),
        config.pool.open_timeout(),
        config.pool.cancel_grace(),
    ));
    let monitor = Arc::new(SupervisorMonitor::new(
        registry.clone(),
        lock.clone(),
        state.clone(),
        config.supervisor.monitor_interval(),
    ));

    let settings = CoordinatorSettings {
        limits: config.limits.clone(),
        recovery: config.recovery.clone(),
        cancel_grace: config.pool.cancel_grace(),
        export_dir: config.export_dir(),
    };
    let deps = CoordinatorDeps {
        state: state.clone(),
        events,
        pool: PoolContext {
            limiter: Arc::new(RateLimiter::from_config(&config.limits)),
            retry: RetryPolicy::from_config(&config.retry),
            factory,
            cleanup: registry.clone(),
            task_timeout: config.pool.task_timeout(),
        },
        registry,
        probe,
        lock: Some(lock.clone()),
        monitor: Some(monitor.clone()),
        owner: Owner::current(),
    };
    let coordinator = JobCoordinator::new(settings, deps);

    // Jobs left running by a crashed daemon
    match coordinator.force_reconcile().await {
        Ok(reconciled) => info!(count = reconciled.len(), "Startup reconciliation done"),
        Err(e) => warn!(error = %e, "Startup reconciliation failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();
    {
        let monitor = monitor.clone();
        let activity: Arc<dyn JobActivity> = Arc::new(coordinator.clone());
        let rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move { monitor.run(activity, rx).await }));
    }
    {
        let coordinator = coordinator.clone();
        let rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move { coordinator.run_recovery(rx).await }));
    }
    {
        let coordinator = coordinator.clone();
        let rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move { coordinator.watch_state(rx).await }));
    }

    let socket_path = config.socket_path();
    let (listener, socket_path) = ipc::create_listener_at(&socket_path)?;
    info!(?socket_path, "IPC socket listening");
    background.push(tokio::spawn(ipc::serve(listener, coordinator.clone(), shutdown_tx.clone())));

    info!("Daemon running. Press Ctrl+C to stop.");
    wait_for_shutdown(shutdown_rx).await?;

    info!("Daemon shutting down...");
    shutdown_tx.send_replace(true);
    coordinator.shutdown().await;
    for handle in background {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task failed");
        }
    }

    if let Err(e) = state.shutdown().await {
        warn!(error = %e, "StateManager shutdown failed");
    }
    logger_handle.abort();
    ipc::cleanup_socket(&socket_path);
    guard.release()?;
    info!("Daemon stopped");
    Ok(())
}

/// Block until a signal arrives or shutdown is requested over IPC
async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = shutdown_rx.wait_for(|stop| *stop) => info!("Shutdown requested"),
    }
    Ok(())
}

// === Output ===

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_job(job: &Job, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(job),
        OutputFormat::Text => {
            println!("Job:      {}", job.id.cyan());
            println!("Name:     {}", job.name);
            println!("Status:   {}", paint_job_status(job.status));
            println!("Workers:  {}", job.workers);
            println!(
                "Progress: {}/{} ({:.1}%) - {} ok, {} failed, {} not found",
                job.successful_count + job.failed_count + job.not_found_count,
                job.total,
                job.progress_percentage(),
                job.successful_count,
                job.failed_count,
                job.not_found_count
            );
            if let Some(reason) = &job.failure_reason {
                println!("Reason:   {}", reason.red());
            }
            if let Some(output) = &job.output_file {
                println!("Output:   {}", output);
            }
            Ok(())
        }
    }
}

fn print_jobs(jobs: &[Job], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&jobs),
        OutputFormat::Text => {
            if jobs.is_empty() {
                println!("No jobs");
                return Ok(());
            }
            println!("{:<38} {:<10} {:>7} {:>7}  NAME", "ID", "STATUS", "TOTAL", "DONE%");
            for job in jobs {
                println!(
                    "{:<38} {:<10} {:>7} {:>6.1}%  {}",
                    job.id,
                    paint_job_status(job.status),
                    job.total,
                    job.progress_percentage(),
                    job.name
                );
            }
            Ok(())
        }
    }
}

fn print_detail(detail: &JobDetail, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(detail),
        OutputFormat::Text => {
            print_job(&detail.job, format)?;
            let c = &detail.counts;
            println!(
                "Tasks:    {} pending, {} processing, {} success, {} failed, {} not found, {} cancelled",
                c.pending, c.processing, c.success, c.failed, c.not_found, c.cancelled
            );
            Ok(())
        }
    }
}

fn print_tasks(tasks: &[Task], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&tasks),
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No failed tasks");
                return Ok(());
            }
            for task in tasks {
                println!(
                    "{:<30} {:<10} retries={} {}",
                    task.target,
                    paint_task_status(task.status),
                    task.retry_count,
                    task.error_detail.as_deref().unwrap_or("").dimmed()
                );
            }
            Ok(())
        }
    }
}

fn print_reconciled(reconciled: &[Reconciliation], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&reconciled),
        OutputFormat::Text => {
            if reconciled.is_empty() {
                println!("Nothing to reconcile");
            }
            for r in reconciled {
                println!("{} {} -> {} ({})", "✓".green(), r.job_id, paint_job_status(r.status), r.detail);
            }
            Ok(())
        }
    }
}

fn print_health(report: &HealthReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Text => {
            println!("PID:        {} on {}", report.pid, report.hostname);
            println!("Uptime:     {}s", report.uptime_secs);
            match &report.lock_holder {
                Some(holder) => println!("Lock:       pid {} on {}", holder.pid, holder.hostname),
                None => println!("Lock:       {}", "not held".red()),
            }
            println!("Processes:  {} tracked", report.tracked_processes);
            match report.last_cleanup {
                Some(at) => println!("Cleanup:    {}", at),
                None => println!("Cleanup:    never"),
            }
            println!("Active:     {}", report.active_jobs.len());
            for job in &report.active_jobs {
                println!("  {} {:>6.1}%  {}", job.id.cyan(), job.percentage, job.name);
            }
            Ok(())
        }
    }
}

fn print_stats(stats: &StoreStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Text => {
            println!(
                "Jobs:  {} total, {} pending, {} running, {} completed, {} failed, {} cancelled",
                stats.total_jobs,
                stats.pending_jobs,
                stats.running_jobs,
                stats.completed_jobs,
                stats.failed_jobs,
                stats.cancelled_jobs
            );
            println!("Tasks: {} total, {} successful", stats.total_tasks, stats.successful_tasks);
            Ok(())
        }
    }
}
