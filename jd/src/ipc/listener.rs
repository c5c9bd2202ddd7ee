//! IPC listener for the daemon side
//!
//! Binds the Unix Domain Socket, accepts connections, and answers each
//! request from the coordinator.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::coordinator::JobCoordinator;

use super::MAX_MESSAGE_SIZE;
use super::messages::{DaemonRequest, DaemonResponse, ErrorKind};

/// Create and bind a listener at `socket_path`
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    // Only one daemon holds the process lock, so an existing socket is stale
    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one request line from the stream
pub async fn read_request(stream: &mut UnixStream) -> Result<DaemonRequest> {
    let mut reader = BufReader::new(stream).take(MAX_MESSAGE_SIZE as u64 + 1);
    let mut line = String::new();

    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC message")?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: more than {} bytes", MAX_MESSAGE_SIZE));
    }

    if line.is_empty() {
        return Err(eyre::eyre!("Empty message received"));
    }

    let request: DaemonRequest = serde_json::from_str(line.trim()).context("Failed to parse IPC message")?;
    debug!(?request, "read_request: parsed message");

    Ok(request)
}

/// Send a response on the stream
pub async fn send_response(stream: &mut UnixStream, response: &DaemonResponse) -> Result<()> {
    let response_json = serde_json::to_string(response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

/// Answer one request
pub async fn handle_request(
    coordinator: &JobCoordinator,
    request: DaemonRequest,
    shutdown: &watch::Sender<bool>,
) -> DaemonResponse {
    debug!(?request, "handle_request: called");
    let result = match request {
        DaemonRequest::Ping => {
            return DaemonResponse::Pong {
                version: env!("CARGO_PKG_VERSION").to_string(),
                pid: std::process::id(),
            };
        }
        DaemonRequest::Shutdown => {
            info!("Shutdown requested over IPC");
            shutdown.send_replace(true);
            return DaemonResponse::Ok;
        }
        DaemonRequest::Submit {
            name,
            targets,
            workers,
            timeout_secs,
        } => coordinator
            .submit(&name, targets, workers, timeout_secs)
            .await
            .map(|job| DaemonResponse::Job { job }),
        DaemonRequest::ListJobs { status } => coordinator.list_jobs(status).await.map(|jobs| DaemonResponse::Jobs { jobs }),
        DaemonRequest::GetJob { id } => coordinator.get_job(&id).await.map(|detail| DaemonResponse::Detail { detail }),
        DaemonRequest::FailedTasks { id } => coordinator
            .failed_tasks(&id)
            .await
            .map(|tasks| DaemonResponse::Tasks { tasks }),
        DaemonRequest::Start { id } => coordinator.start(&id).await.map(|job| DaemonResponse::Job { job }),
        DaemonRequest::Cancel { id } => coordinator.cancel(&id).await.map(|job| DaemonResponse::Job { job }),
        DaemonRequest::RetryFailed { id } => coordinator.retry_failed(&id).await.map(|job| DaemonResponse::Job { job }),
        DaemonRequest::Reconcile => coordinator
            .force_reconcile()
            .await
            .map(|reconciled| DaemonResponse::Reconciled { reconciled }),
        DaemonRequest::Health => coordinator.health().await.map(|report| DaemonResponse::Health { report }),
        DaemonRequest::Stats => coordinator.stats().await.map(|stats| DaemonResponse::Stats { stats }),
    };

    result.unwrap_or_else(|e| {
        debug!(error = %e, "handle_request: request failed");
        DaemonResponse::from(e)
    })
}

async fn handle_connection(mut stream: UnixStream, coordinator: JobCoordinator, shutdown: watch::Sender<bool>) {
    let response = match read_request(&mut stream).await {
        Ok(request) => handle_request(&coordinator, request, &shutdown).await,
        Err(e) => {
            warn!(error = %e, "Invalid IPC request");
            DaemonResponse::error(ErrorKind::InvalidInput, format!("{:#}", e))
        }
    };
    if let Err(e) = send_response(&mut stream, &response).await {
        warn!(error = %e, "Failed to answer IPC request");
    }
}

/// Accept connections until shutdown is signalled
pub async fn serve(listener: UnixListener, coordinator: JobCoordinator, shutdown: watch::Sender<bool>) {
    debug!("serve: called");
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, coordinator.clone(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "Failed to accept IPC connection"),
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!("serve: shutdown");
                    break;
                }
            }
        }
    }
}
