//! Inter-Process Communication for administrative operations
//!
//! Unix Domain Socket IPC between the CLI and the daemon. Each connection
//! carries one newline-terminated JSON request and one JSON response.

pub mod client;
pub mod listener;
pub mod messages;

pub use client::DaemonClient;
pub use listener::{cleanup_socket, create_listener_at, handle_request, serve};
pub use messages::{DaemonRequest, DaemonResponse, ErrorKind};

/// Largest request or response line accepted (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::watch;

    use super::*;
    use crate::coordinator::{CoordinatorDeps, CoordinatorSettings, JobCoordinator, Owner};
    use crate::driver::testing::ScriptedFactory;
    use crate::events::EventBus;
    use crate::pool::PoolContext;
    use crate::retry::RetryPolicy;
    use crate::scheduler::{RateLimiter, SchedulerConfig};
    use crate::state::{RecoveryConfig, StateManager};
    use crate::supervisor::ProcessRegistry;
    use crate::supervisor::testing::FakeProbe;

    fn coordinator(temp: &TempDir) -> JobCoordinator {
        let probe = Arc::new(FakeProbe::with_live(&[std::process::id()]));
        let registry = Arc::new(ProcessRegistry::new(probe.clone(), Duration::from_millis(100)));
        let settings = CoordinatorSettings {
            limits: SchedulerConfig::default(),
            recovery: RecoveryConfig::default(),
            cancel_grace: Duration::from_millis(200),
            export_dir: temp.path().join("exports"),
        };
        let deps = CoordinatorDeps {
            state: StateManager::spawn_in_memory().unwrap(),
            events: Arc::new(EventBus::with_default_capacity()),
            pool: PoolContext {
                limiter: Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
                retry: RetryPolicy::new(3, Duration::ZERO, Duration::ZERO),
                factory: Arc::new(ScriptedFactory::new()),
                cleanup: registry.clone(),
                task_timeout: Duration::from_secs(10),
            },
            registry,
            probe,
            lock: None,
            monitor: None,
            owner: Owner::current(),
        };
        JobCoordinator::new(settings, deps)
    }

    #[tokio::test]
    async fn test_end_to_end_requests() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, coordinator(&temp), shutdown_tx));

        let client = DaemonClient::new(socket_path.clone());
        let (_, pid) = client.ping().await.unwrap();
        assert_eq!(pid, std::process::id());

        let job = client
            .submit("funds.txt", vec!["a".to_string(), "b".to_string()], Some(2), None)
            .await
            .unwrap();
        assert_eq!(client.list_jobs(None).await.unwrap().len(), 1);
        assert_eq!(client.get_job(&job.id).await.unwrap().counts.pending, 2);

        let err = client.cancel(&job.id).await.unwrap_err();
        assert!(err.to_string().contains("InvalidState"));
        let err = client.get_job("missing").await.unwrap_err();
        assert!(err.to_string().contains("NotFound"));

        client.start(&job.id).await.unwrap();
        assert!(client.health().await.unwrap().hostname.len() > 0);

        client.shutdown().await.unwrap();
        shutdown_rx.changed().await.unwrap();
        assert!(*shutdown_rx.borrow());
        server.await.unwrap();
    }
}
