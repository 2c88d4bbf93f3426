//! Background liveness monitoring of the directory connection.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{error::DirectoryError, manager::DirectoryManager};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Receives the outcome of each scheduled probe.
pub trait HealthObserver: Send + Sync {
    /// The probe succeeded (possibly after reconnecting).
    fn healthy(&self);

    /// The probe failed.
    fn unhealthy(&self, error: &DirectoryError);

    /// The connection was busy serving a request; the probe was skipped.
    fn skipped(&self) {}
}

/// Last observed directory health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum HealthStatus {
    /// No probe has completed yet.
    Unknown,
    /// The last probe succeeded.
    Healthy,
    /// The last probe failed with the given error.
    Unhealthy(String),
}

impl HealthStatus {
    /// Short label for status payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy(_) => "unhealthy",
        }
    }
}

/// Observer that keeps the latest status for the health endpoint and logs
/// transitions.
#[derive(Debug)]
pub struct HealthReport {
    status: RwLock<HealthStatus>,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            status: RwLock::new(HealthStatus::Unknown),
        }
    }
}

impl HealthReport {
    /// Creates a report with [`HealthStatus::Unknown`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest status.
    pub fn status(&self) -> HealthStatus {
        self.status.read().clone()
    }
}

impl HealthObserver for HealthReport {
    fn healthy(&self) {
        let mut status = self.status.write();
        if *status != HealthStatus::Healthy {
            info!("Directory health check passing");
        }
        *status = HealthStatus::Healthy;
    }

    fn unhealthy(&self, error: &DirectoryError) {
        warn!(error = %error, "Directory health check failed");
        *self.status.write() = HealthStatus::Unhealthy(error.to_string());
    }

    fn skipped(&self) {
        debug!("Directory busy, health check skipped");
    }
}

/// Periodic health check task.
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawns the monitor. It stops when `cancel` fires, when [`stop`](Self::stop)
    /// is called, or once the manager is closed.
    pub fn spawn(
        manager: Arc<DirectoryManager>,
        interval: Duration,
        observer: Arc<dyn HealthObserver>,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let interval = interval.max(MIN_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the manager was just connected.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {},
                }

                match manager.try_health_check().await {
                    None => observer.skipped(),
                    Some(Ok(())) => observer.healthy(),
                    Some(Err(DirectoryError::Closed)) => break,
                    Some(Err(e)) => observer.unhealthy(&e),
                }
            }
            debug!("Directory health monitor stopped");
        });

        Self { cancel, handle }
    }

    /// Cancels the task and waits for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Directory health monitor panicked");
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::mock::MockDirectory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        healthy: AtomicUsize,
        unhealthy: AtomicUsize,
    }

    impl HealthObserver for CountingObserver {
        fn healthy(&self) {
            self.healthy.fetch_add(1, Ordering::SeqCst);
        }

        fn unhealthy(&self, _error: &DirectoryError) {
            self.unhealthy.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_report_tracks_latest_status() {
        let report = HealthReport::new();
        assert_eq!(report.status(), HealthStatus::Unknown);

        report.unhealthy(&DirectoryError::Connection("refused".into()));
        assert_eq!(report.status().as_str(), "unhealthy");

        report.healthy();
        assert_eq!(report.status(), HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reports_outage_and_recovery() {
        let directory = MockDirectory::new();
        let manager = Arc::new(DirectoryManager::new(
            directory.config(),
            Arc::new(directory.clone()),
        ));
        manager.ensure_connection().await.unwrap();

        let observer = Arc::new(CountingObserver::default());
        let monitor = HealthMonitor::spawn(
            Arc::clone(&manager),
            Duration::from_secs(60),
            observer.clone(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(observer.healthy.load(Ordering::SeqCst), 1);

        directory.reset_connections();
        directory.set_reachable(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(observer.unhealthy.load(Ordering::SeqCst), 1);

        directory.set_reachable(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(observer.healthy.load(Ordering::SeqCst), 2);

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let directory = MockDirectory::new();
        let manager = Arc::new(DirectoryManager::new(
            directory.config(),
            Arc::new(directory.clone()),
        ));
        let observer = Arc::new(CountingObserver::default());
        let monitor = HealthMonitor::spawn(
            Arc::clone(&manager),
            Duration::ZERO,
            observer.clone(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(!monitor.handle.is_finished());
        assert_eq!(observer.healthy.load(Ordering::SeqCst), 1);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_exits_when_manager_closes() {
        let directory = MockDirectory::new();
        let manager = Arc::new(DirectoryManager::new(
            directory.config(),
            Arc::new(directory.clone()),
        ));
        let observer = Arc::new(CountingObserver::default());
        let monitor = HealthMonitor::spawn(
            Arc::clone(&manager),
            Duration::from_secs(1),
            observer.clone(),
            CancellationToken::new(),
        );

        manager.close().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(monitor.handle.is_finished());
        assert_eq!(observer.unhealthy.load(Ordering::SeqCst), 0);
    }
}
