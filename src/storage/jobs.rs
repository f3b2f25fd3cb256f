//! Background Jobs
//!
//! Two timer-driven tasks share the storage engine with the connections:
//!
//! - **Persistence**: calls [`StorageEngine::dump`] so mutations reach disk.
//! - **Statistics**: calls [`StorageEngine::take_stats`] and logs the lifetime
//!   and current-period totals.
//!
//! ## Scheduling
//!
//! Each job runs one iteration immediately, then sleeps for its interval
//! before the next one. The sleep only starts after the iteration has
//! finished, so a slow dump delays the next tick instead of overlapping it.
//!
//! Both jobs stop when their [`JobHandle`] is shut down or dropped.

use crate::connection::ConnectionStats;
use crate::storage::{DumpOutcome, StorageEngine};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default interval between dictionary dumps.
pub const DEFAULT_DUMP_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between statistics reports.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);

/// A handle to a running background job.
///
/// When this handle is dropped, the job will be stopped.
#[derive(Debug)]
pub struct JobHandle {
    name: &'static str,
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl JobHandle {
    /// Spawns `tick` as a repeating job.
    ///
    /// `tick` is awaited to completion before the next interval starts.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tick().await;

                // Wait for the interval or shutdown signal
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            debug!(job = name, "Job received shutdown signal");
                            return;
                        }
                    }
                }
            }
        });

        info!(job = name, interval_ms = interval.as_millis() as u64, "Background job started");

        Self {
            name,
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the job to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signals the job to stop and waits until its current iteration ends.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(job = self.name, error = %e, "Background job ended abnormally");
            }
        }
        info!(job = self.name, "Background job stopped");
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the job that dumps `engine` every `interval`.
///
/// The dump itself is blocking file I/O, so it runs on the blocking pool.
pub fn start_persistence_job(engine: Arc<StorageEngine>, interval: Duration) -> JobHandle {
    JobHandle::spawn("persistence", interval, move || {
        let engine = Arc::clone(&engine);
        async move {
            let outcome = tokio::task::spawn_blocking(move || engine.dump()).await;
            match outcome {
                Ok(Ok(DumpOutcome::Done)) => info!("Dictionary dumped to disk"),
                Ok(Ok(DumpOutcome::Skipped)) => debug!("No changes since last dump"),
                Ok(Err(e)) => error!(error = %e, "Failed to dump dictionary"),
                Err(e) => error!(error = %e, "Dump task failed"),
            }
        }
    })
}

/// Starts the job that logs and resets the period statistics every
/// `interval`.
pub fn start_stats_job(
    engine: Arc<StorageEngine>,
    connections: Arc<ConnectionStats>,
    interval: Duration,
) -> JobHandle {
    JobHandle::spawn("statistics", interval, move || {
        let report = engine.take_stats();
        info!(
            get = report.lifetime.get_count,
            set = report.lifetime.set_count,
            "Total stats"
        );
        info!(
            get = report.period.get_count,
            set = report.period.set_count,
            "Last period stats"
        );
        debug!(
            active = connections.active_connections.load(Ordering::Relaxed),
            accepted = connections.connections_accepted.load(Ordering::Relaxed),
            commands = connections.commands_processed.load(Ordering::Relaxed),
            "Connection stats"
        );
        std::future::ready(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Stat;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_job_runs_immediately_and_repeats() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let job = JobHandle::spawn("test", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        job.shutdown().await;

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_job_stops_on_drop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        {
            let _job = JobHandle::spawn("test", Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(())
            });
            tokio::time::sleep(Duration::from_millis(30)).await;
            // Job is dropped here
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test]
    async fn test_persistence_job_dumps_dirty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dict.json");
        fs::write(&path, "{}").unwrap();

        let engine = Arc::new(StorageEngine::load(&path).unwrap());
        let job = start_persistence_job(Arc::clone(&engine), Duration::from_millis(10));

        engine.set("k", "v");
        tokio::time::sleep(Duration::from_millis(100)).await;
        job.shutdown().await;

        assert!(!engine.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"k":"v"}"#);
    }

    #[tokio::test]
    async fn test_stats_job_resets_period() {
        let engine = Arc::new(StorageEngine::new("unused.json"));
        engine.set("a", "1");
        engine.get("a");

        let job = start_stats_job(
            Arc::clone(&engine),
            Arc::new(ConnectionStats::new()),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        job.shutdown().await;

        let report = engine.take_stats();
        assert_eq!(report.period, Stat::default());
        assert_eq!(report.lifetime, Stat::new(1, 1));
    }
}
