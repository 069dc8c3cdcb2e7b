//! CleanupScheduler: periodic idle-tunnel sweep on a background task.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use fleetguard_types::CleanupConfig;

use crate::pool::TunnelConnectionPool;

/// Runs [`TunnelConnectionPool::sweep_idle`] every interval until stopped.
///
/// The first sweep happens one full interval after `start`. A sweep that
/// overruns the interval delays the next tick instead of queueing a burst.
pub struct CleanupScheduler {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl CleanupScheduler {
    /// Spawn the sweep loop with intervals from `config`.
    pub fn start(pool: TunnelConnectionPool, config: &CleanupConfig) -> Self {
        Self::start_with(pool, config.interval(), config.stop_timeout())
    }

    pub fn start_with(pool: TunnelConnectionPool, interval: Duration, stop_timeout: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; skip that tick.
            ticker.tick().await;
            tracing::info!(interval_secs = interval.as_secs_f64(), "tunnel cleanup scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = pool.sweep_idle().await;
                        if report.expired > 0 {
                            tracing::debug!(
                                expired = report.expired,
                                close_failures = report.close_failures,
                                "scheduled sweep closed idle tunnels"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("tunnel cleanup scheduler stopping");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
            stop_timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to stop and wait for it.
    ///
    /// A sweep already running is allowed to finish. If it does not finish
    /// within the stop timeout the loop task is aborted and `false` is
    /// returned. Tunnels the sweep already removed are closed by the pool's
    /// own teardown task, which is not aborted; `close_all` waits for it.
    /// Calling `stop` again is a no-op that returns `true`.
    pub async fn stop(&mut self) -> bool {
        let Some(mut handle) = self.handle.take() else {
            return true;
        };
        if let Err(e) = self.shutdown.send(true) {
            tracing::debug!(error = %e, "cleanup loop already gone");
        }

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cleanup task ended abnormally");
                true
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.stop_timeout.as_secs_f64(),
                    "cleanup sweep did not finish in time; abandoning the loop"
                );
                handle.abort();
                false
            }
        }
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
