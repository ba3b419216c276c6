//! Cancellable interval loops.
//!
//! Every background loop in an agent (lock expiry, replay-cache eviction,
//! group sync) is a [`BackgroundTask`]: a tokio task that runs one iteration
//! per tick and checks a shutdown signal between iterations. An iteration is
//! never interrupted half way, so shared state is not left partially swept.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Shortest period a loop ticks at. Zero periods are raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running interval loop.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `iteration` every `period` until shut down.
    ///
    /// The first iteration runs immediately. A period below [`MIN_PERIOD`]
    /// is raised to it.
    pub fn spawn_interval<F, Fut>(name: &'static str, period: Duration, mut iteration: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period < MIN_PERIOD {
            warn!(task = name, ?period, min = ?MIN_PERIOD, "Background task period too short, clamping");
        }
        let period = period.max(MIN_PERIOD);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, ?period, "Background task started");
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        iteration().await;
                    }
                }
            }
            debug!(task = name, "Background task stopped");
        });

        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal shutdown and wait up to `grace` for the current iteration to end.
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(grace, handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(task = self.name, ?grace, "Background task did not stop in time, aborting");
                abort.abort();
                false
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
