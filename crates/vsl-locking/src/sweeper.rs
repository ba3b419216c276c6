//! Periodic lock expiry.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use vsl_core::BackgroundTask;

use crate::table::LockTable;

/// Runs [`LockTable::sweep`] every `sweep_interval` until shut down.
#[derive(Debug)]
pub struct LockExpirationSweeper {
    task: BackgroundTask,
}

impl LockExpirationSweeper {
    pub fn spawn(table: Arc<LockTable>) -> Self {
        let period = table.config().sweep_interval;
        let task = BackgroundTask::spawn_interval("lock-expiration-sweeper", period, move || {
            let table = Arc::clone(&table);
            async move {
                let report = table.sweep().await;
                if !report.expired.is_empty() {
                    info!(expired = report.expired.len(), "Expired locks removed");
                }
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop sweeping. A sweep already in progress is allowed to finish.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.task.shutdown(grace).await
    }
}
