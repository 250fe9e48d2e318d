//! Refresh triggers: the periodic loop and fire-and-forget refreshes.
//!
//! Triggered refreshes run on their own task. Their outcome is logged and
//! never reaches the request that asked for them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::RefreshController;

/// Wait after a mutating action before the follow-up refresh, giving the
/// control plane time to apply the change.
pub const MUTATION_REFRESH_DELAY: Duration = Duration::from_secs(10);

/// Schedules cache refreshes on the tokio runtime.
#[derive(Clone)]
pub struct RefreshScheduler {
    controller: Arc<RefreshController>,
    mutation_delay: Duration,
}

impl RefreshScheduler {
    pub fn new(controller: Arc<RefreshController>) -> Self {
        Self {
            controller,
            mutation_delay: MUTATION_REFRESH_DELAY,
        }
    }

    /// Override the follow-up delay used by [`Self::after_mutation`].
    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    pub fn controller(&self) -> &Arc<RefreshController> {
        &self.controller
    }

    /// Refresh now, in the background.
    pub fn trigger(&self) -> JoinHandle<()> {
        self.trigger_after(Duration::ZERO)
    }

    /// Refresh after `delay`, in the background.
    pub fn trigger_after(&self, delay: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let report = controller.refresh_all().await;
            debug!(
                delay_ms = delay.as_millis() as u64,
                failed = report.failed.len(),
                "triggered refresh done"
            );
        })
    }

    /// Follow a mutating action: refresh now and once more after the
    /// propagation delay.
    pub fn after_mutation(&self) -> [JoinHandle<()>; 2] {
        [self.trigger(), self.trigger_after(self.mutation_delay)]
    }

    /// Run the periodic refresh loop until shutdown signal.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "refresh scheduler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.controller.refresh_all().await;
                }
                _ = shutdown.changed() => {
                    info!("refresh scheduler shutting down");
                    break;
                }
            }
        }
    }
}
