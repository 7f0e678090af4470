//! Interval scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use super::log_refused;
use crate::model::ActivationKind;
use crate::pipeline::Pipeline;

/// Launches a scheduled run every `interval`. The first run starts one
/// interval after the scheduler does.
pub struct IntervalScheduler {
    pipeline: Arc<Pipeline>,
    interval: Duration,
}

impl IntervalScheduler {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Launch one scheduled run. Returns true if it was started.
    pub async fn run_once(&self) -> bool {
        match self.pipeline.launch(ActivationKind::Scheduled).await {
            Ok(record) => {
                info!(execution_id = %record.id, "Scheduled run launched");
                true
            }
            Err(e) => {
                log_refused("scheduler", &e);
                false
            }
        }
    }

    /// Spawn the scheduler as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Scheduler started");
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
