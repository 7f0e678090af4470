//! Manual trigger marker watcher.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::log_refused;
use crate::coordinator::CoordinatorError;
use crate::model::ActivationKind;
use crate::pipeline::{Pipeline, PipelineError};
use crate::storage::{StorageError, TriggerMarkerStore};

/// Polls the shared trigger marker and launches a manual run whenever it
/// advances past the last seen value.
///
/// The first poll only records a checkpoint, so a marker touched before
/// this node started does not cause a run.
pub struct MarkerWatcher {
    markers: Arc<dyn TriggerMarkerStore>,
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
    checkpoint: Mutex<Checkpoint>,
}

/// What a single marker poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPoll {
    /// No new request since the last poll.
    Unchanged,
    /// The request came from this node, which launched it already.
    OwnRequest,
    Launched,
    /// The requesting node's own run holds the lock.
    AlreadyServed,
    /// Another run holds the lock; the request is not replayed.
    Dropped,
}

#[derive(Debug, Default)]
struct Checkpoint {
    initialized: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl MarkerWatcher {
    pub fn new(
        markers: Arc<dyn TriggerMarkerStore>,
        pipeline: Arc<Pipeline>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            markers,
            pipeline,
            poll_interval,
            checkpoint: Mutex::new(Checkpoint::default()),
        }
    }

    /// Check the marker once.
    ///
    /// The checkpoint moves past every observed request, launched or not.
    pub async fn poll_once(&self) -> Result<MarkerPoll, StorageError> {
        let coordinator = self.pipeline.coordinator();
        let marker = self.markers.get(coordinator.job_name()).await?;
        let seen = marker.as_ref().map(|m| m.last_updated);

        {
            let mut checkpoint = self.checkpoint.lock().await;
            if !checkpoint.initialized {
                checkpoint.initialized = true;
                checkpoint.last_seen = seen;
                debug!(checkpoint = ?seen, "Trigger marker checkpoint initialized");
                return Ok(MarkerPoll::Unchanged);
            }
            if seen.is_none() || seen <= checkpoint.last_seen {
                return Ok(MarkerPoll::Unchanged);
            }
            checkpoint.last_seen = seen;
        }

        let Some(marker) = marker else {
            return Ok(MarkerPoll::Unchanged);
        };

        // A request made through this node's manual trigger already launched.
        if marker.owner_node.as_deref() == Some(coordinator.node_id()) {
            debug!("Trigger marker advanced by this node, skipping");
            return Ok(MarkerPoll::OwnRequest);
        }

        info!(
            updated = %marker.last_updated,
            requested_by = ?marker.owner_node,
            "Trigger marker advanced"
        );
        match self.pipeline.launch(ActivationKind::Manual).await {
            Ok(record) => {
                info!(execution_id = %record.id, "Manual run launched by marker");
                Ok(MarkerPoll::Launched)
            }
            Err(PipelineError::Coordinator(CoordinatorError::AlreadyRunning {
                execution_id,
                owner,
                ..
            })) if owner.is_some() && owner == marker.owner_node => {
                debug!(execution_id = %execution_id, owner = ?owner, "Requested run already in progress");
                Ok(MarkerPoll::AlreadyServed)
            }
            Err(PipelineError::Coordinator(CoordinatorError::AlreadyRunning {
                execution_id,
                owner,
                ..
            })) => {
                warn!(
                    execution_id = %execution_id,
                    owner = ?owner,
                    requested_by = ?marker.owner_node,
                    "Manual run request dropped, another run holds the lock"
                );
                Ok(MarkerPoll::Dropped)
            }
            Err(e) => {
                log_refused("marker-watcher", &e);
                Ok(MarkerPoll::Dropped)
            }
        }
    }

    /// Spawn the polling loop as a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.poll_interval, "Trigger marker watcher started");
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Err(e) = self.poll_once().await {
                    warn!(error = %e, "Failed to poll trigger marker");
                }
            }
        })
    }
}
