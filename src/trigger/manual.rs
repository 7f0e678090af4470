//! Manual trigger.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::CoordinatorError;
use crate::model::ActivationKind;
use crate::pipeline::{Pipeline, PipelineError};
use crate::storage::TriggerMarkerStore;

/// Result of a manual trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerResponse {
    /// Run launched; it proceeds in the background.
    Accepted { execution_id: Uuid },
    /// Another execution holds the lock.
    Conflict { execution_id: Uuid, owner: Option<String> },
    /// The holder is stale, or could not be forced out.
    Stale { execution_id: Uuid, message: String },
    /// Coordination storage is unreachable.
    Unavailable { message: String },
    Failed { message: String },
}

impl TriggerResponse {
    /// HTTP status code for this outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Accepted { .. } => 202,
            Self::Conflict { .. } => 409,
            Self::Stale { .. } | Self::Unavailable { .. } => 503,
            Self::Failed { .. } => 500,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Launches manual runs on operator request. Never waits for the run.
pub struct ManualTrigger {
    pipeline: Arc<Pipeline>,
    markers: Arc<dyn TriggerMarkerStore>,
}

impl ManualTrigger {
    pub fn new(pipeline: Arc<Pipeline>, markers: Arc<dyn TriggerMarkerStore>) -> Self {
        Self { pipeline, markers }
    }

    /// Request a run. With `force`, an execution holding the lock is
    /// abandoned first regardless of its age.
    #[tracing::instrument(name = "trigger.manual", skip(self))]
    pub async fn trigger(&self, force: bool) -> TriggerResponse {
        let coordinator = self.pipeline.coordinator();

        let holder = match coordinator.current().await {
            Ok(holder) => holder,
            Err(e) => {
                return TriggerResponse::Unavailable {
                    message: e.to_string(),
                }
            }
        };

        if let Some(holder) = holder {
            if force {
                if let Err(e) = coordinator
                    .force_abandon(&holder, "abandoned: forced by manual trigger")
                    .await
                {
                    return TriggerResponse::Stale {
                        execution_id: holder.id,
                        message: format!("force abandon failed: {e}"),
                    };
                }
            } else if coordinator.is_stale(&holder) {
                return TriggerResponse::Stale {
                    execution_id: holder.id,
                    message: "running execution is stale; retry with force".to_string(),
                };
            } else {
                return TriggerResponse::Conflict {
                    execution_id: holder.id,
                    owner: holder.owner_node_id,
                };
            }
        }

        match self.pipeline.launch(ActivationKind::Manual).await {
            Ok(record) => {
                info!(execution_id = %record.id, force, "Manual run accepted");
                // Touched once this node holds the lock, so peers see a live run.
                if let Err(e) = self
                    .markers
                    .touch(coordinator.job_name(), coordinator.node_id())
                    .await
                {
                    warn!(error = %e, "Failed to record manual trigger marker");
                }
                TriggerResponse::Accepted {
                    execution_id: record.id,
                }
            }
            Err(PipelineError::Coordinator(CoordinatorError::AlreadyRunning {
                execution_id,
                owner,
                ..
            })) => TriggerResponse::Conflict { execution_id, owner },
            Err(PipelineError::Coordinator(CoordinatorError::Storage(e))) => {
                TriggerResponse::Unavailable {
                    message: e.to_string(),
                }
            }
            Err(e) => TriggerResponse::Failed {
                message: e.to_string(),
            },
        }
    }
}
