//! Pipeline orchestrator.
//!
//! A run holds the execution lock and executes its stages strictly in
//! order. A stage that fails stops the run; skips inside a stage do not.
//!
//! 1. Cleanup: clears staging
//! 2. Header acquisition
//! 3. Detail acquisition and reconciliation

mod state;

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use state::RunState;

use crate::acquisition::{details, headers, DetailAcquisition, HeaderAcquisition};
use crate::acquisition::{StageCounters, StageError};
use crate::config::AcquisitionConfig;
use crate::coordinator::{CoordinatorError, ExecutionCoordinator};
use crate::interfaces::FlowSource;
use crate::model::{ActivationKind, ExecutionRecord, ExecutionStatus, StageStats};
use crate::reconciliation::ReconciliationEngine;
use crate::storage::{StagingStore, Stores};

pub const CLEANUP_STAGE: &str = "cleanup";

/// Errors that prevent a run from starting or being tracked.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("Invalid run state transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cleanup,
    Headers,
    Details,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Cleanup, Stage::Headers, Stage::Details];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cleanup => CLEANUP_STAGE,
            Self::Headers => headers::STAGE_NAME,
            Self::Details => details::STAGE_NAME,
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub name: &'static str,
    pub status: ExecutionStatus,
    pub stats: StageStats,
    pub error: Option<String>,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub execution_id: Uuid,
    pub state: RunState,
    pub stages: Vec<StageReport>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Counters summed over every stage that ran.
    pub fn totals(&self) -> StageStats {
        let mut totals = StageStats::default();
        for stage in &self.stages {
            totals.merge(&stage.stats);
        }
        totals
    }
}

/// Sequences the stages of a run under the execution lock.
pub struct Pipeline {
    coordinator: Arc<ExecutionCoordinator>,
    staging: Arc<dyn StagingStore>,
    headers: HeaderAcquisition,
    details: DetailAcquisition,
}

impl Pipeline {
    pub fn new(
        stores: &Stores,
        source: Arc<dyn FlowSource>,
        coordinator: Arc<ExecutionCoordinator>,
        config: AcquisitionConfig,
    ) -> Self {
        let engine = Arc::new(ReconciliationEngine::new(stores.ledger.clone()));
        let headers = HeaderAcquisition::new(
            source.clone(),
            stores.domains.clone(),
            stores.staging.clone(),
            stores.reconciled.clone(),
            config.clone(),
        );
        let details = DetailAcquisition::new(
            source,
            stores.domains.clone(),
            stores.staging.clone(),
            stores.reconciled.clone(),
            engine,
            config,
        );
        Self {
            coordinator,
            staging: stores.staging.clone(),
            headers,
            details,
        }
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    /// Acquire the lock and run to completion in the foreground.
    pub async fn run(&self, activation: ActivationKind) -> Result<RunReport, PipelineError> {
        let record = self.coordinator.begin_run(activation).await?;
        self.execute(record).await
    }

    /// Acquire the lock and run in a background task.
    ///
    /// Returns once the lock is held; lock refusal is reported to the caller.
    pub async fn launch(
        self: &Arc<Self>,
        activation: ActivationKind,
    ) -> Result<ExecutionRecord, PipelineError> {
        let record = self.coordinator.begin_run(activation).await?;

        let this = Arc::clone(self);
        let execution = record.clone();
        tokio::spawn(async move {
            let execution_id = execution.id;
            if let Err(e) = this.execute(execution).await {
                error!(execution_id = %execution_id, error = %e, "Run aborted");
            }
        });

        Ok(record)
    }

    /// Execute every stage of an already-acquired run and close it.
    #[tracing::instrument(name = "pipeline.run", skip_all, fields(execution_id = %record.id))]
    pub async fn execute(&self, record: ExecutionRecord) -> Result<RunReport, PipelineError> {
        let mut state = RunState::NotStarted;
        transition(&mut state, RunState::Running)?;
        info!(activation = record.parameters.activation.as_str(), "Run started");

        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let mut failure: Option<String> = None;

        for stage in Stage::ALL {
            match self.run_stage(&record, stage).await {
                Ok(report) => {
                    let failed = report.status == ExecutionStatus::Failed;
                    if failed {
                        failure = report.error.clone();
                    }
                    stages.push(report);
                    if failed {
                        break;
                    }
                }
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "Could not record stage");
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        let (outcome, status) = match failure {
            None => (RunState::Completed, ExecutionStatus::Completed),
            Some(_) => (RunState::Failed, ExecutionStatus::Failed),
        };

        let closed = match self
            .coordinator
            .finish_run(&record, status, failure.as_deref())
            .await
        {
            Ok(closed) => closed,
            Err(e) => {
                // The open record will be recovered as stale.
                error!(error = %e, "Failed to record run outcome");
                true
            }
        };
        transition(&mut state, if closed { outcome } else { RunState::Abandoned })?;

        let report = RunReport {
            execution_id: record.id,
            state,
            stages,
            error: failure,
        };
        let totals = report.totals();
        info!(
            state = %report.state,
            read = totals.read,
            written = totals.written,
            errors = totals.errors,
            "Run finished"
        );
        Ok(report)
    }

    async fn run_stage(
        &self,
        record: &ExecutionRecord,
        stage: Stage,
    ) -> Result<StageReport, PipelineError> {
        let step = self.coordinator.start_step(record, stage.name()).await?;
        let counters = Arc::new(StageCounters::new());

        let result = match stage {
            Stage::Cleanup => self.cleanup(&counters).await,
            Stage::Headers => self.headers.run(counters.clone()).await,
            Stage::Details => self.details.run(counters.clone()).await,
        };

        let stats = counters.snapshot();
        let (status, error) = match result {
            Ok(()) => (ExecutionStatus::Completed, None),
            Err(e) => {
                error!(stage = stage.name(), error = %e, "Stage failed");
                (ExecutionStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .coordinator
            .finish_step(&step, status, &stats, error.as_deref())
            .await
        {
            warn!(stage = stage.name(), error = %e, "Failed to record stage outcome");
        }

        Ok(StageReport {
            name: stage.name(),
            status,
            stats,
            error,
        })
    }

    /// Deleted staging rows are counted as written.
    async fn cleanup(&self, counters: &StageCounters) -> Result<(), StageError> {
        let cleared = self.staging.clear().await?;
        counters.add_written(cleared);
        info!(cleared, "Staging cleared");
        Ok(())
    }
}

fn transition(state: &mut RunState, next: RunState) -> Result<(), PipelineError> {
    if !state.can_transition_to(next) {
        return Err(PipelineError::InvalidTransition {
            from: *state,
            to: next,
        });
    }
    *state = next;
    Ok(())
}
