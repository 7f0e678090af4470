//! Execution coordinator.
//!
//! Cluster-wide mutual exclusion over pipeline runs, mediated by the
//! execution table: the open execution row for a job is the lock. The lock
//! is advisory. Abandoning a record does not stop the node that opened it;
//! that node finds out when its final status update turns out to be a
//! no-op (see [`ExecutionCoordinator::finish_run`]).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::model::{
    ActivationKind, ExecutionRecord, ExecutionStatus, RunParameters, StageStats, StepRecord,
};
use crate::storage::{ExecutionStore, StorageError};

/// Coordinator errors.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Job {job_name} already running as execution {execution_id} on {owner:?}")]
    AlreadyRunning {
        job_name: String,
        execution_id: Uuid,
        owner: Option<String>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Grants and recovers the per-job run lock for this node.
pub struct ExecutionCoordinator {
    executions: Arc<dyn ExecutionStore>,
    node_id: String,
    job_name: String,
    max_run_hours: u32,
}

impl ExecutionCoordinator {
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        node_id: impl Into<String>,
        job_name: impl Into<String>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            executions,
            node_id: node_id.into(),
            job_name: job_name.into(),
            max_run_hours: config.max_run_hours,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// The execution currently holding the lock, if any.
    pub async fn current(&self) -> Result<Option<ExecutionRecord>> {
        Ok(self.executions.find_open(&self.job_name).await?)
    }

    /// Open a RUNNING execution owned by this node, or `None` if another
    /// execution holds the lock.
    pub async fn try_acquire(&self, activation: ActivationKind) -> Result<Option<ExecutionRecord>> {
        if self.current().await?.is_some() {
            return Ok(None);
        }
        let parameters = RunParameters::now(activation);
        let record = self
            .executions
            .insert_running(&self.job_name, &self.node_id, &parameters)
            .await?;
        if let Some(record) = &record {
            info!(
                job = %self.job_name,
                execution_id = %record.id,
                activation = activation.as_str(),
                "Execution lock acquired"
            );
        }
        Ok(record)
    }

    pub fn is_stale(&self, record: &ExecutionRecord) -> bool {
        self.is_stale_at(record, Utc::now())
    }

    /// A record is stale when it is in an inconsistent state, or has been
    /// RUNNING for longer than the configured maximum.
    pub fn is_stale_at(&self, record: &ExecutionRecord, now: DateTime<Utc>) -> bool {
        if record.status.is_inconsistent() {
            return true;
        }
        record.status == ExecutionStatus::Running
            && now - record.start_time > Duration::hours(i64::from(self.max_run_hours))
    }

    /// Close a stale record as FAILED. Returns false if the record is not
    /// stale or was already closed.
    pub async fn abandon(&self, record: &ExecutionRecord, reason: &str) -> Result<bool> {
        if !self.is_stale(record) {
            return Ok(false);
        }
        self.close_failed(record, reason).await
    }

    /// Close a record as FAILED regardless of staleness. Returns false if
    /// it was already closed.
    pub async fn force_abandon(&self, record: &ExecutionRecord, reason: &str) -> Result<bool> {
        warn!(
            execution_id = %record.id,
            owner = ?record.owner_node_id,
            reason,
            "Force-abandoning execution"
        );
        self.close_failed(record, reason).await
    }

    async fn close_failed(&self, record: &ExecutionRecord, reason: &str) -> Result<bool> {
        let closed = self
            .executions
            .close(record.id, ExecutionStatus::Failed, Some(reason))
            .await?;
        let steps = self.executions.fail_open_steps(record.id, reason).await?;
        info!(
            execution_id = %record.id,
            owner = ?record.owner_node_id,
            closed,
            steps,
            "Execution abandoned"
        );
        Ok(closed)
    }

    pub fn owner_of<'a>(&self, record: &'a ExecutionRecord) -> Option<&'a str> {
        record.owner_node_id.as_deref()
    }

    /// Acquire the lock for a new run, recovering it from a stale holder.
    pub async fn begin_run(&self, activation: ActivationKind) -> Result<ExecutionRecord> {
        if let Some(record) = self.try_acquire(activation).await? {
            return Ok(record);
        }

        let Some(holder) = self.current().await? else {
            // Holder finished between the two reads.
            return self
                .try_acquire(activation)
                .await?
                .ok_or_else(|| self.already_running(None));
        };

        if !self.is_stale(&holder) {
            return Err(self.already_running(Some(&holder)));
        }

        warn!(
            execution_id = %holder.id,
            owner = ?holder.owner_node_id,
            started = %holder.start_time,
            status = %holder.status,
            "Recovering lock from stale execution"
        );
        self.abandon(&holder, "abandoned: stale execution recovered")
            .await?;

        match self.try_acquire(activation).await? {
            Some(record) => Ok(record),
            None => {
                let current = self.current().await?;
                Err(self.already_running(current.as_ref()))
            }
        }
    }

    fn already_running(&self, holder: Option<&ExecutionRecord>) -> CoordinatorError {
        CoordinatorError::AlreadyRunning {
            job_name: self.job_name.clone(),
            execution_id: holder.map(|h| h.id).unwrap_or_else(Uuid::nil),
            owner: holder.and_then(|h| h.owner_node_id.clone()),
        }
    }

    pub async fn start_step(&self, record: &ExecutionRecord, step_name: &str) -> Result<StepRecord> {
        Ok(self.executions.start_step(record.id, step_name).await?)
    }

    pub async fn finish_step(
        &self,
        step: &StepRecord,
        status: ExecutionStatus,
        stats: &StageStats,
        description: Option<&str>,
    ) -> Result<()> {
        Ok(self
            .executions
            .finish_step(step.id, status, stats, description)
            .await?)
    }

    /// Record the final status of a run. Returns false when the execution
    /// had already been closed by another node.
    pub async fn finish_run(
        &self,
        record: &ExecutionRecord,
        status: ExecutionStatus,
        description: Option<&str>,
    ) -> Result<bool> {
        let closed = self.executions.close(record.id, status, description).await?;
        if closed {
            info!(execution_id = %record.id, status = %status, "Execution closed");
        } else {
            warn!(
                execution_id = %record.id,
                status = %status,
                "Execution was abandoned while running; final status not recorded"
            );
        }
        Ok(closed)
    }
}
