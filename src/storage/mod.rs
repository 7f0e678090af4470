//! Persistence contracts and implementations.
//!
//! Each store trait covers one table family. All mutating operations that
//! touch several rows are transactional in the concrete implementations.
//!
//! # Implementations
//!
//! - `sqlite`: sqlx + sea-query on SQLite
//! - `mock`: in-memory stores for testing

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::model::{
    CreditorDomain, ExecutionRecord, ExecutionStatus, FlowDetails, FlowKey, ManualTriggerMarker,
    Payment, PaymentLookup, PaymentPosition, ReconciledFlow, RunParameters, StageStats,
    StagingFlow, StepRecord,
};

pub mod mock;
pub mod schema;
pub mod sqlite;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: String },

    #[error("Invalid amount in column {column}: {value}")]
    InvalidAmount { column: &'static str, value: String },

    #[error("Invalid value in column {column}: {message}")]
    InvalidValue { column: &'static str, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Outcome of writing a chunk of staging rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingWrite {
    pub inserted: u64,
    /// Rows whose natural key already existed.
    pub duplicates: u64,
}

/// Outcome of persisting a reconciled flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// A flow with the same natural key was already finalized; nothing written.
    AlreadyReconciled,
}

/// Creditor domain reference data.
#[async_trait]
pub trait CreditorDomainStore: Send + Sync {
    /// Domains that opted in to flow acquisition, ordered by code.
    async fn list_acquiring(&self) -> Result<Vec<CreditorDomain>>;

    async fn find(&self, domain_code: &str) -> Result<Option<CreditorDomain>>;
}

/// Transient staging of discovered flows.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Delete every staging row in a single transaction. Returns the count.
    async fn clear(&self) -> Result<u64>;

    async fn exists(&self, key: &FlowKey) -> Result<bool>;

    /// Insert a chunk in one transaction, skipping rows whose key exists.
    async fn insert_chunk(&self, flows: &[StagingFlow]) -> Result<StagingWrite>;

    /// Distinct domain codes currently staged.
    async fn distinct_domains(&self) -> Result<Vec<String>>;

    /// Staged flows for a domain, by publication time ascending.
    async fn list_for_domain(&self, domain_code: &str) -> Result<Vec<StagingFlow>>;

    /// Store enrichment metadata on an existing row.
    async fn update_details(&self, key: &FlowKey, details: &FlowDetails) -> Result<()>;

    async fn delete(&self, key: &FlowKey) -> Result<bool>;
}

/// Finalized flows and their items.
#[async_trait]
pub trait ReconciledFlowStore: Send + Sync {
    /// True if `(flow_code, psp_id, revision)` is already finalized.
    async fn exists(&self, key: &FlowKey) -> Result<bool>;

    /// Publication time the next listing for the domain starts after.
    ///
    /// Every flow of the domain published at or before the cursor has been
    /// reconciled. `None` means the domain must be listed in full.
    async fn listing_cursor(&self, domain_code: &str) -> Result<Option<DateTime<Utc>>>;

    /// Move the domain's cursor forward to `cursor`. A cursor already at or
    /// past `cursor` is left as is. Returns true if the cursor moved.
    async fn advance_listing_cursor(&self, domain_code: &str, cursor: DateTime<Utc>) -> Result<bool>;

    /// Persist the flow with its items and delete the staging row, atomically.
    ///
    /// If the flow already exists nothing is inserted, the staging row is
    /// still released, and [`SaveOutcome::AlreadyReconciled`] is returned.
    async fn save_and_release(&self, flow: &ReconciledFlow) -> Result<SaveOutcome>;

    async fn find(&self, key: &FlowKey) -> Result<Option<ReconciledFlow>>;
}

/// Local ledger lookups.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_payments(&self, lookup: &PaymentLookup) -> Result<Vec<Payment>>;

    async fn find_position(&self, domain_code: &str, iuv: &str) -> Result<Option<PaymentPosition>>;
}

/// Execution coordination rows.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// The open (lock-holding) execution for `job_name`, if any.
    async fn find_open(&self, job_name: &str) -> Result<Option<ExecutionRecord>>;

    /// Create a RUNNING execution unless another open one exists.
    ///
    /// Atomic: of several concurrent callers at most one gets `Some`.
    async fn insert_running(
        &self,
        job_name: &str,
        owner_node_id: &str,
        parameters: &RunParameters,
    ) -> Result<Option<ExecutionRecord>>;

    /// Close an execution if it is still open. Returns false if it was
    /// already closed (for instance, abandoned by another node).
    async fn close(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        description: Option<&str>,
    ) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>>;

    async fn start_step(&self, execution_id: Uuid, step_name: &str) -> Result<StepRecord>;

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: ExecutionStatus,
        stats: &StageStats,
        description: Option<&str>,
    ) -> Result<()>;

    /// Mark every still-open step of an execution FAILED. Returns the count.
    async fn fail_open_steps(&self, execution_id: Uuid, description: &str) -> Result<u64>;

    async fn steps(&self, execution_id: Uuid) -> Result<Vec<StepRecord>>;
}

/// Shared manual-trigger marker rows.
#[async_trait]
pub trait TriggerMarkerStore: Send + Sync {
    async fn get(&self, job_name: &str) -> Result<Option<ManualTriggerMarker>>;

    /// Advance the marker to now, creating it if needed.
    async fn touch(&self, job_name: &str, owner_node: &str) -> Result<ManualTriggerMarker>;
}

/// Bundle of all stores, injected into the pipeline components.
#[derive(Clone)]
pub struct Stores {
    pub domains: Arc<dyn CreditorDomainStore>,
    pub staging: Arc<dyn StagingStore>,
    pub reconciled: Arc<dyn ReconciledFlowStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub markers: Arc<dyn TriggerMarkerStore>,
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> std::result::Result<Stores, StorageError> {
    info!(url = %config.url, "Initializing storage");

    let pool = sqlite::connect(config).await?;
    sqlite::init_schema(&pool).await?;

    Ok(sqlite::stores(pool))
}
