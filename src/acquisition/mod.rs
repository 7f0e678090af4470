//! Domain-partitioned flow acquisition.
//!
//! Two stages share the machinery in this module:
//!
//! - [`headers::HeaderAcquisition`]: a fixed pool of workers drains a
//!   per-run [`queue::DomainQueue`], lists newly published flows for each
//!   domain and stages the ones not seen before.
//! - [`details::DetailAcquisition`]: one worker per staged domain enriches,
//!   reconciles and finalizes that domain's staged flows in publication
//!   order.
//!
//! Transient upstream failures are retried with fixed backoff. A unit of
//! work (domain or flow) that still fails is skipped and counted against
//! the stage's [`SkipBudget`]; exhausting the budget fails the stage.
//!
//! Each domain keeps a listing cursor: every flow published at or before
//! it is reconciled. The cursor never passes a skipped flow, so skipped
//! flows are listed and staged again by the next run.

pub mod details;
pub mod headers;
pub mod paging;
pub mod queue;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use backon::Retryable;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::warn;

pub use details::DetailAcquisition;
pub use headers::HeaderAcquisition;
pub use queue::{DomainQueue, DomainWork};

use crate::config::AcquisitionConfig;
use crate::model::StageStats;
use crate::storage::{ReconciledFlowStore, StorageError};
use crate::utils::retry::fixed_backoff;

/// Stage-level errors. Any of these fails the stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Skip limit of {limit} exceeded in stage {stage}")]
    SkipLimitExceeded { stage: &'static str, limit: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Shared count of skipped work units for one stage execution.
#[derive(Debug)]
pub struct SkipBudget {
    stage: &'static str,
    limit: u64,
    used: AtomicU64,
}

impl SkipBudget {
    pub fn new(stage: &'static str, limit: u64) -> Self {
        Self {
            stage,
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Record one skip. Fails once more than `limit` skips have been taken.
    pub fn try_skip(&self) -> Result<(), StageError> {
        let used = self.used.fetch_add(1, Ordering::SeqCst) + 1;
        if used > self.limit {
            return Err(StageError::SkipLimitExceeded {
                stage: self.stage,
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}

/// Live counters for one stage execution, updated by every worker.
#[derive(Debug, Default)]
pub struct StageCounters {
    read: AtomicU64,
    written: AtomicU64,
    skipped_in_final: AtomicU64,
    skipped_in_staging: AtomicU64,
    errors: AtomicU64,
}

impl StageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, count: u64) {
        self.read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_written(&self, count: u64) {
        self.written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped_in_final(&self, count: u64) {
        self.skipped_in_final.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped_in_staging(&self, count: u64) {
        self.skipped_in_staging.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current counts.
    pub fn snapshot(&self) -> StageStats {
        StageStats {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            skipped_in_final: self.skipped_in_final.load(Ordering::Relaxed),
            skipped_in_staging: self.skipped_in_staging.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Wait for every worker. The first failure aborts the remaining workers
/// and is returned; their in-flight transactions roll back on drop.
pub(crate) async fn join_workers(
    stage: &'static str,
    mut workers: JoinSet<Result<(), StageError>>,
) -> Result<(), StageError> {
    let mut failure: Option<StageError> = None;

    while let Some(joined) = workers.join_next().await {
        let error = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(join_err) if join_err.is_cancelled() => continue,
            Err(join_err) => StageError::Worker(join_err.to_string()),
        };
        if failure.is_none() {
            warn!(stage, error = %error, "Worker failed, stopping stage");
            workers.abort_all();
            failure = Some(error);
        }
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Run a storage operation for `domain_code` with the stage's fixed backoff.
pub(crate) async fn retry_storage<T, F, Fut>(
    config: &AcquisitionConfig,
    domain_code: &str,
    op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    op.retry(fixed_backoff(config.retry_limit, config.retry_backoff()))
        .notify(|err: &StorageError, dur: Duration| {
            warn!(domain = %domain_code, error = %err, delay = ?dur, "Storage call failed, retrying");
        })
        .await
}

/// Move a domain's listing cursor forward to `cursor`.
///
/// A cursor left behind only makes the next listing overlap, so failures
/// are logged and not propagated.
pub(crate) async fn advance_cursor(
    reconciled: &dyn ReconciledFlowStore,
    config: &AcquisitionConfig,
    domain_code: &str,
    cursor: DateTime<Utc>,
) {
    let result = retry_storage(config, domain_code, || {
        reconciled.advance_listing_cursor(domain_code, cursor)
    })
    .await;
    if let Err(e) = result {
        warn!(domain = %domain_code, error = %e, "Listing cursor not advanced");
    }
}

#[cfg(test)]
mod tests;
