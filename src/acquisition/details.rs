//! Metadata and payment acquisition with reconciliation.
//!
//! Work is partitioned by the domains present in staging when the stage
//! starts. Each partition runs in its own task and handles its flows one at
//! a time, oldest publication first.

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::paging::collect_pages;
use super::{advance_cursor, join_workers, retry_storage, SkipBudget, StageCounters, StageError};
use crate::config::AcquisitionConfig;
use crate::interfaces::{operation, FlowSource, FlowSourceError};
use crate::model::{CreditorDomain, FlowDetails, StagingFlow};
use crate::reconciliation::{ReconcileError, ReconciliationEngine};
use crate::storage::{
    CreditorDomainStore, ReconciledFlowStore, SaveOutcome, StagingStore, StorageError,
};
use crate::utils::retry::fixed_backoff;

pub const STAGE_NAME: &str = "detail-acquisition";

/// Failure while processing a single staged flow.
#[derive(Debug, thiserror::Error)]
enum FlowError {
    #[error(transparent)]
    Upstream(#[from] FlowSourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl FlowError {
    /// Storage failures are retried alongside transient upstream failures;
    /// a dropped connection outside pagination is also worth another try.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_transient() || e.is_empty_reply(),
            Self::Storage(_) | Self::Reconcile(_) => true,
        }
    }
}

/// Enriches, reconciles and finalizes staged flows.
#[derive(Clone)]
pub struct DetailAcquisition {
    source: Arc<dyn FlowSource>,
    domains: Arc<dyn CreditorDomainStore>,
    staging: Arc<dyn StagingStore>,
    reconciled: Arc<dyn ReconciledFlowStore>,
    engine: Arc<ReconciliationEngine>,
    config: AcquisitionConfig,
}

impl DetailAcquisition {
    pub fn new(
        source: Arc<dyn FlowSource>,
        domains: Arc<dyn CreditorDomainStore>,
        staging: Arc<dyn StagingStore>,
        reconciled: Arc<dyn ReconciledFlowStore>,
        engine: Arc<ReconciliationEngine>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            source,
            domains,
            staging,
            reconciled,
            engine,
            config,
        }
    }

    #[tracing::instrument(name = "stage.details", skip_all)]
    pub async fn run(&self, counters: Arc<StageCounters>) -> Result<(), StageError> {
        let partitions = self.staging.distinct_domains().await?;
        let budget = Arc::new(SkipBudget::new(STAGE_NAME, self.config.skip_limit));

        info!(partitions = partitions.len(), "Detail acquisition started");

        let mut workers = JoinSet::new();
        for domain_code in partitions {
            let this = self.clone();
            let budget = budget.clone();
            let counters = counters.clone();
            workers.spawn(async move { this.partition(&domain_code, &budget, &counters).await });
        }

        join_workers(STAGE_NAME, workers).await?;

        let stats = counters.snapshot();
        info!(
            read = stats.read,
            reconciled = stats.written,
            already_reconciled = stats.skipped_in_final,
            skipped_flows = budget.used(),
            "Detail acquisition finished"
        );
        Ok(())
    }

    /// Process one domain's staged flows, oldest first.
    ///
    /// Storage reads are retried; a partition whose flows or domain cannot
    /// be read is skipped and leaves the domain's cursor where it was.
    async fn partition(
        &self,
        domain_code: &str,
        budget: &SkipBudget,
        counters: &StageCounters,
    ) -> Result<(), StageError> {
        let flows = match retry_storage(&self.config, domain_code, || {
            self.staging.list_for_domain(domain_code)
        })
        .await
        {
            Ok(flows) => flows,
            Err(e) => {
                counters.add_error();
                warn!(domain = %domain_code, error = %e, "Staged flows unreadable, skipping partition");
                return budget.try_skip();
            }
        };
        let Some(newest) = flows.iter().map(|f| f.published_at).max() else {
            return Ok(());
        };

        let domain = match retry_storage(&self.config, domain_code, || self.domains.find(domain_code)).await {
            Ok(Some(domain)) => domain,
            Ok(None) => {
                warn!(domain = %domain_code, flows = flows.len(), "Unknown creditor domain, skipping its flows");
                return skip_all(&flows, budget, counters);
            }
            Err(e) => {
                warn!(domain = %domain_code, error = %e, "Creditor domain lookup failed, skipping its flows");
                return skip_all(&flows, budget, counters);
            }
        };

        debug!(domain = %domain_code, flows = flows.len(), "Partition started");

        let mut first_skipped: Option<DateTime<Utc>> = None;
        for staged in &flows {
            counters.add_read(1);
            match self.process_with_retry(&domain, staged).await {
                Ok(SaveOutcome::Saved) => counters.add_written(1),
                Ok(SaveOutcome::AlreadyReconciled) => {
                    debug!(flow = %staged.key, "Flow already reconciled, staging row released");
                    counters.add_skipped_in_final(1);
                }
                Err(e) => {
                    counters.add_error();
                    warn!(flow = %staged.key, error = %e, "Skipping flow, staging row kept");
                    if first_skipped.is_none() {
                        first_skipped = Some(staged.published_at);
                    }
                    budget.try_skip()?;
                }
            }
        }

        // Stop just short of the oldest skipped flow so it is listed again.
        let cursor = match first_skipped {
            Some(skipped) => skipped - chrono::Duration::microseconds(1),
            None => newest,
        };
        advance_cursor(self.reconciled.as_ref(), &self.config, domain_code, cursor).await;
        Ok(())
    }

    async fn process_with_retry(
        &self,
        domain: &CreditorDomain,
        staged: &StagingFlow,
    ) -> Result<SaveOutcome, FlowError> {
        (|| async { self.process(domain, staged).await })
            .retry(fixed_backoff(self.config.retry_limit, self.config.retry_backoff()))
            .when(FlowError::is_retryable)
            .notify(|err: &FlowError, dur: Duration| {
                warn!(flow = %staged.key, error = %err, delay = ?dur, "Flow processing failed, retrying");
            })
            .await
    }

    async fn process(
        &self,
        domain: &CreditorDomain,
        staged: &StagingFlow,
    ) -> Result<SaveOutcome, FlowError> {
        let key = &staged.key;

        let metadata = self
            .source
            .get_flow_details(&key.domain_code, &key.flow_code, key.revision, &key.psp_id)
            .await?;
        let details = FlowDetails::from(metadata);
        self.staging.update_details(key, &details).await?;

        let payments = collect_pages(operation::GET_PAYMENTS, |page| {
            self.source
                .get_payments(&key.domain_code, &key.flow_code, key.revision, &key.psp_id, page)
        })
        .await?;

        let flow = self
            .engine
            .reconcile(Some(domain), staged, details, payments)
            .await?;
        let outcome = self.reconciled.save_and_release(&flow).await?;

        debug!(flow = %key, status = flow.status.as_str(), items = flow.items.len(), "Flow reconciled");
        Ok(outcome)
    }
}

/// Skip every flow of a partition that cannot be processed at all.
fn skip_all(flows: &[StagingFlow], budget: &SkipBudget, counters: &StageCounters) -> Result<(), StageError> {
    for _ in flows {
        counters.add_read(1);
        counters.add_error();
        budget.try_skip()?;
    }
    Ok(())
}
