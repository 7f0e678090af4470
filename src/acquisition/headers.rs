//! Header acquisition stage.

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::paging::collect_pages;
use super::{advance_cursor, join_workers, DomainQueue, DomainWork, SkipBudget, StageCounters, StageError};
use crate::config::AcquisitionConfig;
use crate::interfaces::{operation, FlowHeader, FlowSource, FlowSourceError};
use crate::model::{FlowKey, StagingFlow};
use crate::storage::{CreditorDomainStore, ReconciledFlowStore, StagingStore};
use crate::utils::retry::fixed_backoff;

pub const STAGE_NAME: &str = "header-acquisition";

/// Lists newly published flows for every acquiring domain and stages them.
#[derive(Clone)]
pub struct HeaderAcquisition {
    source: Arc<dyn FlowSource>,
    domains: Arc<dyn CreditorDomainStore>,
    staging: Arc<dyn StagingStore>,
    reconciled: Arc<dyn ReconciledFlowStore>,
    config: AcquisitionConfig,
}

impl HeaderAcquisition {
    pub fn new(
        source: Arc<dyn FlowSource>,
        domains: Arc<dyn CreditorDomainStore>,
        staging: Arc<dyn StagingStore>,
        reconciled: Arc<dyn ReconciledFlowStore>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            source,
            domains,
            staging,
            reconciled,
            config,
        }
    }

    /// Build the queue of domains for this run.
    async fn build_queue(&self) -> Result<DomainQueue, StageError> {
        let domains = self.domains.list_acquiring().await?;
        let mut entries = Vec::with_capacity(domains.len());
        for domain in domains {
            let since = self.reconciled.listing_cursor(&domain.domain_code).await?;
            entries.push(DomainWork { domain, since });
        }
        Ok(DomainQueue::new(entries))
    }

    #[tracing::instrument(name = "stage.headers", skip_all)]
    pub async fn run(&self, counters: Arc<StageCounters>) -> Result<(), StageError> {
        let queue = Arc::new(self.build_queue().await?);
        let budget = Arc::new(SkipBudget::new(STAGE_NAME, self.config.skip_limit));
        let domain_count = queue.len().await;

        info!(
            domains = domain_count,
            workers = self.config.header_workers,
            "Header acquisition started"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.header_workers.min(domain_count.max(1)) {
            let this = self.clone();
            let queue = queue.clone();
            let budget = budget.clone();
            let counters = counters.clone();
            workers.spawn(async move { this.worker(worker_id, &queue, &budget, &counters).await });
        }

        join_workers(STAGE_NAME, workers).await?;

        let stats = counters.snapshot();
        info!(
            read = stats.read,
            staged = stats.written,
            skipped_in_final = stats.skipped_in_final,
            skipped_in_staging = stats.skipped_in_staging,
            skipped_domains = budget.used(),
            "Header acquisition finished"
        );
        Ok(())
    }

    async fn worker(
        &self,
        worker_id: usize,
        queue: &DomainQueue,
        budget: &SkipBudget,
        counters: &StageCounters,
    ) -> Result<(), StageError> {
        while let Some(work) = queue.pop().await {
            let code = work.domain.domain_code.as_str();
            match self.fetch_headers(&work).await {
                Ok(headers) => self.stage_headers(code, headers, counters).await?,
                Err(e) => {
                    counters.add_error();
                    warn!(worker_id, domain = %code, error = %e, "Skipping domain");
                    budget.try_skip()?;
                }
            }
        }
        debug!(worker_id, "Header worker drained queue");
        Ok(())
    }

    async fn fetch_headers(&self, work: &DomainWork) -> Result<Vec<FlowHeader>, FlowSourceError> {
        let code = work.domain.domain_code.as_str();
        let since = work.since;

        (|| async {
            collect_pages(operation::LIST_FLOWS, |page| self.source.list_flows(code, since, page)).await
        })
        .retry(fixed_backoff(self.config.retry_limit, self.config.retry_backoff()))
        .when(FlowSourceError::is_transient)
        .notify(|err: &FlowSourceError, dur: Duration| {
            warn!(domain = %code, error = %err, delay = ?dur, "Listing failed, retrying");
        })
        .await
    }

    /// Stage every header not already reconciled or staged. Storage
    /// failures here are fatal for the stage.
    ///
    /// When every listed flow is already reconciled the domain's cursor
    /// moves up to the newest of them.
    async fn stage_headers(
        &self,
        domain_code: &str,
        headers: Vec<FlowHeader>,
        counters: &StageCounters,
    ) -> Result<(), StageError> {
        counters.add_read(headers.len() as u64);
        let newest = headers.iter().map(|h| h.published).max();

        let mut candidates = Vec::with_capacity(headers.len());
        let mut in_staging = 0;
        for header in headers {
            let key = FlowKey::new(domain_code, header.flow_code, header.psp_id, header.revision);
            if self.reconciled.exists(&key).await? {
                counters.add_skipped_in_final(1);
                continue;
            }
            if self.staging.exists(&key).await? {
                counters.add_skipped_in_staging(1);
                in_staging += 1;
                continue;
            }
            candidates.push(StagingFlow::new(key, header.published));
        }

        if candidates.is_empty() && in_staging == 0 {
            if let Some(newest) = newest {
                advance_cursor(self.reconciled.as_ref(), &self.config, domain_code, newest).await;
            }
        }

        let mut staged = 0;
        for chunk in candidates.chunks(self.config.chunk_size) {
            let written = self.staging.insert_chunk(chunk).await?;
            counters.add_written(written.inserted);
            counters.add_skipped_in_staging(written.duplicates);
            staged += written.inserted;
        }

        debug!(domain = %domain_code, staged, "Domain headers staged");
        Ok(())
    }
}
