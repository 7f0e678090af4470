//! Mock storage implementations for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CreditorDomainStore, ExecutionStore, LedgerStore, ReconciledFlowStore, Result, SaveOutcome,
    StagingStore, StagingWrite, StorageError, Stores, TriggerMarkerStore,
};
use crate::model::{
    CreditorDomain, ExecutionRecord, ExecutionStatus, FlowDetails, FlowKey, ManualTriggerMarker,
    Payment, PaymentLookup, PaymentPosition, ReconciledFlow, RunParameters, StageStats,
    StagingFlow, StepRecord,
};

fn injected(operation: &str) -> StorageError {
    StorageError::Unavailable(format!("injected failure: {operation}"))
}

/// Consume one unit of a failure budget, returning true if the call should fail.
async fn take_failure(budget: &RwLock<u32>) -> bool {
    let mut remaining = budget.write().await;
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

/// Natural key of a finalized flow.
type ReconciledKey = (String, String, i64);

fn reconciled_key(key: &FlowKey) -> ReconciledKey {
    (key.flow_code.clone(), key.psp_id.clone(), key.revision)
}

/// Mock creditor domain store.
#[derive(Default)]
pub struct MockCreditorDomainStore {
    domains: RwLock<BTreeMap<String, CreditorDomain>>,
    fail_on_list: RwLock<bool>,
    failing_finds: RwLock<u32>,
}

impl MockCreditorDomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, domain: CreditorDomain) {
        self.domains
            .write()
            .await
            .insert(domain.domain_code.clone(), domain);
    }

    pub async fn set_fail_on_list(&self, fail: bool) {
        *self.fail_on_list.write().await = fail;
    }

    /// Make the next `count` lookups by code fail.
    pub async fn fail_next_finds(&self, count: u32) {
        *self.failing_finds.write().await = count;
    }
}

#[async_trait]
impl CreditorDomainStore for MockCreditorDomainStore {
    async fn list_acquiring(&self) -> Result<Vec<CreditorDomain>> {
        if *self.fail_on_list.read().await {
            return Err(injected("list_acquiring"));
        }
        let domains = self.domains.read().await;
        Ok(domains
            .values()
            .filter(|d| d.downloads_flows)
            .cloned()
            .collect())
    }

    async fn find(&self, domain_code: &str) -> Result<Option<CreditorDomain>> {
        if take_failure(&self.failing_finds).await {
            return Err(injected("domains.find"));
        }
        Ok(self.domains.read().await.get(domain_code).cloned())
    }
}

/// Mock staging store.
#[derive(Default)]
pub struct MockStagingStore {
    rows: RwLock<HashMap<FlowKey, StagingFlow>>,
    fail_on_insert: RwLock<bool>,
    fail_on_clear: RwLock<bool>,
    failing_lists: RwLock<u32>,
}

impl MockStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    pub async fn set_fail_on_clear(&self, fail: bool) {
        *self.fail_on_clear.write().await = fail;
    }

    /// Make the next `count` per-domain listings fail.
    pub async fn fail_next_lists(&self, count: u32) {
        *self.failing_lists.write().await = count;
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn get(&self, key: &FlowKey) -> Option<StagingFlow> {
        self.rows.read().await.get(key).cloned()
    }
}

#[async_trait]
impl StagingStore for MockStagingStore {
    async fn clear(&self) -> Result<u64> {
        if *self.fail_on_clear.read().await {
            return Err(injected("staging.clear"));
        }
        let mut rows = self.rows.write().await;
        let count = rows.len() as u64;
        rows.clear();
        Ok(count)
    }

    async fn exists(&self, key: &FlowKey) -> Result<bool> {
        Ok(self.rows.read().await.contains_key(key))
    }

    async fn insert_chunk(&self, flows: &[StagingFlow]) -> Result<StagingWrite> {
        if *self.fail_on_insert.read().await {
            return Err(injected("staging.insert_chunk"));
        }
        let mut rows = self.rows.write().await;
        let mut written = StagingWrite::default();
        for flow in flows {
            if rows.contains_key(&flow.key) {
                written.duplicates += 1;
            } else {
                rows.insert(flow.key.clone(), flow.clone());
                written.inserted += 1;
            }
        }
        Ok(written)
    }

    async fn distinct_domains(&self) -> Result<Vec<String>> {
        let rows = self.rows.read().await;
        let mut domains: Vec<_> = rows.keys().map(|k| k.domain_code.clone()).collect();
        domains.sort();
        domains.dedup();
        Ok(domains)
    }

    async fn list_for_domain(&self, domain_code: &str) -> Result<Vec<StagingFlow>> {
        if take_failure(&self.failing_lists).await {
            return Err(injected("staging.list_for_domain"));
        }
        let rows = self.rows.read().await;
        let mut flows: Vec<_> = rows
            .values()
            .filter(|f| f.key.domain_code == domain_code)
            .cloned()
            .collect();
        flows.sort_by(|a, b| {
            (a.published_at, &a.key.flow_code, &a.key.psp_id, a.key.revision).cmp(&(
                b.published_at,
                &b.key.flow_code,
                &b.key.psp_id,
                b.key.revision,
            ))
        });
        Ok(flows)
    }

    async fn update_details(&self, key: &FlowKey, details: &FlowDetails) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(key) {
            Some(row) => {
                row.details = Some(details.clone());
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("staging flow {key}"))),
        }
    }

    async fn delete(&self, key: &FlowKey) -> Result<bool> {
        Ok(self.rows.write().await.remove(key).is_some())
    }
}

/// Mock reconciled flow store.
///
/// Shares the staging store so `save_and_release` can drop the staging row
/// the way the transactional implementation does.
pub struct MockReconciledFlowStore {
    flows: RwLock<HashMap<ReconciledKey, ReconciledFlow>>,
    staging: Arc<MockStagingStore>,
    cursors: RwLock<HashMap<String, DateTime<Utc>>>,
    failing_saves: RwLock<u32>,
    failing_cursor_writes: RwLock<u32>,
}

impl MockReconciledFlowStore {
    pub fn new(staging: Arc<MockStagingStore>) -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
            staging,
            cursors: RwLock::new(HashMap::new()),
            failing_saves: RwLock::new(0),
            failing_cursor_writes: RwLock::new(0),
        }
    }

    /// Make the next `count` saves fail without writing anything.
    pub async fn fail_next_saves(&self, count: u32) {
        *self.failing_saves.write().await = count;
    }

    /// Make the next `count` cursor updates fail.
    pub async fn fail_next_cursor_writes(&self, count: u32) {
        *self.failing_cursor_writes.write().await = count;
    }

    pub async fn insert(&self, flow: ReconciledFlow) {
        self.flows
            .write()
            .await
            .insert(reconciled_key(&flow.key), flow);
    }

    pub async fn all(&self) -> Vec<ReconciledFlow> {
        let mut flows: Vec<_> = self.flows.read().await.values().cloned().collect();
        flows.sort_by(|a, b| a.published_at.cmp(&b.published_at));
        flows
    }
}

#[async_trait]
impl ReconciledFlowStore for MockReconciledFlowStore {
    async fn exists(&self, key: &FlowKey) -> Result<bool> {
        Ok(self.flows.read().await.contains_key(&reconciled_key(key)))
    }

    async fn listing_cursor(&self, domain_code: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.cursors.read().await.get(domain_code).copied())
    }

    async fn advance_listing_cursor(&self, domain_code: &str, cursor: DateTime<Utc>) -> Result<bool> {
        if take_failure(&self.failing_cursor_writes).await {
            return Err(injected("reconciled.advance_listing_cursor"));
        }
        let mut cursors = self.cursors.write().await;
        match cursors.get(domain_code) {
            Some(current) if *current >= cursor => Ok(false),
            _ => {
                cursors.insert(domain_code.to_string(), cursor);
                Ok(true)
            }
        }
    }

    async fn save_and_release(&self, flow: &ReconciledFlow) -> Result<SaveOutcome> {
        if take_failure(&self.failing_saves).await {
            return Err(injected("reconciled.save_and_release"));
        }
        let outcome = {
            let mut flows = self.flows.write().await;
            let key = reconciled_key(&flow.key);
            if flows.contains_key(&key) {
                SaveOutcome::AlreadyReconciled
            } else {
                flows.insert(key, flow.clone());
                SaveOutcome::Saved
            }
        };
        self.staging.delete(&flow.key).await?;
        Ok(outcome)
    }

    async fn find(&self, key: &FlowKey) -> Result<Option<ReconciledFlow>> {
        Ok(self.flows.read().await.get(&reconciled_key(key)).cloned())
    }
}

/// Mock ledger store.
#[derive(Default)]
pub struct MockLedgerStore {
    payments: RwLock<Vec<Payment>>,
    positions: RwLock<Vec<PaymentPosition>>,
    failing_lookups: RwLock<u32>,
}

impl MockLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_payment(&self, payment: Payment) {
        self.payments.write().await.push(payment);
    }

    pub async fn add_position(&self, position: PaymentPosition) {
        self.positions.write().await.push(position);
    }

    /// Make the next `count` payment lookups fail.
    pub async fn fail_next_lookups(&self, count: u32) {
        *self.failing_lookups.write().await = count;
    }
}

#[async_trait]
impl LedgerStore for MockLedgerStore {
    async fn find_payments(&self, lookup: &PaymentLookup) -> Result<Vec<Payment>> {
        if take_failure(&self.failing_lookups).await {
            return Err(injected("ledger.find_payments"));
        }
        let payments = self.payments.read().await;
        Ok(payments.iter().filter(|p| lookup.matches(p)).cloned().collect())
    }

    async fn find_position(&self, domain_code: &str, iuv: &str) -> Result<Option<PaymentPosition>> {
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .find(|p| p.domain_code == domain_code && p.iuv == iuv)
            .cloned())
    }
}

/// Mock execution store.
///
/// A single write lock around check-and-insert gives the same at-most-one
/// open execution guarantee as the database index.
#[derive(Default)]
pub struct MockExecutionStore {
    executions: RwLock<Vec<ExecutionRecord>>,
    steps: RwLock<Vec<StepRecord>>,
    fail_on_insert: RwLock<bool>,
}

impl MockExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_record(&self, record: ExecutionRecord) {
        self.executions.write().await.push(record);
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    pub async fn all(&self) -> Vec<ExecutionRecord> {
        self.executions.read().await.clone()
    }
}

#[async_trait]
impl ExecutionStore for MockExecutionStore {
    async fn find_open(&self, job_name: &str) -> Result<Option<ExecutionRecord>> {
        let executions = self.executions.read().await;
        Ok(executions
            .iter()
            .find(|e| e.job_name == job_name && e.is_open())
            .cloned())
    }

    async fn insert_running(
        &self,
        job_name: &str,
        owner_node_id: &str,
        parameters: &RunParameters,
    ) -> Result<Option<ExecutionRecord>> {
        if *self.fail_on_insert.read().await {
            return Err(injected("executions.insert_running"));
        }
        let mut executions = self.executions.write().await;
        if executions.iter().any(|e| e.job_name == job_name && e.is_open()) {
            return Ok(None);
        }
        let now = Utc::now();
        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            owner_node_id: Some(owner_node_id.to_string()),
            status: ExecutionStatus::Running,
            start_time: now,
            end_time: None,
            last_updated: now,
            description: None,
            parameters: parameters.clone(),
        };
        executions.push(record.clone());
        Ok(Some(record))
    }

    async fn close(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        description: Option<&str>,
    ) -> Result<bool> {
        let mut executions = self.executions.write().await;
        match executions.iter_mut().find(|e| e.id == id && e.is_open()) {
            Some(record) => {
                let now = Utc::now();
                record.status = status;
                record.end_time = Some(now);
                record.last_updated = now;
                record.description = description.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let executions = self.executions.read().await;
        Ok(executions.iter().find(|e| e.id == id).cloned())
    }

    async fn start_step(&self, execution_id: Uuid, step_name: &str) -> Result<StepRecord> {
        let step = StepRecord {
            id: Uuid::new_v4(),
            execution_id,
            step_name: step_name.to_string(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            stats: StageStats::default(),
            description: None,
        };
        self.steps.write().await.push(step.clone());
        if let Some(record) = self
            .executions
            .write()
            .await
            .iter_mut()
            .find(|e| e.id == execution_id && e.is_open())
        {
            record.last_updated = step.start_time;
        }
        Ok(step)
    }

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: ExecutionStatus,
        stats: &StageStats,
        description: Option<&str>,
    ) -> Result<()> {
        let mut steps = self.steps.write().await;
        let step = steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| StorageError::NotFound(format!("execution step {step_id}")))?;
        step.status = status;
        step.end_time = Some(Utc::now());
        step.stats = *stats;
        step.description = description.map(str::to_string);
        Ok(())
    }

    async fn fail_open_steps(&self, execution_id: Uuid, description: &str) -> Result<u64> {
        let mut steps = self.steps.write().await;
        let now = Utc::now();
        let mut count = 0;
        for step in steps
            .iter_mut()
            .filter(|s| s.execution_id == execution_id && s.end_time.is_none())
        {
            step.status = ExecutionStatus::Failed;
            step.end_time = Some(now);
            step.description = Some(description.to_string());
            count += 1;
        }
        Ok(count)
    }

    async fn steps(&self, execution_id: Uuid) -> Result<Vec<StepRecord>> {
        let steps = self.steps.read().await;
        Ok(steps
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

/// Mock trigger marker store.
#[derive(Default)]
pub struct MockTriggerMarkerStore {
    markers: RwLock<HashMap<String, ManualTriggerMarker>>,
    fail_on_touch: RwLock<bool>,
}

impl MockTriggerMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_touch(&self, fail: bool) {
        *self.fail_on_touch.write().await = fail;
    }
}

#[async_trait]
impl TriggerMarkerStore for MockTriggerMarkerStore {
    async fn get(&self, job_name: &str) -> Result<Option<ManualTriggerMarker>> {
        Ok(self.markers.read().await.get(job_name).cloned())
    }

    async fn touch(&self, job_name: &str, owner_node: &str) -> Result<ManualTriggerMarker> {
        if *self.fail_on_touch.read().await {
            return Err(injected("markers.touch"));
        }
        let marker = ManualTriggerMarker {
            job_name: job_name.to_string(),
            last_updated: Utc::now(),
            owner_node: Some(owner_node.to_string()),
        };
        self.markers
            .write()
            .await
            .insert(job_name.to_string(), marker.clone());
        Ok(marker)
    }
}

/// Concrete handles on a full set of mock stores.
///
/// Tests keep this to seed data and inspect results while the components
/// under test see the trait objects from [`MockStores::stores`].
#[derive(Clone)]
pub struct MockStores {
    pub domains: Arc<MockCreditorDomainStore>,
    pub staging: Arc<MockStagingStore>,
    pub reconciled: Arc<MockReconciledFlowStore>,
    pub ledger: Arc<MockLedgerStore>,
    pub executions: Arc<MockExecutionStore>,
    pub markers: Arc<MockTriggerMarkerStore>,
}

impl Default for MockStores {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStores {
    pub fn new() -> Self {
        let staging = Arc::new(MockStagingStore::new());
        Self {
            domains: Arc::new(MockCreditorDomainStore::new()),
            reconciled: Arc::new(MockReconciledFlowStore::new(staging.clone())),
            staging,
            ledger: Arc::new(MockLedgerStore::new()),
            executions: Arc::new(MockExecutionStore::new()),
            markers: Arc::new(MockTriggerMarkerStore::new()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            domains: self.domains.clone(),
            staging: self.staging.clone(),
            reconciled: self.reconciled.clone(),
            ledger: self.ledger.clone(),
            executions: self.executions.clone(),
            markers: self.markers.clone(),
        }
    }
}
