//! Shared utilities for integration tests.
//!
//! Builds a pipeline over an in-memory SQLite database and a scripted flow
//! source.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use fdr_reconciler::clients::MockFlowSource;
use fdr_reconciler::config::{AcquisitionConfig, CoordinatorConfig, StorageConfig};
use fdr_reconciler::coordinator::ExecutionCoordinator;
use fdr_reconciler::interfaces::{FlowHeader, FlowMetadata, PaymentItem};
use fdr_reconciler::model::{CreditorDomain, PaymentOutcome};
use fdr_reconciler::pipeline::Pipeline;
use fdr_reconciler::storage::sqlite::{self, SqliteCreditorDomainStore, SqliteLedgerStore};
use fdr_reconciler::storage::Stores;

pub const JOB: &str = "fdr-integration";
pub const PSP: &str = "PSP01";

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).expect("valid decimal")
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap()
}

pub fn payment(iuv: &str, iur: &str, index: Option<i64>, amount: &str) -> PaymentItem {
    PaymentItem {
        iuv: iuv.to_string(),
        iur: iur.to_string(),
        index,
        amount: dec(amount),
        outcome: PaymentOutcome::Executed,
        paid_at: Some(at(6)),
    }
}

/// Acquisition settings with negligible retry delays.
pub fn fast_acquisition() -> AcquisitionConfig {
    AcquisitionConfig {
        header_workers: 3,
        chunk_size: 2,
        retry_limit: 2,
        retry_backoff_ms: 1,
        skip_limit: 10,
    }
}

/// A node wired against a shared database and flow source.
pub struct TestNode {
    pub pool: SqlitePool,
    pub stores: Stores,
    pub source: Arc<MockFlowSource>,
    pub pipeline: Arc<Pipeline>,
}

impl TestNode {
    pub async fn new() -> Self {
        let pool = sqlite::connect(&StorageConfig::in_memory())
            .await
            .expect("Failed to connect to SQLite");
        sqlite::init_schema(&pool)
            .await
            .expect("Failed to create schema");
        Self::with_pool(pool, Arc::new(MockFlowSource::new()), "node-a")
    }

    /// Another node sharing this node's database and upstream.
    pub fn peer(&self, node_id: &str) -> Self {
        Self::with_pool(self.pool.clone(), self.source.clone(), node_id)
    }

    fn with_pool(pool: SqlitePool, source: Arc<MockFlowSource>, node_id: &str) -> Self {
        let stores = sqlite::stores(pool.clone());
        let coordinator = Arc::new(ExecutionCoordinator::new(
            stores.executions.clone(),
            node_id,
            JOB,
            &CoordinatorConfig { max_run_hours: 2 },
        ));
        let pipeline = Arc::new(Pipeline::new(
            &stores,
            source.clone(),
            coordinator,
            fast_acquisition(),
        ));
        Self {
            pool,
            stores,
            source,
            pipeline,
        }
    }

    pub async fn add_domain(&self, domain: CreditorDomain) {
        SqliteCreditorDomainStore::new(self.pool.clone())
            .upsert(&domain)
            .await
            .expect("upsert domain");
    }

    pub fn ledger(&self) -> SqliteLedgerStore {
        SqliteLedgerStore::new(self.pool.clone())
    }

    /// Publish a flow whose declared totals match its payments.
    pub async fn publish(
        &self,
        domain: &str,
        flow_code: &str,
        published: DateTime<Utc>,
        payments: Vec<PaymentItem>,
    ) {
        let sum: Decimal = payments.iter().map(|p| p.amount).sum();
        self.publish_declaring(domain, flow_code, published, payments.len() as i64, sum, payments)
            .await;
    }

    pub async fn publish_declaring(
        &self,
        domain: &str,
        flow_code: &str,
        published: DateTime<Utc>,
        declared_count: i64,
        declared_sum: Decimal,
        payments: Vec<PaymentItem>,
    ) {
        let header = FlowHeader {
            flow_code: flow_code.to_string(),
            psp_id: PSP.to_string(),
            revision: 1,
            published,
        };
        let metadata = FlowMetadata {
            flow_code: flow_code.to_string(),
            psp_id: PSP.to_string(),
            revision: 1,
            flow_date: Some(published),
            settlement_id: Some(format!("SETTLE-{flow_code}")),
            settlement_date: None,
            sender: None,
            receiver: None,
            status: Some("PUBLISHED".to_string()),
            tot_payments: Some(declared_count),
            sum_payments: Some(declared_sum),
        };
        self.source.publish(domain, header, metadata, payments).await;
    }
}
