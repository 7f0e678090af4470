use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use super::*;
use crate::clients::MockFlowSource;
use crate::config::AcquisitionConfig;
use crate::interfaces::{FlowHeader, FlowMetadata, FlowSourceError, PaymentItem};
use crate::model::{
    AuxDigit, CreditorDomain, FlowDetails, FlowKey, FlowStatus, PaymentOutcome, ReconciledFlow,
    StagingFlow,
};
use crate::reconciliation::ReconciliationEngine;
use crate::storage::mock::MockStores;
use crate::storage::{ReconciledFlowStore, StagingStore};

const DOMAIN_A: &str = "11111111111";
const DOMAIN_B: &str = "22222222222";
const PSP: &str = "PSP01";

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
}

fn fast_config() -> AcquisitionConfig {
    AcquisitionConfig {
        header_workers: 2,
        chunk_size: 2,
        retry_limit: 2,
        retry_backoff_ms: 1,
        skip_limit: 10,
    }
}

fn header(flow_code: &str, published: DateTime<Utc>) -> FlowHeader {
    FlowHeader {
        flow_code: flow_code.to_string(),
        psp_id: PSP.to_string(),
        revision: 1,
        published,
    }
}

fn metadata(flow_code: &str, count: i64, sum: &str) -> FlowMetadata {
    FlowMetadata {
        flow_code: flow_code.to_string(),
        psp_id: PSP.to_string(),
        revision: 1,
        flow_date: None,
        settlement_id: Some(format!("SETTLE-{flow_code}")),
        settlement_date: None,
        sender: None,
        receiver: None,
        status: Some("PUBLISHED".to_string()),
        tot_payments: Some(count),
        sum_payments: Some(Decimal::from_str(sum).unwrap()),
    }
}

fn external_payment(iur: &str, amount: &str) -> PaymentItem {
    PaymentItem {
        iuv: "RF00EXTERNAL".to_string(),
        iur: iur.to_string(),
        index: Some(1),
        amount: Decimal::from_str(amount).unwrap(),
        outcome: PaymentOutcome::Executed,
        paid_at: None,
    }
}

fn key(domain: &str, flow_code: &str) -> FlowKey {
    FlowKey::new(domain, flow_code, PSP, 1)
}

fn reconciled(domain: &str, flow_code: &str, published: DateTime<Utc>) -> ReconciledFlow {
    ReconciledFlow {
        key: key(domain, flow_code),
        published_at: published,
        details: FlowDetails::default(),
        status: FlowStatus::Accepted,
        anomaly: None,
        reconciled_at: published,
        items: vec![],
    }
}

async fn seeded_stores(domains: &[&str]) -> MockStores {
    let stores = MockStores::new();
    for code in domains {
        stores
            .domains
            .insert(CreditorDomain::new(*code, AuxDigit::Single))
            .await;
    }
    stores
}

fn header_stage(stores: &MockStores, source: &Arc<MockFlowSource>, config: AcquisitionConfig) -> HeaderAcquisition {
    HeaderAcquisition::new(
        source.clone(),
        stores.domains.clone(),
        stores.staging.clone(),
        stores.reconciled.clone(),
        config,
    )
}

fn detail_stage(stores: &MockStores, source: &Arc<MockFlowSource>, config: AcquisitionConfig) -> DetailAcquisition {
    DetailAcquisition::new(
        source.clone(),
        stores.domains.clone(),
        stores.staging.clone(),
        stores.reconciled.clone(),
        Arc::new(ReconciliationEngine::new(stores.ledger.clone())),
        config,
    )
}

// ============================================================================
// Shared machinery
// ============================================================================

#[test]
fn test_skip_budget_allows_up_to_limit() {
    let budget = SkipBudget::new("stage", 2);
    assert!(budget.try_skip().is_ok());
    assert!(budget.try_skip().is_ok());
    let err = budget.try_skip().unwrap_err();
    assert!(matches!(err, StageError::SkipLimitExceeded { stage: "stage", limit: 2 }));
    assert_eq!(budget.used(), 3);
}

#[test]
fn test_skip_budget_zero_fails_first_skip() {
    let budget = SkipBudget::new("stage", 0);
    assert!(budget.try_skip().is_err());
}

#[test]
fn test_counters_snapshot() {
    let counters = StageCounters::new();
    counters.add_read(5);
    counters.add_written(3);
    counters.add_skipped_in_final(1);
    counters.add_skipped_in_staging(1);
    counters.add_error();

    let stats = counters.snapshot();
    assert_eq!(stats.read, 5);
    assert_eq!(stats.written, 3);
    assert_eq!(stats.skipped_in_final, 1);
    assert_eq!(stats.skipped_in_staging, 1);
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn test_join_workers_reports_first_failure() {
    let mut workers: JoinSet<Result<(), StageError>> = JoinSet::new();
    workers.spawn(async { Ok(()) });
    workers.spawn(async { Err(StageError::Worker("boom".to_string())) });
    workers.spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(())
    });

    let result = join_workers("stage", workers).await;
    assert!(matches!(result, Err(StageError::Worker(msg)) if msg == "boom"));
}

// ============================================================================
// Header acquisition
// ============================================================================

#[tokio::test]
async fn test_headers_stage_new_flows() {
    let stores = seeded_stores(&[DOMAIN_A, DOMAIN_B]).await;
    let source = Arc::new(MockFlowSource::with_page_size(2));
    for (i, code) in ["F1", "F2", "F3"].iter().enumerate() {
        source
            .publish(DOMAIN_A, header(code, at(i as u32 + 1)), metadata(code, 0, "0"), vec![])
            .await;
    }
    source
        .publish(DOMAIN_B, header("G1", at(1)), metadata("G1", 0, "0"), vec![])
        .await;

    let counters = Arc::new(StageCounters::new());
    header_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.read, 4);
    assert_eq!(stats.written, 4);
    assert_eq!(stats.errors, 0);
    assert_eq!(stores.staging.len().await, 4);
    // Three headers in pages of two.
    assert_eq!(source.list_calls(DOMAIN_A).await, 2);
}

#[tokio::test]
async fn test_headers_skip_reconciled_and_staged() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    for (i, code) in ["F1", "F2", "F3"].iter().enumerate() {
        source
            .publish(DOMAIN_A, header(code, at(i as u32 + 1)), metadata(code, 0, "0"), vec![])
            .await;
    }
    stores
        .staging
        .insert_chunk(&[StagingFlow::new(key(DOMAIN_A, "F3"), at(3))])
        .await
        .unwrap();
    // Reconciled with an older publication so the listing still returns F2.
    stores.reconciled.insert(reconciled(DOMAIN_A, "F2", at(0))).await;

    let counters = Arc::new(StageCounters::new());
    header_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.read, 3);
    assert_eq!(stats.written, 1);
    assert_eq!(stats.skipped_in_final, 1);
    assert_eq!(stats.skipped_in_staging, 1);
    assert!(stores.staging.get(&key(DOMAIN_A, "F1")).await.is_some());
    assert!(stores.staging.get(&key(DOMAIN_A, "F2")).await.is_none());
}

#[tokio::test]
async fn test_headers_list_after_cursor() {
    let stores = seeded_stores(&[DOMAIN_A, DOMAIN_B]).await;
    stores
        .reconciled
        .advance_listing_cursor(DOMAIN_A, at(5))
        .await
        .unwrap();

    let source = Arc::new(MockFlowSource::new());
    source
        .publish(DOMAIN_A, header("OLDER", at(4)), metadata("OLDER", 0, "0"), vec![])
        .await;
    source
        .publish(DOMAIN_A, header("NEWER", at(6)), metadata("NEWER", 0, "0"), vec![])
        .await;

    let counters = Arc::new(StageCounters::new());
    header_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(source.last_since(DOMAIN_A).await, Some(Some(at(5))));
    assert_eq!(source.last_since(DOMAIN_B).await, Some(None));
    assert_eq!(stores.staging.len().await, 1);
    assert!(stores.staging.get(&key(DOMAIN_A, "NEWER")).await.is_some());
}

#[tokio::test]
async fn test_headers_advance_cursor_when_nothing_new() {
    let stores = seeded_stores(&[DOMAIN_A, DOMAIN_B]).await;
    let source = Arc::new(MockFlowSource::new());
    for (code, hour) in [("F1", 1), ("F2", 2)] {
        source
            .publish(DOMAIN_A, header(code, at(hour)), metadata(code, 0, "0"), vec![])
            .await;
        stores.reconciled.insert(reconciled(DOMAIN_A, code, at(hour))).await;
    }
    source
        .publish(DOMAIN_B, header("G1", at(3)), metadata("G1", 0, "0"), vec![])
        .await;

    header_stage(&stores, &source, fast_config())
        .run(Arc::new(StageCounters::new()))
        .await
        .unwrap();

    assert_eq!(stores.reconciled.listing_cursor(DOMAIN_A).await.unwrap(), Some(at(2)));
    // Staged flows move the cursor only once they are reconciled.
    assert_eq!(stores.reconciled.listing_cursor(DOMAIN_B).await.unwrap(), None);
}

#[tokio::test]
async fn test_headers_retry_transient_listing() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    source
        .publish(DOMAIN_A, header("F1", at(1)), metadata("F1", 0, "0"), vec![])
        .await;
    source
        .fail_listing(
            DOMAIN_A,
            vec![
                FlowSourceError::transient("listFlows", "503"),
                FlowSourceError::transient("listFlows", "timeout"),
            ],
        )
        .await;

    let counters = Arc::new(StageCounters::new());
    header_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(source.list_calls(DOMAIN_A).await, 3);
    assert_eq!(counters.snapshot().written, 1);
    assert_eq!(counters.snapshot().errors, 0);
}

#[tokio::test]
async fn test_headers_skip_domain_after_retries_exhausted() {
    let stores = seeded_stores(&[DOMAIN_A, DOMAIN_B]).await;
    let source = Arc::new(MockFlowSource::new());
    source
        .publish(DOMAIN_B, header("G1", at(1)), metadata("G1", 0, "0"), vec![])
        .await;
    source
        .fail_listing(
            DOMAIN_A,
            (0..3).map(|_| FlowSourceError::transient("listFlows", "503")).collect(),
        )
        .await;

    let counters = Arc::new(StageCounters::new());
    header_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    // One initial attempt plus two retries.
    assert_eq!(source.list_calls(DOMAIN_A).await, 3);
    let stats = counters.snapshot();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.written, 1);
}

#[tokio::test]
async fn test_headers_permanent_failure_not_retried() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    source
        .fail_listing(DOMAIN_A, vec![FlowSourceError::permanent("listFlows", "400")])
        .await;

    let counters = Arc::new(StageCounters::new());
    header_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(source.list_calls(DOMAIN_A).await, 1);
    assert_eq!(counters.snapshot().errors, 1);
}

#[tokio::test]
async fn test_headers_skip_limit_fails_stage() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    source
        .fail_listing(DOMAIN_A, vec![FlowSourceError::permanent("listFlows", "400")])
        .await;

    let config = AcquisitionConfig {
        skip_limit: 0,
        ..fast_config()
    };
    let result = header_stage(&stores, &source, config)
        .run(Arc::new(StageCounters::new()))
        .await;

    assert!(matches!(
        result,
        Err(StageError::SkipLimitExceeded { stage: headers::STAGE_NAME, limit: 0 })
    ));
}

#[tokio::test]
async fn test_headers_storage_failure_is_fatal() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    source
        .publish(DOMAIN_A, header("F1", at(1)), metadata("F1", 0, "0"), vec![])
        .await;
    stores.staging.set_fail_on_insert(true).await;

    let result = header_stage(&stores, &source, fast_config())
        .run(Arc::new(StageCounters::new()))
        .await;

    assert!(matches!(result, Err(StageError::Storage(_))));
}

#[tokio::test]
async fn test_headers_no_domains() {
    let stores = MockStores::new();
    let source = Arc::new(MockFlowSource::new());

    let counters = Arc::new(StageCounters::new());
    header_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(counters.snapshot(), Default::default());
}

// ============================================================================
// Detail acquisition
// ============================================================================

async fn publish_and_stage(
    stores: &MockStores,
    source: &MockFlowSource,
    domain: &str,
    flow_code: &str,
    published: DateTime<Utc>,
) {
    source
        .publish(
            domain,
            header(flow_code, published),
            metadata(flow_code, 1, "10.00"),
            vec![external_payment(&format!("IUR-{flow_code}"), "10.00")],
        )
        .await;
    stores
        .staging
        .insert_chunk(&[StagingFlow::new(key(domain, flow_code), published)])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_details_reconcile_and_release_staging() {
    let stores = seeded_stores(&[DOMAIN_A, DOMAIN_B]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F2", at(2)).await;
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    publish_and_stage(&stores, &source, DOMAIN_B, "G1", at(3)).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.read, 3);
    assert_eq!(stats.written, 3);
    assert_eq!(stores.staging.len().await, 0);

    let flows = stores.reconciled.all().await;
    assert_eq!(flows.len(), 3);
    let f1 = stores.reconciled.find(&key(DOMAIN_A, "F1")).await.unwrap().unwrap();
    assert_eq!(f1.status, FlowStatus::Accepted);
    assert_eq!(f1.items.len(), 1);
    assert_eq!(f1.details.settlement_id.as_deref(), Some("SETTLE-F1"));
}

#[tokio::test]
async fn test_details_already_reconciled_releases_staging() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    stores.reconciled.insert(reconciled(DOMAIN_A, "F1", at(1))).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.written, 0);
    assert_eq!(stats.skipped_in_final, 1);
    assert_eq!(stores.staging.len().await, 0);
    // The earlier verdict is kept.
    let kept = stores.reconciled.find(&key(DOMAIN_A, "F1")).await.unwrap().unwrap();
    assert!(kept.items.is_empty());
}

#[tokio::test]
async fn test_details_retry_transient_failure() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    source
        .fail_details(
            &key(DOMAIN_A, "F1"),
            vec![
                FlowSourceError::transient("getFlowDetails", "502"),
                FlowSourceError::empty_reply("getFlowDetails"),
            ],
        )
        .await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(source.detail_calls(&key(DOMAIN_A, "F1")).await, 3);
    assert_eq!(counters.snapshot().written, 1);
}

#[tokio::test]
async fn test_details_retry_failed_save() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    stores.reconciled.fail_next_saves(1).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(counters.snapshot().written, 1);
    assert_eq!(counters.snapshot().errors, 0);
    assert_eq!(stores.staging.len().await, 0);
}

#[tokio::test]
async fn test_details_permanent_failure_keeps_staging_row() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    publish_and_stage(&stores, &source, DOMAIN_A, "F2", at(2)).await;
    source
        .fail_details(
            &key(DOMAIN_A, "F1"),
            vec![FlowSourceError::permanent("getFlowDetails", "404")],
        )
        .await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.read, 2);
    assert_eq!(stats.written, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(source.detail_calls(&key(DOMAIN_A, "F1")).await, 1);
    assert!(stores.staging.get(&key(DOMAIN_A, "F1")).await.is_some());
    assert!(stores.reconciled.find(&key(DOMAIN_A, "F2")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_details_unknown_domain_skipped() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    publish_and_stage(&stores, &source, DOMAIN_B, "G1", at(1)).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.read, 2);
    assert_eq!(stats.written, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(source.detail_calls(&key(DOMAIN_B, "G1")).await, 0);
    assert!(stores.staging.get(&key(DOMAIN_B, "G1")).await.is_some());
}

#[tokio::test]
async fn test_details_skip_limit_fails_stage() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    publish_and_stage(&stores, &source, DOMAIN_A, "F2", at(2)).await;
    for code in ["F1", "F2"] {
        source
            .fail_details(
                &key(DOMAIN_A, code),
                vec![FlowSourceError::permanent("getFlowDetails", "404")],
            )
            .await;
    }

    let config = AcquisitionConfig {
        skip_limit: 1,
        ..fast_config()
    };
    let result = detail_stage(&stores, &source, config)
        .run(Arc::new(StageCounters::new()))
        .await;

    assert!(matches!(
        result,
        Err(StageError::SkipLimitExceeded { stage: details::STAGE_NAME, limit: 1 })
    ));
}

#[tokio::test]
async fn test_details_declared_mismatch_marks_flow_anomalous() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    source
        .publish(
            DOMAIN_A,
            header("F1", at(1)),
            metadata("F1", 2, "25.00"),
            vec![external_payment("IUR-1", "10.00")],
        )
        .await;
    stores
        .staging
        .insert_chunk(&[StagingFlow::new(key(DOMAIN_A, "F1"), at(1))])
        .await
        .unwrap();

    detail_stage(&stores, &source, fast_config())
        .run(Arc::new(StageCounters::new()))
        .await
        .unwrap();

    let flow = stores.reconciled.find(&key(DOMAIN_A, "F1")).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Anomalous);
    assert_eq!(flow.anomaly.as_deref(), Some("007106|007107"));
}

#[tokio::test]
async fn test_details_pages_through_payments() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::with_page_size(2));
    let payments: Vec<_> = (0..5)
        .map(|i| external_payment(&format!("IUR-{i}"), "1.00"))
        .collect();
    source
        .publish(DOMAIN_A, header("F1", at(1)), metadata("F1", 5, "5.00"), payments)
        .await;
    stores
        .staging
        .insert_chunk(&[StagingFlow::new(key(DOMAIN_A, "F1"), at(1))])
        .await
        .unwrap();

    detail_stage(&stores, &source, fast_config())
        .run(Arc::new(StageCounters::new()))
        .await
        .unwrap();

    let flow = stores.reconciled.find(&key(DOMAIN_A, "F1")).await.unwrap().unwrap();
    assert_eq!(flow.items.len(), 5);
    assert_eq!(flow.items[4].iur, "IUR-4");
    assert_eq!(flow.status, FlowStatus::Accepted);
}

#[tokio::test]
async fn test_details_advance_cursor_to_newest_flow() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    publish_and_stage(&stores, &source, DOMAIN_A, "F2", at(2)).await;

    detail_stage(&stores, &source, fast_config())
        .run(Arc::new(StageCounters::new()))
        .await
        .unwrap();

    assert_eq!(stores.reconciled.listing_cursor(DOMAIN_A).await.unwrap(), Some(at(2)));
}

#[tokio::test]
async fn test_details_cursor_stops_before_skipped_flow() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    publish_and_stage(&stores, &source, DOMAIN_A, "F2", at(2)).await;
    publish_and_stage(&stores, &source, DOMAIN_A, "F3", at(3)).await;
    source
        .fail_details(
            &key(DOMAIN_A, "F2"),
            vec![FlowSourceError::permanent("getFlowDetails", "404")],
        )
        .await;

    detail_stage(&stores, &source, fast_config())
        .run(Arc::new(StageCounters::new()))
        .await
        .unwrap();

    assert!(stores.reconciled.find(&key(DOMAIN_A, "F3")).await.unwrap().is_some());
    let cursor = stores.reconciled.listing_cursor(DOMAIN_A).await.unwrap().unwrap();
    assert!(cursor >= at(1));
    assert!(cursor < at(2), "cursor must not pass the skipped flow");
}

#[tokio::test]
async fn test_details_cursor_never_moves_back() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    stores
        .reconciled
        .advance_listing_cursor(DOMAIN_A, at(5))
        .await
        .unwrap();
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;

    detail_stage(&stores, &source, fast_config())
        .run(Arc::new(StageCounters::new()))
        .await
        .unwrap();

    assert_eq!(stores.reconciled.listing_cursor(DOMAIN_A).await.unwrap(), Some(at(5)));
}

#[tokio::test]
async fn test_details_cursor_write_failure_is_not_fatal() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    stores.reconciled.fail_next_cursor_writes(3).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(counters.snapshot().written, 1);
    assert_eq!(stores.reconciled.listing_cursor(DOMAIN_A).await.unwrap(), None);
}

#[tokio::test]
async fn test_details_retry_staging_read() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    stores.staging.fail_next_lists(2).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(counters.snapshot().written, 1);
    assert_eq!(counters.snapshot().errors, 0);
}

#[tokio::test]
async fn test_details_retry_domain_lookup() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    stores.domains.fail_next_finds(2).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    assert_eq!(counters.snapshot().written, 1);
    assert!(stores.reconciled.find(&key(DOMAIN_A, "F1")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_details_unreadable_partition_skipped_within_budget() {
    let stores = seeded_stores(&[DOMAIN_A]).await;
    let source = Arc::new(MockFlowSource::new());
    publish_and_stage(&stores, &source, DOMAIN_A, "F1", at(1)).await;
    publish_and_stage(&stores, &source, DOMAIN_A, "F2", at(2)).await;
    stores.domains.fail_next_finds(3).await;

    let counters = Arc::new(StageCounters::new());
    detail_stage(&stores, &source, fast_config())
        .run(counters.clone())
        .await
        .unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.read, 2);
    assert_eq!(stats.errors, 2);
    assert_eq!(stores.staging.len().await, 2);
    assert_eq!(stores.reconciled.listing_cursor(DOMAIN_A).await.unwrap(), None);
}
