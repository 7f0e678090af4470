//! StagingStore and ReconciledFlowStore contract tests.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use fdr_reconciler::model::{
    FlowDetails, FlowKey, FlowStatus, ItemStatus, PaymentOutcome, ReconciledFlow,
    ReconciliationItem, StagingFlow,
};
use fdr_reconciler::storage::{SaveOutcome, Stores};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

fn item(iur: &str, amount: &str, index: Option<i64>) -> ReconciliationItem {
    ReconciliationItem {
        iuv: "01234567890123456".to_string(),
        iur: iur.to_string(),
        item_index: index,
        amount: Decimal::from_str(amount).unwrap(),
        outcome: PaymentOutcome::Executed,
        paid_at: Some(at(8)),
        status: ItemStatus::Anomalous,
        anomaly: Some("007101".to_string()),
        payment_id: None,
        position_item_id: None,
    }
}

fn reconciled(key: FlowKey, published: DateTime<Utc>, items: Vec<ReconciliationItem>) -> ReconciledFlow {
    ReconciledFlow {
        key,
        published_at: published,
        details: FlowDetails {
            settlement_id: Some("SETTLE-1".to_string()),
            declared_count: Some(items.len() as i64),
            declared_sum: Some(items.iter().map(|i| i.amount).sum()),
            ..Default::default()
        },
        status: FlowStatus::Accepted,
        anomaly: None,
        reconciled_at: at(9),
        items,
    }
}

// =============================================================================
// StagingStore
// =============================================================================

pub async fn test_staging_insert_is_idempotent(stores: &Stores) {
    stores.staging.clear().await.expect("clear should succeed");
    let flow = StagingFlow::new(FlowKey::new("test_dom_a", "FLOW-1", "PSP01", 1), at(1));

    let first = stores.staging.insert_chunk(&[flow.clone()]).await.unwrap();
    let second = stores.staging.insert_chunk(&[flow.clone()]).await.unwrap();

    assert_eq!(first.inserted, 1);
    assert_eq!(first.duplicates, 0);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 1, "second insert should be counted as skipped");
    assert!(stores.staging.exists(&flow.key).await.unwrap());
    assert_eq!(stores.staging.list_for_domain("test_dom_a").await.unwrap().len(), 1);
}

pub async fn test_staging_revision_is_part_of_key(stores: &Stores) {
    stores.staging.clear().await.unwrap();
    let rev1 = StagingFlow::new(FlowKey::new("test_dom_b", "FLOW-1", "PSP01", 1), at(1));
    let rev2 = StagingFlow::new(FlowKey::new("test_dom_b", "FLOW-1", "PSP01", 2), at(2));

    let written = stores.staging.insert_chunk(&[rev1, rev2]).await.unwrap();
    assert_eq!(written.inserted, 2);
}

pub async fn test_staging_lists_by_publication(stores: &Stores) {
    stores.staging.clear().await.unwrap();
    let chunk = vec![
        StagingFlow::new(FlowKey::new("test_dom_c", "LATE", "PSP01", 1), at(5)),
        StagingFlow::new(FlowKey::new("test_dom_c", "EARLY", "PSP01", 1), at(1)),
        StagingFlow::new(FlowKey::new("test_dom_d", "OTHER", "PSP01", 1), at(3)),
    ];
    stores.staging.insert_chunk(&chunk).await.unwrap();

    let flows = stores.staging.list_for_domain("test_dom_c").await.unwrap();
    let codes: Vec<_> = flows.iter().map(|f| f.key.flow_code.as_str()).collect();
    assert_eq!(codes, vec!["EARLY", "LATE"]);
    assert_eq!(flows[0].published_at, at(1));

    let domains = stores.staging.distinct_domains().await.unwrap();
    assert_eq!(domains, vec!["test_dom_c".to_string(), "test_dom_d".to_string()]);
}

pub async fn test_staging_update_details(stores: &Stores) {
    stores.staging.clear().await.unwrap();
    let key = FlowKey::new("test_dom_e", "FLOW-1", "PSP01", 1);
    stores
        .staging
        .insert_chunk(&[StagingFlow::new(key.clone(), at(1))])
        .await
        .unwrap();

    let details = FlowDetails {
        settlement_id: Some("SETTLE-9".to_string()),
        declared_count: Some(3),
        declared_sum: Some(Decimal::from_str("30.10").unwrap()),
        sender_name: Some("Bank".to_string()),
        ..Default::default()
    };
    stores.staging.update_details(&key, &details).await.unwrap();

    let flows = stores.staging.list_for_domain("test_dom_e").await.unwrap();
    assert_eq!(flows[0].details.as_ref(), Some(&details));

    let missing = FlowKey::new("test_dom_e", "MISSING", "PSP01", 1);
    assert!(stores.staging.update_details(&missing, &details).await.is_err());
}

pub async fn test_staging_clear_and_delete(stores: &Stores) {
    stores.staging.clear().await.unwrap();
    let keep = FlowKey::new("test_dom_f", "KEEP", "PSP01", 1);
    let drop = FlowKey::new("test_dom_f", "DROP", "PSP01", 1);
    stores
        .staging
        .insert_chunk(&[
            StagingFlow::new(keep.clone(), at(1)),
            StagingFlow::new(drop.clone(), at(2)),
        ])
        .await
        .unwrap();

    assert!(stores.staging.delete(&drop).await.unwrap());
    assert!(!stores.staging.delete(&drop).await.unwrap());
    assert!(stores.staging.exists(&keep).await.unwrap());

    assert_eq!(stores.staging.clear().await.unwrap(), 1);
    assert!(stores.staging.distinct_domains().await.unwrap().is_empty());
}

// =============================================================================
// ReconciledFlowStore
// =============================================================================

pub async fn test_save_and_release(stores: &Stores) {
    stores.staging.clear().await.unwrap();
    let key = FlowKey::new("test_dom_g", "FLOW-1", "PSP01", 1);
    stores
        .staging
        .insert_chunk(&[StagingFlow::new(key.clone(), at(1))])
        .await
        .unwrap();

    let flow = reconciled(
        key.clone(),
        at(1),
        vec![item("IUR-2", "5.00", Some(2)), item("IUR-1", "7.25", None)],
    );
    let outcome = stores.reconciled.save_and_release(&flow).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Saved);
    assert!(!stores.staging.exists(&key).await.unwrap(), "staging row released");
    assert!(stores.reconciled.exists(&key).await.unwrap());

    let stored = stores
        .reconciled
        .find(&key)
        .await
        .unwrap()
        .expect("flow should exist");
    assert_eq!(stored.items.len(), 2);
    assert_eq!(stored.items[0].iur, "IUR-2", "items keep their order");
    assert_eq!(stored.items[1].item_index, None);
    assert_eq!(stored.items[1].amount, Decimal::from_str("7.25").unwrap());
    assert_eq!(stored.items[0].anomaly.as_deref(), Some("007101"));
    assert_eq!(stored.details.settlement_id.as_deref(), Some("SETTLE-1"));
    assert_eq!(stored.status, FlowStatus::Accepted);
}

pub async fn test_save_existing_flow_is_noop(stores: &Stores) {
    stores.staging.clear().await.unwrap();
    let key = FlowKey::new("test_dom_h", "FLOW-1", "PSP01", 1);
    let first = reconciled(key.clone(), at(1), vec![item("IUR-1", "1.00", Some(1))]);
    assert_eq!(
        stores.reconciled.save_and_release(&first).await.unwrap(),
        SaveOutcome::Saved
    );

    // A late writer re-stages and re-saves the same flow.
    stores
        .staging
        .insert_chunk(&[StagingFlow::new(key.clone(), at(1))])
        .await
        .unwrap();
    let second = reconciled(key.clone(), at(1), vec![]);
    assert_eq!(
        stores.reconciled.save_and_release(&second).await.unwrap(),
        SaveOutcome::AlreadyReconciled
    );

    assert!(!stores.staging.exists(&key).await.unwrap());
    let stored = stores.reconciled.find(&key).await.unwrap().unwrap();
    assert_eq!(stored.items.len(), 1, "first verdict is kept");
}

pub async fn test_reconciled_key_ignores_domain(stores: &Stores) {
    let saved = FlowKey::new("test_dom_i", "FLOW-SHARED", "PSP01", 1);
    stores
        .reconciled
        .save_and_release(&reconciled(saved, at(1), vec![]))
        .await
        .unwrap();

    let other_domain = FlowKey::new("test_dom_j", "FLOW-SHARED", "PSP01", 1);
    assert!(stores.reconciled.exists(&other_domain).await.unwrap());
}

pub async fn test_listing_cursor_moves_forward_only(stores: &Stores) {
    let domain = "test_dom_k";
    assert_eq!(stores.reconciled.listing_cursor(domain).await.unwrap(), None);

    assert!(stores.reconciled.advance_listing_cursor(domain, at(5)).await.unwrap());
    assert!(stores.reconciled.advance_listing_cursor(domain, at(7)).await.unwrap());
    assert!(!stores.reconciled.advance_listing_cursor(domain, at(3)).await.unwrap());
    assert!(!stores.reconciled.advance_listing_cursor(domain, at(7)).await.unwrap());

    assert_eq!(stores.reconciled.listing_cursor(domain).await.unwrap(), Some(at(7)));
    assert_eq!(stores.reconciled.listing_cursor("test_dom_l").await.unwrap(), None);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all staging and reconciled flow tests against a store bundle.
#[macro_export]
macro_rules! run_flow_store_tests {
    ($stores:expr) => {
        use $crate::storage::flow_store_tests::*;

        test_staging_insert_is_idempotent($stores).await;
        println!("  test_staging_insert_is_idempotent: PASSED");

        test_staging_revision_is_part_of_key($stores).await;
        println!("  test_staging_revision_is_part_of_key: PASSED");

        test_staging_lists_by_publication($stores).await;
        println!("  test_staging_lists_by_publication: PASSED");

        test_staging_update_details($stores).await;
        println!("  test_staging_update_details: PASSED");

        test_staging_clear_and_delete($stores).await;
        println!("  test_staging_clear_and_delete: PASSED");

        test_save_and_release($stores).await;
        println!("  test_save_and_release: PASSED");

        test_save_existing_flow_is_noop($stores).await;
        println!("  test_save_existing_flow_is_noop: PASSED");

        test_reconciled_key_ignores_domain($stores).await;
        println!("  test_reconciled_key_ignores_domain: PASSED");

        test_listing_cursor_moves_forward_only($stores).await;
        println!("  test_listing_cursor_moves_forward_only: PASSED");
    };
}
