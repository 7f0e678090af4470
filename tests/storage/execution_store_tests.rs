//! ExecutionStore and TriggerMarkerStore contract tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use fdr_reconciler::model::{ActivationKind, ExecutionStatus, RunParameters, StageStats};
use fdr_reconciler::storage::Stores;

fn params() -> RunParameters {
    RunParameters::now(ActivationKind::Scheduled)
}

// =============================================================================
// ExecutionStore
// =============================================================================

pub async fn test_single_open_execution(stores: &Stores) {
    let job = "test_job_single";

    let first = stores
        .executions
        .insert_running(job, "node-a", &params())
        .await
        .expect("insert should succeed")
        .expect("first insert should acquire");
    assert_eq!(first.status, ExecutionStatus::Running);
    assert_eq!(first.owner_node_id.as_deref(), Some("node-a"));

    let second = stores
        .executions
        .insert_running(job, "node-b", &params())
        .await
        .unwrap();
    assert!(second.is_none(), "second open execution must be refused");

    let open = stores.executions.find_open(job).await.unwrap().unwrap();
    assert_eq!(open.id, first.id);

    // Other jobs are independent.
    assert!(stores
        .executions
        .insert_running("test_job_other", "node-b", &params())
        .await
        .unwrap()
        .is_some());
}

pub async fn test_concurrent_insert_single_winner(stores: &Stores) {
    let job = "test_job_race";
    let mut handles = Vec::new();
    for i in 0..6 {
        let executions = Arc::clone(&stores.executions);
        handles.push(tokio::spawn(async move {
            executions
                .insert_running(job, &format!("node-{i}"), &params())
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one node acquires the lock");
}

pub async fn test_close_is_conditional(stores: &Stores) {
    let job = "test_job_close";
    let record = stores
        .executions
        .insert_running(job, "node-a", &params())
        .await
        .unwrap()
        .unwrap();

    assert!(stores
        .executions
        .close(record.id, ExecutionStatus::Failed, Some("abandoned"))
        .await
        .unwrap());
    assert!(
        !stores
            .executions
            .close(record.id, ExecutionStatus::Completed, None)
            .await
            .unwrap(),
        "late close must be a no-op"
    );

    let stored = stores.executions.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.description.as_deref(), Some("abandoned"));
    assert!(stored.end_time.is_some());
    assert_eq!(stored.parameters.activation, ActivationKind::Scheduled);
    assert!(stores.executions.find_open(job).await.unwrap().is_none());

    // Lock is free again.
    assert!(stores
        .executions
        .insert_running(job, "node-b", &params())
        .await
        .unwrap()
        .is_some());
}

pub async fn test_steps_lifecycle(stores: &Stores) {
    let record = stores
        .executions
        .insert_running("test_job_steps", "node-a", &params())
        .await
        .unwrap()
        .unwrap();

    let cleanup = stores.executions.start_step(record.id, "cleanup").await.unwrap();
    let stats = StageStats {
        read: 4,
        written: 3,
        skipped_in_final: 1,
        skipped_in_staging: 0,
        errors: 0,
    };
    stores
        .executions
        .finish_step(cleanup.id, ExecutionStatus::Completed, &stats, None)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    stores.executions.start_step(record.id, "headers").await.unwrap();

    assert_eq!(
        stores.executions.fail_open_steps(record.id, "abandoned").await.unwrap(),
        1
    );

    let steps = stores.executions.steps(record.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].step_name, "cleanup");
    assert_eq!(steps[0].status, ExecutionStatus::Completed);
    assert_eq!(steps[0].stats, stats);
    assert_eq!(steps[1].status, ExecutionStatus::Failed);
    assert_eq!(steps[1].description.as_deref(), Some("abandoned"));

    assert!(stores
        .executions
        .finish_step(Uuid::new_v4(), ExecutionStatus::Completed, &stats, None)
        .await
        .is_err());
}

// =============================================================================
// TriggerMarkerStore
// =============================================================================

pub async fn test_marker_touch_advances(stores: &Stores) {
    let job = "test_job_marker";
    assert!(stores.markers.get(job).await.unwrap().is_none());

    let first = stores.markers.touch(job, "node-a").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = stores.markers.touch(job, "node-b").await.unwrap();

    assert!(second.last_updated > first.last_updated);
    assert!(second.last_updated - first.last_updated < Duration::seconds(5));
    assert!(second.last_updated <= Utc::now());

    let stored = stores.markers.get(job).await.unwrap().unwrap();
    assert_eq!(stored.owner_node.as_deref(), Some("node-b"));
    assert_eq!(stored.last_updated, second.last_updated);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all execution and marker tests against a store bundle.
#[macro_export]
macro_rules! run_execution_store_tests {
    ($stores:expr) => {
        use $crate::storage::execution_store_tests::*;

        test_single_open_execution($stores).await;
        println!("  test_single_open_execution: PASSED");

        test_concurrent_insert_single_winner($stores).await;
        println!("  test_concurrent_insert_single_winner: PASSED");

        test_close_is_conditional($stores).await;
        println!("  test_close_is_conditional: PASSED");

        test_steps_lifecycle($stores).await;
        println!("  test_steps_lifecycle: PASSED");

        test_marker_touch_advances($stores).await;
        println!("  test_marker_touch_advances: PASSED");
    };
}
