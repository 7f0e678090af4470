//! SQLite implementations of storage interfaces.

mod creditor_store;
mod execution_store;
mod ledger_store;
mod marker_store;
mod reconciled_store;
mod staging_store;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

pub use creditor_store::SqliteCreditorDomainStore;
pub use execution_store::SqliteExecutionStore;
pub use ledger_store::SqliteLedgerStore;
pub use marker_store::SqliteTriggerMarkerStore;
pub use reconciled_store::SqliteReconciledFlowStore;
pub use staging_store::SqliteStagingStore;

use super::schema::CREATE_TABLES;
use super::{Result, StorageError, Stores};
use crate::config::StorageConfig;

/// Open a connection pool for the configured database URL.
pub async fn connect(config: &StorageConfig) -> Result<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    if !config.url.contains(":memory:") {
        if let Some(parent) = std::path::Path::new(options.get_filename()).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(format!("create data dir: {e}")))?;
        }
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Initialize the database schema.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_TABLES).execute(pool).await?;
    Ok(())
}

/// Build the full store bundle over one pool.
pub fn stores(pool: SqlitePool) -> Stores {
    Stores {
        domains: Arc::new(SqliteCreditorDomainStore::new(pool.clone())),
        staging: Arc::new(SqliteStagingStore::new(pool.clone())),
        reconciled: Arc::new(SqliteReconciledFlowStore::new(pool.clone())),
        ledger: Arc::new(SqliteLedgerStore::new(pool.clone())),
        executions: Arc::new(SqliteExecutionStore::new(pool.clone())),
        markers: Arc::new(SqliteTriggerMarkerStore::new(pool)),
    }
}

/// Run `f` inside a transaction.
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`. A panic
/// or cancellation drops the transaction, which also rolls back.
pub async fn with_transaction<T, F>(pool: &SqlitePool, scope: &'static str, f: F) -> Result<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
{
    let mut tx = pool.begin().await?;

    match f(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            debug!(scope, "Transaction committed");
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(scope, error = %rollback_err, "Transaction rollback failed");
            } else {
                debug!(scope, error = %e, "Transaction rolled back");
            }
            Err(e)
        }
    }
}

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamps are stored as fixed-width RFC 3339 so that text ordering
/// matches time ordering.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp {
            column,
            value: value.to_string(),
        })
}

pub(crate) fn parse_opt_ts(column: &'static str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(column, &v)).transpose()
}

pub(crate) fn parse_decimal(column: &'static str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|_| StorageError::InvalidAmount {
        column,
        value: value.to_string(),
    })
}

pub(crate) fn parse_opt_decimal(column: &'static str, value: Option<String>) -> Result<Option<Decimal>> {
    value.map(|v| parse_decimal(column, &v)).transpose()
}

pub(crate) fn parse_enum<T>(column: &'static str, value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|message| StorageError::InvalidValue { column, message })
}
