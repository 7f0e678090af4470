//! SQLite ReconciledFlowStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_query::{Cond, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{format_ts, now, parse_decimal, parse_enum, parse_opt_decimal, parse_opt_ts, parse_ts, with_transaction};
use crate::model::{FlowDetails, FlowKey, ReconciledFlow, ReconciliationItem};
use crate::storage::schema::{AcquisitionCursors, ReconciledFlows, ReconciliationItems, StagingFlows};
use crate::storage::{ReconciledFlowStore, Result, SaveOutcome, StorageError};

/// Rows per multi-row item insert.
const ITEM_BATCH_SIZE: usize = 500;

/// SQLite implementation of ReconciledFlowStore.
pub struct SqliteReconciledFlowStore {
    pool: SqlitePool,
}

impl SqliteReconciledFlowStore {
    /// Create a new SQLite reconciled flow store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn natural_key_condition(key: &FlowKey) -> Cond {
    Cond::all()
        .add(Expr::col(ReconciledFlows::FlowCode).eq(key.flow_code.as_str()))
        .add(Expr::col(ReconciledFlows::PspId).eq(key.psp_id.as_str()))
        .add(Expr::col(ReconciledFlows::Revision).eq(key.revision))
}

fn insert_flow_query(flow: &ReconciledFlow) -> String {
    let details = &flow.details;
    Query::insert()
        .into_table(ReconciledFlows::Table)
        .columns([
            ReconciledFlows::DomainCode,
            ReconciledFlows::FlowCode,
            ReconciledFlows::PspId,
            ReconciledFlows::Revision,
            ReconciledFlows::PublishedAt,
            ReconciledFlows::SettlementId,
            ReconciledFlows::FlowDate,
            ReconciledFlows::SettlementDate,
            ReconciledFlows::DeclaredCount,
            ReconciledFlows::DeclaredSum,
            ReconciledFlows::SenderName,
            ReconciledFlows::ReceiverName,
            ReconciledFlows::FlowStatus,
            ReconciledFlows::Status,
            ReconciledFlows::Anomaly,
            ReconciledFlows::ReconciledAt,
        ])
        .values_panic([
            flow.key.domain_code.clone().into(),
            flow.key.flow_code.clone().into(),
            flow.key.psp_id.clone().into(),
            flow.key.revision.into(),
            format_ts(&flow.published_at).into(),
            details.settlement_id.clone().into(),
            details.flow_date.as_ref().map(format_ts).into(),
            details.settlement_date.map(|d| d.to_string()).into(),
            details.declared_count.into(),
            details.declared_sum.map(|s| s.to_string()).into(),
            details.sender_name.clone().into(),
            details.receiver_name.clone().into(),
            details.status.clone().into(),
            flow.status.as_str().into(),
            flow.anomaly.clone().into(),
            format_ts(&flow.reconciled_at).into(),
        ])
        .on_conflict(
            OnConflict::columns([
                ReconciledFlows::FlowCode,
                ReconciledFlows::PspId,
                ReconciledFlows::Revision,
            ])
            .do_nothing()
            .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}

fn insert_items_queries(flow_id: i64, items: &[ReconciliationItem]) -> Vec<String> {
    items
        .chunks(ITEM_BATCH_SIZE)
        .enumerate()
        .map(|(batch, chunk)| {
            let mut insert = Query::insert();
            insert.into_table(ReconciliationItems::Table).columns([
                ReconciliationItems::FlowId,
                ReconciliationItems::Ordinal,
                ReconciliationItems::Iuv,
                ReconciliationItems::Iur,
                ReconciliationItems::ItemIndex,
                ReconciliationItems::Amount,
                ReconciliationItems::Outcome,
                ReconciliationItems::PaidAt,
                ReconciliationItems::Status,
                ReconciliationItems::Anomaly,
                ReconciliationItems::PaymentId,
                ReconciliationItems::PositionItemId,
            ]);
            for (offset, item) in chunk.iter().enumerate() {
                let ordinal = (batch * ITEM_BATCH_SIZE + offset) as i64;
                insert.values_panic([
                    flow_id.into(),
                    ordinal.into(),
                    item.iuv.clone().into(),
                    item.iur.clone().into(),
                    item.item_index.into(),
                    item.amount.to_string().into(),
                    item.outcome.as_str().into(),
                    item.paid_at.as_ref().map(format_ts).into(),
                    item.status.as_str().into(),
                    item.anomaly.clone().into(),
                    item.payment_id.into(),
                    item.position_item_id.into(),
                ]);
            }
            insert.to_string(SqliteQueryBuilder)
        })
        .collect()
}

fn release_staging_query(key: &FlowKey) -> String {
    Query::delete()
        .from_table(StagingFlows::Table)
        .cond_where(
            Cond::all()
                .add(Expr::col(StagingFlows::DomainCode).eq(key.domain_code.as_str()))
                .add(Expr::col(StagingFlows::FlowCode).eq(key.flow_code.as_str()))
                .add(Expr::col(StagingFlows::PspId).eq(key.psp_id.as_str()))
                .add(Expr::col(StagingFlows::Revision).eq(key.revision)),
        )
        .to_string(SqliteQueryBuilder)
}

fn row_to_item(row: &SqliteRow) -> Result<ReconciliationItem> {
    let amount: String = row.get("amount");
    let outcome: String = row.get("outcome");
    let status: String = row.get("status");

    Ok(ReconciliationItem {
        iuv: row.get("iuv"),
        iur: row.get("iur"),
        item_index: row.get("item_index"),
        amount: parse_decimal("amount", &amount)?,
        outcome: parse_enum("outcome", &outcome)?,
        paid_at: parse_opt_ts("paid_at", row.get("paid_at"))?,
        status: parse_enum("status", &status)?,
        anomaly: row.get("anomaly"),
        payment_id: row.get("payment_id"),
        position_item_id: row.get("position_item_id"),
    })
}

fn row_to_flow(row: &SqliteRow) -> Result<ReconciledFlow> {
    let published_at: String = row.get("published_at");
    let reconciled_at: String = row.get("reconciled_at");
    let status: String = row.get("status");
    let settlement_date: Option<String> = row.get("settlement_date");

    let settlement_date = settlement_date
        .map(|d| {
            d.parse::<NaiveDate>().map_err(|e| StorageError::InvalidValue {
                column: "settlement_date",
                message: e.to_string(),
            })
        })
        .transpose()?;

    Ok(ReconciledFlow {
        key: FlowKey {
            domain_code: row.get("domain_code"),
            flow_code: row.get("flow_code"),
            psp_id: row.get("psp_id"),
            revision: row.get("revision"),
        },
        published_at: parse_ts("published_at", &published_at)?,
        details: FlowDetails {
            settlement_id: row.get("settlement_id"),
            flow_date: parse_opt_ts("flow_date", row.get("flow_date"))?,
            settlement_date,
            declared_count: row.get("declared_count"),
            declared_sum: parse_opt_decimal("declared_sum", row.get("declared_sum"))?,
            sender_name: row.get("sender_name"),
            receiver_name: row.get("receiver_name"),
            status: row.get("flow_status"),
        },
        status: parse_enum("status", &status)?,
        anomaly: row.get("anomaly"),
        reconciled_at: parse_ts("reconciled_at", &reconciled_at)?,
        items: Vec::new(),
    })
}

#[async_trait]
impl ReconciledFlowStore for SqliteReconciledFlowStore {
    async fn exists(&self, key: &FlowKey) -> Result<bool> {
        let query = Query::select()
            .expr(Expr::val(1))
            .from(ReconciledFlows::Table)
            .cond_where(natural_key_condition(key))
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn listing_cursor(&self, domain_code: &str) -> Result<Option<DateTime<Utc>>> {
        let query = Query::select()
            .column(AcquisitionCursors::ListedAfter)
            .from(AcquisitionCursors::Table)
            .and_where(Expr::col(AcquisitionCursors::DomainCode).eq(domain_code))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        parse_opt_ts("listed_after", row.map(|r| r.get("listed_after")))
    }

    async fn advance_listing_cursor(&self, domain_code: &str, cursor: DateTime<Utc>) -> Result<bool> {
        let listed_after = format_ts(&cursor);
        // Text comparison is time ordering for stored timestamps.
        let query = Query::insert()
            .into_table(AcquisitionCursors::Table)
            .columns([
                AcquisitionCursors::DomainCode,
                AcquisitionCursors::ListedAfter,
                AcquisitionCursors::UpdatedAt,
            ])
            .values_panic([
                domain_code.into(),
                listed_after.clone().into(),
                format_ts(&now()).into(),
            ])
            .on_conflict(
                OnConflict::column(AcquisitionCursors::DomainCode)
                    .update_columns([AcquisitionCursors::ListedAfter, AcquisitionCursors::UpdatedAt])
                    .action_and_where(Expr::col(AcquisitionCursors::ListedAfter).lt(listed_after))
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        let moved = result.rows_affected() > 0;
        if moved {
            debug!(domain = %domain_code, cursor = %cursor, "Listing cursor advanced");
        }
        Ok(moved)
    }

    #[tracing::instrument(name = "reconciled.save", skip_all, fields(flow = %flow.key))]
    async fn save_and_release(&self, flow: &ReconciledFlow) -> Result<SaveOutcome> {
        let insert_flow = insert_flow_query(flow);
        let release = release_staging_query(&flow.key);
        let items = flow.items.clone();

        let outcome = with_transaction(&self.pool, "reconciled.save_and_release", move |conn| {
            Box::pin(async move {
                let inserted = sqlx::query(&insert_flow).execute(&mut *conn).await?;

                let outcome = if inserted.rows_affected() == 0 {
                    SaveOutcome::AlreadyReconciled
                } else {
                    let flow_id = inserted.last_insert_rowid();
                    for query in insert_items_queries(flow_id, &items) {
                        sqlx::query(&query).execute(&mut *conn).await?;
                    }
                    SaveOutcome::Saved
                };

                sqlx::query(&release).execute(&mut *conn).await?;
                Ok(outcome)
            })
        })
        .await?;

        debug!(outcome = ?outcome, items = flow.items.len(), "Reconciled flow persisted");
        Ok(outcome)
    }

    async fn find(&self, key: &FlowKey) -> Result<Option<ReconciledFlow>> {
        let query = Query::select()
            .columns([
                ReconciledFlows::Id,
                ReconciledFlows::DomainCode,
                ReconciledFlows::FlowCode,
                ReconciledFlows::PspId,
                ReconciledFlows::Revision,
                ReconciledFlows::PublishedAt,
                ReconciledFlows::SettlementId,
                ReconciledFlows::FlowDate,
                ReconciledFlows::SettlementDate,
                ReconciledFlows::DeclaredCount,
                ReconciledFlows::DeclaredSum,
                ReconciledFlows::SenderName,
                ReconciledFlows::ReceiverName,
                ReconciledFlows::FlowStatus,
                ReconciledFlows::Status,
                ReconciledFlows::Anomaly,
                ReconciledFlows::ReconciledAt,
            ])
            .from(ReconciledFlows::Table)
            .cond_where(natural_key_condition(key))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let flow_id: i64 = row.get("id");
        let mut flow = row_to_flow(&row)?;

        let items_query = Query::select()
            .columns([
                ReconciliationItems::Iuv,
                ReconciliationItems::Iur,
                ReconciliationItems::ItemIndex,
                ReconciliationItems::Amount,
                ReconciliationItems::Outcome,
                ReconciliationItems::PaidAt,
                ReconciliationItems::Status,
                ReconciliationItems::Anomaly,
                ReconciliationItems::PaymentId,
                ReconciliationItems::PositionItemId,
            ])
            .from(ReconciliationItems::Table)
            .and_where(Expr::col(ReconciliationItems::FlowId).eq(flow_id))
            .order_by(ReconciliationItems::Ordinal, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&items_query).fetch_all(&self.pool).await?;
        flow.items = rows.iter().map(row_to_item).collect::<Result<_>>()?;

        Ok(Some(flow))
    }
}
