//! SQLite LedgerStore implementation.

use async_trait::async_trait;
use sea_query::{Cond, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{parse_decimal, parse_opt_decimal, with_transaction};
use crate::model::{LookupVariant, Payment, PaymentLookup, PaymentPosition, PaymentPositionItem};
use crate::storage::schema::{PaymentPositionItems, PaymentPositions, Payments};
use crate::storage::{LedgerStore, Result};

/// SQLite implementation of LedgerStore.
///
/// The ledger tables are owned by the payment platform; the write methods
/// here exist for provisioning and tests.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Create a new SQLite ledger store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let query = Query::insert()
            .into_table(Payments::Table)
            .columns([
                Payments::Id,
                Payments::DomainCode,
                Payments::Iuv,
                Payments::Iur,
                Payments::PositionIndex,
                Payments::PaidAmount,
                Payments::RevokedAmount,
                Payments::PositionItemId,
            ])
            .values_panic([
                payment.id.into(),
                payment.domain_code.clone().into(),
                payment.iuv.clone().into(),
                payment.iur.clone().into(),
                payment.position_index.into(),
                payment.paid_amount.map(|a| a.to_string()).into(),
                payment.revoked_amount.map(|a| a.to_string()).into(),
                payment.position_item_id.into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a position together with its items.
    pub async fn insert_position(&self, position: &PaymentPosition) -> Result<()> {
        let mut queries = vec![Query::insert()
            .into_table(PaymentPositions::Table)
            .columns([
                PaymentPositions::Id,
                PaymentPositions::DomainCode,
                PaymentPositions::Iuv,
            ])
            .values_panic([
                position.id.into(),
                position.domain_code.clone().into(),
                position.iuv.clone().into(),
            ])
            .to_string(SqliteQueryBuilder)];

        for item in &position.items {
            queries.push(
                Query::insert()
                    .into_table(PaymentPositionItems::Table)
                    .columns([
                        PaymentPositionItems::Id,
                        PaymentPositionItems::PositionId,
                        PaymentPositionItems::PositionIndex,
                        PaymentPositionItems::AmountDue,
                    ])
                    .values_panic([
                        item.id.into(),
                        position.id.into(),
                        item.position_index.into(),
                        item.amount_due.to_string().into(),
                    ])
                    .to_string(SqliteQueryBuilder),
            );
        }

        with_transaction(&self.pool, "ledger.insert_position", move |conn| {
            Box::pin(async move {
                for query in &queries {
                    sqlx::query(query).execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .await
    }
}

fn lookup_condition(lookup: &PaymentLookup) -> Cond {
    let base = Cond::all()
        .add(Expr::col(Payments::DomainCode).eq(lookup.domain_code.as_str()))
        .add(Expr::col(Payments::Iuv).eq(lookup.iuv.as_str()));

    match (lookup.variant(), lookup.iur.as_deref(), lookup.index) {
        (LookupVariant::IurAndIndex, Some(iur), Some(index)) => base
            .add(Expr::col(Payments::Iur).eq(iur))
            .add(Expr::col(Payments::PositionIndex).eq(index)),
        (LookupVariant::IurOnly, Some(iur), _) => base.add(Expr::col(Payments::Iur).eq(iur)),
        (LookupVariant::IndexOnly, _, Some(index)) => {
            base.add(Expr::col(Payments::PositionIndex).eq(index))
        }
        _ => base,
    }
}

fn row_to_payment(row: &SqliteRow) -> Result<Payment> {
    Ok(Payment {
        id: row.get("id"),
        domain_code: row.get("domain_code"),
        iuv: row.get("iuv"),
        iur: row.get("iur"),
        position_index: row.get("position_index"),
        paid_amount: parse_opt_decimal("paid_amount", row.get("paid_amount"))?,
        revoked_amount: parse_opt_decimal("revoked_amount", row.get("revoked_amount"))?,
        position_item_id: row.get("position_item_id"),
    })
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn find_payments(&self, lookup: &PaymentLookup) -> Result<Vec<Payment>> {
        let query = Query::select()
            .columns([
                Payments::Id,
                Payments::DomainCode,
                Payments::Iuv,
                Payments::Iur,
                Payments::PositionIndex,
                Payments::PaidAmount,
                Payments::RevokedAmount,
                Payments::PositionItemId,
            ])
            .from(Payments::Table)
            .cond_where(lookup_condition(lookup))
            .order_by(Payments::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_payment).collect()
    }

    async fn find_position(&self, domain_code: &str, iuv: &str) -> Result<Option<PaymentPosition>> {
        let query = Query::select()
            .column(PaymentPositions::Id)
            .from(PaymentPositions::Table)
            .and_where(Expr::col(PaymentPositions::DomainCode).eq(domain_code))
            .and_where(Expr::col(PaymentPositions::Iuv).eq(iuv))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let position_id: i64 = row.get("id");

        let items_query = Query::select()
            .columns([
                PaymentPositionItems::Id,
                PaymentPositionItems::PositionId,
                PaymentPositionItems::PositionIndex,
                PaymentPositionItems::AmountDue,
            ])
            .from(PaymentPositionItems::Table)
            .and_where(Expr::col(PaymentPositionItems::PositionId).eq(position_id))
            .order_by(PaymentPositionItems::PositionIndex, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&items_query).fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(|row| {
                let amount_due: String = row.get("amount_due");
                Ok(PaymentPositionItem {
                    id: row.get("id"),
                    position_id: row.get("position_id"),
                    position_index: row.get("position_index"),
                    amount_due: parse_decimal("amount_due", &amount_due)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(PaymentPosition {
            id: position_id,
            domain_code: domain_code.to_string(),
            iuv: iuv.to_string(),
            items,
        }))
    }
}
