//! SQLite StagingStore implementation.

use async_trait::async_trait;
use sea_query::{Cond, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{format_ts, parse_ts, with_transaction};
use crate::model::{FlowDetails, FlowKey, StagingFlow};
use crate::storage::schema::StagingFlows;
use crate::storage::{Result, StagingStore, StagingWrite, StorageError};

/// SQLite implementation of StagingStore.
pub struct SqliteStagingStore {
    pool: SqlitePool,
}

impl SqliteStagingStore {
    /// Create a new SQLite staging store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn key_condition(key: &FlowKey) -> Cond {
    Cond::all()
        .add(Expr::col(StagingFlows::DomainCode).eq(key.domain_code.as_str()))
        .add(Expr::col(StagingFlows::FlowCode).eq(key.flow_code.as_str()))
        .add(Expr::col(StagingFlows::PspId).eq(key.psp_id.as_str()))
        .add(Expr::col(StagingFlows::Revision).eq(key.revision))
}

fn insert_query(flow: &StagingFlow) -> Result<String> {
    let details = flow
        .details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok(Query::insert()
        .into_table(StagingFlows::Table)
        .columns([
            StagingFlows::DomainCode,
            StagingFlows::FlowCode,
            StagingFlows::PspId,
            StagingFlows::Revision,
            StagingFlows::PublishedAt,
            StagingFlows::CreatedAt,
            StagingFlows::Details,
        ])
        .values_panic([
            flow.key.domain_code.clone().into(),
            flow.key.flow_code.clone().into(),
            flow.key.psp_id.clone().into(),
            flow.key.revision.into(),
            format_ts(&flow.published_at).into(),
            format_ts(&flow.created_at).into(),
            details.into(),
        ])
        .on_conflict(
            OnConflict::columns([
                StagingFlows::DomainCode,
                StagingFlows::FlowCode,
                StagingFlows::PspId,
                StagingFlows::Revision,
            ])
            .do_nothing()
            .to_owned(),
        )
        .to_string(SqliteQueryBuilder))
}

fn row_to_staging(row: &SqliteRow) -> Result<StagingFlow> {
    let published_at: String = row.get("published_at");
    let created_at: String = row.get("created_at");
    let details: Option<String> = row.get("details");

    Ok(StagingFlow {
        key: FlowKey {
            domain_code: row.get("domain_code"),
            flow_code: row.get("flow_code"),
            psp_id: row.get("psp_id"),
            revision: row.get("revision"),
        },
        published_at: parse_ts("published_at", &published_at)?,
        created_at: parse_ts("created_at", &created_at)?,
        details: details
            .map(|json| serde_json::from_str::<FlowDetails>(&json))
            .transpose()?,
    })
}

#[async_trait]
impl StagingStore for SqliteStagingStore {
    async fn clear(&self) -> Result<u64> {
        let query = Query::delete()
            .from_table(StagingFlows::Table)
            .to_string(SqliteQueryBuilder);

        with_transaction(&self.pool, "staging.clear", move |conn| {
            Box::pin(async move {
                let result = sqlx::query(&query).execute(&mut *conn).await?;
                Ok(result.rows_affected())
            })
        })
        .await
    }

    async fn exists(&self, key: &FlowKey) -> Result<bool> {
        let query = Query::select()
            .expr(Expr::val(1))
            .from(StagingFlows::Table)
            .cond_where(key_condition(key))
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn insert_chunk(&self, flows: &[StagingFlow]) -> Result<StagingWrite> {
        if flows.is_empty() {
            return Ok(StagingWrite::default());
        }

        let queries = flows.iter().map(insert_query).collect::<Result<Vec<_>>>()?;

        let written = with_transaction(&self.pool, "staging.insert_chunk", move |conn| {
            Box::pin(async move {
                let mut written = StagingWrite::default();
                for query in &queries {
                    let result = sqlx::query(query).execute(&mut *conn).await?;
                    if result.rows_affected() > 0 {
                        written.inserted += 1;
                    } else {
                        written.duplicates += 1;
                    }
                }
                Ok(written)
            })
        })
        .await?;

        debug!(
            inserted = written.inserted,
            duplicates = written.duplicates,
            "Staging chunk written"
        );
        Ok(written)
    }

    async fn distinct_domains(&self) -> Result<Vec<String>> {
        let query = Query::select()
            .distinct()
            .column(StagingFlows::DomainCode)
            .from(StagingFlows::Table)
            .order_by(StagingFlows::DomainCode, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get("domain_code")).collect())
    }

    async fn list_for_domain(&self, domain_code: &str) -> Result<Vec<StagingFlow>> {
        let query = Query::select()
            .columns([
                StagingFlows::DomainCode,
                StagingFlows::FlowCode,
                StagingFlows::PspId,
                StagingFlows::Revision,
                StagingFlows::PublishedAt,
                StagingFlows::CreatedAt,
                StagingFlows::Details,
            ])
            .from(StagingFlows::Table)
            .and_where(Expr::col(StagingFlows::DomainCode).eq(domain_code))
            .order_by(StagingFlows::PublishedAt, Order::Asc)
            .order_by(StagingFlows::FlowCode, Order::Asc)
            .order_by(StagingFlows::PspId, Order::Asc)
            .order_by(StagingFlows::Revision, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_staging).collect()
    }

    async fn update_details(&self, key: &FlowKey, details: &FlowDetails) -> Result<()> {
        let json = serde_json::to_string(details)?;
        let query = Query::update()
            .table(StagingFlows::Table)
            .values([(StagingFlows::Details, json.into())])
            .cond_where(key_condition(key))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("staging flow {key}")));
        }
        Ok(())
    }

    async fn delete(&self, key: &FlowKey) -> Result<bool> {
        let query = Query::delete()
            .from_table(StagingFlows::Table)
            .cond_where(key_condition(key))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
