//! SQLite CreditorDomainStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::model::{AuxDigit, CreditorDomain};
use crate::storage::schema::CreditorDomains;
use crate::storage::{CreditorDomainStore, Result};

/// SQLite implementation of CreditorDomainStore.
pub struct SqliteCreditorDomainStore {
    pool: SqlitePool,
}

impl SqliteCreditorDomainStore {
    /// Create a new SQLite creditor domain store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a domain. Reference data is normally loaded
    /// externally; this exists for provisioning and tests.
    pub async fn upsert(&self, domain: &CreditorDomain) -> Result<()> {
        let query = Query::insert()
            .into_table(CreditorDomains::Table)
            .columns([
                CreditorDomains::DomainCode,
                CreditorDomains::DownloadsFlows,
                CreditorDomains::AuxDigit,
                CreditorDomains::SegregationCode,
            ])
            .values_panic([
                domain.domain_code.clone().into(),
                i64::from(domain.downloads_flows).into(),
                domain.aux_digit.code().into(),
                domain.segregation_code.map(i64::from).into(),
            ])
            .on_conflict(
                OnConflict::column(CreditorDomains::DomainCode)
                    .update_columns([
                        CreditorDomains::DownloadsFlows,
                        CreditorDomains::AuxDigit,
                        CreditorDomains::SegregationCode,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

fn columns() -> [CreditorDomains; 4] {
    [
        CreditorDomains::DomainCode,
        CreditorDomains::DownloadsFlows,
        CreditorDomains::AuxDigit,
        CreditorDomains::SegregationCode,
    ]
}

fn row_to_domain(row: &SqliteRow) -> CreditorDomain {
    let segregation_code: Option<i64> = row.get("segregation_code");
    CreditorDomain {
        domain_code: row.get("domain_code"),
        downloads_flows: row.get::<i64, _>("downloads_flows") != 0,
        aux_digit: AuxDigit::from_code(row.get("aux_digit")),
        segregation_code: segregation_code.and_then(|code| u32::try_from(code).ok()),
    }
}

#[async_trait]
impl CreditorDomainStore for SqliteCreditorDomainStore {
    async fn list_acquiring(&self) -> Result<Vec<CreditorDomain>> {
        let query = Query::select()
            .columns(columns())
            .from(CreditorDomains::Table)
            .and_where(Expr::col(CreditorDomains::DownloadsFlows).eq(1))
            .order_by(CreditorDomains::DomainCode, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_domain).collect())
    }

    async fn find(&self, domain_code: &str) -> Result<Option<CreditorDomain>> {
        let query = Query::select()
            .columns(columns())
            .from(CreditorDomains::Table)
            .and_where(Expr::col(CreditorDomains::DomainCode).eq(domain_code))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(row_to_domain))
    }
}
