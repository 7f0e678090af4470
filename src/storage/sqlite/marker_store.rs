//! SQLite TriggerMarkerStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use super::{format_ts, now, parse_ts};
use crate::model::ManualTriggerMarker;
use crate::storage::schema::TriggerMarkers;
use crate::storage::{Result, TriggerMarkerStore};

/// SQLite implementation of TriggerMarkerStore.
pub struct SqliteTriggerMarkerStore {
    pool: SqlitePool,
}

impl SqliteTriggerMarkerStore {
    /// Create a new SQLite trigger marker store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerMarkerStore for SqliteTriggerMarkerStore {
    async fn get(&self, job_name: &str) -> Result<Option<ManualTriggerMarker>> {
        let query = Query::select()
            .columns([
                TriggerMarkers::JobName,
                TriggerMarkers::LastUpdated,
                TriggerMarkers::OwnerNode,
            ])
            .from(TriggerMarkers::Table)
            .and_where(Expr::col(TriggerMarkers::JobName).eq(job_name))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let last_updated: String = row.get("last_updated");

        Ok(Some(ManualTriggerMarker {
            job_name: row.get("job_name"),
            last_updated: parse_ts("last_updated", &last_updated)?,
            owner_node: row.get("owner_node"),
        }))
    }

    async fn touch(&self, job_name: &str, owner_node: &str) -> Result<ManualTriggerMarker> {
        let marker = ManualTriggerMarker {
            job_name: job_name.to_string(),
            last_updated: now(),
            owner_node: Some(owner_node.to_string()),
        };

        let query = Query::insert()
            .into_table(TriggerMarkers::Table)
            .columns([
                TriggerMarkers::JobName,
                TriggerMarkers::LastUpdated,
                TriggerMarkers::OwnerNode,
            ])
            .values_panic([
                marker.job_name.clone().into(),
                format_ts(&marker.last_updated).into(),
                marker.owner_node.clone().into(),
            ])
            .on_conflict(
                OnConflict::column(TriggerMarkers::JobName)
                    .update_columns([TriggerMarkers::LastUpdated, TriggerMarkers::OwnerNode])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(marker)
    }
}
