//! SQLite ExecutionStore implementation.
//!
//! The partial unique index on `executions(job_name) WHERE end_time IS NULL`
//! makes `insert_running` the cluster-wide mutex: a second open row for the
//! same job is rejected by the database, whichever node attempts it.

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{format_ts, now, parse_enum, parse_opt_ts, parse_ts};
use crate::model::{
    ExecutionRecord, ExecutionStatus, RunParameters, StageStats, StepRecord,
};
use crate::storage::schema::{ExecutionSteps, Executions};
use crate::storage::{ExecutionStore, Result, StorageError};

/// SQLite implementation of ExecutionStore.
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Create a new SQLite execution store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write a record verbatim. Used to provision history and in tests.
    pub async fn insert_record(&self, record: &ExecutionRecord) -> Result<()> {
        let query = insert_record_query(record)?;
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

fn execution_columns() -> [Executions; 9] {
    [
        Executions::Id,
        Executions::JobName,
        Executions::OwnerNodeId,
        Executions::Status,
        Executions::StartTime,
        Executions::EndTime,
        Executions::LastUpdated,
        Executions::Description,
        Executions::Parameters,
    ]
}

fn step_columns() -> [ExecutionSteps; 12] {
    [
        ExecutionSteps::Id,
        ExecutionSteps::ExecutionId,
        ExecutionSteps::StepName,
        ExecutionSteps::Status,
        ExecutionSteps::StartTime,
        ExecutionSteps::EndTime,
        ExecutionSteps::ReadCount,
        ExecutionSteps::WriteCount,
        ExecutionSteps::SkipFinalCount,
        ExecutionSteps::SkipStagingCount,
        ExecutionSteps::ErrorCount,
        ExecutionSteps::Description,
    ]
}

fn insert_record_query(record: &ExecutionRecord) -> Result<String> {
    let parameters = serde_json::to_string(&record.parameters)?;
    Ok(Query::insert()
        .into_table(Executions::Table)
        .columns(execution_columns())
        .values_panic([
            record.id.to_string().into(),
            record.job_name.clone().into(),
            record.owner_node_id.clone().into(),
            record.status.as_str().into(),
            format_ts(&record.start_time).into(),
            record.end_time.as_ref().map(format_ts).into(),
            format_ts(&record.last_updated).into(),
            record.description.clone().into(),
            parameters.into(),
        ])
        .to_string(SqliteQueryBuilder))
}

fn parse_uuid(column: &'static str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| StorageError::InvalidValue {
        column,
        message: e.to_string(),
    })
}

fn row_to_execution(row: &SqliteRow) -> Result<ExecutionRecord> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let start_time: String = row.get("start_time");
    let last_updated: String = row.get("last_updated");
    let parameters: String = row.get("parameters");

    Ok(ExecutionRecord {
        id: parse_uuid("id", &id)?,
        job_name: row.get("job_name"),
        owner_node_id: row.get("owner_node_id"),
        status: parse_enum("status", &status)?,
        start_time: parse_ts("start_time", &start_time)?,
        end_time: parse_opt_ts("end_time", row.get("end_time"))?,
        last_updated: parse_ts("last_updated", &last_updated)?,
        description: row.get("description"),
        parameters: serde_json::from_str(&parameters)?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<StepRecord> {
    let id: String = row.get("id");
    let execution_id: String = row.get("execution_id");
    let status: String = row.get("status");
    let start_time: String = row.get("start_time");
    let count = |column: &str| row.get::<i64, _>(column).max(0) as u64;

    Ok(StepRecord {
        id: parse_uuid("id", &id)?,
        execution_id: parse_uuid("execution_id", &execution_id)?,
        step_name: row.get("step_name"),
        status: parse_enum("status", &status)?,
        start_time: parse_ts("start_time", &start_time)?,
        end_time: parse_opt_ts("end_time", row.get("end_time"))?,
        stats: StageStats {
            read: count("read_count"),
            written: count("write_count"),
            skipped_in_final: count("skip_final_count"),
            skipped_in_staging: count("skip_staging_count"),
            errors: count("error_count"),
        },
        description: row.get("description"),
    })
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn find_open(&self, job_name: &str) -> Result<Option<ExecutionRecord>> {
        let query = Query::select()
            .columns(execution_columns())
            .from(Executions::Table)
            .and_where(Expr::col(Executions::JobName).eq(job_name))
            .and_where(Expr::col(Executions::EndTime).is_null())
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_execution).transpose()
    }

    async fn insert_running(
        &self,
        job_name: &str,
        owner_node_id: &str,
        parameters: &RunParameters,
    ) -> Result<Option<ExecutionRecord>> {
        let now = now();
        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            owner_node_id: Some(owner_node_id.to_string()),
            status: ExecutionStatus::Running,
            start_time: now,
            end_time: None,
            last_updated: now,
            description: None,
            parameters: parameters.clone(),
        };
        let query = insert_record_query(&record)?;

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(Some(record)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(job_name, "Open execution already exists");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn close(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        description: Option<&str>,
    ) -> Result<bool> {
        let now = format_ts(&now());
        let query = Query::update()
            .table(Executions::Table)
            .values([
                (Executions::Status, status.as_str().into()),
                (Executions::EndTime, now.clone().into()),
                (Executions::LastUpdated, now.into()),
                (Executions::Description, description.map(str::to_string).into()),
            ])
            .and_where(Expr::col(Executions::Id).eq(id.to_string()))
            .and_where(Expr::col(Executions::EndTime).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let query = Query::select()
            .columns(execution_columns())
            .from(Executions::Table)
            .and_where(Expr::col(Executions::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_execution).transpose()
    }

    async fn start_step(&self, execution_id: Uuid, step_name: &str) -> Result<StepRecord> {
        let step = StepRecord {
            id: Uuid::new_v4(),
            execution_id,
            step_name: step_name.to_string(),
            status: ExecutionStatus::Running,
            start_time: now(),
            end_time: None,
            stats: StageStats::default(),
            description: None,
        };

        let query = Query::insert()
            .into_table(ExecutionSteps::Table)
            .columns([
                ExecutionSteps::Id,
                ExecutionSteps::ExecutionId,
                ExecutionSteps::StepName,
                ExecutionSteps::Status,
                ExecutionSteps::StartTime,
            ])
            .values_panic([
                step.id.to_string().into(),
                execution_id.to_string().into(),
                step.step_name.clone().into(),
                step.status.as_str().into(),
                format_ts(&step.start_time).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;

        // Keeps the owning execution's heartbeat current.
        let touch = Query::update()
            .table(Executions::Table)
            .values([(Executions::LastUpdated, format_ts(&step.start_time).into())])
            .and_where(Expr::col(Executions::Id).eq(execution_id.to_string()))
            .and_where(Expr::col(Executions::EndTime).is_null())
            .to_string(SqliteQueryBuilder);
        sqlx::query(&touch).execute(&self.pool).await?;

        Ok(step)
    }

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: ExecutionStatus,
        stats: &StageStats,
        description: Option<&str>,
    ) -> Result<()> {
        let query = Query::update()
            .table(ExecutionSteps::Table)
            .values([
                (ExecutionSteps::Status, status.as_str().into()),
                (ExecutionSteps::EndTime, format_ts(&now()).into()),
                (ExecutionSteps::ReadCount, (stats.read as i64).into()),
                (ExecutionSteps::WriteCount, (stats.written as i64).into()),
                (ExecutionSteps::SkipFinalCount, (stats.skipped_in_final as i64).into()),
                (ExecutionSteps::SkipStagingCount, (stats.skipped_in_staging as i64).into()),
                (ExecutionSteps::ErrorCount, (stats.errors as i64).into()),
                (ExecutionSteps::Description, description.map(str::to_string).into()),
            ])
            .and_where(Expr::col(ExecutionSteps::Id).eq(step_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("execution step {step_id}")));
        }
        Ok(())
    }

    async fn fail_open_steps(&self, execution_id: Uuid, description: &str) -> Result<u64> {
        let query = Query::update()
            .table(ExecutionSteps::Table)
            .values([
                (ExecutionSteps::Status, ExecutionStatus::Failed.as_str().into()),
                (ExecutionSteps::EndTime, format_ts(&now()).into()),
                (ExecutionSteps::Description, description.into()),
            ])
            .and_where(Expr::col(ExecutionSteps::ExecutionId).eq(execution_id.to_string()))
            .and_where(Expr::col(ExecutionSteps::EndTime).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn steps(&self, execution_id: Uuid) -> Result<Vec<StepRecord>> {
        let query = Query::select()
            .columns(step_columns())
            .from(ExecutionSteps::Table)
            .and_where(Expr::col(ExecutionSteps::ExecutionId).eq(execution_id.to_string()))
            .order_by(ExecutionSteps::StartTime, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_step).collect()
    }
}
