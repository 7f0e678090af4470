//! Coordination records: pipeline executions, their steps, and the shared
//! manual-trigger marker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an execution or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Abandoned,
    Unknown,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Already inconsistent states that can never make progress.
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, Self::Abandoned | Self::Unknown)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "ABANDONED" => Ok(Self::Abandoned),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    Scheduled,
    Manual,
}

impl ActivationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

/// Free-form run parameters, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    pub invoked_at: DateTime<Utc>,
    pub activation: ActivationKind,
}

impl RunParameters {
    pub fn now(activation: ActivationKind) -> Self {
        Self {
            invoked_at: Utc::now(),
            activation,
        }
    }
}

/// Coordination row for one pipeline run.
///
/// A record whose `end_time` is unset holds the job's lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub job_name: String,
    pub owner_node_id: Option<String>,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub description: Option<String>,
    pub parameters: RunParameters,
}

impl ExecutionRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Read/write/skip counters for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub read: u64,
    pub written: u64,
    /// Skipped because the flow is already reconciled.
    pub skipped_in_final: u64,
    /// Skipped because the flow is already staged.
    pub skipped_in_staging: u64,
    /// Items skipped after errors.
    pub errors: u64,
}

impl StageStats {
    pub fn merge(&mut self, other: &StageStats) {
        self.read += other.read;
        self.written += other.written;
        self.skipped_in_final += other.skipped_in_final;
        self.skipped_in_staging += other.skipped_in_staging;
        self.errors += other.errors;
    }
}

/// One stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_name: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub stats: StageStats,
    pub description: Option<String>,
}

/// Shared row advanced whenever a manual run is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualTriggerMarker {
    pub job_name: String,
    pub last_updated: DateTime<Utc>,
    pub owner_node: Option<String>,
}
