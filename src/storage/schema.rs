//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Creditor domains table schema.
#[derive(Iden)]
pub enum CreditorDomains {
    Table,
    #[iden = "domain_code"]
    DomainCode,
    #[iden = "downloads_flows"]
    DownloadsFlows,
    #[iden = "aux_digit"]
    AuxDigit,
    #[iden = "segregation_code"]
    SegregationCode,
}

/// Staging flows table schema.
#[derive(Iden)]
pub enum StagingFlows {
    Table,
    #[iden = "domain_code"]
    DomainCode,
    #[iden = "flow_code"]
    FlowCode,
    #[iden = "psp_id"]
    PspId,
    #[iden = "revision"]
    Revision,
    #[iden = "published_at"]
    PublishedAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "details"]
    Details,
}

/// Reconciled flows table schema.
#[derive(Iden)]
pub enum ReconciledFlows {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "domain_code"]
    DomainCode,
    #[iden = "flow_code"]
    FlowCode,
    #[iden = "psp_id"]
    PspId,
    #[iden = "revision"]
    Revision,
    #[iden = "published_at"]
    PublishedAt,
    #[iden = "settlement_id"]
    SettlementId,
    #[iden = "flow_date"]
    FlowDate,
    #[iden = "settlement_date"]
    SettlementDate,
    #[iden = "declared_count"]
    DeclaredCount,
    #[iden = "declared_sum"]
    DeclaredSum,
    #[iden = "sender_name"]
    SenderName,
    #[iden = "receiver_name"]
    ReceiverName,
    #[iden = "flow_status"]
    FlowStatus,
    #[iden = "status"]
    Status,
    #[iden = "anomaly"]
    Anomaly,
    #[iden = "reconciled_at"]
    ReconciledAt,
}

/// Reconciliation items table schema.
#[derive(Iden)]
pub enum ReconciliationItems {
    Table,
    #[iden = "flow_id"]
    FlowId,
    #[iden = "ordinal"]
    Ordinal,
    #[iden = "iuv"]
    Iuv,
    #[iden = "iur"]
    Iur,
    #[iden = "item_index"]
    ItemIndex,
    #[iden = "amount"]
    Amount,
    #[iden = "outcome"]
    Outcome,
    #[iden = "paid_at"]
    PaidAt,
    #[iden = "status"]
    Status,
    #[iden = "anomaly"]
    Anomaly,
    #[iden = "payment_id"]
    PaymentId,
    #[iden = "position_item_id"]
    PositionItemId,
}

/// Local payments table schema.
#[derive(Iden)]
pub enum Payments {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "domain_code"]
    DomainCode,
    #[iden = "iuv"]
    Iuv,
    #[iden = "iur"]
    Iur,
    #[iden = "position_index"]
    PositionIndex,
    #[iden = "paid_amount"]
    PaidAmount,
    #[iden = "revoked_amount"]
    RevokedAmount,
    #[iden = "position_item_id"]
    PositionItemId,
}

/// Payment positions table schema.
#[derive(Iden)]
pub enum PaymentPositions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "domain_code"]
    DomainCode,
    #[iden = "iuv"]
    Iuv,
}

/// Payment position items table schema.
#[derive(Iden)]
pub enum PaymentPositionItems {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "position_id"]
    PositionId,
    #[iden = "position_index"]
    PositionIndex,
    #[iden = "amount_due"]
    AmountDue,
}

/// Execution records table schema.
#[derive(Iden)]
pub enum Executions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "job_name"]
    JobName,
    #[iden = "owner_node_id"]
    OwnerNodeId,
    #[iden = "status"]
    Status,
    #[iden = "start_time"]
    StartTime,
    #[iden = "end_time"]
    EndTime,
    #[iden = "last_updated"]
    LastUpdated,
    #[iden = "description"]
    Description,
    #[iden = "parameters"]
    Parameters,
}

/// Execution steps table schema.
#[derive(Iden)]
pub enum ExecutionSteps {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "execution_id"]
    ExecutionId,
    #[iden = "step_name"]
    StepName,
    #[iden = "status"]
    Status,
    #[iden = "start_time"]
    StartTime,
    #[iden = "end_time"]
    EndTime,
    #[iden = "read_count"]
    ReadCount,
    #[iden = "write_count"]
    WriteCount,
    #[iden = "skip_final_count"]
    SkipFinalCount,
    #[iden = "skip_staging_count"]
    SkipStagingCount,
    #[iden = "error_count"]
    ErrorCount,
    #[iden = "description"]
    Description,
}

/// Per-domain listing cursors.
#[derive(Iden)]
pub enum AcquisitionCursors {
    Table,
    #[iden = "domain_code"]
    DomainCode,
    #[iden = "listed_after"]
    ListedAfter,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Manual trigger marker table schema.
#[derive(Iden)]
pub enum TriggerMarkers {
    Table,
    #[iden = "job_name"]
    JobName,
    #[iden = "last_updated"]
    LastUpdated,
    #[iden = "owner_node"]
    OwnerNode,
}

/// SQL for creating all tables.
///
/// The partial unique index on open executions is the job mutex.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS creditor_domains (
    domain_code TEXT PRIMARY KEY,
    downloads_flows INTEGER NOT NULL DEFAULT 1,
    aux_digit INTEGER NOT NULL,
    segregation_code INTEGER
);

CREATE TABLE IF NOT EXISTS staging_flows (
    domain_code TEXT NOT NULL,
    flow_code TEXT NOT NULL,
    psp_id TEXT NOT NULL,
    revision INTEGER NOT NULL,
    published_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    details TEXT,
    PRIMARY KEY (domain_code, flow_code, psp_id, revision)
);

CREATE TABLE IF NOT EXISTS reconciled_flows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_code TEXT NOT NULL,
    flow_code TEXT NOT NULL,
    psp_id TEXT NOT NULL,
    revision INTEGER NOT NULL,
    published_at TEXT NOT NULL,
    settlement_id TEXT,
    flow_date TEXT,
    settlement_date TEXT,
    declared_count INTEGER,
    declared_sum TEXT,
    sender_name TEXT,
    receiver_name TEXT,
    flow_status TEXT,
    status TEXT NOT NULL,
    anomaly TEXT,
    reconciled_at TEXT NOT NULL,
    UNIQUE (flow_code, psp_id, revision)
);

CREATE INDEX IF NOT EXISTS idx_reconciled_domain_published
    ON reconciled_flows(domain_code, published_at);

CREATE TABLE IF NOT EXISTS reconciliation_items (
    flow_id INTEGER NOT NULL REFERENCES reconciled_flows(id),
    ordinal INTEGER NOT NULL,
    iuv TEXT NOT NULL,
    iur TEXT NOT NULL,
    item_index INTEGER,
    amount TEXT NOT NULL,
    outcome TEXT NOT NULL,
    paid_at TEXT,
    status TEXT NOT NULL,
    anomaly TEXT,
    payment_id INTEGER,
    position_item_id INTEGER,
    PRIMARY KEY (flow_id, ordinal)
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY,
    domain_code TEXT NOT NULL,
    iuv TEXT NOT NULL,
    iur TEXT,
    position_index INTEGER,
    paid_amount TEXT,
    revoked_amount TEXT,
    position_item_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_payments_domain_iuv ON payments(domain_code, iuv);

CREATE TABLE IF NOT EXISTS payment_positions (
    id INTEGER PRIMARY KEY,
    domain_code TEXT NOT NULL,
    iuv TEXT NOT NULL,
    UNIQUE (domain_code, iuv)
);

CREATE TABLE IF NOT EXISTS payment_position_items (
    id INTEGER PRIMARY KEY,
    position_id INTEGER NOT NULL REFERENCES payment_positions(id),
    position_index INTEGER NOT NULL,
    amount_due TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    job_name TEXT NOT NULL,
    owner_node_id TEXT,
    status TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    last_updated TEXT NOT NULL,
    description TEXT,
    parameters TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_open_job
    ON executions(job_name) WHERE end_time IS NULL;

CREATE TABLE IF NOT EXISTS execution_steps (
    id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL REFERENCES executions(id),
    step_name TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    read_count INTEGER NOT NULL DEFAULT 0,
    write_count INTEGER NOT NULL DEFAULT 0,
    skip_final_count INTEGER NOT NULL DEFAULT 0,
    skip_staging_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    description TEXT
);

CREATE TABLE IF NOT EXISTS acquisition_cursors (
    domain_code TEXT PRIMARY KEY,
    listed_after TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trigger_markers (
    job_name TEXT PRIMARY KEY,
    last_updated TEXT NOT NULL,
    owner_node TEXT
);
"#;
