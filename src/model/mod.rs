//! Domain model for flow acquisition and reconciliation.

pub mod creditor;
pub mod execution;
pub mod flow;
pub mod ledger;

pub use creditor::{AuxDigit, CreditorDomain};
pub use execution::{
    ActivationKind, ExecutionRecord, ExecutionStatus, ManualTriggerMarker, RunParameters,
    StageStats, StepRecord,
};
pub use flow::{
    FlowDetails, FlowKey, FlowStatus, ItemStatus, PaymentOutcome, ReconciledFlow,
    ReconciliationItem, StagingFlow,
};
pub use ledger::{LookupVariant, Payment, PaymentLookup, PaymentPosition, PaymentPositionItem};
