//! FDR reconciler - settlement flow acquisition and reconciliation.
//!
//! Acquires payment settlement flows published by an upstream platform,
//! stages them, enriches them with metadata and itemized payments, and
//! reconciles each reported payment against the local ledger. At most one
//! run is live across the cluster at any time.

pub mod acquisition;
pub mod clients;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod interfaces;
pub mod iuv;
pub mod model;
pub mod pipeline;
pub mod reconciliation;
pub mod storage;
pub mod trigger;
pub mod utils;
