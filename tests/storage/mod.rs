//! Shared storage contract tests.
//!
//! Every storage implementation runs these against a fresh [`Stores`]
//! bundle. Each test uses its own keys so they can share one database.
//!
//! [`Stores`]: fdr_reconciler::storage::Stores

pub mod execution_store_tests;
pub mod flow_store_tests;
