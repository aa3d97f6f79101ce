//! Payment-activity reconciliation service.
//!
//! Turns heterogeneous blockchain webhook payloads (EVM address-activity,
//! Solana address-activity, Stacks chainhook blocks) into a canonical,
//! idempotent transaction ledger with downstream document-status transitions
//! and best-effort notifications.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
