//! Application layer: the reconciliation service and shared state.

pub mod service;
pub mod state;

pub use service::{ReconcilerService, WebhookSummary};
pub use state::AppState;
