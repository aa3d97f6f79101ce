//! Domain traits defining contracts for external collaborators.
//!
//! The user directory and document store are owned by the wider application;
//! this subsystem reads the former and performs exactly one conditional
//! mutation on the latter. The transaction ledger is owned here.

use async_trait::async_trait;

use super::error::AppError;
use super::types::{
    Chain, Document, DocumentType, LedgerEntry, LedgerUpsert, Notification, UpsertOutcome, User,
};

/// User directory keyed by per-chain wallet address columns.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up the user owning `address` on `chain`.
    ///
    /// EVM addresses compare case-insensitively; Solana and Stacks addresses
    /// compare exactly. Both the generic wallet column and the chain-specific
    /// column are checked. Absence of a match is not an error.
    async fn find_by_wallet(&self, chain: Chain, address: &str) -> Result<Option<User>, AppError>;
}

/// Document store holding invoices, payment links and contracts.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get a document by id.
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError>;

    /// Most recently created `PENDING` document of one of `types` owned by
    /// `user_id`, limit one. Heuristic single-pending-assumption match.
    async fn find_pending_for_user(
        &self,
        user_id: &str,
        types: &[DocumentType],
    ) -> Result<Option<Document>, AppError>;

    /// Transition a document to `PAID`, stamping `paid_at` and the paying
    /// transaction hash. The status check and write are one conditional
    /// statement; returns `false` when the document was already `PAID`.
    async fn mark_paid(&self, id: &str, tx_hash: &str) -> Result<bool, AppError>;

    /// Rollback compensation: re-open the document paid by `tx_hash` to
    /// `PENDING`. Returns the re-opened document id, if any.
    async fn reopen_by_tx(&self, tx_hash: &str) -> Result<Option<String>, AppError>;
}

/// Transaction ledger unique on `tx_hash`.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Check storage connectivity.
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert-or-update-on-conflict keyed by `tx_hash`. Redelivery refreshes
    /// mutable fields (status, inclusion height) and reports `Updated`.
    async fn upsert(&self, entry: &LedgerUpsert) -> Result<UpsertOutcome, AppError>;

    /// Fetch a ledger row by transaction hash.
    async fn get(&self, tx_hash: &str) -> Result<Option<LedgerEntry>, AppError>;

    /// Most recent ledger rows, newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<LedgerEntry>, AppError>;

    /// Mark a row `REVERTED` after a chain rollback. Returns `false` when no
    /// row exists for the hash.
    async fn mark_reverted(&self, tx_hash: &str) -> Result<bool, AppError>;
}

/// Notification sink: push delivery plus an in-app record.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification. Callers treat failures as non-fatal.
    async fn notify(&self, notification: &Notification) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal implementation exercising the trait object surface
    struct NoopSink;

    #[async_trait]
    impl NotificationSink for NoopSink {
        async fn notify(&self, _notification: &Notification) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notification_sink_object_safety() {
        let sink: std::sync::Arc<dyn NotificationSink> = std::sync::Arc::new(NoopSink);
        let n = Notification {
            user_id: "u1".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            data: serde_json::json!({}),
        };
        assert!(sink.notify(&n).await.is_ok());
    }
}
