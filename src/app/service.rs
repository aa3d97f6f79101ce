//! Reconciliation service: the pipeline between a classified webhook event
//! and the ledger, document and notification side effects.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, Document, DocumentStore, DocumentType, HealthResponse, HealthStatus, LedgerEntry,
    LedgerUpsert, Notification, NotificationSink, TransactionKind, TransactionLedger,
    TransferEvent, UpsertOutcome, User, UserDirectory,
};
use crate::infra::ingest::{self, solana, stacks, NormalizedBatch, WebhookEvent};
use crate::infra::solana_rpc::TransactionDetailSource;

/// Document types a payment can settle. Contracts are signed, not paid.
const PAYABLE_TYPES: &[DocumentType] = &[DocumentType::Invoice, DocumentType::PaymentLink];

/// Per-delivery outcome counts, logged after every webhook.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WebhookSummary {
    /// Transfers written to the ledger.
    pub processed: usize,
    /// Items dropped during normalization or without a known recipient.
    pub skipped: usize,
    /// Transfers whose processing errored; the rest of the batch continued.
    pub failed: usize,
    /// Ledger rows compensated after a chain rollback.
    pub reverted: usize,
}

/// Core service wiring the storage and notification ports together.
pub struct ReconcilerService {
    users: Arc<dyn UserDirectory>,
    documents: Arc<dyn DocumentStore>,
    ledger: Arc<dyn TransactionLedger>,
    notifier: Arc<dyn NotificationSink>,
    solana_rpc: Option<Arc<dyn TransactionDetailSource>>,
    lookup_delay: Duration,
}

impl ReconcilerService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        documents: Arc<dyn DocumentStore>,
        ledger: Arc<dyn TransactionLedger>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            users,
            documents,
            ledger,
            notifier,
            solana_rpc: None,
            lookup_delay: crate::infra::solana_rpc::DEFAULT_LOOKUP_DELAY,
        }
    }

    /// Enable RPC detail lookups for Solana notices without balance data.
    #[must_use]
    pub fn with_solana_rpc(
        mut self,
        rpc: Arc<dyn TransactionDetailSource>,
        lookup_delay: Duration,
    ) -> Self {
        self.solana_rpc = Some(rpc);
        self.lookup_delay = lookup_delay;
        self
    }

    /// Process one classified webhook delivery end to end.
    #[instrument(skip(self, event))]
    pub async fn process_webhook_event(
        &self,
        event: WebhookEvent,
    ) -> Result<WebhookSummary, AppError> {
        let summary = match event {
            WebhookEvent::EvmActivity(payload) => {
                let batch = ingest::evm::normalize(&payload.event);
                self.process_batch(batch).await
            }
            WebhookEvent::SolanaActivity(payload) => {
                let batch = self.normalize_solana(&payload.event).await;
                self.process_batch(batch).await
            }
            WebhookEvent::ChainhookBlocks(payload) => self.process_chainhook(&payload).await,
        };

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            reverted = summary.reverted,
            "Webhook delivery processed"
        );
        Ok(summary)
    }

    /// Normalize a Solana batch, fetching transaction details over RPC for
    /// notices that arrive without balance metadata. Lookups are sequential
    /// with a fixed delay to stay under provider rate limits.
    async fn normalize_solana(&self, event: &solana::SolanaActivityEvent) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut looked_up = false;

        for tx in &event.transaction {
            let enriched;
            let tx = if !tx.has_balance_data() && !tx.is_vote {
                match &self.solana_rpc {
                    Some(rpc) => {
                        if looked_up {
                            tokio::time::sleep(self.lookup_delay).await;
                        }
                        looked_up = true;
                        match rpc.transaction_detail(&tx.signature).await {
                            Ok(Some(detail)) => {
                                enriched = detail;
                                &enriched
                            }
                            Ok(None) => {
                                debug!(signature = %tx.signature, "No transaction detail on node, skipping");
                                batch.skipped += 1;
                                continue;
                            }
                            Err(e) => {
                                warn!(signature = %tx.signature, error = %e, "Detail lookup failed, skipping");
                                batch.skipped += 1;
                                continue;
                            }
                        }
                    }
                    None => tx,
                }
            } else {
                tx
            };

            match solana::normalize_transaction(tx) {
                Some(transfer) => batch.events.push(transfer),
                None => batch.skipped += 1,
            }
        }

        batch
    }

    async fn process_chainhook(&self, payload: &stacks::ChainhookPayload) -> WebhookSummary {
        let batch = stacks::normalize_apply(&payload.event);
        let mut summary = self.process_batch(batch).await;

        for tx_hash in stacks::rollback_tx_hashes(&payload.event) {
            match self.revert_transaction(&tx_hash).await {
                Ok(true) => summary.reverted += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!(tx_hash = %tx_hash, error = %e, "Rollback compensation failed");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Run every normalized transfer through the pipeline. One transfer
    /// failing never aborts the rest of the batch.
    async fn process_batch(&self, batch: NormalizedBatch) -> WebhookSummary {
        let mut summary = WebhookSummary {
            skipped: batch.skipped,
            ..Default::default()
        };

        for event in &batch.events {
            match self.process_transfer(event).await {
                Ok(true) => summary.processed += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!(
                        tx_id = %event.tx_id,
                        chain = %event.chain,
                        error = %e,
                        "Failed to process transfer"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Resolve, match, record and notify for one transfer. Returns `false`
    /// when neither party is a known user.
    #[instrument(skip(self, event), fields(tx_id = %event.tx_id, chain = %event.chain))]
    async fn process_transfer(&self, event: &TransferEvent) -> Result<bool, AppError> {
        let recipient = self
            .users
            .find_by_wallet(event.chain, &event.to_address)
            .await?;
        let sender = if event.from_address.is_empty() {
            None
        } else {
            self.users
                .find_by_wallet(event.chain, &event.from_address)
                .await?
        };

        // Activity between two external counterparties carries nothing for us
        // to record; an outgoing transfer to an external counterparty is
        // still a known user's outflow and goes into the ledger.
        if recipient.is_none() && sender.is_none() {
            debug!(to_address = %event.to_address, "Neither party is a known user, skipping");
            return Ok(false);
        }

        let document = match &recipient {
            Some(recipient) => self.match_document(event, recipient).await?,
            None => None,
        };
        let kind = if document.is_some() {
            TransactionKind::Payment
        } else {
            TransactionKind::Transfer
        };

        let outcome = self
            .ledger
            .upsert(&LedgerUpsert::from_event(event, kind))
            .await?;

        match &document {
            Some(doc) => {
                // The status check lives in the store; a redelivered webhook
                // finds the document already PAID and does not notify again.
                let transitioned = self.documents.mark_paid(&doc.id, &event.tx_id).await?;
                if transitioned {
                    info!(document_id = %doc.id, "Document paid");
                    self.notify_paid(doc, event).await;
                }
            }
            None => {
                if outcome == UpsertOutcome::Inserted {
                    if let Some(recipient) = &recipient {
                        self.notify_received(recipient, event).await;
                    }
                }
            }
        }

        // An outgoing transfer from one of our users gets its own notice,
        // gated on first insert so redelivery stays quiet.
        if outcome == UpsertOutcome::Inserted {
            if let Some(sender) = &sender {
                let self_transfer = recipient.as_ref().is_some_and(|r| r.id == sender.id);
                if !self_transfer {
                    self.notify_sent(sender, event).await;
                }
            }
        }

        Ok(true)
    }

    /// Find the document this transfer settles.
    ///
    /// An explicit document reference (Stacks `pay-invoice` argument) wins;
    /// otherwise the recipient's most recent `PENDING` payable document is
    /// taken on the assumption that a freelancer rarely has more than one
    /// outstanding at a time.
    async fn match_document(
        &self,
        event: &TransferEvent,
        recipient: &User,
    ) -> Result<Option<Document>, AppError> {
        if let Some(document_id) = &event.document_id {
            match self.documents.get_document(document_id).await? {
                Some(doc) => return Ok(Some(doc)),
                None => {
                    warn!(document_id = %document_id, "Referenced document not found, falling back to heuristic match");
                }
            }
        }

        self.documents
            .find_pending_for_user(&recipient.id, PAYABLE_TYPES)
            .await
    }

    /// Compensate a rolled-back transaction: flag the ledger row and re-open
    /// the document it paid. Returns `false` when the hash was never recorded.
    async fn revert_transaction(&self, tx_hash: &str) -> Result<bool, AppError> {
        let reverted = self.ledger.mark_reverted(tx_hash).await?;
        if !reverted {
            debug!(tx_hash = %tx_hash, "Rollback for unknown transaction, nothing to compensate");
            return Ok(false);
        }

        if let Some(document_id) = self.documents.reopen_by_tx(tx_hash).await? {
            warn!(tx_hash = %tx_hash, document_id = %document_id, "Chain rollback re-opened a paid document");
        }
        Ok(true)
    }

    async fn notify_paid(&self, document: &Document, event: &TransferEvent) {
        let notification = Notification {
            user_id: document.user_id.clone(),
            title: match document.document_type {
                DocumentType::PaymentLink => "Payment link paid".to_string(),
                _ => "Invoice paid".to_string(),
            },
            body: format!(
                "You received {} {} on {}",
                event.display_value, event.asset, event.chain
            ),
            data: serde_json::json!({
                "documentId": document.id,
                "txHash": event.tx_id,
                "chain": event.chain,
            }),
        };
        self.dispatch(notification).await;
    }

    async fn notify_received(&self, recipient: &User, event: &TransferEvent) {
        let notification = Notification {
            user_id: recipient.id.clone(),
            title: "Payment received".to_string(),
            body: format!(
                "You received {} {} on {}",
                event.display_value, event.asset, event.chain
            ),
            data: serde_json::json!({
                "txHash": event.tx_id,
                "chain": event.chain,
            }),
        };
        self.dispatch(notification).await;
    }

    async fn notify_sent(&self, sender: &User, event: &TransferEvent) {
        let notification = Notification {
            user_id: sender.id.clone(),
            title: "Payment sent".to_string(),
            body: format!(
                "You sent {} {} on {}",
                event.display_value, event.asset, event.chain
            ),
            data: serde_json::json!({
                "txHash": event.tx_id,
                "chain": event.chain,
            }),
        };
        self.dispatch(notification).await;
    }

    /// Notifications never fail the pipeline; the ledger write already
    /// happened and a redelivery must not be provoked by a push outage.
    async fn dispatch(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(user_id = %notification.user_id, error = %e, "Notification delivery failed");
        }
    }

    /// Most recent ledger rows for the read endpoint.
    pub async fn recent_transactions(&self, limit: i64) -> Result<Vec<LedgerEntry>, AppError> {
        self.ledger.list_recent(limit).await
    }

    /// Aggregate health over the storage dependency.
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.ledger.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                error!(error = %e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };
        HealthResponse::new(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chain, DocumentStatus, TransactionStatus};
    use crate::test_utils::mocks::{
        MockDocumentStore, MockLedger, MockNotifier, MockUserDirectory,
    };
    use chrono::Utc;

    fn transfer(chain: Chain, tx_id: &str, to: &str, amount: f64) -> TransferEvent {
        TransferEvent {
            chain,
            tx_id: tx_id.to_string(),
            from_address: "0xsender".to_string(),
            to_address: to.to_string(),
            asset: "USDC".to_string(),
            raw_value: "100000000".to_string(),
            display_value: amount,
            block_height: Some(100),
            timestamp: Utc::now(),
            document_id: None,
        }
    }

    struct Fixture {
        users: Arc<MockUserDirectory>,
        documents: Arc<MockDocumentStore>,
        ledger: Arc<MockLedger>,
        notifier: Arc<MockNotifier>,
        service: ReconcilerService,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MockUserDirectory::new());
        let documents = Arc::new(MockDocumentStore::new());
        let ledger = Arc::new(MockLedger::new());
        let notifier = Arc::new(MockNotifier::new());
        let service = ReconcilerService::new(
            users.clone(),
            documents.clone(),
            ledger.clone(),
            notifier.clone(),
        );
        Fixture {
            users,
            documents,
            ledger,
            notifier,
            service,
        }
    }

    #[tokio::test]
    async fn test_payment_marks_document_and_notifies() {
        let f = fixture();
        f.users.add_user("u1", Some("0xABCDEF"), None, None);
        f.documents
            .add_pending("doc1", "u1", DocumentType::Invoice, 100.0);

        let event = transfer(Chain::Base, "0xtx1", "0xabcdef", 100.0);
        let ok = f.service.process_transfer(&event).await.unwrap();
        assert!(ok);

        let entry = f.ledger.entry("0xtx1").unwrap();
        assert_eq!(entry.kind, TransactionKind::Payment);
        assert_eq!(entry.status, TransactionStatus::Confirmed);

        let doc = f.documents.document("doc1").unwrap();
        assert_eq!(doc.status, DocumentStatus::Paid);
        assert_eq!(doc.tx_hash.as_deref(), Some("0xtx1"));

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, "u1");
        assert_eq!(sent[0].title, "Invoice paid");
    }

    #[tokio::test]
    async fn test_redelivery_does_not_notify_twice() {
        let f = fixture();
        f.users.add_user("u1", Some("0xabcdef"), None, None);
        f.documents
            .add_pending("doc1", "u1", DocumentType::Invoice, 100.0);

        let event = transfer(Chain::Base, "0xtx1", "0xabcdef", 100.0);
        f.service.process_transfer(&event).await.unwrap();
        f.service.process_transfer(&event).await.unwrap();

        assert_eq!(f.ledger.upsert_count(), 2);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_between_external_parties_skipped() {
        let f = fixture();
        let event = transfer(Chain::Base, "0xtx1", "0xnobody", 5.0);
        let ok = f.service.process_transfer(&event).await.unwrap();
        assert!(!ok);
        assert!(f.ledger.entry("0xtx1").is_none());
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_outgoing_transfer_to_external_counterparty_recorded() {
        let f = fixture();
        f.users.add_user("u-sender", Some("0xsender"), None, None);

        let event = transfer(Chain::Base, "0xout1", "0xexternal", 25.0);
        let ok = f.service.process_transfer(&event).await.unwrap();
        assert!(ok);

        let entry = f.ledger.entry("0xout1").unwrap();
        assert_eq!(entry.kind, TransactionKind::Transfer);
        assert_eq!(entry.to_address, "0xexternal");

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, "u-sender");
        assert_eq!(sent[0].title, "Payment sent");

        // Redelivery: row count and notifications stay put
        f.service.process_transfer(&event).await.unwrap();
        assert_eq!(f.ledger.len(), 1);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_plain_transfer_notifies_on_first_insert_only() {
        let f = fixture();
        f.users.add_user("u1", Some("0xabcdef"), None, None);

        let event = transfer(Chain::Ethereum, "0xtx2", "0xabcdef", 0.5);
        f.service.process_transfer(&event).await.unwrap();
        f.service.process_transfer(&event).await.unwrap();

        let entry = f.ledger.entry("0xtx2").unwrap();
        assert_eq!(entry.kind, TransactionKind::Transfer);
        assert_eq!(f.notifier.sent().len(), 1);
        assert_eq!(f.notifier.sent()[0].title, "Payment received");
    }

    #[tokio::test]
    async fn test_known_sender_notified_once() {
        let f = fixture();
        f.users.add_user("u-recv", Some("0xabcdef"), None, None);
        f.users.add_user("u-send", Some("0xsender"), None, None);

        let event = transfer(Chain::Base, "0xtx5", "0xabcdef", 10.0);
        f.service.process_transfer(&event).await.unwrap();
        f.service.process_transfer(&event).await.unwrap();

        let sent = f.notifier.sent();
        let to_sender: Vec<_> = sent.iter().filter(|n| n.user_id == "u-send").collect();
        assert_eq!(to_sender.len(), 1);
        assert_eq!(to_sender[0].title, "Payment sent");
    }

    #[tokio::test]
    async fn test_notification_failure_is_swallowed() {
        let f = fixture();
        f.users.add_user("u1", Some("0xabcdef"), None, None);
        f.notifier.fail_with("push gateway down");

        let event = transfer(Chain::Base, "0xtx3", "0xabcdef", 1.0);
        let ok = f.service.process_transfer(&event).await.unwrap();
        assert!(ok);
        assert!(f.ledger.entry("0xtx3").is_some());
    }

    #[tokio::test]
    async fn test_explicit_document_reference_wins() {
        let f = fixture();
        f.users
            .add_user("u1", None, None, Some("SP2RECIPIENT"));
        f.documents
            .add_pending("doc-newer", "u1", DocumentType::Invoice, 50.0);
        f.documents
            .add_pending("doc-referenced", "u1", DocumentType::Invoice, 100.0);

        let mut event = transfer(Chain::Stacks, "0xstx1", "SP2RECIPIENT", 100.0);
        event.document_id = Some("doc-referenced".to_string());

        f.service.process_transfer(&event).await.unwrap();
        let doc = f.documents.document("doc-referenced").unwrap();
        assert_eq!(doc.status, DocumentStatus::Paid);
        assert_eq!(
            f.documents.document("doc-newer").unwrap().status,
            DocumentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_rollback_reverts_ledger_and_reopens_document() {
        let f = fixture();
        f.users.add_user("u1", None, None, Some("SP2RECIPIENT"));
        f.documents
            .add_pending("doc1", "u1", DocumentType::Invoice, 2.5);

        let event = transfer(Chain::Stacks, "0xstx9", "SP2RECIPIENT", 2.5);
        f.service.process_transfer(&event).await.unwrap();
        assert_eq!(
            f.documents.document("doc1").unwrap().status,
            DocumentStatus::Paid
        );

        let reverted = f.service.revert_transaction("0xstx9").await.unwrap();
        assert!(reverted);
        assert_eq!(
            f.ledger.entry("0xstx9").unwrap().status,
            TransactionStatus::Reverted
        );
        assert_eq!(
            f.documents.document("doc1").unwrap().status,
            DocumentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_rollback_for_unknown_hash_is_noop() {
        let f = fixture();
        let reverted = f.service.revert_transaction("0xmissing").await.unwrap();
        assert!(!reverted);
    }

    #[tokio::test]
    async fn test_solana_notice_without_balances_enriched_over_rpc() {
        use crate::infra::ingest::solana::{SolanaActivityEvent, SolanaTransaction};
        use crate::test_utils::mocks::MockDetailSource;

        let f = fixture();
        f.users.add_user("u1", None, Some("Receiver1111"), None);

        let bare = SolanaTransaction {
            signature: "sig-1".to_string(),
            slot: None,
            is_vote: false,
            account_keys: vec![],
            pre_balances: vec![],
            post_balances: vec![],
            pre_token_balances: vec![],
            post_token_balances: vec![],
            block_time: None,
        };
        let detail = SolanaTransaction {
            slot: Some(250_000_000),
            account_keys: vec!["Sender1111".to_string(), "Receiver1111".to_string()],
            pre_balances: vec![100, 50],
            post_balances: vec![80, 70],
            block_time: Some(1_700_000_000),
            ..bare.clone()
        };

        let source = Arc::new(MockDetailSource::new());
        source.add_detail(detail);

        let service = ReconcilerService::new(
            f.users.clone(),
            f.documents.clone(),
            f.ledger.clone(),
            f.notifier.clone(),
        )
        .with_solana_rpc(source, Duration::ZERO);

        let event = SolanaActivityEvent {
            network: "SOLANA_MAINNET".to_string(),
            transaction: vec![bare],
        };
        let batch = service.normalize_solana(&event).await;
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].to_address, "Receiver1111");

        let summary = service.process_batch(batch).await;
        assert_eq!(summary.processed, 1);
        assert!(f.ledger.entry("sig-1").is_some());
    }

    #[tokio::test]
    async fn test_solana_notice_without_balances_skipped_when_no_rpc() {
        use crate::infra::ingest::solana::{SolanaActivityEvent, SolanaTransaction};

        let f = fixture();
        let event = SolanaActivityEvent {
            network: "SOLANA_MAINNET".to_string(),
            transaction: vec![SolanaTransaction {
                signature: "sig-bare".to_string(),
                slot: None,
                is_vote: false,
                account_keys: vec![],
                pre_balances: vec![],
                post_balances: vec![],
                pre_token_balances: vec![],
                post_token_balances: vec![],
                block_time: None,
            }],
        };

        let batch = f.service.normalize_solana(&event).await;
        assert!(batch.events.is_empty());
        assert_eq!(batch.skipped, 1);
    }

    #[tokio::test]
    async fn test_batch_continues_past_failing_transfer() {
        let f = fixture();
        f.users.add_user("u1", Some("0xabcdef"), None, None);
        f.ledger.fail_on("0xboom");

        let batch = NormalizedBatch {
            events: vec![
                transfer(Chain::Base, "0xboom", "0xabcdef", 1.0),
                transfer(Chain::Base, "0xfine", "0xabcdef", 2.0),
            ],
            skipped: 0,
        };

        let summary = f.service.process_batch(batch).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 1);
        assert!(f.ledger.entry("0xfine").is_some());
    }
}
