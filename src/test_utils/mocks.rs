//! In-memory mock implementations of the storage and notification ports.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{
    AppError, Chain, DatabaseError, Document, DocumentStatus, DocumentStore, DocumentType,
    LedgerEntry, LedgerUpsert, Notification, NotificationSink, TransactionLedger,
    TransactionStatus, UpsertOutcome, User, UserDirectory,
};
use crate::infra::ingest::solana::SolanaTransaction;
use crate::infra::solana_rpc::TransactionDetailSource;

/// In-memory user directory.
#[derive(Default)]
pub struct MockUserDirectory {
    users: Mutex<Vec<User>>,
}

impl MockUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(
        &self,
        id: &str,
        evm: Option<&str>,
        solana: Option<&str>,
        stacks: Option<&str>,
    ) {
        self.users.lock().unwrap().push(User {
            id: id.to_string(),
            wallet_address: None,
            evm_address: evm.map(String::from),
            solana_address: solana.map(String::from),
            stacks_address: stacks.map(String::from),
            push_token: None,
        });
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn find_by_wallet(&self, chain: Chain, address: &str) -> Result<Option<User>, AppError> {
        let matches = |candidate: &Option<String>| {
            candidate.as_deref().is_some_and(|c| {
                if chain.case_insensitive_addresses() {
                    c.eq_ignore_ascii_case(address)
                } else {
                    c == address
                }
            })
        };

        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| {
                let column = match chain {
                    Chain::Solana => &u.solana_address,
                    Chain::Stacks => &u.stacks_address,
                    _ => &u.evm_address,
                };
                matches(column) || matches(&u.wallet_address)
            })
            .cloned())
    }
}

/// In-memory document store with the conditional PAID transition.
#[derive(Default)]
pub struct MockDocumentStore {
    documents: Mutex<Vec<Document>>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pending(&self, id: &str, user_id: &str, document_type: DocumentType, amount: f64) {
        self.documents.lock().unwrap().push(Document {
            id: id.to_string(),
            user_id: user_id.to_string(),
            document_type,
            status: DocumentStatus::Pending,
            amount,
            content: None,
            tx_hash: None,
            paid_at: None,
            created_at: Utc::now(),
        });
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        Ok(self.document(id))
    }

    async fn find_pending_for_user(
        &self,
        user_id: &str,
        types: &[DocumentType],
    ) -> Result<Option<Document>, AppError> {
        // Newest first, matching the ORDER BY created_at DESC LIMIT 1 query.
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|d| {
                d.user_id == user_id
                    && d.status == DocumentStatus::Pending
                    && types.contains(&d.document_type)
            })
            .cloned())
    }

    async fn mark_paid(&self, id: &str, tx_hash: &str) -> Result<bool, AppError> {
        let mut documents = self.documents.lock().unwrap();
        let Some(doc) = documents.iter_mut().find(|d| d.id == id) else {
            return Ok(false);
        };
        if doc.status == DocumentStatus::Paid {
            return Ok(false);
        }
        doc.status = DocumentStatus::Paid;
        doc.tx_hash = Some(tx_hash.to_string());
        doc.paid_at = Some(Utc::now());
        Ok(true)
    }

    async fn reopen_by_tx(&self, tx_hash: &str) -> Result<Option<String>, AppError> {
        let mut documents = self.documents.lock().unwrap();
        let Some(doc) = documents
            .iter_mut()
            .find(|d| d.tx_hash.as_deref() == Some(tx_hash) && d.status == DocumentStatus::Paid)
        else {
            return Ok(None);
        };
        doc.status = DocumentStatus::Pending;
        doc.tx_hash = None;
        doc.paid_at = None;
        Ok(Some(doc.id.clone()))
    }
}

/// In-memory transaction ledger with upsert tracking.
#[derive(Default)]
pub struct MockLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    upserts: Mutex<usize>,
    fail_on: Mutex<Option<String>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, tx_hash: &str) -> Option<LedgerEntry> {
        self.entries.lock().unwrap().get(tx_hash).cloned()
    }

    pub fn upsert_count(&self) -> usize {
        *self.upserts.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Make upserts for this transaction hash fail with a query error.
    pub fn fail_on(&self, tx_hash: &str) {
        *self.fail_on.lock().unwrap() = Some(tx_hash.to_string());
    }
}

#[async_trait]
impl TransactionLedger for MockLedger {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn upsert(&self, entry: &LedgerUpsert) -> Result<UpsertOutcome, AppError> {
        if self.fail_on.lock().unwrap().as_deref() == Some(entry.tx_hash.as_str()) {
            return Err(AppError::Database(DatabaseError::Query(
                "injected failure".to_string(),
            )));
        }

        *self.upserts.lock().unwrap() += 1;
        let mut entries = self.entries.lock().unwrap();
        let now = Utc::now();
        match entries.get_mut(&entry.tx_hash) {
            Some(existing) => {
                existing.status = entry.status;
                existing.block_height = entry.block_height.or(existing.block_height);
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                entries.insert(
                    entry.tx_hash.clone(),
                    LedgerEntry {
                        tx_hash: entry.tx_hash.clone(),
                        kind: entry.kind,
                        status: entry.status,
                        chain: entry.chain,
                        amount: entry.amount,
                        token: entry.token.clone(),
                        from_address: entry.from_address.clone(),
                        to_address: entry.to_address.clone(),
                        block_height: entry.block_height,
                        confirmed_at: entry.confirmed_at,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get(&self, tx_hash: &str) -> Result<Option<LedgerEntry>, AppError> {
        Ok(self.entry(tx_hash))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<LedgerEntry>, AppError> {
        let mut entries: Vec<LedgerEntry> =
            self.entries.lock().unwrap().values().cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.clamp(1, 100) as usize);
        Ok(entries)
    }

    async fn mark_reverted(&self, tx_hash: &str) -> Result<bool, AppError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(tx_hash) {
            Some(entry) => {
                entry.status = TransactionStatus::Reverted;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Notification sink recording everything it is asked to deliver.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<Notification>>,
    fail_with: Mutex<Option<String>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl NotificationSink for MockNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(AppError::Internal(message));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Canned transaction-detail source for Solana enrichment tests.
#[derive(Default)]
pub struct MockDetailSource {
    details: Mutex<HashMap<String, SolanaTransaction>>,
}

impl MockDetailSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_detail(&self, detail: SolanaTransaction) {
        self.details
            .lock()
            .unwrap()
            .insert(detail.signature.clone(), detail);
    }
}

#[async_trait]
impl TransactionDetailSource for MockDetailSource {
    async fn transaction_detail(
        &self,
        signature: &str,
    ) -> Result<Option<SolanaTransaction>, AppError> {
        Ok(self.details.lock().unwrap().get(signature).cloned())
    }
}
