//! Domain types for the reconciliation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Supported chain families.
///
/// Address-activity webhooks cover the EVM chains and Solana; Stacks events
/// arrive through the chainhook subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Chain {
    Ethereum,
    Base,
    Celo,
    Solana,
    Stacks,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ETHEREUM",
            Self::Base => "BASE",
            Self::Celo => "CELO",
            Self::Solana => "SOLANA",
            Self::Stacks => "STACKS",
        }
    }

    /// Whether addresses on this chain compare case-insensitively.
    ///
    /// EVM hex addresses are checksummed variants of the same bytes; Solana
    /// (base58) and Stacks (c32) encodings are case-sensitive.
    pub fn case_insensitive_addresses(&self) -> bool {
        matches!(self, Self::Ethereum | Self::Base | Self::Celo)
    }

    /// Map a provider network name (e.g. `BASE_MAINNET`, `eth-mainnet`) to a
    /// chain family. Separators are stripped and matching is by substring.
    pub fn from_provider(network: &str) -> Option<Self> {
        let normalized: String = network
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if normalized.contains("solana") {
            Some(Self::Solana)
        } else if normalized.contains("base") {
            Some(Self::Base)
        } else if normalized.contains("celo") {
            Some(Self::Celo)
        } else if normalized.contains("stacks") {
            Some(Self::Stacks)
        } else if normalized.contains("eth") {
            Some(Self::Ethereum)
        } else {
            None
        }
    }
}

impl std::str::FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ETHEREUM" => Ok(Self::Ethereum),
            "BASE" => Ok(Self::Base),
            "CELO" => Ok(Self::Celo),
            "SOLANA" => Ok(Self::Solana),
            "STACKS" => Ok(Self::Stacks),
            _ => Err(format!("Invalid chain: {}", s)),
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical transfer event all three source formats normalize into.
///
/// Invariants: `from_address` and `to_address` are never both empty, and
/// `raw_value` is a non-negative integer string in the asset's smallest unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferEvent {
    pub chain: Chain,
    /// Chain-native unique transaction identifier (EVM tx hash, Solana
    /// signature, Stacks tx hash). Idempotency key for the ledger.
    pub tx_id: String,
    pub from_address: String,
    pub to_address: String,
    /// Asset symbol or token identifier (`ETH`, `USDC`, `SOL`, mint/contract
    /// address when no symbol is known).
    pub asset: String,
    /// Value in the asset's smallest unit.
    pub raw_value: String,
    /// Value in display units (raw value scaled by the asset's decimals).
    pub display_value: f64,
    /// Block height (EVM/Stacks) or slot (Solana), when the provider sent it.
    pub block_height: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Explicit document reference carried by Stacks `pay-invoice` calls.
    pub document_id: Option<String>,
}

/// Document lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Sent,
    Pending,
    Paid,
    Viewed,
    Signed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Sent => "SENT",
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Viewed => "VIEWED",
            Self::Signed => "SIGNED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "SENT" => Ok(Self::Sent),
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "VIEWED" => Ok(Self::Viewed),
            "SIGNED" => Ok(Self::Signed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid document status: {}", s)),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Document kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Invoice,
    PaymentLink,
    Contract,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "INVOICE",
            Self::PaymentLink => "PAYMENT_LINK",
            Self::Contract => "CONTRACT",
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVOICE" => Ok(Self::Invoice),
            "PAYMENT_LINK" => Ok(Self::PaymentLink),
            "CONTRACT" => Ok(Self::Contract),
            _ => Err(format!("Invalid document type: {}", s)),
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger row status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Confirmed,
    /// Set when a chainhook rollback compensates an already-applied entry.
    Reverted,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Reverted => "REVERTED",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(Self::Confirmed),
            "REVERTED" => Ok(Self::Reverted),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger row kind: a `PAYMENT` settled an invoice or payment link, a
/// `TRANSFER` is plain wallet activity with no matched document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Payment,
    #[default]
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "PAYMENT",
            Self::Transfer => "TRANSFER",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PAYMENT" => Ok(Self::Payment),
            "TRANSFER" => Ok(Self::Transfer),
            _ => Err(format!("Invalid transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User record as seen by this subsystem (owned by the registration and
/// wallet-creation flows, read-only here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct User {
    pub id: String,
    /// Generic primary wallet address; may duplicate a chain-specific column.
    pub wallet_address: Option<String>,
    pub evm_address: Option<String>,
    pub solana_address: Option<String>,
    pub stacks_address: Option<String>,
    /// Push delivery token, when the user has a registered device.
    pub push_token: Option<String>,
}

/// Invoice / payment link / contract document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub amount: f64,
    /// Free-form content (client name, email, line items).
    pub content: Option<serde_json::Value>,
    /// Transaction hash recorded when the document was paid.
    pub tx_hash: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Stored transaction ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct LedgerEntry {
    pub tx_hash: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub chain: Chain,
    pub amount: f64,
    pub token: String,
    pub from_address: String,
    pub to_address: String,
    pub block_height: Option<i64>,
    pub confirmed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Write model for the idempotent ledger upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpsert {
    pub tx_hash: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub chain: Chain,
    pub amount: f64,
    pub token: String,
    pub from_address: String,
    pub to_address: String,
    pub block_height: Option<i64>,
    pub confirmed_at: DateTime<Utc>,
}

impl LedgerUpsert {
    /// Build a ledger write from a normalized transfer event.
    #[must_use]
    pub fn from_event(event: &TransferEvent, kind: TransactionKind) -> Self {
        Self {
            tx_hash: event.tx_id.clone(),
            kind,
            status: TransactionStatus::Confirmed,
            chain: event.chain,
            amount: event.display_value,
            token: event.asset.clone(),
            from_address: event.from_address.clone(),
            to_address: event.to_address.clone(),
            block_height: event.block_height.map(|h| h as i64),
            confirmed_at: event.timestamp,
        }
    }
}

/// Outcome of the ledger upsert. `Updated` means the provider redelivered a
/// transaction we already hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Notification handed to the dispatcher (push + in-app record).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Database health status
    pub database: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus) -> Self {
        Self {
            status: database,
            database,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Acknowledgement body returned by the webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

impl WebhookAck {
    #[must_use]
    pub fn ok() -> Self {
        Self { received: true }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "authentication_error")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "invalid signature")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_chain_display_and_parsing() {
        let chains = vec![
            (Chain::Ethereum, "ETHEREUM"),
            (Chain::Base, "BASE"),
            (Chain::Celo, "CELO"),
            (Chain::Solana, "SOLANA"),
            (Chain::Stacks, "STACKS"),
        ];

        for (chain, string) in chains {
            assert_eq!(chain.as_str(), string);
            assert_eq!(chain.to_string(), string);
            assert_eq!(Chain::from_str(string).unwrap(), chain);
        }

        assert!(Chain::from_str("invalid").is_err());
    }

    #[test]
    fn test_chain_from_provider_normalizes_separators() {
        assert_eq!(Chain::from_provider("BASE_MAINNET"), Some(Chain::Base));
        assert_eq!(Chain::from_provider("base-sepolia"), Some(Chain::Base));
        assert_eq!(Chain::from_provider("CELO_MAINNET"), Some(Chain::Celo));
        assert_eq!(Chain::from_provider("SOLANA_MAINNET"), Some(Chain::Solana));
        assert_eq!(Chain::from_provider("eth mainnet"), Some(Chain::Ethereum));
        assert_eq!(Chain::from_provider("stacks-mainnet"), Some(Chain::Stacks));
        assert_eq!(Chain::from_provider("near-mainnet"), None);
    }

    #[test]
    fn test_chain_address_case_sensitivity() {
        assert!(Chain::Base.case_insensitive_addresses());
        assert!(Chain::Ethereum.case_insensitive_addresses());
        assert!(!Chain::Solana.case_insensitive_addresses());
        assert!(!Chain::Stacks.case_insensitive_addresses());
    }

    #[test]
    fn test_document_status_display_and_parsing() {
        let statuses = vec![
            (DocumentStatus::Draft, "DRAFT"),
            (DocumentStatus::Sent, "SENT"),
            (DocumentStatus::Pending, "PENDING"),
            (DocumentStatus::Paid, "PAID"),
            (DocumentStatus::Viewed, "VIEWED"),
            (DocumentStatus::Signed, "SIGNED"),
            (DocumentStatus::Failed, "FAILED"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(DocumentStatus::from_str(string).unwrap(), status);
        }

        assert!(DocumentStatus::from_str("invalid").is_err());
    }

    #[test]
    fn test_transaction_enums_display_and_parsing() {
        assert_eq!(
            TransactionStatus::from_str("CONFIRMED").unwrap(),
            TransactionStatus::Confirmed
        );
        assert_eq!(
            TransactionStatus::from_str("REVERTED").unwrap(),
            TransactionStatus::Reverted
        );
        assert_eq!(
            TransactionKind::from_str("PAYMENT").unwrap(),
            TransactionKind::Payment
        );
        assert_eq!(
            TransactionKind::from_str("TRANSFER").unwrap(),
            TransactionKind::Transfer
        );
        assert_eq!(
            DocumentType::from_str("PAYMENT_LINK").unwrap(),
            DocumentType::PaymentLink
        );
        assert!(TransactionStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_ledger_upsert_from_event() {
        let event = TransferEvent {
            chain: Chain::Base,
            tx_id: "0xabc".to_string(),
            from_address: "0xAAA".to_string(),
            to_address: "0xBBB".to_string(),
            asset: "USDC".to_string(),
            raw_value: "100000000".to_string(),
            display_value: 100.0,
            block_height: Some(1234),
            timestamp: Utc::now(),
            document_id: None,
        };

        let upsert = LedgerUpsert::from_event(&event, TransactionKind::Payment);
        assert_eq!(upsert.tx_hash, "0xabc");
        assert_eq!(upsert.chain, Chain::Base);
        assert_eq!(upsert.status, TransactionStatus::Confirmed);
        assert_eq!(upsert.kind, TransactionKind::Payment);
        assert_eq!(upsert.amount, 100.0);
        assert_eq!(upsert.block_height, Some(1234));
    }

    #[test]
    fn test_transfer_event_serialization_roundtrip() {
        let event = TransferEvent {
            chain: Chain::Solana,
            tx_id: "sig1".to_string(),
            from_address: "sender".to_string(),
            to_address: "receiver".to_string(),
            asset: "SOL".to_string(),
            raw_value: "20".to_string(),
            display_value: 0.00000002,
            block_height: Some(99),
            timestamp: Utc::now(),
            document_id: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TransferEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
