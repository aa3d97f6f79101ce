//! Infrastructure adapters: webhook signature validation, payload ingestion,
//! PostgreSQL storage, Solana RPC lookups and notification dispatch.

pub mod database;
pub mod ingest;
pub mod notify;
pub mod solana_rpc;
pub mod webhook;

pub use database::{PostgresClient, PostgresConfig};
pub use notify::{NotificationService, PushClient, PushConfig};
pub use solana_rpc::{SolanaRpcClient, TransactionDetailSource, DEFAULT_LOOKUP_DELAY};
pub use webhook::{Environment, SignatureValidator, SigningKeys, Verification};
