//! PostgreSQL implementations of the storage ports.
//!
//! One client backs all three: the user directory (read-only here), the
//! document store (one conditional mutation) and the transaction ledger
//! (owned by this subsystem).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, Chain, DatabaseError, Document, DocumentStatus, DocumentStore, DocumentType,
    LedgerEntry, LedgerUpsert, TransactionKind, TransactionLedger, TransactionStatus,
    UpsertOutcome, User, UserDirectory,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_user(row: &sqlx::postgres::PgRow) -> User {
        User {
            id: row.get("id"),
            wallet_address: row.get("wallet_address"),
            evm_address: row.get("evm_address"),
            solana_address: row.get("solana_address"),
            stacks_address: row.get("stacks_address"),
            push_token: row.get("push_token"),
        }
    }

    fn row_to_document(row: &sqlx::postgres::PgRow) -> Document {
        let type_str: String = row.get("type");
        let status_str: String = row.get("status");
        Document {
            id: row.get("id"),
            user_id: row.get("user_id"),
            document_type: type_str.parse().unwrap_or(DocumentType::Invoice),
            status: status_str.parse().unwrap_or(DocumentStatus::Draft),
            amount: row.get("amount"),
            content: row.get("content"),
            tx_hash: row.get("tx_hash"),
            paid_at: row.get("paid_at"),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_ledger_entry(row: &sqlx::postgres::PgRow) -> LedgerEntry {
        let kind_str: String = row.get("type");
        let status_str: String = row.get("status");
        let chain_str: String = row.get("chain");
        LedgerEntry {
            tx_hash: row.get("tx_hash"),
            kind: kind_str.parse().unwrap_or(TransactionKind::Transfer),
            status: status_str.parse().unwrap_or(TransactionStatus::Confirmed),
            chain: chain_str.parse().unwrap_or(Chain::Ethereum),
            amount: row.get("amount"),
            token: row.get("token"),
            from_address: row.get("from_address"),
            to_address: row.get("to_address"),
            block_height: row.get("block_height"),
            confirmed_at: row.get("confirmed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl UserDirectory for PostgresClient {
    #[instrument(skip(self))]
    async fn find_by_wallet(&self, chain: Chain, address: &str) -> Result<Option<User>, AppError> {
        // Column names come from a static match; only the address is bound.
        let column = match chain {
            Chain::Solana => "solana_address",
            Chain::Stacks => "stacks_address",
            Chain::Ethereum | Chain::Base | Chain::Celo => "evm_address",
        };

        let sql = if chain.case_insensitive_addresses() {
            format!(
                "SELECT id, wallet_address, evm_address, solana_address, stacks_address, push_token \
                 FROM users \
                 WHERE LOWER({column}) = LOWER($1) OR LOWER(wallet_address) = LOWER($1) \
                 LIMIT 1"
            )
        } else {
            format!(
                "SELECT id, wallet_address, evm_address, solana_address, stacks_address, push_token \
                 FROM users \
                 WHERE {column} = $1 OR wallet_address = $1 \
                 LIMIT 1"
            )
        };

        let row = sqlx::query(&sql)
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_user))
    }
}

#[async_trait]
impl DocumentStore for PostgresClient {
    #[instrument(skip(self))]
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, type, status, amount, content, tx_hash, paid_at, created_at
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_document))
    }

    #[instrument(skip(self))]
    async fn find_pending_for_user(
        &self,
        user_id: &str,
        types: &[DocumentType],
    ) -> Result<Option<Document>, AppError> {
        let type_strs: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();

        let row = sqlx::query(
            r#"
            SELECT id, user_id, type, status, amount, content, tx_hash, paid_at, created_at
            FROM documents
            WHERE user_id = $1
              AND status = 'PENDING'
              AND type = ANY($2)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(&type_strs)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_document))
    }

    #[instrument(skip(self))]
    async fn mark_paid(&self, id: &str, tx_hash: &str) -> Result<bool, AppError> {
        // Status check and write are one conditional statement; a concurrent
        // redelivery finds zero affected rows and no-ops.
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'PAID',
                paid_at = NOW(),
                tx_hash = $2,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'PAID'
            "#,
        )
        .bind(id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn reopen_by_tx(&self, tx_hash: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'PENDING',
                paid_at = NULL,
                tx_hash = NULL,
                updated_at = NOW()
            WHERE tx_hash = $1 AND status = 'PAID'
            RETURNING id
            "#,
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.map(|r| r.get("id")))
    }
}

#[async_trait]
impl TransactionLedger for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, entry), fields(tx_hash = %entry.tx_hash, chain = %entry.chain))]
    async fn upsert(&self, entry: &LedgerUpsert) -> Result<UpsertOutcome, AppError> {
        // xmax = 0 only on freshly inserted tuples, which distinguishes the
        // first delivery from a redelivery in a single round trip.
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (
                tx_hash, type, status, chain, amount, token,
                from_address, to_address, block_height, confirmed_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT (tx_hash) DO UPDATE
            SET status = EXCLUDED.status,
                block_height = COALESCE(EXCLUDED.block_height, transactions.block_height),
                confirmed_at = COALESCE(transactions.confirmed_at, EXCLUDED.confirmed_at),
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&entry.tx_hash)
        .bind(entry.kind.as_str())
        .bind(entry.status.as_str())
        .bind(entry.chain.as_str())
        .bind(entry.amount)
        .bind(&entry.token)
        .bind(&entry.from_address)
        .bind(&entry.to_address)
        .bind(entry.block_height)
        .bind(entry.confirmed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        let inserted: bool = row.get("inserted");
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, tx_hash: &str) -> Result<Option<LedgerEntry>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT tx_hash, type, status, chain, amount, token, from_address,
                   to_address, block_height, confirmed_at, created_at, updated_at
            FROM transactions
            WHERE tx_hash = $1
            "#,
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_ledger_entry))
    }

    #[instrument(skip(self))]
    async fn list_recent(&self, limit: i64) -> Result<Vec<LedgerEntry>, AppError> {
        let limit = limit.clamp(1, 100);
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, type, status, chain, amount, token, from_address,
                   to_address, block_height, confirmed_at, created_at, updated_at
            FROM transactions
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(rows.iter().map(Self::row_to_ledger_entry).collect())
    }

    #[instrument(skip(self))]
    async fn mark_reverted(&self, tx_hash: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'REVERTED', updated_at = NOW()
            WHERE tx_hash = $1
            "#,
        )
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(result.rows_affected() == 1)
    }
}

/// Notification support queries. Used by the notification dispatcher.
impl PostgresClient {
    #[instrument(skip(self))]
    pub async fn get_push_token(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT push_token FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.and_then(|r| r.get("push_token")))
    }

    #[instrument(skip(self, data))]
    pub async fn insert_notification(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> Result<(), AppError> {
        let now: DateTime<Utc> = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, body, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(title)
        .bind(body)
        .bind(data)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }
}
