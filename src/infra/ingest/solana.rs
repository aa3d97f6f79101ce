//! Solana address-activity normalization.
//!
//! The payload gives no explicit from/to: transfer direction is reconstructed
//! from per-account pre/post balance deltas. Native SOL moves through the
//! lamport balances (divided by 10^9 for display units); SPL tokens come from
//! a separate token-balance diff keyed by owner address.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Chain, TransferEvent};

use super::NormalizedBatch;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Full webhook body for a Solana address-activity delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaActivityPayload {
    pub webhook_id: Option<String>,
    pub id: Option<String>,
    pub event: SolanaActivityEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaActivityEvent {
    pub network: String,
    #[serde(default)]
    pub transaction: Vec<SolanaTransaction>,
}

/// One Solana transaction with its balance metadata.
///
/// Also produced by the RPC signature-detail lookup when a notice arrives
/// without balance data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaTransaction {
    pub signature: String,
    pub slot: Option<u64>,
    #[serde(default)]
    pub is_vote: bool,
    /// Account addresses, index-aligned with the balance arrays.
    #[serde(default)]
    pub account_keys: Vec<String>,
    #[serde(default)]
    pub pre_balances: Vec<u64>,
    #[serde(default)]
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
    pub block_time: Option<i64>,
}

impl SolanaTransaction {
    /// Whether the notice carries enough metadata to reconstruct deltas.
    /// When it does not, the service fetches the detail over RPC.
    pub fn has_balance_data(&self) -> bool {
        (!self.pre_balances.is_empty() && !self.post_balances.is_empty())
            || !self.post_token_balances.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    /// Raw amount in the token's smallest unit, as a decimal string.
    pub amount: String,
    pub decimals: u32,
    pub ui_amount: Option<f64>,
}

/// Normalize a Solana activity batch. Votes and fee-only transactions are
/// dropped; nothing here is a batch-level failure.
pub fn normalize(event: &SolanaActivityEvent) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for tx in &event.transaction {
        match normalize_transaction(tx) {
            Some(transfer) => batch.events.push(transfer),
            None => {
                debug!(signature = %tx.signature, "Dropped Solana transaction (vote or no transfer)");
                batch.skipped += 1;
            }
        }
    }
    batch
}

/// Reconstruct a single transfer from balance deltas, or `None` when the
/// transaction carries no transfer (vote, fee-only, missing metadata).
pub fn normalize_transaction(tx: &SolanaTransaction) -> Option<TransferEvent> {
    if tx.is_vote {
        return None;
    }

    // SPL pass first: token moves leave lamport balances nearly untouched,
    // so the token diff is authoritative when present.
    if let Some(transfer) = token_transfer(tx) {
        return Some(transfer);
    }

    lamport_transfer(tx)
}

fn timestamp_of(tx: &SolanaTransaction) -> DateTime<Utc> {
    tx.block_time
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .unwrap_or_else(Utc::now)
}

/// Token-balance diff keyed by owner address rather than account index:
/// the same owner can hold several token accounts touched by one transaction.
fn token_transfer(tx: &SolanaTransaction) -> Option<TransferEvent> {
    if tx.pre_token_balances.is_empty() && tx.post_token_balances.is_empty() {
        return None;
    }

    // owner -> (delta in raw units, mint, decimals)
    let mut deltas: HashMap<String, (i128, String, u32)> = HashMap::new();

    for balance in &tx.post_token_balances {
        let owner = owner_key(balance);
        let amount: i128 = balance.ui_token_amount.amount.parse().ok()?;
        let entry = deltas.entry(owner).or_insert((
            0,
            balance.mint.clone(),
            balance.ui_token_amount.decimals,
        ));
        entry.0 += amount;
    }
    for balance in &tx.pre_token_balances {
        let owner = owner_key(balance);
        let amount: i128 = balance.ui_token_amount.amount.parse().ok()?;
        let entry = deltas.entry(owner).or_insert((
            0,
            balance.mint.clone(),
            balance.ui_token_amount.decimals,
        ));
        entry.0 -= amount;
    }

    let sender = deltas
        .iter()
        .filter(|(_, (d, _, _))| *d < 0)
        .min_by_key(|(_, (d, _, _))| *d)?;
    let receiver = deltas
        .iter()
        .filter(|(owner, (d, _, _))| *d > 0 && *owner != sender.0)
        .max_by_key(|(_, (d, _, _))| *d);

    let (from_owner, (sender_delta, mint, decimals)) = (sender.0.clone(), sender.1.clone());
    let (to_owner, raw_value) = match receiver {
        Some((owner, (delta, _, _))) => (owner.clone(), *delta),
        // Pure burn: no positive delta to attribute, fall back to the
        // sender's outflow.
        None => (String::new(), sender_delta.abs()),
    };

    Some(TransferEvent {
        chain: Chain::Solana,
        tx_id: tx.signature.clone(),
        from_address: from_owner,
        to_address: to_owner,
        asset: mint,
        raw_value: raw_value.to_string(),
        display_value: raw_value as f64 / 10f64.powi(decimals as i32),
        block_height: tx.slot,
        timestamp: timestamp_of(tx),
        document_id: None,
    })
}

fn owner_key(balance: &TokenBalance) -> String {
    balance
        .owner
        .clone()
        .unwrap_or_else(|| format!("account:{}", balance.account_index))
}

/// Native-SOL delta reconstruction over the lamport balance arrays.
fn lamport_transfer(tx: &SolanaTransaction) -> Option<TransferEvent> {
    if tx.pre_balances.len() != tx.post_balances.len() || tx.account_keys.is_empty() {
        return None;
    }

    let deltas: Vec<(usize, i128)> = tx
        .pre_balances
        .iter()
        .zip(tx.post_balances.iter())
        .enumerate()
        .map(|(i, (pre, post))| (i, *post as i128 - *pre as i128))
        .filter(|(_, delta)| *delta != 0)
        .collect();

    // Fee-only transactions move a single balance; no transfer to record.
    if deltas.len() < 2 {
        return None;
    }

    let (sender_idx, sender_delta) = *deltas
        .iter()
        .filter(|(_, d)| *d < 0)
        .min_by_key(|(_, d)| *d)?;
    let receiver = deltas
        .iter()
        .filter(|(i, d)| *d > 0 && *i != sender_idx)
        .max_by_key(|(_, d)| *d);

    let (to_address, raw_value) = match receiver {
        Some((idx, delta)) => (tx.account_keys.get(*idx)?.clone(), *delta),
        // No positive delta (fees and burns only): record the sender's
        // outflow without a receiver.
        None => (String::new(), sender_delta.abs()),
    };

    let from_address = tx.account_keys.get(sender_idx)?.clone();

    Some(TransferEvent {
        chain: Chain::Solana,
        tx_id: tx.signature.clone(),
        from_address,
        to_address,
        asset: "SOL".to_string(),
        raw_value: raw_value.to_string(),
        display_value: raw_value as f64 / LAMPORTS_PER_SOL,
        block_height: tx.slot,
        timestamp: timestamp_of(tx),
        document_id: None,
    })
}
