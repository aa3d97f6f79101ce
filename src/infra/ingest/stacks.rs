//! Stacks chainhook normalization.
//!
//! A chainhook delivery is a list of applied and rolled-back blocks. Applied
//! blocks are walked for successful contract calls into the payment entry
//! points; rolled-back blocks yield the transaction hashes whose ledger
//! effects must be compensated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Chain, TransferEvent};

use super::NormalizedBatch;

const MICRO_STX: f64 = 1_000_000.0;

/// Contract entry points recognized as payments.
pub const PAYMENT_ENTRY_POINTS: &[&str] = &["pay-invoice", "pay"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainhookPayload {
    pub event: ChainhookEvent,
    pub chainhook: Option<ChainhookInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainhookEvent {
    #[serde(default)]
    pub apply: Vec<StacksBlock>,
    #[serde(default)]
    pub rollback: Vec<StacksBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainhookInfo {
    pub name: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacksBlock {
    pub block_identifier: Option<BlockIdentifier>,
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub transactions: Vec<StacksTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIdentifier {
    pub index: u64,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacksTransaction {
    pub transaction_identifier: TxIdentifier,
    #[serde(default)]
    pub metadata: TxMetadata,
    #[serde(default)]
    pub operations: Vec<StacksOperation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxIdentifier {
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxMetadata {
    #[serde(default = "default_true")]
    pub success: bool,
    pub sender: Option<String>,
}

impl Default for TxMetadata {
    fn default() -> Self {
        Self {
            success: true,
            sender: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacksOperation {
    #[serde(rename = "type")]
    pub op_type: String,
    pub contract_identifier: Option<String>,
    pub method: Option<String>,
    /// Clarity argument reprs: `'SP...` principals, `u100` uints.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Normalize the applied blocks of a chainhook delivery.
pub fn normalize_apply(event: &ChainhookEvent) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    for block in &event.apply {
        let block_height = block.block_identifier.as_ref().map(|b| b.index);
        let timestamp = block
            .timestamp
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .unwrap_or_else(Utc::now);

        for tx in &block.transactions {
            if !tx.metadata.success {
                debug!(hash = %tx.transaction_identifier.hash, "Skipping failed Stacks transaction");
                batch.skipped += 1;
                continue;
            }

            let Some(op) = payment_operation(tx) else {
                batch.skipped += 1;
                continue;
            };

            match project_payment(tx, op, block_height, timestamp) {
                Ok(transfer) => batch.events.push(transfer),
                Err(reason) => {
                    warn!(
                        hash = %tx.transaction_identifier.hash,
                        reason = %reason,
                        "Skipping malformed Stacks payment"
                    );
                    batch.skipped += 1;
                }
            }
        }
    }

    batch
}

/// Transaction hashes of payments found in rolled-back blocks. The caller
/// marks their ledger rows `REVERTED` and re-opens the documents they paid.
pub fn rollback_tx_hashes(event: &ChainhookEvent) -> Vec<String> {
    event
        .rollback
        .iter()
        .flat_map(|block| &block.transactions)
        .filter(|tx| payment_operation(tx).is_some())
        .map(|tx| tx.transaction_identifier.hash.clone())
        .collect()
}

fn payment_operation(tx: &StacksTransaction) -> Option<&StacksOperation> {
    tx.operations.iter().find(|op| {
        op.op_type.eq_ignore_ascii_case("contract_call")
            && op
                .method
                .as_deref()
                .is_some_and(|m| PAYMENT_ENTRY_POINTS.contains(&m))
    })
}

fn project_payment(
    tx: &StacksTransaction,
    op: &StacksOperation,
    block_height: Option<u64>,
    timestamp: DateTime<Utc>,
) -> Result<TransferEvent, String> {
    let recipient = op
        .args
        .first()
        .map(|a| clean_principal(a))
        .filter(|a| !a.is_empty())
        .ok_or_else(|| "missing recipient argument".to_string())?;

    let micro = op
        .args
        .get(1)
        .and_then(|a| parse_uint_arg(a))
        .ok_or_else(|| "missing or malformed amount argument".to_string())?;

    let document_id = op
        .args
        .get(2)
        .map(|a| clean_principal(a))
        .filter(|a| !a.is_empty());

    Ok(TransferEvent {
        chain: Chain::Stacks,
        tx_id: tx.transaction_identifier.hash.clone(),
        from_address: tx.metadata.sender.clone().unwrap_or_default(),
        to_address: recipient,
        asset: "STX".to_string(),
        raw_value: micro.to_string(),
        display_value: micro as f64 / MICRO_STX,
        block_height,
        timestamp,
        document_id,
    })
}

/// Strip Clarity repr decoration from a principal or string argument.
fn clean_principal(arg: &str) -> String {
    arg.trim()
        .trim_start_matches('\'')
        .trim_matches('"')
        .to_string()
}

/// Parse a Clarity uint repr (`u100000`) or a bare integer.
fn parse_uint_arg(arg: &str) -> Option<u64> {
    arg.trim().trim_start_matches('u').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pay_invoice_tx(hash: &str, success: bool, args: Vec<&str>) -> StacksTransaction {
        StacksTransaction {
            transaction_identifier: TxIdentifier {
                hash: hash.to_string(),
            },
            metadata: TxMetadata {
                success,
                sender: Some("SP2SENDER".to_string()),
            },
            operations: vec![StacksOperation {
                op_type: "contract_call".to_string(),
                contract_identifier: Some("SP3DEPLOYER.payments".to_string()),
                method: Some("pay-invoice".to_string()),
                args: args.into_iter().map(String::from).collect(),
            }],
        }
    }

    fn block_of(txs: Vec<StacksTransaction>) -> StacksBlock {
        StacksBlock {
            block_identifier: Some(BlockIdentifier {
                index: 150_000,
                hash: Some("0xblock".to_string()),
            }),
            timestamp: Some(1_700_000_000),
            transactions: txs,
        }
    }

    #[test]
    fn test_apply_walk_projects_payment() {
        let event = ChainhookEvent {
            apply: vec![block_of(vec![pay_invoice_tx(
                "0xstx1",
                true,
                vec!["'SP2RECIPIENT", "u2500000", "\"doc-42\""],
            )])],
            rollback: vec![],
        };

        let batch = normalize_apply(&event);
        assert_eq!(batch.events.len(), 1);

        let transfer = &batch.events[0];
        assert_eq!(transfer.chain, Chain::Stacks);
        assert_eq!(transfer.tx_id, "0xstx1");
        assert_eq!(transfer.from_address, "SP2SENDER");
        assert_eq!(transfer.to_address, "SP2RECIPIENT");
        assert_eq!(transfer.asset, "STX");
        assert_eq!(transfer.raw_value, "2500000");
        assert_eq!(transfer.display_value, 2.5);
        assert_eq!(transfer.block_height, Some(150_000));
        assert_eq!(transfer.document_id.as_deref(), Some("doc-42"));
    }

    #[test]
    fn test_failed_transaction_skipped() {
        let event = ChainhookEvent {
            apply: vec![block_of(vec![pay_invoice_tx(
                "0xfail",
                false,
                vec!["'SP2RECIPIENT", "u100"],
            )])],
            rollback: vec![],
        };
        let batch = normalize_apply(&event);
        assert!(batch.events.is_empty());
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_unrecognized_method_skipped() {
        let mut tx = pay_invoice_tx("0xother", true, vec!["'SP2RECIPIENT", "u100"]);
        tx.operations[0].method = Some("stake-tokens".to_string());
        let event = ChainhookEvent {
            apply: vec![block_of(vec![tx])],
            rollback: vec![],
        };
        let batch = normalize_apply(&event);
        assert!(batch.events.is_empty());
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_pay_entry_point_without_document() {
        let mut tx = pay_invoice_tx("0xpay", true, vec!["'SP2RECIPIENT", "u750000"]);
        tx.operations[0].method = Some("pay".to_string());
        let event = ChainhookEvent {
            apply: vec![block_of(vec![tx])],
            rollback: vec![],
        };
        let batch = normalize_apply(&event);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].document_id, None);
        assert_eq!(batch.events[0].display_value, 0.75);
    }

    #[test]
    fn test_malformed_amount_skipped() {
        let event = ChainhookEvent {
            apply: vec![block_of(vec![pay_invoice_tx(
                "0xbad",
                true,
                vec!["'SP2RECIPIENT", "not-a-number"],
            )])],
            rollback: vec![],
        };
        let batch = normalize_apply(&event);
        assert!(batch.events.is_empty());
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_rollback_collects_payment_hashes_only() {
        let mut non_payment = pay_invoice_tx("0xskip", true, vec!["'SP2X", "u1"]);
        non_payment.operations[0].method = Some("mint".to_string());

        let event = ChainhookEvent {
            apply: vec![],
            rollback: vec![block_of(vec![
                pay_invoice_tx("0xgone1", true, vec!["'SP2X", "u1"]),
                non_payment,
                pay_invoice_tx("0xgone2", true, vec!["'SP2Y", "u2"]),
            ])],
        };

        let hashes = rollback_tx_hashes(&event);
        assert_eq!(hashes, vec!["0xgone1".to_string(), "0xgone2".to_string()]);
    }

    #[test]
    fn test_arg_parsing_helpers() {
        assert_eq!(parse_uint_arg("u100000"), Some(100_000));
        assert_eq!(parse_uint_arg("42"), Some(42));
        assert_eq!(parse_uint_arg("abc"), None);
        assert_eq!(clean_principal("'SP2ABC"), "SP2ABC");
        assert_eq!(clean_principal("\"doc-1\""), "doc-1");
    }
}
