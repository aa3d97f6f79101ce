//! EVM address-activity normalization.
//!
//! The provider already sends explicit transfer records, so this is a direct
//! field projection with per-item validation. One malformed item is skipped
//! with a logged reason; it never fails the batch.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Chain, TransferEvent};

use super::NormalizedBatch;

/// Full webhook body for an EVM address-activity delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmActivityPayload {
    pub webhook_id: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub event: EvmActivityEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmActivityEvent {
    pub network: String,
    #[serde(default)]
    pub activity: Vec<EvmActivityItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmActivityItem {
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_address: String,
    pub asset: Option<String>,
    /// Value in display units, as the provider computes it.
    pub value: Option<f64>,
    pub hash: Option<String>,
    /// Hex block number, e.g. `0x10d4f`.
    pub block_num: Option<String>,
    pub category: Option<String>,
    pub raw_contract: Option<RawContract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    pub address: Option<String>,
    /// Hex raw value in the token's smallest unit, e.g. `0x5f5e100`.
    pub raw_value: Option<String>,
    pub decimals: Option<u32>,
}

/// Normalize an EVM activity batch. Items that fail projection are skipped
/// with a warning and counted, not propagated.
pub fn normalize(event: &EvmActivityEvent) -> NormalizedBatch {
    let chain = Chain::from_provider(&event.network).unwrap_or(Chain::Ethereum);
    let mut batch = NormalizedBatch::default();

    for item in &event.activity {
        match project_item(chain, item) {
            Ok(transfer) => batch.events.push(transfer),
            Err(reason) => {
                warn!(
                    network = %event.network,
                    hash = item.hash.as_deref().unwrap_or("<none>"),
                    reason = %reason,
                    "Skipping malformed activity item"
                );
                batch.skipped += 1;
            }
        }
    }

    batch
}

fn project_item(chain: Chain, item: &EvmActivityItem) -> Result<TransferEvent, String> {
    let tx_id = item
        .hash
        .clone()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "missing transaction hash".to_string())?;

    if item.from_address.is_empty() && item.to_address.is_empty() {
        return Err("both addresses empty".to_string());
    }

    let contract = item.raw_contract.as_ref();
    if let Some(address) = contract.and_then(|c| c.address.as_deref()) {
        if !is_hex_address(address) {
            return Err(format!("malformed contract address: {}", address));
        }
    }

    let decimals = contract.and_then(|c| c.decimals).unwrap_or(18);

    let raw_value = match contract.and_then(|c| c.raw_value.as_deref()) {
        Some(hex_value) => parse_hex_u128(hex_value)
            .ok_or_else(|| format!("malformed raw value: {}", hex_value))?
            .to_string(),
        None => {
            let value = item.value.ok_or_else(|| "missing value".to_string())?;
            if value < 0.0 {
                return Err(format!("negative value: {}", value));
            }
            ((value * 10f64.powi(decimals as i32)).round() as u128).to_string()
        }
    };

    let display_value = match item.value {
        Some(v) => v,
        None => raw_value
            .parse::<u128>()
            .map(|raw| raw as f64 / 10f64.powi(decimals as i32))
            .unwrap_or(0.0),
    };

    let asset = item
        .asset
        .clone()
        .or_else(|| contract.and_then(|c| c.address.clone()))
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let block_height = item.block_num.as_deref().and_then(parse_hex_u64);

    Ok(TransferEvent {
        chain,
        tx_id,
        from_address: item.from_address.clone(),
        to_address: item.to_address.clone(),
        asset,
        raw_value,
        display_value,
        block_height,
        timestamp: Utc::now(),
        document_id: None,
    })
}

fn is_hex_address(address: &str) -> bool {
    let body = match address.strip_prefix("0x") {
        Some(b) => b,
        None => return false,
    };
    body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn parse_hex_u128(s: &str) -> Option<u128> {
    u128::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}
