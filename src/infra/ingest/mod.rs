//! Event normalization: provider payloads into canonical transfer events.
//!
//! Classification happens exactly once at the boundary; everything downstream
//! matches exhaustively on [`WebhookEvent`].

pub mod evm;
pub mod solana;
pub mod stacks;

use serde::Deserialize;

use crate::domain::{AppError, TransferEvent};

pub use evm::EvmActivityPayload;
pub use solana::SolanaActivityPayload;
pub use stacks::ChainhookPayload;

/// Tagged union of the three inbound payload families, decided once.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    EvmActivity(EvmActivityPayload),
    SolanaActivity(SolanaActivityPayload),
    ChainhookBlocks(ChainhookPayload),
}

/// Result of normalizing one batch: the canonical events plus the number of
/// items that were dropped or skipped (votes, fee-only, malformed).
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub events: Vec<TransferEvent>,
    pub skipped: usize,
}

#[derive(Deserialize)]
struct Probe {
    event: Option<ProbeEvent>,
}

#[derive(Deserialize)]
struct ProbeEvent {
    network: Option<String>,
}

/// Extract the provider network name from a raw payload without fully parsing
/// it. Used by the signature validator to select the signing key.
pub fn probe_network(raw: &[u8]) -> Result<String, serde_json::Error> {
    let probe: Probe = serde_json::from_slice(raw)?;
    Ok(probe
        .event
        .and_then(|e| e.network)
        .unwrap_or_default())
}

/// Classify a raw payload into the tagged union.
///
/// Dispatch is structural: a body carrying `event.apply`/`event.rollback` is
/// a chainhook delivery; otherwise `event.network` containing `solana` picks
/// the Solana shape and everything else is EVM address-activity.
pub fn classify(raw: &[u8]) -> Result<WebhookEvent, AppError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| AppError::Deserialization(format!("parse error: {}", e)))?;

    let event = value
        .get("event")
        .ok_or_else(|| AppError::Deserialization("parse error: missing event field".to_string()))?;

    if event.get("apply").is_some() || event.get("rollback").is_some() {
        let payload: ChainhookPayload = serde_json::from_value(value)
            .map_err(|e| AppError::Deserialization(format!("parse error: {}", e)))?;
        return Ok(WebhookEvent::ChainhookBlocks(payload));
    }

    let network = event
        .get("network")
        .and_then(|n| n.as_str())
        .unwrap_or_default();

    if network.to_lowercase().contains("solana") {
        let payload: SolanaActivityPayload = serde_json::from_value(value)
            .map_err(|e| AppError::Deserialization(format!("parse error: {}", e)))?;
        Ok(WebhookEvent::SolanaActivity(payload))
    } else {
        let payload: EvmActivityPayload = serde_json::from_value(value)
            .map_err(|e| AppError::Deserialization(format!("parse error: {}", e)))?;
        Ok(WebhookEvent::EvmActivity(payload))
    }
}
