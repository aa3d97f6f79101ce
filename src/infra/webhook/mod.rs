//! Per-network webhook signature validation.
//!
//! The provider signs the exact request body with HMAC-SHA256 using a shared
//! secret and sends the hex digest in a header. Verification runs over the
//! raw bytes as received, never a re-serialized copy.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Deployment environment. Controls the missing-key policy: development
/// accepts unsigned payloads as unverified, production hard-rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Read `APP_ENV`; anything other than `production` is development.
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("production") => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Per-network signing secrets with a generic fallback.
#[derive(Default)]
pub struct SigningKeys {
    pub ethereum: Option<SecretString>,
    pub base: Option<SecretString>,
    pub celo: Option<SecretString>,
    pub solana: Option<SecretString>,
    /// Used when no network-specific key is configured.
    pub fallback: Option<SecretString>,
}

impl SigningKeys {
    /// Load keys from `ALCHEMY_SIGNING_KEY_{ETH,BASE,CELO,SOLANA}` with
    /// `ALCHEMY_SIGNING_KEY` as the generic fallback.
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };
        Self {
            ethereum: read("ALCHEMY_SIGNING_KEY_ETH"),
            base: read("ALCHEMY_SIGNING_KEY_BASE"),
            celo: read("ALCHEMY_SIGNING_KEY_CELO"),
            solana: read("ALCHEMY_SIGNING_KEY_SOLANA"),
            fallback: read("ALCHEMY_SIGNING_KEY"),
        }
    }

    /// Pick the key for a provider network name. The name is lowercased and
    /// stripped of separators before substring matching, so `BASE_MAINNET`,
    /// `base-sepolia` and `Base Mainnet` all select the Base key.
    pub fn key_for(&self, network: &str) -> Option<&SecretString> {
        let normalized: String = network
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        let specific = if normalized.contains("base") {
            self.base.as_ref()
        } else if normalized.contains("celo") {
            self.celo.as_ref()
        } else if normalized.contains("solana") {
            self.solana.as_ref()
        } else if normalized.contains("eth") {
            self.ethereum.as_ref()
        } else {
            None
        };

        specific.or(self.fallback.as_ref())
    }
}

/// Verification result for an authentic payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Digest matched the configured key.
    Valid,
    /// No key configured and environment is development: accepted unverified.
    Unverified,
}

/// Rejection reasons, surfaced verbatim in logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no signing key configured")]
    MissingKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("parse error: {0}")]
    Parse(String),
}

/// Validates inbound webhook bodies against per-network shared secrets.
///
/// Pure function over inputs plus configuration; no side effects.
pub struct SignatureValidator {
    keys: SigningKeys,
    environment: Environment,
}

impl SignatureValidator {
    #[must_use]
    pub fn new(keys: SigningKeys, environment: Environment) -> Self {
        Self { keys, environment }
    }

    /// Verify `signature_hex` as the HMAC-SHA256 of `raw_body` under the key
    /// selected for `network`.
    ///
    /// Digest comparison is constant-time via `Mac::verify_slice`.
    pub fn verify(
        &self,
        network: &str,
        raw_body: &[u8],
        signature_hex: &str,
    ) -> Result<Verification, SignatureError> {
        let Some(key) = self.keys.key_for(network) else {
            return match self.environment {
                Environment::Production => {
                    warn!(network = %network, "No signing key configured, rejecting");
                    Err(SignatureError::MissingKey)
                }
                Environment::Development => {
                    debug!(network = %network, "No signing key configured, accepting unverified");
                    Ok(Verification::Unverified)
                }
            };
        };

        let expected = hex::decode(signature_hex.trim())
            .map_err(|_| SignatureError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
            .map_err(|e| SignatureError::Parse(e.to_string()))?;
        mac.update(raw_body);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::InvalidSignature)?;

        Ok(Verification::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn keys_with(base: Option<&str>, fallback: Option<&str>) -> SigningKeys {
        SigningKeys {
            base: base.map(SecretString::from),
            fallback: fallback.map(SecretString::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_signature_accepted() {
        let validator = SignatureValidator::new(
            keys_with(Some("base-secret"), None),
            Environment::Production,
        );
        let body = br#"{"event":{"network":"BASE_MAINNET"}}"#;
        let sig = sign("base-secret", body);
        assert_eq!(
            validator.verify("BASE_MAINNET", body, &sig),
            Ok(Verification::Valid)
        );
    }

    #[test]
    fn test_tampered_body_rejected() {
        let validator = SignatureValidator::new(
            keys_with(Some("base-secret"), None),
            Environment::Production,
        );
        let sig = sign("base-secret", b"original body");
        assert_eq!(
            validator.verify("BASE_MAINNET", b"tampered body", &sig),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let validator = SignatureValidator::new(
            keys_with(Some("base-secret"), None),
            Environment::Production,
        );
        let body = b"body";
        let sig = sign("other-secret", body);
        assert_eq!(
            validator.verify("BASE_MAINNET", body, &sig),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let validator = SignatureValidator::new(
            keys_with(Some("base-secret"), None),
            Environment::Production,
        );
        assert_eq!(
            validator.verify("BASE_MAINNET", b"body", "not-hex!"),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_fallback_key_used_for_unmatched_network() {
        let validator = SignatureValidator::new(
            keys_with(None, Some("generic")),
            Environment::Production,
        );
        let body = b"body";
        let sig = sign("generic", body);
        assert_eq!(
            validator.verify("CELO_MAINNET", body, &sig),
            Ok(Verification::Valid)
        );
    }

    #[test]
    fn test_missing_key_policy_by_environment() {
        let prod = SignatureValidator::new(SigningKeys::default(), Environment::Production);
        assert_eq!(
            prod.verify("BASE_MAINNET", b"body", "00"),
            Err(SignatureError::MissingKey)
        );

        let dev = SignatureValidator::new(SigningKeys::default(), Environment::Development);
        assert_eq!(
            dev.verify("BASE_MAINNET", b"body", "00"),
            Ok(Verification::Unverified)
        );
    }

    #[test]
    fn test_key_selection_strips_separators() {
        let keys = SigningKeys {
            base: Some(SecretString::from("b")),
            solana: Some(SecretString::from("s")),
            ..Default::default()
        };
        assert!(keys.key_for("base-sepolia").is_some());
        assert!(keys.key_for("SOLANA_MAINNET").is_some());
        assert!(keys.key_for("Base Mainnet").is_some());
        assert!(keys.key_for("arbitrum-one").is_none());
    }

    #[test]
    fn test_error_reason_strings() {
        assert_eq!(
            SignatureError::MissingKey.to_string(),
            "no signing key configured"
        );
        assert_eq!(
            SignatureError::InvalidSignature.to_string(),
            "invalid signature"
        );
        assert_eq!(
            SignatureError::Parse("bad json".to_string()).to_string(),
            "parse error: bad json"
        );
    }
}
