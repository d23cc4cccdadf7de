//! Trusted-identity bypass tokens.
//!
//! A pre-authenticated caller (a first-party app that already knows who the
//! payer is) may attach a signed token asserting the payer's wallet address.
//! A valid token fully substitutes for the payment proof's typed-data
//! signature check; the asserted wallet then becomes the expected on-chain
//! sender during transfer matching.
//!
//! Token format: `base64(payload JSON) "." hex(keccak256(secret || payload))`.
//! The MAC is verified with a shared secret, so only holders of the secret
//! can mint tokens. Tokens are decoded fresh per request and never persisted.
//!
//! The check is a pluggable capability: [`TrustVerifier::Disabled`] rejects
//! every token, for deployments that do not want the bypass at all.

use alloy::primitives::keccak256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;

use crate::types::TrustedUser;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrustTokenError {
    #[error("Invalid trusted user token")]
    Invalid,
    #[error("Trusted user tokens are not accepted")]
    Disabled,
}

/// Decides whether a presented trust token is genuine.
pub enum TrustVerifier {
    /// Verify tokens against the shared secret.
    SharedSecret { secret: String },
    /// Reject every token.
    Disabled,
}

impl TrustVerifier {
    /// Builds a verifier from an optional configured secret; no secret means
    /// the bypass is switched off.
    pub fn from_secret(secret: Option<String>) -> Self {
        match secret {
            Some(secret) => TrustVerifier::SharedSecret { secret },
            None => TrustVerifier::Disabled,
        }
    }

    /// Decodes and authenticates `token`, returning the asserted identity.
    pub fn verify(&self, token: &str) -> Result<TrustedUser, TrustTokenError> {
        let secret = match self {
            TrustVerifier::SharedSecret { secret } => secret,
            TrustVerifier::Disabled => return Err(TrustTokenError::Disabled),
        };
        let (payload_b64, mac_hex) = token.split_once('.').ok_or(TrustTokenError::Invalid)?;
        let payload = b64
            .decode(payload_b64)
            .map_err(|_| TrustTokenError::Invalid)?;
        let mac = hex::decode(mac_hex).map_err(|_| TrustTokenError::Invalid)?;
        if mac != mac_bytes(secret, &payload) {
            return Err(TrustTokenError::Invalid);
        }
        serde_json::from_slice(&payload).map_err(|_| TrustTokenError::Invalid)
    }

    /// Mints a token for `user`. The issuing side of the shared secret;
    /// exercised by first-party clients and by tests.
    pub fn issue(&self, user: &TrustedUser) -> Result<String, TrustTokenError> {
        let secret = match self {
            TrustVerifier::SharedSecret { secret } => secret,
            TrustVerifier::Disabled => return Err(TrustTokenError::Disabled),
        };
        let payload = serde_json::to_vec(user).map_err(|_| TrustTokenError::Invalid)?;
        let mac = mac_bytes(secret, &payload);
        Ok(format!("{}.{}", b64.encode(&payload), hex::encode(mac)))
    }
}

fn mac_bytes(secret: &str, payload: &[u8]) -> [u8; 32] {
    let mut keyed = Vec::with_capacity(secret.len() + payload.len());
    keyed.extend_from_slice(secret.as_bytes());
    keyed.extend_from_slice(payload);
    keccak256(&keyed).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> TrustedUser {
        TrustedUser {
            id: "user-91".to_string(),
            wallet_address: "0x1111111111111111111111111111111111111111"
                .parse()
                .unwrap(),
        }
    }

    #[test]
    fn issue_then_verify_round_trips() {
        let verifier = TrustVerifier::from_secret(Some("s3cret".to_string()));
        let token = verifier.issue(&user()).unwrap();
        let decoded = verifier.verify(&token).unwrap();
        assert_eq!(decoded, user());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let verifier = TrustVerifier::from_secret(Some("s3cret".to_string()));
        let token = verifier.issue(&user()).unwrap();
        let (_, mac) = token.split_once('.').unwrap();
        let forged = TrustedUser {
            id: "user-91".to_string(),
            wallet_address: "0x2222222222222222222222222222222222222222"
                .parse()
                .unwrap(),
        };
        let forged_payload = b64.encode(serde_json::to_vec(&forged).unwrap());
        let tampered = format!("{forged_payload}.{mac}");
        assert_eq!(verifier.verify(&tampered), Err(TrustTokenError::Invalid));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = TrustVerifier::from_secret(Some("s3cret".to_string()));
        let verifier = TrustVerifier::from_secret(Some("other".to_string()));
        let token = issuer.issue(&user()).unwrap();
        assert_eq!(verifier.verify(&token), Err(TrustTokenError::Invalid));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let verifier = TrustVerifier::from_secret(Some("s3cret".to_string()));
        for garbage in ["", "no-dot", "a.b", "!!!.00"] {
            assert_eq!(verifier.verify(garbage), Err(TrustTokenError::Invalid));
        }
    }

    #[test]
    fn disabled_rejects_everything() {
        let issuer = TrustVerifier::from_secret(Some("s3cret".to_string()));
        let token = issuer.issue(&user()).unwrap();
        let disabled = TrustVerifier::from_secret(None);
        assert_eq!(disabled.verify(&token), Err(TrustTokenError::Disabled));
        assert!(disabled.issue(&user()).is_err());
    }
}
