//! Core data model: quotes, payment proofs, and the typed primitives they are
//! built from.
//!
//! Wire compatibility matters here: quotes and proofs are exchanged with
//! browser wallets and stored as JSON, so every field keeps the camelCase
//! names and string-encoded numeric forms the clients already produce
//! (`"PENDING"` statuses, decimal-string amounts, stringified timestamps).

use alloy::hex;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use uuid::Uuid;

use crate::network::Network;
use crate::timestamp::UnixTimestamp;

/// Represents an EVM address.
///
/// Wrapper around `alloy::primitives::Address`, providing display and
/// serialization support. Comparison happens on the decoded bytes, so two
/// differently-cased hex spellings of the same address are equal.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy::primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy::primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<alloy::primitives::Address> for EvmAddress {
    fn from(address: alloy::primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for alloy::primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

/// A 65-byte EVM signature over EIP-712 typed data.
/// Serialized as a 0x-prefixed hex string of 130 characters.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl Debug for EvmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmSignature(0x{})", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("Invalid regex for EVM signature")
        });

        if SIG_REGEX.is_match(&s) {
            let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|_| {
                serde::de::Error::custom("Failed to decode EVM signature hex string")
            })?;

            let array: [u8; 65] = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("Signature must be exactly 65 bytes"))?;

            Ok(EvmSignature(array))
        } else {
            Err(serde::de::Error::custom(
                "Invalid EVM signature format: must be 0x-prefixed and 130 hex chars",
            ))
        }
    }
}

impl Serialize for EvmSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_string = format!("0x{}", hex::encode(self.0));
        serializer.serialize_str(&hex_string)
    }
}

impl From<[u8; 65]> for EvmSignature {
    fn from(bytes: [u8; 65]) -> Self {
        EvmSignature(bytes)
    }
}

/// A 32-byte transaction hash, hex-encoded with 0x prefix on the wire.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransactionHash(pub [u8; 32]);

impl Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash(0x{})", hex::encode(self.0))
    }
}

impl Display for TransactionHash {
    /// Lowercase 0x-prefixed hex; this is also the canonical form used in
    /// spent-hash storage keys.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid transaction hash: must be 0x-prefixed and 64 hex chars")]
pub struct TransactionHashDecodingError;

impl FromStr for TransactionHash {
    type Err = TransactionHashDecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static HASH_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid regex for transaction hash")
        });
        if !HASH_REGEX.is_match(s) {
            return Err(TransactionHashDecodingError);
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| TransactionHashDecodingError)?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| TransactionHashDecodingError)?;
        Ok(TransactionHash(array))
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TransactionHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for TransactionHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<TransactionHash> for alloy::primitives::B256 {
    fn from(hash: TransactionHash) -> Self {
        alloy::primitives::B256::new(hash.0)
    }
}

/// A token amount in base units (e.g. USDC with 6 decimals), backed by `U256`.
///
/// Serialized as a decimal string to prevent precision loss in JSON:
/// `1000000000000000000` becomes `"1000000000000000000"`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenAmount(pub alloy::primitives::U256);

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(alloy::primitives::U256::from(value))
    }
}

impl From<alloy::primitives::U256> for TokenAmount {
    fn from(value: alloy::primitives::U256) -> Self {
        TokenAmount(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AmountConversionError {
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

impl TokenAmount {
    /// Scales a decimal currency amount to token base units.
    ///
    /// `12.34` against an 18-decimals token becomes `1234 * 10^16`. Excess
    /// precision is rejected rather than truncated, so a price can never be
    /// silently rounded away from what the client will be charged.
    pub fn from_decimal(
        value: rust_decimal::Decimal,
        decimals: u8,
    ) -> Result<Self, AmountConversionError> {
        if value.is_sign_negative() {
            return Err(AmountConversionError::Negative);
        }
        let scale = value.normalize().scale();
        let decimals = u32::from(decimals);
        if scale > decimals {
            return Err(AmountConversionError::WrongPrecision {
                money: scale,
                token: decimals,
            });
        }
        let mantissa = value.normalize().mantissa().unsigned_abs();
        let factor =
            alloy::primitives::U256::from(10u64).pow(alloy::primitives::U256::from(decimals - scale));
        Ok(TokenAmount(alloy::primitives::U256::from(mantissa) * factor))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid token amount: expected a non-negative integer string")]
pub struct TokenAmountDecodingError;

impl FromStr for TokenAmount {
    type Err = TokenAmountDecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = alloy::primitives::U256::from_str_radix(s, 10)
            .map_err(|_| TokenAmountDecodingError)?;
        Ok(TokenAmount(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TokenAmount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Opaque quote identifier, generated once at quote creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(Uuid);

impl QuoteId {
    pub fn generate() -> Self {
        QuoteId(Uuid::new_v4())
    }
}

impl Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QuoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(QuoteId(Uuid::from_str(s)?))
    }
}

/// Lifecycle state of a quote.
///
/// Transitions are monotonic and one-directional:
/// `Pending → PaymentReceived → Completed | FulfillmentError`.
/// The two terminal states admit no further transition. An aged quote stays
/// `Pending`; expiry is a property of `expires_at`, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Pending,
    PaymentReceived,
    Completed,
    FulfillmentError,
}

impl Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuoteStatus::Pending => "PENDING",
            QuoteStatus::PaymentReceived => "PAYMENT_RECEIVED",
            QuoteStatus::Completed => "COMPLETED",
            QuoteStatus::FulfillmentError => "FULFILLMENT_ERROR",
        };
        write!(f, "{}", s)
    }
}

impl QuoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteStatus::Completed | QuoteStatus::FulfillmentError)
    }
}

/// The token the client must pay with to fulfill a quote.
///
/// Snapshotted from configuration at quote creation; the amount is frozen and
/// never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenQuote {
    pub symbol: String,
    pub address: EvmAddress,
    #[serde(rename = "chainId", with = "crate::network::as_chain_id")]
    pub network: Network,
    pub decimals: u8,
    pub amount: TokenAmount,
}

/// A price lock for a purchase: what to pay, where to pay it, and until when.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: QuoteId,
    pub token_quote: TokenQuote,
    /// Address the payment must arrive at; fixed per deployment.
    pub payment_destination: EvmAddress,
    pub expires_at: UnixTimestamp,
    /// Client-supplied, opaque to the engine, passed through to fulfillment.
    pub metadata: HashMap<String, String>,
    pub product_id: String,
    pub quantity: u32,
    pub status: QuoteStatus,
}

impl Quote {
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        now > self.expires_at
    }
}

/// Client-submitted claim that a payment was made on-chain.
///
/// Transient: constructed per request and never persisted as-is, except
/// embedded inside the spend-ledger record for the hash it consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub quote_id: QuoteId,
    pub transaction_hash: TransactionHash,
    /// EIP-712 signature over `{quoteId, transactionHash}`.
    pub signature: EvmSignature,
    /// Address that allegedly produced the signature and sent the payment.
    pub signer: EvmAddress,
}

/// Identity asserted by a trusted caller through a signed token.
///
/// When present, `wallet_address` replaces the proof's `signer` as the
/// expected on-chain sender and the typed-data signature check is skipped.
/// Decoded fresh per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedUser {
    pub id: String,
    pub wallet_address: EvmAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn sample_quote() -> Quote {
        Quote {
            id: QuoteId::generate(),
            token_quote: TokenQuote {
                symbol: "USDC".to_string(),
                address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
                    .parse()
                    .unwrap(),
                network: Network::Base,
                decimals: 6,
                amount: TokenAmount::from(1_500_000u64),
            },
            payment_destination: "0x742d35Cc6634C0532925a3b844Bc454e4438f44e"
                .parse()
                .unwrap(),
            expires_at: UnixTimestamp::from_secs(1700000900),
            metadata: HashMap::from([("phoneNumber".to_string(), "+27820000000".to_string())]),
            product_id: "voucher:17".to_string(),
            quantity: 2,
            status: QuoteStatus::Pending,
        }
    }

    #[test]
    fn quote_wire_shape() {
        let quote = sample_quote();
        let value = serde_json::to_value(&quote).unwrap();
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["tokenQuote"]["chainId"], 8453);
        assert_eq!(value["tokenQuote"]["amount"], "1500000");
        assert_eq!(value["expiresAt"], "1700000900");
        assert_eq!(value["productId"], "voucher:17");
        assert!(value["paymentDestination"].is_string());

        let back: Quote = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, quote.id);
        assert_eq!(back.token_quote.network, Network::Base);
        assert_eq!(back.status, QuoteStatus::Pending);
    }

    #[test]
    fn status_serde_names() {
        for (status, name) in [
            (QuoteStatus::Pending, "\"PENDING\""),
            (QuoteStatus::PaymentReceived, "\"PAYMENT_RECEIVED\""),
            (QuoteStatus::Completed, "\"COMPLETED\""),
            (QuoteStatus::FulfillmentError, "\"FULFILLMENT_ERROR\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), name);
        }
    }

    #[test]
    fn transaction_hash_parses_and_lowercases() {
        let hash: TransactionHash =
            "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
                .parse()
                .unwrap();
        assert_eq!(
            hash.to_string(),
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        assert!("0x1234".parse::<TransactionHash>().is_err());
        assert!(
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
                .parse::<TransactionHash>()
                .is_err()
        );
    }

    #[test]
    fn token_amount_decimal_serde() {
        let amount = TokenAmount(U256::from(10u64).pow(U256::from(18u64)));
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000000000000000\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
        assert!(serde_json::from_str::<TokenAmount>("\"-5\"").is_err());
    }

    #[test]
    fn decimal_price_scales_to_base_units() {
        use rust_decimal::Decimal;
        // 1.00 currency units on an 18-decimals token.
        let amount = TokenAmount::from_decimal(Decimal::new(100, 2), 18).unwrap();
        assert_eq!(amount.to_string(), "1000000000000000000");
        // 12.34 on a 6-decimals token.
        let amount = TokenAmount::from_decimal(Decimal::new(1234, 2), 6).unwrap();
        assert_eq!(amount.to_string(), "12340000");
        // Precision beyond the token's decimals is rejected, not truncated.
        let err = TokenAmount::from_decimal(Decimal::new(12345, 4), 2).unwrap_err();
        assert!(matches!(err, AmountConversionError::WrongPrecision { .. }));
        let err = TokenAmount::from_decimal(Decimal::new(-1, 0), 18).unwrap_err();
        assert!(matches!(err, AmountConversionError::Negative));
    }

    #[test]
    fn signature_rejects_wrong_length() {
        let ok = format!("\"0x{}\"", "ab".repeat(65));
        assert!(serde_json::from_str::<EvmSignature>(&ok).is_ok());
        let short = format!("\"0x{}\"", "ab".repeat(64));
        assert!(serde_json::from_str::<EvmSignature>(&short).is_err());
    }

    #[test]
    fn addresses_compare_case_insensitively() {
        let lower: EvmAddress = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"
            .parse()
            .unwrap();
        let checksummed: EvmAddress = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
            .parse()
            .unwrap();
        assert_eq!(lower, checksummed);
    }
}
