//! Payment-proof verification.
//!
//! Decides whether a submitted proof satisfies a quote's payment requirement
//! without mutating any state. The checks run in a fixed order: quote state,
//! expiry, typed-data signature (unless a trusted identity bypasses it),
//! receipt retrieval, and finally transfer-log matching against the expected
//! token, recipient, sender, and amount.

use alloy::primitives::Signature;
use alloy::sol_types::{Eip712Domain, SolEvent, SolStruct, eip712_domain};
use serde_json::json;
use tracing::instrument;

use crate::chain::{ChainError, ChainReader, ReaderMap, TxReceipt, erc20};
use crate::network::Network;
use crate::timestamp::UnixTimestamp;
use crate::types::{EvmAddress, PaymentProof, Quote, QuoteId, QuoteStatus, TrustedUser};

/// EIP-712 domain name clients sign under. Must match the client side
/// byte-for-byte or every signature verifies against the wrong digest.
pub const PROOF_DOMAIN_NAME: &str = "Payment Proof";
/// EIP-712 domain version clients sign under.
pub const PROOF_DOMAIN_VERSION: &str = "1";

mod typed_data {
    alloy::sol! {
        /// The signed message: the proof minus `signature` and `signer`.
        struct PaymentProof {
            string quoteId;
            string transactionHash;
        }
    }
}

fn proof_domain() -> Eip712Domain {
    eip712_domain! {
        name: PROOF_DOMAIN_NAME,
        version: PROOF_DOMAIN_VERSION,
    }
}

/// EIP-712 signing hash of the proof message for `quote_id` and
/// `transaction_hash`.
///
/// This is the digest a payer's wallet signs; exposed so client tooling can
/// produce proofs without reimplementing the typed-data layout.
pub fn proof_signing_hash(
    quote_id: &QuoteId,
    transaction_hash: &crate::types::TransactionHash,
) -> alloy::primitives::B256 {
    let message = typed_data::PaymentProof {
        quoteId: quote_id.to_string(),
        transactionHash: transaction_hash.to_string(),
    };
    message.eip712_signing_hash(&proof_domain())
}

/// The signing parameters a client needs to produce a valid proof for
/// `quote_id`, returned alongside a freshly created quote.
pub fn signature_parameters(quote_id: &QuoteId) -> serde_json::Value {
    json!({
        "messagePartial": { "quoteId": quote_id },
        "types": {
            "PaymentProof": [
                { "name": "quoteId", "type": "string" },
                { "name": "transactionHash", "type": "string" },
            ],
        },
        "domain": { "name": PROOF_DOMAIN_NAME, "version": PROOF_DOMAIN_VERSION },
    })
}

/// All the ways a proof can fail verification.
#[derive(thiserror::Error, Debug)]
pub enum PaymentError {
    /// The quote is past `Pending` (or raced there); generic non-retryable
    /// rejection.
    #[error("Quote is not in PENDING state")]
    NotPending,
    /// The quote already failed fulfillment; distinct so the client can be
    /// told to contact support rather than retry.
    #[error("Fulfillment failed")]
    FulfillmentFailed,
    #[error("Quote has expired")]
    Expired,
    /// EIP-712 signature is malformed or recovers to the wrong address.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    /// The quote's network has no configured reader.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(Network),
    #[error("Transaction receipt not found")]
    ReceiptNotFound,
    /// No log in the receipt is a qualifying transfer.
    #[error("Transfer log not found")]
    TransferNotFound,
    /// RPC-level failure; retryable, not a rejection of the proof itself.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Verifies `proof` against `quote`, using the trusted identity's wallet as
/// the expected sender when present. No side effects.
#[instrument(skip_all, err, fields(
    quote_id = %quote.id,
    chain_id = quote.token_quote.network.chain_id(),
    trusted = trusted_user.is_some(),
))]
pub async fn verify_payment<M>(
    quote: &Quote,
    proof: &PaymentProof,
    trusted_user: Option<&TrustedUser>,
    chains: &M,
) -> Result<(), PaymentError>
where
    M: ReaderMap,
{
    assert_payable(quote)?;
    if trusted_user.is_none() {
        assert_signature(proof)?;
    }

    let network = quote.token_quote.network;
    let reader = chains
        .by_network(network)
        .ok_or(PaymentError::UnsupportedNetwork(network))?;
    let receipt = reader
        .transaction_receipt(proof.transaction_hash)
        .await?
        .ok_or(PaymentError::ReceiptNotFound)?;

    let expected_sender = trusted_user
        .map(|user| user.wallet_address)
        .unwrap_or(proof.signer);
    assert_transfer(&receipt, quote, expected_sender)
}

/// The state gate: the quote must still be `Pending` and unexpired.
///
/// Also run by the orchestrator ahead of its spent-hash check, so a replayed
/// hash against a dead quote is rejected for the quote's state, not the
/// hash.
pub(crate) fn assert_payable(quote: &Quote) -> Result<(), PaymentError> {
    match quote.status {
        QuoteStatus::Pending => {}
        QuoteStatus::FulfillmentError => return Err(PaymentError::FulfillmentFailed),
        _ => return Err(PaymentError::NotPending),
    }
    if quote.is_expired(UnixTimestamp::now()) {
        return Err(PaymentError::Expired);
    }
    Ok(())
}

/// Recovers the EIP-712 signer of the proof message and checks it matches
/// the claimed `signer`.
///
/// The message is rebuilt from the canonical string forms: the quote id as a
/// UUID string and the transaction hash as lowercase 0x-hex, which is what
/// clients sign.
#[instrument(skip_all, err)]
fn assert_signature(proof: &PaymentProof) -> Result<(), PaymentError> {
    let signature = Signature::from_raw_array(&proof.signature.0)
        .map_err(|e| PaymentError::InvalidSignature(format!("{e}")))?;
    let digest = proof_signing_hash(&proof.quote_id, &proof.transaction_hash);
    let recovered = signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| PaymentError::InvalidSignature(format!("{e}")))?;
    if recovered != proof.signer.0 {
        return Err(PaymentError::InvalidSignature(format!(
            "Address mismatch: recovered: {} expected: {}",
            recovered, proof.signer
        )));
    }
    Ok(())
}

/// Scans receipt logs in returned order for the first qualifying transfer:
/// right token contract, decodes as ERC-20 `Transfer`, right recipient and
/// sender, value at least the quoted amount (overpayment accepted). Logs
/// that fail to decode are skipped, not errors.
fn assert_transfer(
    receipt: &TxReceipt,
    quote: &Quote,
    expected_sender: EvmAddress,
) -> Result<(), PaymentError> {
    let matching = receipt.logs.iter().find(|log| {
        if log.address != quote.token_quote.address.0 {
            return false;
        }
        let Ok(event) = erc20::Transfer::decode_log_data(&log.data) else {
            return false;
        };
        event.to == quote.payment_destination.0
            && event.from == expected_sender.0
            && event.value >= quote.token_quote.amount.0
    });
    match matching {
        Some(_) => Ok(()),
        None => Err(PaymentError::TransferNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testutil::{StubMap, StubReader, junk_log, transfer_log};
    use crate::types::{EvmSignature, TokenAmount, TokenQuote, TransactionHash};
    use alloy::primitives::{Address, U256, address};
    use alloy::signers::SignerSync;
    use alloy::signers::local::PrivateKeySigner;
    use std::collections::HashMap;

    const TOKEN: Address = address!("0xb755506531786C8aC63B756BaB1ac387bACB0C04");
    const DESTINATION: Address = address!("0x742d35Cc6634C0532925a3b844Bc454e4438f44e");

    fn one_token() -> U256 {
        U256::from(10u64).pow(U256::from(18u64))
    }

    fn quote(status: QuoteStatus) -> Quote {
        Quote {
            id: QuoteId::generate(),
            token_quote: TokenQuote {
                symbol: "ZARP".to_string(),
                address: EvmAddress(TOKEN),
                network: Network::Base,
                decimals: 18,
                amount: TokenAmount(one_token()),
            },
            payment_destination: EvmAddress(DESTINATION),
            expires_at: UnixTimestamp::now() + std::time::Duration::from_secs(900),
            metadata: HashMap::new(),
            product_id: "voucher:17".to_string(),
            quantity: 1,
            status,
        }
    }

    fn signed_proof(signer: &PrivateKeySigner, quote: &Quote) -> PaymentProof {
        let transaction_hash = TransactionHash([0xaa; 32]);
        let message = typed_data::PaymentProof {
            quoteId: quote.id.to_string(),
            transactionHash: transaction_hash.to_string(),
        };
        let digest = message.eip712_signing_hash(&proof_domain());
        let signature = signer.sign_hash_sync(&digest).unwrap();
        PaymentProof {
            quote_id: quote.id,
            transaction_hash,
            signature: EvmSignature(signature.as_bytes()),
            signer: EvmAddress(signer.address()),
        }
    }

    fn chains_with_receipt(proof: &PaymentProof, receipt: TxReceipt) -> StubMap {
        let mut reader = StubReader::default();
        reader.receipts.insert(proof.transaction_hash, receipt);
        StubMap {
            network: Network::Base,
            reader,
        }
    }

    #[tokio::test]
    async fn accepts_exact_transfer_and_skips_undecodable_logs() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let proof = signed_proof(&signer, &quote);
        let receipt = TxReceipt {
            status: true,
            logs: vec![
                junk_log(TOKEN),
                transfer_log(TOKEN, signer.address(), DESTINATION, one_token()),
            ],
        };
        let chains = chains_with_receipt(&proof, receipt);
        verify_payment(&quote, &proof, None, &chains).await.unwrap();
    }

    #[tokio::test]
    async fn accepts_overpayment() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let proof = signed_proof(&signer, &quote);
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(
                TOKEN,
                signer.address(),
                DESTINATION,
                one_token() + U256::from(1u64),
            )],
        };
        let chains = chains_with_receipt(&proof, receipt);
        verify_payment(&quote, &proof, None, &chains).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_underpayment() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let proof = signed_proof(&signer, &quote);
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(
                TOKEN,
                signer.address(),
                DESTINATION,
                one_token() - U256::from(1u64),
            )],
        };
        let chains = chains_with_receipt(&proof, receipt);
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransferNotFound));
    }

    #[tokio::test]
    async fn rejects_wrong_token_contract() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let proof = signed_proof(&signer, &quote);
        let other_token = address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(
                other_token,
                signer.address(),
                DESTINATION,
                one_token(),
            )],
        };
        let chains = chains_with_receipt(&proof, receipt);
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransferNotFound));
    }

    #[tokio::test]
    async fn rejects_wrong_recipient() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let proof = signed_proof(&signer, &quote);
        let elsewhere = address!("0x3333333333333333333333333333333333333333");
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(TOKEN, signer.address(), elsewhere, one_token())],
        };
        let chains = chains_with_receipt(&proof, receipt);
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransferNotFound));
    }

    #[tokio::test]
    async fn rejects_non_pending_quote() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Completed);
        let proof = signed_proof(&signer, &quote);
        let chains = chains_with_receipt(&proof, TxReceipt { status: true, logs: vec![] });
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotPending));
    }

    #[tokio::test]
    async fn failed_fulfillment_is_a_distinct_rejection() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::FulfillmentError);
        let proof = signed_proof(&signer, &quote);
        let chains = chains_with_receipt(&proof, TxReceipt { status: true, logs: vec![] });
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::FulfillmentFailed));
    }

    #[tokio::test]
    async fn rejects_expired_quote() {
        let signer = PrivateKeySigner::random();
        let mut quote = quote(QuoteStatus::Pending);
        quote.expires_at = UnixTimestamp::from_secs(UnixTimestamp::now().as_secs() - 1);
        let proof = signed_proof(&signer, &quote);
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(
                TOKEN,
                signer.address(),
                DESTINATION,
                one_token(),
            )],
        };
        let chains = chains_with_receipt(&proof, receipt);
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Expired));
    }

    #[tokio::test]
    async fn rejects_signature_from_another_key() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let mut proof = signed_proof(&signer, &quote);
        // Claim the signature came from a different wallet.
        proof.signer = EvmAddress(PrivateKeySigner::random().address());
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(
                TOKEN,
                proof.signer.0,
                DESTINATION,
                one_token(),
            )],
        };
        let chains = chains_with_receipt(&proof, receipt);
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn rejects_unsupported_network() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let proof = signed_proof(&signer, &quote);
        let chains = StubMap {
            network: Network::Polygon,
            reader: StubReader::default(),
        };
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedNetwork(Network::Base)));
    }

    #[tokio::test]
    async fn rejects_missing_receipt() {
        let signer = PrivateKeySigner::random();
        let quote = quote(QuoteStatus::Pending);
        let proof = signed_proof(&signer, &quote);
        let chains = StubMap {
            network: Network::Base,
            reader: StubReader::default(),
        };
        let err = verify_payment(&quote, &proof, None, &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ReceiptNotFound));
    }

    #[tokio::test]
    async fn trusted_user_bypasses_signature_and_sets_expected_sender() {
        let quote = quote(QuoteStatus::Pending);
        let wallet = address!("0x4444444444444444444444444444444444444444");
        let trusted = TrustedUser {
            id: "user-91".to_string(),
            wallet_address: EvmAddress(wallet),
        };
        // Garbage signature and an unrelated signer: both must be ignored.
        let proof = PaymentProof {
            quote_id: quote.id,
            transaction_hash: TransactionHash([0xbb; 32]),
            signature: EvmSignature([1u8; 65]),
            signer: EvmAddress(address!("0x5555555555555555555555555555555555555555")),
        };
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(TOKEN, wallet, DESTINATION, one_token())],
        };
        let chains = chains_with_receipt(&proof, receipt);
        verify_payment(&quote, &proof, Some(&trusted), &chains)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn trusted_user_transfer_must_come_from_trusted_wallet() {
        let quote = quote(QuoteStatus::Pending);
        let trusted = TrustedUser {
            id: "user-91".to_string(),
            wallet_address: EvmAddress(address!("0x4444444444444444444444444444444444444444")),
        };
        let signer_wallet = address!("0x5555555555555555555555555555555555555555");
        let proof = PaymentProof {
            quote_id: quote.id,
            transaction_hash: TransactionHash([0xbb; 32]),
            signature: EvmSignature([1u8; 65]),
            signer: EvmAddress(signer_wallet),
        };
        // The transfer came from the proof's signer, not the trusted wallet.
        let receipt = TxReceipt {
            status: true,
            logs: vec![transfer_log(TOKEN, signer_wallet, DESTINATION, one_token())],
        };
        let chains = chains_with_receipt(&proof, receipt);
        let err = verify_payment(&quote, &proof, Some(&trusted), &chains)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransferNotFound));
    }
}
