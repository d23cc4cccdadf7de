//! Settlement orchestration: the state machine driving a quote from
//! `Pending` to a terminal status.
//!
//! A single settlement attempt runs, in order: trusted-token decode, quote
//! load, early spent-hash check, payment verification, the atomic
//! `Pending → PaymentReceived` claim, the atomic spend commit, fulfillment,
//! and the terminal transition. Nothing before the claim mutates state, so
//! every verification rejection leaves the quote exactly as it was.

use std::sync::Arc;
use tracing::instrument;

use crate::chain::{ChainReader, ReaderMap};
use crate::fulfillment::{FulfillmentError, FulfillmentProvider, fulfill_order};
use crate::quotes::{QuoteStore, QuoteStoreError};
use crate::spend::{SpendLedger, SpendLedgerError};
use crate::trust::TrustVerifier;
use crate::types::{PaymentProof, Quote, QuoteStatus, TrustedUser};
use crate::verifier::{PaymentError, assert_payable, verify_payment};

#[derive(thiserror::Error, Debug)]
pub enum SettlementError {
    /// The trusted-identity token did not verify; rejected before any chain
    /// interaction.
    #[error("Invalid trusted user data token")]
    InvalidTrustToken,
    #[error("Quote not found")]
    QuoteNotFound,
    #[error("Transaction hash already spent")]
    AlreadySpent,
    #[error(transparent)]
    Payment(#[from] PaymentError),
    /// Payment was accepted and the hash consumed, but the provider failed.
    /// Carries the quote in its terminal `FULFILLMENT_ERROR` state; recovery
    /// is out-of-band only.
    #[error("Fulfillment failed: {source}")]
    Fulfillment {
        quote: Box<Quote>,
        #[source]
        source: FulfillmentError,
    },
    #[error(transparent)]
    Store(QuoteStoreError),
    #[error(transparent)]
    Spend(#[from] SpendLedgerError),
}

impl From<QuoteStoreError> for SettlementError {
    fn from(err: QuoteStoreError) -> Self {
        match err {
            QuoteStoreError::NotFound => SettlementError::QuoteNotFound,
            // A lost transition race means another attempt claimed the quote
            // first; surface it the same as any other non-pending state.
            QuoteStoreError::Conflict { .. } => {
                SettlementError::Payment(PaymentError::NotPending)
            }
            other => SettlementError::Store(other),
        }
    }
}

pub struct SettlementOrchestrator<M, F> {
    quotes: QuoteStore,
    spend: SpendLedger,
    chains: M,
    fulfillment: Arc<F>,
    trust: TrustVerifier,
}

impl<M, F> SettlementOrchestrator<M, F>
where
    M: ReaderMap + Send + Sync,
    M::Reader: ChainReader,
    F: FulfillmentProvider,
{
    pub fn new(
        quotes: QuoteStore,
        spend: SpendLedger,
        chains: M,
        fulfillment: Arc<F>,
        trust: TrustVerifier,
    ) -> Self {
        SettlementOrchestrator {
            quotes,
            spend,
            chains,
            fulfillment,
            trust,
        }
    }

    /// Runs one settlement attempt for `proof`, returning the quote in its
    /// final state for this attempt.
    #[instrument(skip_all, err, fields(quote_id = %proof.quote_id, hash = %proof.transaction_hash))]
    pub async fn settle(
        &self,
        proof: &PaymentProof,
        trust_token: Option<&str>,
    ) -> Result<Quote, SettlementError> {
        let trusted_user: Option<TrustedUser> = match trust_token {
            Some(token) => Some(
                self.trust
                    .verify(token)
                    .map_err(|_| SettlementError::InvalidTrustToken)?,
            ),
            None => None,
        };

        let quote = self
            .quotes
            .get(&proof.quote_id)
            .await?
            .ok_or(SettlementError::QuoteNotFound)?;

        // Quote state first, so a replayed hash on a dead quote reports the
        // quote's state rather than the hash.
        assert_payable(&quote)?;

        // Cheap local rejection before any RPC; the authoritative guard is
        // the atomic mark_spent below.
        if self.spend.is_spent(&proof.transaction_hash).await? {
            return Err(SettlementError::AlreadySpent);
        }

        verify_payment(&quote, proof, trusted_user.as_ref(), &self.chains).await?;

        let quote = self
            .quotes
            .transition(&quote.id, QuoteStatus::Pending, QuoteStatus::PaymentReceived)
            .await?;

        let consumed = self
            .spend
            .mark_spent(&proof.transaction_hash, proof)
            .await?;
        if !consumed {
            // Another settlement won the hash between our check and commit.
            // This quote stays PAYMENT_RECEIVED and needs operator attention;
            // completing it would redeem one payment twice.
            tracing::warn!(quote_id = %quote.id, "Transaction hash lost to a concurrent settlement");
            return Err(SettlementError::AlreadySpent);
        }

        match fulfill_order(self.fulfillment.as_ref(), &quote).await {
            Ok(()) => {
                let quote = self
                    .quotes
                    .transition(&quote.id, QuoteStatus::PaymentReceived, QuoteStatus::Completed)
                    .await?;
                Ok(quote)
            }
            Err(source) => {
                tracing::error!(error = %source, quote_id = %quote.id, "Fulfillment failed");
                let quote = self
                    .quotes
                    .transition(
                        &quote.id,
                        QuoteStatus::PaymentReceived,
                        QuoteStatus::FulfillmentError,
                    )
                    .await?;
                Err(SettlementError::Fulfillment {
                    quote: Box::new(quote),
                    source,
                })
            }
        }
    }
}
