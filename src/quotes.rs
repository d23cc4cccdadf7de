//! Quote persistence: creation, lookup, and status transitions.
//!
//! Quotes live in the key-value store under `quote:<id>`. The store owns
//! serialization and the status transition discipline: moving a quote out of
//! `Pending` goes through [`QuoteStore::transition`], a compare-and-swap on
//! the serialized quote, so two concurrent settlement attempts cannot both
//! claim the same quote.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::kv::{CasOutcome, KeyValueStore, KvError};
use crate::timestamp::UnixTimestamp;
use crate::types::{EvmAddress, Quote, QuoteId, QuoteStatus, TokenAmount, TokenQuote};
use crate::network::Network;

#[derive(Debug, thiserror::Error)]
pub enum QuoteStoreError {
    #[error("Quote not found")]
    NotFound,
    /// The stored status changed between read and write; the transition was
    /// not applied.
    #[error("Quote is no longer {expected}")]
    Conflict { expected: QuoteStatus },
    #[error("Stored quote is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] KvError),
}

/// Deployment-fixed parameters snapshotted into every quote.
#[derive(Debug, Clone)]
pub struct PaymentTokenConfig {
    pub network: Network,
    pub address: EvmAddress,
    pub decimals: u8,
    pub symbol: String,
}

#[derive(Clone)]
pub struct QuoteStore {
    kv: Arc<dyn KeyValueStore>,
    token: PaymentTokenConfig,
    payment_destination: EvmAddress,
    /// How long a quote is payable.
    quote_ttl: Duration,
    /// How long the record is retained in the store. Aged `PENDING` quotes
    /// are garbage-collected by this key TTL, not by an eviction pass.
    retention: Duration,
}

fn quote_key(id: &QuoteId) -> String {
    format!("quote:{id}")
}

impl QuoteStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        token: PaymentTokenConfig,
        payment_destination: EvmAddress,
        quote_ttl: Duration,
        retention: Duration,
    ) -> Self {
        QuoteStore {
            kv,
            token,
            payment_destination,
            quote_ttl,
            retention,
        }
    }

    pub fn quote_ttl(&self) -> Duration {
        self.quote_ttl
    }

    /// The deployment's payment token parameters, snapshotted into quotes.
    pub fn payment_token(&self) -> &PaymentTokenConfig {
        &self.token
    }

    /// Creates and persists a new `Pending` quote with a frozen token amount.
    #[instrument(skip_all, fields(product_id = %product_id, quantity = quantity))]
    pub async fn create(
        &self,
        amount: TokenAmount,
        product_id: String,
        quantity: u32,
        metadata: HashMap<String, String>,
    ) -> Result<Quote, QuoteStoreError> {
        let quote = Quote {
            id: QuoteId::generate(),
            token_quote: TokenQuote {
                symbol: self.token.symbol.clone(),
                address: self.token.address,
                network: self.token.network,
                decimals: self.token.decimals,
                amount,
            },
            payment_destination: self.payment_destination,
            expires_at: UnixTimestamp::now() + self.quote_ttl,
            metadata,
            product_id,
            quantity,
            status: QuoteStatus::Pending,
        };
        let raw = serde_json::to_string(&quote)?;
        self.kv
            .set(&quote_key(&quote.id), raw, Some(self.retention))
            .await?;
        Ok(quote)
    }

    /// Returns the stored quote verbatim, or `None` if unknown. Missing is
    /// not an error here; the caller decides how to react.
    pub async fn get(&self, id: &QuoteId) -> Result<Option<Quote>, QuoteStoreError> {
        let raw = self.kv.get(&quote_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Atomically moves a quote from `expected` to `next`.
    ///
    /// The swap is keyed on the full serialized quote as currently stored, so
    /// at most one concurrent caller can win a given transition.
    #[instrument(skip(self), err)]
    pub async fn transition(
        &self,
        id: &QuoteId,
        expected: QuoteStatus,
        next: QuoteStatus,
    ) -> Result<Quote, QuoteStoreError> {
        let key = quote_key(id);
        let raw = self
            .kv
            .get(&key)
            .await?
            .ok_or(QuoteStoreError::NotFound)?;
        let mut quote: Quote = serde_json::from_str(&raw)?;
        if quote.status != expected {
            return Err(QuoteStoreError::Conflict { expected });
        }
        quote.status = next;
        let updated = serde_json::to_string(&quote)?;
        match self.kv.compare_and_swap(&key, &raw, updated, None).await? {
            CasOutcome::Swapped => Ok(quote),
            CasOutcome::Missing => Err(QuoteStoreError::NotFound),
            CasOutcome::Conflict => Err(QuoteStoreError::Conflict { expected }),
        }
    }
}
