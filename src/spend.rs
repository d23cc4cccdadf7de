//! Idempotent record of consumed transaction hashes.
//!
//! One on-chain payment buys one fulfillment. Once a proof is accepted its
//! transaction hash is recorded under `spent:<lowercased hash>` and the key
//! is never deleted: existence of the key, not its value, is the spent flag.
//! The write happens after verification but before fulfillment on purpose —
//! a confirmed payment is economically consumed even if fulfillment later
//! fails, so the same transfer cannot redeem a second voucher.

use std::sync::Arc;
use tracing::instrument;

use crate::kv::{KeyValueStore, KvError};
use crate::types::{PaymentProof, TransactionHash};

#[derive(Debug, thiserror::Error)]
pub enum SpendLedgerError {
    #[error("Proof is not serializable: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] KvError),
}

#[derive(Clone)]
pub struct SpendLedger {
    kv: Arc<dyn KeyValueStore>,
}

fn spent_key(hash: &TransactionHash) -> String {
    // TransactionHash renders as lowercase hex, which is the canonical key
    // form regardless of how the client cased the submitted hash.
    format!("spent:{hash}")
}

impl SpendLedger {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        SpendLedger { kv }
    }

    /// Whether `hash` has already been consumed by an accepted proof.
    pub async fn is_spent(&self, hash: &TransactionHash) -> Result<bool, SpendLedgerError> {
        Ok(self.kv.get(&spent_key(hash)).await?.is_some())
    }

    /// Consumes `hash`, recording the proof that spent it. Returns whether
    /// this call won the hash; a `false` means another settlement already
    /// consumed it. Check and write are a single atomic operation.
    #[instrument(skip_all, fields(hash = %hash))]
    pub async fn mark_spent(
        &self,
        hash: &TransactionHash,
        proof: &PaymentProof,
    ) -> Result<bool, SpendLedgerError> {
        let raw = serde_json::to_string(proof)?;
        let created = self.kv.set_if_absent(&spent_key(hash), raw, None).await?;
        Ok(created)
    }
}
