//! Chain access: per-network JSON-RPC readers and receipt retrieval.
//!
//! Verification only ever *reads* the chain — fetching the receipt for a
//! claimed payment transaction — so readers wrap a plain [`RootProvider`]
//! with no signing credentials. Readers are constructed once at startup from
//! per-network `RPC_URL_*` endpoints and shared by all in-flight requests.
//!
//! The [`ChainReader`] trait keeps the verifier testable without RPC: tests
//! substitute a stub returning hand-built receipts.

use alloy::consensus::TxReceipt as _;
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::network::Network;
use crate::types::TransactionHash;

/// Standard ERC-20 event bindings used for transfer-log matching.
pub mod erc20 {
    alloy::sol! {
        #[allow(missing_docs)]
        #[derive(Debug)]
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The RPC call failed; retryable from the caller's point of view.
    #[error("Chain RPC error: {0}")]
    Rpc(String),
    /// The RPC call exceeded the configured deadline; retryable.
    #[error("Chain RPC timed out after {0:?}")]
    Timeout(Duration),
}

/// One event log from a transaction receipt, reduced to what transfer
/// matching needs: the emitting contract and the raw topics/data.
#[derive(Debug, Clone)]
pub struct TxLog {
    pub address: alloy::primitives::Address,
    pub data: alloy::primitives::LogData,
}

/// A transaction receipt reduced to execution status and event logs, in the
/// order the chain returned them.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub status: bool,
    pub logs: Vec<TxLog>,
}

/// Read access to a single network.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Fetches the receipt for `hash`, or `None` if the transaction is
    /// unknown or not yet mined.
    async fn transaction_receipt(
        &self,
        hash: TransactionHash,
    ) -> Result<Option<TxReceipt>, ChainError>;
}

/// A map of configured chain readers keyed by network.
///
/// Mirrors the provider-cache shape: the registry implements it for real
/// RPC-backed readers and tests implement it for stubs.
pub trait ReaderMap {
    type Reader: ChainReader;

    /// Returns the reader for `network`, if one is configured.
    fn by_network(&self, network: Network) -> Option<&Self::Reader>;
}

/// Filler stack attached by `ProviderBuilder::new()`: gas, blob gas, nonce,
/// and chain ID.
pub type InnerFiller =
    JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>;

/// The composed read-only provider type wrapped by [`EvmReader`]. No wallet
/// layer: this service never signs or submits transactions.
pub type InnerProvider = FillProvider<JoinFill<Identity, InnerFiller>, RootProvider>;

/// [`ChainReader`] over an alloy JSON-RPC provider.
pub struct EvmReader {
    provider: InnerProvider,
    rpc_timeout: Duration,
}

impl EvmReader {
    pub fn new(rpc_url: Url, rpc_timeout: Duration) -> Self {
        EvmReader {
            provider: ProviderBuilder::new().connect_http(rpc_url),
            rpc_timeout,
        }
    }
}

#[async_trait]
impl ChainReader for EvmReader {
    #[instrument(skip(self), fields(hash = %hash, otel.kind = "client"))]
    async fn transaction_receipt(
        &self,
        hash: TransactionHash,
    ) -> Result<Option<TxReceipt>, ChainError> {
        let receipt = tokio::time::timeout(
            self.rpc_timeout,
            self.provider.get_transaction_receipt(hash.into()),
        )
        .await
        .map_err(|_| ChainError::Timeout(self.rpc_timeout))?
        .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(receipt.map(|receipt| TxReceipt {
            status: receipt.status(),
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| TxLog {
                    address: log.inner.address,
                    data: log.inner.data.clone(),
                })
                .collect(),
        }))
    }
}

/// Pre-initialized [`EvmReader`] instances keyed by network.
pub struct ChainRegistry {
    readers: HashMap<Network, EvmReader>,
}

impl ChainRegistry {
    /// Builds readers for every configured endpoint. Networks without an
    /// endpoint are skipped with a warning; a payment quoted on a skipped
    /// network fails verification with an unsupported-network rejection.
    pub fn new(endpoints: &HashMap<Network, Url>, rpc_timeout: Duration) -> Self {
        let mut readers = HashMap::new();
        for network in Network::variants() {
            match endpoints.get(network) {
                Some(rpc_url) => {
                    readers.insert(*network, EvmReader::new(rpc_url.clone(), rpc_timeout));
                    tracing::info!("Initialized chain reader for {} at {}", network, rpc_url);
                }
                None => {
                    tracing::warn!("No RPC URL configured for {} (skipped)", network);
                }
            }
        }
        Self { readers }
    }
}

impl ReaderMap for ChainRegistry {
    type Reader = EvmReader;

    fn by_network(&self, network: Network) -> Option<&EvmReader> {
        self.readers.get(&network)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256, address};
    use alloy::sol_types::SolEvent;

    const TOKEN: Address = address!("0xb755506531786C8aC63B756BaB1ac387bACB0C04");
    const ALICE: Address = address!("0x1111111111111111111111111111111111111111");
    const BOB: Address = address!("0x2222222222222222222222222222222222222222");

    #[test]
    fn transfer_log_round_trips_through_decoder() {
        let log = testutil::transfer_log(TOKEN, ALICE, BOB, U256::from(1500u64));
        let event = erc20::Transfer::decode_log_data(&log.data).unwrap();
        assert_eq!(event.from, ALICE);
        assert_eq!(event.to, BOB);
        assert_eq!(event.value, U256::from(1500u64));
    }

    #[test]
    fn junk_log_fails_to_decode() {
        let log = testutil::junk_log(TOKEN);
        assert!(erc20::Transfer::decode_log_data(&log.data).is_err());
    }

    #[test]
    fn registry_skips_unconfigured_networks() {
        let endpoints = HashMap::from([(
            Network::Base,
            Url::parse("http://localhost:8545").unwrap(),
        )]);
        let registry = ChainRegistry::new(&endpoints, Duration::from_secs(10));
        assert!(registry.by_network(Network::Base).is_some());
        assert!(registry.by_network(Network::Polygon).is_none());
    }
}
