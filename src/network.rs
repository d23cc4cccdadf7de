//! Supported networks for payment verification.
//!
//! A quote locks the payment to a single EVM network. The set of networks is a
//! closed enum so an unsupported chain is unrepresentable past the
//! configuration boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// EVM networks this service can verify payments on.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Polygon mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Base => write!(f, "base"),
            Network::BaseSepolia => write!(f, "base-sepolia"),
            Network::Polygon => write!(f, "polygon"),
            Network::PolygonAmoy => write!(f, "polygon-amoy"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetwork(String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    /// Parses a network from its name (`"base"`) or its decimal chain ID
    /// (`"8453"`). The numeric form matches what EVM wallets report.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" | "8453" => Ok(Network::Base),
            "base-sepolia" | "84532" => Ok(Network::BaseSepolia),
            "polygon" | "137" => Ok(Network::Polygon),
            "polygon-amoy" | "80002" => Ok(Network::PolygonAmoy),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::Polygon,
            Network::PolygonAmoy,
        ]
    }

    /// EIP-155 chain ID of this network.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Polygon => 137,
            Network::PolygonAmoy => 80002,
        }
    }

    /// Environment variable carrying the RPC endpoint for this network.
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Network::Base => "RPC_URL_BASE",
            Network::BaseSepolia => "RPC_URL_BASE_SEPOLIA",
            Network::Polygon => "RPC_URL_POLYGON",
            Network::PolygonAmoy => "RPC_URL_POLYGON_AMOY",
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Network> {
        Network::variants()
            .iter()
            .copied()
            .find(|network| network.chain_id() == chain_id)
    }
}

/// Serde adapter serializing a [`Network`] as its numeric chain ID.
///
/// The quote wire format carries `"chainId": 8453` rather than the network
/// name, so clients can feed it straight into wallet RPC switching.
pub mod as_chain_id {
    use super::Network;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(network: &Network, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(network.chain_id())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Network, D::Error>
    where
        D: Deserializer<'de>,
    {
        let chain_id = u64::deserialize(deserializer)?;
        Network::from_chain_id(chain_id)
            .ok_or_else(|| D::Error::custom(format!("unknown chain id {chain_id}")))
    }
}
