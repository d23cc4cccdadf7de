//! Environment-driven configuration.
//!
//! Everything the service needs is read once at startup from the process
//! environment (a `.env` file is loaded first by `main`). Missing or
//! malformed values fail fast with the offending variable named.
//!
//! Variables:
//! - `HOST`, `PORT` — bind address (default `0.0.0.0:8080`)
//! - `MERCHANT_ADDRESS` — where payments must arrive
//! - `PAYMENT_TOKEN_ADDRESS`, `PAYMENT_TOKEN_CHAIN_ID`,
//!   `PAYMENT_TOKEN_DECIMALS`, `PAYMENT_TOKEN_SYMBOL` — the payment token
//! - `QUOTE_TTL_SECONDS` — how long a quote is payable (default 900)
//! - `QUOTE_RETENTION_SECONDS` — store-level retention of quote records
//!   (default 86400)
//! - `RPC_TIMEOUT_SECONDS` — per-call chain RPC deadline (default 10)
//! - `RPC_URL_BASE`, `RPC_URL_BASE_SEPOLIA`, `RPC_URL_POLYGON`,
//!   `RPC_URL_POLYGON_AMOY` — RPC endpoints per network
//! - `TRUSTED_CLIENT_SECRET` — shared secret for the trust bypass; unset
//!   disables the bypass entirely
//! - `VOUCHER_API_URL`, `VOUCHER_CAMPAIGN_ID`, `VOUCHER_EMAIL`,
//!   `VOUCHER_PASSWORD` — fulfillment provider credentials

use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::fulfillment::VoucherApiConfig;
use crate::network::Network;
use crate::quotes::PaymentTokenConfig;
use crate::types::EvmAddress;

const ENV_HOST: &str = "HOST";
const ENV_PORT: &str = "PORT";
const ENV_MERCHANT_ADDRESS: &str = "MERCHANT_ADDRESS";
const ENV_TOKEN_ADDRESS: &str = "PAYMENT_TOKEN_ADDRESS";
const ENV_TOKEN_CHAIN_ID: &str = "PAYMENT_TOKEN_CHAIN_ID";
const ENV_TOKEN_DECIMALS: &str = "PAYMENT_TOKEN_DECIMALS";
const ENV_TOKEN_SYMBOL: &str = "PAYMENT_TOKEN_SYMBOL";
const ENV_QUOTE_TTL: &str = "QUOTE_TTL_SECONDS";
const ENV_QUOTE_RETENTION: &str = "QUOTE_RETENTION_SECONDS";
const ENV_RPC_TIMEOUT: &str = "RPC_TIMEOUT_SECONDS";
const ENV_TRUSTED_CLIENT_SECRET: &str = "TRUSTED_CLIENT_SECRET";
const ENV_VOUCHER_API_URL: &str = "VOUCHER_API_URL";
const ENV_VOUCHER_CAMPAIGN_ID: &str = "VOUCHER_CAMPAIGN_ID";
const ENV_VOUCHER_EMAIL: &str = "VOUCHER_EMAIL";
const ENV_VOUCHER_PASSWORD: &str = "VOUCHER_PASSWORD";

const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(60 * 15);
const DEFAULT_QUOTE_RETENTION: Duration = Duration::from_secs(60 * 60 * 24);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env {0} not set")]
    Missing(&'static str),
    #[error("env {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub payment_token: PaymentTokenConfig,
    pub payment_destination: EvmAddress,
    pub quote_ttl: Duration,
    pub quote_retention: Duration,
    pub rpc_timeout: Duration,
    /// Per-network RPC endpoints; unlisted networks are unsupported at
    /// verification time.
    pub rpc_endpoints: HashMap<Network, Url>,
    pub trusted_client_secret: Option<String>,
    pub voucher: VoucherApiConfig,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parsed<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn required_parsed<T>(name: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parsed(name, &required(name)?)
}

fn duration_or(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => Ok(Duration::from_secs(parsed(name, &raw)?)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = match env::var(ENV_HOST) {
            Ok(raw) => parsed(ENV_HOST, &raw)?,
            Err(_) => IpAddr::from([0, 0, 0, 0]),
        };
        let port = match env::var(ENV_PORT) {
            Ok(raw) => parsed(ENV_PORT, &raw)?,
            Err(_) => 8080,
        };

        let payment_token = PaymentTokenConfig {
            network: required_parsed(ENV_TOKEN_CHAIN_ID)?,
            address: required_parsed(ENV_TOKEN_ADDRESS)?,
            decimals: required_parsed(ENV_TOKEN_DECIMALS)?,
            symbol: required(ENV_TOKEN_SYMBOL)?,
        };

        let mut rpc_endpoints = HashMap::new();
        for network in Network::variants() {
            if let Ok(raw) = env::var(network.rpc_env_var()) {
                let url = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                    name: network.rpc_env_var(),
                    reason: e.to_string(),
                })?;
                rpc_endpoints.insert(*network, url);
            }
        }

        Ok(Config {
            host,
            port,
            payment_token,
            payment_destination: required_parsed(ENV_MERCHANT_ADDRESS)?,
            quote_ttl: duration_or(ENV_QUOTE_TTL, DEFAULT_QUOTE_TTL)?,
            quote_retention: duration_or(ENV_QUOTE_RETENTION, DEFAULT_QUOTE_RETENTION)?,
            rpc_timeout: duration_or(ENV_RPC_TIMEOUT, DEFAULT_RPC_TIMEOUT)?,
            rpc_endpoints,
            trusted_client_secret: env::var(ENV_TRUSTED_CLIENT_SECRET).ok(),
            voucher: VoucherApiConfig {
                base_url: required_parsed(ENV_VOUCHER_API_URL)?,
                campaign_id: required(ENV_VOUCHER_CAMPAIGN_ID)?,
                email: required(ENV_VOUCHER_EMAIL)?,
                password: required(ENV_VOUCHER_PASSWORD)?,
            },
        })
    }
}
