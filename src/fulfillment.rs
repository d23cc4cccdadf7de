//! Fulfillment provider: the external catalog and voucher issuer.
//!
//! The engine treats fulfillment as an opaque collaborator with a stable
//! contract — list products, issue a voucher for a product variant plus
//! customer metadata — expressed as the [`FulfillmentProvider`] trait.
//! [`VoucherApi`] is the HTTP implementation against a campaign-style
//! voucher API: bearer-token login, a cached product catalog, and a
//! create-voucher call.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::cache::{CacheError, KvCache};
use crate::types::Quote;

const AUTH_TOKEN_CACHE_KEY: &str = "voucher:auth_token";
const AUTH_TOKEN_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const PRODUCTS_CACHE_TTL: Duration = Duration::from_secs(60 * 60 * 24);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Catalog id prefix marking products fulfilled through the voucher API.
const VOUCHER_ID_PREFIX: &str = "voucher:";

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Product not found")]
    ProductNotFound,
    /// The quote references a product id no configured provider can fulfill.
    #[error("Fulfillment method not found")]
    UnknownProvider,
    /// The quote's metadata is missing a key the provider requires.
    #[error("Missing metadata field: {0}")]
    MissingMetadata(&'static str),
    /// Transport-level failure (connect, timeout); retryable upstream.
    #[error("Fulfillment provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("Fulfillment provider rejected the request: {status}")]
    Rejected { status: StatusCode },
    #[error("Cache failure: {0}")]
    Cache(String),
}

impl From<CacheError<FulfillmentError>> for FulfillmentError {
    fn from(err: CacheError<FulfillmentError>) -> Self {
        match err {
            CacheError::Compute(inner) => inner,
            other => FulfillmentError::Cache(other.to_string()),
        }
    }
}

/// A catalog item as this service exposes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Provider-prefixed id, e.g. `voucher:17`.
    pub id: String,
    pub name: String,
    pub description: String,
    pub currency: String,
    /// Unit price in currency units (e.g. `150.00`).
    pub price: Decimal,
    /// Variant redeemed at fulfillment time.
    pub variant_id: u64,
    /// Variant price in minor units, passed back verbatim when creating the
    /// voucher.
    pub variant_price: u64,
}

/// External catalog and voucher issuance.
#[async_trait]
pub trait FulfillmentProvider: Send + Sync {
    /// Current catalog. Implementations may serve a cached snapshot.
    async fn products(&self) -> Result<Vec<Product>, FulfillmentError>;

    /// Issues the redemption artifact for `product` to the customer described
    /// by the quote's metadata.
    async fn fulfill(&self, product: &Product, quote: &Quote) -> Result<(), FulfillmentError>;
}

/// Resolves the quote's product against the provider catalog and issues the
/// voucher.
#[instrument(skip_all, err, fields(quote_id = %quote.id, product_id = %quote.product_id))]
pub async fn fulfill_order<F>(provider: &F, quote: &Quote) -> Result<(), FulfillmentError>
where
    F: FulfillmentProvider + ?Sized,
{
    let products = provider.products().await?;
    let product = products
        .iter()
        .find(|product| product.id == quote.product_id)
        .ok_or(FulfillmentError::ProductNotFound)?;
    provider.fulfill(product, quote).await
}

#[derive(Debug, Clone)]
pub struct VoucherApiConfig {
    pub base_url: Url,
    pub campaign_id: String,
    pub email: String,
    pub password: String,
}

/// HTTP [`FulfillmentProvider`] against the voucher campaign API.
pub struct VoucherApi {
    config: VoucherApiConfig,
    http: reqwest::Client,
    cache: KvCache,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct RemoteCampaign {
    products: RemoteProductList,
}

#[derive(Debug, Deserialize)]
struct RemoteProductList {
    data: Vec<RemoteProduct>,
}

#[derive(Debug, Deserialize)]
struct RemoteProduct {
    id: u64,
    name: String,
    #[serde(default)]
    description: String,
    price_currency_code: String,
    product_variants: RemoteVariantList,
}

#[derive(Debug, Deserialize)]
struct RemoteVariantList {
    data: Vec<RemoteVariant>,
}

#[derive(Debug, Deserialize)]
struct RemoteVariant {
    id: u64,
    /// Price in minor units (cents).
    price: u64,
}

impl RemoteProduct {
    /// Maps the provider payload into our catalog shape. Products without a
    /// variant cannot be redeemed and are dropped.
    fn into_product(self) -> Option<Product> {
        let variant = self.product_variants.data.first()?;
        Some(Product {
            id: format!("{VOUCHER_ID_PREFIX}{}", self.id),
            name: self.name,
            description: self.description,
            currency: self.price_currency_code,
            price: Decimal::new(variant.price as i64, 2),
            variant_id: variant.id,
            variant_price: variant.price,
        })
    }
}

impl VoucherApi {
    pub fn new(config: VoucherApiConfig, cache: KvCache) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(VoucherApi {
            config,
            http,
            cache,
        })
    }

    fn campaign_url(&self, suffix: &str) -> String {
        format!(
            "{}api/v2/ongoing-campaign/{}{}",
            self.config.base_url, self.config.campaign_id, suffix
        )
    }

    /// Logs in and returns a bearer token, cached for an hour.
    async fn auth_token(&self) -> Result<String, FulfillmentError> {
        let token = self
            .cache
            .get_or_compute(AUTH_TOKEN_CACHE_KEY, AUTH_TOKEN_CACHE_TTL, || async {
                let response = self
                    .http
                    .post(format!("{}api/v2/auth/login", self.config.base_url))
                    .json(&serde_json::json!({
                        "email": self.config.email,
                        "password": self.config.password,
                    }))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(FulfillmentError::Rejected {
                        status: response.status(),
                    });
                }
                let token: TokenResponse = response.json().await?;
                Ok(token.access_token)
            })
            .await?;
        Ok(token)
    }
}

#[async_trait]
impl FulfillmentProvider for VoucherApi {
    #[instrument(skip_all, err)]
    async fn products(&self) -> Result<Vec<Product>, FulfillmentError> {
        let cache_key = format!("voucher:products:{}", self.config.campaign_id);
        let products = self
            .cache
            .get_or_compute(&cache_key, PRODUCTS_CACHE_TTL, || async {
                let token = self.auth_token().await?;
                let response = self
                    .http
                    .get(self.campaign_url("?include=products"))
                    .bearer_auth(token)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    tracing::error!(status = %response.status(), "Failed to fetch products");
                    return Err(FulfillmentError::Rejected {
                        status: response.status(),
                    });
                }
                let campaign: RemoteCampaign = response.json().await?;
                Ok(campaign
                    .products
                    .data
                    .into_iter()
                    .filter_map(RemoteProduct::into_product)
                    .collect::<Vec<_>>())
            })
            .await?;
        Ok(products)
    }

    #[instrument(skip_all, err, fields(product_id = %product.id, variant_id = product.variant_id))]
    async fn fulfill(&self, product: &Product, quote: &Quote) -> Result<(), FulfillmentError> {
        if !product.id.starts_with(VOUCHER_ID_PREFIX) {
            return Err(FulfillmentError::UnknownProvider);
        }
        let msisdn = quote
            .metadata
            .get("phoneNumber")
            .ok_or(FulfillmentError::MissingMetadata("phoneNumber"))?;

        let token = self.auth_token().await?;
        let response = self
            .http
            .post(self.campaign_url("/create-voucher"))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "customer_msisdn": msisdn,
                "product_variant_id": product.variant_id,
                "send": true,
                "value": product.variant_price,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "Failed to create voucher");
            return Err(FulfillmentError::Rejected {
                status: response.status(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Stub provider with a fixed catalog and a switchable failure mode.
    #[derive(Default)]
    pub(crate) struct StubProvider {
        pub catalog: Vec<Product>,
        pub fail: AtomicBool,
        pub fulfilled: AtomicU32,
    }

    impl StubProvider {
        pub(crate) fn with_catalog(catalog: Vec<Product>) -> Self {
            StubProvider {
                catalog,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl FulfillmentProvider for StubProvider {
        async fn products(&self) -> Result<Vec<Product>, FulfillmentError> {
            Ok(self.catalog.clone())
        }

        async fn fulfill(&self, _: &Product, _: &Quote) -> Result<(), FulfillmentError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(FulfillmentError::Rejected {
                    status: StatusCode::BAD_GATEWAY,
                });
            }
            self.fulfilled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn product(id: &str, price_minor: u64) -> Product {
        Product {
            id: id.to_string(),
            name: "Airtime voucher".to_string(),
            description: "Prepaid airtime".to_string(),
            currency: "ZAR".to_string(),
            price: Decimal::new(price_minor as i64, 2),
            variant_id: 9,
            variant_price: price_minor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{StubProvider, product};
    use super::*;
    use crate::network::Network;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{QuoteId, QuoteStatus, TokenAmount, TokenQuote};
    use std::collections::HashMap;

    fn quote_for(product_id: &str) -> Quote {
        Quote {
            id: QuoteId::generate(),
            token_quote: TokenQuote {
                symbol: "ZARP".to_string(),
                address: "0xb755506531786C8aC63B756BaB1ac387bACB0C04"
                    .parse()
                    .unwrap(),
                network: Network::Base,
                decimals: 18,
                amount: TokenAmount::from(1u64),
            },
            payment_destination: "0x742d35Cc6634C0532925a3b844Bc454e4438f44e"
                .parse()
                .unwrap(),
            expires_at: UnixTimestamp::now() + Duration::from_secs(900),
            metadata: HashMap::from([("phoneNumber".to_string(), "+27820000000".to_string())]),
            product_id: product_id.to_string(),
            quantity: 1,
            status: QuoteStatus::Pending,
        }
    }

    #[tokio::test]
    async fn fulfill_order_resolves_the_quoted_product() {
        let provider = StubProvider::with_catalog(vec![product("voucher:17", 5000)]);
        fulfill_order(&provider, &quote_for("voucher:17"))
            .await
            .unwrap();
        assert_eq!(
            provider
                .fulfilled
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn fulfill_order_rejects_unknown_product() {
        let provider = StubProvider::with_catalog(vec![product("voucher:17", 5000)]);
        let err = fulfill_order(&provider, &quote_for("voucher:99"))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::ProductNotFound));
    }

    #[test]
    fn remote_payload_maps_into_catalog_products() {
        let payload = serde_json::json!({
            "products": { "data": [
                {
                    "id": 17,
                    "name": "Airtime",
                    "description": "Prepaid airtime",
                    "price_currency_code": "ZAR",
                    "product_variants": { "data": [ { "id": 9, "price": 5000 } ] }
                },
                {
                    "id": 18,
                    "name": "No variants",
                    "price_currency_code": "ZAR",
                    "product_variants": { "data": [] }
                }
            ]}
        });
        let campaign: RemoteCampaign = serde_json::from_value(payload).unwrap();
        let products: Vec<Product> = campaign
            .products
            .data
            .into_iter()
            .filter_map(RemoteProduct::into_product)
            .collect();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, "voucher:17");
        assert_eq!(products[0].price, Decimal::new(5000, 2));
        assert_eq!(products[0].variant_id, 9);
    }
}
