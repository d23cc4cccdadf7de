//! payquote HTTP entrypoint.
//!
//! Launches the axum server exposing the checkout flow:
//! - `POST /quote` — create a price-locked quote for a catalog product
//! - `GET /quote` — read a quote
//! - `POST /fulfill` — verify a payment proof and release fulfillment
//! - `GET /products` — list the provider catalog
//!
//! Startup wires the shared dependencies explicitly: the key-value store,
//! chain readers per configured network, the fulfillment provider client,
//! and the settlement orchestrator. `.env` values are loaded first; see
//! `config` for the variables.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use payquote::cache::KvCache;
use payquote::chain::ChainRegistry;
use payquote::config::Config;
use payquote::fulfillment::VoucherApi;
use payquote::handlers::{self, AppState};
use payquote::kv::{KeyValueStore, MemoryKv};
use payquote::quotes::QuoteStore;
use payquote::settlement::SettlementOrchestrator;
use payquote::sig_down::SigDown;
use payquote::spend::SpendLedger;
use payquote::telemetry::Telemetry;
use payquote::trust::TrustVerifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::register();

    let config = Config::from_env()?;

    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
    let chains = ChainRegistry::new(&config.rpc_endpoints, config.rpc_timeout);
    let fulfillment = Arc::new(VoucherApi::new(
        config.voucher.clone(),
        KvCache::new(kv.clone()),
    )?);
    let quotes = QuoteStore::new(
        kv.clone(),
        config.payment_token.clone(),
        config.payment_destination,
        config.quote_ttl,
        config.quote_retention,
    );
    let orchestrator = SettlementOrchestrator::new(
        quotes.clone(),
        SpendLedger::new(kv),
        chains,
        fulfillment.clone(),
        TrustVerifier::from_secret(config.trusted_client_secret.clone()),
    );

    let state = Arc::new(AppState {
        quotes,
        orchestrator,
        fulfillment,
    });

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
