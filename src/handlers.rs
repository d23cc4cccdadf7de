//! HTTP endpoints for the checkout flow.
//!
//! - `POST /quote` — price a product and lock a quote
//! - `GET /quote?id=` — read a quote back
//! - `POST /fulfill` — submit a payment proof and settle
//! - `GET /products` — list the provider catalog
//!
//! Handlers stay thin: request decoding, invoking the stores/orchestrator,
//! and mapping typed errors onto the wire. Every failure body is
//! `{"error": <short reason>}`; no internal detail leaks.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::{ChainReader, ReaderMap};
use crate::fulfillment::FulfillmentProvider;
use crate::quotes::QuoteStore;
use crate::settlement::{SettlementError, SettlementOrchestrator};
use crate::types::{PaymentProof, QuoteId, TokenAmount};
use crate::verifier::signature_parameters;

/// Header carrying the signed trusted-identity token.
pub const TRUSTED_USER_HEADER: &str = "x-trusted-user-data";

/// Shared application state behind every handler.
pub struct AppState<M, F> {
    pub quotes: QuoteStore,
    pub orchestrator: SettlementOrchestrator<M, F>,
    pub fulfillment: Arc<F>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuoteRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct GetQuoteParams {
    id: Option<String>,
}

pub fn routes<M, F>() -> Router<Arc<AppState<M, F>>>
where
    M: ReaderMap + Send + Sync + 'static,
    M::Reader: ChainReader,
    F: FulfillmentProvider + 'static,
{
    Router::new()
        .route("/quote", post(post_quote::<M, F>).get(get_quote::<M, F>))
        .route("/fulfill", post(post_fulfill::<M, F>))
        .route("/products", get(get_products::<M, F>))
}

/// `POST /quote`: prices `productId` × `quantity` in the payment token and
/// persists a `PENDING` quote, returning it together with the typed-data
/// signing parameters the payer's wallet needs.
#[instrument(skip_all)]
async fn post_quote<M, F>(
    State(state): State<Arc<AppState<M, F>>>,
    body: Result<Json<CreateQuoteRequest>, JsonRejection>,
) -> Response
where
    M: ReaderMap + Send + Sync + 'static,
    M::Reader: ChainReader,
    F: FulfillmentProvider + 'static,
{
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let products = match state.fulfillment.products().await {
        Ok(products) => products,
        Err(error) => {
            tracing::error!(error = %error, "Failed to load product catalog");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
        }
    };
    let Some(product) = products
        .iter()
        .find(|product| product.id == body.product_id)
    else {
        tracing::error!("Product not found: {}", body.product_id);
        return error_response(StatusCode::NOT_FOUND, "Product not found");
    };

    let total = product.price * Decimal::from(body.quantity);
    let amount = match TokenAmount::from_decimal(total, state.quotes.payment_token().decimals) {
        Ok(amount) => amount,
        Err(error) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
        }
    };

    match state
        .quotes
        .create(amount, product.id.clone(), body.quantity, body.metadata)
        .await
    {
        Ok(quote) => {
            let signature_parameters = signature_parameters(&quote.id);
            (
                StatusCode::CREATED,
                Json(json!({
                    "quote": quote,
                    "signatureParameters": signature_parameters,
                    "product": product,
                })),
            )
                .into_response()
        }
        Err(error) => {
            tracing::error!(error = %error, "Failed to persist quote");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// `GET /quote?id=<id>`: returns the stored quote, or `{"quote": null}` when
/// unknown. A missing `id` is the caller's mistake and gets a 400.
#[instrument(skip_all)]
async fn get_quote<M, F>(
    State(state): State<Arc<AppState<M, F>>>,
    Query(params): Query<GetQuoteParams>,
) -> Response
where
    M: ReaderMap + Send + Sync + 'static,
    M::Reader: ChainReader,
    F: FulfillmentProvider + 'static,
{
    let Some(id) = params.id else {
        return error_response(StatusCode::BAD_REQUEST, "Quote ID is required");
    };
    // An unparseable id cannot name a stored quote; same as unknown.
    let quote = match QuoteId::from_str(&id) {
        Ok(id) => match state.quotes.get(&id).await {
            Ok(quote) => quote,
            Err(error) => {
                tracing::error!(error = %error, "Failed to load quote");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
            }
        },
        Err(_) => None,
    };
    Json(json!({ "quote": quote })).into_response()
}

/// `POST /fulfill`: runs one settlement attempt for the submitted proof.
///
/// Success returns the completed quote. A failure after payment acceptance
/// returns the quote in its terminal `FULFILLMENT_ERROR` state alongside the
/// error, so the client can see the money was consumed.
#[instrument(skip_all)]
async fn post_fulfill<M, F>(
    State(state): State<Arc<AppState<M, F>>>,
    headers: HeaderMap,
    body: Result<Json<PaymentProof>, JsonRejection>,
) -> Response
where
    M: ReaderMap + Send + Sync + 'static,
    M::Reader: ChainReader,
    F: FulfillmentProvider + 'static,
{
    let Json(proof) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let trust_token = headers
        .get(TRUSTED_USER_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.orchestrator.settle(&proof, trust_token).await {
        Ok(quote) => Json(json!({ "quote": quote })).into_response(),
        Err(SettlementError::Fulfillment { quote, source }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": source.to_string(), "quote": quote })),
        )
            .into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Settlement rejected");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// `GET /products`: the provider catalog, served from cache when warm.
#[instrument(skip_all)]
async fn get_products<M, F>(State(state): State<Arc<AppState<M, F>>>) -> Response
where
    M: ReaderMap + Send + Sync + 'static,
    M::Reader: ChainReader,
    F: FulfillmentProvider + 'static,
{
    match state.fulfillment.products().await {
        Ok(products) => Json(json!({ "products": products })).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "Failed to load product catalog");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}
