//! Quote-locked on-chain checkout.
//!
//! A merchant sells catalog items paid for with an ERC-20 transfer, without
//! running its own ledger. The flow:
//!
//! 1. The client requests a quote for a product; the service freezes a token
//!    amount and an expiry (`POST /quote`).
//! 2. The client pays on-chain and submits a payment proof — the transaction
//!    hash plus an EIP-712 signature over it (`POST /fulfill`).
//! 3. The service verifies the proof against the chain (signature, receipt,
//!    transfer-log match), consumes the transaction hash exactly once, and
//!    releases a fulfillment voucher through the external provider.
//!
//! # Modules
//!
//! - [`types`] — quotes, payment proofs, and typed on-chain primitives.
//! - [`kv`] — the key-value store abstraction with the atomic primitives the
//!   settlement flow relies on.
//! - [`quotes`] — quote persistence and the status state machine.
//! - [`spend`] — the idempotent spent-hash ledger.
//! - [`chain`] — per-network JSON-RPC readers and receipt retrieval.
//! - [`verifier`] — payment-proof verification against a quote.
//! - [`trust`] — the trusted-identity signature bypass.
//! - [`fulfillment`] — the external catalog / voucher provider.
//! - [`settlement`] — the orchestrated settlement state machine.
//! - [`handlers`] — the axum HTTP surface.
//! - [`config`] — environment-driven configuration.

pub mod cache;
pub mod chain;
pub mod config;
pub mod fulfillment;
pub mod handlers;
pub mod kv;
pub mod network;
pub mod quotes;
pub mod settlement;
pub mod sig_down;
pub mod spend;
pub mod telemetry;
pub mod timestamp;
pub mod trust;
pub mod types;
pub mod verifier;
