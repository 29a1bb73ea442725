//! Client-side orchestrator for AbiPago payments.
//!
//! A payer scans an invoice referencing a human-readable merchant identity;
//! this crate resolves the merchant's payment preferences from the naming
//! system, classifies the payment into one of three execution modes, obtains
//! a cross-chain route from the routing oracle when needed, and drives the
//! multi-step execution state machine until the settlement event is observed
//! on the destination chain.
//!
//! # Modules
//!
//! - [`config`] — environment-driven configuration (RPC endpoints, routing
//!   oracle origin, router deployments, signer credentials).
//! - [`provider_cache`] — per-chain JSON-RPC providers.
//! - [`profile`] — merchant payment profiles from the naming system, plus
//!   forward/reverse/avatar lookups.
//! - [`routing`] — the routing-oracle REST client: quotes, contract-call
//!   quotes, and bridge status.
//! - [`plan`] — payment intent resolution and execution-mode classification.
//! - [`driver`] — the per-payment state machine: sign, submit, await
//!   receipts, poll bridge status, all individually cancellable.
//! - [`history`] — event-sourced payment history reconstructed from
//!   settlement logs.
//! - [`signer`] — the opaque wallet seam and a local private-key signer.
//!
//! The settlement semantics themselves live in the `abipago-settlement`
//! crate; the shared data model (invoice, ABI, registries, URI codec) lives
//! in `abipago-types`.

pub mod config;
pub mod driver;
pub mod history;
pub mod plan;
pub mod profile;
pub mod provider_cache;
pub mod routing;
pub mod signer;
