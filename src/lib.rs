//! # Assets Controllers
//!
//! Wallet-side controllers that keep token market data and token lists cached
//! per EVM chain, refreshed by polling and by changes to the tracked tokens.
//!
//! ## Overview
//!
//! - **Token rates**: market data for every tracked token, quoted in each
//!   chain's native currency (with a conversion fallback for currencies the
//!   price API cannot quote).
//! - **Token list**: the remote token catalogue per chain, refetched once it
//!   is older than a day.
//! - **Tokens**: the added, detected and ignored tokens per chain and account.
//!
//! ## Architecture
//!
//! Both caching controllers are built from the same pieces: a per-chain cache
//! store, a poll scheduler that shares one timer per polled chain set, an
//! in-flight layer that coalesces identical refreshes, a batched fetcher for
//! the price API and a pure change-detection gate over token snapshots.
//! Network, account and token state are read through injected providers and
//! change notifications arrive as [`events::ControllerEvent`]s.

// Core Types
/// Common types and data structures
pub mod types;
/// Errors returned by the public API
pub mod errors;
/// Configuration loading
pub mod settings;

// Caching & Scheduling
/// Per-chain cache store with freshness checks
pub mod chain_cache;
/// Batched, bounded-concurrency remote fetches
pub mod batch_fetcher;
/// Fixed-interval poll scheduler keyed by input
pub mod polling;
/// Coalescing of identical concurrent work
pub mod in_flight;
/// Token snapshot comparison
pub mod change_detection;

// Collaborators
/// Controller event feed
pub mod events;
/// Network, account and token providers
pub mod providers;

// Remote Services
/// Rate-limited JSON HTTP client
pub mod http;
/// Token spot price API
pub mod price_api;
/// Currency conversion rate API
pub mod currency_rate;
/// Token list API
pub mod token_list_api;

// Controllers
/// Token market data per chain
pub mod token_rates_controller;
/// Token list cache per chain
pub mod token_list_controller;
/// Added, detected and ignored tokens
pub mod tokens_controller;

// Observability
/// Metrics collection (no-op unless the `observability` feature is enabled)
pub mod metrics;

pub use errors::AssetsError;
pub use token_list_controller::{TokenListController, TokenListPollingInput, TokenListState};
pub use token_rates_controller::{TokenRatesController, TokenRatesPollingInput, TokenRatesState};
pub use tokens_controller::TokensController;
