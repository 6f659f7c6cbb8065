//! Common types shared by the controllers.

pub mod chain;
pub mod market_data;
pub mod tokens;

pub use chain::{ChainId, ChainTarget, NetworkConfiguration};
pub use market_data::MarketDataDetails;
pub use tokens::{Token, TokenListToken, TokensByChain, TokensSnapshot};

/// Milliseconds since the unix epoch.
pub type UnixMillis = i64;

pub fn now_millis() -> UnixMillis {
    chrono::Utc::now().timestamp_millis()
}
