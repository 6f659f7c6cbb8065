//! # Assets Poller
//!
//! Keeps token rates and token lists fresh for the chains in `Config.toml`
//! and logs every state change.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin assets_poller -- --account 0x1111111111111111111111111111111111111111
//! cargo run --bin assets_poller -- --config Config.toml --chain 0x1
//! ```
//!
//! Press Ctrl+C to stop gracefully.

use anyhow::{Context, Result};
use assets_controllers::{
    currency_rate::HttpCurrencyRateService,
    events::event_channel,
    price_api::HttpTokenPricesService,
    providers::{NetworkState, StaticAccountsProvider, StaticNetworkProvider},
    settings::Settings,
    token_list_api::HttpTokenListService,
    token_list_controller::TokenListConfig,
    token_rates_controller::TokenRatesConfig,
    types::{ChainId, Token},
    TokenListController, TokenListPollingInput, TokenRatesController, TokenRatesPollingInput,
    TokensController,
};
use clap::Parser;
use ethers::types::Address;
use log::{info, warn};
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "assets_poller", about = "Poll token rates and token lists for configured chains")]
struct Args {
    /// Configuration file (missing file means defaults)
    #[arg(long, default_value = "Config.toml")]
    config: String,

    /// Only poll these chains (hex or decimal); defaults to every configured chain
    #[arg(long = "chain")]
    chains: Vec<String>,

    /// Account the configured tokens are tracked for
    #[arg(long, default_value = "0x0000000000000000000000000000000000000001")]
    account: String,
}

#[cfg(feature = "observability")]
fn init_observability() -> Result<()> {
    tracing_subscriber::fmt().json().init();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .context("failed to install Prometheus exporter")?;
    assets_controllers::metrics::describe_metrics();
    Ok(())
}

#[cfg(not(feature = "observability"))]
fn init_observability() -> Result<()> {
    env_logger::init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::from_file(&args.config)?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &settings.log.level);
    }
    init_observability()?;

    println!("🚀 Starting Assets Poller");
    println!("═══════════════════════════════════════════════════════════════════\n");

    let account: Address = args
        .account
        .parse()
        .with_context(|| format!("invalid account '{}'", args.account))?;
    let mut chain_ids: Vec<ChainId> = args
        .chains
        .iter()
        .map(|raw| raw.parse::<ChainId>())
        .collect::<Result<_, _>>()?;
    if chain_ids.is_empty() {
        chain_ids = settings.chains.iter().map(|c| c.chain_id).collect();
    }
    if chain_ids.is_empty() {
        anyhow::bail!("no chains configured; add [[chains]] to {}", args.config);
    }

    // 1. Providers
    let networks = settings.network_configurations();
    let selected = settings
        .chains
        .first()
        .map(|c| c.network_client_id.clone())
        .unwrap_or_default();
    let network = Arc::new(StaticNetworkProvider::new(NetworkState::new(selected, networks)));
    let accounts = Arc::new(StaticAccountsProvider::new(Some(account)));
    let (events_tx, _) = event_channel();
    let tokens = Arc::new(TokensController::new(accounts.clone(), Some(events_tx.clone())));
    println!("✅ Providers ready ({} networks)", settings.chains.len());

    // 2. Remote services
    let prices = Arc::new(HttpTokenPricesService::new(&settings.price_api)?);
    let rates = Arc::new(HttpCurrencyRateService::new(&settings.currency_api)?);
    let token_list_api = Arc::new(HttpTokenListService::new(&settings.token_api)?);
    println!("✅ API clients created");

    // 3. Controllers
    let token_rates = TokenRatesController::new(
        TokenRatesConfig::from(&settings.token_rates),
        prices,
        rates,
        network.clone(),
        tokens.clone(),
    );
    let token_list = TokenListController::new(
        TokenListConfig::from(&settings.token_list),
        token_list_api,
        network.clone(),
    );
    let rates_listener = token_rates.listen(events_tx.subscribe());
    let list_listener = token_list.listen(events_tx.subscribe());

    let mut rates_state = token_rates.subscribe();
    let state_logger = tokio::spawn(async move {
        while let Ok(state) = rates_state.recv().await {
            for (chain_id, market_data) in &state.market_data {
                let priced = market_data.values().filter(|d| d.is_some()).count();
                info!("📈 Rates for {}: {} tokens, {} priced", chain_id, market_data.len(), priced);
            }
        }
    });

    // 4. Seed the configured tokens
    for chain in settings.chains.iter().filter(|c| chain_ids.contains(&c.chain_id)) {
        let seeded: Vec<Token> = chain
            .tokens
            .iter()
            .map(|address| Token::new(address.clone(), "", 18))
            .collect();
        if let Err(e) = tokens.add_tokens(chain.chain_id, seeded).await {
            warn!("Skipping tokens for chain {}: {}", chain.chain_id, e);
        }
    }

    // 5. Poll
    let rates_token = token_rates.start_polling(TokenRatesPollingInput::new(chain_ids.clone()))?;
    let list_token = token_list.start_polling(TokenListPollingInput::new(chain_ids.clone()))?;
    println!("✅ Polling {} chains every {:?} (rates) / {:?} (token list)", chain_ids.len(), token_rates.interval(), TokenListConfig::from(&settings.token_list).interval);
    println!("\nPress Ctrl+C to stop\n");

    signal::ctrl_c().await?;
    println!("\n🛑 Shutdown signal received, stopping tasks...");

    token_rates.stop_polling_by_polling_token(rates_token);
    token_list.stop_polling_by_polling_token(list_token);
    rates_listener.abort();
    list_listener.abort();
    state_logger.abort();

    let state = token_list.state();
    for (chain_id, entry) in &state.tokens_chains_cache {
        println!("   token list {}: {} tokens", chain_id, entry.data.len());
    }
    println!("✅ Stopped");
    Ok(())
}
