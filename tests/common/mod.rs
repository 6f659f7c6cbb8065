//! Hand-written collaborators shared by the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use assets_controllers::currency_rate::CurrencyRateService;
use assets_controllers::price_api::TokenPricesService;
use assets_controllers::providers::{NetworkState, TokensProvider};
use assets_controllers::token_list_api::TokenListService;
use assets_controllers::types::{
    ChainId, MarketDataDetails, NetworkConfiguration, Token, TokenListToken, TokensSnapshot,
};
use async_trait::async_trait;
use ethers::types::Address;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
pub const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";
pub const LINK: &str = "0x514910771AF9Ca656af840dff83E8264EcF986CA";

pub fn account() -> Address {
    Address::repeat_byte(0x42)
}

pub fn addr(raw: &str) -> Address {
    raw.parse().unwrap()
}

/// Distinct, valid address for index `i`.
pub fn nth_address(i: u64) -> Address {
    Address::from_low_u64_be(i + 1)
}

pub fn network_config(chain_id: ChainId, currency: &str, client_id: &str) -> NetworkConfiguration {
    NetworkConfiguration {
        chain_id,
        native_currency: currency.to_string(),
        name: client_id.to_string(),
        network_client_ids: vec![client_id.to_string()],
    }
}

/// Mainnet (ETH) and Polygon (POL), mainnet selected.
pub fn default_network() -> NetworkState {
    NetworkState::new(
        "mainnet",
        vec![
            network_config(ChainId::MAINNET, "ETH", "mainnet"),
            network_config(ChainId::POLYGON, "POL", "polygon"),
        ],
    )
}

/// Market data with every monetary field derived from `price`.
pub fn market_data(token_address: Address, currency: &str, price: f64) -> MarketDataDetails {
    MarketDataDetails {
        token_address,
        currency: currency.to_string(),
        price,
        price_change_1d: price * 0.1,
        price_percent_change_1d: 5.0,
        market_cap: price * 1000.0,
        total_volume: price * 100.0,
        high_1d: price * 1.1,
        low_1d: price * 0.9,
        all_time_high: price * 2.0,
        all_time_low: price * 0.5,
        diluted_market_cap: price * 1200.0,
        circulating_supply: 1_000_000.0,
    }
}

pub fn snapshot_with(chain_id: ChainId, tokens: &[&str], detected: &[&str]) -> TokensSnapshot {
    let mut snapshot = TokensSnapshot::default();
    snapshot.all_tokens.entry(chain_id).or_default().insert(
        account(),
        tokens.iter().map(|a| Token::new(*a, "TKN", 18)).collect(),
    );
    snapshot.all_detected_tokens.entry(chain_id).or_default().insert(
        account(),
        detected.iter().map(|a| Token::new(*a, "TKN", 18)).collect(),
    );
    snapshot
}

/// Lets a test hold a remote call open until it says so.
#[derive(Default)]
pub struct Gate {
    enabled: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl Gate {
    pub fn close(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Releases the call held at the gate; later calls pass straight through.
    pub fn open(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    async fn pass(&self) {
        if self.enabled.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceCall {
    pub chain_id: ChainId,
    pub addresses: Vec<Address>,
    pub currency: String,
}

/// Price service answering from a fixed table of prices.
pub struct MockPrices {
    pub calls: Mutex<Vec<PriceCall>>,
    prices: Mutex<HashMap<Address, f64>>,
    supported_chains: Mutex<HashSet<ChainId>>,
    supported_currencies: HashSet<String>,
    fail: AtomicBool,
    pub gate: Gate,
}

impl MockPrices {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            prices: Mutex::new(HashMap::new()),
            supported_chains: Mutex::new(
                [ChainId::MAINNET, ChainId::POLYGON, ChainId::BSC].into_iter().collect(),
            ),
            supported_currencies: ["eth", "usd"].iter().map(|c| c.to_string()).collect(),
            fail: AtomicBool::new(false),
            gate: Gate::default(),
        }
    }

    pub fn set_price(&self, address: Address, price: f64) {
        self.prices.lock().unwrap().insert(address, price);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn unsupport_chain(&self, chain_id: ChainId) {
        self.supported_chains.lock().unwrap().remove(&chain_id);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, chain_id: ChainId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.chain_id == chain_id)
            .count()
    }
}

#[async_trait]
impl TokenPricesService for MockPrices {
    async fn fetch_token_prices(
        &self,
        chain_id: ChainId,
        token_addresses: &[Address],
        currency: &str,
    ) -> Result<HashMap<Address, MarketDataDetails>> {
        self.calls.lock().unwrap().push(PriceCall {
            chain_id,
            addresses: token_addresses.to_vec(),
            currency: currency.to_string(),
        });
        self.gate.pass().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("price api unavailable"));
        }
        let prices = self.prices.lock().unwrap();
        Ok(token_addresses
            .iter()
            .filter_map(|a| prices.get(a).map(|p| (*a, market_data(*a, currency, *p))))
            .collect())
    }

    fn validate_chain_id_supported(&self, chain_id: ChainId) -> bool {
        self.supported_chains.lock().unwrap().contains(&chain_id)
    }

    fn validate_currency_supported(&self, currency: &str) -> bool {
        self.supported_currencies.contains(&currency.to_lowercase())
    }
}

/// Conversion rate service returning one configurable answer.
pub struct MockRates {
    pub calls: Mutex<Vec<(String, String)>>,
    answer: Mutex<std::result::Result<Option<f64>, String>>,
}

impl MockRates {
    pub fn new(rate: f64) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            answer: Mutex::new(Ok(Some(rate))),
        }
    }

    pub fn set_answer(&self, answer: std::result::Result<Option<f64>, String>) {
        *self.answer.lock().unwrap() = answer;
    }
}

#[async_trait]
impl CurrencyRateService for MockRates {
    async fn fetch_conversion_rate(&self, from: &str, to: &str) -> Result<Option<f64>> {
        self.calls
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string()));
        self.answer.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

/// Token list service serving fixed lists per chain.
pub struct MockTokenList {
    pub calls: Mutex<Vec<ChainId>>,
    lists: Mutex<HashMap<ChainId, Vec<TokenListToken>>>,
    supported: HashSet<ChainId>,
    fail: AtomicBool,
    pub gate: Gate,
}

impl MockTokenList {
    pub fn new() -> Self {
        let mut lists = HashMap::new();
        lists.insert(
            ChainId::MAINNET,
            vec![list_token(USDC, "USDC", 6), list_token(DAI, "DAI", 18)],
        );
        lists.insert(ChainId::POLYGON, vec![list_token(LINK, "LINK", 18)]);
        Self {
            calls: Mutex::new(Vec::new()),
            lists: Mutex::new(lists),
            supported: [ChainId::MAINNET, ChainId::POLYGON, ChainId::BSC]
                .into_iter()
                .collect(),
            fail: AtomicBool::new(false),
            gate: Gate::default(),
        }
    }

    pub fn set_list(&self, chain_id: ChainId, tokens: Vec<TokenListToken>) {
        self.lists.lock().unwrap().insert(chain_id, tokens);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls_for(&self, chain_id: ChainId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == chain_id)
            .count()
    }
}

#[async_trait]
impl TokenListService for MockTokenList {
    fn is_chain_supported(&self, chain_id: ChainId) -> bool {
        self.supported.contains(&chain_id)
    }

    async fn fetch_token_list(&self, chain_id: ChainId) -> Result<Vec<TokenListToken>> {
        self.calls.lock().unwrap().push(chain_id);
        self.gate.pass().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("token api unavailable"));
        }
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(&chain_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn list_token(address: &str, symbol: &str, decimals: u8) -> TokenListToken {
    TokenListToken {
        address: address.to_lowercase(),
        symbol: symbol.to_string(),
        decimals,
        name: symbol.to_string(),
        icon_url: None,
        aggregators: vec!["metamask".to_string()],
        occurrences: Some(5),
    }
}

/// Tokens provider whose snapshot the test swaps directly.
#[derive(Default)]
pub struct StaticTokens {
    snapshot: ArcSwap<TokensSnapshot>,
}

impl StaticTokens {
    pub fn new(snapshot: TokensSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn set(&self, snapshot: TokensSnapshot) -> Arc<TokensSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshot.store(Arc::clone(&snapshot));
        snapshot
    }
}

impl TokensProvider for StaticTokens {
    fn tokens_snapshot(&self) -> Arc<TokensSnapshot> {
        self.snapshot.load_full()
    }
}

/// Polls `condition` until it holds, failing the test after a while.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
