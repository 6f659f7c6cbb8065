//! Token rates: per-chain market data for every tracked token.
//!
//! Rates are refreshed by explicit update calls, by the legacy single-target
//! `start`/`stop` loop, by multi-chain polling subscriptions, and by token-set
//! changes while any polling is active. Every refresh goes through the
//! in-flight layer, so identical concurrent requests share one fetch.

use async_trait::async_trait;
use ethers::types::Address;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::batch_fetcher::{fetch_batched, TOKEN_PRICES_BATCH_SIZE};
use crate::chain_cache::{ChainCache, ChainCacheEntry};
use crate::change_detection::{chain_token_addresses, changed_chains_for_any_account};
use crate::currency_rate::CurrencyRateService;
use crate::errors::AssetsError;
use crate::events::{drive_events, ControllerEvent, EventReceiver, EVENT_CHANNEL_CAPACITY};
use crate::in_flight::InFlight;
use crate::polling::{PollingInput, PollingScheduler, PollingTarget, PollingToken};
use crate::price_api::TokenPricesService;
use crate::providers::{NetworkProvider, NetworkState, TokensProvider};
use crate::settings::TokenRatesSettings;
use crate::types::{ChainId, ChainTarget, MarketDataDetails, TokensSnapshot};

/// Currency prices are fetched in when the native currency is not quotable.
pub const FALLBACK_CURRENCY: &str = "ETH";

pub type MarketDataByToken = HashMap<Address, Option<MarketDataDetails>>;

/// Published after every cache mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRatesState {
    /// `None` marks a token on a chain the price API does not support.
    pub market_data: BTreeMap<ChainId, MarketDataByToken>,
}

impl TokenRatesState {
    pub fn market_data_for(&self, chain_id: ChainId) -> Option<&MarketDataByToken> {
        self.market_data.get(&chain_id)
    }
}

#[derive(Debug, Clone)]
pub struct TokenRatesConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub fetch_concurrency: usize,
    pub disabled: bool,
}

impl Default for TokenRatesConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            batch_size: TOKEN_PRICES_BATCH_SIZE,
            fetch_concurrency: 4,
            disabled: false,
        }
    }
}

impl From<&TokenRatesSettings> for TokenRatesConfig {
    fn from(settings: &TokenRatesSettings) -> Self {
        Self {
            interval: settings.interval(),
            batch_size: settings.batch_size,
            fetch_concurrency: settings.fetch_concurrency,
            disabled: settings.disabled,
        }
    }
}

/// Chains one polling subscription keeps fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRatesPollingInput {
    pub chain_ids: Vec<ChainId>,
}

impl TokenRatesPollingInput {
    pub fn new(chain_ids: impl IntoIterator<Item = ChainId>) -> Self {
        Self {
            chain_ids: chain_ids.into_iter().collect(),
        }
    }
}

impl PollingInput for TokenRatesPollingInput {
    fn polling_key(&self) -> String {
        let chains: BTreeSet<ChainId> = self.chain_ids.iter().copied().collect();
        chains
            .iter()
            .map(ChainId::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

struct RatesCore {
    prices: Arc<dyn TokenPricesService>,
    rates: Arc<dyn CurrencyRateService>,
    network: Arc<dyn NetworkProvider>,
    tokens: Arc<dyn TokensProvider>,
    cache: ChainCache<Address, Option<MarketDataDetails>>,
    in_flight: InFlight<Vec<ChainTarget>>,
    batch_size: usize,
    fetch_concurrency: usize,
    disabled: AtomicBool,
    /// Last token snapshot seen, compared against the next one.
    known_tokens: Mutex<Arc<TokensSnapshot>>,
    /// Chains configured at the last network state seen.
    known_chains: Mutex<BTreeSet<ChainId>>,
    state_tx: broadcast::Sender<Arc<TokenRatesState>>,
}

impl RatesCore {
    fn state(&self) -> TokenRatesState {
        TokenRatesState {
            market_data: self
                .cache
                .snapshot()
                .into_iter()
                .map(|(chain_id, entry)| (chain_id, entry.data))
                .collect(),
        }
    }

    fn publish_state(&self) {
        // No subscribers is fine.
        let _ = self.state_tx.send(Arc::new(self.state()));
    }

    /// Targets for `chain_ids` using each chain's configured native currency.
    fn targets_for(&self, chain_ids: &[ChainId]) -> Vec<ChainTarget> {
        let network = self.network.network_state();
        chain_ids
            .iter()
            .filter_map(|chain_id| match network.native_currency(*chain_id) {
                Some(currency) => Some(ChainTarget::new(*chain_id, currency)),
                None => {
                    warn!("No network configuration for chain {}, skipping rates", chain_id);
                    None
                }
            })
            .collect()
    }

    /// Refreshes `targets` as one unit of work, joining an identical update
    /// already in flight. Failures are logged, never returned.
    async fn update(self: &Arc<Self>, targets: &[ChainTarget]) {
        if self.disabled.load(Ordering::SeqCst) {
            debug!("Token rates disabled, ignoring update for {} targets", targets.len());
            return;
        }
        let key: Vec<ChainTarget> = targets
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if key.is_empty() {
            return;
        }

        let core = Arc::clone(self);
        let work_targets = key.clone();
        let outcome = self
            .in_flight
            .run_exclusive(key, async move { core.refresh_targets(&work_targets).await })
            .await;
        if let Err(e) = outcome {
            warn!("Token rates update incomplete: {}", e);
        }
    }

    /// Refreshes each target independently; one chain failing leaves the others alone.
    async fn refresh_targets(&self, targets: &[ChainTarget]) -> anyhow::Result<()> {
        let results = join_all(targets.iter().map(|target| self.refresh_chain(target))).await;

        let failed: Vec<String> = targets
            .iter()
            .zip(results)
            .filter_map(|(target, result)| {
                result.err().map(|e| {
                    warn!("⚠️ Failed to refresh rates for {}: {:#}", target, e);
                    target.to_string()
                })
            })
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("rates not refreshed for {}", failed.join(", ")))
        }
    }

    async fn refresh_chain(&self, target: &ChainTarget) -> anyhow::Result<()> {
        let data = self.fetch_chain_market_data(target).await?;
        debug!("Rates for {}: {} tokens", target, data.len());
        self.cache
            .set(target.chain_id, ChainCacheEntry::new(target.chain_id, data));
        self.publish_state();
        Ok(())
    }

    async fn fetch_chain_market_data(&self, target: &ChainTarget) -> anyhow::Result<MarketDataByToken> {
        let chain_id = target.chain_id;
        let addresses = chain_token_addresses(&self.tokens.tokens_snapshot(), chain_id);
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        if !self.prices.validate_chain_id_supported(chain_id) {
            return Ok(addresses.into_iter().map(|address| (address, None)).collect());
        }

        let currency = target.native_currency.as_str();
        if self.prices.validate_currency_supported(currency) {
            let prices = self.fetch_prices(chain_id, &addresses, currency).await?;
            return Ok(prices.into_iter().map(|(a, d)| (a, Some(d))).collect());
        }

        let (prices, rate) = tokio::join!(
            self.fetch_prices(chain_id, &addresses, FALLBACK_CURRENCY),
            self.rates.fetch_conversion_rate(FALLBACK_CURRENCY, currency),
        );
        let rate = match rate {
            Ok(Some(rate)) => rate,
            Ok(None) => {
                warn!("No {} -> {} conversion rate, clearing rates for chain {}", FALLBACK_CURRENCY, currency, chain_id);
                return Ok(HashMap::new());
            }
            Err(e) => {
                warn!("{} -> {} conversion failed, clearing rates for chain {}: {:#}", FALLBACK_CURRENCY, currency, chain_id, e);
                return Ok(HashMap::new());
            }
        };
        Ok(prices?
            .into_iter()
            .map(|(address, data)| (address, Some(data.convert(rate, currency))))
            .collect())
    }

    async fn fetch_prices(
        &self,
        chain_id: ChainId,
        addresses: &[Address],
        currency: &str,
    ) -> anyhow::Result<HashMap<Address, MarketDataDetails>> {
        fetch_batched(addresses, self.batch_size, self.fetch_concurrency, |batch: Vec<Address>| {
            let prices = Arc::clone(&self.prices);
            let currency = currency.to_string();
            async move { prices.fetch_token_prices(chain_id, &batch, &currency).await }
        })
        .await
    }

    /// Drops cached rates of chains whose configuration disappeared.
    fn purge_removed_chains(&self, network: &NetworkState) {
        let current: BTreeSet<ChainId> = network.configurations.keys().copied().collect();
        let removed: Vec<ChainId> = {
            let mut known = self.known_chains.lock().unwrap_or_else(|p| p.into_inner());
            let removed = known.difference(&current).copied().collect();
            *known = current;
            removed
        };

        let mut changed = false;
        for chain_id in removed {
            if self.cache.remove(chain_id).is_some() {
                info!("Network {} removed, dropped its token rates", chain_id);
                changed = true;
            }
        }
        if changed {
            self.publish_state();
        }
    }

    /// Records `next` and returns the chains whose token addresses changed.
    fn observe_tokens(&self, next: Arc<TokensSnapshot>) -> Vec<ChainId> {
        let previous = {
            let mut known = self.known_tokens.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *known, Arc::clone(&next))
        };
        changed_chains_for_any_account(&previous, &next)
    }
}

/// Adapter handing scheduler ticks to the shared core.
struct RatesPoller(Arc<RatesCore>);

#[async_trait]
impl PollingTarget for RatesPoller {
    type Input = TokenRatesPollingInput;

    async fn execute_poll(&self, input: &TokenRatesPollingInput) -> anyhow::Result<()> {
        let targets = self.0.targets_for(&input.chain_ids);
        self.0.update(&targets).await;
        Ok(())
    }
}

struct LegacyPolling {
    target: ChainTarget,
    task: JoinHandle<()>,
}

struct Inner {
    core: Arc<RatesCore>,
    scheduler: PollingScheduler<RatesPoller>,
    legacy: Mutex<Option<LegacyPolling>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(legacy) = self.legacy.get_mut().ok().and_then(Option::take) {
            legacy.task.abort();
        }
    }
}

/// Keeps `market_data` per chain current for the tracked tokens.
///
/// Cloning is cheap and every clone drives the same caches and timers.
#[derive(Clone)]
pub struct TokenRatesController {
    inner: Arc<Inner>,
}

impl TokenRatesController {
    pub fn new(
        config: TokenRatesConfig,
        prices: Arc<dyn TokenPricesService>,
        rates: Arc<dyn CurrencyRateService>,
        network: Arc<dyn NetworkProvider>,
        tokens: Arc<dyn TokensProvider>,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let known_tokens = tokens.tokens_snapshot();
        let known_chains = network.network_state().configurations.keys().copied().collect();

        let core = Arc::new(RatesCore {
            prices,
            rates,
            network,
            tokens,
            cache: ChainCache::new("token_rates"),
            in_flight: InFlight::new("token_rates"),
            batch_size: config.batch_size,
            fetch_concurrency: config.fetch_concurrency,
            disabled: AtomicBool::new(config.disabled),
            known_tokens: Mutex::new(known_tokens),
            known_chains: Mutex::new(known_chains),
            state_tx,
        });
        let scheduler = PollingScheduler::new(
            "token_rates",
            Arc::new(RatesPoller(Arc::clone(&core))),
            config.interval,
        );

        Self {
            inner: Arc::new(Inner {
                core,
                scheduler,
                legacy: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> TokenRatesState {
        self.inner.core.state()
    }

    /// Cached entry for `chain_id`, including when it was fetched.
    pub fn cache_entry(&self, chain_id: ChainId) -> Option<ChainCacheEntry<Address, Option<MarketDataDetails>>> {
        self.inner.core.cache.get(chain_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TokenRatesState>> {
        self.inner.core.state_tx.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.inner.scheduler.interval()
    }

    /// Applies to timers started afterwards.
    pub fn set_interval(&self, interval: Duration) {
        self.inner.scheduler.set_interval(interval);
    }

    pub fn enable(&self) {
        self.inner.core.disabled.store(false, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.inner.core.disabled.store(true, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.core.disabled.load(Ordering::SeqCst)
    }

    pub fn reset_state(&self) {
        self.inner.core.cache.clear();
        self.inner.core.publish_state();
    }

    /// Refreshes rates for `targets`. Transport failures are logged and
    /// leave the affected chains as they were.
    pub async fn update_exchange_rates(&self, targets: &[ChainTarget]) -> Result<(), AssetsError> {
        self.inner.core.update(targets).await;
        Ok(())
    }

    pub async fn update_exchange_rates_by_chain_id(&self, targets: &[ChainTarget]) -> Result<(), AssetsError> {
        self.update_exchange_rates(targets).await
    }

    pub async fn update_exchange_rates_by_network_client_id(&self, network_client_id: &str) -> Result<(), AssetsError> {
        let configuration = self
            .inner
            .core
            .network
            .network_configuration(network_client_id)
            .ok_or_else(|| AssetsError::UnknownNetworkClient(network_client_id.to_string()))?;
        self.update_exchange_rates(&[configuration.target()]).await
    }

    /// Polls `input`'s chains now and then every interval.
    pub fn start_polling(&self, input: TokenRatesPollingInput) -> Result<PollingToken, AssetsError> {
        if input.chain_ids.is_empty() {
            return Err(AssetsError::EmptyPollingInput);
        }
        Ok(self.inner.scheduler.start_polling(input))
    }

    pub fn stop_polling_by_polling_token(&self, token: PollingToken) -> bool {
        self.inner.scheduler.stop_polling_by_polling_token(token)
    }

    pub fn stop_all_polling(&self) {
        self.inner.scheduler.stop_all_polling();
        self.stop();
    }

    /// Legacy single-target polling: refreshes `chain_id` right away, then
    /// every interval until `stop`. Starting again replaces the target.
    pub async fn start(&self, chain_id: ChainId, native_currency: &str) {
        let target = ChainTarget::new(chain_id, native_currency);
        let interval = self.interval();
        {
            // Abort, spawn and store under one guard.
            let mut legacy = self.legacy();
            if let Some(previous) = legacy.take() {
                debug!("Replacing token rates polling for {}", previous.target);
                previous.task.abort();
            }
            info!("🚀 Starting token rates polling for {}", target);

            let core = Arc::clone(&self.inner.core);
            let loop_target = target.clone();
            let task = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    core.update(std::slice::from_ref(&loop_target)).await;
                }
            });
            *legacy = Some(LegacyPolling {
                target: target.clone(),
                task,
            });
        }

        self.inner.core.update(std::slice::from_ref(&target)).await;
    }

    /// Stops legacy polling. An update already in flight still completes.
    pub fn stop(&self) {
        if let Some(legacy) = self.legacy().take() {
            debug!("Stopping token rates polling for {}", legacy.target);
            legacy.task.abort();
        }
    }

    /// Target of the legacy loop, if running.
    pub fn legacy_target(&self) -> Option<ChainTarget> {
        self.legacy().as_ref().map(|legacy| legacy.target.clone())
    }

    pub fn is_polling_active(&self) -> bool {
        self.legacy().is_some() || self.inner.scheduler.is_polling()
    }

    pub async fn handle_event(&self, event: ControllerEvent) {
        match event {
            ControllerEvent::TokensStateChanged(snapshot) => {
                let changed = self.inner.core.observe_tokens(snapshot);
                if changed.is_empty() || !self.is_polling_active() {
                    return;
                }
                debug!("Token addresses changed on {:?}, refreshing rates", changed);
                let targets = self.inner.core.targets_for(&changed);
                self.inner.core.update(&targets).await;
            }
            ControllerEvent::NetworkStateChanged(network) => {
                self.inner.core.purge_removed_chains(&network);

                let Some(current) = self.legacy_target() else {
                    return;
                };
                match network.selected_configuration().map(|c| c.target()) {
                    Some(selected) if selected != current => {
                        info!("Selected network moved from {} to {}, restarting rates polling", current, selected);
                        self.start(selected.chain_id, &selected.native_currency).await;
                    }
                    _ => {}
                }
            }
            ControllerEvent::SelectedAccountChanged(account) => {
                // Rates cover every account's tokens; a selection change needs no refetch.
                debug!("Selected account is now {:?}", account);
            }
        }
    }

    /// Reacts to `rx` on a background task until the channel closes.
    pub fn listen(&self, rx: EventReceiver) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(drive_events("token_rates", rx, move |event| {
            let controller = controller.clone();
            async move { controller.handle_event(event).await }
        }))
    }

    fn legacy(&self) -> std::sync::MutexGuard<'_, Option<LegacyPolling>> {
        self.inner.legacy.lock().unwrap_or_else(|p| p.into_inner())
    }
}
