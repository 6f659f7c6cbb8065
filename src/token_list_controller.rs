//! Token list: the remote catalogue of known tokens per chain.
//!
//! Lists change slowly, so a chain's list is fetched again only once its
//! cache entry is older than the configured threshold.

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chain_cache::{ChainCache, ChainCacheEntry};
use crate::errors::AssetsError;
use crate::events::{drive_events, ControllerEvent, EventReceiver, EVENT_CHANNEL_CAPACITY};
use crate::in_flight::InFlight;
use crate::polling::{PollingInput, PollingScheduler, PollingTarget, PollingToken};
use crate::providers::{NetworkProvider, NetworkState};
use crate::settings::TokenListSettings;
use crate::token_list_api::TokenListService;
use crate::types::{now_millis, ChainId, TokenListToken};

/// Lowercased token address to token list entry.
pub type TokenListMap = std::collections::HashMap<String, TokenListToken>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenListState {
    #[serde(default)]
    pub tokens_chains_cache: BTreeMap<ChainId, ChainCacheEntry<String, TokenListToken>>,
    #[serde(default)]
    pub prevent_polling_on_network_restart: bool,
}

impl TokenListState {
    pub fn token_list_for(&self, chain_id: ChainId) -> Option<&TokenListMap> {
        self.tokens_chains_cache.get(&chain_id).map(|entry| &entry.data)
    }
}

#[derive(Debug, Clone)]
pub struct TokenListConfig {
    pub interval: Duration,
    pub cache_threshold: Duration,
    pub prevent_polling_on_network_restart: bool,
}

impl Default for TokenListConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4 * 60 * 60),
            cache_threshold: Duration::from_secs(24 * 60 * 60),
            prevent_polling_on_network_restart: false,
        }
    }
}

impl From<&TokenListSettings> for TokenListConfig {
    fn from(settings: &TokenListSettings) -> Self {
        Self {
            interval: settings.interval(),
            cache_threshold: settings.cache_threshold(),
            prevent_polling_on_network_restart: settings.prevent_polling_on_network_restart,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenListPollingInput {
    pub chain_ids: Vec<ChainId>,
}

impl TokenListPollingInput {
    pub fn new(chain_ids: impl IntoIterator<Item = ChainId>) -> Self {
        Self {
            chain_ids: chain_ids.into_iter().collect(),
        }
    }
}

impl PollingInput for TokenListPollingInput {
    fn polling_key(&self) -> String {
        let chains: BTreeSet<ChainId> = self.chain_ids.iter().copied().collect();
        chains
            .iter()
            .map(ChainId::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

struct ListCore {
    service: Arc<dyn TokenListService>,
    cache: ChainCache<String, TokenListToken>,
    in_flight: InFlight<ChainId>,
    cache_threshold: Duration,
    prevent_polling_on_network_restart: AtomicBool,
    known_chains: Mutex<BTreeSet<ChainId>>,
    selected_chain: Mutex<Option<ChainId>>,
    state_tx: broadcast::Sender<Arc<TokenListState>>,
}

impl ListCore {
    fn state(&self) -> TokenListState {
        TokenListState {
            tokens_chains_cache: self.cache.snapshot(),
            prevent_polling_on_network_restart: self
                .prevent_polling_on_network_restart
                .load(Ordering::SeqCst),
        }
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send(Arc::new(self.state()));
    }

    fn is_cache_valid(&self, chain_id: ChainId) -> bool {
        self.cache
            .is_fresh(chain_id, self.cache_threshold, now_millis())
    }

    /// Fetches `chain_id`'s list unless it is fresh; one fetch per chain at a time.
    async fn fetch_token_list(self: &Arc<Self>, chain_id: ChainId) {
        if !self.service.is_chain_supported(chain_id) {
            debug!("Token list not available for chain {}", chain_id);
            return;
        }
        if self.is_cache_valid(chain_id) {
            debug!("Token list for chain {} is fresh, skipping fetch", chain_id);
            return;
        }

        let core = Arc::clone(self);
        let outcome = self
            .in_flight
            .run_exclusive(chain_id, async move { core.refresh(chain_id).await })
            .await;
        if let Err(e) = outcome {
            warn!("⚠️ Token list fetch for chain {} failed: {:#}", chain_id, e);
        }
    }

    async fn refresh(&self, chain_id: ChainId) -> anyhow::Result<()> {
        // Another caller may have refreshed while this one waited to start.
        if self.is_cache_valid(chain_id) {
            return Ok(());
        }
        let tokens = self.service.fetch_token_list(chain_id).await?;
        let data: TokenListMap = tokens
            .into_iter()
            .map(|token| (token.address.to_lowercase(), token))
            .collect();
        info!("📋 Token list for chain {} updated ({} tokens)", chain_id, data.len());
        self.cache.set(chain_id, ChainCacheEntry::new(chain_id, data));
        self.publish_state();
        Ok(())
    }

    fn clear(&self) {
        self.cache.clear();
        self.publish_state();
    }

    fn handle_network_change(&self, network: &NetworkState) {
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
                info!("Network {} removed, dropped its token list", chain_id);
                changed = true;
            }
        }

        let selected = network.selected_configuration().map(|c| c.chain_id);
        let previous = {
            let mut guard = self.selected_chain.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *guard, selected)
        };
        if previous != selected && self.prevent_polling_on_network_restart.load(Ordering::SeqCst) {
            debug!("Selected network changed, clearing token list data");
            self.cache.clear();
            changed = true;
        }

        if changed {
            self.publish_state();
        }
    }
}

struct ListPoller(Arc<ListCore>);

#[async_trait]
impl PollingTarget for ListPoller {
    type Input = TokenListPollingInput;

    async fn execute_poll(&self, input: &TokenListPollingInput) -> anyhow::Result<()> {
        let chains: BTreeSet<ChainId> = input.chain_ids.iter().copied().collect();
        join_all(chains.into_iter().map(|chain_id| self.0.fetch_token_list(chain_id))).await;
        Ok(())
    }
}

/// Keeps per-chain token lists cached and reasonably fresh.
#[derive(Clone)]
pub struct TokenListController {
    core: Arc<ListCore>,
    scheduler: Arc<PollingScheduler<ListPoller>>,
}

impl TokenListController {
    pub fn new(
        config: TokenListConfig,
        service: Arc<dyn TokenListService>,
        network: Arc<dyn NetworkProvider>,
    ) -> Self {
        Self::with_initial_state(config, service, network, TokenListState::default())
    }

    /// Starts from a state the host persisted earlier.
    pub fn with_initial_state(
        config: TokenListConfig,
        service: Arc<dyn TokenListService>,
        network: Arc<dyn NetworkProvider>,
        initial_state: TokenListState,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let network_state = network.network_state();
        let prevent = config.prevent_polling_on_network_restart
            || initial_state.prevent_polling_on_network_restart;

        let core = Arc::new(ListCore {
            service,
            cache: ChainCache::with_entries("token_list", initial_state.tokens_chains_cache.into_values()),
            in_flight: InFlight::new("token_list"),
            cache_threshold: config.cache_threshold,
            prevent_polling_on_network_restart: AtomicBool::new(prevent),
            known_chains: Mutex::new(network_state.configurations.keys().copied().collect()),
            selected_chain: Mutex::new(network_state.selected_configuration().map(|c| c.chain_id)),
            state_tx,
        });
        let scheduler = PollingScheduler::new(
            "token_list",
            Arc::new(ListPoller(Arc::clone(&core))),
            config.interval,
        );

        Self {
            core,
            scheduler: Arc::new(scheduler),
        }
    }

    pub fn state(&self) -> TokenListState {
        self.core.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TokenListState>> {
        self.core.state_tx.subscribe()
    }

    /// Entry exists and is younger than the cache threshold.
    pub fn is_cache_valid(&self, chain_id: ChainId) -> bool {
        self.core.is_cache_valid(chain_id)
    }

    /// Fetches and caches `chain_id`'s list unless the cached one is fresh.
    /// Failures are logged; the previous list stays in place.
    pub async fn fetch_token_list(&self, chain_id: ChainId) {
        self.core.fetch_token_list(chain_id).await;
    }

    pub fn start_polling(&self, input: TokenListPollingInput) -> Result<PollingToken, AssetsError> {
        if input.chain_ids.is_empty() {
            return Err(AssetsError::EmptyPollingInput);
        }
        Ok(self.scheduler.start_polling(input))
    }

    pub fn stop_polling_by_polling_token(&self, token: PollingToken) -> bool {
        self.scheduler.stop_polling_by_polling_token(token)
    }

    pub fn stop_all_polling(&self) {
        self.scheduler.stop_all_polling();
    }

    pub fn is_polling_active(&self) -> bool {
        self.scheduler.is_polling()
    }

    pub fn clear_token_list(&self, chain_id: ChainId) {
        if self.core.cache.remove(chain_id).is_some() {
            self.core.publish_state();
        }
    }

    pub fn clearing_token_list_data(&self) {
        self.core.clear();
    }

    pub fn reset_state(&self) {
        self.core.clear();
    }

    pub fn update_prevent_polling_on_network_restart(&self, prevent: bool) {
        self.core
            .prevent_polling_on_network_restart
            .store(prevent, Ordering::SeqCst);
        self.core.publish_state();
    }

    pub async fn handle_event(&self, event: ControllerEvent) {
        if let ControllerEvent::NetworkStateChanged(network) = event {
            self.core.handle_network_change(&network);
        }
    }

    pub fn listen(&self, rx: EventReceiver) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(drive_events("token_list", rx, move |event| {
            let controller = controller.clone();
            async move { controller.handle_event(event).await }
        }))
    }
}
