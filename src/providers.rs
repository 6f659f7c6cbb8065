//! Collaborators the controllers read from: networks, accounts and tokens.
//!
//! The host wallet owns this state; controllers only read it through these
//! traits and learn about changes from `ControllerEvent`s.

use arc_swap::ArcSwap;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{ChainId, NetworkConfiguration, TokensSnapshot};

/// Network configurations keyed by chain, plus the selected client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub selected_network_client_id: String,
    pub configurations: BTreeMap<ChainId, NetworkConfiguration>,
}

impl NetworkState {
    pub fn new(selected_network_client_id: impl Into<String>, configurations: Vec<NetworkConfiguration>) -> Self {
        Self {
            selected_network_client_id: selected_network_client_id.into(),
            configurations: configurations.into_iter().map(|c| (c.chain_id, c)).collect(),
        }
    }

    pub fn configuration_for_client(&self, network_client_id: &str) -> Option<&NetworkConfiguration> {
        self.configurations
            .values()
            .find(|c| c.network_client_ids.iter().any(|id| id == network_client_id))
    }

    pub fn selected_configuration(&self) -> Option<&NetworkConfiguration> {
        self.configuration_for_client(&self.selected_network_client_id)
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.configurations.keys().copied().collect()
    }

    pub fn native_currency(&self, chain_id: ChainId) -> Option<&str> {
        self.configurations
            .get(&chain_id)
            .map(|c| c.native_currency.as_str())
    }
}

pub trait NetworkProvider: Send + Sync {
    fn network_state(&self) -> Arc<NetworkState>;

    fn network_configuration(&self, network_client_id: &str) -> Option<NetworkConfiguration> {
        self.network_state()
            .configuration_for_client(network_client_id)
            .cloned()
    }
}

pub trait AccountsProvider: Send + Sync {
    fn selected_account(&self) -> Option<Address>;
}

pub trait TokensProvider: Send + Sync {
    fn tokens_snapshot(&self) -> Arc<TokensSnapshot>;
}

/// In-memory network provider whose state the host swaps atomically.
#[derive(Debug, Default)]
pub struct StaticNetworkProvider {
    state: ArcSwap<NetworkState>,
}

impl StaticNetworkProvider {
    pub fn new(state: NetworkState) -> Self {
        Self {
            state: ArcSwap::from_pointee(state),
        }
    }

    /// Replace the state and return the new value for broadcasting.
    pub fn set_state(&self, state: NetworkState) -> Arc<NetworkState> {
        let state = Arc::new(state);
        self.state.store(Arc::clone(&state));
        state
    }
}

impl NetworkProvider for StaticNetworkProvider {
    fn network_state(&self) -> Arc<NetworkState> {
        self.state.load_full()
    }
}

#[derive(Debug, Default)]
pub struct StaticAccountsProvider {
    selected: ArcSwap<Option<Address>>,
}

impl StaticAccountsProvider {
    pub fn new(selected: Option<Address>) -> Self {
        Self {
            selected: ArcSwap::from_pointee(selected),
        }
    }

    pub fn select(&self, account: Address) {
        self.selected.store(Arc::new(Some(account)));
    }
}

impl AccountsProvider for StaticAccountsProvider {
    fn selected_account(&self) -> Option<Address> {
        **self.selected.load()
    }
}
