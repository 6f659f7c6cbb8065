use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::chain::ChainId;
use crate::change_detection::normalize_address;

/// A token tracked for an account on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Token {
    pub fn new(address: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address: address.into(),
            symbol: symbol.into(),
            decimals,
            name: None,
            image: None,
        }
    }

    /// Checksummed address, or the lowercased raw value when it is not valid hex.
    pub fn normalized_address(&self) -> String {
        normalize_address(&self.address)
    }
}

/// Per chain, per account collections of tokens.
pub type TokensByChain<T> = HashMap<ChainId, HashMap<Address, Vec<T>>>;

/// Snapshot of the token-set provider's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensSnapshot {
    /// Tokens the user added, or accepted from detection.
    #[serde(default)]
    pub all_tokens: TokensByChain<Token>,
    /// Tokens found by auto-detection but not yet accepted.
    #[serde(default)]
    pub all_detected_tokens: TokensByChain<Token>,
    /// Addresses the user chose to hide.
    #[serde(default)]
    pub all_ignored_tokens: TokensByChain<String>,
}

impl TokensSnapshot {
    pub fn tokens_for(&self, chain_id: ChainId, account: Address) -> &[Token] {
        lookup(&self.all_tokens, chain_id, account)
    }

    pub fn detected_tokens_for(&self, chain_id: ChainId, account: Address) -> &[Token] {
        lookup(&self.all_detected_tokens, chain_id, account)
    }

    pub fn ignored_tokens_for(&self, chain_id: ChainId, account: Address) -> &[String] {
        lookup(&self.all_ignored_tokens, chain_id, account)
    }

    /// Accounts with added or detected tokens on `chain_id`.
    pub fn accounts_on(&self, chain_id: ChainId) -> BTreeSet<Address> {
        self.all_tokens
            .get(&chain_id)
            .into_iter()
            .chain(self.all_detected_tokens.get(&chain_id))
            .flat_map(|by_account| by_account.keys().copied())
            .collect()
    }

    /// Every chain that has at least one collection in this snapshot.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self
            .all_tokens
            .keys()
            .chain(self.all_detected_tokens.keys())
            .copied()
            .collect();
        chains.sort();
        chains.dedup();
        chains
    }
}

fn lookup<T>(map: &TokensByChain<T>, chain_id: ChainId, account: Address) -> &[T] {
    map.get(&chain_id)
        .and_then(|by_account| by_account.get(&account))
        .map(|tokens| tokens.as_slice())
        .unwrap_or(&[])
}

/// Entry of the remote token list for a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenListToken {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub aggregators: Vec<String>,
    #[serde(default)]
    pub occurrences: Option<u32>,
}
