use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::http::ApiClient;
use crate::settings::ApiSettings;
use crate::types::{ChainId, TokenListToken};

/// Chains the token API serves lists for.
pub static TOKEN_LIST_CHAIN_IDS: Lazy<HashSet<ChainId>> = Lazy::new(|| {
    [
        1u64, 10, 25, 56, 100, 137, 250, 324, 1101, 1284, 1285, 8453, 42161, 43114, 59144,
        1313161554,
    ]
    .into_iter()
    .map(ChainId)
    .collect()
});

/// Remote source of per-chain token lists.
#[async_trait]
pub trait TokenListService: Send + Sync {
    fn is_chain_supported(&self, chain_id: ChainId) -> bool;

    async fn fetch_token_list(&self, chain_id: ChainId) -> Result<Vec<TokenListToken>>;
}

/// Token API client (`/tokens/{chain}`).
pub struct HttpTokenListService {
    client: ApiClient,
}

impl HttpTokenListService {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        Ok(Self {
            client: ApiClient::new("token_api", settings)?,
        })
    }
}

#[async_trait]
impl TokenListService for HttpTokenListService {
    fn is_chain_supported(&self, chain_id: ChainId) -> bool {
        TOKEN_LIST_CHAIN_IDS.contains(&chain_id)
    }

    async fn fetch_token_list(&self, chain_id: ChainId) -> Result<Vec<TokenListToken>> {
        let mut url = self
            .client
            .url(&format!("/tokens/{}", chain_id.to_decimal_string()))?;
        url.query_pairs_mut()
            .append_pair("occurrenceFloor", if chain_id == ChainId::LINEA { "1" } else { "3" })
            .append_pair("includeNativeAssets", "false")
            .append_pair("includeDuplicateSymbolAssets", "false")
            .append_pair("includeTokenFees", "false")
            .append_pair("includeAssetType", "false");

        let tokens: Vec<TokenListToken> = self.client.get_json("token_list", url).await?;
        debug!("token api: {} tokens listed for chain {}", tokens.len(), chain_id);
        Ok(tokens)
    }
}
