use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::http::ApiClient;
use crate::settings::ApiSettings;
use crate::types::{ChainId, MarketDataDetails};

/// Chains the price API can quote.
pub static SUPPORTED_CHAIN_IDS: Lazy<HashSet<ChainId>> = Lazy::new(|| {
    [
        1u64,       // Ethereum
        10,         // Optimism
        25,         // Cronos
        56,         // BNB Smart Chain
        100,        // Gnosis
        137,        // Polygon
        250,        // Fantom
        324,        // zkSync Era
        1101,       // Polygon zkEVM
        1284,       // Moonbeam
        1285,       // Moonriver
        8453,       // Base
        42161,      // Arbitrum One
        42220,      // Celo
        43114,      // Avalanche C-Chain
        59144,      // Linea
        1313161554, // Aurora
    ]
    .into_iter()
    .map(ChainId)
    .collect()
});

/// Currencies the price API can quote in, lowercase.
pub static SUPPORTED_CURRENCIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // crypto
        "btc", "eth", "ltc", "bch", "bnb", "eos", "xrp", "xlm", "link", "dot", "yfi",
        // fiat
        "usd", "aed", "ars", "aud", "bdt", "bhd", "bmd", "brl", "cad", "chf", "clp", "cny", "czk",
        "dkk", "eur", "gbp", "hkd", "huf", "idr", "ils", "inr", "jpy", "krw", "kwd", "lkr", "mmk",
        "mxn", "myr", "ngn", "nok", "nzd", "php", "pkr", "pln", "rub", "sar", "sek", "sgd", "thb",
        "try", "twd", "uah", "vef", "vnd", "zar",
        // commodities and units
        "xdr", "xag", "xau", "bits", "sats",
    ]
    .into_iter()
    .collect()
});

/// Remote source of token spot prices.
#[async_trait]
pub trait TokenPricesService: Send + Sync {
    /// Prices for `token_addresses` on `chain_id` quoted in `currency`.
    ///
    /// Tokens the API knows nothing about are absent from the result.
    async fn fetch_token_prices(
        &self,
        chain_id: ChainId,
        token_addresses: &[Address],
        currency: &str,
    ) -> Result<HashMap<Address, MarketDataDetails>>;

    fn validate_chain_id_supported(&self, chain_id: ChainId) -> bool;

    fn validate_currency_supported(&self, currency: &str) -> bool;
}

/// Wire form of one spot price; the API sends `null` for unknown figures.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotPrice {
    #[serde(default)]
    currency: Option<String>,
    price: Option<f64>,
    #[serde(default)]
    price_change_1d: Option<f64>,
    #[serde(default)]
    price_percent_change_1d: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    total_volume: Option<f64>,
    #[serde(default)]
    high_1d: Option<f64>,
    #[serde(default)]
    low_1d: Option<f64>,
    #[serde(default)]
    all_time_high: Option<f64>,
    #[serde(default)]
    all_time_low: Option<f64>,
    #[serde(default)]
    diluted_market_cap: Option<f64>,
    #[serde(default)]
    circulating_supply: Option<f64>,
}

impl SpotPrice {
    fn into_market_data(self, token_address: Address, requested_currency: &str) -> Option<MarketDataDetails> {
        Some(MarketDataDetails {
            token_address,
            currency: self
                .currency
                .unwrap_or_else(|| requested_currency.to_string()),
            price: self.price?,
            price_change_1d: self.price_change_1d.unwrap_or_default(),
            price_percent_change_1d: self.price_percent_change_1d.unwrap_or_default(),
            market_cap: self.market_cap.unwrap_or_default(),
            total_volume: self.total_volume.unwrap_or_default(),
            high_1d: self.high_1d.unwrap_or_default(),
            low_1d: self.low_1d.unwrap_or_default(),
            all_time_high: self.all_time_high.unwrap_or_default(),
            all_time_low: self.all_time_low.unwrap_or_default(),
            diluted_market_cap: self.diluted_market_cap.unwrap_or_default(),
            circulating_supply: self.circulating_supply.unwrap_or_default(),
        })
    }
}

/// Turns a spot-prices response body into market data keyed by token.
///
/// Entries with an unparsable key or without a price are dropped.
fn parse_spot_prices(
    body: HashMap<String, Option<SpotPrice>>,
    currency: &str,
) -> HashMap<Address, MarketDataDetails> {
    body.into_iter()
        .filter_map(|(raw_address, spot)| {
            let address = match raw_address.parse::<Address>() {
                Ok(address) => address,
                Err(_) => {
                    warn!("price api returned an invalid token address '{}'", raw_address);
                    return None;
                }
            };
            spot?
                .into_market_data(address, currency)
                .map(|data| (address, data))
        })
        .collect()
}

/// Price API client (`/v2/chains/{chain}/spot-prices`).
pub struct HttpTokenPricesService {
    client: ApiClient,
}

impl HttpTokenPricesService {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        Ok(Self {
            client: ApiClient::new("price_api", settings)?,
        })
    }
}

#[async_trait]
impl TokenPricesService for HttpTokenPricesService {
    async fn fetch_token_prices(
        &self,
        chain_id: ChainId,
        token_addresses: &[Address],
        currency: &str,
    ) -> Result<HashMap<Address, MarketDataDetails>> {
        if token_addresses.is_empty() {
            return Ok(HashMap::new());
        }
        let mut url = self.client.url(&format!(
            "/v2/chains/{}/spot-prices",
            chain_id.to_decimal_string()
        ))?;
        let addresses = token_addresses
            .iter()
            .map(|a| format!("{:?}", a))
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut()
            .append_pair("tokenAddresses", &addresses)
            .append_pair("vsCurrency", &currency.to_lowercase())
            .append_pair("includeMarketData", "true");

        let body: HashMap<String, Option<SpotPrice>> =
            self.client.get_json("spot_prices", url).await?;
        let prices = parse_spot_prices(body, currency);
        debug!(
            "price api: {} of {} tokens priced on chain {} in {}",
            prices.len(),
            token_addresses.len(),
            chain_id,
            currency
        );
        Ok(prices)
    }

    fn validate_chain_id_supported(&self, chain_id: ChainId) -> bool {
        SUPPORTED_CHAIN_IDS.contains(&chain_id)
    }

    fn validate_currency_supported(&self, currency: &str) -> bool {
        SUPPORTED_CURRENCIES.contains(currency.to_lowercase().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const DAI: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";

    #[test]
    fn parses_spot_prices_with_nulls() {
        let raw = format!(
            r#"{{
                "{USDC}": {{"price": 0.0004, "currency": "eth", "marketCap": 12.5, "high1d": null}},
                "{DAI}": {{"price": null}},
                "not-an-address": {{"price": 1.0}}
            }}"#
        );
        let body: HashMap<String, Option<SpotPrice>> = serde_json::from_str(&raw).unwrap();
        let parsed = parse_spot_prices(body, "ETH");

        assert_eq!(parsed.len(), 1);
        let usdc = &parsed[&USDC.parse::<Address>().unwrap()];
        assert_eq!(usdc.price, 0.0004);
        assert_eq!(usdc.market_cap, 12.5);
        assert_eq!(usdc.high_1d, 0.0);
        assert_eq!(usdc.currency, "eth");
    }

    #[test]
    fn every_priced_entry_is_keyed_by_its_address() {
        let raw = format!(
            r#"{{
                "{USDC}": {{"price": 0.0004}},
                "{DAI}": {{"price": 0.00041, "currency": "eth"}}
            }}"#
        );
        let body: HashMap<String, Option<SpotPrice>> = serde_json::from_str(&raw).unwrap();
        let parsed = parse_spot_prices(body, "ETH");

        assert_eq!(parsed.len(), 2);
        for (address, data) in &parsed {
            assert_eq!(*address, data.token_address, "Key matches the entry it holds");
        }
        assert_eq!(parsed[&USDC.parse::<Address>().unwrap()].price, 0.0004);
        assert_eq!(parsed[&USDC.parse::<Address>().unwrap()].currency, "ETH");
        assert_eq!(parsed[&DAI.parse::<Address>().unwrap()].price, 0.00041);
    }

    #[test]
    fn missing_entries_are_skipped() {
        let body: HashMap<String, Option<SpotPrice>> =
            serde_json::from_str(&format!(r#"{{"{USDC}": null}}"#)).unwrap();
        assert!(parse_spot_prices(body, "usd").is_empty());
    }

    #[test]
    fn support_checks_ignore_currency_case() {
        let service = HttpTokenPricesService::new(&ApiSettings {
            base_url: "https://price.api.cx.metamask.io".into(),
            timeout_ms: 1000,
            max_retries: 0,
            qps_limit: 1,
        })
        .unwrap();
        assert!(service.validate_currency_supported("ETH"));
        assert!(service.validate_currency_supported("usd"));
        assert!(!service.validate_currency_supported("POL"));
        assert!(service.validate_chain_id_supported(ChainId::LINEA));
        assert!(!service.validate_chain_id_supported(ChainId(999_999)));
    }
}
