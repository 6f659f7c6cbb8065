use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::types::{ChainId, NetworkConfiguration};

#[derive(Debug, Deserialize, Clone)]
pub struct TokenRatesSettings {
    #[serde(default = "default_rates_interval_ms")]
    pub interval_ms: u64,
    /// Token addresses per price API request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Price API requests in flight at once for one chain.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default)]
    pub disabled: bool,
}

impl TokenRatesSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for TokenRatesSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_rates_interval_ms(),
            batch_size: default_batch_size(),
            fetch_concurrency: default_fetch_concurrency(),
            disabled: false,
        }
    }
}

fn default_rates_interval_ms() -> u64 {
    180_000 // 3 minutes
}
fn default_batch_size() -> usize {
    crate::batch_fetcher::TOKEN_PRICES_BATCH_SIZE
}
fn default_fetch_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenListSettings {
    #[serde(default = "default_list_interval_ms")]
    pub interval_ms: u64,
    /// Age after which a chain's token list is fetched again.
    #[serde(default = "default_cache_threshold_ms")]
    pub cache_threshold_ms: u64,
    /// Drop every cached list when the selected network changes.
    #[serde(default)]
    pub prevent_polling_on_network_restart: bool,
}

impl TokenListSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn cache_threshold(&self) -> Duration {
        Duration::from_millis(self.cache_threshold_ms)
    }
}

impl Default for TokenListSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_list_interval_ms(),
            cache_threshold_ms: default_cache_threshold_ms(),
            prevent_polling_on_network_restart: false,
        }
    }
}

fn default_list_interval_ms() -> u64 {
    4 * 60 * 60 * 1000 // 4 hours
}
fn default_cache_threshold_ms() -> u64 {
    24 * 60 * 60 * 1000 // 1 day
}

/// HTTP API endpoint plus client behaviour.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_qps_limit")]
    pub qps_limit: u32,
}

impl ApiSettings {
    fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            qps_limit: default_qps_limit(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> usize {
    3
}
fn default_qps_limit() -> u32 {
    10
}
fn default_price_api() -> ApiSettings {
    ApiSettings::with_base_url("https://price.api.cx.metamask.io")
}
fn default_token_api() -> ApiSettings {
    ApiSettings::with_base_url("https://token.api.cx.metamask.io")
}
fn default_currency_api() -> ApiSettings {
    ApiSettings::with_base_url("https://min-api.cryptocompare.com")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A network the poller watches, with the tokens to price on it.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub chain_id: ChainId,
    pub native_currency: String,
    pub network_client_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl ChainSettings {
    pub fn network_configuration(&self) -> NetworkConfiguration {
        NetworkConfiguration {
            chain_id: self.chain_id,
            native_currency: self.native_currency.clone(),
            name: self.name.clone(),
            network_client_ids: vec![self.network_client_id.clone()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub token_rates: TokenRatesSettings,
    #[serde(default)]
    pub token_list: TokenListSettings,
    #[serde(default = "default_price_api")]
    pub price_api: ApiSettings,
    #[serde(default = "default_token_api")]
    pub token_api: ApiSettings,
    #[serde(default = "default_currency_api")]
    pub currency_api: ApiSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub chains: Vec<ChainSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml")
    }

    /// Load `path` if it exists, then apply `ASSETS_*` environment overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;
        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn network_configurations(&self) -> Vec<NetworkConfiguration> {
        self.chains
            .iter()
            .map(ChainSettings::network_configuration)
            .collect()
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("ASSETS_TOKEN_RATES_INTERVAL_MS") {
            self.token_rates.interval_ms = v;
        }
        if let Some(v) = env_parse("ASSETS_TOKEN_RATES_BATCH_SIZE") {
            self.token_rates.batch_size = v;
        }
        if let Some(v) = env_parse("ASSETS_TOKEN_RATES_DISABLED") {
            self.token_rates.disabled = v;
        }
        if let Some(v) = env_parse("ASSETS_TOKEN_LIST_INTERVAL_MS") {
            self.token_list.interval_ms = v;
        }
        if let Some(v) = env_parse("ASSETS_TOKEN_LIST_CACHE_THRESHOLD_MS") {
            self.token_list.cache_threshold_ms = v;
        }
        if let Some(url) = env_string("ASSETS_PRICE_API_URL") {
            self.price_api.base_url = url;
        }
        if let Some(url) = env_string("ASSETS_TOKEN_API_URL") {
            self.token_api.base_url = url;
        }
        if let Some(url) = env_string("ASSETS_CURRENCY_API_URL") {
            self.currency_api.base_url = url;
        }
        if let Some(level) = env_string("ASSETS_LOG_LEVEL") {
            self.log.level = level;
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("Ignoring {}: cannot parse '{}'", key, raw);
            None
        }
    }
}
