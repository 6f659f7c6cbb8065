use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

use crate::http::ApiClient;
use crate::settings::ApiSettings;

/// Remote source of currency conversion rates.
#[async_trait]
pub trait CurrencyRateService: Send + Sync {
    /// Units of `to` per one unit of `from`; `None` when the pair is unknown.
    async fn fetch_conversion_rate(&self, from: &str, to: &str) -> Result<Option<f64>>;
}

/// Reads the rate for `to` out of a `/data/price` body.
///
/// Error bodies (`{"Response": "Error", ...}`) and non-positive rates read as no rate.
fn parse_rate(body: &HashMap<String, Value>, to: &str) -> Option<f64> {
    body.iter()
        .find(|(symbol, _)| symbol.eq_ignore_ascii_case(to))
        .and_then(|(_, value)| value.as_f64())
        .filter(|rate| rate.is_finite() && *rate > 0.0)
}

/// Conversion rates from the cryptocompare-style `/data/price` endpoint.
pub struct HttpCurrencyRateService {
    client: ApiClient,
}

impl HttpCurrencyRateService {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        Ok(Self {
            client: ApiClient::new("currency_api", settings)?,
        })
    }
}

#[async_trait]
impl CurrencyRateService for HttpCurrencyRateService {
    async fn fetch_conversion_rate(&self, from: &str, to: &str) -> Result<Option<f64>> {
        let mut url = self.client.url("/data/price")?;
        url.query_pairs_mut()
            .append_pair("fsym", &from.to_uppercase())
            .append_pair("tsyms", &to.to_uppercase());

        let body: HashMap<String, Value> = self.client.get_json("conversion_rate", url).await?;
        let rate = parse_rate(&body, to);
        debug!("currency api: 1 {} = {:?} {}", from, rate, to);
        Ok(rate)
    }
}
