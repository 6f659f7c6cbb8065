use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Spot price and market figures for a token, quoted in `currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataDetails {
    #[serde(default)]
    pub token_address: Address,
    pub currency: String,
    pub price: f64,
    #[serde(default)]
    pub price_change_1d: f64,
    #[serde(default)]
    pub price_percent_change_1d: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub total_volume: f64,
    #[serde(default)]
    pub high_1d: f64,
    #[serde(default)]
    pub low_1d: f64,
    #[serde(default)]
    pub all_time_high: f64,
    #[serde(default)]
    pub all_time_low: f64,
    #[serde(default)]
    pub diluted_market_cap: f64,
    #[serde(default)]
    pub circulating_supply: f64,
}

impl MarketDataDetails {
    /// Re-quote every monetary figure by `rate` and label it with `currency`.
    ///
    /// Percentages and supply are unit-free and stay as they are.
    pub fn convert(mut self, rate: f64, currency: &str) -> Self {
        self.price *= rate;
        self.price_change_1d *= rate;
        self.market_cap *= rate;
        self.total_volume *= rate;
        self.high_1d *= rate;
        self.low_1d *= rate;
        self.all_time_high *= rate;
        self.all_time_low *= rate;
        self.diluted_market_cap *= rate;
        self.currency = currency.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MarketDataDetails {
        MarketDataDetails {
            token_address: Address::repeat_byte(0xaa),
            currency: "ETH".to_string(),
            price: 0.002,
            price_change_1d: 0.0001,
            price_percent_change_1d: 5.0,
            market_cap: 1000.0,
            total_volume: 50.0,
            high_1d: 0.0025,
            low_1d: 0.0015,
            all_time_high: 0.01,
            all_time_low: 0.0001,
            diluted_market_cap: 1500.0,
            circulating_supply: 1_000_000.0,
        }
    }

    #[test]
    fn convert_scales_money_but_not_percentages() {
        let converted = sample().convert(2.0, "POL");
        assert_eq!(converted.currency, "POL");
        assert_eq!(converted.price, 0.004);
        assert_eq!(converted.market_cap, 2000.0);
        assert_eq!(converted.all_time_low, 0.0002);
        assert_eq!(converted.price_percent_change_1d, 5.0);
        assert_eq!(converted.circulating_supply, 1_000_000.0);
    }
}
