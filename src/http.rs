use anyhow::{Context, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use url::Url;

use crate::metrics;
use crate::settings::ApiSettings;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// JSON-over-HTTP client shared by the remote services.
///
/// Every request waits for the rate limiter, and failed requests are retried
/// with jittered exponential backoff before the error is returned.
pub struct ApiClient {
    component: &'static str,
    base_url: Url,
    client: reqwest::Client,
    limiter: Arc<DirectRateLimiter>,
    max_retries: usize,
}

impl ApiClient {
    pub fn new(component: &'static str, settings: &ApiSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url)
            .with_context(|| format!("invalid {} base url '{}'", component, settings.base_url))?;
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("failed to build HTTP client")?;
        let qps = NonZeroU32::new(settings.qps_limit).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            component,
            base_url,
            client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(qps))),
            max_retries: settings.max_retries,
        })
    }

    /// `path` resolved against the base url.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("cannot join '{}' onto {}", path, self.base_url))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, method: &'static str, url: Url) -> Result<T> {
        let started = Instant::now();
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries);

        let result = Retry::spawn(strategy, || self.get_once::<T>(url.clone())).await;
        metrics::record_remote_call(self.component, method, started.elapsed(), result.is_ok());
        result.with_context(|| format!("{} {} failed", self.component, method))
    }

    async fn get_once<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.limiter.until_ready().await;
        debug!("{}: GET {}", self.component, url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}
