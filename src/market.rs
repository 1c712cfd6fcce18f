//! Market data client with a TTL cache.
//!
//! One fetch per pass is shared across every subscription; the cache keeps
//! repeat callers off the network for five minutes, and a stale copy is
//! served when a refresh fails. Consumers tolerate slightly stale data.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::types::MarketData;

pub const MARKET_CACHE_TTL: Duration = Duration::from_secs(300);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MarketDataClient {
    http: reqwest::Client,
    base_url: String,
    cache: RwLock<Option<(Instant, MarketData)>>,
}

impl MarketDataClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Result<MarketData> {
        if let Some((fetched_at, data)) = self.cache.read().as_ref() {
            if fetched_at.elapsed() < MARKET_CACHE_TTL {
                return Ok(data.clone());
            }
        }

        match self.fetch().await {
            Ok(data) => {
                *self.cache.write() = Some((Instant::now(), data.clone()));
                Ok(data)
            }
            Err(err) => {
                if let Some((_, stale)) = self.cache.read().as_ref() {
                    tracing::warn!("[market] refresh failed, serving stale data: {err:#}");
                    return Ok(stale.clone());
                }
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> Result<MarketData> {
        let response = self
            .http
            .get(format!("{}/market", self.base_url))
            .send()
            .await
            .context("market data request failed")?;
        let response = response
            .error_for_status()
            .context("market data request rejected")?;
        response
            .json::<MarketData>()
            .await
            .context("market data response was not valid JSON")
    }
}
