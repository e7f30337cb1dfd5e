//! Pricing module for Nisab thresholds.
//!
//! Metal prices come from a best-effort external source. The [`PriceOracle`]
//! isolates the rest of the engine from that source's instability: it serves a
//! fresh cached price when one exists, refreshes on expiry, and falls back to
//! the last known price (flagged stale) when the source is down.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::nisab::{self, Metal, NisabBasis};

/// 1 Troy Ounce = 31.1034768 Grams
pub const OUNCE_TO_GRAM: Decimal = dec!(31.1034768);

/// How a price reached the caller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    Display, EnumString, AsRefStr, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "snake_case")]
pub enum PriceOrigin {
    /// Fetched from the source and still within its TTL.
    Live,
    /// Served from an expired entry because the source could not be reached.
    StaleFallback,
}

/// One cached metal price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCacheEntry {
    pub metal: Metal,
    pub price_per_gram: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: PriceOrigin,
}

impl PriceCacheEntry {
    pub fn live(metal: Metal, price_per_gram: Decimal, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            metal,
            price_per_gram,
            fetched_at,
            expires_at: fetched_at + ttl,
            source: PriceOrigin::Live,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn to_quote(&self, origin: PriceOrigin) -> PriceQuote {
        PriceQuote {
            metal: self.metal,
            price_per_gram: self.price_per_gram,
            as_of: self.fetched_at,
            is_stale: origin == PriceOrigin::StaleFallback,
            source: origin,
        }
    }
}

/// Price handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub metal: Metal,
    pub price_per_gram: Decimal,
    pub as_of: DateTime<Utc>,
    pub is_stale: bool,
    pub source: PriceOrigin,
}

impl PriceQuote {
    /// A stale price older than `max_age` must be surfaced to the user.
    pub fn needs_staleness_warning(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.is_stale && now - self.as_of > max_age
    }
}

/// A currency threshold together with the price it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdQuote {
    pub basis: NisabBasis,
    pub threshold: Decimal,
    pub price: PriceQuote,
}

impl ThresholdQuote {
    pub fn from_price(basis: NisabBasis, price: PriceQuote) -> Self {
        Self {
            basis,
            threshold: nisab::threshold(basis, price.price_per_gram),
            price,
        }
    }
}

#[cfg(feature = "async")]
pub use self::oracle::{PriceOracle, PriceSource, StaticPriceSource};

#[cfg(feature = "live-pricing")]
pub use self::live::{HttpPriceSource, NetworkConfig};

#[cfg(feature = "async")]
mod oracle {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    use crate::clock::Clock;
    use crate::store::PriceCacheRepository;
    use crate::types::NisabError;

    /// Fetches the current unit price (per gram) of a metal.
    #[async_trait::async_trait]
    pub trait PriceSource: Send + Sync {
        async fn fetch_price(&self, metal: Metal) -> Result<Decimal, NisabError>;
    }

    /// A fixed-price source for testing and development.
    ///
    /// Can be switched offline to exercise the oracle's fallback path.
    #[derive(Debug, Default)]
    pub struct StaticPriceSource {
        prices: RwLock<HashMap<Metal, Decimal>>,
        offline: RwLock<bool>,
    }

    impl StaticPriceSource {
        pub fn new(gold_per_gram: Decimal, silver_per_gram: Decimal) -> Self {
            let source = Self::default();
            source.set_price(Metal::Gold, gold_per_gram);
            source.set_price(Metal::Silver, silver_per_gram);
            source
        }

        pub fn set_price(&self, metal: Metal, price_per_gram: Decimal) {
            if let Ok(mut prices) = self.prices.write() {
                prices.insert(metal, price_per_gram);
            }
        }

        pub fn set_offline(&self, offline: bool) {
            if let Ok(mut flag) = self.offline.write() {
                *flag = offline;
            }
        }
    }

    #[async_trait::async_trait]
    impl PriceSource for StaticPriceSource {
        async fn fetch_price(&self, metal: Metal) -> Result<Decimal, NisabError> {
            if self.offline.read().map(|f| *f).unwrap_or(false) {
                return Err(NisabError::Network {
                    message: "static price source is offline".to_string(),
                });
            }
            self.prices
                .read()
                .ok()
                .and_then(|p| p.get(&metal).copied())
                .ok_or(NisabError::PriceUnavailable { metal })
        }
    }

    /// Cache-fronted price lookup with stale fallback.
    ///
    /// The in-memory map is process-wide and shared by clones. Concurrent
    /// refreshes may both hit the source; the last successful write wins.
    #[derive(Clone)]
    pub struct PriceOracle {
        source: Arc<dyn PriceSource>,
        repository: Arc<dyn PriceCacheRepository>,
        clock: Arc<dyn Clock>,
        memory: Arc<RwLock<HashMap<Metal, PriceCacheEntry>>>,
        ttl: Duration,
    }

    impl PriceOracle {
        pub fn new(
            source: Arc<dyn PriceSource>,
            repository: Arc<dyn PriceCacheRepository>,
            clock: Arc<dyn Clock>,
            ttl: Duration,
        ) -> Self {
            Self {
                source,
                repository,
                clock,
                memory: Arc::new(RwLock::new(HashMap::new())),
                ttl,
            }
        }

        /// Returns a fresh price, refreshing from the source when the cache has expired.
        ///
        /// When the source fails, the most recent cached price is returned with
        /// `is_stale = true`. Fails with `PriceUnavailable` only when nothing was ever cached.
        #[tracing::instrument(skip(self))]
        pub async fn get_price(&self, metal: Metal) -> Result<PriceQuote, NisabError> {
            let now = self.clock.now();
            let cached = self.latest_entry(metal).await?;

            // fast path: unexpired entry
            if let Some(entry) = cached.as_ref().filter(|e| !e.is_expired(now)) {
                return Ok(entry.to_quote(PriceOrigin::Live));
            }

            match self.fetch_valid(metal).await {
                Ok(price) => {
                    let entry = PriceCacheEntry::live(metal, price, now, self.ttl);
                    self.store(entry.clone()).await?;
                    tracing::debug!(%metal, %price, "refreshed metal price");
                    Ok(entry.to_quote(PriceOrigin::Live))
                }
                Err(e) => match cached {
                    Some(entry) => {
                        tracing::warn!(%metal, error = %e, as_of = %entry.fetched_at, "price source failed; serving stale cache");
                        Ok(entry.to_quote(PriceOrigin::StaleFallback))
                    }
                    None => {
                        tracing::warn!(%metal, error = %e, "price source failed and no cache exists");
                        Err(NisabError::PriceUnavailable { metal })
                    }
                },
            }
        }

        /// Returns whatever cache exists without contacting the source.
        pub async fn cached_price(&self, metal: Metal) -> Result<PriceQuote, NisabError> {
            let now = self.clock.now();
            match self.latest_entry(metal).await? {
                Some(entry) if !entry.is_expired(now) => Ok(entry.to_quote(PriceOrigin::Live)),
                Some(entry) => Ok(entry.to_quote(PriceOrigin::StaleFallback)),
                None => Err(NisabError::PriceUnavailable { metal }),
            }
        }

        pub async fn threshold(&self, basis: NisabBasis) -> Result<ThresholdQuote, NisabError> {
            let price = self.get_price(basis.metal()).await?;
            Ok(ThresholdQuote::from_price(basis, price))
        }

        /// Threshold from cache, falling back to a live fetch only when nothing is cached.
        pub async fn cached_threshold(&self, basis: NisabBasis) -> Result<ThresholdQuote, NisabError> {
            let price = match self.cached_price(basis.metal()).await {
                Ok(price) => price,
                Err(NisabError::PriceUnavailable { .. }) => self.get_price(basis.metal()).await?,
                Err(e) => return Err(e),
            };
            Ok(ThresholdQuote::from_price(basis, price))
        }

        async fn fetch_valid(&self, metal: Metal) -> Result<Decimal, NisabError> {
            let price = self.source.fetch_price(metal).await?;
            if price <= Decimal::ZERO {
                return Err(NisabError::invalid_input("price", format!("non-positive {metal} price {price}")));
            }
            Ok(price)
        }

        async fn latest_entry(&self, metal: Metal) -> Result<Option<PriceCacheEntry>, NisabError> {
            let in_memory = self
                .memory
                .read()
                .map_err(|_| NisabError::storage("price cache lock poisoned"))?
                .get(&metal)
                .cloned();

            if let Some(entry) = in_memory {
                return Ok(Some(entry));
            }

            let persisted = self.repository.latest_price(metal).await?;
            if let Some(entry) = &persisted {
                if let Ok(mut memory) = self.memory.write() {
                    memory.entry(metal).or_insert_with(|| entry.clone());
                }
            }
            Ok(persisted)
        }

        async fn store(&self, entry: PriceCacheEntry) -> Result<(), NisabError> {
            self.repository.record_price(&entry).await?;
            let mut memory = self
                .memory
                .write()
                .map_err(|_| NisabError::storage("price cache lock poisoned"))?;
            memory.insert(entry.metal, entry);
            Ok(())
        }
    }
}

#[cfg(feature = "live-pricing")]
mod live {
    use super::*;
    use std::collections::HashMap;

    use super::oracle::PriceSource;
    use crate::types::NisabError;

    /// Network configuration for live price sources.
    #[derive(Debug, Clone)]
    pub struct NetworkConfig {
        pub timeout_seconds: u64,
        pub base_url: String,
        pub api_key: Option<String>,
        pub currency: String,
    }

    impl Default for NetworkConfig {
        fn default() -> Self {
            Self {
                timeout_seconds: 10,
                base_url: "https://metals-api.com/api".to_string(),
                api_key: None,
                currency: "USD".to_string(),
            }
        }
    }

    impl NetworkConfig {
        /// Defaults, quoting prices in the tracker's currency.
        pub fn for_tracker(config: &crate::config::TrackerConfig) -> Self {
            Self {
                currency: config.currency.clone(),
                ..Self::default()
            }
        }
    }

    #[derive(serde::Deserialize)]
    struct LatestRates {
        #[serde(default)]
        success: Option<bool>,
        rates: HashMap<String, Decimal>,
    }

    /// Fetches live gold/silver prices from a metals-api compatible endpoint.
    ///
    /// The endpoint quotes how much metal (troy ounces) one unit of currency buys;
    /// the per-gram price is derived from its inverse.
    pub struct HttpPriceSource {
        client: reqwest::Client,
        config: NetworkConfig,
    }

    impl HttpPriceSource {
        pub fn new(config: NetworkConfig) -> Result<Self, NisabError> {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .map_err(|e| NisabError::Network { message: format!("HTTP client init failed: {}", e) })?;
            Ok(Self { client, config })
        }

        fn symbol(metal: Metal) -> &'static str {
            match metal {
                Metal::Gold => "XAU",
                Metal::Silver => "XAG",
            }
        }
    }

    #[async_trait::async_trait]
    impl PriceSource for HttpPriceSource {
        async fn fetch_price(&self, metal: Metal) -> Result<Decimal, NisabError> {
            let symbol = Self::symbol(metal);
            let url = format!("{}/latest", self.config.base_url.trim_end_matches('/'));

            let mut request = self
                .client
                .get(&url)
                .query(&[("base", self.config.currency.as_str()), ("symbols", symbol)]);
            if let Some(key) = &self.config.api_key {
                request = request.query(&[("access_key", key.as_str())]);
            }

            let response = request
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| NisabError::Network { message: format!("price API error: {}", e) })?;

            let body: LatestRates = response
                .json()
                .await
                .map_err(|e| NisabError::Network { message: format!("Failed to parse price response: {}", e) })?;

            if body.success == Some(false) {
                return Err(NisabError::Network { message: "price API reported failure".to_string() });
            }

            let rate = body
                .rates
                .get(symbol)
                .copied()
                .filter(|r| *r > Decimal::ZERO)
                .ok_or(NisabError::PriceUnavailable { metal })?;

            let price_per_ounce = Decimal::ONE
                .checked_div(rate)
                .ok_or(NisabError::PriceUnavailable { metal })?;
            Ok(price_per_ounce / OUNCE_TO_GRAM)
        }
    }
}
