use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use crate::builder::{Builder, Validate};
use crate::methodology::Methodology;
use crate::types::NisabError;

/// Runtime settings of the tracking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Lifetime of a freshly fetched metal price.
    pub price_ttl_hours: u32,
    /// Age past which a stale fallback price must be flagged to the user.
    pub stale_warning_days: u32,
    /// Minimum length, in characters, of an unlock justification.
    pub unlock_reason_min_chars: usize,
    /// Period of the background detection sweep.
    pub sweep_interval_secs: u64,
    /// Upper bound on users processed concurrently during a sweep.
    pub max_concurrent_users: usize,
    /// Deadline for one holdings lookup.
    pub aggregation_timeout_secs: u64,
    /// Methodology used for user-created records when none is given.
    pub default_methodology: Methodology,
    /// ISO currency code prices and records are denominated in.
    pub currency: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            price_ttl_hours: 24,
            stale_warning_days: 7,
            unlock_reason_min_chars: 10,
            sweep_interval_secs: 3600,
            max_concurrent_users: 8,
            aggregation_timeout_secs: 10,
            default_methodology: Methodology::default(),
            currency: "USD".to_string(),
        }
    }
}

impl FromStr for TrackerConfig {
    type Err = NisabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: TrackerConfig = serde_json::from_str(s).map_err(|e| NisabError::Configuration {
            message: format!("Failed to parse config JSON: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl TrackerConfig {
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<(), NisabError> {
        if self.price_ttl_hours == 0 {
            return Err(config_error("price_ttl_hours must be > 0"));
        }
        if self.unlock_reason_min_chars == 0 {
            return Err(config_error("unlock_reason_min_chars must be > 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(config_error("sweep_interval_secs must be > 0"));
        }
        if self.max_concurrent_users == 0 {
            return Err(config_error("max_concurrent_users must be > 0"));
        }
        if self.aggregation_timeout_secs == 0 {
            return Err(config_error("aggregation_timeout_secs must be > 0"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(config_error("currency must be a 3-letter ISO code"));
        }
        Ok(())
    }

    /// Loads overrides from `NISAB_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, NisabError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("NISAB_PRICE_TTL_HOURS")? {
            config.price_ttl_hours = v;
        }
        if let Some(v) = env_parse::<u32>("NISAB_STALE_WARNING_DAYS")? {
            config.stale_warning_days = v;
        }
        if let Some(v) = env_parse::<usize>("NISAB_UNLOCK_REASON_MIN_CHARS")? {
            config.unlock_reason_min_chars = v;
        }
        if let Some(v) = env_parse::<u64>("NISAB_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval_secs = v;
        }
        if let Some(v) = env_parse::<usize>("NISAB_MAX_CONCURRENT_USERS")? {
            config.max_concurrent_users = v;
        }
        if let Some(v) = env_parse::<u64>("NISAB_AGGREGATION_TIMEOUT_SECS")? {
            config.aggregation_timeout_secs = v;
        }
        if let Some(v) = env_parse::<Methodology>("NISAB_DEFAULT_METHODOLOGY")? {
            config.default_methodology = v;
        }
        if let Ok(v) = env::var("NISAB_CURRENCY") {
            config.currency = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Attempts to load configuration from a JSON file.
    pub fn try_from_json(path: &str) -> Result<Self, NisabError> {
        let content = fs::read_to_string(path).map_err(|e| NisabError::Configuration {
            message: format!("Failed to read config file: {}", e),
        })?;
        content.parse()
    }

    pub fn price_ttl(&self) -> ChronoDuration {
        ChronoDuration::hours(i64::from(self.price_ttl_hours))
    }

    pub fn stale_warning_age(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.stale_warning_days))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn aggregation_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregation_timeout_secs)
    }
}

fn config_error(message: &str) -> NisabError {
    NisabError::Configuration { message: message.to_string() }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, NisabError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| NisabError::Configuration {
            message: format!("Invalid value for {}: {}", key, e),
        }),
        Err(_) => Ok(None),
    }
}

// ========== TrackerConfigBuilder ==========

#[derive(Default)]
pub struct TrackerConfigBuilder {
    price_ttl_hours: Option<u32>,
    stale_warning_days: Option<u32>,
    unlock_reason_min_chars: Option<usize>,
    sweep_interval_secs: Option<u64>,
    max_concurrent_users: Option<usize>,
    aggregation_timeout_secs: Option<u64>,
    default_methodology: Option<Methodology>,
    currency: Option<String>,
}

impl TrackerConfigBuilder {
    pub fn price_ttl_hours(mut self, hours: u32) -> Self {
        self.price_ttl_hours = Some(hours);
        self
    }

    pub fn stale_warning_days(mut self, days: u32) -> Self {
        self.stale_warning_days = Some(days);
        self
    }

    pub fn unlock_reason_min_chars(mut self, chars: usize) -> Self {
        self.unlock_reason_min_chars = Some(chars);
        self
    }

    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = Some(secs);
        self
    }

    pub fn max_concurrent_users(mut self, n: usize) -> Self {
        self.max_concurrent_users = Some(n);
        self
    }

    pub fn aggregation_timeout_secs(mut self, secs: u64) -> Self {
        self.aggregation_timeout_secs = Some(secs);
        self
    }

    pub fn default_methodology(mut self, methodology: Methodology) -> Self {
        self.default_methodology = Some(methodology);
        self
    }

    pub fn currency(mut self, code: impl Into<String>) -> Self {
        self.currency = Some(code.into());
        self
    }

    fn assemble(&self) -> TrackerConfig {
        let defaults = TrackerConfig::default();
        TrackerConfig {
            price_ttl_hours: self.price_ttl_hours.unwrap_or(defaults.price_ttl_hours),
            stale_warning_days: self.stale_warning_days.unwrap_or(defaults.stale_warning_days),
            unlock_reason_min_chars: self.unlock_reason_min_chars.unwrap_or(defaults.unlock_reason_min_chars),
            sweep_interval_secs: self.sweep_interval_secs.unwrap_or(defaults.sweep_interval_secs),
            max_concurrent_users: self.max_concurrent_users.unwrap_or(defaults.max_concurrent_users),
            aggregation_timeout_secs: self.aggregation_timeout_secs.unwrap_or(defaults.aggregation_timeout_secs),
            default_methodology: self.default_methodology.unwrap_or(defaults.default_methodology),
            currency: self.currency.clone().unwrap_or(defaults.currency),
        }
    }
}

impl Validate for TrackerConfigBuilder {
    fn validate(&self) -> Result<(), NisabError> {
        self.assemble().validate()
    }
}

impl Builder<TrackerConfig> for TrackerConfigBuilder {
    fn build(self) -> Result<TrackerConfig, NisabError> {
        Validate::validate(&self)?;
        Ok(self.assemble())
    }
}
