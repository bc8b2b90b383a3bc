// Checkout configuration
// Plain struct with sane defaults; shells override what they need or load from the environment.

use anyhow::{bail, Context};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_EXCHANGE_RATE_URL: &str = "https://api.exchangerate-api.com/v4/latest/USD";

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub api_base_url: String,
    pub exchange_rate_url: String,
    pub request_timeout_ms: u64,
    pub default_currency: String,
    pub snapshot_ttl_seconds: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            exchange_rate_url: DEFAULT_EXCHANGE_RATE_URL.to_string(),
            request_timeout_ms: 10_000,
            default_currency: "USD".to_string(),
            snapshot_ttl_seconds: 3600,
        }
    }
}

impl CheckoutConfig {
    // Defaults overlaid with `CHECKOUT_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    // Same as from_env but with an injectable lookup so tests don't touch the process env
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CHECKOUT_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = lookup("CHECKOUT_EXCHANGE_RATE_URL") {
            config.exchange_rate_url = url;
        }
        if let Some(raw) = lookup("CHECKOUT_TIMEOUT_MS") {
            config.request_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("CHECKOUT_TIMEOUT_MS is not a number: {raw:?}"))?;
        }
        if let Some(currency) = lookup("CHECKOUT_DEFAULT_CURRENCY") {
            config.default_currency = currency.trim().to_uppercase();
        }
        if let Some(raw) = lookup("CHECKOUT_SNAPSHOT_TTL_SECONDS") {
            config.snapshot_ttl_seconds = raw.trim().parse().with_context(|| {
                format!("CHECKOUT_SNAPSHOT_TTL_SECONDS is not a number: {raw:?}")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_base_url.trim().is_empty() {
            bail!("api_base_url must not be empty");
        }
        if self.exchange_rate_url.trim().is_empty() {
            bail!("exchange_rate_url must not be empty");
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        if self.default_currency.len() != 3 {
            bail!(
                "default_currency must be a 3-letter ISO code, got {:?}",
                self.default_currency
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn snapshot_ttl(&self) -> Option<Duration> {
        match self.snapshot_ttl_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
