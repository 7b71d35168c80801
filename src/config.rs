use std::time::Duration;

use crate::upstream::PollCategory;
use crate::utils::RetryConfig;

// ============================================================================
// Configuration
// ============================================================================
//
// Everything is read from environment variables (a `.env` file is loaded by
// the binary when present). Parsing goes through a lookup function so tests
// can supply values without touching the process environment.
//
// ============================================================================

pub const DEFAULT_API_URL: &str = "https://merchant-api.ifood.com.br";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Per-category polling settings
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::backoff(self.base, self.cap)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupConfig {
    pub retention: Duration,
    pub capacity: usize,
}

/// Optional upstream side effects of the lifecycle engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub auto_confirm: bool,
    pub cancel_on_stock_shortfall: bool,
    pub cancellation_reason_code: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            auto_confirm: false,
            cancel_on_stock_shortfall: false,
            cancellation_reason_code: "503".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream base URL
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Merchants to poll; empty means discover through the merchant list
    pub merchant_ids: Vec<String>,
    /// Postgres URL; unset runs on the in-memory store
    pub database_url: Option<String>,
    pub orders: PollSettings,
    pub merchant: PollSettings,
    /// Upper bound of events handled per fetch
    pub page_size: usize,
    pub backoff: BackoffConfig,
    pub token_safety_margin: Duration,
    pub dedup: DedupConfig,
    pub request_timeout: Duration,
    pub metrics_port: u16,
    pub engine: EngineOptions,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        Ok(Self {
            api_url: get("IFOOD_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client_id: require("IFOOD_CLIENT_ID")?,
            client_secret: require("IFOOD_CLIENT_SECRET")?,
            merchant_ids: get("IFOOD_MERCHANT_IDS")
                .map(|ids| {
                    ids.split(',')
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            database_url: get("DATABASE_URL"),
            orders: PollSettings {
                enabled: parse_or(get("POLL_ORDERS_ENABLED"), "POLL_ORDERS_ENABLED", true)?,
                interval: secs(parse_or(
                    get("POLL_INTERVAL_ORDERS_SECS"),
                    "POLL_INTERVAL_ORDERS_SECS",
                    30,
                )?),
            },
            merchant: PollSettings {
                enabled: parse_or(get("POLL_MERCHANT_ENABLED"), "POLL_MERCHANT_ENABLED", true)?,
                interval: secs(parse_or(
                    get("POLL_INTERVAL_MERCHANT_SECS"),
                    "POLL_INTERVAL_MERCHANT_SECS",
                    60,
                )?),
            },
            page_size: positive(parse_or(get("POLL_PAGE_SIZE"), "POLL_PAGE_SIZE", 100)?, "POLL_PAGE_SIZE")?,
            backoff: BackoffConfig {
                base: Duration::from_millis(parse_or(get("BACKOFF_BASE_MS"), "BACKOFF_BASE_MS", 1_000)?),
                cap: Duration::from_millis(parse_or(get("BACKOFF_CAP_MS"), "BACKOFF_CAP_MS", 120_000)?),
            },
            token_safety_margin: secs(parse_or(
                get("TOKEN_SAFETY_MARGIN_SECS"),
                "TOKEN_SAFETY_MARGIN_SECS",
                60,
            )?),
            dedup: DedupConfig {
                retention: secs(parse_or(get("DEDUP_RETENTION_SECS"), "DEDUP_RETENTION_SECS", 3_600)?),
                capacity: positive(parse_or(get("DEDUP_CAPACITY"), "DEDUP_CAPACITY", 10_000)?, "DEDUP_CAPACITY")?,
            },
            request_timeout: secs(parse_or(get("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS", 30)?),
            metrics_port: parse_or(get("METRICS_PORT"), "METRICS_PORT", 9090)?,
            engine: EngineOptions {
                auto_confirm: parse_or(get("AUTO_CONFIRM_ORDERS"), "AUTO_CONFIRM_ORDERS", false)?,
                cancel_on_stock_shortfall: parse_or(
                    get("CANCEL_ON_STOCK_SHORTFALL"),
                    "CANCEL_ON_STOCK_SHORTFALL",
                    false,
                )?,
                cancellation_reason_code: get("CANCELLATION_REASON_CODE")
                    .unwrap_or_else(|| "503".to_string()),
            },
        })
    }

    pub fn poll_settings(&self, category: PollCategory) -> &PollSettings {
        match category {
            PollCategory::Orders => &self.orders,
            PollCategory::Merchant => &self.merchant,
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn positive(value: usize, name: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("IFOOD_CLIENT_ID", "id"),
            ("IFOOD_CLIENT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.orders.interval, Duration::from_secs(30));
        assert_eq!(config.merchant.interval, Duration::from_secs(60));
        assert!(config.orders.enabled && config.merchant.enabled);
        assert_eq!(config.backoff.base, Duration::from_millis(1_000));
        assert_eq!(config.backoff.cap, Duration::from_millis(120_000));
        assert_eq!(config.token_safety_margin, Duration::from_secs(60));
        assert_eq!(config.dedup.capacity, 10_000);
        assert!(config.merchant_ids.is_empty());
        assert!(config.database_url.is_none());
        assert_eq!(config.engine, EngineOptions::default());
    }

    #[test]
    fn test_missing_credentials() {
        let err = Config::from_lookup(lookup(&[("IFOOD_CLIENT_ID", "id")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("IFOOD_CLIENT_SECRET"));
    }

    #[test]
    fn test_overrides_and_merchant_list() {
        let config = Config::from_lookup(lookup(&[
            ("IFOOD_CLIENT_ID", "id"),
            ("IFOOD_CLIENT_SECRET", "secret"),
            ("IFOOD_API_URL", "http://localhost:8080/"),
            ("IFOOD_MERCHANT_IDS", "m-1, m-2,,"),
            ("POLL_MERCHANT_ENABLED", "false"),
            ("POLL_INTERVAL_ORDERS_SECS", "5"),
            ("AUTO_CONFIRM_ORDERS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.merchant_ids, vec!["m-1", "m-2"]);
        assert!(!config.poll_settings(PollCategory::Merchant).enabled);
        assert_eq!(config.poll_settings(PollCategory::Orders).interval, Duration::from_secs(5));
        assert!(config.engine.auto_confirm);
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = Config::from_lookup(lookup(&[
            ("IFOOD_CLIENT_ID", "id"),
            ("IFOOD_CLIENT_SECRET", "secret"),
            ("BACKOFF_CAP_MS", "soon"),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "BACKOFF_CAP_MS",
                value: "soon".to_string()
            }
        );
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("IFOOD_CLIENT_ID", "id"),
            ("IFOOD_CLIENT_SECRET", "secret"),
            ("POLL_PAGE_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "POLL_PAGE_SIZE", .. }));
    }
}
