use crm_core::{DEFAULT_BULK_CONCURRENCY, DEFAULT_PAGE_SIZE};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 750;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got '{value}'")]
    NotPositive { key: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub bulk_concurrency: usize,
    pub page_size: u32,
    pub poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            api_token: None,
            bulk_concurrency: DEFAULT_BULK_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values count as unset. Numbers must be positive.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Ok(Self {
            api_url: get("CRM_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            api_token: get("CRM_API_TOKEN"),
            bulk_concurrency: positive(get, "CRM_BULK_CONCURRENCY")?
                .map(|n| n as usize)
                .unwrap_or(defaults.bulk_concurrency),
            page_size: positive(get, "CRM_PAGE_SIZE")?
                .map(|n| n.min(u64::from(u32::MAX)) as u32)
                .unwrap_or(defaults.page_size),
            poll_interval: positive(get, "CRM_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        })
    }
}

fn positive(
    get: impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::NotPositive { key, value: raw }),
    }
}

/// `CRM_LOG` wins over `RUST_LOG`; default is `info`.
pub fn init_tracing() {
    let filter = std::env::var("CRM_LOG")
        .ok()
        .and_then(|v| tracing_subscriber::EnvFilter::try_new(v).ok())
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
