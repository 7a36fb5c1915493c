//! Host configuration loaded from environment variables.
//!
//! `from_env` reads the process environment (after `dotenvy` has loaded a
//! `.env` file, if any). `from_lookup` takes any lookup function so tests do
//! not touch the process environment.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use taskboard_core::CacheConfig;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the tasks API, without a trailing slash.
    pub api_url: String,
    pub cache: CacheConfig,
    /// Extra attempts for failed reads.
    pub retries: u32,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            cache: CacheConfig::default(),
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let api_url = match lookup("TASKBOARD_API_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    key: "TASKBOARD_API_URL",
                    message: "must not be empty".to_string(),
                })
            }
            Some(url) => url.trim().trim_end_matches('/').to_string(),
            None => defaults.api_url,
        };

        Ok(Self {
            api_url,
            cache: CacheConfig {
                stale_after: millis(&lookup, "TASKBOARD_STALE_MS")?.unwrap_or(defaults.cache.stale_after),
                gc_after: millis(&lookup, "TASKBOARD_GC_MS")?.unwrap_or(defaults.cache.gc_after),
            },
            retries: number(&lookup, "TASKBOARD_RETRIES")?.unwrap_or(defaults.retries),
            timeout: millis(&lookup, "TASKBOARD_TIMEOUT_MS")?.unwrap_or(defaults.timeout),
        })
    }

    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_url = url.trim_end_matches('/').to_string();
        self
    }
}

fn number<N>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<N>, ConfigError>
where
    N: FromStr,
    N::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<N>().map_err(|err| ConfigError::InvalidValue {
                key,
                message: format!("{raw:?}: {err}"),
            })
        })
        .transpose()
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(number(lookup, key)?.map(Duration::from_millis))
}
