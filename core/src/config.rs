//! Client configuration and environment loading.
//!
//! # Design
//! Values come from three layers, first hit wins: the process environment,
//! the environment captured at build time (`option_env!`), then the built-in
//! defaults. `from_lookup` takes the lookup function so tests never mutate
//! the real process environment.

use std::time::Duration;

use thiserror::Error;

use crate::http::ContentType;
use crate::notify::DEFAULT_NOTICE_WINDOW;
use crate::retry::{DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY};

pub const ENV_BASE_URL: &str = "ENVELOPE_API_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "ENVELOPE_API_TIMEOUT_MS";
pub const ENV_URL_PREFIX: &str = "ENVELOPE_URL_PREFIX";
pub const ENV_MODE: &str = "ENVELOPE_MODE";
pub const ENV_RETRY_COUNT: &str = "ENVELOPE_RETRY_COUNT";
pub const ENV_RETRY_DELAY_MS: &str = "ENVELOPE_RETRY_DELAY_MS";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be `development` or `production`, got {value:?}")]
    InvalidMode { name: &'static str, value: String },
}

/// Deployment mode. Development routes every path through `url_prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Development,
    #[default]
    Production,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub url_prefix: Option<String>,
    pub mode: Mode,
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub notice_window: Duration,
    /// Append `_t=<unix millis>` to GET query strings.
    pub cache_bust_get: bool,
    pub content_type: ContentType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            url_prefix: None,
            mode: Mode::default(),
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            notice_window: DEFAULT_NOTICE_WINDOW,
            cache_bust_get: false,
            content_type: ContentType::Json,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| lookup(name).or_else(|| build_time(name).map(str::to_string));
        let mut config = Self::default();

        if let Some(base_url) = read(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(prefix) = read(ENV_URL_PREFIX).filter(|prefix| !prefix.is_empty()) {
            config.url_prefix = Some(prefix);
        }
        if let Some(mode) = read(ENV_MODE) {
            config.mode = parse_mode(ENV_MODE, &mode)?;
        }
        if let Some(ms) = read(ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(parse_number(ENV_TIMEOUT_MS, &ms)?);
        }
        if let Some(count) = read(ENV_RETRY_COUNT) {
            let count = parse_number(ENV_RETRY_COUNT, &count)?;
            config.retry_count = u32::try_from(count).map_err(|_| ConfigError::InvalidNumber {
                name: ENV_RETRY_COUNT,
                value: count.to_string(),
            })?;
        }
        if let Some(ms) = read(ENV_RETRY_DELAY_MS) {
            config.retry_delay = Duration::from_millis(parse_number(ENV_RETRY_DELAY_MS, &ms)?);
        }
        Ok(config)
    }

    /// Resolve a request path against the base URL and, in development, the
    /// proxy prefix. Absolute URLs pass through untouched.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let prefix = match (self.mode, self.url_prefix.as_deref()) {
            (Mode::Development, Some(prefix)) => prefix.trim_end_matches('/'),
            _ => "",
        };
        let separator = if path.starts_with('/') || path.is_empty() { "" } else { "/" };
        format!("{base}{prefix}{separator}{path}")
    }
}

fn build_time(name: &str) -> Option<&'static str> {
    match name {
        ENV_BASE_URL => option_env!("ENVELOPE_API_BASE_URL"),
        ENV_TIMEOUT_MS => option_env!("ENVELOPE_API_TIMEOUT_MS"),
        ENV_URL_PREFIX => option_env!("ENVELOPE_URL_PREFIX"),
        ENV_MODE => option_env!("ENVELOPE_MODE"),
        ENV_RETRY_COUNT => option_env!("ENVELOPE_RETRY_COUNT"),
        ENV_RETRY_DELAY_MS => option_env!("ENVELOPE_RETRY_DELAY_MS"),
        _ => None,
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

fn parse_mode(name: &'static str, value: &str) -> Result<Mode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "development" | "dev" => Ok(Mode::Development),
        "production" | "prod" => Ok(Mode::Production),
        _ => Err(ConfigError::InvalidMode {
            name,
            value: value.to_string(),
        }),
    }
}
