//! Client configuration from environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::ws::{Endpoint, ReconnectPolicy, ReconnectSettings};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";
pub const DEFAULT_FINGERPRINT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} `{value}`: {source}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base of the REST API, e.g. `http://localhost:8000/api`.
    pub api_base_url: String,
    /// Base of the push endpoint; topics live at `{ws_base_url}/ws/{id}`.
    pub ws_base_url: String,
    pub reconnect: ReconnectSettings,
    /// Upper bound on one device fingerprint computation.
    pub fingerprint_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_base_url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectSettings::default(),
            fingerprint_timeout: DEFAULT_FINGERPRINT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `QUICKPOLL_API_URL` (default: `http://localhost:8000/api`)
    /// - `QUICKPOLL_WS_URL` (default: `ws://localhost:8000`)
    /// - `QUICKPOLL_TOPIC_MAX_ATTEMPTS` (default: 5)
    /// - `QUICKPOLL_TOPIC_BASE_DELAY_MS` (default: 1000)
    /// - `QUICKPOLL_GLOBAL_DELAY_MS` (default: 3000)
    /// - `QUICKPOLL_FINGERPRINT_TIMEOUT_MS` (default: 5000)
    ///
    /// Unparseable numbers fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |name: &str, default: Duration| {
            number(name).map(Duration::from_millis).unwrap_or(default)
        };

        let max_attempts = number("QUICKPOLL_TOPIC_MAX_ATTEMPTS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(ReconnectPolicy::TOPIC_MAX_ATTEMPTS);

        Self {
            api_base_url: lookup("QUICKPOLL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            ws_base_url: lookup("QUICKPOLL_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            reconnect: ReconnectSettings {
                topic: ReconnectPolicy::Linear {
                    max_attempts,
                    base_delay: millis(
                        "QUICKPOLL_TOPIC_BASE_DELAY_MS",
                        ReconnectPolicy::TOPIC_BASE_DELAY,
                    ),
                },
                global: ReconnectPolicy::Fixed {
                    delay: millis("QUICKPOLL_GLOBAL_DELAY_MS", ReconnectPolicy::GLOBAL_DELAY),
                },
            },
            fingerprint_timeout: millis(
                "QUICKPOLL_FINGERPRINT_TIMEOUT_MS",
                DEFAULT_FINGERPRINT_TIMEOUT,
            ),
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.ws_base_url).map_err(|source| ConfigError::InvalidUrl {
            name: "QUICKPOLL_WS_URL",
            value: self.ws_base_url.clone(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.api_base_url).map_err(|source| ConfigError::InvalidUrl {
            name: "QUICKPOLL_API_URL",
            value: self.api_base_url.clone(),
            source,
        })?;
        self.endpoint().map(|_| ())
    }
}
