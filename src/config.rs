//! Client configuration

use crate::error::{ClientError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable holding the API base URL
pub const BASE_URL_ENV: &str = "TEZTAOM_API_BASE_URL";
/// Environment variable overriding the request timeout
pub const TIMEOUT_ENV: &str = "TEZTAOM_API_TIMEOUT_SECS";

/// Configuration shared by the refresh client and the authenticated pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:8000`. Trailing slashes are ignored.
    pub base_url: String,

    /// Request timeout in seconds.
    /// Default: 30 seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    /// Default: 10 seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Read configuration from `TEZTAOM_API_BASE_URL` and `TEZTAOM_API_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(BASE_URL_ENV)
            .map_err(|_| ClientError::Configuration(format!("{BASE_URL_ENV} is not set")))?;

        let mut config = Self::new(base_url);
        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            config.timeout_secs = raw.trim().parse().map_err(|e| {
                ClientError::Configuration(format!("Invalid {TIMEOUT_ENV} value {raw:?}: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the base URL and timeouts are usable
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url();
        if base.is_empty() {
            return Err(ClientError::Configuration("base_url must not be empty".to_string()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ClientError::Configuration(format!(
                "base_url must start with http:// or https://, got {base}"
            )));
        }
        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return Err(ClientError::Configuration(
                "timeout_secs must be between 1 and 300".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > 60 {
            return Err(ClientError::Configuration(
                "connect_timeout_secs must be between 1 and 60".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without trailing slashes
    pub fn base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("teztaom-rs-client/", env!("CARGO_PKG_VERSION")).to_string()
}
