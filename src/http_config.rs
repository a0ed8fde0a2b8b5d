//! HTTP client configuration module
//!
//! Timeouts, retry policy and connection settings for feed downloads.

use anyhow::{Context, Result};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

use crate::utils::retry::RetryConfig;

pub const USER_AGENT: &str = concat!("feedsync/", env!("CARGO_PKG_VERSION"));

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Total request timeout
    pub timeout: Duration,
    /// Maximum number of attempts per fetch
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_retry_delay: Duration,
    /// Maximum retry delay
    pub max_retry_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(45),
            max_retries: 3,
            base_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Large published calendars can take a while to render server-side.
    pub fn feed_fetch() -> Self {
        let retry = RetryConfig::feed_fetch();
        Self {
            connect_timeout: Duration::from_secs(20),
            timeout: Duration::from_secs(120),
            max_retries: retry.max_attempts,
            base_retry_delay: retry.base_delay,
            max_retry_delay: retry.max_delay,
            backoff_multiplier: retry.backoff_multiplier,
            ..Self::default()
        }
    }

    /// Build a reqwest client with this configuration
    pub fn build_client(&self) -> Result<Client> {
        ClientBuilder::new()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to build HTTP client")
    }

    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            base_delay: self.base_retry_delay,
            max_delay: self.max_retry_delay,
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}
