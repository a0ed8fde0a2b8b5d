//! Where feed text comes from.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Instant;
use url::Url;

use super::common::{fetch_feed_data, validate_feed_url};
use crate::http_config::HttpConfig;
use crate::utils::{elapsed_ms, logging};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Full feed text.
    async fn fetch(&self) -> Result<String>;

    /// Short label for logs; never contains secrets from the URL.
    fn describe(&self) -> String;
}

/// Published calendar reachable over HTTPS.
pub struct HttpFeedSource {
    url: Url,
    config: HttpConfig,
}

impl HttpFeedSource {
    pub fn new(feed_url: &str) -> Result<Self> {
        Self::with_config(feed_url, HttpConfig::feed_fetch())
    }

    pub fn with_config(feed_url: &str, config: HttpConfig) -> Result<Self> {
        Ok(Self {
            url: validate_feed_url(feed_url)?,
            config,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<String> {
        let started = Instant::now();
        let body = fetch_feed_data(&self.url, &self.config).await?;
        logging::log_feed_fetch(&self.describe(), body.len(), elapsed_ms(started));
        Ok(body)
    }

    fn describe(&self) -> String {
        // feed paths usually embed a private token
        self.url.host_str().unwrap_or("feed").to_string()
    }
}

/// Feed text held in memory.
#[derive(Debug, Clone)]
pub struct StaticFeedSource {
    text: std::sync::Arc<tokio::sync::RwLock<String>>,
}

impl StaticFeedSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: std::sync::Arc::new(tokio::sync::RwLock::new(text.into())),
        }
    }

    /// Replace the text served by later fetches.
    pub async fn set(&self, text: impl Into<String>) {
        *self.text.write().await = text.into();
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self) -> Result<String> {
        Ok(self.text.read().await.clone())
    }

    fn describe(&self) -> String {
        "static feed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_serves_latest_text() {
        let source = StaticFeedSource::new("BEGIN:VCALENDAR\nEND:VCALENDAR\n");
        assert!(source.fetch().await.unwrap().starts_with("BEGIN:VCALENDAR"));

        let shared = source.clone();
        shared.set("changed").await;
        assert_eq!(source.fetch().await.unwrap(), "changed");
    }

    #[test]
    fn test_http_source_validates_and_hides_path() {
        let source = HttpFeedSource::new("webcal://calendar.example.com/private-token/basic.ics").unwrap();
        assert_eq!(source.url().scheme(), "https");
        assert_eq!(source.describe(), "calendar.example.com");

        assert!(HttpFeedSource::new("http://calendar.example.com/basic.ics").is_err());
    }
}
