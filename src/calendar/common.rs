use crate::http_config::HttpConfig;
use crate::utils::circuit_breaker::get_circuit_breaker;
use crate::utils::retry::retry_with_exponential_backoff;
use anyhow::{anyhow, Context, Result};
use log::warn;
use std::net::IpAddr;
use url::Url;

/// Check a feed URL and return the URL to actually request.
///
/// `webcal://` is the same feed over HTTPS. Plain HTTP and local or private
/// hosts are refused.
pub fn validate_feed_url(feed_url: &str) -> Result<Url> {
    let trimmed = feed_url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!(
            "Feed URL cannot be empty. Please provide a valid calendar feed URL."
        ));
    }

    let mut parsed_url = Url::parse(trimmed).map_err(|e| {
        anyhow!(
            "Invalid feed URL format: {}. Please ensure the URL is properly formatted (e.g., https://calendar.example.com/path/calendar.ics)",
            e
        )
    })?;

    match parsed_url.scheme() {
        "https" => {}
        "webcal" | "webcals" => {
            // the url crate cannot switch a non-special scheme to https in place
            let rest = &parsed_url.as_str()[parsed_url.scheme().len()..];
            parsed_url = Url::parse(&format!("https{}", rest))
                .map_err(|e| anyhow!("Could not rewrite webcal URL to HTTPS: {}", e))?;
        }
        other => {
            return Err(anyhow!(
                "Feed URL must use HTTPS (or webcal). Your URL starts with '{}://'.",
                other
            ))
        }
    }

    let host = parsed_url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| anyhow!("Feed URL must have a valid host name."))?;

    if is_local_host(host) {
        return Err(anyhow!(
            "Feed URL cannot point to localhost or local network addresses. \
             Please use a publicly accessible calendar URL."
        ));
    }

    let path = parsed_url.path().to_lowercase();
    if path.is_empty() || path == "/" {
        warn!("Feed URL has no path component; it may not be a calendar feed");
    } else if !path.ends_with(".ics") && !path.contains("calendar") && !path.contains("ical") {
        warn!("Feed URL path does not look like a calendar feed (expected .ics or a calendar path)");
    }

    Ok(parsed_url)
}

fn is_local_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified(),
        Ok(IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified() || (ip.segments()[0] & 0xfe00) == 0xfc00,
        Err(_) => false,
    }
}

/// Reject bodies that are obviously not iCalendar (login pages, error pages).
pub fn check_feed_body(content: &str) -> Result<()> {
    let head = content.trim_start().get(..64).unwrap_or(content.trim_start()).to_ascii_lowercase();
    if head.starts_with("<!doctype") || head.starts_with("<html") {
        return Err(anyhow!(
            "The server returned HTML instead of a calendar file. Please use the secret iCal address from your calendar settings, not the web page URL."
        ));
    }
    if !content.contains("BEGIN:VCALENDAR") {
        warn!("Feed body does not contain BEGIN:VCALENDAR");
    }
    Ok(())
}

/// Fetch a feed with retry and the per-host circuit breaker.
pub async fn fetch_feed_data(url: &Url, config: &HttpConfig) -> Result<String> {
    let client = config.build_client()?;
    let retry_config = config.to_retry_config();
    let host = url.host_str().unwrap_or("unknown").to_string();
    let breaker = get_circuit_breaker(&host).await;

    let client = &client;
    let retry_config = &retry_config;
    breaker
        .execute(move || async move {
            retry_with_exponential_backoff(retry_config, || {
                let client = client.clone();
                let url = url.clone();
                async move {
                    let response = client.get(url).send().await.context("Request failed")?;

                    let status = response.status();
                    if !status.is_success() {
                        return Err(anyhow!("HTTP {}", status));
                    }

                    let content = response.text().await.context("Failed to read response body")?;
                    check_feed_body(&content)?;
                    Ok(content)
                }
            })
            .await
        })
        .await
}
