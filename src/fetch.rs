//! HTTP client construction and page fetching for the web harvesters.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use std::time::Duration;

use crate::config::HarvestConfig;

/// Build the shared HTTP client. One client per harvest run; reqwest pools
/// connections internally.
pub fn build_client(config: &HarvestConfig) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(&config.user_agent)
        .build()?;
    Ok(client)
}

/// Fetch a page and return its body. Non-2xx statuses are errors.
pub async fn fetch_html(client: &Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request failed for {}", url))?;

    let status = resp.status();
    if !status.is_success() {
        bail!("HTTP {} for {}", status, url);
    }

    let body = resp
        .text()
        .await
        .with_context(|| format!("Failed to read body from {}", url))?;
    Ok(body)
}
