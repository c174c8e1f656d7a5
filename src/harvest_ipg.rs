//! Harvester for the guidance-document (IPG) index.
//!
//! One fetch of the index page yields (number, title, link) rows from its
//! tables; each linked document is then fetched through the worker pool and
//! recorded with the table title as its hierarchy and the published number
//! as its ID. Failed pages are logged and dropped.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::Html;
use url::Url;

use crate::config::{HarvestConfig, IpgSource};
use crate::fetch;
use crate::html;
use crate::html::IpgRow;
use crate::models::PageRecord;

pub async fn harvest(
    config: &HarvestConfig,
    client: &Client,
    source: &IpgSource,
) -> Result<Vec<PageRecord>> {
    let index_body = fetch::fetch_html(client, &source.index_url).await?;
    let rows = {
        let doc = Html::parse_document(&index_body);
        html::ipg_rows(&doc)
    };
    println!("  {} documents listed", rows.len());

    let base_url = Url::parse(&config.base_url)
        .with_context(|| format!("Invalid base_url: {}", config.base_url))?;

    let results = stream::iter(rows)
        .map(|row| fetch_document(client, &base_url, row))
        .buffer_unordered(config.concurrent_fetches)
        .collect::<Vec<_>>()
        .await;

    Ok(results.into_iter().flatten().collect())
}

async fn fetch_document(client: &Client, base_url: &Url, row: IpgRow) -> Option<PageRecord> {
    let url = match base_url.join(&row.href) {
        Ok(url) => url.to_string(),
        Err(e) => {
            eprintln!("Warning: bad link '{}' for {}: {}", row.href, row.number, e);
            return None;
        }
    };

    let body = match fetch::fetch_html(client, &url).await {
        Ok(body) => body,
        Err(e) => {
            eprintln!("Warning: skipping {}: {}", url, e);
            return None;
        }
    };

    let (text, linked_pages) = {
        let doc = Html::parse_document(&body);
        html::main_content(&doc)
    };
    println!("  {} {}", row.number, row.title);

    Some(PageRecord {
        id: row.number,
        title: row.title,
        url,
        section_label: None,
        hierarchy: vec![row.table_title],
        hierarchy_urls: Vec::new(),
        linked_pages,
        body: text,
    })
}
