//! Harvester for a consolidated Act or Regulation.
//!
//! Two fetches per source: the table-of-contents page, walked down to its
//! leaf entries, and the full-text page, which every leaf's section is sliced
//! out of by anchor. Leaves without an anchor, or whose anchor yields no
//! text, are skipped with a warning.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use scraper::Html;
use url::Url;

use crate::config::StatuteSource;
use crate::fetch;
use crate::html;
use crate::models::PageRecord;

pub async fn harvest(client: &Client, source: &StatuteSource) -> Result<Vec<PageRecord>> {
    let toc_body = fetch::fetch_html(client, &source.toc_url).await?;
    let leaves = {
        let doc = Html::parse_document(&toc_body);
        html::statute_toc_leaves(&doc, &source.root_label)
    };
    if leaves.is_empty() {
        bail!("No table of contents found at {}", source.toc_url);
    }
    println!("  {} leaf entries in contents", leaves.len());

    let full_body = fetch::fetch_html(client, &source.full_text_url).await?;
    let full_url = Url::parse(&source.full_text_url)
        .with_context(|| format!("Invalid full_text_url: {}", source.full_text_url))?;

    let mut records = Vec::new();
    let mut fallback_counter = 1usize;
    let mut skipped = 0usize;

    // One parse of the full text serves every leaf
    let doc = Html::parse_document(&full_body);
    for leaf in &leaves {
        let Some(fragment) = &leaf.fragment else {
            eprintln!("Warning: no anchor for '{}', skipping", leaf.title);
            skipped += 1;
            continue;
        };

        let text = match html::section_text(&doc, fragment) {
            Some(text) if !text.is_empty() => text,
            _ => {
                eprintln!(
                    "Warning: no text at anchor '{}' for '{}', skipping",
                    fragment, leaf.title
                );
                skipped += 1;
                continue;
            }
        };

        let url = match full_url.join(&format!("#{}", fragment)) {
            Ok(url) => url.to_string(),
            Err(_) => source.full_text_url.clone(),
        };

        let id = match &leaf.section_label {
            Some(label) => format!("{}-{}", source.id_prefix, label),
            None => {
                let id = format!(
                    "{}-{}-{}",
                    source.id_prefix, source.fallback_label, fallback_counter
                );
                fallback_counter += 1;
                id
            }
        };

        records.push(PageRecord {
            id,
            title: leaf.title.clone(),
            url,
            section_label: leaf.section_label.clone(),
            hierarchy: leaf.hierarchy.clone(),
            hierarchy_urls: Vec::new(),
            linked_pages: Vec::new(),
            body: text,
        });
    }

    if skipped > 0 {
        println!("  skipped {} entries without usable text", skipped);
    }

    Ok(records)
}
