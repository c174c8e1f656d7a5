//! Recursive crawler for guidance-page trees.
//!
//! Starts at a configured root page and walks same-site links. Pages holding
//! a table of contents (`ul.toc`) are not recorded themselves; each TOC entry
//! is followed at the same depth with TOC detection switched off, so a
//! chaptered guide collapses into its chapter pages. Leaf pages yield one
//! [`PageRecord`] and, while depth allows, fan out to the links found in
//! their main content.
//!
//! A shared visited set claims every URL before it is scheduled; claiming is
//! the `HashSet::insert` itself, so two branches discovering the same link in
//! one parallel wave cannot both fetch it. Fetch and parse failures are
//! logged and produce an empty branch.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::Html;
use std::collections::HashSet;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{GuideSource, HarvestConfig};
use crate::fetch;
use crate::html;
use crate::models::PageRecord;

/// Crawl one guide source and return its leaf records, IDs assigned.
pub async fn harvest(
    config: &HarvestConfig,
    client: &Client,
    source: &GuideSource,
) -> Result<Vec<PageRecord>> {
    let crawler = Crawler {
        client: client.clone(),
        base_url: Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base_url: {}", config.base_url))?,
        max_depth: config.max_depth,
        concurrent_fetches: config.concurrent_fetches,
        exclude_prefixes: config.exclude_prefixes.clone(),
        visited: Mutex::new(HashSet::new()),
    };

    crawler.claim(&source.root_url).await;
    let mut records = crawler.process_page(source.root_url.clone(), 0, false).await;

    // IDs are positional over the collected set; the parallel wave finishes
    // in completion order, so this pass is what makes them deterministic
    // relative to the final list.
    assign_ids(&mut records, &source.id_prefix);
    Ok(records)
}

pub(crate) fn assign_ids(records: &mut [PageRecord], prefix: &str) {
    for (idx, record) in records.iter_mut().enumerate() {
        record.id = format!("{}-{}", prefix, idx + 1);
    }
}

struct Crawler {
    client: Client,
    base_url: Url,
    max_depth: usize,
    concurrent_fetches: usize,
    exclude_prefixes: Vec<String>,
    visited: Mutex<HashSet<String>>,
}

/// What one fetched page turned out to be.
enum ParsedPage {
    /// A table of contents: follow these root-relative entries instead of
    /// recording the page.
    Toc(Vec<String>),
    /// A content page, plus the root-relative links to fan out to.
    Leaf {
        record: PageRecord,
        sub_links: Vec<String>,
    },
}

impl Crawler {
    /// Returns true when this call claimed the URL (it was unvisited).
    async fn claim(&self, url: &str) -> bool {
        self.visited.lock().await.insert(url.to_string())
    }

    fn absolutize(&self, href: &str) -> Option<String> {
        self.base_url.join(href).ok().map(|u| u.to_string())
    }

    fn is_excluded(&self, href: &str) -> bool {
        self.exclude_prefixes.iter().any(|p| href.starts_with(p.as_str()))
    }

    /// Process one URL. Recursion is boxed; TOC hops keep the same depth,
    /// leaf fan-out goes one deeper.
    fn process_page(
        &self,
        url: String,
        depth: usize,
        skip_toc: bool,
    ) -> BoxFuture<'_, Vec<PageRecord>> {
        Box::pin(async move {
            println!("  fetch {} (depth {})", url, depth);

            let body = match fetch::fetch_html(&self.client, &url).await {
                Ok(body) => body,
                Err(e) => {
                    eprintln!("Warning: skipping {}: {}", url, e);
                    return Vec::new();
                }
            };

            // Parse in a sync scope; the tree must not live across an await
            let parsed = parse_page(&body, &url, skip_toc);

            match parsed {
                ParsedPage::Toc(entries) => {
                    println!("  toc {} ({} entries)", url, entries.len());
                    let mut records = Vec::new();
                    for href in entries {
                        let Some(full_url) = self.absolutize(&href) else {
                            continue;
                        };
                        if self.claim(&full_url).await {
                            records.extend(self.process_page(full_url, depth, true).await);
                        }
                    }
                    records
                }
                ParsedPage::Leaf { record, sub_links } => {
                    let mut records = vec![record];

                    if depth < self.max_depth {
                        let mut to_visit = Vec::new();
                        for href in sub_links {
                            if self.is_excluded(&href) {
                                continue;
                            }
                            let Some(full_url) = self.absolutize(&href) else {
                                continue;
                            };
                            if self.claim(&full_url).await {
                                to_visit.push(full_url);
                            }
                        }

                        if depth == 0 {
                            // Top-level fan-out runs through the worker pool,
                            // merging branches as they complete
                            let branches = stream::iter(to_visit)
                                .map(|next| self.process_page(next, depth + 1, false))
                                .buffer_unordered(self.concurrent_fetches)
                                .collect::<Vec<_>>()
                                .await;
                            records.extend(branches.into_iter().flatten());
                        } else {
                            for next in to_visit {
                                records.extend(self.process_page(next, depth + 1, false).await);
                            }
                        }
                    }

                    records
                }
            }
        })
    }
}

fn parse_page(body: &str, url: &str, skip_toc: bool) -> ParsedPage {
    let doc = Html::parse_document(body);

    if !skip_toc {
        let entries = html::toc_links(&doc);
        if !entries.is_empty() {
            return ParsedPage::Toc(entries);
        }
    }

    let title = html::page_title(&doc);
    let (hierarchy, hierarchy_urls) = html::breadcrumb(&doc);
    let (body_text, sub_links) = html::main_content(&doc);

    ParsedPage::Leaf {
        record: PageRecord {
            id: String::new(),
            title,
            url: url.to_string(),
            section_label: None,
            hierarchy,
            hierarchy_urls,
            linked_pages: sub_links.clone(),
            body: body_text,
        },
        sub_links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_ids_positional() {
        let mut records = vec![
            PageRecord {
                title: "One".to_string(),
                ..Default::default()
            },
            PageRecord {
                title: "Two".to_string(),
                ..Default::default()
            },
        ];
        assign_ids(&mut records, "LABOUR");
        assert_eq!(records[0].id, "LABOUR-1");
        assert_eq!(records[1].id, "LABOUR-2");
    }

    #[test]
    fn test_parse_page_toc() {
        let body = r#"<main><ul class="toc">
            <li><a href="/en/one.html">One</a></li>
            <li><a href="/en/two.html">Two</a></li>
        </ul></main>"#;
        match parse_page(body, "https://www.canada.ca/en/guide.html", false) {
            ParsedPage::Toc(entries) => {
                assert_eq!(entries, vec!["/en/one.html", "/en/two.html"])
            }
            ParsedPage::Leaf { .. } => panic!("expected toc"),
        }
    }

    #[test]
    fn test_parse_page_toc_skipped_is_leaf() {
        let body = r#"<h1>Chapter</h1><main><ul class="toc">
            <li><a href="/en/one.html">One</a></li>
        </ul><p>Body text.</p></main>"#;
        match parse_page(body, "https://www.canada.ca/en/guide.html", true) {
            ParsedPage::Leaf { record, .. } => {
                assert_eq!(record.title, "Chapter");
                assert!(record.body.contains("Body text."));
            }
            ParsedPage::Toc(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_parse_page_leaf_links() {
        let body = r#"<h1>Standards</h1>
            <ol class="breadcrumb"><li><a href="/en.html">Canada.ca</a></li></ol>
            <main><p>Text.</p><a href="/en/a.html">A</a><a href="/en/a.html">A</a></main>"#;
        match parse_page(body, "https://www.canada.ca/en/standards.html", false) {
            ParsedPage::Leaf { record, sub_links } => {
                assert_eq!(record.hierarchy, vec!["Canada.ca"]);
                assert_eq!(record.linked_pages, vec!["/en/a.html"]);
                assert_eq!(sub_links, vec!["/en/a.html"]);
            }
            ParsedPage::Toc(_) => panic!("expected leaf"),
        }
    }

    #[tokio::test]
    async fn test_claim_is_atomic_per_url() {
        let crawler = Crawler {
            client: Client::new(),
            base_url: Url::parse("https://www.canada.ca").unwrap(),
            max_depth: 1,
            concurrent_fetches: 10,
            exclude_prefixes: vec![],
            visited: Mutex::new(HashSet::new()),
        };
        assert!(crawler.claim("https://www.canada.ca/en/x.html").await);
        assert!(!crawler.claim("https://www.canada.ca/en/x.html").await);
    }

    #[test]
    fn test_exclude_prefixes() {
        let crawler = Crawler {
            client: Client::new(),
            base_url: Url::parse("https://www.canada.ca").unwrap(),
            max_depth: 1,
            concurrent_fetches: 10,
            exclude_prefixes: vec!["/en/news/".to_string()],
            visited: Mutex::new(HashSet::new()),
        };
        assert!(crawler.is_excluded("/en/news/2024/01/item.html"));
        assert!(!crawler.is_excluded("/en/services/jobs.html"));
    }
}
