//! Harvest orchestration.
//!
//! Resolves a source selector (`all`, a kind, `kind:name`, or a bare source
//! name) and runs each matched harvester. Results are stored per source:
//! the previous rows are dropped and the new records inserted in one
//! transaction, then chunks are embedded inline when a provider is
//! configured (non-fatal on failure).
//!
//! Positional record IDs are only meaningful within a single run, so a
//! harvest replaces a source's rows instead of merging into them.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::chunk::chunk_text;
use crate::config::{Config, FileSource, GuideSource, IpgSource, SourcesConfig, StatuteSource};
use crate::db;
use crate::embed_cmd;
use crate::fetch;
use crate::models::PageRecord;
use crate::{harvest_file, harvest_guide, harvest_ipg, harvest_statute};

pub async fn run_harvest(
    config: &Config,
    selector: &str,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let targets = resolve_selector(&config.sources, selector)?;
    let client = fetch::build_client(&config.harvest)?;
    let pool = db::connect(config).await?;

    for target in &targets {
        if dry_run {
            println!("harvest {}:{} (dry-run)", target.kind(), target.name());
        } else {
            println!("harvest {}:{}", target.kind(), target.name());
        }

        let mut records = match target {
            Target::Guide(source) => {
                harvest_guide::harvest(&config.harvest, &client, source).await?
            }
            Target::Statute(source) => harvest_statute::harvest(&client, source).await?,
            Target::Ipg(source) => harvest_ipg::harvest(&config.harvest, &client, source).await?,
            Target::File(source) => harvest_file::harvest(source)?,
        };

        if let Some(lim) = limit {
            records.truncate(lim);
        }

        if dry_run {
            let total_chunks: usize = records
                .iter()
                .map(|r| chunk_text("tmp", &r.body, config.chunking.max_tokens).len())
                .sum();
            println!("  records found: {}", records.len());
            println!("  estimated chunks: {}", total_chunks);
            continue;
        }

        let outcome =
            store_records(config, &pool, target.kind(), target.name(), &records).await?;

        println!("  records stored: {}", outcome.documents);
        println!("  chunks written: {}", outcome.chunks);
        if config.embedding.is_enabled() {
            println!("  embeddings written: {}", outcome.embedded);
            println!("  embeddings pending: {}", outcome.pending);
        }
        println!("ok");
    }

    pool.close().await;
    Ok(())
}

enum Target<'a> {
    Guide(&'a GuideSource),
    Statute(&'a StatuteSource),
    Ipg(&'a IpgSource),
    File(&'a FileSource),
}

impl Target<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Target::Guide(_) => "guide",
            Target::Statute(_) => "statute",
            Target::Ipg(_) => "ipg",
            Target::File(_) => "file",
        }
    }

    fn name(&self) -> &str {
        match self {
            Target::Guide(s) => &s.name,
            Target::Statute(s) => &s.name,
            Target::Ipg(s) => &s.name,
            Target::File(s) => &s.name,
        }
    }
}

fn resolve_selector<'a>(sources: &'a SourcesConfig, selector: &str) -> Result<Vec<Target<'a>>> {
    let mut targets: Vec<Target<'a>> = Vec::new();

    let mut push_kind = |kind: &str, targets: &mut Vec<Target<'a>>| {
        match kind {
            "guide" => targets.extend(sources.guides.iter().map(Target::Guide)),
            "statute" => targets.extend(sources.statutes.iter().map(Target::Statute)),
            "ipg" => targets.extend(sources.ipgs.iter().map(Target::Ipg)),
            "file" => targets.extend(sources.files.iter().map(Target::File)),
            _ => {}
        }
    };

    match selector {
        "all" => {
            for kind in ["guide", "statute", "ipg", "file"] {
                push_kind(kind, &mut targets);
            }
        }
        "guide" | "statute" | "ipg" | "file" => push_kind(selector, &mut targets),
        other => {
            if let Some((kind, name)) = other.split_once(':') {
                let target = find_named(sources, Some(kind), name);
                match target {
                    Some(t) => targets.push(t),
                    None => bail!("Unknown source: '{}:{}'", kind, name),
                }
            } else {
                match find_named(sources, None, other) {
                    Some(t) => targets.push(t),
                    None => bail!(
                        "Unknown source or kind: '{}'. Use all, guide, statute, ipg, file, or a configured source name.",
                        other
                    ),
                }
            }
        }
    }

    if targets.is_empty() {
        bail!("No sources configured for '{}'", selector);
    }
    Ok(targets)
}

fn find_named<'a>(
    sources: &'a SourcesConfig,
    kind: Option<&str>,
    name: &str,
) -> Option<Target<'a>> {
    let kind_matches = |k: &str| kind.is_none() || kind == Some(k);

    if kind_matches("guide") {
        if let Some(s) = sources.guides.iter().find(|s| s.name == name) {
            return Some(Target::Guide(s));
        }
    }
    if kind_matches("statute") {
        if let Some(s) = sources.statutes.iter().find(|s| s.name == name) {
            return Some(Target::Statute(s));
        }
    }
    if kind_matches("ipg") {
        if let Some(s) = sources.ipgs.iter().find(|s| s.name == name) {
            return Some(Target::Ipg(s));
        }
    }
    if kind_matches("file") {
        if let Some(s) = sources.files.iter().find(|s| s.name == name) {
            return Some(Target::File(s));
        }
    }
    None
}

struct StoreOutcome {
    documents: u64,
    chunks: u64,
    embedded: u64,
    pending: u64,
}

/// Replace a source's rows with the given records, then chunk and embed
/// the new rows inline. The delete-and-insert runs in one transaction so
/// a failed run never leaves the source half-replaced.
async fn store_records(
    config: &Config,
    pool: &SqlitePool,
    kind: &str,
    source_name: &str,
    records: &[PageRecord],
) -> Result<StoreOutcome> {
    // An index can list the same document twice; first occurrence wins
    let mut seen_ids = HashSet::new();
    let records: Vec<&PageRecord> = records
        .iter()
        .filter(|r| {
            if seen_ids.insert(r.id.clone()) {
                true
            } else {
                eprintln!("Warning: duplicate record id '{}', keeping first", r.id);
                false
            }
        })
        .collect();

    let fetched_at = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN \
         (SELECT c.id FROM chunks c JOIN documents d ON d.id = c.document_id WHERE d.source = ?)",
    )
    .bind(source_name)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN \
         (SELECT c.id FROM chunks c JOIN documents d ON d.id = c.document_id WHERE d.source = ?)",
    )
    .bind(source_name)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM chunks_fts WHERE document_id IN (SELECT id FROM documents WHERE source = ?)",
    )
    .bind(source_name)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE source = ?)",
    )
    .bind(source_name)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM documents WHERE source = ?")
        .bind(source_name)
        .execute(&mut *tx)
        .await?;

    let mut all_chunks = Vec::new();

    for record in &records {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source, kind, url, title, section_label, hierarchy, hierarchy_urls, linked_pages, body, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                kind = excluded.kind,
                url = excluded.url,
                title = excluded.title,
                section_label = excluded.section_label,
                hierarchy = excluded.hierarchy,
                hierarchy_urls = excluded.hierarchy_urls,
                linked_pages = excluded.linked_pages,
                body = excluded.body,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&record.id)
        .bind(source_name)
        .bind(kind)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.section_label)
        .bind(record.hierarchy_joined())
        .bind(record.hierarchy_urls_joined())
        .bind(record.linked_pages_joined())
        .bind(&record.body)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?;

        // The same ID may have belonged to another source; the per-source
        // deletes above will not have touched its chunks, so clear them here
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;

        let chunks = chunk_text(&record.id, &record.body, config.chunking.max_tokens);
        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }
        all_chunks.extend(chunks);
    }

    tx.commit().await?;

    // Inline embedding (non-fatal)
    let (embedded, pending) = embed_cmd::embed_chunks_inline(config, pool, &all_chunks).await;

    Ok(StoreOutcome {
        documents: records.len() as u64,
        chunks: all_chunks.len() as u64,
        embedded,
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sources() -> SourcesConfig {
        SourcesConfig {
            guides: vec![GuideSource {
                name: "labour".to_string(),
                id_prefix: "LABOUR".to_string(),
                root_url: "https://www.canada.ca/en/labour.html".to_string(),
            }],
            statutes: vec![StatuteSource {
                name: "clc".to_string(),
                id_prefix: "CLC".to_string(),
                toc_url: "https://laws-lois.justice.gc.ca/eng/acts/l-2/".to_string(),
                full_text_url: "https://laws-lois.justice.gc.ca/eng/acts/l-2/FullText.html"
                    .to_string(),
                root_label: "Canada Labour Code".to_string(),
                fallback_label: "SCHEDULE".to_string(),
            }],
            ipgs: vec![IpgSource {
                name: "ipgs".to_string(),
                index_url: "https://www.canada.ca/en/ipgs.html".to_string(),
            }],
            files: vec![],
        }
    }

    #[test]
    fn test_selector_all() {
        let sources = sample_sources();
        let targets = resolve_selector(&sources, "all").unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].kind(), "guide");
        assert_eq!(targets[1].kind(), "statute");
        assert_eq!(targets[2].kind(), "ipg");
    }

    #[test]
    fn test_selector_kind() {
        let sources = sample_sources();
        let targets = resolve_selector(&sources, "statute").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name(), "clc");
    }

    #[test]
    fn test_selector_kind_and_name() {
        let sources = sample_sources();
        let targets = resolve_selector(&sources, "guide:labour").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].kind(), "guide");
    }

    #[test]
    fn test_selector_bare_name() {
        let sources = sample_sources();
        let targets = resolve_selector(&sources, "clc").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].kind(), "statute");
    }

    #[test]
    fn test_selector_unknown() {
        let sources = sample_sources();
        assert!(resolve_selector(&sources, "nope").is_err());
        assert!(resolve_selector(&sources, "guide:nope").is_err());
    }

    #[test]
    fn test_selector_kind_without_sources() {
        let sources = sample_sources();
        assert!(resolve_selector(&sources, "file").is_err());
    }
}
