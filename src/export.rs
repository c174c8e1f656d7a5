//! Export the harvested corpus as JSON.
//!
//! One payload with all documents and chunks, written to a file or
//! stdout, for loading into downstream analysis tools or another store.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::db;

#[derive(Serialize)]
struct ExportData {
    documents: Vec<ExportDocument>,
    chunks: Vec<ExportChunk>,
}

#[derive(Serialize, sqlx::FromRow)]
struct ExportDocument {
    id: String,
    source: String,
    kind: String,
    url: String,
    title: String,
    section_label: Option<String>,
    hierarchy: String,
    hierarchy_urls: String,
    linked_pages: String,
    fetched_at: i64,
    body: String,
}

#[derive(Serialize, sqlx::FromRow)]
struct ExportChunk {
    id: String,
    document_id: String,
    chunk_index: i64,
    text: String,
}

/// Dump every document and chunk as pretty-printed JSON.
///
/// Writes to `output` when given, stdout otherwise. The summary line
/// goes to stderr so piped stdout stays clean JSON.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;

    let documents: Vec<ExportDocument> = sqlx::query_as(
        "SELECT id, source, kind, url, title, section_label, hierarchy, hierarchy_urls, \
                linked_pages, fetched_at, body \
         FROM documents ORDER BY source, id",
    )
    .fetch_all(&pool)
    .await?;

    let chunks: Vec<ExportChunk> = sqlx::query_as(
        "SELECT id, document_id, chunk_index, text \
         FROM chunks ORDER BY document_id, chunk_index",
    )
    .fetch_all(&pool)
    .await?;

    pool.close().await;

    let data = ExportData { documents, chunks };
    let payload = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &payload)?;
            eprintln!(
                "Exported {} documents, {} chunks to {}",
                data.documents.len(),
                data.chunks.len(),
                path.display()
            );
        }
        None => println!("{}", payload),
    }

    Ok(())
}
