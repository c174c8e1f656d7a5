//! Document retrieval by ID.
//!
//! Fetches a full document and its associated chunks from the database.
//! Used by both the `lkb get` CLI command and the `GET /documents/{id}`
//! HTTP endpoint.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Full document response with its chunks in index order.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub source: String,
    pub kind: String,
    pub url: String,
    pub title: String,
    pub section_label: Option<String>,
    pub hierarchy: String,
    pub hierarchy_urls: String,
    pub linked_pages: String,
    pub fetched_at: String, // ISO8601
    pub body: String,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChunkResponse {
    #[sqlx(rename = "chunk_index")]
    pub index: i64,
    pub text: String,
}

/// Loads one document with its chunks. Backs both `lkb get` and the
/// HTTP document endpoint.
pub async fn get_document(config: &Config, id: &str) -> Result<DocumentResponse> {
    let pool = db::connect(config).await?;

    let doc_row = sqlx::query(
        "SELECT id, source, kind, url, title, section_label, hierarchy, hierarchy_urls, linked_pages, body, fetched_at FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?;

    let Some(doc_row) = doc_row else {
        pool.close().await;
        bail!("document not found: {}", id);
    };

    let fetched_at: i64 = doc_row.get("fetched_at");

    let chunks: Vec<ChunkResponse> = sqlx::query_as(
        "SELECT chunk_index, text FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    pool.close().await;

    Ok(DocumentResponse {
        id: doc_row.get("id"),
        source: doc_row.get("source"),
        kind: doc_row.get("kind"),
        url: doc_row.get("url"),
        title: doc_row.get("title"),
        section_label: doc_row.get("section_label"),
        hierarchy: doc_row.get("hierarchy"),
        hierarchy_urls: doc_row.get("hierarchy_urls"),
        linked_pages: doc_row.get("linked_pages"),
        fetched_at: iso_timestamp(fetched_at),
        body: doc_row.get("body"),
        chunks,
    })
}

/// CLI entry point: fetches the document and prints it to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let doc = get_document(config, id).await?;

    println!("--- Document ---");
    println!("id:             {}", doc.id);
    println!(
        "title:          {}",
        if doc.title.is_empty() {
            "(untitled)"
        } else {
            doc.title.as_str()
        }
    );
    println!("source:         {}", doc.source);
    println!("kind:           {}", doc.kind);
    println!("url:            {}", doc.url);
    if let Some(ref label) = doc.section_label {
        println!("section:        {}", label);
    }
    if !doc.hierarchy.is_empty() {
        println!("hierarchy:      {}", doc.hierarchy);
    }
    if !doc.hierarchy_urls.is_empty() {
        println!("hierarchy_urls: {}", doc.hierarchy_urls);
    }
    if !doc.linked_pages.is_empty() {
        println!("linked_pages:   {}", doc.linked_pages);
    }
    println!("fetched_at:     {}", doc.fetched_at);
    println!();

    println!("--- Body ---");
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {}]", chunk.index);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn iso_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
