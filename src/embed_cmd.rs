//! `lkb embed` subcommands, plus inline embedding during harvest and
//! document insert.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::Chunk;

#[derive(sqlx::FromRow)]
struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    text_hash: String,
}

/// Embed chunks that have no embedding yet or whose text has changed.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_chunks(&pool, provider.model_name(), limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        pool.close().await;
        return Ok(());
    }

    let total = pending.len();
    let (embedded, failed) =
        embed_and_store(&pool, config, provider.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Drop every stored embedding and regenerate from scratch.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;

    println!("embed rebuild");
    println!("  cleared existing embeddings");

    let all_chunks = find_pending_chunks(&pool, provider.model_name(), None).await?;

    if all_chunks.is_empty() {
        println!("  no chunks to embed");
        pool.close().await;
        return Ok(());
    }

    let total = all_chunks.len();
    let (embedded, failed) =
        embed_and_store(&pool, config, provider.as_ref(), &all_chunks, batch_size).await?;

    println!("  total chunks: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Embed `items` in batches and upsert the vectors.
///
/// A failing batch is counted and skipped rather than aborting the run.
/// Returns (embedded, failed).
async fn embed_and_store(
    pool: &SqlitePool,
    config: &Config,
    provider: &dyn embedding::EmbeddingProvider,
    items: &[PendingChunk],
    batch_size: usize,
) -> Result<(u64, u64)> {
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in items.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match embedding::embed_texts(&config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    store_embedding(
                        pool,
                        &item.chunk_id,
                        &item.document_id,
                        &item.text_hash,
                        provider.model_name(),
                        provider.dims(),
                        &blob,
                    )
                    .await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
            }
        }
    }

    Ok((embedded, failed))
}

/// Embed freshly stored chunks during harvest or document insert.
///
/// Failures are non-fatal: chunks that could not be embedded are left
/// for `embed pending` to pick up later. Returns (embedded, pending).
pub async fn embed_chunks_inline(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[Chunk],
) -> (u64, u64) {
    if !config.embedding.is_enabled() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Warning: could not create embedding provider: {}", e);
            return (0, chunks.len() as u64);
        }
    };

    let mut embedded = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size) {
        // Skip chunks that already carry a current embedding for this model
        let mut stale: Vec<&Chunk> = Vec::new();
        for chunk in batch {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT hash FROM embeddings WHERE chunk_id = ? AND model = ?")
                    .bind(&chunk.id)
                    .bind(provider.model_name())
                    .fetch_optional(pool)
                    .await
                    .unwrap_or(None);

            if existing.as_deref() == Some(chunk.hash.as_str()) {
                embedded += 1;
            } else {
                stale.push(chunk);
            }
        }

        if stale.is_empty() {
            continue;
        }

        let texts: Vec<String> = stale.iter().map(|c| c.text.clone()).collect();

        match embedding::embed_texts(&config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vec) in stale.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    let stored = store_embedding(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        &chunk.hash,
                        provider.model_name(),
                        provider.dims(),
                        &blob,
                    )
                    .await;

                    match stored {
                        Ok(()) => embedded += 1,
                        Err(e) => {
                            eprintln!("Warning: failed to store embedding for {}: {}", chunk.id, e);
                            pending += 1;
                        }
                    }
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                pending += stale.len() as u64;
            }
        }
    }

    (embedded, pending)
}

/// Chunks with no embedding for `model`, or one whose hash no longer
/// matches the chunk text.
async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    // Negative LIMIT means unbounded in SQLite
    let limit_val = limit.map(|l| l as i64).unwrap_or(-1);

    let pending: Vec<PendingChunk> = sqlx::query_as(
        "SELECT c.id AS chunk_id, c.document_id, c.text, c.hash AS text_hash \
         FROM chunks c \
         LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ? \
         WHERE e.chunk_id IS NULL OR e.hash != c.hash \
         ORDER BY c.document_id, c.chunk_index \
         LIMIT ?",
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(pending)
}

/// Writes the bookkeeping row and the vector blob in one transaction.
async fn store_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    text_hash: &str,
    model: &str,
    dims: usize,
    blob: &[u8],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO embeddings (chunk_id, model, dims, created_at, hash) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(chunk_id) DO UPDATE \
         SET model = excluded.model, dims = excluded.dims, \
             created_at = excluded.created_at, hash = excluded.hash",
    )
    .bind(chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(chrono::Utc::now().timestamp())
    .bind(text_hash)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?) \
         ON CONFLICT(chunk_id) DO UPDATE \
         SET document_id = excluded.document_id, embedding = excluded.embedding",
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(blob)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
