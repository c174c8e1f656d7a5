//! Search over harvested documents.
//!
//! Three modes share one pipeline: keyword (FTS5), semantic (cosine over
//! stored vectors), and hybrid (a weighted blend of both channels).
//! Chunk-level hits are normalized per channel and blended, then rolled
//! up to documents by their best chunk.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::SearchResult;

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    source_filter: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    let results = search_documents(config, query, mode, source_filter.as_deref(), limit).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title_display = if result.title.is_empty() {
            "(untitled)"
        } else {
            result.title.as_str()
        };
        let date = chrono::DateTime::from_timestamp(result.fetched_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            result.source,
            title_display
        );
        if !result.hierarchy.is_empty() {
            println!("    hierarchy: {}", result.hierarchy);
        }
        println!("    fetched: {}", date);
        println!("    url: {}", result.url);
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

/// Runs a search and returns ranked document results without printing.
///
/// An empty query returns an empty result set. Unknown modes and
/// semantic/hybrid searches without embeddings configured are errors.
pub async fn search_documents(
    config: &Config,
    query: &str,
    mode: &str,
    source_filter: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    if !matches!(mode, "keyword" | "semantic" | "hybrid") {
        bail!("Unknown search mode '{}'. Expected keyword, semantic, or hybrid.", mode);
    }

    if mode != "keyword" && !config.embedding.is_enabled() {
        bail!("Mode '{}' requires embeddings. Configure an [embedding] provider first.", mode);
    }

    let pool = db::connect(config).await?;
    let final_limit = limit.unwrap_or(config.retrieval.final_limit);

    let keyword_hits = if mode == "keyword" || mode == "hybrid" {
        keyword_channel(&pool, query, config.retrieval.candidate_k_keyword).await?
    } else {
        Vec::new()
    };

    let vector_hits = if mode == "semantic" || mode == "hybrid" {
        vector_channel(&pool, config, query, config.retrieval.candidate_k_vector).await?
    } else {
        Vec::new()
    };

    if keyword_hits.is_empty() && vector_hits.is_empty() {
        pool.close().await;
        return Ok(Vec::new());
    }

    let kw_norm = normalized_by_chunk(&keyword_hits);
    let vec_norm = normalized_by_chunk(&vector_hits);

    // Keyword-only and semantic-only modes are the blend's degenerate
    // endpoints, so the missing channel never contributes.
    let alpha = match mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => config.retrieval.hybrid_alpha,
    };

    // Roll chunk hits up to their documents, keeping each document's best
    // blended score. A chunk hit by both channels is visited twice with
    // the same score; the first visit (keyword, whose snippet carries the
    // match markers) wins the tie.
    struct DocBest {
        score: f64,
        snippet: String,
    }

    let mut best_by_doc: HashMap<String, DocBest> = HashMap::new();

    for hit in keyword_hits.iter().chain(vector_hits.iter()) {
        let k = kw_norm.get(hit.chunk_id.as_str()).copied().unwrap_or(0.0);
        let v = vec_norm.get(hit.chunk_id.as_str()).copied().unwrap_or(0.0);
        let score = blend(alpha, k, v);

        match best_by_doc.get_mut(&hit.document_id) {
            Some(best) if score > best.score => {
                best.score = score;
                best.snippet = hit.snippet.clone();
            }
            Some(_) => {}
            None => {
                best_by_doc.insert(
                    hit.document_id.clone(),
                    DocBest {
                        score,
                        snippet: hit.snippet.clone(),
                    },
                );
            }
        }
    }

    // Fetch document metadata and apply the source filter
    let mut results: Vec<SearchResult> = Vec::new();

    for (doc_id, best) in &best_by_doc {
        let doc_row = sqlx::query(
            "SELECT id, title, source, hierarchy, fetched_at, url FROM documents WHERE id = ?",
        )
        .bind(doc_id)
        .fetch_optional(&pool)
        .await?;

        if let Some(row) = doc_row {
            let source: String = row.get("source");

            if let Some(src) = source_filter {
                if source != src {
                    continue;
                }
            }

            results.push(SearchResult {
                id: row.get("id"),
                title: row.get("title"),
                source,
                hierarchy: row.get("hierarchy"),
                fetched_at: row.get("fetched_at"),
                score: best.score,
                snippet: best.snippet.clone(),
                url: row.get("url"),
            });
        }
    }

    // Sort: score desc, fetched_at desc, id asc (deterministic)
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.fetched_at.cmp(&a.fetched_at))
            .then(a.id.cmp(&b.id))
    });

    results.truncate(final_limit as usize);

    pool.close().await;
    Ok(results)
}

// ============ Retrieval channels ============

/// A chunk-level hit from one retrieval channel, scored in that
/// channel's native units.
#[derive(Debug, Clone)]
struct ChannelHit {
    chunk_id: String,
    document_id: String,
    raw_score: f64,
    snippet: String,
}

#[derive(sqlx::FromRow)]
struct FtsRow {
    chunk_id: String,
    document_id: String,
    rank: f64,
    snippet: String,
}

async fn keyword_channel(pool: &SqlitePool, query: &str, k: i64) -> Result<Vec<ChannelHit>> {
    let rows: Vec<FtsRow> = sqlx::query_as(
        "SELECT chunk_id, document_id, rank, \
         snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet \
         FROM chunks_fts WHERE chunks_fts MATCH ? ORDER BY rank LIMIT ?",
    )
    .bind(query)
    .bind(k)
    .fetch_all(pool)
    .await?;

    // FTS5 rank is more negative for better matches, flip the sign
    Ok(rows
        .into_iter()
        .map(|row| ChannelHit {
            chunk_id: row.chunk_id,
            document_id: row.document_id,
            raw_score: -row.rank,
            snippet: row.snippet,
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct VectorRow {
    chunk_id: String,
    document_id: String,
    embedding: Vec<u8>,
    snippet: String,
}

/// Embeds the query and scores every stored vector by cosine
/// similarity, keeping the top `k`.
async fn vector_channel(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    k: i64,
) -> Result<Vec<ChannelHit>> {
    let query_vec = embedding::embed_query(&config.embedding, query).await?;

    let rows: Vec<VectorRow> = sqlx::query_as(
        "SELECT cv.chunk_id, cv.document_id, cv.embedding, \
         COALESCE(substr(c.text, 1, 240), '') AS snippet \
         FROM chunk_vectors cv JOIN chunks c ON c.id = cv.chunk_id",
    )
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<ChannelHit> = rows
        .into_iter()
        .map(|row| {
            let stored = embedding::blob_to_vec(&row.embedding);
            ChannelHit {
                chunk_id: row.chunk_id,
                document_id: row.document_id,
                raw_score: embedding::cosine_similarity(&query_vec, &stored) as f64,
                snippet: row.snippet,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k as usize);

    Ok(hits)
}

// ============ Scoring ============

/// Min-max normalizes one channel's raw scores to [0, 1], keyed by chunk
/// id. A channel where every hit scored the same maps everything to 1.0.
fn normalized_by_chunk(hits: &[ChannelHit]) -> HashMap<&str, f64> {
    if hits.is_empty() {
        return HashMap::new();
    }

    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for hit in hits {
        lo = lo.min(hit.raw_score);
        hi = hi.max(hit.raw_score);
    }

    let span = hi - lo;
    hits.iter()
        .map(|hit| {
            let norm = if span.abs() < f64::EPSILON {
                1.0
            } else {
                (hit.raw_score - lo) / span
            };
            (hit.chunk_id.as_str(), norm)
        })
        .collect()
}

/// Weighted blend of the two normalized channel scores.
fn blend(alpha: f64, keyword: f64, vector: f64) -> f64 {
    (1.0 - alpha) * keyword + alpha * vector
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, doc_id: &str, score: f64) -> ChannelHit {
        ChannelHit {
            chunk_id: chunk_id.into(),
            document_id: doc_id.into(),
            raw_score: score,
            snippet: String::new(),
        }
    }

    #[test]
    fn test_normalize_empty_channel() {
        assert!(normalized_by_chunk(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single_hit_maxes_out() {
        let hits = vec![hit("a", "d1", -7.3)];
        let norm = normalized_by_chunk(&hits);
        assert!((norm["a"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_spreads_to_unit_range() {
        let hits = vec![
            hit("a", "d1", -2.0),
            hit("b", "d1", 0.0),
            hit("c", "d2", 6.0),
        ];
        let norm = normalized_by_chunk(&hits);
        assert!((norm["a"] - 0.0).abs() < 1e-9);
        assert!((norm["b"] - 0.25).abs() < 1e-9);
        assert!((norm["c"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_flat_channel() {
        let hits = vec![hit("a", "d1", 4.4), hit("b", "d2", 4.4)];
        let norm = normalized_by_chunk(&hits);
        assert!((norm["a"] - 1.0).abs() < 1e-9);
        assert!((norm["b"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_stays_in_unit_interval() {
        let hits = vec![
            hit("a", "d1", -51.0),
            hit("b", "d2", 3.5),
            hit("c", "d3", 120.0),
        ];
        for (_, score) in normalized_by_chunk(&hits) {
            assert!((0.0..=1.0).contains(&score), "score out of range: {}", score);
        }
    }

    #[test]
    fn test_blend_endpoints_select_one_channel() {
        assert_eq!(blend(0.0, 0.8, 0.3), 0.8);
        assert_eq!(blend(1.0, 0.8, 0.3), 0.3);
    }

    #[test]
    fn test_blend_weighted_middle() {
        let score = blend(0.6, 0.5, 1.0);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_ordering_survives_zero_alpha() {
        // the vector channel disagrees but cannot reorder at alpha 0
        let kw = vec![hit("a", "d1", 9.0), hit("b", "d2", 4.0)];
        let vecs = vec![hit("a", "d1", 0.0), hit("b", "d2", 1.0)];
        let kn = normalized_by_chunk(&kw);
        let vn = normalized_by_chunk(&vecs);

        let score_a = blend(0.0, kn["a"], vn["a"]);
        let score_b = blend(0.0, kn["b"], vn["b"]);
        assert!(score_a > score_b);
    }

    #[test]
    fn test_vector_ordering_survives_full_alpha() {
        let kw = vec![hit("a", "d1", 9.0), hit("b", "d2", 4.0)];
        let vecs = vec![hit("a", "d1", 0.2), hit("b", "d2", 0.9)];
        let kn = normalized_by_chunk(&kw);
        let vn = normalized_by_chunk(&vecs);

        let score_a = blend(1.0, kn["a"], vn["a"]);
        let score_b = blend(1.0, kn["b"], vn["b"]);
        assert!(score_b > score_a);
    }
}
