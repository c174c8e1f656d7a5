//! HTTP retrieval API.
//!
//! Exposes the harvested knowledge base over a small JSON API so other
//! services can query it without linking the crate.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Keyword / semantic / hybrid search |
//! | `GET`  | `/documents` | List stored documents (`?source=`, `?limit=`) |
//! | `GET`  | `/documents/{id}` | Fetch one document with its chunks |
//! | `POST` | `/documents` | Insert or replace one document |
//!
//! # Error Contract
//!
//! All error responses use a JSON envelope:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled`
//! (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::db;
use crate::embed_cmd;
use crate::get::{get_document, DocumentResponse};
use crate::models::SearchResult;
use crate::search::search_documents;

/// State handed to every route handler through Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
}

/// Starts the HTTP retrieval server.
///
/// Binds to the address configured in `[server].bind` and registers all
/// route handlers. The server runs indefinitely until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route(
            "/documents",
            get(handle_list_documents).post(handle_insert_document),
        )
        .route("/documents/{id}", get(handle_get_document))
        .layer(cors)
        .with_state(state);

    println!("API server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Error half of every handler result. Carries the HTTP status and the
/// machine-readable code for the JSON envelope.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        AppError {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let detail = ErrorDetail {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(ErrorBody { error: detail })).into_response()
    }
}

/// Maps command-layer errors onto HTTP statuses by message content, so
/// the shared search and get functions stay free of HTTP types.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("not found") {
        AppError::new(StatusCode::NOT_FOUND, "not_found", msg)
    } else if msg.contains("requires embeddings") || msg.contains("disabled") {
        AppError::new(StatusCode::BAD_REQUEST, "embeddings_disabled", msg)
    } else if msg.contains("must not be empty") || msg.contains("Unknown search mode") {
        AppError::bad_request(msg)
    } else {
        AppError::internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

/// Handler for `POST /search`.
///
/// When `mode` is omitted, defaults to `hybrid` if embeddings are enabled
/// and `keyword` otherwise.
async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }

    let mode = match req.mode.as_deref() {
        Some(m) => m.to_string(),
        None => {
            if state.config.embedding.is_enabled() {
                "hybrid".to_string()
            } else {
                "keyword".to_string()
            }
        }
    };

    let results = search_documents(
        &state.config,
        &req.query,
        &mode,
        req.source.as_deref(),
        req.limit,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(SearchResponse { results }))
}

// ============ GET /documents ============

#[derive(Deserialize)]
struct ListQuery {
    source: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize, sqlx::FromRow)]
struct DocumentSummary {
    id: String,
    source: String,
    kind: String,
    title: String,
    url: String,
}

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

/// Handler for `GET /documents`.
///
/// Lists stored document metadata ordered by source then ID. `?source=`
/// filters by source name; `?limit=` caps the result count (default 100).
async fn handle_list_documents(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let pool = db::connect(&state.config).await.map_err(classify_error)?;
    let limit = q.limit.unwrap_or(100);

    let documents: Vec<DocumentSummary> = match q.source {
        Some(ref source) => {
            sqlx::query_as(
                "SELECT id, source, kind, title, url FROM documents \
                 WHERE source = ? ORDER BY id LIMIT ?",
            )
            .bind(source)
            .bind(limit)
            .fetch_all(&pool)
            .await
        }
        None => {
            sqlx::query_as(
                "SELECT id, source, kind, title, url FROM documents \
                 ORDER BY source, id LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&pool)
            .await
        }
    }
    .map_err(|e| AppError::internal(e.to_string()))?;

    pool.close().await;
    Ok(Json(DocumentListResponse { documents }))
}

// ============ GET /documents/{id} ============

/// Handler for `GET /documents/{id}`.
///
/// Returns the full document with its chunks, or 404 if no document
/// has the given ID.
async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let doc = get_document(&state.config, &id)
        .await
        .map_err(classify_error)?;
    Ok(Json(doc))
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct InsertRequest {
    id: String,
    source: String,
    #[serde(default = "default_insert_kind")]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    section_label: Option<String>,
    #[serde(default)]
    hierarchy: String,
    #[serde(default)]
    hierarchy_urls: String,
    #[serde(default)]
    linked_pages: String,
    body: String,
}

fn default_insert_kind() -> String {
    "manual".to_string()
}

#[derive(Serialize)]
struct InsertResponse {
    id: String,
    chunks: usize,
    embedded: u64,
    pending: u64,
}

/// Handler for `POST /documents`.
///
/// Inserts or replaces a single document and re-chunks its body. The new
/// chunks are embedded inline when an embedding provider is enabled;
/// existing chunks and vectors for the same ID are replaced.
async fn handle_insert_document(
    State(state): State<AppState>,
    Json(req): Json<InsertRequest>,
) -> Result<Json<InsertResponse>, AppError> {
    if req.id.trim().is_empty() {
        return Err(AppError::bad_request("id must not be empty"));
    }
    if req.source.trim().is_empty() {
        return Err(AppError::bad_request("source must not be empty"));
    }
    if req.body.trim().is_empty() {
        return Err(AppError::bad_request("body must not be empty"));
    }

    let config = &state.config;
    let pool = db::connect(config).await.map_err(classify_error)?;
    let fetched_at = chrono::Utc::now().timestamp();

    let chunks = chunk_text(&req.id, &req.body, config.chunking.max_tokens);

    let result: anyhow::Result<()> = async {
        let mut tx = pool.begin().await?;

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
        .bind(&req.id)
        .bind(&req.source)
        .bind(&req.kind)
        .bind(&req.url)
        .bind(&req.title)
        .bind(&req.section_label)
        .bind(&req.hierarchy)
        .bind(&req.hierarchy_urls)
        .bind(&req.linked_pages)
        .bind(&req.body)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?;

        // Replace any existing chunks and vectors for this document
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN \
             (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&req.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN \
             (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&req.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(&req.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&req.id)
            .execute(&mut *tx)
            .await?;

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

        tx.commit().await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        pool.close().await;
        return Err(AppError::internal(e.to_string()));
    }

    let (embedded, pending) = embed_cmd::embed_chunks_inline(config, &pool, &chunks).await;

    pool.close().await;
    Ok(Json(InsertResponse {
        id: req.id,
        chunks: chunks.len(),
        embedded,
        pending,
    }))
}
