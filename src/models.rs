//! Core data models used throughout labour-kb.
//!
//! These types represent the harvested pages, chunks, and search results
//! that flow through the harvest and retrieval pipeline.

/// A page record produced by a harvester before storage.
///
/// `hierarchy` and `hierarchy_urls` are the ordered ancestor trail (breadcrumb
/// sections, TOC parts, or an index-table title); `linked_pages` are the
/// same-site links found in the page body, de-duplicated in document order.
#[derive(Debug, Clone, Default)]
pub struct PageRecord {
    /// Final record ID (e.g. `LABOUR-3`, `CLC-241`, `IPG-054`). Empty until
    /// the harvester's ID pass assigns it.
    pub id: String,
    pub title: String,
    pub url: String,
    /// Section number for statute records (e.g. `241`, `125-1`).
    pub section_label: Option<String>,
    pub hierarchy: Vec<String>,
    pub hierarchy_urls: Vec<String>,
    pub linked_pages: Vec<String>,
    pub body: String,
}

impl PageRecord {
    /// Ancestor trail as stored: names joined with `" / "`.
    pub fn hierarchy_joined(&self) -> String {
        self.hierarchy.join(" / ")
    }

    /// Ancestor URLs as stored, joined with `" / "`.
    pub fn hierarchy_urls_joined(&self) -> String {
        self.hierarchy_urls.join(" / ")
    }

    /// Same-site links as stored, joined with `"|"`.
    pub fn linked_pages_joined(&self) -> String {
        self.linked_pages.join("|")
    }
}

/// A slice of a document body sized for retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, compared against stored embeddings to detect
    /// staleness.
    pub hash: String,
}

/// A search result returned from the query engine.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub source: String,
    pub hierarchy: String,
    pub fetched_at: i64,
    pub score: f64,
    pub snippet: String,
    pub url: String,
}
