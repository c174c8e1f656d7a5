use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Shared crawl settings for the web harvesters.
#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Site root used to resolve root-relative links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Recursion bound for the guide crawler. Depth 0 is the root page.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Size of the parallel fetch pool at the top level.
    #[serde(default = "default_concurrent_fetches")]
    pub concurrent_fetches: usize,
    /// Root-relative path prefixes that are never followed.
    #[serde(default = "default_exclude_prefixes")]
    pub exclude_prefixes: Vec<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_depth: default_max_depth(),
            concurrent_fetches: default_concurrent_fetches(),
            exclude_prefixes: default_exclude_prefixes(),
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.canada.ca".to_string()
}
fn default_max_depth() -> usize {
    1
}
fn default_concurrent_fetches() -> usize {
    10
}
fn default_exclude_prefixes() -> Vec<String> {
    vec!["/en/news/".to_string()]
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("labour-kb/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of the semantic channel in hybrid scoring, in [0, 1].
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_channel_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_channel_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_channel_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override, used by the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_batch() -> usize {
    64
}
fn default_embed_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Configured harvest sources, grouped by kind.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub guides: Vec<GuideSource>,
    #[serde(default)]
    pub statutes: Vec<StatuteSource>,
    #[serde(default)]
    pub ipgs: Vec<IpgSource>,
    #[serde(default)]
    pub files: Vec<FileSource>,
}

/// A guidance-page tree crawled from a root URL.
#[derive(Debug, Deserialize, Clone)]
pub struct GuideSource {
    pub name: String,
    pub id_prefix: String,
    pub root_url: String,
}

/// A consolidated Act or Regulation: one table-of-contents page plus one
/// full-text page the sections are sliced out of.
#[derive(Debug, Deserialize, Clone)]
pub struct StatuteSource {
    pub name: String,
    pub id_prefix: String,
    pub toc_url: String,
    pub full_text_url: String,
    /// Topmost TOC label, excluded from recorded hierarchies.
    pub root_label: String,
    /// Label used for entries without a section number (e.g. schedules).
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
}

fn default_fallback_label() -> String {
    "SCHEDULE".to_string()
}

/// An index page of tables listing guidance documents by number.
#[derive(Debug, Deserialize, Clone)]
pub struct IpgSource {
    pub name: String,
    pub index_url: String,
}

/// A local directory of documents to ingest.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSource {
    pub name: String,
    pub id_prefix: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.docx".to_string(), "**/*.txt".to_string()]
}

impl SourcesConfig {
    /// All configured (kind, name) pairs, in config order.
    pub fn names(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        for s in &self.guides {
            out.push(("guide", s.name.clone()));
        }
        for s in &self.statutes {
            out.push(("statute", s.name.clone()));
        }
        for s in &self.ipgs {
            out.push(("ipg", s.name.clone()));
        }
        for s in &self.files {
            out.push(("file", s.name.clone()));
        }
        out
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.harvest.concurrent_fetches == 0 {
        bail!("harvest.concurrent_fetches must be >= 1");
    }

    // Source names are the harvest selector namespace
    let mut seen = std::collections::HashSet::new();
    for (kind, name) in config.sources.names() {
        if name.is_empty() {
            bail!("sources.{}s entries must have a non-empty name", kind);
        }
        if !seen.insert(name.clone()) {
            bail!("Duplicate source name: '{}'", name);
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}
