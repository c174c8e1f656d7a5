//! # labour-kb
//!
//! A harvester and retrieval store for Canadian federal labour-law sources.
//!
//! labour-kb crawls guidance page trees, slices consolidated statutes into
//! per-section records, walks IPG index tables, and ingests local document
//! drops. Records are normalized into a tabular SQLite schema, chunked,
//! optionally embedded, and exposed through hybrid search (keyword +
//! semantic) via a CLI and a small HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │  Harvesters  │──▶│  Pipeline   │──▶│  SQLite  │
//! │ guide/statute│   │ Chunk+Embed │   │ FTS5+Vec │
//! │   ipg/file   │   └─────────────┘   └────┬─────┘
//! └──────────────┘                          │
//!                       ┌──────────────────┤
//!                       ▼                  ▼
//!                  ┌──────────┐      ┌──────────┐
//!                  │   CLI    │      │   HTTP   │
//!                  │  (lkb)   │      │  (API)   │
//!                  └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lkb init                      # create database
//! lkb harvest all               # harvest every configured source
//! lkb embed pending             # generate embeddings
//! lkb search "hours of work" --mode hybrid
//! lkb serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`html`] | HTML extraction (TOC, breadcrumbs, statute sections, IPG tables) |
//! | [`harvest_guide`] | Recursive guidance-page crawler |
//! | [`harvest_statute`] | Statute TOC and full-text slicer |
//! | [`harvest_ipg`] | IPG index-table harvester |
//! | [`harvest_file`] | Local file ingestion (docx, txt) |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`server`] | HTTP retrieval API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod export;
pub mod fetch;
pub mod get;
pub mod harvest;
pub mod harvest_file;
pub mod harvest_guide;
pub mod harvest_ipg;
pub mod harvest_statute;
pub mod html;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod sources;
