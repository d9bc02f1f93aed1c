//! # Xiphos
//!
//! A segment-based inverted index and query engine for Rust.
//!
//! ## Features
//!
//! - Configurable text analysis pipeline
//! - FST term dictionaries, skip-list postings, doc values, BKD points
//! - Write-ahead log with crash recovery
//! - Near-real-time refresh over lock-free snapshots
//! - Tiered background merging
//! - BM25 scoring, multi-field and function scores
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use xiphos::document::Document;
//! use xiphos::lexical::engine::LexicalEngine;
//! use xiphos::lexical::index::config::IndexConfig;
//! use xiphos::lexical::query::Query;
//! use xiphos::lexical::search::searcher::SearchRequest;
//! use xiphos::storage::memory::MemoryStorage;
//!
//! let engine = LexicalEngine::open(
//!     Arc::new(MemoryStorage::new_default()),
//!     IndexConfig::default(),
//! )
//! .unwrap();
//! engine
//!     .index(Document::builder("1").add_text("body", "the quick brown fox").build())
//!     .unwrap();
//! engine.refresh().unwrap();
//!
//! let top = engine
//!     .search(&Query::term("body", "quick"), &SearchRequest::default())
//!     .unwrap();
//! assert_eq!(top.hits[0].id, "1");
//! ```

pub mod analysis;
pub mod document;
pub mod error;
pub mod lexical;
pub mod storage;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
