//! Lexical (inverted-index) search.
//!
//! - [`core`] - on-disk codecs: term dictionary, postings, doc values, points, stored fields
//! - [`index`] - segments, the write-ahead log, the index writer and merging
//! - [`query`] - the query tree and its rewrite step
//! - [`search`] - weights, scorers, BM25 and top-k collection
//! - [`engine`] - the [`LexicalEngine`](engine::LexicalEngine) facade tying it together

pub mod core;
pub mod engine;
pub mod index;
pub mod query;
pub mod search;
