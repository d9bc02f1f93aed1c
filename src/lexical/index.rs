//! Index writing and segment management.
//!
//! This module turns documents into immutable segments, keeps them durable through
//! the write-ahead log and commit points, and merges them in the background.

pub mod commit;
pub mod config;
pub mod merge_engine;
pub mod merge_policy;
pub mod scheduler;
pub mod searcher_manager;
pub mod segment;
pub mod segment_builder;
pub mod wal;
pub mod writer;
