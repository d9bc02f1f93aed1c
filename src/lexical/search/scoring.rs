//! Relevance scoring.

pub mod bm25;
pub mod function_score;
