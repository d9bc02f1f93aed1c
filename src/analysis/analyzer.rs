//! Analyzers: complete text-to-token pipelines.
//!
//! - [`pipeline::PipelineAnalyzer`] - Custom char filter + tokenizer + filter chains
//! - [`standard::StandardAnalyzer`] - Unicode words, lowercased
//! - [`keyword::KeywordAnalyzer`] - Whole input as one token
//! - [`per_field::PerFieldAnalyzer`] - Different analyzers per field

pub mod keyword;
pub mod per_field;
pub mod pipeline;
pub mod standard;

use crate::analysis::token::TokenStream;
use crate::error::Result;

/// Turns raw text into an ordered token stream.
///
/// Implementations must be pure functions of their input and configuration.
pub trait Analyzer: Send + Sync + std::fmt::Debug {
    fn analyze(&self, text: &str) -> Result<TokenStream>;

    fn name(&self) -> &str;
}
