//! Token filters transform, drop, or add tokens after tokenization.
//!
//! Filters run in the order they were added to the analyzer.
//!
//! # Available Filters
//!
//! - [`lowercase::LowercaseFilter`] - Unicode lowercasing
//! - [`stop::StopFilter`] - Removes stop words, leaving position gaps
//! - [`stem::StemFilter`] - Light English suffix stripping
//! - [`synonym::SynonymGraphFilter`] - Stacked and multi-position synonyms

pub mod lowercase;
pub mod stem;
pub mod stop;
pub mod synonym;

use lowercase::LowercaseFilter;
use stem::StemFilter;
use stop::StopFilter;
use synonym::SynonymGraphFilter;

use crate::analysis::token::TokenStream;
use crate::error::Result;

#[derive(Debug, Clone)]
pub enum TokenFilter {
    Lowercase(LowercaseFilter),
    Stop(StopFilter),
    Stem(StemFilter),
    Synonym(SynonymGraphFilter),
}

impl TokenFilter {
    pub fn filter(&self, tokens: TokenStream) -> Result<TokenStream> {
        match self {
            TokenFilter::Lowercase(f) => f.filter(tokens),
            TokenFilter::Stop(f) => f.filter(tokens),
            TokenFilter::Stem(f) => f.filter(tokens),
            TokenFilter::Synonym(f) => f.filter(tokens),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TokenFilter::Lowercase(_) => "lowercase",
            TokenFilter::Stop(_) => "stop",
            TokenFilter::Stem(_) => "stem",
            TokenFilter::Synonym(_) => "synonym_graph",
        }
    }
}

impl From<LowercaseFilter> for TokenFilter {
    fn from(f: LowercaseFilter) -> Self {
        TokenFilter::Lowercase(f)
    }
}

impl From<StopFilter> for TokenFilter {
    fn from(f: StopFilter) -> Self {
        TokenFilter::Stop(f)
    }
}

impl From<StemFilter> for TokenFilter {
    fn from(f: StemFilter) -> Self {
        TokenFilter::Stem(f)
    }
}

impl From<SynonymGraphFilter> for TokenFilter {
    fn from(f: SynonymGraphFilter) -> Self {
        TokenFilter::Synonym(f)
    }
}
