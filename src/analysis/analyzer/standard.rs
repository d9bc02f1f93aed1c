//! Standard analyzer that provides good defaults for most use cases.
//!
//! # Pipeline
//!
//! 1. UnicodeWordTokenizer (UAX #29 word boundaries)
//! 2. LowercaseFilter
//! 3. StopFilter (optional, off by default)
//!
//! # Examples
//!
//! ```
//! use xiphos::analysis::analyzer::Analyzer;
//! use xiphos::analysis::analyzer::standard::StandardAnalyzer;
//!
//! let analyzer = StandardAnalyzer::new();
//! let tokens: Vec<_> = analyzer.analyze("The Quick fox").unwrap().collect();
//!
//! assert_eq!(tokens.len(), 3);
//! assert_eq!(tokens[0].text, "the");
//! ```

use crate::analysis::analyzer::Analyzer;
use crate::analysis::analyzer::pipeline::PipelineAnalyzer;
use crate::analysis::token::TokenStream;
use crate::analysis::token_filter::lowercase::LowercaseFilter;
use crate::analysis::token_filter::stop::StopFilter;
use crate::analysis::tokenizer::unicode_word::UnicodeWordTokenizer;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StandardAnalyzer {
    inner: PipelineAnalyzer,
}

impl StandardAnalyzer {
    pub fn new() -> Self {
        let analyzer = PipelineAnalyzer::new(UnicodeWordTokenizer::new())
            .add_filter(LowercaseFilter::new())
            .with_name("standard");

        StandardAnalyzer { inner: analyzer }
    }

    /// Standard analysis plus English stop word removal.
    pub fn with_stop_words() -> Self {
        let analyzer = PipelineAnalyzer::new(UnicodeWordTokenizer::new())
            .add_filter(LowercaseFilter::new())
            .add_filter(StopFilter::new())
            .with_name("standard_stop");

        StandardAnalyzer { inner: analyzer }
    }

    pub fn inner(&self) -> &PipelineAnalyzer {
        &self.inner
    }
}

impl Default for StandardAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Result<TokenStream> {
        self.inner.analyze(text)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::token::Token;

    #[test]
    fn test_standard_analyzer_keeps_stop_words() {
        let tokens: Vec<Token> = StandardAnalyzer::new()
            .analyze("the quick brown fox")
            .unwrap()
            .collect();

        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[1].text, "quick");
        assert_eq!(tokens[3].position, 3);
    }

    #[test]
    fn test_standard_analyzer_with_stop_words() {
        let tokens: Vec<Token> = StandardAnalyzer::with_stop_words()
            .analyze("Hello the World")
            .unwrap()
            .collect();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, "world");
        assert_eq!(tokens[1].position, 2);
    }
}
