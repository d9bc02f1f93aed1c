//! Pipeline analyzer that combines char filters, a tokenizer and token filters.
//!
//! # Examples
//!
//! ```
//! use xiphos::analysis::analyzer::Analyzer;
//! use xiphos::analysis::analyzer::pipeline::PipelineAnalyzer;
//! use xiphos::analysis::char_filter::html_strip::HtmlStripCharFilter;
//! use xiphos::analysis::token_filter::lowercase::LowercaseFilter;
//! use xiphos::analysis::token_filter::stop::StopFilter;
//! use xiphos::analysis::tokenizer::unicode_word::UnicodeWordTokenizer;
//!
//! let analyzer = PipelineAnalyzer::new(UnicodeWordTokenizer::new())
//!     .add_char_filter(HtmlStripCharFilter::new())
//!     .add_filter(LowercaseFilter::new())
//!     .add_filter(StopFilter::from_words(["the", "and"]))
//!     .with_name("my_custom_analyzer");
//!
//! let tokens: Vec<_> = analyzer.analyze("<p>Hello THE world</p>").unwrap().collect();
//!
//! assert_eq!(tokens.len(), 2);
//! assert_eq!(tokens[0].text, "hello");
//! assert_eq!(tokens[0].start_offset, 3);
//! assert_eq!(tokens[1].text, "world");
//! ```

use crate::analysis::analyzer::Analyzer;
use crate::analysis::char_filter::{CharFilter, correct_offset};
use crate::analysis::token::TokenStream;
use crate::analysis::token_filter::TokenFilter;
use crate::analysis::tokenizer::Tokenizer;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct PipelineAnalyzer {
    tokenizer: Tokenizer,
    char_filters: Vec<CharFilter>,
    filters: Vec<TokenFilter>,
    name: String,
}

impl PipelineAnalyzer {
    pub fn new<T: Into<Tokenizer>>(tokenizer: T) -> Self {
        let tokenizer = tokenizer.into();
        PipelineAnalyzer {
            name: format!("pipeline_{}", tokenizer.name()),
            tokenizer,
            char_filters: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn add_char_filter<F: Into<CharFilter>>(mut self, char_filter: F) -> Self {
        self.char_filters.push(char_filter.into());
        self
    }

    pub fn add_filter<F: Into<TokenFilter>>(mut self, filter: F) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn char_filters(&self) -> &[CharFilter] {
        &self.char_filters
    }

    pub fn filters(&self) -> &[TokenFilter] {
        &self.filters
    }
}

impl Analyzer for PipelineAnalyzer {
    fn analyze(&self, text: &str) -> Result<TokenStream> {
        let mut filtered_text = std::borrow::Cow::Borrowed(text);
        let mut filter_transformations = Vec::with_capacity(self.char_filters.len());

        for char_filter in &self.char_filters {
            let (new_text, transformations) = char_filter.filter(&filtered_text);
            filtered_text = std::borrow::Cow::Owned(new_text);
            filter_transformations.push(transformations);
        }

        let mut tokens = self.tokenizer.tokenize(&filtered_text)?;
        for filter in &self.filters {
            tokens = filter.filter(tokens)?;
        }

        if filter_transformations.iter().all(Vec::is_empty) {
            return Ok(tokens);
        }

        // Map offsets back through the char filters, last applied first.
        let corrected: Vec<_> = tokens
            .map(|mut token| {
                for transformations in filter_transformations.iter().rev() {
                    token.start_offset = correct_offset(token.start_offset, transformations, false);
                    token.end_offset = correct_offset(token.end_offset, transformations, true);
                }
                token
            })
            .collect();
        Ok(Box::new(corrected.into_iter()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::char_filter::mapping::MappingCharFilter;
    use crate::analysis::token::Token;
    use crate::analysis::token_filter::lowercase::LowercaseFilter;
    use crate::analysis::token_filter::stem::StemFilter;
    use crate::analysis::token_filter::synonym::SynonymGraphFilter;
    use crate::analysis::tokenizer::whitespace::WhitespaceTokenizer;
    use std::collections::HashMap;

    #[test]
    fn test_filters_run_in_order() {
        let analyzer = PipelineAnalyzer::new(WhitespaceTokenizer::new())
            .add_filter(LowercaseFilter::new())
            .add_filter(StemFilter::new())
            .add_filter(SynonymGraphFilter::from_groups(vec![vec!["fox", "vixen"]]));

        let tokens: Vec<Token> = analyzer.analyze("Quick Foxes").unwrap().collect();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["quick", "fox", "vixen"]);
        assert_eq!(tokens[2].position, 1);
        assert_eq!(analyzer.name(), "pipeline_whitespace");
    }

    #[test]
    fn test_offsets_are_corrected_through_char_filters() {
        let mut mapping = HashMap::new();
        mapping.insert("&".to_string(), "and".to_string());
        let analyzer = PipelineAnalyzer::new(WhitespaceTokenizer::new())
            .add_char_filter(MappingCharFilter::new(mapping).unwrap());

        let tokens: Vec<Token> = analyzer.analyze("fish & chips").unwrap().collect();
        assert_eq!(tokens[1].text, "and");
        assert_eq!((tokens[1].start_offset, tokens[1].end_offset), (5, 6));
        assert_eq!((tokens[2].start_offset, tokens[2].end_offset), (7, 12));
    }
}
