//! Per-field analyzer routing.
//!
//! Keeps a default analyzer plus overrides for specific fields. This is the entry
//! point the index writer and query rewriter use: `analyze(field, text)`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::analyzer::Analyzer;
use crate::analysis::analyzer::keyword::KeywordAnalyzer;
use crate::analysis::analyzer::standard::StandardAnalyzer;
use crate::analysis::token::TokenStream;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct PerFieldAnalyzer {
    default_analyzer: Arc<dyn Analyzer>,
    field_analyzers: HashMap<String, Arc<dyn Analyzer>>,
    keyword_analyzer: Arc<dyn Analyzer>,
}

impl PerFieldAnalyzer {
    pub fn new(default_analyzer: Arc<dyn Analyzer>) -> Self {
        PerFieldAnalyzer {
            default_analyzer,
            field_analyzers: HashMap::new(),
            keyword_analyzer: Arc::new(KeywordAnalyzer::new()),
        }
    }

    pub fn add_analyzer<S: Into<String>>(&mut self, field: S, analyzer: Arc<dyn Analyzer>) {
        self.field_analyzers.insert(field.into(), analyzer);
    }

    pub fn with_analyzer<S: Into<String>>(mut self, field: S, analyzer: Arc<dyn Analyzer>) -> Self {
        self.add_analyzer(field, analyzer);
        self
    }

    pub fn analyzer_for(&self, field: &str) -> &Arc<dyn Analyzer> {
        self.field_analyzers
            .get(field)
            .unwrap_or(&self.default_analyzer)
    }

    /// Analyzer for keyword-typed values, which are never tokenized.
    pub fn keyword_analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.keyword_analyzer
    }

    pub fn analyze(&self, field: &str, text: &str) -> Result<TokenStream> {
        self.analyzer_for(field).analyze(text)
    }
}

impl Default for PerFieldAnalyzer {
    fn default() -> Self {
        Self::new(Arc::new(StandardAnalyzer::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::token::Token;

    #[test]
    fn test_per_field_routing() {
        let analyzer = PerFieldAnalyzer::default()
            .with_analyzer("sku", Arc::new(KeywordAnalyzer::new()));

        let body: Vec<Token> = analyzer.analyze("body", "Red Shoes").unwrap().collect();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].text, "red");

        let sku: Vec<Token> = analyzer.analyze("sku", "AB-12 X").unwrap().collect();
        assert_eq!(sku.len(), 1);
        assert_eq!(sku[0].text, "AB-12 X");
        assert_eq!(analyzer.analyzer_for("other").name(), "standard");
    }
}
