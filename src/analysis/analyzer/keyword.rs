//! Keyword analyzer: the raw value is the single indexed term.

use crate::analysis::analyzer::Analyzer;
use crate::analysis::token::TokenStream;
use crate::analysis::tokenizer::keyword::KeywordTokenizer;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct KeywordAnalyzer {
    tokenizer: KeywordTokenizer,
}

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Result<TokenStream> {
        self.tokenizer.tokenize(text)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_analyzer() {
        let tokens: Vec<_> = KeywordAnalyzer::new().analyze("Hello World").unwrap().collect();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "Hello World");
    }
}
