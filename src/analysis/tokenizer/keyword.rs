//! Keyword tokenizer: the whole input becomes one token.

use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct KeywordTokenizer;

impl KeywordTokenizer {
    pub fn new() -> Self {
        KeywordTokenizer
    }

    pub fn tokenize(&self, text: &str) -> Result<TokenStream> {
        if text.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        Ok(Box::new(std::iter::once(Token::with_offsets(
            text,
            0,
            0,
            text.len(),
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_tokenizer() {
        let tokens: Vec<Token> = KeywordTokenizer::new().tokenize("New York").unwrap().collect();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "New York");
        assert_eq!(KeywordTokenizer::new().tokenize("").unwrap().count(), 0);
    }
}
