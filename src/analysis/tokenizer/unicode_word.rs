//! Unicode word tokenizer implementation.
//!
//! Splits text using Unicode word boundary rules (UAX #29) and drops segments that
//! contain no alphanumeric character (punctuation, whitespace).
//!
//! # Examples
//!
//! ```
//! use xiphos::analysis::tokenizer::unicode_word::UnicodeWordTokenizer;
//!
//! let tokens: Vec<_> = UnicodeWordTokenizer::new()
//!     .tokenize("Hello, world!")
//!     .unwrap()
//!     .collect();
//!
//! assert_eq!(tokens[0].text, "Hello");
//! assert_eq!(tokens[1].text, "world");
//! assert_eq!(tokens[1].position, 1);
//! ```

use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct UnicodeWordTokenizer;

impl UnicodeWordTokenizer {
    pub fn new() -> Self {
        UnicodeWordTokenizer
    }

    pub fn tokenize(&self, text: &str) -> Result<TokenStream> {
        let tokens: Vec<Token> = text
            .split_word_bound_indices()
            .filter(|(_, word)| word.chars().any(|c| c.is_alphanumeric()))
            .enumerate()
            .map(|(position, (start, word))| {
                Token::with_offsets(word, position, start, start + word.len())
            })
            .collect();

        Ok(Box::new(tokens.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicode_word_tokenizer() {
        let tokens: Vec<Token> = UnicodeWordTokenizer::new()
            .tokenize("the quick, brown fox's den")
            .unwrap()
            .collect();

        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["the", "quick", "brown", "fox's", "den"]);
        assert_eq!(tokens[2].position, 2);
        assert_eq!(tokens[2].start_offset, 11);
    }

    #[test]
    fn test_repeated_words_get_their_own_offsets() {
        let tokens: Vec<Token> = UnicodeWordTokenizer::new()
            .tokenize("fox fox")
            .unwrap()
            .collect();
        assert_eq!(tokens[1].start_offset, 4);
    }
}
