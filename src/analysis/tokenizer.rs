//! Tokenizers split (char-filtered) text into tokens.
//!
//! Exactly one tokenizer runs per analyzer. Tokenizers assign consecutive positions
//! starting at 0 and byte offsets into the text they receive.

pub mod keyword;
pub mod unicode_word;
pub mod whitespace;

use keyword::KeywordTokenizer;
use unicode_word::UnicodeWordTokenizer;
use whitespace::WhitespaceTokenizer;

use crate::analysis::token::TokenStream;
use crate::error::Result;

#[derive(Debug, Clone)]
pub enum Tokenizer {
    Whitespace(WhitespaceTokenizer),
    UnicodeWord(UnicodeWordTokenizer),
    Keyword(KeywordTokenizer),
}

impl Tokenizer {
    pub fn tokenize(&self, text: &str) -> Result<TokenStream> {
        match self {
            Tokenizer::Whitespace(t) => t.tokenize(text),
            Tokenizer::UnicodeWord(t) => t.tokenize(text),
            Tokenizer::Keyword(t) => t.tokenize(text),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tokenizer::Whitespace(_) => "whitespace",
            Tokenizer::UnicodeWord(_) => "unicode_word",
            Tokenizer::Keyword(_) => "keyword",
        }
    }
}

impl From<WhitespaceTokenizer> for Tokenizer {
    fn from(t: WhitespaceTokenizer) -> Self {
        Tokenizer::Whitespace(t)
    }
}

impl From<UnicodeWordTokenizer> for Tokenizer {
    fn from(t: UnicodeWordTokenizer) -> Self {
        Tokenizer::UnicodeWord(t)
    }
}

impl From<KeywordTokenizer> for Tokenizer {
    fn from(t: KeywordTokenizer) -> Self {
        Tokenizer::Keyword(t)
    }
}
