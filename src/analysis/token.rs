//! Token types for text analysis.
//!
//! Tokens support graph structures through `position_increment` and `position_length`,
//! which is how multi-word synonyms are represented:
//!
//! ```text
//! Input: "machine learning"
//! With synonym: "ml"
//!
//!   Position 0: "machine"  (pos_inc=1, pos_len=1)
//!   Position 0: "ml"       (pos_inc=0, pos_len=2)  ← same position, spans 2
//!   Position 1: "learning" (pos_inc=1, pos_len=1)
//! ```
//!
//! # Examples
//!
//! ```
//! use xiphos::analysis::token::Token;
//!
//! let token = Token::with_offsets("world", 1, 6, 11);
//! assert_eq!(token.text, "world");
//! assert_eq!(token.position_length, 1);
//! ```

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,

    /// Absolute position in the token stream. Removed tokens leave gaps.
    pub position: usize,

    /// Byte offset of the token start in the raw (pre char filter) text.
    pub start_offset: usize,

    pub end_offset: usize,

    pub boost: f32,

    pub stopped: bool,

    /// Distance to the previous token's position; 0 for stacked tokens.
    pub position_increment: usize,

    /// Number of positions this token spans.
    pub position_length: usize,
}

impl Token {
    pub fn new<S: Into<String>>(text: S, position: usize) -> Self {
        Token {
            text: text.into(),
            position,
            start_offset: 0,
            end_offset: 0,
            boost: 1.0,
            stopped: false,
            position_increment: 1,
            position_length: 1,
        }
    }

    pub fn with_offsets<S: Into<String>>(
        text: S,
        position: usize,
        start_offset: usize,
        end_offset: usize,
    ) -> Self {
        Token {
            start_offset,
            end_offset,
            ..Token::new(text, position)
        }
    }

    pub fn with_position_length(mut self, position_length: usize) -> Self {
        self.position_length = position_length.max(1);
        self
    }

    pub fn with_position_increment(mut self, position_increment: usize) -> Self {
        self.position_increment = position_increment;
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn stop(mut self) -> Self {
        self.stopped = true;
        self
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A stream of tokens flowing between analysis stages.
pub type TokenStream = Box<dyn Iterator<Item = Token> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_builders() {
        let token = Token::with_offsets("ml", 0, 0, 16)
            .with_position_length(2)
            .with_position_increment(0)
            .with_boost(2.0);

        assert_eq!(token.position_length, 2);
        assert_eq!(token.position_increment, 0);
        assert_eq!(token.boost, 2.0);
        assert_eq!(token.end_offset, 16);
        assert!(!token.is_stopped());
        assert!(token.stop().is_stopped());
    }

    #[test]
    fn test_position_length_never_zero() {
        assert_eq!(Token::new("x", 0).with_position_length(0).position_length, 1);
    }
}
