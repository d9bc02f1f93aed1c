//! Light English stemming.
//!
//! Strips plural and verbal suffixes with a handful of rules. It is deliberately
//! conservative: words of three letters or fewer are never touched.

use crate::analysis::token::TokenStream;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct StemFilter;

impl StemFilter {
    pub fn new() -> Self {
        StemFilter
    }

    pub fn stem(word: &str) -> String {
        if word.len() <= 3 || !word.is_ascii() {
            return word.to_string();
        }

        if let Some(base) = word.strip_suffix("ies") {
            if base.len() >= 2 {
                return format!("{base}y");
            }
        }
        if let Some(base) = word.strip_suffix("sses") {
            return format!("{base}ss");
        }
        for suffix in ["xes", "ches", "shes"] {
            if let Some(base) = word.strip_suffix(suffix) {
                return format!("{base}{}", &suffix[..suffix.len() - 2]);
            }
        }
        if word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
            return word[..word.len() - 1].to_string();
        }
        for suffix in ["ing", "ed"] {
            if let Some(base) = word.strip_suffix(suffix) {
                if base.len() >= 3 && base.chars().any(|c| "aeiouy".contains(c)) {
                    return Self::undouble(base);
                }
            }
        }
        word.to_string()
    }

    /// "runn" -> "run", but keep "ll", "ss" and "zz".
    fn undouble(base: &str) -> String {
        let bytes = base.as_bytes();
        let n = bytes.len();
        if n >= 2 && bytes[n - 1] == bytes[n - 2] && !b"lsz".contains(&bytes[n - 1]) {
            base[..n - 1].to_string()
        } else {
            base.to_string()
        }
    }

    pub fn filter(&self, tokens: TokenStream) -> Result<TokenStream> {
        Ok(Box::new(tokens.map(|mut token| {
            token.text = Self::stem(&token.text);
            token
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_rules() {
        assert_eq!(StemFilter::stem("foxes"), "fox");
        assert_eq!(StemFilter::stem("flies"), "fly");
        assert_eq!(StemFilter::stem("dogs"), "dog");
        assert_eq!(StemFilter::stem("classes"), "class");
        assert_eq!(StemFilter::stem("running"), "run");
        assert_eq!(StemFilter::stem("jumped"), "jump");
        assert_eq!(StemFilter::stem("falling"), "fall");
        assert_eq!(StemFilter::stem("status"), "status");
        assert_eq!(StemFilter::stem("bus"), "bus");
        assert_eq!(StemFilter::stem("red"), "red");
    }
}
