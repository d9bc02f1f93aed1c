//! Synonym graph filter.
//!
//! Synonyms are injected as stacked tokens (`position_increment == 0`) at the position
//! of the first token they replace. When the matched input spans several tokens the
//! injected token carries a `position_length` covering all of them, so the index keeps
//! the shape of the token graph.
//!
//! # Examples
//!
//! ```
//! use xiphos::analysis::token::Token;
//! use xiphos::analysis::token_filter::synonym::SynonymGraphFilter;
//!
//! let filter = SynonymGraphFilter::from_groups(vec![vec!["ml", "machine learning"]]);
//! let tokens = vec![Token::new("machine", 0), Token::new("learning", 1)];
//! let out: Vec<_> = filter.filter(Box::new(tokens.into_iter())).unwrap().collect();
//!
//! assert_eq!(out[1].text, "ml");
//! assert_eq!(out[1].position, 0);
//! assert_eq!(out[1].position_length, 2);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct SynonymRule {
    /// Word sequence to match.
    pub input: Vec<String>,
    /// Terms injected when `input` matches. Each is emitted as a single token.
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SynonymGraphFilter {
    /// Rules keyed by their first input word, longest input first.
    rules: Arc<HashMap<String, Vec<SynonymRule>>>,
}

impl SynonymGraphFilter {
    pub fn new(rules: Vec<SynonymRule>) -> Self {
        let mut by_first: HashMap<String, Vec<SynonymRule>> = HashMap::new();
        for rule in rules {
            if let Some(first) = rule.input.first() {
                by_first.entry(first.clone()).or_default().push(rule);
            }
        }
        for rules in by_first.values_mut() {
            rules.sort_by(|a, b| b.input.len().cmp(&a.input.len()));
        }
        SynonymGraphFilter {
            rules: Arc::new(by_first),
        }
    }

    /// Builds bidirectional rules: every member of a group maps to all other members.
    pub fn from_groups<S: AsRef<str>>(groups: Vec<Vec<S>>) -> Self {
        let mut rules = Vec::new();
        for group in &groups {
            for (i, member) in group.iter().enumerate() {
                let input: Vec<String> = member
                    .as_ref()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                if input.is_empty() {
                    continue;
                }
                let synonyms = group
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, s)| s.as_ref().to_string())
                    .collect();
                rules.push(SynonymRule { input, synonyms });
            }
        }
        Self::new(rules)
    }

    fn longest_match<'a>(&'a self, tokens: &[Token], start: usize) -> Option<&'a SynonymRule> {
        let candidates = self.rules.get(&tokens[start].text)?;
        candidates.iter().find(|rule| {
            let end = start + rule.input.len();
            end <= tokens.len()
                && rule
                    .input
                    .iter()
                    .zip(&tokens[start..end])
                    .all(|(word, token)| *word == token.text)
        })
    }

    pub fn filter(&self, tokens: TokenStream) -> Result<TokenStream> {
        if self.rules.is_empty() {
            return Ok(tokens);
        }

        // Stacked tokens already in the stream are not used as match input.
        let tokens: Vec<Token> = tokens.collect();
        let primary: Vec<Token> = tokens
            .iter()
            .filter(|t| t.position_increment > 0)
            .cloned()
            .collect();

        let mut injected: HashMap<usize, Vec<Token>> = HashMap::new();
        for start in 0..primary.len() {
            let Some(rule) = self.longest_match(&primary, start) else {
                continue;
            };
            let first = &primary[start];
            let last = &primary[start + rule.input.len() - 1];
            let span = last.position + last.position_length - first.position;

            let stacked = injected.entry(first.position).or_default();
            for synonym in &rule.synonyms {
                let mut token =
                    Token::with_offsets(synonym.clone(), first.position, first.start_offset, last.end_offset)
                        .with_position_increment(0)
                        .with_position_length(span);
                token.boost = first.boost;
                stacked.push(token);
            }
        }

        let mut output = Vec::with_capacity(tokens.len() + injected.len());
        for token in tokens {
            let position = token.position;
            let is_primary = token.position_increment > 0;
            output.push(token);
            if is_primary {
                if let Some(stacked) = injected.remove(&position) {
                    output.extend(stacked);
                }
            }
        }

        Ok(Box::new(output.into_iter()))
    }
}
