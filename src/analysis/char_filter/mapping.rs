//! Literal mapping char filter.

use std::collections::HashMap;

use regex::Regex;

use super::Transformation;
use crate::error::Result;

/// Replaces literal keys with their mapped values, preferring the longest key.
#[derive(Debug, Clone)]
pub struct MappingCharFilter {
    pattern: Option<Regex>,
    replacements: HashMap<String, String>,
}

impl MappingCharFilter {
    pub fn new(mapping: HashMap<String, String>) -> Result<Self> {
        let mut keys: Vec<&String> = mapping.keys().filter(|k| !k.is_empty()).collect();
        // Regex alternation is leftmost-first, so longer keys must come first.
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let pattern = if keys.is_empty() {
            None
        } else {
            let alternation = keys
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&alternation)?)
        };

        Ok(Self {
            pattern,
            replacements: mapping,
        })
    }

    pub fn filter(&self, input: &str) -> (String, Vec<Transformation>) {
        let Some(pattern) = &self.pattern else {
            return (input.to_string(), Vec::new());
        };

        let mut output = String::with_capacity(input.len());
        let mut transformations = Vec::new();
        let mut last_match_end = 0;

        for m in pattern.find_iter(input) {
            let replacement = self
                .replacements
                .get(m.as_str())
                .map(String::as_str)
                .unwrap_or(m.as_str());

            output.push_str(&input[last_match_end..m.start()]);
            let new_start = output.len();
            output.push_str(replacement);
            transformations.push(Transformation::new(
                m.start(),
                m.end(),
                new_start,
                output.len(),
            ));
            last_match_end = m.end();
        }

        output.push_str(&input[last_match_end..]);
        (output, transformations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_char_filter() {
        let mut mapping = HashMap::new();
        mapping.insert("ph".to_string(), "f".to_string());
        mapping.insert("phone".to_string(), "fone".to_string());
        mapping.insert("&".to_string(), " and ".to_string());

        let filter = MappingCharFilter::new(mapping).unwrap();
        let (text, ts) = filter.filter("phone & photo");
        assert_eq!(text, "fone  and  foto");
        assert_eq!(ts.len(), 3);
        assert_eq!(ts[0], Transformation::new(0, 5, 0, 4));
    }

    #[test]
    fn test_empty_mapping_is_identity() {
        let filter = MappingCharFilter::new(HashMap::new()).unwrap();
        assert_eq!(filter.filter("abc").0, "abc");
    }
}
