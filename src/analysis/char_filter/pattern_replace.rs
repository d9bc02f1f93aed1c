//! Regex replacement char filter.

use regex::Regex;

use super::Transformation;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PatternReplaceCharFilter {
    pattern: Regex,
    replacement: String,
}

impl PatternReplaceCharFilter {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    pub fn filter(&self, input: &str) -> (String, Vec<Transformation>) {
        let mut output = String::with_capacity(input.len());
        let mut transformations = Vec::new();
        let mut last_match_end = 0;

        for caps in self.pattern.captures_iter(input) {
            let Some(m) = caps.get(0) else { continue };

            output.push_str(&input[last_match_end..m.start()]);
            let new_start = output.len();
            caps.expand(&self.replacement, &mut output);
            let new_end = output.len();

            if m.as_str() != &output[new_start..new_end] {
                transformations.push(Transformation::new(m.start(), m.end(), new_start, new_end));
            }
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
    fn test_pattern_replace_with_groups() {
        let filter = PatternReplaceCharFilter::new(r"(\d+)-(\d+)", "$1$2").unwrap();
        let (text, ts) = filter.filter("call 555-1234 now");
        assert_eq!(text, "call 5551234 now");
        assert_eq!(ts, vec![Transformation::new(5, 13, 5, 12)]);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(PatternReplaceCharFilter::new("(", "").is_err());
    }
}
