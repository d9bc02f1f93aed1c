//! Char filters that pre-process raw text before tokenization.
//!
//! Each filter returns the rewritten text plus the list of [`Transformation`]s it
//! applied, so token offsets can be mapped back onto the raw input with
//! [`correct_offset`].
//!
//! # Available Filters
//!
//! - [`html_strip::HtmlStripCharFilter`] - Removes markup and decodes common entities
//! - [`mapping::MappingCharFilter`] - Literal string replacement, longest match first
//! - [`pattern_replace::PatternReplaceCharFilter`] - Regex-based replacement

pub mod html_strip;
pub mod mapping;
pub mod pattern_replace;

use html_strip::HtmlStripCharFilter;
use mapping::MappingCharFilter;
use pattern_replace::PatternReplaceCharFilter;

/// One rewritten span: `original_start..original_end` became `new_start..new_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transformation {
    pub original_start: usize,
    pub original_end: usize,
    pub new_start: usize,
    pub new_end: usize,
}

impl Transformation {
    pub fn new(
        original_start: usize,
        original_end: usize,
        new_start: usize,
        new_end: usize,
    ) -> Self {
        Self {
            original_start,
            original_end,
            new_start,
            new_end,
        }
    }
}

/// The closed set of char filters an analyzer can run.
#[derive(Debug, Clone)]
pub enum CharFilter {
    HtmlStrip(HtmlStripCharFilter),
    Mapping(MappingCharFilter),
    PatternReplace(PatternReplaceCharFilter),
}

impl CharFilter {
    pub fn filter(&self, input: &str) -> (String, Vec<Transformation>) {
        match self {
            CharFilter::HtmlStrip(f) => f.filter(input),
            CharFilter::Mapping(f) => f.filter(input),
            CharFilter::PatternReplace(f) => f.filter(input),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CharFilter::HtmlStrip(_) => "html_strip",
            CharFilter::Mapping(_) => "mapping",
            CharFilter::PatternReplace(_) => "pattern_replace",
        }
    }
}

impl From<HtmlStripCharFilter> for CharFilter {
    fn from(f: HtmlStripCharFilter) -> Self {
        CharFilter::HtmlStrip(f)
    }
}

impl From<MappingCharFilter> for CharFilter {
    fn from(f: MappingCharFilter) -> Self {
        CharFilter::Mapping(f)
    }
}

impl From<PatternReplaceCharFilter> for CharFilter {
    fn from(f: PatternReplaceCharFilter) -> Self {
        CharFilter::PatternReplace(f)
    }
}

/// Maps an offset in filtered text back to the text the filter received.
///
/// Transformations must be ordered by position. Offsets inside a rewritten span are
/// interpolated linearly. At a deleted span, start offsets move past the removed text
/// while end offsets stay before it.
pub fn correct_offset(offset: usize, transformations: &[Transformation], is_end: bool) -> usize {
    let mut delta: isize = 0;
    for t in transformations {
        let new_len = t.new_end - t.new_start;
        let original_len = t.original_end - t.original_start;

        if new_len == 0 {
            if offset > t.new_start || (offset == t.new_start && !is_end) {
                delta += original_len as isize;
                continue;
            }
            break;
        }

        if offset >= t.new_end {
            delta += original_len as isize - new_len as isize;
        } else if offset >= t.new_start {
            return t.original_start + (offset - t.new_start) * original_len / new_len;
        } else {
            break;
        }
    }
    (offset as isize + delta).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_offset_after_shrink() {
        // "&amp;x" -> "&x"
        let ts = vec![Transformation::new(0, 5, 0, 1)];
        assert_eq!(correct_offset(1, &ts, true), 5);
        assert_eq!(correct_offset(2, &ts, false), 6);
    }

    #[test]
    fn test_correct_offset_before_change() {
        let ts = vec![Transformation::new(10, 14, 10, 10)];
        assert_eq!(correct_offset(3, &ts, false), 3);
    }

    #[test]
    fn test_correct_offset_at_deleted_span() {
        // "<b>hi" -> "hi": the token starting at 0 starts at 3 in the raw text.
        let ts = vec![Transformation::new(0, 3, 0, 0)];
        assert_eq!(correct_offset(0, &ts, false), 3);
        assert_eq!(correct_offset(2, &ts, true), 5);

        // "fish</b>" -> "fish": the token end stays before the tag.
        let ts = vec![Transformation::new(4, 8, 4, 4)];
        assert_eq!(correct_offset(4, &ts, true), 4);
    }
}
