//! Markup stripping char filter.

use super::Transformation;

const ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
];

/// Removes `<...>` tags and decodes the common named entities.
///
/// Block-level tags are replaced by a single space so words on either side do not
/// fuse together.
#[derive(Debug, Clone, Default)]
pub struct HtmlStripCharFilter;

impl HtmlStripCharFilter {
    pub fn new() -> Self {
        HtmlStripCharFilter
    }

    fn is_block_tag(tag: &str) -> bool {
        let name = tag
            .trim_start_matches(['<', '/'])
            .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        matches!(
            name.as_str(),
            "p" | "br" | "div" | "li" | "ul" | "ol" | "tr" | "td" | "th" | "h1" | "h2" | "h3"
                | "h4" | "h5" | "h6" | "table" | "section" | "article" | "hr"
        )
    }

    pub fn filter(&self, input: &str) -> (String, Vec<Transformation>) {
        let mut output = String::with_capacity(input.len());
        let mut transformations = Vec::new();
        let mut i = 0;

        while i < input.len() {
            let rest = &input[i..];
            if rest.starts_with('<') {
                if let Some(end) = rest.find('>') {
                    let tag = &rest[..=end];
                    let new_start = output.len();
                    if Self::is_block_tag(tag) {
                        output.push(' ');
                    }
                    transformations.push(Transformation::new(i, i + end + 1, new_start, output.len()));
                    i += end + 1;
                    continue;
                }
            } else if rest.starts_with('&') {
                if let Some((entity, replacement)) =
                    ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity))
                {
                    let new_start = output.len();
                    output.push_str(replacement);
                    transformations.push(Transformation::new(
                        i,
                        i + entity.len(),
                        new_start,
                        output.len(),
                    ));
                    i += entity.len();
                    continue;
                }
            }

            let ch_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            output.push_str(&rest[..ch_len]);
            i += ch_len;
        }

        (output, transformations)
    }
}
