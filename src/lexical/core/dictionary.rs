//! FST-backed term dictionary.
//!
//! Maps every distinct term of one field to the byte offset of its postings. The FST
//! shares prefixes and suffixes across terms, so lookups cost one transition per
//! input byte and the dictionary stays a flat buffer that is used in place.

use std::collections::BTreeMap;

use fst::automaton::{AlwaysMatch, Automaton, Str, StartsWith};
use fst::map::Stream;
use fst::{IntoStreamer, Map, MapBuilder, Streamer};

use crate::error::{Result, XiphosError};
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::{BufWriteExt, ByteCursor};

/// Sorted term to postings-offset map for a single field.
#[derive(Clone)]
pub struct TermDictionary {
    map: Map<OwnedBytes>,
}

impl std::fmt::Debug for TermDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermDictionary")
            .field("terms", &self.map.len())
            .finish()
    }
}

impl TermDictionary {
    pub fn open(bytes: OwnedBytes) -> Result<Self> {
        let map = Map::new(bytes)
            .map_err(|e| XiphosError::corruption(format!("invalid term dictionary: {e}")))?;
        Ok(TermDictionary { map })
    }

    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Postings offset of `term`, if present.
    pub fn get(&self, term: &str) -> Option<u64> {
        self.map.get(term.as_bytes())
    }

    /// Terms starting with `prefix`, in lexicographic order.
    pub fn prefix_iterate<'a>(&'a self, prefix: &'a str) -> TermIter<'a, StartsWith<Str<'a>>> {
        self.intersect(Str::new(prefix).starts_with())
    }

    /// Terms accepted by `automaton`, walking the FST and the automaton in lock-step.
    pub fn intersect<A: Automaton>(&self, automaton: A) -> TermIter<'_, A> {
        TermIter {
            stream: self.map.search(automaton).into_stream(),
        }
    }

    /// Every term in order.
    pub fn terms(&self) -> TermIter<'_, AlwaysMatch> {
        TermIter {
            stream: self.map.stream(),
        }
    }

    pub(crate) fn map(&self) -> &Map<OwnedBytes> {
        &self.map
    }
}

/// Owned `(term, postings_offset)` pairs pulled from an FST stream.
pub struct TermIter<'m, A: Automaton> {
    stream: Stream<'m, A>,
}

impl<A: Automaton> Iterator for TermIter<'_, A> {
    type Item = (String, u64);

    fn next(&mut self) -> Option<(String, u64)> {
        let (key, offset) = Streamer::next(&mut self.stream)?;
        Some((String::from_utf8_lossy(key).into_owned(), offset))
    }
}

/// Builds a dictionary from terms inserted in strictly increasing order.
pub struct TermDictionaryBuilder {
    builder: MapBuilder<Vec<u8>>,
}

impl TermDictionaryBuilder {
    pub fn new() -> Self {
        TermDictionaryBuilder {
            builder: MapBuilder::memory(),
        }
    }

    pub fn insert(&mut self, term: &str, postings_offset: u64) -> Result<()> {
        self.builder
            .insert(term.as_bytes(), postings_offset)
            .map_err(|e| XiphosError::index(format!("term '{term}' out of order: {e}")))
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        self.builder
            .into_inner()
            .map_err(|e| XiphosError::index(format!("failed to finish term dictionary: {e}")))
    }
}

impl Default for TermDictionaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes the per-field dictionaries of a segment (`.tim` body).
pub fn encode_dictionaries(fields: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_vu32(fields.len() as u32);
    for (field, fst_bytes) in fields {
        out.put_str(field);
        out.put_blob(fst_bytes);
    }
    out
}

/// Parses a `.tim` body; each dictionary keeps pointing into `body`.
pub fn decode_dictionaries(body: &OwnedBytes) -> Result<BTreeMap<String, TermDictionary>> {
    let mut cursor = ByteCursor::new(body);
    let count = cursor.read_vu32()?;
    let mut fields = BTreeMap::new();
    for _ in 0..count {
        let field = cursor.read_str()?.to_string();
        let len = cursor.read_vu32()? as usize;
        let start = cursor.position();
        cursor.read_bytes(len)?;
        let dictionary = TermDictionary::open(body.slice(start..start + len))?;
        fields.insert(field, dictionary);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::core::automaton::{LevenshteinAutomaton, WildcardAutomaton};

    fn dictionary(terms: &[&str]) -> TermDictionary {
        let mut sorted: Vec<&str> = terms.to_vec();
        sorted.sort();
        let mut builder = TermDictionaryBuilder::new();
        for (i, term) in sorted.iter().enumerate() {
            builder.insert(term, i as u64 * 10).unwrap();
        }
        TermDictionary::open(OwnedBytes::new(builder.finish().unwrap())).unwrap()
    }

    #[test]
    fn test_get() {
        let dict = dictionary(&["brown", "dog", "fox", "quick"]);
        assert_eq!(dict.len(), 4);
        assert_eq!(dict.get("brown"), Some(0));
        assert_eq!(dict.get("quick"), Some(30));
        assert_eq!(dict.get("qui"), None);
    }

    #[test]
    fn test_prefix_iterate() {
        let dict = dictionary(&["quack", "quick", "quicker", "quiet", "brown"]);
        let terms: Vec<String> = dict.prefix_iterate("quic").map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["quick", "quicker"]);
        assert_eq!(dict.prefix_iterate("z").count(), 0);
    }

    #[test]
    fn test_intersect_with_automata() {
        let dict = dictionary(&["fix", "fox", "foxes", "box", "quick"]);

        let fuzzy = LevenshteinAutomaton::new("fox", 1, 0, true).unwrap();
        let terms: Vec<String> = dict.intersect(fuzzy).map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["box", "fix", "fox"]);

        let wildcard = WildcardAutomaton::new("f*x");
        let terms: Vec<String> = dict.intersect(wildcard).map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["fix", "fox"]);
    }

    #[test]
    fn test_out_of_order_insert_fails() {
        let mut builder = TermDictionaryBuilder::new();
        builder.insert("b", 0).unwrap();
        assert!(builder.insert("a", 1).is_err());
    }

    #[test]
    fn test_field_table() {
        let mut fields = BTreeMap::new();
        for field in ["body", "title"] {
            let mut builder = TermDictionaryBuilder::new();
            builder.insert(field, 7).unwrap();
            fields.insert(field.to_string(), builder.finish().unwrap());
        }
        let body = OwnedBytes::new(encode_dictionaries(&fields));
        let decoded = decode_dictionaries(&body).unwrap();
        assert_eq!(decoded["title"].get("title"), Some(7));
        assert_eq!(decoded["body"].get("title"), None);
    }
}
