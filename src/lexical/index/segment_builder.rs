//! In-memory indexing buffer.
//!
//! Accumulates postings, norms, doc values and points for the documents added since
//! the last refresh, then writes them out as one segment. A document block (nested
//! children followed by their root) is validated and analyzed completely before any
//! buffer is touched, so a rejected document leaves the buffer unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use log::debug;

use crate::analysis::analyzer::per_field::PerFieldAnalyzer;
use crate::document::{Document, FieldType, FieldValue, ID_FIELD, RESERVED_FIELD_PREFIX};
use crate::error::{Result, XiphosError};
use crate::lexical::core::bkd_tree::BkdWriter;
use crate::lexical::core::doc_values::NumericKind;
use crate::lexical::core::field_info::FieldInfos;
use crate::lexical::core::posting::TermPosition;
use crate::lexical::core::stored_fields::{StoredDocument, StoredFieldsWriter};
use crate::lexical::index::segment::writer::SegmentWriter;
use crate::lexical::index::segment::{SegmentInfo, SegmentSource};
use crate::storage::Storage;
use crate::util::sortable::{encode_f64, encode_i64, f64_to_sortable_i64};

/// Position gap inserted between the values of a multi-valued text field, so phrases
/// never match across values.
pub const POSITION_GAP: u32 = 100;

/// Hidden keyword field holding the nested path of child documents.
pub const NESTED_PATH_FIELD: &str = "_nested_path";

const POSTING_OVERHEAD: usize = 24;
const TERM_OVERHEAD: usize = 64;

#[derive(Debug)]
struct BufferedPosting {
    doc: u32,
    freq: u32,
    positions: Vec<TermPosition>,
}

#[derive(Debug)]
struct FieldBuffer {
    field_type: FieldType,
    terms: AHashMap<String, Vec<BufferedPosting>>,
    /// Field lengths by doc; only text fields keep them.
    norms: Vec<u64>,
    doc_count: u32,
    numeric: Vec<(u32, i64)>,
    keywords: Vec<(u32, String)>,
    points: Vec<(Vec<u8>, u32)>,
}

impl FieldBuffer {
    fn new(field_type: FieldType) -> Self {
        FieldBuffer {
            field_type,
            terms: AHashMap::new(),
            norms: Vec::new(),
            doc_count: 0,
            numeric: Vec::new(),
            keywords: Vec::new(),
            points: Vec::new(),
        }
    }
}

/// One field of one document, analyzed and converted, ready to be buffered.
#[derive(Debug, Default)]
struct PreparedField {
    terms: BTreeMap<String, Vec<TermPosition>>,
    length: u64,
    numbers: Vec<i64>,
    keywords: Vec<String>,
    points: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct PreparedDoc {
    stored: StoredDocument,
    root_id: Option<String>,
    fields: Vec<(String, FieldType, PreparedField)>,
}

/// An analyzed document block, ready to be buffered.
#[derive(Debug)]
pub struct PreparedBlock {
    docs: Vec<PreparedDoc>,
    seen: BTreeMap<String, FieldType>,
}

#[derive(Debug)]
pub struct SegmentBuilder {
    analyzer: Arc<PerFieldAnalyzer>,
    fields: BTreeMap<String, FieldBuffer>,
    stored: StoredFieldsWriter,
    roots: Vec<bool>,
    ids: AHashMap<String, u32>,
    deleted: Vec<u32>,
    ram_bytes: usize,
}

impl SegmentBuilder {
    pub fn new(analyzer: Arc<PerFieldAnalyzer>) -> Self {
        SegmentBuilder {
            analyzer,
            fields: BTreeMap::new(),
            stored: StoredFieldsWriter::new(),
            roots: Vec::new(),
            ids: AHashMap::new(),
            deleted: Vec::new(),
            ram_bytes: 0,
        }
    }

    /// Internal docs buffered, nested children included.
    pub fn num_docs(&self) -> u32 {
        self.roots.len() as u32
    }

    /// Root documents buffered and not deleted since.
    pub fn num_live_roots(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Approximate heap use of the buffered data.
    pub fn ram_bytes(&self) -> usize {
        self.ram_bytes
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Validates, analyzes and buffers a document with its nested children. Field
    /// types seen for the first time are registered in `field_infos`.
    pub fn add_document(&mut self, field_infos: &mut FieldInfos, document: &Document) -> Result<()> {
        let block = self.prepare_document(field_infos, document)?;
        self.add_prepared(field_infos, block)
    }

    /// Validates and analyzes a document block without touching the buffer.
    pub fn prepare_document(&self, field_infos: &FieldInfos, document: &Document) -> Result<PreparedBlock> {
        if document.id().is_empty() {
            return Err(XiphosError::field("document id must not be empty"));
        }
        let mut docs = Vec::with_capacity(document.block_len());
        let mut seen = BTreeMap::new();
        self.prepare(document, None, field_infos, &mut seen, &mut docs)?;
        Ok(PreparedBlock { docs, seen })
    }

    /// Buffers a block produced by [`prepare_document`](Self::prepare_document).
    pub fn add_prepared(&mut self, field_infos: &mut FieldInfos, block: PreparedBlock) -> Result<()> {
        for (name, field_type) in &block.seen {
            field_infos.register(name, *field_type)?;
        }
        for prepared in block.docs {
            self.apply(prepared)?;
        }
        Ok(())
    }

    fn prepare(
        &self,
        document: &Document,
        path: Option<&str>,
        field_infos: &FieldInfos,
        seen: &mut BTreeMap<String, FieldType>,
        out: &mut Vec<PreparedDoc>,
    ) -> Result<()> {
        for (child_path, children) in document.nested() {
            validate_field_name(child_path)?;
            let full_path = match path {
                Some(parent) => format!("{parent}.{child_path}"),
                None => child_path.clone(),
            };
            for child in children {
                self.prepare(child, Some(&full_path), field_infos, seen, out)?;
            }
        }

        let mut fields = Vec::with_capacity(document.fields().len() + 1);
        for (name, values) in document.fields() {
            validate_field_name(name)?;
            let Some(first) = values.first() else {
                continue;
            };
            let field_type = first.field_type();
            let full_name = match path {
                Some(parent) => format!("{parent}.{name}"),
                None => name.clone(),
            };
            if let Some(other) = values.iter().find(|v| v.field_type() != field_type) {
                return Err(XiphosError::field(format!(
                    "field '{full_name}' mixes {field_type:?} and {:?} values",
                    other.field_type()
                )));
            }
            field_infos.check(&full_name, field_type)?;
            if let Some(existing) = seen.get(&full_name) {
                if *existing != field_type {
                    return Err(XiphosError::field(format!(
                        "field '{full_name}' is {existing:?} earlier in the same document, got {field_type:?}"
                    )));
                }
            }
            seen.insert(full_name.clone(), field_type);

            let prepared = self.prepare_field(&full_name, values)?;
            fields.push((full_name, field_type, prepared));
        }

        let (hidden_field, hidden_value) = match path {
            Some(p) => (NESTED_PATH_FIELD, p.to_string()),
            None => (ID_FIELD, document.id().to_string()),
        };
        let mut hidden = PreparedField::default();
        hidden
            .terms
            .insert(hidden_value, vec![TermPosition::new(0, 1)]);
        fields.push((hidden_field.to_string(), FieldType::Keyword, hidden));

        out.push(PreparedDoc {
            stored: StoredDocument {
                path: path.map(str::to_string),
                document: document.clone(),
            },
            root_id: path.is_none().then(|| document.id().to_string()),
            fields,
        });
        Ok(())
    }

    fn prepare_field(&self, name: &str, values: &[FieldValue]) -> Result<PreparedField> {
        let mut prepared = PreparedField::default();
        let mut base = 0u32;
        for value in values {
            match value {
                FieldValue::Text(text) => {
                    let mut last = None;
                    for token in self.analyzer.analyze(name, text)? {
                        if token.is_stopped() {
                            continue;
                        }
                        let position = base + token.position as u32;
                        prepared
                            .terms
                            .entry(token.text)
                            .or_default()
                            .push(TermPosition::new(position, token.position_length as u32));
                        prepared.length += 1;
                        last = Some(position);
                    }
                    if let Some(last) = last {
                        base = last + 1 + POSITION_GAP;
                    }
                }
                FieldValue::Keyword(keyword) => {
                    prepared
                        .terms
                        .entry(keyword.clone())
                        .or_default()
                        .push(TermPosition::new(0, 1));
                    prepared.keywords.push(keyword.clone());
                }
                FieldValue::Boolean(flag) => {
                    let term = if *flag { "true" } else { "false" };
                    prepared
                        .terms
                        .entry(term.to_string())
                        .or_default()
                        .push(TermPosition::new(0, 1));
                }
                FieldValue::Integer(v) => {
                    prepared.numbers.push(*v);
                    prepared.points.push(encode_i64(*v).to_vec());
                }
                FieldValue::DateTime(v) => {
                    let millis = v.timestamp_millis();
                    prepared.numbers.push(millis);
                    prepared.points.push(encode_i64(millis).to_vec());
                }
                FieldValue::Float(v) => {
                    if v.is_nan() {
                        return Err(XiphosError::field(format!("field '{name}': NaN is not indexable")));
                    }
                    prepared.numbers.push(f64_to_sortable_i64(*v));
                    prepared.points.push(encode_f64(*v).to_vec());
                }
                FieldValue::Geo { lat, lon } => {
                    if !(-90.0..=90.0).contains(lat) || !(-180.0..=180.0).contains(lon) {
                        return Err(XiphosError::field(format!(
                            "field '{name}': invalid geo point ({lat}, {lon})"
                        )));
                    }
                    let mut packed = encode_f64(*lat).to_vec();
                    packed.extend_from_slice(&encode_f64(*lon));
                    prepared.points.push(packed);
                }
            }
        }
        for positions in prepared.terms.values_mut() {
            positions.sort_unstable();
        }
        Ok(prepared)
    }

    fn apply(&mut self, prepared: PreparedDoc) -> Result<()> {
        let doc = self.roots.len() as u32;
        self.stored.add(&prepared.stored)?;
        self.roots.push(prepared.root_id.is_some());
        if let Some(id) = prepared.root_id {
            self.ram_bytes += id.len() + TERM_OVERHEAD;
            self.ids.insert(id, doc);
        }

        for (name, field_type, field) in prepared.fields {
            let buffer = self
                .fields
                .entry(name)
                .or_insert_with(|| FieldBuffer::new(field_type));
            // a text value with no tokens leaves the field empty, as after a merge
            if field_type != FieldType::Text || field.length > 0 {
                buffer.doc_count += 1;
            }

            if field_type == FieldType::Text {
                buffer.norms.resize(doc as usize, 0);
                buffer.norms.push(field.length);
            }
            for (term, positions) in field.terms {
                self.ram_bytes += POSTING_OVERHEAD + positions.len() * 8;
                let freq = positions.len() as u32;
                let positions = if field_type.has_positions() {
                    positions
                } else {
                    Vec::new()
                };
                let postings = match buffer.terms.get_mut(&term) {
                    Some(postings) => postings,
                    None => {
                        self.ram_bytes += term.len() + TERM_OVERHEAD;
                        buffer.terms.entry(term).or_default()
                    }
                };
                postings.push(BufferedPosting {
                    doc,
                    freq,
                    positions,
                });
            }
            self.ram_bytes += field.numbers.len() * 12 + field.points.len() * 24;
            buffer.numeric.extend(field.numbers.into_iter().map(|v| (doc, v)));
            for keyword in field.keywords {
                self.ram_bytes += keyword.len() + 8;
                buffer.keywords.push((doc, keyword));
            }
            buffer.points.extend(field.points.into_iter().map(|p| (p, doc)));
        }
        Ok(())
    }

    /// Marks the buffered block of `id` deleted. Returns false if `id` is not buffered.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(root) = self.ids.remove(id) else {
            return false;
        };
        let start = (0..root)
            .rev()
            .find(|d| self.roots[*d as usize])
            .map_or(0, |previous| previous + 1);
        self.deleted.extend(start..=root);
        true
    }

    /// Writes the buffer as segment `name`. Returns the descriptor and the docs deleted
    /// while buffered, which the caller applies to the new segment's live docs. The
    /// buffer itself is left intact, so a failed write loses nothing.
    pub fn build(&self, storage: Arc<dyn Storage>, name: String) -> Result<(SegmentInfo, Vec<u32>)> {
        let num_docs = self.roots.len() as u32;
        let mut writer = SegmentWriter::new(storage, name, num_docs);
        for (doc, is_root) in self.roots.iter().enumerate() {
            if !is_root {
                writer.set_root(doc as u32, false);
            }
        }

        for (name, buffer) in &self.fields {
            let field_type = buffer.field_type;
            if buffer.terms.is_empty() {
                writer.add_field_meta(name, field_type, buffer.doc_count);
            } else {
                let mut terms: Vec<_> = buffer.terms.iter().collect();
                terms.sort_unstable_by(|a, b| a.0.cmp(b.0));
                writer.begin_terms(name, field_type)?;
                for (term, postings) in terms {
                    writer.start_term();
                    for posting in postings {
                        writer.add_posting(posting.doc, posting.freq, &posting.positions)?;
                    }
                    writer.finish_term(term)?;
                }
                let norms = (field_type == FieldType::Text).then(|| {
                    let mut norms = buffer.norms.clone();
                    norms.resize(num_docs as usize, 0);
                    norms
                });
                writer.end_terms(buffer.doc_count, norms)?;
            }

            if !buffer.numeric.is_empty() {
                let mut per_doc = vec![Vec::new(); num_docs as usize];
                for (doc, value) in &buffer.numeric {
                    per_doc[*doc as usize].push(*value);
                }
                let kind = if field_type == FieldType::Float {
                    NumericKind::Float
                } else {
                    NumericKind::Integer
                };
                writer.add_numeric_doc_values(name, &per_doc, kind);
            }
            if !buffer.keywords.is_empty() {
                let mut per_doc = vec![Vec::new(); num_docs as usize];
                for (doc, value) in &buffer.keywords {
                    per_doc[*doc as usize].push(value.clone());
                }
                writer.add_sorted_set_doc_values(name, &per_doc);
            }
            if !buffer.points.is_empty() {
                let mut bkd = BkdWriter::new(field_type.point_dims(), 8)?;
                for (value, doc) in &buffer.points {
                    bkd.add(value.clone(), *doc)?;
                }
                writer.add_points(name, bkd);
            }
        }

        writer.set_stored(self.stored.clone());
        let info = writer.finish(SegmentSource::Flush)?;
        debug!(
            "built segment {} from buffer ({} docs, {} deleted while buffered)",
            info.name,
            num_docs,
            self.deleted.len()
        );
        Ok((info, self.deleted.clone()))
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(XiphosError::field("field name must not be empty"));
    }
    if name.starts_with(RESERVED_FIELD_PREFIX) {
        return Err(XiphosError::field(format!(
            "field name '{name}' uses the reserved prefix '{RESERVED_FIELD_PREFIX}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::index::segment::reader::SegmentReader;
    use crate::storage::memory::MemoryStorage;

    fn builder() -> SegmentBuilder {
        SegmentBuilder::new(Arc::new(PerFieldAnalyzer::default()))
    }

    fn open(builder: SegmentBuilder) -> (SegmentReader, Vec<u32>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let (info, deleted) = builder.build(Arc::clone(&storage), "_0".into()).unwrap();
        (SegmentReader::open(storage, info).unwrap(), deleted)
    }

    #[test]
    fn test_buffer_round_trip() {
        let mut infos = FieldInfos::new();
        let mut builder = builder();
        let docs = [
            Document::builder("1")
                .add_text("body", "the quick brown fox")
                .add_integer("year", 2020)
                .build(),
            Document::builder("2")
                .add_text("body", "the lazy dog")
                .add_keyword("tag", "animal")
                .add_float("price", 9.5)
                .build(),
        ];
        for doc in &docs {
            builder.add_document(&mut infos, doc).unwrap();
        }
        assert_eq!(infos.get("year"), Some(FieldType::Integer));
        assert!(builder.ram_bytes() > 0);

        let (reader, deleted) = open(builder);
        assert!(deleted.is_empty());
        assert_eq!(reader.num_docs(), 2);
        assert_eq!(reader.term_info("body", "the").unwrap().unwrap().doc_freq, 2);

        let mut fox = reader.postings("body", "fox").unwrap().unwrap();
        assert_eq!(fox.next().unwrap(), 0);
        assert_eq!(fox.positions().unwrap()[0].position, 3);

        let body = reader.field_info("body").unwrap();
        assert_eq!(body.norm(0), 4);
        assert_eq!(body.norm(1), 3);
        assert_eq!(body.stats.sum_total_term_freq, 7);

        assert_eq!(reader.numeric_doc_values("year").unwrap().first(0), Some(2020));
        assert_eq!(reader.numeric_doc_values("price").unwrap().first_f64(1), Some(9.5));
        assert_eq!(
            reader.sorted_set_doc_values("tag").unwrap().values(1).unwrap(),
            vec!["animal".to_string()]
        );
        assert_eq!(reader.points("year").unwrap().len(), 1);
        assert!(reader.postings(ID_FIELD, "2").unwrap().is_some());
        assert_eq!(reader.document(1).unwrap().document, docs[1]);
    }

    #[test]
    fn test_rejected_document_leaves_buffer_untouched() {
        let mut infos = FieldInfos::new();
        let mut builder = builder();
        builder
            .add_document(&mut infos, &Document::builder("1").add_integer("year", 1).build())
            .unwrap();
        let ram = builder.ram_bytes();

        let conflicting = Document::builder("2")
            .add_text("body", "fine")
            .add_text("year", "not a number")
            .build();
        let err = builder.add_document(&mut infos, &conflicting).unwrap_err();
        assert!(matches!(err, XiphosError::Field(_)));
        assert_eq!(builder.num_docs(), 1);
        assert_eq!(builder.ram_bytes(), ram);
        assert_eq!(infos.get("body"), None);

        let reserved = Document::builder("3").add_text("_secret", "x").build();
        assert!(builder.add_document(&mut infos, &reserved).is_err());
    }

    #[test]
    fn test_nested_block_layout() {
        let mut infos = FieldInfos::new();
        let mut builder = builder();
        let doc = Document::builder("post")
            .add_text("title", "rust")
            .add_nested("comments", Document::builder("c1").add_text("text", "nice").build())
            .add_nested("comments", Document::builder("c2").add_text("text", "great").build())
            .build();
        builder.add_document(&mut infos, &doc).unwrap();
        assert_eq!(builder.num_docs(), 3);
        assert_eq!(infos.get("comments.text"), Some(FieldType::Text));

        let (reader, _) = open(builder);
        assert!(!reader.is_root(0));
        assert!(!reader.is_root(1));
        assert!(reader.is_root(2));
        assert_eq!(reader.parent_of(1), Some(2));
        let mut paths = reader.postings(NESTED_PATH_FIELD, "comments").unwrap().unwrap();
        assert_eq!(paths.doc_freq(), 2);
        assert_eq!(paths.next().unwrap(), 0);
        assert_eq!(reader.document(0).unwrap().path.as_deref(), Some("comments"));
    }

    #[test]
    fn test_delete_while_buffered() {
        let mut infos = FieldInfos::new();
        let mut builder = builder();
        let parent = Document::builder("a")
            .add_nested("items", Document::builder("i").add_keyword("sku", "x").build())
            .build();
        builder.add_document(&mut infos, &parent).unwrap();
        builder
            .add_document(&mut infos, &Document::builder("b").add_text("body", "kept").build())
            .unwrap();

        assert!(builder.delete("a"));
        assert!(!builder.delete("a"));
        assert!(!builder.contains_id("a"));
        assert_eq!(builder.num_live_roots(), 1);

        let (_, deleted) = open(builder);
        assert_eq!(deleted, vec![0, 1]);
    }

    #[test]
    fn test_multi_valued_text_gap() {
        let mut infos = FieldInfos::new();
        let mut builder = builder();
        let doc = Document::builder("1")
            .add_text("body", "quick")
            .add_text("body", "fox")
            .build();
        builder.add_document(&mut infos, &doc).unwrap();
        let (reader, _) = open(builder);
        let mut fox = reader.postings("body", "fox").unwrap().unwrap();
        fox.next().unwrap();
        assert_eq!(fox.positions().unwrap()[0].position, 1 + POSITION_GAP);
    }
}
