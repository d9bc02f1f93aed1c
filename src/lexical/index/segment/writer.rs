//! Assembles the files of a new segment.
//!
//! Used by both refresh (from the indexing buffer) and merge (from existing segments).
//! Everything is encoded in memory; [`SegmentWriter::finish`] writes each file under a
//! temporary name, renames it into place and writes `.si` last, so a segment whose
//! `.si` is missing was never completed and is ignored on recovery.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use bit_vec::BitVec;
use chrono::Utc;
use log::debug;

use crate::document::FieldType;
use crate::error::{Result, XiphosError};
use crate::lexical::core::bkd_tree::BkdWriter;
use crate::lexical::core::dictionary::{TermDictionaryBuilder, encode_dictionaries};
use crate::lexical::core::doc_values::{NumericKind, encode_sorted_numeric, encode_sorted_set};
use crate::lexical::core::field_info::{FieldMetaInput, FieldStats, SegmentFields};
use crate::lexical::core::live_docs::LiveDocs;
use crate::lexical::core::posting::{PostingsWriter, TermInfo, TermPosition};
use crate::lexical::core::stored_fields::{StoredDocument, StoredFieldsWriter};
use crate::lexical::index::segment::{
    MAGIC_DOC_VALUES, MAGIC_DOCS, MAGIC_FIELDS, MAGIC_LIVE_DOCS, MAGIC_POINTS, MAGIC_POSITIONS,
    MAGIC_STORED, MAGIC_TERMS, SegmentInfo, SegmentSource, TEMP_SUFFIX, info_file, live_docs_file,
};
use crate::storage::Storage;
use crate::storage::structured::write_checksummed;
use crate::util::cursor::BufWriteExt;

pub(crate) const DOC_VALUES_NUMERIC: u8 = 0;
pub(crate) const DOC_VALUES_SORTED_SET: u8 = 1;

/// Field currently receiving terms.
struct OpenField {
    name: String,
    field_type: FieldType,
    dictionary: TermDictionaryBuilder,
    sum_doc_freq: u64,
    sum_total_term_freq: u64,
}

pub struct SegmentWriter {
    storage: Arc<dyn Storage>,
    name: String,
    num_docs: u32,
    postings: PostingsWriter,
    dictionaries: BTreeMap<String, Vec<u8>>,
    field_meta: Vec<FieldMetaInput>,
    doc_values: Vec<(String, u8, Vec<u8>)>,
    points: Vec<(String, Vec<u8>)>,
    stored: StoredFieldsWriter,
    roots: BitVec,
    open_field: Option<OpenField>,
}

impl SegmentWriter {
    pub fn new(storage: Arc<dyn Storage>, name: String, num_docs: u32) -> Self {
        SegmentWriter {
            storage,
            name,
            num_docs,
            postings: PostingsWriter::new(),
            dictionaries: BTreeMap::new(),
            field_meta: Vec::new(),
            doc_values: Vec::new(),
            points: Vec::new(),
            stored: StoredFieldsWriter::new(),
            roots: BitVec::from_elem(num_docs as usize, true),
            open_field: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the term dictionary of a field. Terms must follow in sorted order.
    pub fn begin_terms(&mut self, field: &str, field_type: FieldType) -> Result<()> {
        if self.open_field.is_some() {
            return Err(XiphosError::index("begin_terms called with a field still open"));
        }
        self.open_field = Some(OpenField {
            name: field.to_string(),
            field_type,
            dictionary: TermDictionaryBuilder::new(),
            sum_doc_freq: 0,
            sum_total_term_freq: 0,
        });
        Ok(())
    }

    pub fn start_term(&mut self) {
        self.postings.start_term();
    }

    pub fn add_posting(&mut self, doc: u32, freq: u32, positions: &[TermPosition]) -> Result<()> {
        self.postings.add_doc(doc, freq, positions)
    }

    /// Closes the current term. Terms without postings are dropped.
    pub fn finish_term(&mut self, term: &str) -> Result<TermInfo> {
        let field = self
            .open_field
            .as_mut()
            .ok_or_else(|| XiphosError::index("finish_term called without an open field"))?;
        let (offset, info) = self.postings.finish_term()?;
        if info.doc_freq > 0 {
            field.dictionary.insert(term, offset)?;
            field.sum_doc_freq += info.doc_freq as u64;
            field.sum_total_term_freq += info.total_term_freq;
        }
        Ok(info)
    }

    /// Closes the open field with its document count and norms.
    pub fn end_terms(&mut self, doc_count: u32, norms: Option<Vec<u64>>) -> Result<()> {
        let field = self
            .open_field
            .take()
            .ok_or_else(|| XiphosError::index("end_terms called without an open field"))?;
        self.dictionaries
            .insert(field.name.clone(), field.dictionary.finish()?);
        self.field_meta.push(FieldMetaInput {
            name: field.name,
            field_type: field.field_type,
            stats: FieldStats {
                doc_count,
                sum_total_term_freq: field.sum_total_term_freq,
                sum_doc_freq: field.sum_doc_freq,
            },
            norms,
        });
        Ok(())
    }

    /// Registers a field that has no terms (numbers, dates, geo points).
    pub fn add_field_meta(&mut self, field: &str, field_type: FieldType, doc_count: u32) {
        self.field_meta.push(FieldMetaInput {
            name: field.to_string(),
            field_type,
            stats: FieldStats {
                doc_count,
                ..FieldStats::default()
            },
            norms: None,
        });
    }

    pub fn add_numeric_doc_values(&mut self, field: &str, per_doc: &[Vec<i64>], kind: NumericKind) {
        self.doc_values.push((
            field.to_string(),
            DOC_VALUES_NUMERIC,
            encode_sorted_numeric(per_doc, kind),
        ));
    }

    pub fn add_sorted_set_doc_values(&mut self, field: &str, per_doc: &[Vec<String>]) {
        self.doc_values.push((
            field.to_string(),
            DOC_VALUES_SORTED_SET,
            encode_sorted_set(per_doc),
        ));
    }

    pub fn add_points(&mut self, field: &str, points: BkdWriter) {
        self.points.push((field.to_string(), points.finish()));
    }

    pub fn add_stored(&mut self, doc: &StoredDocument) -> Result<()> {
        self.stored.add(doc)
    }

    /// Replaces the stored fields with documents compressed elsewhere.
    pub fn set_stored(&mut self, stored: StoredFieldsWriter) {
        self.stored = stored;
    }

    pub fn set_root(&mut self, doc: u32, is_root: bool) {
        self.roots.set(doc as usize, is_root);
    }

    fn write_file(&self, files: &mut Vec<String>, name: String, magic: u32, body: &[u8]) -> Result<()> {
        let temp = format!("{name}{TEMP_SUFFIX}");
        write_checksummed(self.storage.as_ref(), &temp, magic, body)?;
        self.storage.rename_file(&temp, &name)?;
        files.push(name);
        Ok(())
    }

    /// Writes every file of the segment and returns its descriptor. Nothing is
    /// fsynced here; commits sync the listed files.
    pub fn finish(mut self, source: SegmentSource) -> Result<SegmentInfo> {
        if self.open_field.is_some() {
            return Err(XiphosError::index("segment finished with a field still open"));
        }
        if self.stored.num_docs() != self.num_docs {
            return Err(XiphosError::index(format!(
                "segment {} has {} stored docs, expected {}",
                self.name,
                self.stored.num_docs(),
                self.num_docs
            )));
        }

        let mut files = Vec::new();
        let name = self.name.clone();

        self.field_meta.sort_by(|a, b| a.name.cmp(&b.name));
        let fields = SegmentFields::encode(self.num_docs, &self.roots, &self.field_meta);
        self.write_file(&mut files, format!("{name}.fnm"), MAGIC_FIELDS, &fields)?;

        let terms = encode_dictionaries(&self.dictionaries);
        self.write_file(&mut files, format!("{name}.tim"), MAGIC_TERMS, &terms)?;

        let postings = std::mem::take(&mut self.postings);
        let (docs, positions) = postings.finish();
        self.write_file(&mut files, format!("{name}.doc"), MAGIC_DOCS, &docs)?;
        self.write_file(&mut files, format!("{name}.pos"), MAGIC_POSITIONS, &positions)?;

        let mut doc_values = Vec::new();
        doc_values.put_vu32(self.doc_values.len() as u32);
        for (field, kind, body) in &self.doc_values {
            doc_values.put_str(field);
            doc_values.put_u8(*kind);
            doc_values.put_blob(body);
        }
        self.write_file(&mut files, format!("{name}.dvd"), MAGIC_DOC_VALUES, &doc_values)?;

        let mut points = Vec::new();
        points.put_vu32(self.points.len() as u32);
        for (field, body) in &self.points {
            points.put_str(field);
            points.put_blob(body);
        }
        self.write_file(&mut files, format!("{name}.pts"), MAGIC_POINTS, &points)?;

        let stored = std::mem::take(&mut self.stored).finish()?;
        self.write_file(&mut files, format!("{name}.fdt"), MAGIC_STORED, &stored)?;

        let live = LiveDocs::new_all_live(self.num_docs);
        write_live_docs(self.storage.as_ref(), &name, 0, &live)?;

        let info = SegmentInfo {
            name: name.clone(),
            doc_count: self.num_docs,
            files,
            source,
            created_at: Utc::now(),
        };
        let temp = format!("{}{TEMP_SUFFIX}", info_file(&name));
        let mut output = self.storage.create_output(&temp)?;
        serde_json::to_writer(&mut output, &info)?;
        output.flush()?;
        drop(output);
        self.storage.rename_file(&temp, &info_file(&name))?;

        debug!("wrote segment {name} ({} docs, {source:?})", self.num_docs);
        Ok(info)
    }
}

/// Writes one live-docs generation of a segment.
pub fn write_live_docs(
    storage: &dyn Storage,
    segment: &str,
    generation: u64,
    live: &LiveDocs,
) -> Result<String> {
    let name = live_docs_file(segment, generation);
    let temp = format!("{name}{TEMP_SUFFIX}");
    write_checksummed(storage, &temp, MAGIC_LIVE_DOCS, &live.to_bytes())?;
    storage.rename_file(&temp, &name)?;
    Ok(name)
}

/// Every file a segment owns at live-docs generation `live_gen`.
pub fn segment_files(info: &SegmentInfo, live_gen: u64) -> Vec<String> {
    let mut files = info.files.clone();
    files.push(info_file(&info.name));
    files.push(live_docs_file(&info.name, live_gen));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_finish_publishes_files() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut writer = SegmentWriter::new(Arc::clone(&storage), "_0".into(), 1);
        writer.begin_terms("body", FieldType::Text).unwrap();
        writer.start_term();
        writer.add_posting(0, 1, &[TermPosition::new(0, 1)]).unwrap();
        writer.finish_term("fox").unwrap();
        writer.end_terms(1, Some(vec![1])).unwrap();
        writer
            .add_stored(&StoredDocument {
                path: None,
                document: crate::document::Document::new("1"),
            })
            .unwrap();
        let info = writer.finish(SegmentSource::Flush).unwrap();

        assert_eq!(info.doc_count, 1);
        for file in segment_files(&info, 0) {
            assert!(storage.file_exists(&file), "{file}");
        }
        let files = storage.list_files().unwrap();
        assert!(files.iter().all(|f| !f.ends_with(TEMP_SUFFIX)));
    }

    #[test]
    fn test_stored_count_must_match() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = SegmentWriter::new(Arc::clone(&storage), "_0".into(), 2);
        assert!(writer.finish(SegmentSource::Flush).is_err());
        assert!(!storage.file_exists("_0.si"));
    }
}
