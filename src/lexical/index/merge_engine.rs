//! Merge engine for lexical segments.
//!
//! Merging works at the codec level: term dictionaries are unioned through their
//! FSTs and postings are copied with remapped document ids, so no document is
//! re-analyzed. Deleted documents are dropped and the survivors keep their relative
//! order, which keeps nested blocks contiguous.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bit_vec::BitVec;
use fst::Streamer;
use fst::map::OpBuilder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::document::FieldType;
use crate::error::{Result, XiphosError};
use crate::lexical::core::bkd_tree::BkdWriter;
use crate::lexical::core::live_docs::LiveDocs;
use crate::lexical::core::posting::{NO_MORE_DOCS, TermPosition};
use crate::lexical::index::segment::reader::SegmentReader;
use crate::lexical::index::segment::writer::SegmentWriter;
use crate::lexical::index::segment::{SegmentInfo, SegmentSource, segment_of_file};
use crate::storage::Storage;

/// Documents copied between two cancellation checks.
const CANCEL_CHECK_DOCS: u32 = 256;
/// Terms copied between two cancellation checks.
const CANCEL_CHECK_TERMS: usize = 1024;

/// One segment taking part in a merge, with the deletions visible when it started.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub reader: Arc<SegmentReader>,
    pub live_docs: Arc<LiveDocs>,
}

/// Statistics about a merge operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeStats {
    pub segments_merged: u32,
    /// Documents in the output segment.
    pub docs_merged: u64,
    /// Deleted documents dropped by the merge.
    pub deletions_removed: u64,
    pub merge_time_ms: u64,
}

/// Result of a merge operation.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub info: SegmentInfo,
    /// For every input, old doc id to new doc id; `None` for dropped documents.
    pub doc_maps: Vec<Vec<Option<u32>>>,
    pub stats: MergeStats,
}

impl MergeResult {
    /// Where `doc` of input `input` landed.
    pub fn map_doc(&self, input: usize, doc: u32) -> Option<u32> {
        self.doc_maps.get(input)?.get(doc as usize).copied().flatten()
    }
}

/// Engine for merging lexical segments.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    storage: Arc<dyn Storage>,
}

impl MergeEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        MergeEngine { storage }
    }

    /// Merges `inputs` into a new segment called `name`.
    ///
    /// Returns [`XiphosError::OperationCancelled`] once `cancel` is raised. On any
    /// failure the partially written output is removed and the inputs are untouched.
    pub fn merge(&self, inputs: &[MergeInput], name: &str, cancel: &AtomicBool) -> Result<MergeResult> {
        let start = Instant::now();
        match self.merge_inner(inputs, name, cancel) {
            Ok((info, doc_maps)) => {
                let total: u64 = inputs.iter().map(|i| i.reader.num_docs() as u64).sum();
                let stats = MergeStats {
                    segments_merged: inputs.len() as u32,
                    docs_merged: info.doc_count as u64,
                    deletions_removed: total - info.doc_count as u64,
                    merge_time_ms: start.elapsed().as_millis() as u64,
                };
                info!(
                    "merged {} segments into {name}: {} docs, {} deletions removed in {}ms",
                    stats.segments_merged, stats.docs_merged, stats.deletions_removed, stats.merge_time_ms
                );
                Ok(MergeResult {
                    info,
                    doc_maps,
                    stats,
                })
            }
            Err(e) => {
                self.remove_output(name);
                if e.is_cancelled() {
                    debug!("merge into {name} cancelled");
                    Err(e)
                } else {
                    Err(XiphosError::merge(format!("merge into {name} failed: {e}")))
                }
            }
        }
    }

    fn merge_inner(
        &self,
        inputs: &[MergeInput],
        name: &str,
        cancel: &AtomicBool,
    ) -> Result<(SegmentInfo, Vec<Vec<Option<u32>>>)> {
        let mut doc_maps = Vec::with_capacity(inputs.len());
        let mut next = 0u32;
        for input in inputs {
            let map: Vec<Option<u32>> = (0..input.reader.num_docs())
                .map(|doc| {
                    input.live_docs.is_live(doc).then(|| {
                        next += 1;
                        next - 1
                    })
                })
                .collect();
            doc_maps.push(map);
        }
        let num_docs = next;

        let mut writer = SegmentWriter::new(Arc::clone(&self.storage), name.to_string(), num_docs);

        let field_names: BTreeSet<&str> = inputs
            .iter()
            .flat_map(|i| i.reader.fields().fields().map(|f| f.name.as_str()))
            .collect();
        for field in field_names {
            check_cancelled(cancel)?;
            self.merge_field(&mut writer, inputs, &doc_maps, field, num_docs, cancel)?;
        }

        for (input, map) in inputs.iter().zip(&doc_maps) {
            for (old, new) in map.iter().enumerate() {
                let Some(new) = *new else { continue };
                if new % CANCEL_CHECK_DOCS == 0 {
                    check_cancelled(cancel)?;
                }
                let old = old as u32;
                writer.add_stored(&input.reader.document(old)?)?;
                if !input.reader.is_root(old) {
                    writer.set_root(new, false);
                }
            }
        }

        check_cancelled(cancel)?;
        let info = writer.finish(SegmentSource::Merge)?;
        Ok((info, doc_maps))
    }

    fn merge_field(
        &self,
        writer: &mut SegmentWriter,
        inputs: &[MergeInput],
        doc_maps: &[Vec<Option<u32>>],
        field: &str,
        num_docs: u32,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let Some(field_type) = inputs
            .iter()
            .find_map(|i| i.reader.field_type(field))
        else {
            return Ok(());
        };
        let mut present = BitVec::from_elem(num_docs as usize, false);

        let has_terms = inputs.iter().any(|i| i.reader.terms(field).is_some_and(|t| !t.is_empty()));
        let norms = if has_terms {
            self.merge_terms(writer, inputs, doc_maps, field, field_type, &mut present, cancel)?;
            (field_type == FieldType::Text).then(|| {
                let mut norms = vec![0u64; num_docs as usize];
                for (input, map) in inputs.iter().zip(doc_maps) {
                    if let Some(info) = input.reader.field_info(field) {
                        for (old, new) in map.iter().enumerate() {
                            if let Some(new) = new {
                                norms[*new as usize] = info.norm(old as u32) as u64;
                            }
                        }
                    }
                }
                norms
            })
        } else {
            None
        };

        self.merge_doc_values(writer, inputs, doc_maps, field, num_docs, &mut present)?;
        self.merge_points(writer, inputs, doc_maps, field, &mut present)?;

        let doc_count = present.iter().filter(|p| *p).count() as u32;
        if has_terms {
            writer.end_terms(doc_count, norms)
        } else {
            writer.add_field_meta(field, field_type, doc_count);
            Ok(())
        }
    }

    /// Unions the term dictionaries of `field`; leaves the field open for
    /// [`SegmentWriter::end_terms`].
    #[allow(clippy::too_many_arguments)]
    fn merge_terms(
        &self,
        writer: &mut SegmentWriter,
        inputs: &[MergeInput],
        doc_maps: &[Vec<Option<u32>>],
        field: &str,
        field_type: FieldType,
        present: &mut BitVec,
        cancel: &AtomicBool,
    ) -> Result<()> {
        // stream index of the union -> input index
        let mut sources = Vec::new();
        let mut op = OpBuilder::new();
        for (index, input) in inputs.iter().enumerate() {
            if let Some(terms) = input.reader.terms(field) {
                op = op.add(terms.map());
                sources.push(index);
            }
        }

        writer.begin_terms(field, field_type)?;
        let with_positions = field_type.has_positions();
        let mut union = op.union();
        let mut positions: Vec<TermPosition> = Vec::new();
        let mut copied = 0usize;
        while let Some((term, values)) = union.next() {
            copied += 1;
            if copied % CANCEL_CHECK_TERMS == 0 {
                check_cancelled(cancel)?;
            }
            let term = std::str::from_utf8(term)
                .map_err(|_| XiphosError::corruption(format!("field {field}: term is not UTF-8")))?
                .to_string();
            let mut values = values.to_vec();
            values.sort_by_key(|v| v.index);

            writer.start_term();
            for value in values {
                let input = sources[value.index];
                let map = &doc_maps[input];
                let mut postings = inputs[input].reader.postings_at(field, value.value)?;
                loop {
                    let doc = postings.next()?;
                    if doc == NO_MORE_DOCS {
                        break;
                    }
                    let Some(new) = map.get(doc as usize).copied().flatten() else {
                        continue;
                    };
                    positions.clear();
                    if with_positions {
                        positions.extend_from_slice(postings.positions()?);
                    }
                    writer.add_posting(new, postings.freq(), &positions)?;
                    present.set(new as usize, true);
                }
            }
            writer.finish_term(&term)?;
        }
        Ok(())
    }

    fn merge_doc_values(
        &self,
        writer: &mut SegmentWriter,
        inputs: &[MergeInput],
        doc_maps: &[Vec<Option<u32>>],
        field: &str,
        num_docs: u32,
        present: &mut BitVec,
    ) -> Result<()> {
        let mut kind = None;
        let mut numeric: Vec<Vec<i64>> = Vec::new();
        let mut sorted_set: Vec<Vec<String>> = Vec::new();

        for (input, map) in inputs.iter().zip(doc_maps) {
            if let Some(values) = input.reader.numeric_doc_values(field) {
                let expected = *kind.get_or_insert(values.kind());
                if expected != values.kind() {
                    return Err(XiphosError::corruption(format!(
                        "field {field}: segments disagree on the numeric kind"
                    )));
                }
                numeric.resize(num_docs as usize, Vec::new());
                for (old, new) in map.iter().enumerate() {
                    if let Some(new) = new {
                        numeric[*new as usize].extend(values.values(old as u32));
                        if values.count(old as u32) > 0 {
                            present.set(*new as usize, true);
                        }
                    }
                }
            }
            if let Some(values) = input.reader.sorted_set_doc_values(field) {
                sorted_set.resize(num_docs as usize, Vec::new());
                for (old, new) in map.iter().enumerate() {
                    if let Some(new) = new {
                        let doc_values = values.values(old as u32)?;
                        if !doc_values.is_empty() {
                            present.set(*new as usize, true);
                        }
                        sorted_set[*new as usize] = doc_values;
                    }
                }
            }
        }

        if let Some(kind) = kind {
            writer.add_numeric_doc_values(field, &numeric, kind);
        }
        if !sorted_set.is_empty() {
            writer.add_sorted_set_doc_values(field, &sorted_set);
        }
        Ok(())
    }

    fn merge_points(
        &self,
        writer: &mut SegmentWriter,
        inputs: &[MergeInput],
        doc_maps: &[Vec<Option<u32>>],
        field: &str,
        present: &mut BitVec,
    ) -> Result<()> {
        let mut bkd: Option<BkdWriter> = None;
        for (input, map) in inputs.iter().zip(doc_maps) {
            let Some(tree) = input.reader.points(field) else { continue };
            if bkd.is_none() {
                bkd = Some(BkdWriter::new(tree.dims(), tree.bytes_per_dim())?);
            }
            let Some(out) = bkd.as_mut() else { continue };
            for (value, doc) in tree.points() {
                if let Some(new) = map.get(doc as usize).copied().flatten() {
                    out.add(value.to_vec(), new)?;
                    present.set(new as usize, true);
                }
            }
        }
        if let Some(bkd) = bkd.filter(|b| !b.is_empty()) {
            writer.add_points(field, bkd);
        }
        Ok(())
    }

    /// Best-effort removal of a failed merge output.
    fn remove_output(&self, name: &str) {
        let files = match self.storage.list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("cannot list files to clean up merge output {name}: {e}");
                return;
            }
        };
        for file in files.iter().filter(|f| segment_of_file(f) == Some(name)) {
            if let Err(e) = self.storage.delete_file(file) {
                warn!("cannot delete {file} of failed merge output: {e}");
            }
        }
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        Err(XiphosError::cancelled("merge"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::per_field::PerFieldAnalyzer;
    use crate::document::{Document, ID_FIELD};
    use crate::lexical::core::field_info::FieldInfos;
    use crate::lexical::index::segment_builder::SegmentBuilder;
    use crate::storage::memory::MemoryStorage;

    fn segment(storage: &Arc<dyn Storage>, name: &str, docs: &[Document]) -> Arc<SegmentReader> {
        let mut infos = FieldInfos::new();
        let mut builder = SegmentBuilder::new(Arc::new(PerFieldAnalyzer::default()));
        for doc in docs {
            builder.add_document(&mut infos, doc).unwrap();
        }
        let (info, _) = builder.build(Arc::clone(storage), name.to_string()).unwrap();
        Arc::new(SegmentReader::open(Arc::clone(storage), info).unwrap())
    }

    fn input(reader: Arc<SegmentReader>, deleted: &[u32]) -> MergeInput {
        let mut live = LiveDocs::new_all_live(reader.num_docs());
        for doc in deleted {
            live.delete(*doc);
        }
        MergeInput {
            reader,
            live_docs: Arc::new(live),
        }
    }

    fn doc(id: &str, body: &str, year: i64) -> Document {
        Document::builder(id)
            .add_text("body", body)
            .add_keyword("tag", format!("t{year}"))
            .add_integer("year", year)
            .build()
    }

    #[test]
    fn test_merge_drops_deleted_and_remaps() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let a = segment(
            &storage,
            "_0",
            &[doc("1", "the quick brown fox", 2001), doc("2", "the lazy dog", 2002)],
        );
        let b = segment(&storage, "_1", &[doc("3", "quick fox jumps", 2003)]);

        let engine = MergeEngine::new(Arc::clone(&storage));
        let cancel = AtomicBool::new(false);
        let result = engine
            .merge(&[input(a, &[1]), input(b, &[])], "_2", &cancel)
            .unwrap();
        assert_eq!(result.info.doc_count, 2);
        assert_eq!(result.map_doc(0, 0), Some(0));
        assert_eq!(result.map_doc(0, 1), None);
        assert_eq!(result.map_doc(1, 0), Some(1));
        assert_eq!(result.stats.deletions_removed, 1);

        let merged = SegmentReader::open(Arc::clone(&storage), result.info).unwrap();
        let mut quick = merged.postings("body", "quick").unwrap().unwrap();
        assert_eq!(quick.doc_freq(), 2);
        assert_eq!(quick.next().unwrap(), 0);
        assert_eq!(quick.next().unwrap(), 1);
        assert_eq!(quick.positions().unwrap()[0].position, 0);
        assert!(merged.postings("body", "lazy").unwrap().is_none());
        assert!(merged.postings(ID_FIELD, "2").unwrap().is_none());

        let body = merged.field_info("body").unwrap();
        assert_eq!(body.norm(0), 4);
        assert_eq!(body.norm(1), 3);
        assert_eq!(body.stats.doc_count, 2);
        assert_eq!(body.stats.sum_total_term_freq, 7);

        assert_eq!(merged.numeric_doc_values("year").unwrap().first(1), Some(2003));
        assert_eq!(
            merged.sorted_set_doc_values("tag").unwrap().values(0).unwrap(),
            vec!["t2001".to_string()]
        );
        assert_eq!(merged.points("year").unwrap().len(), 2);
        assert_eq!(merged.document(1).unwrap().document.id(), "3");
    }

    #[test]
    fn test_cancelled_merge_leaves_no_files() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let a = segment(&storage, "_0", &[doc("1", "alpha", 1)]);
        let before = storage.list_files().unwrap();

        let engine = MergeEngine::new(Arc::clone(&storage));
        let cancel = AtomicBool::new(true);
        let err = engine.merge(&[input(a, &[])], "_1", &cancel).unwrap_err();
        assert!(err.is_cancelled());

        let mut after = storage.list_files().unwrap();
        after.sort();
        let mut before = before;
        before.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_nested_blocks_stay_contiguous() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let parent = Document::builder("p")
            .add_text("title", "parent")
            .add_nested("comments", Document::builder("c1").add_text("text", "first").build())
            .add_nested("comments", Document::builder("c2").add_text("text", "second").build())
            .build();
        let a = segment(&storage, "_0", &[doc("x", "gone", 1), parent]);

        let engine = MergeEngine::new(Arc::clone(&storage));
        let result = engine
            .merge(&[input(a, &[0])], "_1", &AtomicBool::new(false))
            .unwrap();
        let merged = SegmentReader::open(Arc::clone(&storage), result.info).unwrap();
        assert_eq!(merged.num_docs(), 3);
        assert!(!merged.is_root(0));
        assert!(!merged.is_root(1));
        assert!(merged.is_root(2));
        assert_eq!(merged.parent_of(0), Some(2));
        assert_eq!(merged.block_range(2), 0..3);
    }
}
