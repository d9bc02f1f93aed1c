//! Read access to a published segment.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::document::FieldType;
use crate::error::{Result, XiphosError};
use crate::lexical::core::bkd_tree::BkdTree;
use crate::lexical::core::dictionary::{TermDictionary, decode_dictionaries};
use crate::lexical::core::doc_values::{NumericDocValues, SortedSetDocValues};
use crate::lexical::core::field_info::{SegmentFieldInfo, SegmentFields};
use crate::lexical::core::live_docs::LiveDocs;
use crate::lexical::core::posting::{PostingIterator, PostingsReader, TermInfo};
use crate::lexical::core::stored_fields::{StoredDocument, StoredFieldsReader};
use crate::lexical::index::segment::writer::{DOC_VALUES_NUMERIC, DOC_VALUES_SORTED_SET, segment_files};
use crate::lexical::index::segment::{
    MAGIC_DOC_VALUES, MAGIC_DOCS, MAGIC_FIELDS, MAGIC_LIVE_DOCS, MAGIC_POINTS, MAGIC_POSITIONS,
    MAGIC_STORED, MAGIC_TERMS, SegmentInfo, info_file, live_docs_file,
};
use crate::storage::Storage;
use crate::storage::structured::read_checksummed_bytes;
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::ByteCursor;

/// An opened segment. Every file is checksum-verified on open.
///
/// Readers are shared through `Arc`. Once a merge supersedes the segment it is marked
/// obsolete, and its files are deleted when the last reference (the writer's or a
/// search snapshot's) is dropped.
pub struct SegmentReader {
    info: SegmentInfo,
    storage: Arc<dyn Storage>,
    fields: SegmentFields,
    dictionaries: BTreeMap<String, TermDictionary>,
    postings: PostingsReader,
    numeric: BTreeMap<String, NumericDocValues>,
    sorted_set: BTreeMap<String, SortedSetDocValues>,
    points: BTreeMap<String, BkdTree>,
    stored: StoredFieldsReader,
    obsolete: AtomicBool,
    /// Live-docs generation whose file must also go when the segment is deleted.
    last_live_gen: parking_lot::Mutex<u64>,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("name", &self.info.name)
            .field("doc_count", &self.info.doc_count)
            .finish()
    }
}

impl SegmentReader {
    /// Loads the descriptor of `segment` from its `.si` file.
    pub fn read_info(storage: &dyn Storage, segment: &str) -> Result<SegmentInfo> {
        let data = storage.read_all(&info_file(segment))?;
        serde_json::from_slice(&data).map_err(|e| {
            XiphosError::corruption(format!("segment {segment}: unreadable segment info: {e}"))
        })
    }

    pub fn open(storage: Arc<dyn Storage>, info: SegmentInfo) -> Result<Self> {
        let name = info.name.clone();
        let load = |ext: &str, magic: u32| -> Result<OwnedBytes> {
            read_checksummed_bytes(storage.as_ref(), &format!("{name}.{ext}"), magic)
        };

        let fields = SegmentFields::decode(&load("fnm", MAGIC_FIELDS)?)?;
        if fields.num_docs() != info.doc_count {
            return Err(XiphosError::corruption(format!(
                "segment {name}: field metadata lists {} docs, segment info {}",
                fields.num_docs(),
                info.doc_count
            )));
        }
        let dictionaries = decode_dictionaries(&load("tim", MAGIC_TERMS)?)?;
        let postings = PostingsReader::new(load("doc", MAGIC_DOCS)?, load("pos", MAGIC_POSITIONS)?);

        let mut numeric = BTreeMap::new();
        let mut sorted_set = BTreeMap::new();
        let dvd = load("dvd", MAGIC_DOC_VALUES)?;
        let mut cursor = ByteCursor::new(&dvd);
        for _ in 0..cursor.read_vu32()? {
            let field = cursor.read_str()?.to_string();
            let kind = cursor.read_u8()?;
            let len = cursor.read_vu32()? as usize;
            let start = cursor.position();
            cursor.read_bytes(len)?;
            let body = dvd.slice(start..start + len);
            match kind {
                DOC_VALUES_NUMERIC => {
                    numeric.insert(field, NumericDocValues::open(body)?);
                }
                DOC_VALUES_SORTED_SET => {
                    sorted_set.insert(field, SortedSetDocValues::open(body)?);
                }
                other => {
                    return Err(XiphosError::corruption(format!(
                        "segment {name}: unknown doc values kind {other} for '{field}'"
                    )));
                }
            }
        }

        let mut points = BTreeMap::new();
        let pts = load("pts", MAGIC_POINTS)?;
        let mut cursor = ByteCursor::new(&pts);
        for _ in 0..cursor.read_vu32()? {
            let field = cursor.read_str()?.to_string();
            let len = cursor.read_vu32()? as usize;
            let start = cursor.position();
            cursor.read_bytes(len)?;
            points.insert(field, BkdTree::open(pts.slice(start..start + len))?);
        }

        let stored = StoredFieldsReader::open(load("fdt", MAGIC_STORED)?)?;
        if stored.num_docs() != info.doc_count {
            return Err(XiphosError::corruption(format!(
                "segment {name}: {} stored docs, expected {}",
                stored.num_docs(),
                info.doc_count
            )));
        }

        debug!("opened segment {name} ({} docs)", info.doc_count);
        Ok(SegmentReader {
            info,
            storage,
            fields,
            dictionaries,
            postings,
            numeric,
            sorted_set,
            points,
            stored,
            obsolete: AtomicBool::new(false),
            last_live_gen: parking_lot::Mutex::new(0),
        })
    }

    /// Loads live-docs generation `generation` of this segment.
    pub fn load_live_docs(&self, generation: u64) -> Result<LiveDocs> {
        let file = live_docs_file(&self.info.name, generation);
        let body = read_checksummed_bytes(self.storage.as_ref(), &file, MAGIC_LIVE_DOCS)?;
        let live = LiveDocs::from_bytes(&body)?;
        if live.len() != self.info.doc_count {
            return Err(XiphosError::corruption(format!(
                "{file}: {} bits for {} docs",
                live.len(),
                self.info.doc_count
            )));
        }
        *self.last_live_gen.lock() = generation;
        Ok(live)
    }

    pub(crate) fn set_live_gen(&self, generation: u64) {
        *self.last_live_gen.lock() = generation;
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn num_docs(&self) -> u32 {
        self.info.doc_count
    }

    pub fn fields(&self) -> &SegmentFields {
        &self.fields
    }

    pub fn field_info(&self, field: &str) -> Option<&SegmentFieldInfo> {
        self.fields.field(field)
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.fields.field(field).map(|f| f.field_type)
    }

    pub fn terms(&self, field: &str) -> Option<&TermDictionary> {
        self.dictionaries.get(field)
    }

    pub fn term_info(&self, field: &str, term: &str) -> Result<Option<TermInfo>> {
        match self.terms(field).and_then(|dict| dict.get(term)) {
            Some(offset) => Ok(Some(self.postings.term_info(offset)?)),
            None => Ok(None),
        }
    }

    /// Postings of `field:term`, with positions when the field records them.
    pub fn postings(&self, field: &str, term: &str) -> Result<Option<PostingIterator>> {
        match self.terms(field).and_then(|dict| dict.get(term)) {
            Some(offset) => Ok(Some(self.postings_at(field, offset)?)),
            None => Ok(None),
        }
    }

    /// Postings at a dictionary offset of `field`.
    pub fn postings_at(&self, field: &str, offset: u64) -> Result<PostingIterator> {
        let with_positions = self
            .field_type(field)
            .is_some_and(|t| t.has_positions());
        self.postings.postings(offset, with_positions)
    }

    pub fn numeric_doc_values(&self, field: &str) -> Option<&NumericDocValues> {
        self.numeric.get(field)
    }

    pub fn sorted_set_doc_values(&self, field: &str) -> Option<&SortedSetDocValues> {
        self.sorted_set.get(field)
    }

    pub fn points(&self, field: &str) -> Option<&BkdTree> {
        self.points.get(field)
    }

    pub fn document(&self, doc: u32) -> Result<StoredDocument> {
        self.stored.document(doc)
    }

    pub fn is_root(&self, doc: u32) -> bool {
        self.fields.is_root(doc)
    }

    pub fn parent_of(&self, doc: u32) -> Option<u32> {
        self.fields.parent_of(doc)
    }

    /// Docs of the block ending at root `root`: its nested children, then itself.
    pub fn block_range(&self, root: u32) -> Range<u32> {
        let start = (0..root)
            .rev()
            .find(|d| self.is_root(*d))
            .map_or(0, |previous| previous + 1);
        start..root + 1
    }

    /// Marks the segment superseded; its files go when the last reference drops.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        let live_gen = *self.last_live_gen.lock();
        let mut files = segment_files(&self.info, live_gen);
        // older generations may still be around if a commit was interrupted
        files.extend((0..live_gen).map(|g| live_docs_file(&self.info.name, g)));
        for file in files {
            if self.storage.file_exists(&file) {
                if let Err(e) = self.storage.delete_file(&file) {
                    warn!("failed to delete {file} of superseded segment: {e}");
                }
            }
        }
        debug!("deleted superseded segment {}", self.info.name);
    }
}
