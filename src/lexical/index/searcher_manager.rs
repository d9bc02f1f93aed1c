//! Point-in-time snapshots of the searchable segments.
//!
//! The writer publishes a new [`IndexSnapshot`] whenever the searchable segment set or
//! any live-docs bitset changes; searches acquire the current snapshot without
//! blocking. A snapshot keeps its segment readers alive, so files of a merged-away
//! segment survive until the last search holding it finishes.

use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use bit_vec::BitVec;
use log::debug;
use parking_lot::Mutex;

use crate::error::Result;
use crate::lexical::core::live_docs::LiveDocs;
use crate::lexical::core::posting::NO_MORE_DOCS;
use crate::lexical::index::segment::reader::SegmentReader;

/// Field statistics over the live documents of one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveFieldStats {
    /// Live documents with at least one term in the field.
    pub doc_count: u64,
    pub sum_total_term_freq: u64,
}

/// One segment as seen by a snapshot.
#[derive(Debug, Clone)]
pub struct SegmentSnapshot {
    pub reader: Arc<SegmentReader>,
    pub live_docs: Arc<LiveDocs>,
    /// Per-field statistics computed on first use; only filled when the segment has
    /// deletions.
    live_stats: Arc<Mutex<AHashMap<String, LiveFieldStats>>>,
}

impl SegmentSnapshot {
    pub fn new(reader: Arc<SegmentReader>, live_docs: Arc<LiveDocs>) -> Self {
        SegmentSnapshot {
            reader,
            live_docs,
            live_stats: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        self.reader.name()
    }

    pub fn is_live(&self, doc: u32) -> bool {
        self.live_docs.is_live(doc)
    }

    /// Live root (top-level) documents.
    pub fn num_live_roots(&self) -> u32 {
        self.live_docs
            .iter_live()
            .filter(|doc| self.reader.is_root(*doc))
            .count() as u32
    }

    /// Statistics of `field` counting live documents only, or `None` when the
    /// segment does not have the field.
    ///
    /// Text fields are summed from their norms; other fields with terms are summed
    /// from their postings. Fields without terms keep the segment-wide numbers.
    pub fn field_stats(&self, field: &str) -> Result<Option<LiveFieldStats>> {
        let Some(info) = self.reader.field_info(field) else {
            return Ok(None);
        };
        let segment_wide = LiveFieldStats {
            doc_count: info.stats.doc_count as u64,
            sum_total_term_freq: info.stats.sum_total_term_freq,
        };
        if self.live_docs.num_deleted() == 0 {
            return Ok(Some(segment_wide));
        }
        if let Some(stats) = self.live_stats.lock().get(field) {
            return Ok(Some(*stats));
        }

        let stats = if info.has_norms() {
            let mut stats = LiveFieldStats::default();
            for doc in self.live_docs.iter_live() {
                let length = info.norm(doc);
                if length > 0 {
                    stats.doc_count += 1;
                    stats.sum_total_term_freq += length as u64;
                }
            }
            stats
        } else if let Some(dictionary) = self.reader.terms(field) {
            let mut present = BitVec::from_elem(self.reader.num_docs() as usize, false);
            let mut stats = LiveFieldStats::default();
            for (_, offset) in dictionary.terms() {
                let mut postings = self.reader.postings_at(field, offset)?;
                loop {
                    let doc = postings.next()?;
                    if doc == NO_MORE_DOCS {
                        break;
                    }
                    if self.is_live(doc) {
                        present.set(doc as usize, true);
                        stats.sum_total_term_freq += postings.freq() as u64;
                    }
                }
            }
            stats.doc_count = present.iter().filter(|p| *p).count() as u64;
            stats
        } else {
            segment_wide
        };
        self.live_stats.lock().insert(field.to_string(), stats);
        Ok(Some(stats))
    }

    /// Live documents containing `term` in `field`.
    pub fn doc_freq(&self, field: &str, term: &str) -> Result<u64> {
        if self.live_docs.num_deleted() == 0 {
            return Ok(self
                .reader
                .term_info(field, term)?
                .map_or(0, |info| info.doc_freq as u64));
        }
        let Some(mut postings) = self.reader.postings(field, term)? else {
            return Ok(0);
        };
        let mut df = 0;
        loop {
            let doc = postings.next()?;
            if doc == NO_MORE_DOCS {
                return Ok(df);
            }
            if self.is_live(doc) {
                df += 1;
            }
        }
    }
}

/// Immutable view of the index at one refresh.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    /// Increases with every publish.
    pub generation: u64,
    pub segments: Vec<SegmentSnapshot>,
}

impl IndexSnapshot {
    pub fn segment(&self, name: &str) -> Option<&SegmentSnapshot> {
        self.segments.iter().find(|s| s.name() == name)
    }

    /// Live top-level documents across all segments.
    pub fn num_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.num_live_roots() as u64).sum()
    }

    fn same_view(&self, segments: &[SegmentSnapshot]) -> bool {
        self.segments.len() == segments.len()
            && self.segments.iter().zip(segments).all(|(a, b)| {
                Arc::ptr_eq(&a.reader, &b.reader) && Arc::ptr_eq(&a.live_docs, &b.live_docs)
            })
    }
}

/// Holds the current snapshot and swaps it atomically on publish.
#[derive(Debug)]
pub struct SearcherManager {
    current: ArcSwap<IndexSnapshot>,
}

impl Default for SearcherManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SearcherManager {
    pub fn new() -> Self {
        SearcherManager {
            current: ArcSwap::from_pointee(IndexSnapshot::default()),
        }
    }

    /// The current snapshot. Never blocks; the snapshot stays valid for as long as it
    /// is held, whatever the writer does meanwhile.
    pub fn acquire(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Publishes `segments` unless they are exactly what the current snapshot already
    /// shows. Returns whether a new snapshot was published.
    pub fn maybe_refresh(&self, segments: Vec<SegmentSnapshot>) -> bool {
        let current = self.current.load();
        if current.same_view(&segments) {
            return false;
        }
        let generation = current.generation + 1;
        debug!(
            "publishing snapshot {generation} with {} segments",
            segments.len()
        );
        self.current.store(Arc::new(IndexSnapshot {
            generation,
            segments,
        }));
        true
    }
}
