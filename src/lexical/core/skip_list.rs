//! Multi-level skip data over a postings stream.
//!
//! A checkpoint is recorded after every [`SKIP_INTERVAL`] documents. Level 0 holds the
//! full checkpoint `(last_doc, doc_offset, pos_offset)`; level `k` keeps only the
//! last doc of every `2^k`-th level-0 checkpoint, so an advance descends from the
//! coarsest level and scans at most one stride per level.
//!
//! Layout: `u8 levels | u32 count per level | level 0 entries (12 bytes) | level k
//! entries (4 bytes)`. Offsets are relative to the start of the term's doc stream and
//! of its positions.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, XiphosError};
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::{BufWriteExt, ByteCursor};

/// Documents between two level-0 checkpoints.
pub const SKIP_INTERVAL: u32 = 128;

const MAX_LEVELS: usize = 10;
const LEVEL0_ENTRY: usize = 12;

/// Position inside a postings stream a reader can jump to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipPoint {
    /// Last document before the checkpoint.
    pub last_doc: u32,
    /// Documents decoded once the reader sits at the checkpoint.
    pub docs_read: u32,
    pub doc_offset: u32,
    pub pos_offset: u32,
}

#[derive(Debug, Default)]
pub struct SkipWriter {
    entries: Vec<(u32, u32, u32)>,
}

impl SkipWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, last_doc: u32, doc_offset: u32, pos_offset: u32) {
        self.entries.push((last_doc, doc_offset, pos_offset));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let mut counts = vec![self.entries.len()];
        while counts.len() < MAX_LEVELS {
            let next = self.entries.len() >> counts.len();
            if next == 0 {
                break;
            }
            counts.push(next);
        }

        let mut out = Vec::new();
        out.put_u8(counts.len() as u8);
        for count in &counts {
            out.put_u32(*count as u32);
        }
        for (doc, doc_offset, pos_offset) in &self.entries {
            out.put_u32(*doc);
            out.put_u32(*doc_offset);
            out.put_u32(*pos_offset);
        }
        for (level, count) in counts.iter().enumerate().skip(1) {
            let stride = 1usize << level;
            for i in 0..*count {
                out.put_u32(self.entries[(i + 1) * stride - 1].0);
            }
        }
        out
    }
}

/// Read side of the skip data for one term.
#[derive(Debug, Clone)]
pub struct SkipReader {
    data: OwnedBytes,
    /// `(entry count, byte offset)` per level.
    levels: Vec<(usize, usize)>,
}

impl SkipReader {
    pub fn open(data: OwnedBytes) -> Result<Self> {
        if data.is_empty() {
            return Ok(SkipReader {
                data,
                levels: Vec::new(),
            });
        }
        let mut cursor = ByteCursor::new(&data);
        let num_levels = cursor.read_u8()? as usize;
        let mut counts = Vec::with_capacity(num_levels);
        for _ in 0..num_levels {
            counts.push(cursor.read_u32()? as usize);
        }

        let mut levels = Vec::with_capacity(num_levels);
        let mut offset = cursor.position();
        for (level, count) in counts.into_iter().enumerate() {
            levels.push((count, offset));
            offset += count * if level == 0 { LEVEL0_ENTRY } else { 4 };
        }
        if offset > data.len() {
            return Err(XiphosError::corruption(format!(
                "skip data needs {offset} bytes, found {}",
                data.len()
            )));
        }
        Ok(SkipReader { data, levels })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn level_doc(&self, level: usize, index: usize) -> u32 {
        let (_, offset) = self.levels[level];
        let width = if level == 0 { LEVEL0_ENTRY } else { 4 };
        let at = offset + index * width;
        LittleEndian::read_u32(&self.data[at..at + 4])
    }

    fn point(&self, index: usize) -> SkipPoint {
        let (_, offset) = self.levels[0];
        let at = offset + index * LEVEL0_ENTRY;
        SkipPoint {
            last_doc: LittleEndian::read_u32(&self.data[at..at + 4]),
            docs_read: (index as u32 + 1) * SKIP_INTERVAL,
            doc_offset: LittleEndian::read_u32(&self.data[at + 4..at + 8]),
            pos_offset: LittleEndian::read_u32(&self.data[at + 8..at + 12]),
        }
    }

    /// Furthest checkpoint whose last doc is below `target`, if it lies beyond the
    /// `docs_read` documents already consumed.
    pub fn seek(&self, target: u32, docs_read: u32) -> Option<SkipPoint> {
        if self.levels.is_empty() {
            return None;
        }
        let start = (docs_read / SKIP_INTERVAL) as usize;
        // `lo` is the first level-0 checkpoint not known to lie below target.
        let mut lo = start;
        for level in (1..self.levels.len()).rev() {
            let stride = 1usize << level;
            let count = self.levels[level].0;
            let mut i = (lo + stride) / stride - 1;
            while i < count && self.level_doc(level, i) < target {
                lo = (i + 1) * stride;
                i += 1;
            }
        }
        let count0 = self.levels[0].0;
        while lo < count0 && self.level_doc(0, lo) < target {
            lo += 1;
        }
        (lo > start).then(|| self.point(lo - 1))
    }
}
