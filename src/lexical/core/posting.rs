//! Postings codec.
//!
//! Each term's postings live at the offset stored in the term dictionary:
//!
//! ```text
//! vu32 doc_freq | vu64 total_term_freq | vu64 pos_start | vu32 skip_len | skip data
//! doc stream: (vu32 doc_delta, vu32 freq) * doc_freq
//! ```
//!
//! Positions go to a separate stream starting at `pos_start`: per occurrence a
//! `vu32` delta from the previous position in the same document and a `vu32`
//! `position_length - 1`. Positions are decoded lazily, so scorers that never ask
//! for them pay nothing.

use crate::error::{Result, XiphosError};
use crate::lexical::core::skip_list::{SKIP_INTERVAL, SkipReader, SkipWriter};
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::{BufWriteExt, ByteCursor};

/// Sentinel returned once an iterator is exhausted.
pub const NO_MORE_DOCS: u32 = u32::MAX;

/// One occurrence of a term inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TermPosition {
    pub position: u32,
    /// Number of positions the token spans (multi-word synonyms span several).
    pub length: u32,
}

impl TermPosition {
    pub fn new(position: u32, length: u32) -> Self {
        TermPosition {
            position,
            length: length.max(1),
        }
    }
}

/// Per-term statistics read from the postings header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermInfo {
    pub doc_freq: u32,
    pub total_term_freq: u64,
}

/// Appends postings for one field to the `.doc` and `.pos` buffers of a segment.
#[derive(Debug, Default)]
pub struct PostingsWriter {
    docs: Vec<u8>,
    positions: Vec<u8>,
    term: Option<TermState>,
}

#[derive(Debug, Default)]
struct TermState {
    stream: Vec<u8>,
    skip: SkipWriter,
    pos_start: u64,
    doc_freq: u32,
    total_term_freq: u64,
    last_doc: Option<u32>,
}

impl PostingsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_term(&mut self) {
        self.term = Some(TermState {
            pos_start: self.positions.len() as u64,
            ..TermState::default()
        });
    }

    /// Adds the next document of the current term. Documents must arrive in
    /// increasing order; `positions` is empty for fields indexed without them.
    pub fn add_doc(&mut self, doc: u32, freq: u32, positions: &[TermPosition]) -> Result<()> {
        let term = self
            .term
            .as_mut()
            .ok_or_else(|| XiphosError::index("add_doc called outside a term"))?;
        if term.last_doc.is_some_and(|last| doc <= last) {
            return Err(XiphosError::index(format!(
                "postings out of order: doc {doc} after {:?}",
                term.last_doc
            )));
        }

        // Checkpoint the state after every full block that has a successor.
        if term.doc_freq > 0 && term.doc_freq % SKIP_INTERVAL == 0 {
            if let Some(last) = term.last_doc {
                let pos_offset = self.positions.len() as u64 - term.pos_start;
                term.skip.add(last, term.stream.len() as u32, pos_offset as u32);
            }
        }

        let delta = doc - term.last_doc.unwrap_or(0);
        term.stream.put_vu32(delta);
        term.stream.put_vu32(freq);

        let mut previous = 0;
        for position in positions {
            self.positions.put_vu32(position.position - previous);
            self.positions.put_vu32(position.length.max(1) - 1);
            previous = position.position;
        }

        term.doc_freq += 1;
        term.total_term_freq += freq as u64;
        term.last_doc = Some(doc);
        Ok(())
    }

    /// Closes the current term and returns `(postings_offset, info)`.
    pub fn finish_term(&mut self) -> Result<(u64, TermInfo)> {
        let term = self
            .term
            .take()
            .ok_or_else(|| XiphosError::index("finish_term called outside a term"))?;
        let skip = term.skip.encode();

        let offset = self.docs.len() as u64;
        self.docs.put_vu32(term.doc_freq);
        self.docs.put_vu64(term.total_term_freq);
        self.docs.put_vu64(term.pos_start);
        self.docs.put_vu32(skip.len() as u32);
        self.docs.extend_from_slice(&skip);
        self.docs.extend_from_slice(&term.stream);

        Ok((
            offset,
            TermInfo {
                doc_freq: term.doc_freq,
                total_term_freq: term.total_term_freq,
            },
        ))
    }

    /// Consumes the writer, returning the `.doc` and `.pos` bodies.
    pub fn finish(self) -> (Vec<u8>, Vec<u8>) {
        (self.docs, self.positions)
    }
}

/// Read access to the postings of one segment.
#[derive(Debug, Clone)]
pub struct PostingsReader {
    docs: OwnedBytes,
    positions: OwnedBytes,
}

impl PostingsReader {
    pub fn new(docs: OwnedBytes, positions: OwnedBytes) -> Self {
        PostingsReader { docs, positions }
    }

    pub fn term_info(&self, offset: u64) -> Result<TermInfo> {
        let mut cursor = ByteCursor::at(&self.docs, offset as usize);
        Ok(TermInfo {
            doc_freq: cursor.read_vu32()?,
            total_term_freq: cursor.read_vu64()?,
        })
    }

    pub fn postings(&self, offset: u64, with_positions: bool) -> Result<PostingIterator> {
        let mut cursor = ByteCursor::at(&self.docs, offset as usize);
        let doc_freq = cursor.read_vu32()?;
        let total_term_freq = cursor.read_vu64()?;
        let pos_start = cursor.read_vu64()? as usize;
        let skip_len = cursor.read_vu32()? as usize;
        let skip_start = cursor.position();
        cursor.read_bytes(skip_len)?;
        let skip = SkipReader::open(self.docs.slice(skip_start..skip_start + skip_len))?;
        let stream_start = cursor.position();

        Ok(PostingIterator {
            docs: self.docs.clone(),
            positions: self.positions.clone(),
            skip,
            stream_start,
            pos_start,
            doc_freq,
            total_term_freq,
            with_positions,
            read: 0,
            cursor: stream_start,
            doc: 0,
            freq: 0,
            pos_cursor: pos_start,
            pending_positions: 0,
            positions_loaded: true,
            current_positions: Vec::new(),
        })
    }
}

/// Forward-only cursor over one term's postings.
#[derive(Debug, Clone)]
pub struct PostingIterator {
    docs: OwnedBytes,
    positions: OwnedBytes,
    skip: SkipReader,
    stream_start: usize,
    pos_start: usize,
    doc_freq: u32,
    total_term_freq: u64,
    with_positions: bool,

    read: u32,
    cursor: usize,
    doc: u32,
    freq: u32,
    pos_cursor: usize,
    /// Occurrences whose positions were passed over without being decoded.
    pending_positions: u64,
    positions_loaded: bool,
    current_positions: Vec<TermPosition>,
}

impl PostingIterator {
    /// Current document, [`NO_MORE_DOCS`] when exhausted. Undefined before the first
    /// call to [`next`](Self::next) or [`advance`](Self::advance).
    pub fn doc(&self) -> u32 {
        self.doc
    }

    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    pub fn total_term_freq(&self) -> u64 {
        self.total_term_freq
    }

    /// Upper bound of the documents this iterator can still produce.
    pub fn cost(&self) -> u64 {
        self.doc_freq as u64
    }

    pub fn next(&mut self) -> Result<u32> {
        if self.doc == NO_MORE_DOCS && self.read > 0 {
            return Ok(NO_MORE_DOCS);
        }
        if self.read >= self.doc_freq {
            self.doc = NO_MORE_DOCS;
            self.read = self.read.max(1);
            return Ok(NO_MORE_DOCS);
        }
        if !self.positions_loaded {
            self.pending_positions += self.freq as u64;
        }

        let mut cursor = ByteCursor::at(&self.docs, self.cursor);
        let delta = cursor.read_vu32()?;
        let freq = cursor.read_vu32()?;
        self.cursor = cursor.position();

        self.doc = if self.read == 0 { delta } else { self.doc + delta };
        self.freq = freq;
        self.read += 1;
        self.positions_loaded = false;
        self.current_positions.clear();
        Ok(self.doc)
    }

    /// Moves to the first document `>= target`, using the skip list to jump over
    /// whole blocks.
    pub fn advance(&mut self, target: u32) -> Result<u32> {
        if self.read > 0 && (self.doc == NO_MORE_DOCS || self.doc >= target) {
            return Ok(self.doc);
        }

        if let Some(point) = self.skip.seek(target, self.read) {
            self.cursor = self.stream_start + point.doc_offset as usize;
            self.pos_cursor = self.pos_start + point.pos_offset as usize;
            self.pending_positions = 0;
            self.positions_loaded = true;
            self.read = point.docs_read;
            self.doc = point.last_doc;
            self.freq = 0;
        }

        loop {
            let doc = self.next()?;
            if doc >= target {
                return Ok(doc);
            }
        }
    }

    /// Positions of the current document, sorted ascending.
    pub fn positions(&mut self) -> Result<&[TermPosition]> {
        if !self.with_positions || self.doc == NO_MORE_DOCS {
            return Ok(&[]);
        }
        if !self.positions_loaded {
            let mut cursor = ByteCursor::at(&self.positions, self.pos_cursor);
            for _ in 0..self.pending_positions {
                cursor.read_vu32()?;
                cursor.read_vu32()?;
            }
            self.pending_positions = 0;

            let mut position = 0;
            for _ in 0..self.freq {
                position += cursor.read_vu32()?;
                let length = cursor.read_vu32()? + 1;
                self.current_positions.push(TermPosition { position, length });
            }
            self.pos_cursor = cursor.position();
            self.positions_loaded = true;
        }
        Ok(&self.current_positions)
    }
}
