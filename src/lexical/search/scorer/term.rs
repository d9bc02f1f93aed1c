//! Single term scorer.

use crate::error::Result;
use crate::lexical::core::field_info::SegmentFieldInfo;
use crate::lexical::core::posting::PostingIterator;
use crate::lexical::search::scorer::Scorer;
use crate::lexical::search::scoring::bm25::SimScorer;

/// Field length of `doc` for BM25, `None` when the field keeps no norms.
pub(crate) fn field_length(field: Option<&SegmentFieldInfo>, doc: u32) -> Option<u32> {
    field.filter(|f| f.has_norms()).map(|f| f.norm(doc))
}

#[derive(Debug)]
pub struct TermScorer<'a> {
    postings: PostingIterator,
    field: Option<&'a SegmentFieldInfo>,
    sim: SimScorer,
}

impl<'a> TermScorer<'a> {
    pub fn new(postings: PostingIterator, field: Option<&'a SegmentFieldInfo>, sim: SimScorer) -> Self {
        TermScorer {
            postings,
            field,
            sim,
        }
    }

    pub fn freq(&self) -> u32 {
        self.postings.freq()
    }
}

impl Scorer for TermScorer<'_> {
    fn doc(&self) -> u32 {
        self.postings.doc()
    }

    fn next(&mut self) -> Result<u32> {
        self.postings.next()
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        self.postings.advance(target)
    }

    fn score(&mut self) -> Result<f32> {
        let doc = self.postings.doc();
        Ok(self
            .sim
            .score(self.postings.freq() as f32, field_length(self.field, doc)))
    }

    fn cost(&self) -> u64 {
        self.postings.cost()
    }
}
