//! Document iterators that score what they match.
//!
//! Every scorer walks one segment's doc ids in increasing order. A fresh scorer is
//! unpositioned: the first call to [`Scorer::next`] or [`Scorer::advance`] moves it
//! onto its first match.

pub mod boolean;
pub mod function;
pub mod phrase;
pub mod term;

use std::fmt::Debug;

use crate::error::Result;
pub use crate::lexical::core::posting::NO_MORE_DOCS;

/// A scorer over one segment.
pub trait Scorer: Send + Debug {
    /// Current document, [`NO_MORE_DOCS`] once exhausted. Unspecified before the
    /// first move.
    fn doc(&self) -> u32;

    /// Moves to the next matching document.
    fn next(&mut self) -> Result<u32>;

    /// Moves to the first matching document `>= target`. A positioned scorer already
    /// at or past `target` stays where it is.
    fn advance(&mut self, target: u32) -> Result<u32>;

    /// Score of the current document.
    fn score(&mut self) -> Result<f32>;

    /// Upper bound of the documents left to match, used to order conjunctions.
    fn cost(&self) -> u64;
}

pub type BoxedScorer<'a> = Box<dyn Scorer + 'a>;

/// Every document of the segment, deleted and nested ones included.
#[derive(Debug)]
pub struct AllScorer {
    doc: u32,
    started: bool,
    max_doc: u32,
    score: f32,
}

impl AllScorer {
    pub fn new(max_doc: u32, score: f32) -> Self {
        AllScorer {
            doc: 0,
            started: false,
            max_doc,
            score,
        }
    }
}

impl Scorer for AllScorer {
    fn doc(&self) -> u32 {
        self.doc
    }

    fn next(&mut self) -> Result<u32> {
        if !self.started {
            self.started = true;
            self.doc = 0;
        } else if self.doc != NO_MORE_DOCS {
            self.doc += 1;
        }
        if self.doc >= self.max_doc {
            self.doc = NO_MORE_DOCS;
        }
        Ok(self.doc)
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        if self.started && self.doc >= target {
            return Ok(self.doc);
        }
        self.started = true;
        self.doc = if target >= self.max_doc {
            NO_MORE_DOCS
        } else {
            target
        };
        Ok(self.doc)
    }

    fn score(&mut self) -> Result<f32> {
        Ok(self.score)
    }

    fn cost(&self) -> u64 {
        self.max_doc as u64
    }
}

/// Precomputed `(doc, score)` pairs, sorted by doc.
#[derive(Debug)]
pub struct DocSetScorer {
    docs: Vec<(u32, f32)>,
    index: Option<usize>,
}

impl DocSetScorer {
    /// `docs` must be sorted by doc id without duplicates.
    pub fn new(docs: Vec<(u32, f32)>) -> Self {
        DocSetScorer { docs, index: None }
    }

    /// Sorted, deduplicated docs that all score `score`.
    pub fn constant(mut docs: Vec<u32>, score: f32) -> Self {
        docs.sort_unstable();
        docs.dedup();
        Self::new(docs.into_iter().map(|doc| (doc, score)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl Scorer for DocSetScorer {
    fn doc(&self) -> u32 {
        self.index
            .and_then(|i| self.docs.get(i))
            .map_or(NO_MORE_DOCS, |(doc, _)| *doc)
    }

    fn next(&mut self) -> Result<u32> {
        let next = self.index.map_or(0, |i| (i + 1).min(self.docs.len()));
        self.index = Some(next);
        Ok(self.doc())
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        if self.index.is_some() && self.doc() >= target {
            return Ok(self.doc());
        }
        let from = self.index.map_or(0, |i| i + 1).min(self.docs.len());
        let skip = self.docs[from..].partition_point(|(doc, _)| *doc < target);
        self.index = Some(from + skip);
        Ok(self.doc())
    }

    fn score(&mut self) -> Result<f32> {
        Ok(self
            .index
            .and_then(|i| self.docs.get(i))
            .map_or(0.0, |(_, score)| *score))
    }

    fn cost(&self) -> u64 {
        self.docs.len() as u64
    }
}

/// Multiplies the wrapped scorer's score.
#[derive(Debug)]
pub struct BoostScorer<'a> {
    inner: BoxedScorer<'a>,
    boost: f32,
}

impl<'a> BoostScorer<'a> {
    pub fn new(inner: BoxedScorer<'a>, boost: f32) -> Self {
        BoostScorer { inner, boost }
    }
}

impl Scorer for BoostScorer<'_> {
    fn doc(&self) -> u32 {
        self.inner.doc()
    }

    fn next(&mut self) -> Result<u32> {
        self.inner.next()
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        self.inner.advance(target)
    }

    fn score(&mut self) -> Result<f32> {
        Ok(self.inner.score()? * self.boost)
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }
}

/// Matches what the wrapped scorer matches with a fixed score.
#[derive(Debug)]
pub struct ConstantScorer<'a> {
    inner: BoxedScorer<'a>,
    score: f32,
}

impl<'a> ConstantScorer<'a> {
    pub fn new(inner: BoxedScorer<'a>, score: f32) -> Self {
        ConstantScorer { inner, score }
    }
}

impl Scorer for ConstantScorer<'_> {
    fn doc(&self) -> u32 {
        self.inner.doc()
    }

    fn next(&mut self) -> Result<u32> {
        self.inner.next()
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        self.inner.advance(target)
    }

    fn score(&mut self) -> Result<f32> {
        Ok(self.score)
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }
}

/// Drains a scorer into its doc ids.
pub fn collect_docs(scorer: &mut dyn Scorer) -> Result<Vec<u32>> {
    let mut docs = Vec::new();
    loop {
        let doc = scorer.next()?;
        if doc == NO_MORE_DOCS {
            return Ok(docs);
        }
        docs.push(doc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_scorer() {
        let mut all = AllScorer::new(4, 1.0);
        assert_eq!(all.advance(2).unwrap(), 2);
        assert_eq!(all.advance(1).unwrap(), 2);
        assert_eq!(all.next().unwrap(), 3);
        assert_eq!(all.next().unwrap(), NO_MORE_DOCS);
        assert_eq!(all.next().unwrap(), NO_MORE_DOCS);
        assert_eq!(collect_docs(&mut AllScorer::new(3, 1.0)).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_doc_set_scorer() {
        let mut set = DocSetScorer::constant(vec![9, 3, 3, 5], 2.0);
        assert_eq!(set.advance(4).unwrap(), 5);
        assert_eq!(set.score().unwrap(), 2.0);
        assert_eq!(set.advance(5).unwrap(), 5);
        assert_eq!(set.next().unwrap(), 9);
        assert_eq!(set.advance(10).unwrap(), NO_MORE_DOCS);
        assert_eq!(set.next().unwrap(), NO_MORE_DOCS);

        let mut empty = DocSetScorer::new(Vec::new());
        assert_eq!(empty.next().unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_boost_and_constant() {
        let inner = Box::new(DocSetScorer::new(vec![(1, 2.0)]));
        let mut boosted = BoostScorer::new(inner, 3.0);
        boosted.next().unwrap();
        assert_eq!(boosted.score().unwrap(), 6.0);

        let inner = Box::new(DocSetScorer::new(vec![(1, 2.0)]));
        let mut constant = ConstantScorer::new(inner, 0.5);
        constant.next().unwrap();
        assert_eq!(constant.score().unwrap(), 0.5);
    }
}
