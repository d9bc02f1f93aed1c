//! Collectors for gathering matches.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;

/// Receives the live top-level matches of one search.
pub trait Collector: Send + Debug {
    /// Collect a match of document `doc` in the segment at `segment` in the snapshot.
    fn collect(&mut self, segment: usize, doc: u32, score: f32);

    /// Number of matches collected, including those not kept.
    fn total_hits(&self) -> u64;

    /// Whether scores are needed.
    fn needs_scores(&self) -> bool {
        true
    }
}

/// A scored match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub segment: usize,
    pub doc: u32,
    pub score: f32,
}

impl Eq for ScoredDoc {}

impl PartialOrd for ScoredDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredDoc {
    /// Better matches order first: higher score, then earlier segment and doc.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.segment.cmp(&other.segment))
            .then_with(|| self.doc.cmp(&other.doc))
    }
}

/// Keeps the best `max_docs` matches at or above `min_score`.
#[derive(Debug)]
pub struct TopDocsCollector {
    max_docs: usize,
    min_score: f32,
    /// Worst kept match on top.
    hits: BinaryHeap<ScoredDoc>,
    total_hits: u64,
}

impl TopDocsCollector {
    pub fn new(max_docs: usize) -> Self {
        Self::with_min_score(max_docs, f32::MIN)
    }

    pub fn with_min_score(max_docs: usize, min_score: f32) -> Self {
        TopDocsCollector {
            max_docs,
            min_score,
            hits: BinaryHeap::with_capacity(max_docs.min(1024) + 1),
            total_hits: 0,
        }
    }

    /// Adds everything another collector kept.
    pub fn merge(&mut self, other: TopDocsCollector) {
        self.total_hits += other.total_hits;
        for hit in other.hits {
            self.offer(hit);
        }
    }

    fn offer(&mut self, hit: ScoredDoc) {
        if self.max_docs == 0 {
            return;
        }
        if self.hits.len() < self.max_docs {
            self.hits.push(hit);
        } else if self.hits.peek().is_some_and(|worst| hit < *worst) {
            self.hits.pop();
            self.hits.push(hit);
        }
    }

    /// Kept matches, best first.
    pub fn into_sorted(self) -> Vec<ScoredDoc> {
        self.hits.into_sorted_vec()
    }
}

impl Collector for TopDocsCollector {
    fn collect(&mut self, segment: usize, doc: u32, score: f32) {
        if score < self.min_score {
            return;
        }
        self.total_hits += 1;
        self.offer(ScoredDoc {
            segment,
            doc,
            score,
        });
    }

    fn total_hits(&self) -> u64 {
        self.total_hits
    }
}

/// Counts matches.
#[derive(Debug, Default)]
pub struct CountCollector {
    count: u64,
}

impl Collector for CountCollector {
    fn collect(&mut self, _segment: usize, _doc: u32, _score: f32) {
        self.count += 1;
    }

    fn total_hits(&self) -> u64 {
        self.count
    }

    fn needs_scores(&self) -> bool {
        false
    }
}

/// Sorted doc ids of one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocIdSet {
    docs: Vec<u32>,
}

impl From<Vec<u32>> for DocIdSet {
    fn from(mut docs: Vec<u32>) -> Self {
        docs.sort_unstable();
        docs.dedup();
        DocIdSet { docs }
    }
}

impl DocIdSet {
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.docs.iter().copied()
    }

    pub fn contains(&self, doc: u32) -> bool {
        self.docs.binary_search(&doc).is_ok()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Matching doc ids of one segment, by segment name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDocIdSet {
    pub segment: String,
    pub docs: DocIdSet,
}

/// Collects every match into per-segment doc id sets.
#[derive(Debug, Default)]
pub struct DocIdSetCollector {
    segments: Vec<Vec<u32>>,
    total_hits: u64,
}

impl DocIdSetCollector {
    pub fn new(num_segments: usize) -> Self {
        DocIdSetCollector {
            segments: vec![Vec::new(); num_segments],
            total_hits: 0,
        }
    }

    /// Doc id sets in snapshot segment order.
    pub fn into_sets(self) -> Vec<DocIdSet> {
        self.segments.into_iter().map(DocIdSet::from).collect()
    }
}

impl Collector for DocIdSetCollector {
    fn collect(&mut self, segment: usize, doc: u32, _score: f32) {
        if segment >= self.segments.len() {
            self.segments.resize(segment + 1, Vec::new());
        }
        self.segments[segment].push(doc);
        self.total_hits += 1;
    }

    fn total_hits(&self) -> u64 {
        self.total_hits
    }

    fn needs_scores(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_docs_keeps_best() {
        let mut top = TopDocsCollector::new(2);
        top.collect(0, 1, 1.0);
        top.collect(0, 2, 3.0);
        top.collect(1, 0, 2.0);
        top.collect(0, 3, 3.0);
        assert_eq!(top.total_hits(), 4);
        let docs: Vec<_> = top.into_sorted().iter().map(|d| (d.segment, d.doc)).collect();
        assert_eq!(docs, vec![(0, 2), (0, 3)]);
    }

    #[test]
    fn test_min_score_and_merge() {
        let mut a = TopDocsCollector::with_min_score(10, 1.5);
        a.collect(0, 1, 1.0);
        a.collect(0, 2, 2.0);
        let mut b = TopDocsCollector::with_min_score(10, 1.5);
        b.collect(1, 5, 4.0);
        a.merge(b);
        assert_eq!(a.total_hits(), 2);
        assert_eq!(a.into_sorted()[0].doc, 5);
    }

    #[test]
    fn test_doc_id_sets() {
        let mut sets = DocIdSetCollector::new(2);
        sets.collect(1, 7, 0.0);
        sets.collect(1, 3, 0.0);
        let sets = sets.into_sets();
        assert!(sets[0].is_empty());
        assert_eq!(sets[1].iter().collect::<Vec<_>>(), vec![3, 7]);
        assert!(sets[1].contains(7));
    }
}
