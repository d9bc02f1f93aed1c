//! Boolean combinations of scorers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::lexical::search::scorer::{BoxedScorer, NO_MORE_DOCS, Scorer};

/// Documents matched by every clause. Clauses flagged as non-scoring only filter.
#[derive(Debug)]
pub struct ConjunctionScorer<'a> {
    /// Ordered by increasing cost; the first clause leads.
    clauses: Vec<(BoxedScorer<'a>, bool)>,
    doc: u32,
    started: bool,
}

impl<'a> ConjunctionScorer<'a> {
    /// `clauses` pairs each scorer with whether its score counts. Must not be empty.
    pub fn new(mut clauses: Vec<(BoxedScorer<'a>, bool)>) -> Self {
        clauses.sort_by_key(|(scorer, _)| scorer.cost());
        ConjunctionScorer {
            clauses,
            doc: 0,
            started: false,
        }
    }

    /// Leapfrog: every clause is advanced to the lead's candidate; any overshoot
    /// becomes the new candidate for the lead.
    fn align(&mut self, mut doc: u32) -> Result<u32> {
        'outer: while doc != NO_MORE_DOCS {
            for k in 1..self.clauses.len() {
                let other = self.clauses[k].0.advance(doc)?;
                if other > doc {
                    doc = self.clauses[0].0.advance(other)?;
                    continue 'outer;
                }
            }
            break;
        }
        self.doc = doc;
        Ok(doc)
    }
}

impl Scorer for ConjunctionScorer<'_> {
    fn doc(&self) -> u32 {
        self.doc
    }

    fn next(&mut self) -> Result<u32> {
        if self.started && self.doc == NO_MORE_DOCS {
            return Ok(NO_MORE_DOCS);
        }
        self.started = true;
        let doc = self.clauses[0].0.next()?;
        self.align(doc)
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        if self.started && self.doc >= target {
            return Ok(self.doc);
        }
        self.started = true;
        let doc = self.clauses[0].0.advance(target)?;
        self.align(doc)
    }

    fn score(&mut self) -> Result<f32> {
        let mut score = 0.0;
        for (scorer, scoring) in &mut self.clauses {
            if *scoring {
                score += scorer.score()?;
            }
        }
        Ok(score)
    }

    fn cost(&self) -> u64 {
        self.clauses.first().map_or(0, |(scorer, _)| scorer.cost())
    }
}

/// How a disjunction turns the scores of its matching clauses into one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreCombiner {
    Sum,
    /// Best score plus `tie_breaker` times the rest.
    Max { tie_breaker: f32 },
}

/// Documents matched by at least `minimum_should_match` clauses.
#[derive(Debug)]
pub struct DisjunctionScorer<'a> {
    clauses: Vec<BoxedScorer<'a>>,
    /// Positioned clauses ahead of the current document, by doc.
    queue: BinaryHeap<Reverse<(u32, usize)>>,
    /// Clauses positioned on the current document.
    matching: Vec<usize>,
    minimum_should_match: usize,
    combiner: ScoreCombiner,
    doc: u32,
    started: bool,
    cost: u64,
}

impl<'a> DisjunctionScorer<'a> {
    pub fn new(clauses: Vec<BoxedScorer<'a>>, minimum_should_match: usize, combiner: ScoreCombiner) -> Self {
        let cost = clauses.iter().map(|c| c.cost()).sum();
        DisjunctionScorer {
            queue: BinaryHeap::with_capacity(clauses.len()),
            matching: Vec::with_capacity(clauses.len()),
            clauses,
            minimum_should_match: minimum_should_match.max(1),
            combiner,
            doc: 0,
            started: false,
            cost,
        }
    }

    fn push(&mut self, index: usize, doc: u32) {
        if doc != NO_MORE_DOCS {
            self.queue.push(Reverse((doc, index)));
        }
    }

    /// Pops the smallest doc with enough matching clauses.
    fn settle(&mut self) -> Result<u32> {
        loop {
            let Some(&Reverse((doc, _))) = self.queue.peek() else {
                self.doc = NO_MORE_DOCS;
                return Ok(NO_MORE_DOCS);
            };
            while let Some(&Reverse((d, index))) = self.queue.peek() {
                if d != doc {
                    break;
                }
                self.queue.pop();
                self.matching.push(index);
            }
            if self.matching.len() >= self.minimum_should_match {
                self.doc = doc;
                return Ok(doc);
            }
            for index in std::mem::take(&mut self.matching) {
                let next = self.clauses[index].next()?;
                self.push(index, next);
            }
        }
    }
}

impl Scorer for DisjunctionScorer<'_> {
    fn doc(&self) -> u32 {
        self.doc
    }

    fn next(&mut self) -> Result<u32> {
        if !self.started {
            self.started = true;
            for index in 0..self.clauses.len() {
                let doc = self.clauses[index].next()?;
                self.push(index, doc);
            }
        } else {
            for index in std::mem::take(&mut self.matching) {
                let doc = self.clauses[index].next()?;
                self.push(index, doc);
            }
        }
        self.settle()
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        if self.started && self.doc >= target {
            return Ok(self.doc);
        }
        if !self.started {
            self.started = true;
            for index in 0..self.clauses.len() {
                let doc = self.clauses[index].advance(target)?;
                self.push(index, doc);
            }
        } else {
            let mut behind = std::mem::take(&mut self.matching);
            while let Some(&Reverse((doc, index))) = self.queue.peek() {
                if doc >= target {
                    break;
                }
                self.queue.pop();
                behind.push(index);
            }
            for index in behind {
                let doc = self.clauses[index].advance(target)?;
                self.push(index, doc);
            }
        }
        self.settle()
    }

    fn score(&mut self) -> Result<f32> {
        let mut sum = 0.0;
        let mut max = 0.0f32;
        for &index in &self.matching {
            let score = self.clauses[index].score()?;
            sum += score;
            max = max.max(score);
        }
        Ok(match self.combiner {
            ScoreCombiner::Sum => sum,
            ScoreCombiner::Max { tie_breaker } => max + tie_breaker * (sum - max),
        })
    }

    fn cost(&self) -> u64 {
        self.cost
    }
}

/// Documents of `required` that `excluded` does not match.
#[derive(Debug)]
pub struct ReqExclScorer<'a> {
    required: BoxedScorer<'a>,
    excluded: BoxedScorer<'a>,
}

impl<'a> ReqExclScorer<'a> {
    pub fn new(required: BoxedScorer<'a>, excluded: BoxedScorer<'a>) -> Self {
        ReqExclScorer { required, excluded }
    }

    fn skip_excluded(&mut self, mut doc: u32) -> Result<u32> {
        while doc != NO_MORE_DOCS && self.excluded.advance(doc)? == doc {
            doc = self.required.next()?;
        }
        Ok(doc)
    }
}

impl Scorer for ReqExclScorer<'_> {
    fn doc(&self) -> u32 {
        self.required.doc()
    }

    fn next(&mut self) -> Result<u32> {
        let doc = self.required.next()?;
        self.skip_excluded(doc)
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        let doc = self.required.advance(target)?;
        self.skip_excluded(doc)
    }

    fn score(&mut self) -> Result<f32> {
        self.required.score()
    }

    fn cost(&self) -> u64 {
        self.required.cost()
    }
}

/// Documents of `required`, scored higher when `optional` matches them too.
#[derive(Debug)]
pub struct ReqOptScorer<'a> {
    required: BoxedScorer<'a>,
    optional: BoxedScorer<'a>,
}

impl<'a> ReqOptScorer<'a> {
    pub fn new(required: BoxedScorer<'a>, optional: BoxedScorer<'a>) -> Self {
        ReqOptScorer { required, optional }
    }
}

impl Scorer for ReqOptScorer<'_> {
    fn doc(&self) -> u32 {
        self.required.doc()
    }

    fn next(&mut self) -> Result<u32> {
        self.required.next()
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        self.required.advance(target)
    }

    fn score(&mut self) -> Result<f32> {
        let doc = self.required.doc();
        let mut score = self.required.score()?;
        if self.optional.advance(doc)? == doc {
            score += self.optional.score()?;
        }
        Ok(score)
    }

    fn cost(&self) -> u64 {
        self.required.cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::search::scorer::{DocSetScorer, collect_docs};

    fn set(docs: &[u32]) -> BoxedScorer<'static> {
        Box::new(DocSetScorer::constant(docs.to_vec(), 1.0))
    }

    #[test]
    fn test_conjunction() {
        let mut and = ConjunctionScorer::new(vec![
            (set(&[1, 3, 5, 7, 9]), true),
            (set(&[3, 4, 5, 9]), true),
            (set(&[0, 5, 9, 11]), false),
        ]);
        assert_eq!(and.next().unwrap(), 5);
        assert_eq!(and.score().unwrap(), 2.0);
        assert_eq!(and.next().unwrap(), 9);
        assert_eq!(and.next().unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_disjunction_minimum_should_match() {
        let mut or = DisjunctionScorer::new(vec![set(&[1, 2]), set(&[2, 3]), set(&[3, 4])], 1, ScoreCombiner::Sum);
        assert_eq!(collect_docs(&mut or).unwrap(), vec![1, 2, 3, 4]);

        let mut two = DisjunctionScorer::new(vec![set(&[1, 2]), set(&[2, 3]), set(&[3, 4])], 2, ScoreCombiner::Sum);
        assert_eq!(two.next().unwrap(), 2);
        assert_eq!(two.score().unwrap(), 2.0);
        assert_eq!(two.advance(3).unwrap(), 3);
        assert_eq!(two.next().unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_dis_max_combiner() {
        let clauses: Vec<BoxedScorer<'static>> = vec![
            Box::new(DocSetScorer::new(vec![(1, 2.0)])),
            Box::new(DocSetScorer::new(vec![(1, 1.0)])),
        ];
        let mut dis_max = DisjunctionScorer::new(clauses, 1, ScoreCombiner::Max { tie_breaker: 0.5 });
        dis_max.next().unwrap();
        assert_eq!(dis_max.score().unwrap(), 2.5);
    }

    #[test]
    fn test_exclusion_and_optional() {
        let mut not = ReqExclScorer::new(set(&[1, 2, 3, 4]), set(&[2, 4]));
        assert_eq!(collect_docs(&mut not).unwrap(), vec![1, 3]);

        let mut opt = ReqOptScorer::new(set(&[1, 2]), set(&[2, 5]));
        assert_eq!(opt.next().unwrap(), 1);
        assert_eq!(opt.score().unwrap(), 1.0);
        assert_eq!(opt.next().unwrap(), 2);
        assert_eq!(opt.score().unwrap(), 2.0);
    }
}
