//! Function score scorer.

use crate::error::Result;
use crate::lexical::core::doc_values::NumericDocValues;
use crate::lexical::search::scorer::{BoxedScorer, Scorer};
use crate::lexical::search::scoring::function_score::{
    BoostMode, FunctionScoreMode, ScoreFunction, combine_functions, combine_with_score,
};

/// One function bound to a segment: its filter scorer (if any) and doc values.
#[derive(Debug)]
pub struct SegmentFunction<'a> {
    /// `None` when the function has a filter that matches nothing in the segment.
    pub filter: Option<BoxedScorer<'a>>,
    pub filtered: bool,
    pub function: ScoreFunction,
    pub values: Option<&'a NumericDocValues>,
}

impl SegmentFunction<'_> {
    fn applies(&mut self, doc: u32) -> Result<bool> {
        if !self.filtered {
            return Ok(true);
        }
        match &mut self.filter {
            Some(filter) => Ok(filter.advance(doc)? == doc),
            None => Ok(false),
        }
    }
}

/// Rescores the wrapped query's matches: the applicable function values are combined
/// by `score_mode`, capped at `max_boost`, then merged with the query score by
/// `boost_mode`.
#[derive(Debug)]
pub struct FunctionScoreScorer<'a> {
    inner: BoxedScorer<'a>,
    functions: Vec<SegmentFunction<'a>>,
    score_mode: FunctionScoreMode,
    boost_mode: BoostMode,
    max_boost: Option<f32>,
    boost: f32,
    values: Vec<f64>,
}

impl<'a> FunctionScoreScorer<'a> {
    pub fn new(
        inner: BoxedScorer<'a>,
        functions: Vec<SegmentFunction<'a>>,
        score_mode: FunctionScoreMode,
        boost_mode: BoostMode,
        max_boost: Option<f32>,
        boost: f32,
    ) -> Self {
        FunctionScoreScorer {
            inner,
            values: Vec::with_capacity(functions.len()),
            functions,
            score_mode,
            boost_mode,
            max_boost,
            boost,
        }
    }
}

impl Scorer for FunctionScoreScorer<'_> {
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
        let doc = self.inner.doc();
        let query_score = self.inner.score()? as f64;

        self.values.clear();
        for function in &mut self.functions {
            if function.applies(doc)? {
                if let Some(value) = function.function.evaluate(function.values, doc) {
                    self.values.push(value);
                }
            }
        }
        let mut combined = combine_functions(self.score_mode, &self.values);
        if let Some(max_boost) = self.max_boost {
            combined = combined.min(max_boost as f64);
        }
        let score = combine_with_score(self.boost_mode, query_score, combined) * self.boost as f64;
        Ok(score as f32)
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }
}
