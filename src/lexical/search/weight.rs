//! Snapshot-level query weights.
//!
//! A [`Weight`] is a rewritten query with its collection statistics resolved once
//! against the whole snapshot, so a term scores the same in every segment. It then
//! hands out one [`Scorer`](crate::lexical::search::scorer::Scorer) per segment.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::lexical::index::searcher_manager::{IndexSnapshot, SegmentSnapshot};
use crate::lexical::index::segment_builder::NESTED_PATH_FIELD;
use crate::lexical::query::NestedScoreMode;
use crate::lexical::query::rewrite::{PhraseSlot, Rewritten};
use crate::lexical::search::scorer::boolean::{
    ConjunctionScorer, DisjunctionScorer, ReqExclScorer, ReqOptScorer, ScoreCombiner,
};
use crate::lexical::search::scorer::function::{FunctionScoreScorer, SegmentFunction};
use crate::lexical::search::scorer::phrase::{PhraseScorer, SlotPostings};
use crate::lexical::search::scorer::term::TermScorer;
use crate::lexical::search::scorer::{
    AllScorer, BoostScorer, BoxedScorer, ConstantScorer, DocSetScorer, NO_MORE_DOCS,
};
use crate::lexical::search::scoring::bm25::{Bm25Similarity, CollectionStats, SimScorer};
use crate::lexical::search::scoring::function_score::{
    BoostMode, FunctionScoreMode, ScoreFunction,
};

#[derive(Debug, Clone)]
pub enum Weight {
    MatchAll {
        boost: f32,
    },
    MatchNone,
    Term {
        field: String,
        term: String,
        sim: SimScorer,
    },
    Phrase {
        field: String,
        slots: Vec<PhraseSlot>,
        slop: u32,
        sim: SimScorer,
    },
    Range {
        field: String,
        min: [u8; 8],
        max: [u8; 8],
        boost: f32,
    },
    Bool {
        must: Vec<Weight>,
        should: Vec<Weight>,
        must_not: Vec<Weight>,
        filter: Vec<Weight>,
        minimum_should_match: usize,
        boost: f32,
    },
    DisMax {
        queries: Vec<Weight>,
        tie_breaker: f32,
        boost: f32,
    },
    Nested {
        path: String,
        query: Box<Weight>,
        score_mode: NestedScoreMode,
    },
    FunctionScore {
        query: Box<Weight>,
        functions: Vec<(Option<Weight>, ScoreFunction)>,
        score_mode: FunctionScoreMode,
        boost_mode: BoostMode,
        max_boost: Option<f32>,
        boost: f32,
    },
    ConstantScore {
        query: Box<Weight>,
        boost: f32,
    },
    Boost {
        query: Box<Weight>,
        boost: f32,
    },
}

/// Field statistics summed over the live documents of every segment.
pub fn collection_stats(snapshot: &IndexSnapshot, field: &str) -> Result<CollectionStats> {
    let mut stats = CollectionStats::default();
    for segment in &snapshot.segments {
        if let Some(live) = segment.field_stats(field)? {
            stats.doc_count += live.doc_count;
            stats.sum_total_term_freq += live.sum_total_term_freq;
        }
    }
    Ok(stats)
}

/// Live documents containing `term`.
pub fn doc_freq(snapshot: &IndexSnapshot, field: &str, term: &str) -> Result<u64> {
    let mut df = 0;
    for segment in &snapshot.segments {
        df += segment.doc_freq(field, term)?;
    }
    Ok(df)
}

impl Weight {
    pub fn new(query: &Rewritten, snapshot: &IndexSnapshot, similarity: &Bm25Similarity) -> Result<Weight> {
        let all = |queries: &[Rewritten]| -> Result<Vec<Weight>> {
            queries
                .iter()
                .map(|q| Weight::new(q, snapshot, similarity))
                .collect()
        };
        Ok(match query {
            Rewritten::MatchAll { boost } => Weight::MatchAll { boost: *boost },
            Rewritten::MatchNone => Weight::MatchNone,
            Rewritten::Term {
                field,
                term,
                boost,
                doc_freq: df_override,
            } => {
                let stats = collection_stats(snapshot, field)?;
                let df = match df_override {
                    Some(df) => *df,
                    None => doc_freq(snapshot, field, term)?,
                };
                let idf = similarity.idf(df, stats.doc_count);
                Weight::Term {
                    field: field.clone(),
                    term: term.clone(),
                    sim: similarity.scorer(idf, stats, *boost),
                }
            }
            Rewritten::Phrase {
                field,
                slots,
                slop,
                boost,
            } => {
                let stats = collection_stats(snapshot, field)?;
                let mut idf = 0.0;
                for term in slots.iter().flat_map(|s| &s.terms) {
                    idf += similarity.idf(doc_freq(snapshot, field, term)?, stats.doc_count);
                }
                Weight::Phrase {
                    field: field.clone(),
                    slots: slots.clone(),
                    slop: *slop,
                    sim: similarity.scorer(idf, stats, *boost),
                }
            }
            Rewritten::Range {
                field,
                min,
                max,
                boost,
            } => Weight::Range {
                field: field.clone(),
                min: *min,
                max: *max,
                boost: *boost,
            },
            Rewritten::Bool {
                must,
                should,
                must_not,
                filter,
                minimum_should_match,
                boost,
            } => Weight::Bool {
                must: all(must)?,
                should: all(should)?,
                must_not: all(must_not)?,
                filter: all(filter)?,
                minimum_should_match: *minimum_should_match,
                boost: *boost,
            },
            Rewritten::DisMax {
                queries,
                tie_breaker,
                boost,
            } => Weight::DisMax {
                queries: all(queries)?,
                tie_breaker: *tie_breaker,
                boost: *boost,
            },
            Rewritten::Nested {
                path,
                query,
                score_mode,
            } => Weight::Nested {
                path: path.clone(),
                query: Box::new(Weight::new(query, snapshot, similarity)?),
                score_mode: *score_mode,
            },
            Rewritten::FunctionScore {
                query,
                functions,
                score_mode,
                boost_mode,
                max_boost,
                boost,
            } => {
                let mut weighted = Vec::with_capacity(functions.len());
                for (filter, function) in functions {
                    let filter = filter
                        .as_ref()
                        .map(|f| Weight::new(f, snapshot, similarity))
                        .transpose()?;
                    weighted.push((filter, function.clone()));
                }
                Weight::FunctionScore {
                    query: Box::new(Weight::new(query, snapshot, similarity)?),
                    functions: weighted,
                    score_mode: *score_mode,
                    boost_mode: *boost_mode,
                    max_boost: *max_boost,
                    boost: *boost,
                }
            }
            Rewritten::ConstantScore { query, boost } => Weight::ConstantScore {
                query: Box::new(Weight::new(query, snapshot, similarity)?),
                boost: *boost,
            },
            Rewritten::Boost { query, boost } => Weight::Boost {
                query: Box::new(Weight::new(query, snapshot, similarity)?),
                boost: *boost,
            },
        })
    }

    /// Scorer over one segment, `None` when nothing in the segment can match.
    pub fn scorer<'a>(&self, segment: &'a SegmentSnapshot) -> Result<Option<BoxedScorer<'a>>> {
        let reader = segment.reader.as_ref();
        Ok(match self {
            Weight::MatchAll { boost } => Some(Box::new(AllScorer::new(reader.num_docs(), *boost))),
            Weight::MatchNone => None,
            Weight::Term { field, term, sim } => reader.postings(field, term)?.map(|postings| {
                Box::new(TermScorer::new(postings, reader.field_info(field), *sim)) as BoxedScorer<'a>
            }),
            Weight::Phrase {
                field,
                slots,
                slop,
                sim,
            } => {
                let mut slot_postings = Vec::with_capacity(slots.len());
                for slot in slots {
                    let mut iters = Vec::with_capacity(slot.terms.len());
                    for term in &slot.terms {
                        if let Some(postings) = reader.postings(field, term)? {
                            iters.push(postings);
                        }
                    }
                    if iters.is_empty() {
                        return Ok(None);
                    }
                    slot_postings.push(SlotPostings::new(slot.offset, iters));
                }
                Some(Box::new(PhraseScorer::new(
                    slot_postings,
                    *slop,
                    reader.field_info(field),
                    *sim,
                )))
            }
            Weight::Range {
                field,
                min,
                max,
                boost,
            } => {
                let Some(points) = reader.points(field) else {
                    return Ok(None);
                };
                let mut docs = Vec::new();
                points.range_query(min, max, &mut |doc| docs.push(doc))?;
                if docs.is_empty() {
                    None
                } else {
                    Some(Box::new(DocSetScorer::constant(docs, *boost)))
                }
            }
            Weight::Bool {
                must,
                should,
                must_not,
                filter,
                minimum_should_match,
                boost,
            } => bool_scorer(
                segment,
                must,
                should,
                must_not,
                filter,
                *minimum_should_match,
                *boost,
            )?,
            Weight::DisMax {
                queries,
                tie_breaker,
                boost,
            } => {
                let mut scorers = present(queries, segment)?;
                let scorer: BoxedScorer<'a> = match scorers.len() {
                    0 => return Ok(None),
                    1 => scorers.remove(0),
                    _ => Box::new(DisjunctionScorer::new(
                        scorers,
                        1,
                        ScoreCombiner::Max {
                            tie_breaker: *tie_breaker,
                        },
                    )),
                };
                Some(boosted(scorer, *boost))
            }
            Weight::Nested {
                path,
                query,
                score_mode,
            } => nested_scorer(segment, path, query, *score_mode)?,
            Weight::FunctionScore {
                query,
                functions,
                score_mode,
                boost_mode,
                max_boost,
                boost,
            } => {
                let Some(inner) = query.scorer(segment)? else {
                    return Ok(None);
                };
                let mut bound = Vec::with_capacity(functions.len());
                for (filter, function) in functions {
                    let filter_scorer = match filter {
                        Some(filter) => filter.scorer(segment)?,
                        None => None,
                    };
                    bound.push(SegmentFunction {
                        filter: filter_scorer,
                        filtered: filter.is_some(),
                        function: function.clone(),
                        values: function.field().and_then(|f| reader.numeric_doc_values(f)),
                    });
                }
                Some(Box::new(FunctionScoreScorer::new(
                    inner,
                    bound,
                    *score_mode,
                    *boost_mode,
                    *max_boost,
                    *boost,
                )))
            }
            Weight::ConstantScore { query, boost } => query
                .scorer(segment)?
                .map(|inner| Box::new(ConstantScorer::new(inner, *boost)) as BoxedScorer<'a>),
            Weight::Boost { query, boost } => query.scorer(segment)?.map(|inner| boosted(inner, *boost)),
        })
    }
}

fn boosted(scorer: BoxedScorer<'_>, boost: f32) -> BoxedScorer<'_> {
    if boost == 1.0 {
        scorer
    } else {
        Box::new(BoostScorer::new(scorer, boost))
    }
}

fn present<'a>(weights: &[Weight], segment: &'a SegmentSnapshot) -> Result<Vec<BoxedScorer<'a>>> {
    let mut scorers = Vec::with_capacity(weights.len());
    for weight in weights {
        if let Some(scorer) = weight.scorer(segment)? {
            scorers.push(scorer);
        }
    }
    Ok(scorers)
}

fn bool_scorer<'a>(
    segment: &'a SegmentSnapshot,
    must: &[Weight],
    should: &[Weight],
    must_not: &[Weight],
    filter: &[Weight],
    minimum_should_match: usize,
    boost: f32,
) -> Result<Option<BoxedScorer<'a>>> {
    let mut required: Vec<(BoxedScorer<'a>, bool)> = Vec::with_capacity(must.len() + filter.len());
    for (weights, scoring) in [(must, true), (filter, false)] {
        for weight in weights {
            match weight.scorer(segment)? {
                Some(scorer) => required.push((scorer, scoring)),
                None => return Ok(None),
            }
        }
    }

    let optional = present(should, segment)?;
    if minimum_should_match > optional.len() {
        return Ok(None);
    }
    if required.is_empty() && !should.is_empty() && optional.is_empty() {
        return Ok(None);
    }

    let disjunction = |mut scorers: Vec<BoxedScorer<'a>>, msm: usize| -> BoxedScorer<'a> {
        if scorers.len() == 1 {
            scorers.remove(0)
        } else {
            Box::new(DisjunctionScorer::new(scorers, msm, ScoreCombiner::Sum))
        }
    };

    let conjunction = |mut required: Vec<(BoxedScorer<'a>, bool)>| -> BoxedScorer<'a> {
        if required.len() == 1 && required[0].1 {
            required.remove(0).0
        } else {
            Box::new(ConjunctionScorer::new(required))
        }
    };

    let mut scorer: BoxedScorer<'a> = if required.is_empty() {
        if optional.is_empty() {
            // only exclusions: everything else matches, scoring nothing
            Box::new(AllScorer::new(segment.reader.num_docs(), 0.0))
        } else {
            disjunction(optional, minimum_should_match.max(1))
        }
    } else if minimum_should_match > 0 {
        required.push((disjunction(optional, minimum_should_match), true));
        conjunction(required)
    } else if optional.is_empty() {
        conjunction(required)
    } else {
        Box::new(ReqOptScorer::new(conjunction(required), disjunction(optional, 1)))
    };

    let excluded = present(must_not, segment)?;
    if !excluded.is_empty() {
        scorer = Box::new(ReqExclScorer::new(scorer, disjunction(excluded, 1)));
    }
    Ok(Some(boosted(scorer, boost)))
}

/// Runs the child query over the children under `path` and scores their parents.
fn nested_scorer<'a>(
    segment: &'a SegmentSnapshot,
    path: &str,
    query: &Weight,
    score_mode: NestedScoreMode,
) -> Result<Option<BoxedScorer<'a>>> {
    let reader = segment.reader.as_ref();
    let Some(mut children) = reader.postings(NESTED_PATH_FIELD, path)? else {
        return Ok(None);
    };
    let Some(mut inner) = query.scorer(segment)? else {
        return Ok(None);
    };

    // parent -> (sum, count, max, min)
    let mut parents: BTreeMap<u32, (f32, u32, f32, f32)> = BTreeMap::new();
    loop {
        let doc = inner.next()?;
        if doc == NO_MORE_DOCS {
            break;
        }
        if children.advance(doc)? != doc || !segment.is_live(doc) {
            continue;
        }
        let Some(parent) = reader.parent_of(doc) else {
            continue;
        };
        let score = inner.score()?;
        let entry = parents
            .entry(parent)
            .or_insert((0.0, 0, f32::MIN, f32::MAX));
        entry.0 += score;
        entry.1 += 1;
        entry.2 = entry.2.max(score);
        entry.3 = entry.3.min(score);
    }
    if parents.is_empty() {
        return Ok(None);
    }

    let docs = parents
        .into_iter()
        .map(|(parent, (sum, count, max, min))| {
            let score = match score_mode {
                NestedScoreMode::Avg => sum / count as f32,
                NestedScoreMode::Max => max,
                NestedScoreMode::Min => min,
                NestedScoreMode::Sum => sum,
                NestedScoreMode::None => 0.0,
            };
            (parent, score)
        })
        .collect();
    Ok(Some(Box::new(DocSetScorer::new(docs))))
}
