//! Query rewriting.
//!
//! Turns a [`Query`] into a [`Rewritten`] tree that only holds executable leaves:
//! text is analyzed, multi-term queries are expanded into the concrete terms the
//! snapshot's dictionaries hold, range bounds are encoded as point keys and boolean
//! structure is flattened. Malformed queries fail here, before any scoring starts.

use std::collections::BTreeSet;

use log::debug;

use crate::analysis::analyzer::per_field::PerFieldAnalyzer;
use crate::document::FieldType;
use crate::error::{Result, XiphosError};
use crate::lexical::core::automaton::{
    LevenshteinAutomaton, MAX_EDITS, RegexpAutomaton, WildcardAutomaton,
};
use crate::lexical::index::searcher_manager::IndexSnapshot;
use crate::lexical::query::{
    BoolQuery, FunctionScoreQuery, MultiMatchType, NestedScoreMode, Operator, Query, RangeBound,
    RangeValue,
};
use crate::lexical::search::scoring::function_score::{
    BoostMode, FunctionScoreMode, ScoreFunction,
};
use crate::lexical::search::weight::doc_freq;
use crate::util::sortable::{encode_f64, encode_i64};

/// Terms expected at one relative position of a phrase; any of them matches.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseSlot {
    /// Position relative to the first slot.
    pub offset: u32,
    pub terms: Vec<String>,
}

/// An executable query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewritten {
    MatchAll {
        boost: f32,
    },
    MatchNone,
    Term {
        field: String,
        term: String,
        boost: f32,
        /// Replaces the term's own document frequency in the idf.
        doc_freq: Option<u64>,
    },
    Phrase {
        field: String,
        slots: Vec<PhraseSlot>,
        slop: u32,
        boost: f32,
    },
    /// Inclusive range over 8-byte point keys.
    Range {
        field: String,
        min: [u8; 8],
        max: [u8; 8],
        boost: f32,
    },
    Bool {
        must: Vec<Rewritten>,
        should: Vec<Rewritten>,
        must_not: Vec<Rewritten>,
        filter: Vec<Rewritten>,
        minimum_should_match: usize,
        boost: f32,
    },
    DisMax {
        queries: Vec<Rewritten>,
        tie_breaker: f32,
        boost: f32,
    },
    Nested {
        path: String,
        query: Box<Rewritten>,
        score_mode: NestedScoreMode,
    },
    FunctionScore {
        query: Box<Rewritten>,
        functions: Vec<(Option<Rewritten>, ScoreFunction)>,
        score_mode: FunctionScoreMode,
        boost_mode: BoostMode,
        max_boost: Option<f32>,
        boost: f32,
    },
    ConstantScore {
        query: Box<Rewritten>,
        boost: f32,
    },
    Boost {
        query: Box<Rewritten>,
        boost: f32,
    },
}

impl Rewritten {
    /// Whether the query contributes nothing to the score wherever it matches.
    fn is_non_scoring(&self) -> bool {
        match self {
            Rewritten::Range { .. } => true,
            Rewritten::ConstantScore { boost, .. } => *boost == 0.0,
            Rewritten::Bool {
                must,
                should,
                filter,
                ..
            } => must.is_empty() && should.is_empty() && !filter.is_empty(),
            _ => false,
        }
    }

    fn should_of(mut clauses: Vec<Rewritten>, boost: f32) -> Rewritten {
        match clauses.len() {
            0 => Rewritten::MatchNone,
            1 if boost == 1.0 => clauses.remove(0),
            _ => Rewritten::Bool {
                must: Vec::new(),
                should: clauses,
                must_not: Vec::new(),
                filter: Vec::new(),
                minimum_should_match: 1,
                boost,
            },
        }
    }

    fn must_of(mut clauses: Vec<Rewritten>, boost: f32) -> Rewritten {
        match clauses.len() {
            0 => Rewritten::MatchNone,
            1 if boost == 1.0 => clauses.remove(0),
            _ => Rewritten::Bool {
                must: clauses,
                should: Vec::new(),
                must_not: Vec::new(),
                filter: Vec::new(),
                minimum_should_match: 0,
                boost,
            },
        }
    }

    fn term(field: &str, term: String, boost: f32) -> Rewritten {
        Rewritten::Term {
            field: field.to_string(),
            term,
            boost,
            doc_freq: None,
        }
    }
}

/// Rewrites queries against one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Rewriter<'a> {
    snapshot: &'a IndexSnapshot,
    analyzer: &'a PerFieldAnalyzer,
}

impl<'a> Rewriter<'a> {
    pub fn new(snapshot: &'a IndexSnapshot, analyzer: &'a PerFieldAnalyzer) -> Self {
        Rewriter { snapshot, analyzer }
    }

    pub fn rewrite(&self, query: &Query) -> Result<Rewritten> {
        match query {
            Query::MatchAll { boost } => {
                check_boost(*boost)?;
                Ok(Rewritten::MatchAll { boost: *boost })
            }
            Query::MatchNone => Ok(Rewritten::MatchNone),
            Query::Term { field, term, boost } => {
                check_field(field)?;
                check_boost(*boost)?;
                Ok(Rewritten::term(field, term.clone(), *boost))
            }
            Query::Match {
                field,
                text,
                operator,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                let terms = self
                    .analyze(field, text)?
                    .into_iter()
                    .map(|(term, _)| Rewritten::term(field, term, 1.0))
                    .collect();
                Ok(match operator {
                    Operator::Or => Rewritten::should_of(terms, *boost),
                    Operator::And => Rewritten::must_of(terms, *boost),
                })
            }
            Query::Phrase {
                field,
                terms,
                slop,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                if terms.is_empty() {
                    return Err(XiphosError::query(format!("phrase on '{field}' has no terms")));
                }
                let slots = terms
                    .iter()
                    .enumerate()
                    .map(|(i, term)| PhraseSlot {
                        offset: i as u32,
                        terms: vec![term.clone()],
                    })
                    .collect();
                Ok(phrase(field, slots, *slop, *boost))
            }
            Query::MatchPhrase {
                field,
                text,
                slop,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                let tokens = self.analyze(field, text)?;
                let Some(first) = tokens.first().map(|(_, position)| *position) else {
                    return Ok(Rewritten::MatchNone);
                };
                let mut slots: Vec<PhraseSlot> = Vec::new();
                for (term, position) in tokens {
                    let offset = position - first;
                    match slots.last_mut() {
                        Some(slot) if slot.offset == offset => slot.terms.push(term),
                        _ => slots.push(PhraseSlot {
                            offset,
                            terms: vec![term],
                        }),
                    }
                }
                Ok(phrase(field, slots, *slop, *boost))
            }
            Query::Fuzzy {
                field,
                term,
                max_edits,
                prefix_length,
                max_expansions,
                transpositions,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                check_expansions(*max_expansions)?;
                if *max_edits > MAX_EDITS {
                    return Err(XiphosError::query(format!(
                        "fuzzy max_edits must be at most {MAX_EDITS}, got {max_edits}"
                    )));
                }
                let automaton =
                    LevenshteinAutomaton::new(term, *max_edits, *prefix_length, *transpositions)?;
                let mut found = BTreeSet::new();
                for segment in &self.snapshot.segments {
                    if let Some(dict) = segment.reader.terms(field) {
                        for (candidate, _) in dict.intersect(automaton.clone()) {
                            if let Some(distance) = automaton.distance(&candidate) {
                                found.insert((distance, candidate));
                            }
                        }
                    }
                }
                let terms: Vec<String> = found
                    .into_iter()
                    .take(*max_expansions)
                    .map(|(_, t)| t)
                    .collect();
                Ok(self.expansion(field, terms, *boost, query))
            }
            Query::Prefix {
                field,
                prefix,
                max_expansions,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                check_expansions(*max_expansions)?;
                let mut found = BTreeSet::new();
                for segment in &self.snapshot.segments {
                    if let Some(dict) = segment.reader.terms(field) {
                        found.extend(dict.prefix_iterate(prefix).map(|(t, _)| t));
                    }
                }
                let terms = found.into_iter().take(*max_expansions).collect();
                Ok(self.expansion(field, terms, *boost, query))
            }
            Query::Wildcard {
                field,
                pattern,
                max_expansions,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                check_expansions(*max_expansions)?;
                let automaton = WildcardAutomaton::new(pattern);
                let mut found = BTreeSet::new();
                for segment in &self.snapshot.segments {
                    if let Some(dict) = segment.reader.terms(field) {
                        found.extend(dict.intersect(automaton.clone()).map(|(t, _)| t));
                    }
                }
                let terms = found.into_iter().take(*max_expansions).collect();
                Ok(self.expansion(field, terms, *boost, query))
            }
            Query::Regexp {
                field,
                pattern,
                max_expansions,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                check_expansions(*max_expansions)?;
                let automaton = RegexpAutomaton::new(pattern)
                    .map_err(|e| XiphosError::query(format!("invalid regexp /{pattern}/: {e}")))?;
                let mut found = BTreeSet::new();
                for segment in &self.snapshot.segments {
                    if let Some(dict) = segment.reader.terms(field) {
                        found.extend(
                            dict.intersect(automaton.clone())
                                .map(|(t, _)| t)
                                .filter(|t| automaton.matches(t)),
                        );
                    }
                }
                let terms = found.into_iter().take(*max_expansions).collect();
                Ok(self.expansion(field, terms, *boost, query))
            }
            Query::Range {
                field,
                lower,
                upper,
                boost,
            } => {
                check_field(field)?;
                check_boost(*boost)?;
                self.range(field, lower, upper, *boost)
            }
            Query::Bool(b) => self.bool(b),
            Query::DisMax {
                queries,
                tie_breaker,
                boost,
            } => {
                check_boost(*boost)?;
                check_tie_breaker(*tie_breaker)?;
                let queries = queries
                    .iter()
                    .map(|q| self.rewrite(q))
                    .filter(|q| !matches!(q, Ok(Rewritten::MatchNone)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(dis_max(queries, *tie_breaker, *boost))
            }
            Query::MultiMatch {
                fields,
                text,
                match_type,
                operator,
                boost,
            } => {
                check_boost(*boost)?;
                if fields.is_empty() {
                    return Err(XiphosError::query("multi_match needs at least one field"));
                }
                for field in fields {
                    check_field(field)?;
                }
                self.multi_match(fields, text, *match_type, *operator, *boost)
            }
            Query::Nested {
                path,
                query,
                score_mode,
            } => {
                check_field(path)?;
                Ok(match self.rewrite(query)? {
                    Rewritten::MatchNone => Rewritten::MatchNone,
                    inner => Rewritten::Nested {
                        path: path.clone(),
                        query: Box::new(inner),
                        score_mode: *score_mode,
                    },
                })
            }
            Query::FunctionScore(fs) => self.function_score(fs),
            Query::Boost { query, boost } => {
                check_boost(*boost)?;
                Ok(match self.rewrite(query)? {
                    Rewritten::MatchNone => Rewritten::MatchNone,
                    inner if *boost == 1.0 => inner,
                    inner => Rewritten::Boost {
                        query: Box::new(inner),
                        boost: *boost,
                    },
                })
            }
            Query::ConstantScore { query, boost } => {
                check_boost(*boost)?;
                Ok(match self.rewrite(query)? {
                    Rewritten::MatchNone => Rewritten::MatchNone,
                    inner => Rewritten::ConstantScore {
                        query: Box::new(inner),
                        boost: *boost,
                    },
                })
            }
        }
    }

    /// Non-stopped tokens of `text` with their positions.
    fn analyze(&self, field: &str, text: &str) -> Result<Vec<(String, u32)>> {
        Ok(self
            .analyzer
            .analyze(field, text)?
            .filter(|token| !token.is_stopped())
            .map(|token| (token.text, token.position as u32))
            .collect())
    }

    fn expansion(&self, field: &str, terms: Vec<String>, boost: f32, query: &Query) -> Rewritten {
        debug!("{} expanded to {} terms", query.description(), terms.len());
        let clauses = terms
            .into_iter()
            .map(|term| Rewritten::term(field, term, 1.0))
            .collect();
        Rewritten::should_of(clauses, boost)
    }

    fn range(&self, field: &str, lower: &RangeBound, upper: &RangeBound, boost: f32) -> Result<Rewritten> {
        let Some(field_type) = self
            .snapshot
            .segments
            .iter()
            .find_map(|s| s.reader.field_type(field))
        else {
            return Ok(Rewritten::MatchNone);
        };
        let keys = match field_type {
            FieldType::Integer | FieldType::DateTime => integer_keys(lower, upper),
            FieldType::Float => float_keys(lower, upper),
            other => {
                return Err(XiphosError::query(format!(
                    "range on '{field}' needs a numeric, float or date field, it is {other:?}"
                )));
            }
        };
        Ok(match keys {
            Some((min, max)) if min <= max => Rewritten::Range {
                field: field.to_string(),
                min,
                max,
                boost,
            },
            _ => Rewritten::MatchNone,
        })
    }

    fn bool(&self, query: &BoolQuery) -> Result<Rewritten> {
        check_boost(query.boost)?;
        let mut must = Vec::new();
        let mut should = Vec::new();
        let mut must_not = Vec::new();
        let mut filter = Vec::new();

        for clause in &query.must {
            match self.rewrite(clause)? {
                Rewritten::MatchNone => return Ok(Rewritten::MatchNone),
                Rewritten::Bool {
                    must: inner_must,
                    should: inner_should,
                    must_not: inner_not,
                    filter: inner_filter,
                    boost,
                    ..
                } if inner_should.is_empty()
                    && boost == 1.0
                    && (!inner_must.is_empty() || !inner_filter.is_empty()) =>
                {
                    must.extend(inner_must);
                    must_not.extend(inner_not);
                    filter.extend(inner_filter);
                }
                other if other.is_non_scoring() => filter.push(other),
                other => must.push(other),
            }
        }
        for clause in &query.filter {
            match self.rewrite(clause)? {
                Rewritten::MatchNone => return Ok(Rewritten::MatchNone),
                Rewritten::Bool {
                    must: inner_must,
                    should: inner_should,
                    must_not: inner_not,
                    filter: inner_filter,
                    ..
                } if inner_should.is_empty()
                    && (!inner_must.is_empty() || !inner_filter.is_empty()) =>
                {
                    filter.extend(inner_must);
                    filter.extend(inner_filter);
                    must_not.extend(inner_not);
                }
                other => filter.push(other),
            }
        }
        for clause in &query.should {
            let flattenable = query.minimum_should_match.is_none()
                && matches!(clause, Query::Bool(b) if b.minimum_should_match.is_none());
            match self.rewrite(clause)? {
                Rewritten::MatchNone => {}
                Rewritten::Bool {
                    must: inner_must,
                    should: inner_should,
                    must_not: inner_not,
                    filter: inner_filter,
                    boost,
                    ..
                } if flattenable
                    && boost == 1.0
                    && inner_must.is_empty()
                    && inner_not.is_empty()
                    && inner_filter.is_empty() =>
                {
                    should.extend(inner_should);
                }
                other => should.push(other),
            }
        }
        for clause in &query.must_not {
            match self.rewrite(clause)? {
                Rewritten::MatchNone => {}
                other => must_not.push(other),
            }
        }

        let required = !must.is_empty() || !filter.is_empty();
        let minimum_should_match = match query.minimum_should_match {
            Some(n) => n,
            None if !required && !should.is_empty() => 1,
            None => 0,
        };
        if minimum_should_match > should.len() {
            return Ok(Rewritten::MatchNone);
        }
        if !required && should.is_empty() && must_not.is_empty() {
            // every should clause matched nothing
            return Ok(if query.should.is_empty() {
                Rewritten::MatchAll { boost: query.boost }
            } else {
                Rewritten::MatchNone
            });
        }
        Ok(Rewritten::Bool {
            must,
            should,
            must_not,
            filter,
            minimum_should_match,
            boost: query.boost,
        })
    }

    fn multi_match(
        &self,
        fields: &[String],
        text: &str,
        match_type: MultiMatchType,
        operator: Operator,
        boost: f32,
    ) -> Result<Rewritten> {
        let per_field = |field: &String| {
            self.rewrite(&Query::Match {
                field: field.clone(),
                text: text.to_string(),
                operator,
                boost: 1.0,
            })
        };
        match match_type {
            MultiMatchType::BestFields { tie_breaker } => {
                check_tie_breaker(tie_breaker)?;
                let queries = fields
                    .iter()
                    .map(per_field)
                    .filter(|q| !matches!(q, Ok(Rewritten::MatchNone)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(dis_max(queries, tie_breaker, boost))
            }
            MultiMatchType::MostFields => {
                let queries = fields
                    .iter()
                    .map(per_field)
                    .filter(|q| !matches!(q, Ok(Rewritten::MatchNone)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Rewritten::should_of(queries, boost))
            }
            MultiMatchType::CrossFields { tie_breaker } => {
                check_tie_breaker(tie_breaker)?;
                let analyzed = fields
                    .iter()
                    .map(|f| self.analyze(f, text))
                    .collect::<Result<Vec<_>>>()?;
                let num_terms = analyzed.iter().map(Vec::len).max().unwrap_or(0);

                let mut per_term = Vec::with_capacity(num_terms);
                for i in 0..num_terms {
                    let mut candidates = Vec::new();
                    for (field, terms) in fields.iter().zip(&analyzed) {
                        if let Some((term, _)) = terms.get(i) {
                            candidates.push((field, term.clone(), doc_freq(self.snapshot, field, term)?));
                        }
                    }
                    let max_df = candidates.iter().map(|(_, _, df)| *df).max().unwrap_or(0);
                    let blended = candidates
                        .into_iter()
                        .map(|(field, term, _)| Rewritten::Term {
                            field: field.clone(),
                            term,
                            boost: 1.0,
                            doc_freq: Some(max_df),
                        })
                        .collect();
                    per_term.push(dis_max(blended, tie_breaker, 1.0));
                }
                Ok(match operator {
                    Operator::Or => Rewritten::should_of(per_term, boost),
                    Operator::And => Rewritten::must_of(per_term, boost),
                })
            }
        }
    }

    fn function_score(&self, fs: &FunctionScoreQuery) -> Result<Rewritten> {
        check_boost(fs.boost)?;
        if let Some(max_boost) = fs.max_boost {
            check_boost(max_boost)?;
        }
        let query = self.rewrite(&fs.query)?;
        if query == Rewritten::MatchNone {
            return Ok(Rewritten::MatchNone);
        }
        let mut functions = Vec::with_capacity(fs.functions.len());
        for function in &fs.functions {
            function.function.validate()?;
            if let Some(field) = function.function.field() {
                check_field(field)?;
            }
            let filter = function.filter.as_ref().map(|f| self.rewrite(f)).transpose()?;
            functions.push((filter, function.function.clone()));
        }
        Ok(Rewritten::FunctionScore {
            query: Box::new(query),
            functions,
            score_mode: fs.score_mode,
            boost_mode: fs.boost_mode,
            max_boost: fs.max_boost,
            boost: fs.boost,
        })
    }
}

fn phrase(field: &str, mut slots: Vec<PhraseSlot>, slop: u32, boost: f32) -> Rewritten {
    if slots.len() == 1 {
        let terms = slots.remove(0).terms;
        let clauses = terms
            .into_iter()
            .map(|term| Rewritten::term(field, term, 1.0))
            .collect();
        return Rewritten::should_of(clauses, boost);
    }
    Rewritten::Phrase {
        field: field.to_string(),
        slots,
        slop,
        boost,
    }
}

fn dis_max(mut queries: Vec<Rewritten>, tie_breaker: f32, boost: f32) -> Rewritten {
    match queries.len() {
        0 => Rewritten::MatchNone,
        1 if boost == 1.0 => queries.remove(0),
        _ => Rewritten::DisMax {
            queries,
            tie_breaker,
            boost,
        },
    }
}

fn check_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(XiphosError::query("field name must not be empty"));
    }
    Ok(())
}

fn check_boost(boost: f32) -> Result<()> {
    if !boost.is_finite() || boost < 0.0 {
        return Err(XiphosError::query(format!("boost must be a non-negative number, got {boost}")));
    }
    Ok(())
}

fn check_tie_breaker(tie_breaker: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&tie_breaker) {
        return Err(XiphosError::query(format!(
            "tie_breaker must be within [0, 1], got {tie_breaker}"
        )));
    }
    Ok(())
}

fn check_expansions(max_expansions: usize) -> Result<()> {
    if max_expansions == 0 {
        return Err(XiphosError::query("max_expansions must be positive"));
    }
    Ok(())
}

fn to_i64(value: &RangeValue) -> Option<i64> {
    match value {
        RangeValue::Integer(v) => Some(*v),
        RangeValue::DateTime(v) => Some(v.timestamp_millis()),
        RangeValue::Float(_) => None,
    }
}

fn to_f64(value: &RangeValue) -> f64 {
    match value {
        RangeValue::Integer(v) => *v as f64,
        RangeValue::Float(v) => *v,
        RangeValue::DateTime(v) => v.timestamp_millis() as f64,
    }
}

/// Inclusive key bounds for an integer or date field; `None` if nothing can match.
fn integer_keys(lower: &RangeBound, upper: &RangeBound) -> Option<([u8; 8], [u8; 8])> {
    let min = match lower {
        RangeBound::Unbounded => i64::MIN,
        RangeBound::Inclusive(v) => match to_i64(v) {
            Some(v) => v,
            None => float_to_i64(to_f64(v).ceil())?,
        },
        RangeBound::Exclusive(v) => match to_i64(v) {
            Some(v) => v.checked_add(1)?,
            None => float_to_i64(to_f64(v).floor() + 1.0)?,
        },
    };
    let max = match upper {
        RangeBound::Unbounded => i64::MAX,
        RangeBound::Inclusive(v) => match to_i64(v) {
            Some(v) => v,
            None => float_to_i64(to_f64(v).floor())?,
        },
        RangeBound::Exclusive(v) => match to_i64(v) {
            Some(v) => v.checked_sub(1)?,
            None => float_to_i64(to_f64(v).ceil() - 1.0)?,
        },
    };
    Some((encode_i64(min), encode_i64(max)))
}

fn float_to_i64(value: f64) -> Option<i64> {
    (value.is_finite() && value >= i64::MIN as f64 && value <= i64::MAX as f64).then_some(value as i64)
}

/// Inclusive key bounds for a float field; exclusive bounds step to the adjacent key.
fn float_keys(lower: &RangeBound, upper: &RangeBound) -> Option<([u8; 8], [u8; 8])> {
    let min = match lower {
        RangeBound::Unbounded => [0u8; 8],
        RangeBound::Inclusive(v) => encode_f64(check_nan(to_f64(v))?),
        RangeBound::Exclusive(v) => step(encode_f64(check_nan(to_f64(v))?), 1)?,
    };
    let max = match upper {
        RangeBound::Unbounded => [0xff; 8],
        RangeBound::Inclusive(v) => encode_f64(check_nan(to_f64(v))?),
        RangeBound::Exclusive(v) => step(encode_f64(check_nan(to_f64(v))?), -1)?,
    };
    Some((min, max))
}

fn check_nan(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

fn step(key: [u8; 8], delta: i8) -> Option<[u8; 8]> {
    let value = u64::from_be_bytes(key);
    let next = if delta > 0 {
        value.checked_add(1)?
    } else {
        value.checked_sub(1)?
    };
    Some(next.to_be_bytes())
}
