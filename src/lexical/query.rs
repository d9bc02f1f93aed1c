//! Query representation.
//!
//! A [`Query`] is the tree a query-DSL layer hands to the engine. It is never executed
//! directly: [`rewrite`] first expands multi-term queries against a snapshot, analyzes
//! text and flattens boolean structure, and the result is bound to the snapshot as a
//! [`Weight`](crate::lexical::search::weight::Weight).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lexical::search::scoring::function_score::{
    BoostMode, FilteredFunction, FunctionScoreMode,
};

pub mod rewrite;

/// Expansions kept for fuzzy queries unless set otherwise.
pub const DEFAULT_FUZZY_EXPANSIONS: usize = 50;

/// Expansions kept for prefix, wildcard and regexp queries unless set otherwise.
pub const DEFAULT_MAX_EXPANSIONS: usize = 1024;

fn one() -> f32 {
    1.0
}

fn default_fuzzy_expansions() -> usize {
    DEFAULT_FUZZY_EXPANSIONS
}

fn default_max_expansions() -> usize {
    DEFAULT_MAX_EXPANSIONS
}

fn default_max_edits() -> u32 {
    2
}

fn default_transpositions() -> bool {
    true
}

/// How the analyzed terms of a match query combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Or,
    And,
}

/// How a multi-match query combines its fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MultiMatchType {
    /// Best field score plus `tie_breaker` times the other field scores.
    BestFields { tie_breaker: f32 },
    /// Sum of the field scores.
    MostFields,
    /// Treats the fields as one: per term, every field scores with the largest
    /// document frequency the term has in any of them.
    CrossFields { tie_breaker: f32 },
}

impl Default for MultiMatchType {
    fn default() -> Self {
        MultiMatchType::BestFields { tie_breaker: 0.0 }
    }
}

/// How the scores of matching nested children become the parent's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedScoreMode {
    #[default]
    Avg,
    Max,
    Min,
    Sum,
    /// The parent matches with a score of zero.
    None,
}

/// A range endpoint value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeValue {
    Integer(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
}

impl From<i64> for RangeValue {
    fn from(value: i64) -> Self {
        RangeValue::Integer(value)
    }
}

impl From<f64> for RangeValue {
    fn from(value: f64) -> Self {
        RangeValue::Float(value)
    }
}

impl From<DateTime<Utc>> for RangeValue {
    fn from(value: DateTime<Utc>) -> Self {
        RangeValue::DateTime(value)
    }
}

/// One end of a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeBound {
    #[default]
    Unbounded,
    Inclusive(RangeValue),
    Exclusive(RangeValue),
}

/// Boolean combination of clauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoolQuery {
    /// Must match; contributes to the score.
    pub must: Vec<Query>,
    /// May match; contributes to the score.
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
    /// Must match; never scored.
    pub filter: Vec<Query>,
    /// Should clauses that must match. Defaults to 1 when there are no required
    /// clauses and 0 otherwise.
    pub minimum_should_match: Option<usize>,
    pub boost: f32,
}

impl Default for BoolQuery {
    fn default() -> Self {
        BoolQuery {
            must: Vec::new(),
            should: Vec::new(),
            must_not: Vec::new(),
            filter: Vec::new(),
            minimum_should_match: None,
            boost: 1.0,
        }
    }
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }

    pub fn with_minimum_should_match(mut self, minimum: usize) -> Self {
        self.minimum_should_match = Some(minimum);
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn build(self) -> Query {
        Query::Bool(self)
    }
}

/// Wraps a query and rescores its matches with functions of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionScoreQuery {
    pub query: Box<Query>,
    pub functions: Vec<FilteredFunction>,
    #[serde(default)]
    pub score_mode: FunctionScoreMode,
    #[serde(default)]
    pub boost_mode: BoostMode,
    /// Upper bound of the combined function value.
    #[serde(default)]
    pub max_boost: Option<f32>,
    #[serde(default = "one")]
    pub boost: f32,
}

/// The query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    MatchAll {
        #[serde(default = "one")]
        boost: f32,
    },
    MatchNone,
    /// Exact term, not analyzed.
    Term {
        field: String,
        term: String,
        #[serde(default = "one")]
        boost: f32,
    },
    /// Analyzed text; each resulting term is one clause.
    Match {
        field: String,
        text: String,
        #[serde(default)]
        operator: Operator,
        #[serde(default = "one")]
        boost: f32,
    },
    /// Exact terms at consecutive positions, within `slop` moves.
    Phrase {
        field: String,
        terms: Vec<String>,
        #[serde(default)]
        slop: u32,
        #[serde(default = "one")]
        boost: f32,
    },
    /// Analyzed text matched as a phrase.
    MatchPhrase {
        field: String,
        text: String,
        #[serde(default)]
        slop: u32,
        #[serde(default = "one")]
        boost: f32,
    },
    Fuzzy {
        field: String,
        term: String,
        #[serde(default = "default_max_edits")]
        max_edits: u32,
        /// Leading characters that must match exactly.
        #[serde(default)]
        prefix_length: usize,
        #[serde(default = "default_fuzzy_expansions")]
        max_expansions: usize,
        #[serde(default = "default_transpositions")]
        transpositions: bool,
        #[serde(default = "one")]
        boost: f32,
    },
    Prefix {
        field: String,
        prefix: String,
        #[serde(default = "default_max_expansions")]
        max_expansions: usize,
        #[serde(default = "one")]
        boost: f32,
    },
    /// `*` matches any sequence, `?` any single character.
    Wildcard {
        field: String,
        pattern: String,
        #[serde(default = "default_max_expansions")]
        max_expansions: usize,
        #[serde(default = "one")]
        boost: f32,
    },
    /// Regular expression that must match the whole term.
    Regexp {
        field: String,
        pattern: String,
        #[serde(default = "default_max_expansions")]
        max_expansions: usize,
        #[serde(default = "one")]
        boost: f32,
    },
    /// Numeric, float or date range; matches score `boost`.
    Range {
        field: String,
        #[serde(default)]
        lower: RangeBound,
        #[serde(default)]
        upper: RangeBound,
        #[serde(default = "one")]
        boost: f32,
    },
    Bool(BoolQuery),
    /// Best clause score plus `tie_breaker` times the others.
    DisMax {
        queries: Vec<Query>,
        #[serde(default)]
        tie_breaker: f32,
        #[serde(default = "one")]
        boost: f32,
    },
    MultiMatch {
        fields: Vec<String>,
        text: String,
        #[serde(default)]
        match_type: MultiMatchType,
        #[serde(default)]
        operator: Operator,
        #[serde(default = "one")]
        boost: f32,
    },
    /// Runs `query` against the nested children under `path` and matches their root
    /// documents.
    Nested {
        path: String,
        query: Box<Query>,
        #[serde(default)]
        score_mode: NestedScoreMode,
    },
    FunctionScore(FunctionScoreQuery),
    Boost {
        query: Box<Query>,
        boost: f32,
    },
    /// Matches what `query` matches, every hit scoring `boost`.
    ConstantScore {
        query: Box<Query>,
        #[serde(default = "one")]
        boost: f32,
    },
}

impl Query {
    pub fn match_all() -> Self {
        Query::MatchAll { boost: 1.0 }
    }

    pub fn term<F: Into<String>, T: Into<String>>(field: F, term: T) -> Self {
        Query::Term {
            field: field.into(),
            term: term.into(),
            boost: 1.0,
        }
    }

    pub fn match_text<F: Into<String>, T: Into<String>>(field: F, text: T) -> Self {
        Query::Match {
            field: field.into(),
            text: text.into(),
            operator: Operator::Or,
            boost: 1.0,
        }
    }

    pub fn phrase<F: Into<String>, T: Into<String>>(field: F, terms: Vec<T>, slop: u32) -> Self {
        Query::Phrase {
            field: field.into(),
            terms: terms.into_iter().map(Into::into).collect(),
            slop,
            boost: 1.0,
        }
    }

    pub fn match_phrase<F: Into<String>, T: Into<String>>(field: F, text: T, slop: u32) -> Self {
        Query::MatchPhrase {
            field: field.into(),
            text: text.into(),
            slop,
            boost: 1.0,
        }
    }

    pub fn fuzzy<F: Into<String>, T: Into<String>>(field: F, term: T, max_edits: u32) -> Self {
        Query::Fuzzy {
            field: field.into(),
            term: term.into(),
            max_edits,
            prefix_length: 0,
            max_expansions: DEFAULT_FUZZY_EXPANSIONS,
            transpositions: true,
            boost: 1.0,
        }
    }

    pub fn prefix<F: Into<String>, T: Into<String>>(field: F, prefix: T) -> Self {
        Query::Prefix {
            field: field.into(),
            prefix: prefix.into(),
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            boost: 1.0,
        }
    }

    pub fn wildcard<F: Into<String>, T: Into<String>>(field: F, pattern: T) -> Self {
        Query::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            boost: 1.0,
        }
    }

    pub fn regexp<F: Into<String>, T: Into<String>>(field: F, pattern: T) -> Self {
        Query::Regexp {
            field: field.into(),
            pattern: pattern.into(),
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            boost: 1.0,
        }
    }

    pub fn range<F: Into<String>>(field: F, lower: RangeBound, upper: RangeBound) -> Self {
        Query::Range {
            field: field.into(),
            lower,
            upper,
            boost: 1.0,
        }
    }

    pub fn bool() -> BoolQuery {
        BoolQuery::new()
    }

    pub fn dis_max(queries: Vec<Query>, tie_breaker: f32) -> Self {
        Query::DisMax {
            queries,
            tie_breaker,
            boost: 1.0,
        }
    }

    pub fn multi_match<F: Into<String>, T: Into<String>>(
        fields: Vec<F>,
        text: T,
        match_type: MultiMatchType,
    ) -> Self {
        Query::MultiMatch {
            fields: fields.into_iter().map(Into::into).collect(),
            text: text.into(),
            match_type,
            operator: Operator::Or,
            boost: 1.0,
        }
    }

    pub fn nested<P: Into<String>>(path: P, query: Query, score_mode: NestedScoreMode) -> Self {
        Query::Nested {
            path: path.into(),
            query: Box::new(query),
            score_mode,
        }
    }

    pub fn function_score(
        query: Query,
        functions: Vec<FilteredFunction>,
        score_mode: FunctionScoreMode,
        boost_mode: BoostMode,
    ) -> Self {
        Query::FunctionScore(FunctionScoreQuery {
            query: Box::new(query),
            functions,
            score_mode,
            boost_mode,
            max_boost: None,
            boost: 1.0,
        })
    }

    pub fn constant_score(query: Query, boost: f32) -> Self {
        Query::ConstantScore {
            query: Box::new(query),
            boost,
        }
    }

    /// Scales the score of this query.
    pub fn boosted(self, boost: f32) -> Self {
        Query::Boost {
            query: Box::new(self),
            boost,
        }
    }

    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Short description used in log messages.
    pub fn description(&self) -> String {
        match self {
            Query::MatchAll { .. } => "match_all".to_string(),
            Query::MatchNone => "match_none".to_string(),
            Query::Term { field, term, .. } => format!("{field}:{term}"),
            Query::Match { field, text, .. } => format!("{field}:({text})"),
            Query::Phrase { field, terms, slop, .. } => {
                format!("{field}:\"{}\"~{slop}", terms.join(" "))
            }
            Query::MatchPhrase { field, text, slop, .. } => format!("{field}:\"{text}\"~{slop}"),
            Query::Fuzzy {
                field,
                term,
                max_edits,
                ..
            } => format!("{field}:{term}~{max_edits}"),
            Query::Prefix { field, prefix, .. } => format!("{field}:{prefix}*"),
            Query::Wildcard { field, pattern, .. } => format!("{field}:{pattern}"),
            Query::Regexp { field, pattern, .. } => format!("{field}:/{pattern}/"),
            Query::Range { field, .. } => format!("{field}:[range]"),
            Query::Bool(b) => format!(
                "bool(must: {}, should: {}, must_not: {}, filter: {})",
                b.must.len(),
                b.should.len(),
                b.must_not.len(),
                b.filter.len()
            ),
            Query::DisMax { queries, .. } => format!("dis_max({})", queries.len()),
            Query::MultiMatch { fields, text, .. } => format!("{}:({text})", fields.join(",")),
            Query::Nested { path, query, .. } => format!("nested({path}, {})", query.description()),
            Query::FunctionScore(fs) => format!("function_score({})", fs.query.description()),
            Query::Boost { query, boost } => format!("({})^{boost}", query.description()),
            Query::ConstantScore { query, .. } => format!("constant({})", query.description()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let query = Query::bool()
            .must(Query::term("body", "quick"))
            .must_not(Query::term("body", "lazy"))
            .build();
        match &query {
            Query::Bool(b) => {
                assert_eq!(b.must.len(), 1);
                assert_eq!(b.must_not.len(), 1);
                assert_eq!(b.boost, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            Query::phrase("body", vec!["quick", "fox"], 1).description(),
            "body:\"quick fox\"~1"
        );
    }

    #[test]
    fn test_from_json() {
        let query = Query::from_json(
            r#"{"bool": {"must": [{"term": {"field": "body", "term": "fox"}}],
                         "filter": [{"range": {"field": "year", "lower": {"inclusive": {"integer": 2000}}}}]}}"#,
        )
        .unwrap();
        let Query::Bool(b) = query else {
            panic!("expected bool");
        };
        assert_eq!(b.must[0], Query::term("body", "fox"));
        assert_eq!(
            b.filter[0],
            Query::range("year", RangeBound::Inclusive(RangeValue::Integer(2000)), RangeBound::Unbounded)
        );

        let fuzzy = Query::from_json(r#"{"fuzzy": {"field": "body", "term": "quikc"}}"#).unwrap();
        assert_eq!(fuzzy, Query::fuzzy("body", "quikc", 2));
    }
}
