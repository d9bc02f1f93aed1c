//! Query execution over one snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::analyzer::per_field::PerFieldAnalyzer;
use crate::document::{Document, ID_FIELD};
use crate::error::{Result, XiphosError};
use crate::lexical::core::doc_values::{NumericDocValues, SortedSetDocValues};
use crate::lexical::index::searcher_manager::{IndexSnapshot, SegmentSnapshot};
use crate::lexical::query::Query;
use crate::lexical::query::rewrite::{Rewriter, Rewritten};
use crate::lexical::search::collector::{
    Collector, CountCollector, DocIdSet, DocIdSetCollector, SegmentDocIdSet, TopDocsCollector,
};
use crate::lexical::search::scorer::NO_MORE_DOCS;
use crate::lexical::search::scoring::bm25::{Bm25Params, Bm25Similarity};
use crate::lexical::search::weight::Weight;

/// Candidates scanned between two checks of the time budget.
const BUDGET_CHECK_INTERVAL: u64 = 1024;

/// Parameters of a top-hits search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    /// Hits to return.
    pub limit: usize,
    /// Matches scoring below this are neither returned nor counted.
    pub min_score: Option<f32>,
    /// Wall-clock budget after which scanning stops and partial results are returned.
    pub budget: Option<Duration>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            limit: 10,
            min_score: None,
            budget: None,
        }
    }
}

impl SearchRequest {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// A top-level document that matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Name of the segment holding the document.
    pub segment: String,
    pub doc: u32,
    /// External document id.
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopDocs {
    /// Matches counted, which may exceed `hits.len()`.
    pub total_hits: u64,
    pub max_score: Option<f32>,
    pub hits: Vec<Hit>,
    /// The time budget ran out before every candidate was scanned.
    pub terminated_early: bool,
}

/// Searches one immutable snapshot. Cheap to create; every search through the same
/// searcher sees the same documents regardless of concurrent writes.
#[derive(Debug, Clone)]
pub struct Searcher {
    snapshot: Arc<IndexSnapshot>,
    analyzer: Arc<PerFieldAnalyzer>,
    similarity: Bm25Similarity,
}

impl Searcher {
    pub fn new(snapshot: Arc<IndexSnapshot>, analyzer: Arc<PerFieldAnalyzer>, params: Bm25Params) -> Self {
        Searcher {
            snapshot,
            analyzer,
            similarity: Bm25Similarity::new(params),
        }
    }

    pub fn snapshot(&self) -> &Arc<IndexSnapshot> {
        &self.snapshot
    }

    /// Live top-level documents.
    pub fn num_docs(&self) -> u64 {
        self.snapshot.num_docs()
    }

    pub fn rewrite(&self, query: &Query) -> Result<Rewritten> {
        Rewriter::new(&self.snapshot, &self.analyzer).rewrite(query)
    }

    fn weight(&self, query: &Query) -> Result<Weight> {
        let rewritten = self.rewrite(query)?;
        debug!("{} rewritten to {rewritten:?}", query.description());
        Weight::new(&rewritten, &self.snapshot, &self.similarity)
    }

    pub fn search(&self, query: &Query, request: &SearchRequest) -> Result<TopDocs> {
        let weight = self.weight(query)?;
        let min_score = request.min_score.unwrap_or(f32::MIN);
        let (collectors, terminated_early) = self.execute(&weight, request.budget, || {
            TopDocsCollector::with_min_score(request.limit, min_score)
        })?;

        let mut top = TopDocsCollector::with_min_score(request.limit, min_score);
        for collector in collectors {
            top.merge(collector);
        }
        let total_hits = top.total_hits();
        let mut hits = Vec::new();
        for scored in top.into_sorted() {
            let segment = &self.snapshot.segments[scored.segment];
            let stored = segment.reader.document(scored.doc)?;
            hits.push(Hit {
                segment: segment.name().to_string(),
                doc: scored.doc,
                id: stored.document.id().to_string(),
                score: scored.score,
            });
        }
        Ok(TopDocs {
            total_hits,
            max_score: hits.first().map(|h| h.score),
            hits,
            terminated_early,
        })
    }

    /// Number of live top-level documents matching `query`.
    pub fn count(&self, query: &Query) -> Result<u64> {
        let weight = self.weight(query)?;
        let (collectors, _) = self.execute(&weight, None, CountCollector::default)?;
        Ok(collectors.iter().map(|c| c.total_hits()).sum())
    }

    /// Matching live top-level doc ids of every segment, in snapshot order.
    pub fn doc_id_sets(&self, query: &Query) -> Result<Vec<SegmentDocIdSet>> {
        let weight = self.weight(query)?;
        let num_segments = self.snapshot.segments.len();
        let (collectors, _) = self.execute(&weight, None, || DocIdSetCollector::new(num_segments))?;
        Ok(collectors
            .into_iter()
            .zip(&self.snapshot.segments)
            .enumerate()
            .map(|(ord, (collector, segment))| SegmentDocIdSet {
                segment: segment.name().to_string(),
                docs: collector.into_sets().into_iter().nth(ord).unwrap_or_default(),
            })
            .collect())
    }

    /// Runs `weight` over every segment in parallel, one collector per segment.
    fn execute<C, F>(&self, weight: &Weight, budget: Option<Duration>, make: F) -> Result<(Vec<C>, bool)>
    where
        C: Collector,
        F: Fn() -> C + Sync,
    {
        let deadline = budget.map(|b| Instant::now() + b);
        let expired = AtomicBool::new(false);
        let collectors = self
            .snapshot
            .segments
            .par_iter()
            .enumerate()
            .map(|(ord, segment)| {
                let mut collector = make();
                collect_segment(weight, ord, segment, &mut collector, deadline, &expired)?;
                Ok(collector)
            })
            .collect::<Result<Vec<C>>>()?;
        Ok((collectors, expired.load(Ordering::Relaxed)))
    }

    pub fn document(&self, hit: &Hit) -> Result<Document> {
        let segment = self.segment(&hit.segment)?;
        Ok(segment.reader.document(hit.doc)?.document)
    }

    /// The live document with external id `id`.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        for segment in &self.snapshot.segments {
            let Some(mut postings) = segment.reader.postings(ID_FIELD, id)? else {
                continue;
            };
            loop {
                let doc = postings.next()?;
                if doc == NO_MORE_DOCS {
                    break;
                }
                if segment.is_live(doc) && segment.reader.is_root(doc) {
                    return Ok(Some(segment.reader.document(doc)?.document));
                }
            }
        }
        Ok(None)
    }

    pub fn numeric_doc_values(&self, segment: &str, field: &str) -> Result<Option<&NumericDocValues>> {
        Ok(self.segment(segment)?.reader.numeric_doc_values(field))
    }

    pub fn sorted_set_doc_values(&self, segment: &str, field: &str) -> Result<Option<&SortedSetDocValues>> {
        Ok(self.segment(segment)?.reader.sorted_set_doc_values(field))
    }

    /// Live documents of `segment` with a point of `field` inside `[min, max]`.
    pub fn point_range(&self, segment: &str, field: &str, min: &[u8], max: &[u8]) -> Result<DocIdSet> {
        let segment = self.segment(segment)?;
        let Some(points) = segment.reader.points(field) else {
            return Ok(DocIdSet::default());
        };
        let mut docs = Vec::new();
        points.range_query(min, max, &mut |doc| {
            if segment.is_live(doc) {
                docs.push(doc);
            }
        })?;
        Ok(DocIdSet::from(docs))
    }

    fn segment(&self, name: &str) -> Result<&SegmentSnapshot> {
        self.snapshot
            .segment(name)
            .ok_or_else(|| XiphosError::invalid_operation(format!("segment {name} is not in this snapshot")))
    }
}

fn collect_segment(
    weight: &Weight,
    ord: usize,
    segment: &SegmentSnapshot,
    collector: &mut dyn Collector,
    deadline: Option<Instant>,
    expired: &AtomicBool,
) -> Result<()> {
    let Some(mut scorer) = weight.scorer(segment)? else {
        return Ok(());
    };
    let mut candidates = 0u64;
    loop {
        let doc = scorer.next()?;
        if doc == NO_MORE_DOCS {
            return Ok(());
        }
        candidates += 1;
        if candidates % BUDGET_CHECK_INTERVAL == 0 {
            if expired.load(Ordering::Relaxed) {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("search budget exhausted in segment {}", segment.name());
                expired.store(true, Ordering::Relaxed);
                return Ok(());
            }
        }
        if !segment.is_live(doc) || !segment.reader.is_root(doc) {
            continue;
        }
        let score = if collector.needs_scores() {
            scorer.score()?
        } else {
            0.0
        };
        collector.collect(ord, doc, score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::lexical::index::config::IndexConfig;
    use crate::lexical::index::searcher_manager::SearcherManager;
    use crate::lexical::index::writer::IndexWriter;
    use crate::lexical::query::{MultiMatchType, NestedScoreMode, RangeBound, RangeValue};
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    fn searcher(docs: Vec<Document>) -> Searcher {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let config = IndexConfig::default().with_auto_merge(false);
        let manager = Arc::new(SearcherManager::new());
        let writer = IndexWriter::open(storage, config.clone(), Arc::clone(&manager)).unwrap();
        for doc in docs {
            writer.index(doc).unwrap();
        }
        writer.refresh().unwrap();
        Searcher::new(manager.acquire(), Arc::clone(&config.analyzer), config.similarity)
    }

    fn fox_searcher() -> Searcher {
        searcher(vec![
            Document::builder("1").add_text("body", "the quick brown fox").build(),
            Document::builder("2").add_text("body", "the lazy dog").build(),
            Document::builder("3").add_text("body", "quick fox jumps").build(),
        ])
    }

    fn ids(searcher: &Searcher, query: &Query) -> Vec<String> {
        let mut ids: Vec<String> = searcher
            .search(query, &SearchRequest::default())
            .unwrap()
            .hits
            .into_iter()
            .map(|h| h.id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_term_bool_and_phrase() {
        let s = fox_searcher();
        assert_eq!(ids(&s, &Query::term("body", "quick")), vec!["1", "3"]);
        let bool_query = Query::bool()
            .must(Query::term("body", "quick"))
            .must_not(Query::term("body", "lazy"))
            .build();
        assert_eq!(ids(&s, &bool_query), vec!["1", "3"]);
        assert_eq!(ids(&s, &Query::phrase("body", vec!["quick", "fox"], 0)), vec!["3"]);
        assert_eq!(
            ids(&s, &Query::phrase("body", vec!["quick", "fox"], 1)),
            vec!["1", "3"]
        );
        assert_eq!(s.count(&Query::match_all()).unwrap(), 3);
    }

    #[test]
    fn test_scores_are_ordered() {
        let s = fox_searcher();
        let top = s
            .search(&Query::match_text("body", "quick fox"), &SearchRequest::default())
            .unwrap();
        assert_eq!(top.total_hits, 2);
        // the shorter document scores higher for the same terms
        assert_eq!(top.hits[0].id, "3");
        assert!(top.hits[0].score > top.hits[1].score);
        assert_eq!(top.max_score, Some(top.hits[0].score));

        let limited = s
            .search(&Query::match_all(), &SearchRequest::default().with_limit(1))
            .unwrap();
        assert_eq!(limited.total_hits, 3);
        assert_eq!(limited.hits.len(), 1);
    }

    #[test]
    fn test_only_exclusions_match_everything_else() {
        let s = fox_searcher();
        let query = Query::bool().must_not(Query::term("body", "quick")).build();
        assert_eq!(ids(&s, &query), vec!["2"]);
    }

    #[test]
    fn test_range_and_doc_values() {
        let s = searcher(
            (1..=5)
                .map(|i| {
                    Document::builder(i.to_string())
                        .add_integer("year", 2000 + i)
                        .build()
                })
                .collect(),
        );
        let query = Query::range(
            "year",
            RangeBound::Exclusive(RangeValue::Integer(2001)),
            RangeBound::Inclusive(RangeValue::Integer(2004)),
        );
        assert_eq!(ids(&s, &query), vec!["2", "3", "4"]);

        let segment = s.snapshot().segments[0].name().to_string();
        let values = s.numeric_doc_values(&segment, "year").unwrap().unwrap();
        let hit = &s.search(&Query::term("_id", "5"), &SearchRequest::default()).unwrap().hits[0];
        assert_eq!(values.first(hit.doc), Some(2005));
        assert!(s.numeric_doc_values("_missing", "year").is_err());
    }

    #[test]
    fn test_nested_maps_children_to_parents() {
        let s = searcher(vec![
            Document::builder("post-1")
                .add_text("title", "rust")
                .add_nested("comments", Document::builder("c1").add_keyword("author", "ann").build())
                .add_nested("comments", Document::builder("c2").add_keyword("author", "bob").build())
                .build(),
            Document::builder("post-2")
                .add_text("title", "go")
                .add_nested("comments", Document::builder("c3").add_keyword("author", "bob").build())
                .build(),
        ]);
        let query = Query::nested(
            "comments",
            Query::term("comments.author", "ann"),
            NestedScoreMode::Avg,
        );
        assert_eq!(ids(&s, &query), vec!["post-1"]);
        let bob = Query::nested("comments", Query::term("comments.author", "bob"), NestedScoreMode::Sum);
        assert_eq!(ids(&s, &bob), vec!["post-1", "post-2"]);
        // children never surface on their own
        assert_eq!(s.count(&Query::term("comments.author", "bob")).unwrap(), 0);
    }

    #[test]
    fn test_multi_match_and_get() {
        let s = searcher(vec![
            Document::builder("1")
                .add_text("title", "fox")
                .add_text("body", "a dog")
                .build(),
            Document::builder("2")
                .add_text("title", "cat")
                .add_text("body", "fox and fox")
                .build(),
        ]);
        for match_type in [
            MultiMatchType::BestFields { tie_breaker: 0.0 },
            MultiMatchType::MostFields,
            MultiMatchType::CrossFields { tie_breaker: 0.0 },
        ] {
            let query = Query::multi_match(vec!["title", "body"], "fox", match_type);
            assert_eq!(ids(&s, &query), vec!["1", "2"], "{match_type:?}");
        }
        let doc = s.get("2").unwrap().unwrap();
        assert_eq!(doc.id(), "2");
        assert!(s.get("9").unwrap().is_none());
    }

    #[test]
    fn test_doc_id_sets_and_point_range() {
        let s = searcher(vec![
            Document::builder("a").add_float("price", 1.5).build(),
            Document::builder("b").add_float("price", 7.0).build(),
        ]);
        let sets = s.doc_id_sets(&Query::match_all()).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].docs.len(), 2);

        let segment = sets[0].segment.clone();
        let min = crate::util::sortable::encode_f64(5.0);
        let max = crate::util::sortable::encode_f64(10.0);
        let range = s.point_range(&segment, "price", &min, &max).unwrap();
        assert_eq!(range.len(), 1);
    }
}
