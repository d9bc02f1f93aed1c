//! End-to-end search scenarios over a small in-memory index.

use std::sync::Arc;
use std::time::Duration;

use xiphos::document::Document;
use xiphos::error::Result;
use xiphos::lexical::engine::LexicalEngine;
use xiphos::lexical::index::config::IndexConfig;
use xiphos::lexical::query::{MultiMatchType, Query};
use xiphos::lexical::search::searcher::SearchRequest;
use xiphos::storage::memory::MemoryStorage;

fn engine_with(docs: &[(&str, &str)]) -> Result<LexicalEngine> {
    let engine = LexicalEngine::open(
        Arc::new(MemoryStorage::new_default()),
        IndexConfig::default().with_auto_merge(false),
    )?;
    for (id, body) in docs {
        engine.index(Document::builder(*id).add_text("body", *body).build())?;
    }
    engine.refresh()?;
    Ok(engine)
}

fn fox_engine() -> Result<LexicalEngine> {
    engine_with(&[
        ("1", "the quick brown fox"),
        ("2", "the lazy dog"),
        ("3", "quick fox jumps"),
    ])
}

fn ids(engine: &LexicalEngine, query: &Query) -> Result<Vec<String>> {
    let top = engine.search(query, &SearchRequest::default().with_limit(100))?;
    let mut ids: Vec<String> = top.hits.into_iter().map(|hit| hit.id).collect();
    ids.sort();
    Ok(ids)
}

#[test]
fn test_term_query() -> Result<()> {
    let engine = fox_engine()?;
    assert_eq!(ids(&engine, &Query::term("body", "quick"))?, vec!["1", "3"]);
    assert!(ids(&engine, &Query::term("body", "cat"))?.is_empty());
    Ok(())
}

#[test]
fn test_bool_must_and_must_not() -> Result<()> {
    let engine = fox_engine()?;
    let query = Query::bool()
        .must(Query::term("body", "quick"))
        .must_not(Query::term("body", "lazy"))
        .build();
    assert_eq!(ids(&engine, &query)?, vec!["1", "3"]);

    let query = Query::bool()
        .must(Query::term("body", "the"))
        .must_not(Query::term("body", "fox"))
        .build();
    assert_eq!(ids(&engine, &query)?, vec!["2"]);
    Ok(())
}

#[test]
fn test_phrase_slop() -> Result<()> {
    let engine = fox_engine()?;
    let exact = Query::phrase("body", vec!["quick", "fox"], 0);
    assert_eq!(ids(&engine, &exact)?, vec!["3"]);

    let sloppy = Query::phrase("body", vec!["quick", "fox"], 1);
    assert_eq!(ids(&engine, &sloppy)?, vec!["1", "3"]);

    // reversed order needs two moves
    let reversed = Query::phrase("body", vec!["fox", "quick"], 1);
    assert!(ids(&engine, &reversed)?.is_empty());
    Ok(())
}

#[test]
fn test_exclusion_only_bool_inside_required_clause() -> Result<()> {
    let engine = fox_engine()?;
    let not_lazy = || Query::bool().must_not(Query::term("body", "lazy")).build();

    let filtered = Query::bool()
        .filter(not_lazy())
        .should(Query::term("body", "jumps"))
        .build();
    assert_eq!(ids(&engine, &filtered)?, vec!["1", "3"]);

    let required = Query::bool()
        .must(not_lazy())
        .should(Query::term("body", "jumps"))
        .build();
    let top = engine.search(&required, &SearchRequest::default())?;
    assert_eq!(top.total_hits, 2);
    // the optional clause still ranks
    assert_eq!(top.hits[0].id, "3");
    Ok(())
}

#[test]
fn test_repeated_phrase_terms_need_distinct_occurrences() -> Result<()> {
    let engine = engine_with(&[
        ("1", "quick fox"),
        ("2", "fox fox"),
        ("3", "fox and fox"),
    ])?;
    assert_eq!(ids(&engine, &Query::phrase("body", vec!["fox", "fox"], 0))?, vec!["2"]);
    assert_eq!(
        ids(&engine, &Query::phrase("body", vec!["fox", "fox"], 1))?,
        vec!["2", "3"]
    );
    assert_eq!(
        ids(&engine, &Query::phrase("body", vec!["fox", "fox", "fox"], 2))?,
        Vec::<String>::new()
    );
    Ok(())
}

#[test]
fn test_match_phrase_is_analyzed() -> Result<()> {
    let engine = fox_engine()?;
    let query = Query::match_phrase("body", "Quick FOX", 0);
    assert_eq!(ids(&engine, &query)?, vec!["3"]);
    Ok(())
}

#[test]
fn test_bm25_prefers_higher_term_frequency() -> Result<()> {
    let engine = engine_with(&[
        ("once", "fox alpha beta gamma"),
        ("twice", "fox fox beta gamma"),
        ("thrice", "fox fox fox gamma"),
        ("none", "alpha beta gamma delta"),
    ])?;
    let top = engine.search(&Query::term("body", "fox"), &SearchRequest::default())?;
    let ranked: Vec<&str> = top.hits.iter().map(|hit| hit.id.as_str()).collect();
    assert_eq!(ranked, vec!["thrice", "twice", "once"]);
    assert!(top.hits.windows(2).all(|w| w[0].score > w[1].score));
    assert_eq!(top.total_hits, 3);
    assert_eq!(top.max_score, Some(top.hits[0].score));
    Ok(())
}

#[test]
fn test_bm25_prefers_shorter_fields() -> Result<()> {
    let engine = engine_with(&[
        ("short", "fox den"),
        ("long", "fox one two three four five six seven eight"),
    ])?;
    let top = engine.search(&Query::term("body", "fox"), &SearchRequest::default())?;
    assert_eq!(top.hits[0].id, "short");
    assert!(top.hits[0].score > top.hits[1].score);
    Ok(())
}

#[test]
fn test_rarer_terms_weigh_more() -> Result<()> {
    let engine = engine_with(&[
        ("a", "common rare"),
        ("b", "common"),
        ("c", "common"),
        ("d", "common"),
    ])?;
    let common = engine.search(&Query::term("body", "common"), &SearchRequest::default())?;
    let rare = engine.search(&Query::term("body", "rare"), &SearchRequest::default())?;
    let common_a = common.hits.iter().find(|hit| hit.id == "a").map(|hit| hit.score);
    assert!(rare.hits[0].score > common_a.unwrap_or(f32::MAX));
    Ok(())
}

#[test]
fn test_limit_and_min_score() -> Result<()> {
    let engine = fox_engine()?;
    let top = engine.search(&Query::term("body", "the"), &SearchRequest::default().with_limit(1))?;
    assert_eq!(top.hits.len(), 1);
    assert_eq!(top.total_hits, 2);

    let top = engine.search(
        &Query::term("body", "the"),
        &SearchRequest::default().with_min_score(f32::MAX),
    )?;
    assert!(top.hits.is_empty());
    assert_eq!(top.total_hits, 0);
    Ok(())
}

#[test]
fn test_multi_term_queries() -> Result<()> {
    let engine = fox_engine()?;
    assert_eq!(ids(&engine, &Query::prefix("body", "qu"))?, vec!["1", "3"]);
    assert_eq!(ids(&engine, &Query::wildcard("body", "d?g"))?, vec!["2"]);
    assert_eq!(ids(&engine, &Query::regexp("body", "j[a-z]+s"))?, vec!["3"]);
    assert_eq!(ids(&engine, &Query::fuzzy("body", "lazu", 1))?, vec!["2"]);
    Ok(())
}

#[test]
fn test_multi_match_best_fields() -> Result<()> {
    let engine = LexicalEngine::open(
        Arc::new(MemoryStorage::new_default()),
        IndexConfig::default().with_auto_merge(false),
    )?;
    engine.index(
        Document::builder("title-hit")
            .add_text("title", "brown fox")
            .add_text("body", "an animal")
            .build(),
    )?;
    engine.index(
        Document::builder("body-hit")
            .add_text("title", "an animal")
            .add_text("body", "the brown fox ran far away from here")
            .build(),
    )?;
    engine.refresh()?;

    let query = Query::multi_match(
        vec!["title", "body"],
        "brown fox",
        MultiMatchType::BestFields { tie_breaker: 0.3 },
    );
    let top = engine.search(&query, &SearchRequest::default())?;
    assert_eq!(top.hits.len(), 2);
    assert_eq!(top.hits[0].id, "title-hit");
    Ok(())
}

#[test]
fn test_malformed_query_is_rejected() -> Result<()> {
    let engine = fox_engine()?;
    assert!(engine.search(&Query::regexp("body", "("), &SearchRequest::default()).is_err());
    assert!(engine.search(&Query::fuzzy("body", "fox", 3), &SearchRequest::default()).is_err());
    Ok(())
}

#[test]
fn test_query_from_json() -> Result<()> {
    let engine = fox_engine()?;
    let query = Query::from_json(&serde_json::to_string(&Query::term("body", "jumps"))?)?;
    assert_eq!(ids(&engine, &query)?, vec!["3"]);
    Ok(())
}

#[test]
fn test_time_budget_returns_partial_results() -> Result<()> {
    let docs: Vec<(String, String)> = (0..3000)
        .map(|i| (format!("doc-{i}"), format!("common word{}", i % 50)))
        .collect();
    let borrowed: Vec<(&str, &str)> = docs.iter().map(|(id, body)| (id.as_str(), body.as_str())).collect();
    let engine = engine_with(&borrowed)?;
    let query = Query::term("body", "common");

    let full = engine.search(&query, &SearchRequest::default())?;
    assert!(!full.terminated_early);
    assert_eq!(full.total_hits, 3000);

    let generous = engine.search(&query, &SearchRequest::default().with_budget(Duration::from_secs(60)))?;
    assert!(!generous.terminated_early);
    assert_eq!(generous.total_hits, 3000);

    let exhausted = engine.search(&query, &SearchRequest::default().with_budget(Duration::ZERO))?;
    assert!(exhausted.terminated_early);
    assert!(exhausted.total_hits < 3000);
    assert_eq!(exhausted.hits.len(), 10);
    Ok(())
}
