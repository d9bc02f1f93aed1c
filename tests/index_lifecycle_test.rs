//! Refresh visibility, deletions, snapshot isolation and merging.

use std::collections::BTreeMap;
use std::sync::Arc;

use xiphos::document::Document;
use xiphos::error::Result;
use xiphos::lexical::engine::LexicalEngine;
use xiphos::lexical::index::config::IndexConfig;
use xiphos::lexical::index::writer::WriteResult;
use xiphos::lexical::query::Query;
use xiphos::lexical::search::searcher::SearchRequest;
use xiphos::storage::memory::MemoryStorage;

fn engine() -> Result<LexicalEngine> {
    LexicalEngine::open(
        Arc::new(MemoryStorage::new_default()),
        IndexConfig::default().with_auto_merge(false),
    )
}

fn doc(id: &str, body: &str) -> Document {
    Document::builder(id).add_text("body", body).build()
}

fn scores(engine: &LexicalEngine, query: &Query) -> Result<BTreeMap<String, f32>> {
    let top = engine.search(query, &SearchRequest::default().with_limit(1000))?;
    Ok(top.hits.into_iter().map(|hit| (hit.id, hit.score)).collect())
}

#[test]
fn test_deletes_hidden_after_refresh() -> Result<()> {
    let engine = engine()?;
    engine.index(doc("1", "quick fox"))?;
    engine.index(doc("2", "quick dog"))?;
    engine.refresh()?;

    let response = engine.delete("1")?;
    assert!(response.found);
    assert_eq!(engine.count(&Query::term("body", "quick"))?, 2);

    engine.refresh()?;
    assert_eq!(engine.count(&Query::term("body", "quick"))?, 1);
    assert!(engine.get("1")?.is_none());
    assert!(!engine.delete("1")?.found);
    Ok(())
}

#[test]
fn test_update_replaces_document() -> Result<()> {
    let engine = engine()?;
    assert_eq!(engine.index(doc("1", "old text"))?.result, WriteResult::Created);
    engine.refresh()?;
    assert_eq!(engine.index(doc("1", "new text"))?.result, WriteResult::Updated);
    engine.refresh()?;

    assert_eq!(engine.count(&Query::term("body", "old"))?, 0);
    assert_eq!(engine.count(&Query::term("body", "new"))?, 1);
    assert_eq!(engine.count(&Query::match_all())?, 1);
    Ok(())
}

#[test]
fn test_snapshot_isolation() -> Result<()> {
    let engine = engine()?;
    engine.index(doc("1", "quick fox"))?;
    engine.refresh()?;
    let before = engine.searcher();

    engine.index(doc("2", "quick dog"))?;
    engine.delete("1")?;
    engine.refresh()?;
    engine.force_merge(1)?;

    let query = Query::term("body", "quick");
    assert_eq!(before.count(&query)?, 1);
    assert!(before.get("1")?.is_some());
    assert!(before.get("2")?.is_none());

    let after = engine.searcher();
    assert_eq!(after.count(&query)?, 1);
    assert!(after.get("2")?.is_some());
    assert!(after.snapshot().generation > before.snapshot().generation);
    Ok(())
}

#[test]
fn test_merge_preserves_results() -> Result<()> {
    let engine = engine()?;
    let words = ["quick", "brown", "fox", "lazy", "dog", "jumps", "over", "the"];
    for i in 0..60 {
        let body: Vec<&str> = (0..5).map(|j| words[(i * 3 + j * j + i / 7) % words.len()]).collect();
        engine.index(doc(&format!("doc-{i}"), &body.join(" ")))?;
        if i % 10 == 9 {
            engine.flush()?;
        }
    }
    engine.refresh()?;
    assert!(engine.segments().len() >= 6);

    let queries = [
        Query::term("body", "fox"),
        Query::phrase("body", vec!["lazy", "dog"], 1),
        Query::bool()
            .must(Query::term("body", "quick"))
            .should(Query::term("body", "brown"))
            .must_not(Query::term("body", "over"))
            .build(),
    ];
    let before: Vec<_> = queries.iter().map(|q| scores(&engine, q)).collect::<Result<_>>()?;

    engine.force_merge(1)?;
    assert_eq!(engine.segments().len(), 1);

    for (query, expected) in queries.iter().zip(before) {
        let actual = scores(&engine, query)?;
        assert_eq!(actual.keys().collect::<Vec<_>>(), expected.keys().collect::<Vec<_>>());
        for (id, score) in &expected {
            assert!((actual[id] - score).abs() < 1e-4, "{id}: {} vs {score}", actual[id]);
        }
    }
    Ok(())
}

#[test]
fn test_force_merge_drops_deleted_documents() -> Result<()> {
    let engine = engine()?;
    for i in 0..10 {
        engine.index(doc(&i.to_string(), "fox"))?;
        engine.flush()?;
    }
    for i in 0..5 {
        engine.delete(&i.to_string())?;
    }
    engine.force_merge(1)?;

    let segments = engine.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].doc_count, 5);
    assert_eq!(segments[0].live_docs, 5);
    assert_eq!(engine.count(&Query::term("body", "fox"))?, 5);
    Ok(())
}

#[test]
fn test_deletes_update_scoring_statistics() -> Result<()> {
    let tagged = |id: &str, body: &str, tag: &str| {
        Document::builder(id).add_text("body", body).add_keyword("tag", tag).build()
    };
    let engine = engine()?;
    engine.index(tagged("1", "apple", "red"))?;
    engine.index(tagged("2", "banana", "yellow"))?;
    engine.refresh()?;
    engine.index(tagged("3", "cherry", "red"))?;
    engine.index(tagged("4", "apple banana", "red"))?;
    engine.refresh()?;

    let apple = Query::term("body", "apple");
    let red = Query::term("tag", "red");
    let before = scores(&engine, &apple)?;

    engine.delete("2")?;
    engine.delete("3")?;
    engine.refresh()?;
    let after = scores(&engine, &apple)?;
    assert_ne!(before["1"], after["1"]);

    // the same as an index that never held the deleted documents
    let fresh = self::engine()?;
    fresh.index(tagged("1", "apple", "red"))?;
    fresh.index(tagged("4", "apple banana", "red"))?;
    fresh.refresh()?;
    for query in [&apple, &red] {
        let expected = scores(&fresh, query)?;
        let actual = scores(&engine, query)?;
        assert_eq!(expected.len(), actual.len());
        for (id, score) in &expected {
            assert!((actual[id] - score).abs() < 1e-5, "{id}: {} vs {score}", actual[id]);
        }
    }
    Ok(())
}

#[test]
fn test_batch_failures_are_independent() -> Result<()> {
    let engine = engine()?;
    engine.index(Document::builder("typed").add_integer("year", 2020).build())?;

    let results = engine.index_batch(vec![
        doc("a", "first"),
        Document::builder("").add_text("body", "no id").build(),
        Document::builder("b").add_text("year", "not a number").build(),
        doc("c", "third"),
    ]);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_err());
    assert!(results[3].is_ok());

    // rejected documents consume no sequence numbers
    let first = results[0].as_ref().map(|r| r.seq_no).unwrap_or_default();
    let last = results[3].as_ref().map(|r| r.seq_no).unwrap_or_default();
    assert_eq!(last, first + 1);

    engine.refresh()?;
    assert_eq!(engine.count(&Query::match_all())?, 3);
    assert!(engine.get("b")?.is_none());
    Ok(())
}

#[test]
fn test_concurrent_indexing_and_search() -> Result<()> {
    let engine = Arc::new(engine()?);
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || -> Result<()> {
                for i in 0..50 {
                    engine.index(doc(&format!("{t}-{i}"), "shared term"))?;
                    if i % 10 == 0 {
                        engine.refresh()?;
                    }
                }
                Ok(())
            })
        })
        .collect();
    for _ in 0..20 {
        let searcher = engine.searcher();
        let count = searcher.count(&Query::term("body", "shared"))?;
        assert_eq!(count, searcher.num_docs());
    }
    for writer in writers {
        writer.join().expect("writer thread")?;
    }
    engine.refresh()?;
    assert_eq!(engine.count(&Query::term("body", "shared"))?, 200);
    Ok(())
}
