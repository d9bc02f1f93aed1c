//! Criterion benchmarks for xiphos.
//!
//! Covers text analysis, indexing with refreshes, and term, boolean and phrase
//! search over a few thousand generated documents.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use xiphos::analysis::analyzer::Analyzer;
use xiphos::analysis::analyzer::standard::StandardAnalyzer;
use xiphos::document::Document;
use xiphos::lexical::engine::LexicalEngine;
use xiphos::lexical::index::config::IndexConfig;
use xiphos::lexical::query::Query;
use xiphos::lexical::search::searcher::SearchRequest;
use xiphos::storage::memory::MemoryStorage;

const WORDS: [&str; 24] = [
    "search", "engine", "index", "query", "document", "field", "term", "phrase", "boolean",
    "segment", "merge", "posting", "skip", "score", "analysis", "token", "filter", "storage",
    "memory", "commit", "refresh", "snapshot", "reader", "writer",
];

fn generate_documents(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let len = 20 + i % 60;
            (0..len)
                .map(|j| WORDS[(i * 7 + j * 13 + j * j) % WORDS.len()])
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn open_engine() -> LexicalEngine {
    LexicalEngine::open(
        Arc::new(MemoryStorage::new_default()),
        IndexConfig::default().with_auto_merge(false),
    )
    .unwrap()
}

fn populated_engine(texts: &[String]) -> LexicalEngine {
    let engine = open_engine();
    for (i, text) in texts.iter().enumerate() {
        engine
            .index(Document::builder(i.to_string()).add_text("body", text.as_str()).build())
            .unwrap();
        if i % 1000 == 999 {
            engine.refresh().unwrap();
        }
    }
    engine.refresh().unwrap();
    engine
}

fn bench_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("analysis");
    let analyzer = StandardAnalyzer::new();
    let texts = generate_documents(100);

    group.throughput(Throughput::Elements(texts.len() as u64));
    group.bench_function("standard_analyzer", |b| {
        b.iter(|| {
            for text in &texts {
                let tokens = analyzer.analyze(black_box(text)).unwrap().count();
                black_box(tokens);
            }
        })
    });
    group.finish();
}

fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("indexing");
    group.sample_size(10);
    let texts = generate_documents(1000);

    group.throughput(Throughput::Elements(texts.len() as u64));
    group.bench_function("index_and_refresh_1000", |b| {
        b.iter_with_setup(open_engine, |engine| {
            for (i, text) in texts.iter().enumerate() {
                engine
                    .index(Document::builder(i.to_string()).add_text("body", text.as_str()).build())
                    .unwrap();
            }
            engine.refresh().unwrap();
            black_box(engine);
        })
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let engine = populated_engine(&generate_documents(5000));
    let request = SearchRequest::default();

    let queries = [
        ("term", Query::term("body", "segment")),
        (
            "bool_and",
            Query::bool()
                .must(Query::term("body", "merge"))
                .must(Query::term("body", "posting"))
                .build(),
        ),
        (
            "bool_or",
            Query::bool()
                .should(Query::term("body", "skip"))
                .should(Query::term("body", "token"))
                .should(Query::term("body", "reader"))
                .build(),
        ),
        ("phrase", Query::phrase("body", vec!["index", "query"], 0)),
        ("sloppy_phrase", Query::phrase("body", vec!["index", "query"], 2)),
        ("prefix", Query::prefix("body", "s")),
    ];
    for (name, query) in &queries {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(engine.search(black_box(query), &request).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_analysis, bench_indexing, bench_search);
criterion_main!(benches);
