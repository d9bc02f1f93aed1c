//! High-level lexical engine combining the index writer and searching.
//!
//! A [`LexicalEngine`] owns one [`IndexWriter`] and the [`SearcherManager`] its
//! refreshes publish to. Every search acquires the current snapshot, so writes
//! become visible only after [`LexicalEngine::refresh`].

use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::document::Document;
use crate::error::Result;
use crate::lexical::index::config::IndexConfig;
use crate::lexical::index::searcher_manager::SearcherManager;
use crate::lexical::index::writer::{
    DeleteResponse, IndexResponse, IndexWriter, SegmentStatus, WriterStats,
};
use crate::lexical::query::Query;
use crate::lexical::search::searcher::{SearchRequest, Searcher, TopDocs};
use crate::storage::file::FileStorage;
use crate::storage::{Storage, StorageConfig, StorageFactory};

/// Combined writer and snapshot statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub writer: WriterStats,
    /// Live top-level documents in the current snapshot.
    pub num_docs: u64,
    pub snapshot_generation: u64,
}

/// A lexical search engine over a single index.
pub struct LexicalEngine {
    storage: Arc<dyn Storage>,
    writer: IndexWriter,
    searcher_manager: Arc<SearcherManager>,
}

impl std::fmt::Debug for LexicalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalEngine")
            .field("storage", &self.storage)
            .field("writer", &self.writer)
            .field("generation", &self.searcher_manager.generation())
            .finish()
    }
}

impl LexicalEngine {
    /// Open (or create) the index held in `storage`, recovering from its last
    /// commit point and write-ahead log.
    pub fn open(storage: Arc<dyn Storage>, config: IndexConfig) -> Result<Self> {
        let searcher_manager = Arc::new(SearcherManager::new());
        let writer = IndexWriter::open(
            Arc::clone(&storage),
            config,
            Arc::clone(&searcher_manager),
        )?;
        Ok(LexicalEngine {
            storage,
            writer,
            searcher_manager,
        })
    }

    /// Open (or create) an index in the given directory.
    pub fn open_dir<P: AsRef<Path>>(dir: P, config: IndexConfig) -> Result<Self> {
        let storage = FileStorage::open(dir.as_ref())?;
        info!("opening index in {}", dir.as_ref().display());
        Self::open(Arc::new(storage), config)
    }

    /// Open (or create) an index on storage built from `storage_config`.
    pub fn open_with(storage_config: StorageConfig, config: IndexConfig) -> Result<Self> {
        Self::open(StorageFactory::create(storage_config)?, config)
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn config(&self) -> &IndexConfig {
        self.writer.config()
    }

    pub fn writer(&self) -> &IndexWriter {
        &self.writer
    }

    /// Index (or replace) a document.
    pub fn index(&self, document: Document) -> Result<IndexResponse> {
        self.writer.index(document)
    }

    /// Index several documents. Each one succeeds or fails on its own.
    pub fn index_batch(&self, documents: Vec<Document>) -> Vec<Result<IndexResponse>> {
        self.writer.index_batch(documents)
    }

    /// Delete the document with the given id.
    pub fn delete(&self, id: &str) -> Result<DeleteResponse> {
        self.writer.delete(id)
    }

    /// Make buffered writes searchable. Returns whether a new snapshot was published.
    pub fn refresh(&self) -> Result<bool> {
        self.writer.refresh()
    }

    /// Refresh, then write a durable commit point. Returns the commit generation.
    pub fn flush(&self) -> Result<u64> {
        self.writer.commit()
    }

    /// Select merges by the merge policy and hand them to the scheduler.
    pub fn maybe_merge(&self) -> usize {
        self.writer.maybe_merge()
    }

    /// Merge down to at most `max_segments` segments, waiting for the result.
    pub fn force_merge(&self, max_segments: usize) -> Result<()> {
        self.writer.force_merge(max_segments)
    }

    /// A searcher over the current snapshot. It keeps that snapshot alive until dropped.
    pub fn searcher(&self) -> Searcher {
        let config = self.writer.config();
        Searcher::new(
            self.searcher_manager.acquire(),
            Arc::clone(&config.analyzer),
            config.similarity,
        )
    }

    /// Run a top-k search against the current snapshot.
    pub fn search(&self, query: &Query, request: &SearchRequest) -> Result<TopDocs> {
        self.searcher().search(query, request)
    }

    /// Count the live documents matching `query`.
    pub fn count(&self, query: &Query) -> Result<u64> {
        self.searcher().count(query)
    }

    /// Fetch a live document by id from the current snapshot.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        self.searcher().get(id)
    }

    pub fn segments(&self) -> Vec<SegmentStatus> {
        self.writer.segments()
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.searcher_manager.acquire();
        EngineStats {
            writer: self.writer.stats(),
            num_docs: snapshot.num_docs(),
            snapshot_generation: snapshot.generation,
        }
    }

    /// Fsync the write-ahead log.
    pub fn sync_translog(&self) -> Result<()> {
        self.writer.sync_translog()
    }

    /// Commit and close the writer. Searchers already handed out stay usable.
    pub fn close(&self) -> Result<()> {
        if self.writer.is_closed() {
            return Ok(());
        }
        self.writer.commit()?;
        self.writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};

    fn engine() -> LexicalEngine {
        LexicalEngine::open(
            Arc::new(MemoryStorage::new_default()),
            IndexConfig::default().with_auto_merge(false),
        )
        .unwrap()
    }

    #[test]
    fn test_refresh_visibility() {
        let engine = engine();
        engine
            .index(Document::builder("1").add_text("body", "quick fox").build())
            .unwrap();
        assert_eq!(engine.count(&Query::term("body", "fox")).unwrap(), 0);
        assert!(engine.refresh().unwrap());
        assert_eq!(engine.count(&Query::term("body", "fox")).unwrap(), 1);
        assert_eq!(engine.get("1").unwrap().unwrap().id(), "1");
        assert!(engine.get("2").unwrap().is_none());
    }

    #[test]
    fn test_searcher_keeps_snapshot() {
        let engine = engine();
        engine
            .index(Document::builder("1").add_text("body", "quick fox").build())
            .unwrap();
        engine.refresh().unwrap();
        let searcher = engine.searcher();

        engine.delete("1").unwrap();
        engine.refresh().unwrap();
        assert_eq!(searcher.count(&Query::term("body", "fox")).unwrap(), 1);
        assert_eq!(engine.count(&Query::term("body", "fox")).unwrap(), 0);
    }

    #[test]
    fn test_stats_and_close() {
        let engine = LexicalEngine::open_with(
            StorageConfig::Memory(MemoryStorageConfig::default()),
            IndexConfig::default(),
        )
        .unwrap();
        engine
            .index(Document::builder("a").add_keyword("tag", "x").build())
            .unwrap();
        let generation = engine.flush().unwrap();
        let stats = engine.stats();
        assert_eq!(stats.num_docs, 1);
        assert_eq!(stats.writer.commit_generation, generation);
        assert_eq!(engine.segments().len(), 1);

        engine.close().unwrap();
        engine.close().unwrap();
        assert!(engine.index(Document::builder("b").build()).is_err());
    }
}
