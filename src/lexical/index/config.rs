//! Configuration for a lexical index.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::analyzer::Analyzer;
use crate::analysis::analyzer::per_field::PerFieldAnalyzer;
use crate::error::Result;
use crate::lexical::search::scoring::bm25::Bm25Params;

/// When the write-ahead log fsyncs appended operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Durability {
    /// Every operation is fsynced before the indexing call returns.
    #[default]
    Request,
    /// Operations are fsynced by a background thread every `sync_interval_ms`.
    /// A crash may lose the operations of the last interval.
    Async { sync_interval_ms: u64 },
}

/// Settings of the tiered merge policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredMergePolicyConfig {
    /// Segments allowed per size tier before the tier is merged.
    pub segments_per_tier: usize,

    /// Upper bound on the inputs of a single merge.
    pub max_merge_at_once: usize,

    /// Merges whose output would exceed this many live docs are not selected.
    pub max_merged_segment_docs: u64,

    /// Segments smaller than this are treated as this size when tiering.
    pub floor_segment_docs: u64,

    /// Segments whose deleted fraction exceeds this are merged first.
    pub deletes_pct_allowed: f64,

    /// Size ratio between consecutive tiers.
    pub size_ratio: f64,
}

impl Default for TieredMergePolicyConfig {
    fn default() -> Self {
        TieredMergePolicyConfig {
            segments_per_tier: 10,
            max_merge_at_once: 10,
            max_merged_segment_docs: 5_000_000,
            floor_segment_docs: 1_000,
            deletes_pct_allowed: 0.33,
            size_ratio: 2.0,
        }
    }
}

/// Settings of the background merge worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSchedulerConfig {
    pub max_threads: usize,
    /// Pending merges accepted before new requests are dropped.
    pub queue_capacity: usize,
}

impl Default for MergeSchedulerConfig {
    fn default() -> Self {
        MergeSchedulerConfig {
            max_threads: (num_cpus::get().clamp(1, 4) / 2).max(1),
            queue_capacity: 8,
        }
    }
}

/// Configuration of a [`LexicalEngine`](crate::lexical::engine::LexicalEngine).
///
/// The data-only part is serializable; the analyzer is attached in code.
///
/// # Example
///
/// ```
/// use xiphos::lexical::index::config::{Durability, IndexConfig};
///
/// let config = IndexConfig::from_json(
///     r#"{"ram_buffer_size_mb": 4.0, "durability": {"type": "async", "sync_interval_ms": 500}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.durability, Durability::Async { sync_interval_ms: 500 });
/// assert_eq!(config.max_buffered_docs, 10_000);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// RAM the indexing buffer may use before it is refreshed into a segment.
    pub ram_buffer_size_mb: f64,

    /// Buffered documents that force a refresh regardless of RAM use.
    pub max_buffered_docs: usize,

    pub durability: Durability,

    /// Primary term stamped on every WAL entry.
    pub primary_term: u64,

    pub merge_policy: TieredMergePolicyConfig,

    pub scheduler: MergeSchedulerConfig,

    pub similarity: Bm25Params,

    /// Run merges in the background after refreshes and commits.
    pub auto_merge: bool,

    /// Analyzers used at index and query time.
    #[serde(skip)]
    pub analyzer: Arc<PerFieldAnalyzer>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            ram_buffer_size_mb: 16.0,
            max_buffered_docs: 10_000,
            durability: Durability::Request,
            primary_term: 1,
            merge_policy: TieredMergePolicyConfig::default(),
            scheduler: MergeSchedulerConfig::default(),
            similarity: Bm25Params::default(),
            auto_merge: true,
            analyzer: Arc::new(PerFieldAnalyzer::default()),
        }
    }
}

impl IndexConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Replaces the default analyzer of text fields.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Arc::new(PerFieldAnalyzer::new(analyzer));
        self
    }

    pub fn with_per_field_analyzer(mut self, analyzer: PerFieldAnalyzer) -> Self {
        self.analyzer = Arc::new(analyzer);
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_ram_buffer_size_mb(mut self, mb: f64) -> Self {
        self.ram_buffer_size_mb = mb;
        self
    }

    pub fn with_max_buffered_docs(mut self, docs: usize) -> Self {
        self.max_buffered_docs = docs;
        self
    }

    pub fn with_auto_merge(mut self, auto_merge: bool) -> Self {
        self.auto_merge = auto_merge;
        self
    }

    pub fn with_merge_policy(mut self, policy: TieredMergePolicyConfig) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn with_similarity(mut self, similarity: Bm25Params) -> Self {
        self.similarity = similarity;
        self
    }

    pub(crate) fn ram_buffer_bytes(&self) -> usize {
        (self.ram_buffer_size_mb * 1024.0 * 1024.0) as usize
    }
}

impl std::fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexConfig")
            .field("ram_buffer_size_mb", &self.ram_buffer_size_mb)
            .field("max_buffered_docs", &self.max_buffered_docs)
            .field("durability", &self.durability)
            .field("primary_term", &self.primary_term)
            .field("merge_policy", &self.merge_policy)
            .field("scheduler", &self.scheduler)
            .field("similarity", &self.similarity)
            .field("auto_merge", &self.auto_merge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.ram_buffer_size_mb, 16.0);
        assert_eq!(config.durability, Durability::Request);
        assert_eq!(config.merge_policy.segments_per_tier, 10);
        assert!(config.scheduler.max_threads >= 1);
        assert_eq!(config.similarity.k1, 1.2);
        assert_eq!(config.ram_buffer_bytes(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json() {
        let config =
            IndexConfig::from_json(r#"{"merge_policy": {"segments_per_tier": 3}, "auto_merge": false}"#)
                .unwrap();
        assert_eq!(config.merge_policy.segments_per_tier, 3);
        assert_eq!(config.merge_policy.max_merge_at_once, 10);
        assert!(!config.auto_merge);
        assert!(IndexConfig::from_json("{\"durability\": 5}").is_err());
    }
}
