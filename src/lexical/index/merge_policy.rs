//! Merge policies for segment management.
//!
//! A policy looks at the committed segments that are not already being merged and
//! proposes groups of them to merge. Proposals never overlap.

use std::collections::BTreeMap;

use crate::lexical::index::config::TieredMergePolicyConfig;

/// What a policy knows about one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSegmentInfo {
    pub name: String,
    pub doc_count: u32,
    pub live_docs: u32,
}

impl MergeSegmentInfo {
    pub fn live_ratio(&self) -> f64 {
        if self.doc_count == 0 {
            1.0
        } else {
            self.live_docs as f64 / self.doc_count as f64
        }
    }

    pub fn deleted_docs(&self) -> u32 {
        self.doc_count - self.live_docs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Too many similarly sized segments in one tier.
    SizeBased,
    /// Segments with many deleted documents.
    DeletionBased,
    /// Requested through `force_merge`.
    Forced,
}

/// A proposed merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCandidate {
    pub segments: Vec<String>,
    pub priority: f64,
    /// Live docs the output will hold.
    pub estimated_docs: u64,
    pub strategy: MergeStrategy,
}

/// Trait for defining merge policies.
pub trait MergePolicy: Send + Sync + std::fmt::Debug {
    /// Proposes non-overlapping merges, highest priority first.
    fn select_merges(&self, segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate>;

    /// Merges that bring the index down to at most `max_segments` segments and drop
    /// every deleted document.
    fn select_forced_merges(
        &self,
        segments: &[MergeSegmentInfo],
        max_segments: usize,
    ) -> Vec<MergeCandidate>;
}

/// Tiered merge policy.
///
/// Segments are grouped into size tiers whose bounds grow by `size_ratio`, starting at
/// `floor_segment_docs`. A tier holding more than `segments_per_tier` segments has its
/// smallest members merged. Independently, segments whose live ratio fell below
/// `1 - deletes_pct_allowed` are merged first to reclaim deleted documents.
#[derive(Debug, Clone, Default)]
pub struct TieredMergePolicy {
    config: TieredMergePolicyConfig,
}

impl TieredMergePolicy {
    pub fn new(config: TieredMergePolicyConfig) -> Self {
        TieredMergePolicy { config }
    }

    pub fn config(&self) -> &TieredMergePolicyConfig {
        &self.config
    }

    fn size(&self, segment: &MergeSegmentInfo) -> u64 {
        (segment.live_docs as u64).max(self.config.floor_segment_docs.max(1))
    }

    fn tier(&self, segment: &MergeSegmentInfo) -> u32 {
        let floor = self.config.floor_segment_docs.max(1) as f64;
        let ratio = self.config.size_ratio.max(1.01);
        ((self.size(segment) as f64 / floor).ln() / ratio.ln()).floor() as u32
    }

    fn deletion_candidates(&self, segments: &[&MergeSegmentInfo]) -> Option<MergeCandidate> {
        let threshold = 1.0 - self.config.deletes_pct_allowed;
        let mut sparse: Vec<_> = segments
            .iter()
            .filter(|s| s.live_ratio() < threshold)
            .collect();
        if sparse.is_empty() {
            return None;
        }
        sparse.sort_by(|a, b| a.live_ratio().total_cmp(&b.live_ratio()));

        let mut chosen = Vec::new();
        let mut docs = 0u64;
        for segment in sparse {
            if chosen.len() >= self.config.max_merge_at_once {
                break;
            }
            let total = docs + segment.live_docs as u64;
            if !chosen.is_empty() && total > self.config.max_merged_segment_docs {
                continue;
            }
            docs += segment.live_docs as u64;
            chosen.push(*segment);
        }
        let avg_deleted =
            chosen.iter().map(|s| 1.0 - s.live_ratio()).sum::<f64>() / chosen.len() as f64;
        Some(MergeCandidate {
            segments: chosen.iter().map(|s| s.name.clone()).collect(),
            priority: 5.0 + avg_deleted * 10.0,
            estimated_docs: docs,
            strategy: MergeStrategy::DeletionBased,
        })
    }

    fn tier_candidate(&self, tier: &[&MergeSegmentInfo]) -> Option<MergeCandidate> {
        if tier.len() <= self.config.segments_per_tier {
            return None;
        }
        let mut chosen = Vec::new();
        let mut docs = 0u64;
        for segment in tier {
            if chosen.len() >= self.config.max_merge_at_once {
                break;
            }
            if docs + segment.live_docs as u64 > self.config.max_merged_segment_docs {
                break;
            }
            docs += segment.live_docs as u64;
            chosen.push(segment.name.clone());
        }
        if chosen.len() < 2 {
            return None;
        }
        Some(MergeCandidate {
            segments: chosen,
            priority: 10.0 + (tier.len() - self.config.segments_per_tier) as f64,
            estimated_docs: docs,
            strategy: MergeStrategy::SizeBased,
        })
    }
}

impl MergePolicy for TieredMergePolicy {
    fn select_merges(&self, segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();
        let mut taken: Vec<&str> = Vec::new();

        let all: Vec<_> = segments.iter().collect();
        if let Some(candidate) = self.deletion_candidates(&all) {
            taken.extend(
                segments
                    .iter()
                    .filter(|s| candidate.segments.contains(&s.name))
                    .map(|s| s.name.as_str()),
            );
            candidates.push(candidate);
        }

        let mut tiers: BTreeMap<u32, Vec<&MergeSegmentInfo>> = BTreeMap::new();
        for segment in segments {
            if !taken.contains(&segment.name.as_str()) {
                tiers.entry(self.tier(segment)).or_default().push(segment);
            }
        }
        for tier in tiers.values_mut() {
            tier.sort_by_key(|s| (s.live_docs, s.name.clone()));
            if let Some(candidate) = self.tier_candidate(tier) {
                candidates.push(candidate);
            }
        }

        candidates.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        candidates
    }

    fn select_forced_merges(
        &self,
        segments: &[MergeSegmentInfo],
        max_segments: usize,
    ) -> Vec<MergeCandidate> {
        let max_segments = max_segments.max(1);
        let mut sorted: Vec<_> = segments.iter().collect();
        sorted.sort_by_key(|s| (s.live_docs, s.name.clone()));

        let mut candidates = Vec::new();
        let mut merged: Vec<&str> = Vec::new();
        if sorted.len() > max_segments {
            let group: Vec<_> = sorted[..sorted.len() - max_segments + 1].to_vec();
            merged.extend(group.iter().map(|s| s.name.as_str()));
            candidates.push(MergeCandidate {
                segments: group.iter().map(|s| s.name.clone()).collect(),
                priority: 100.0,
                estimated_docs: group.iter().map(|s| s.live_docs as u64).sum(),
                strategy: MergeStrategy::Forced,
            });
        }
        // remaining segments with deletions are rewritten alone
        for segment in sorted {
            if segment.deleted_docs() > 0 && !merged.contains(&segment.name.as_str()) {
                candidates.push(MergeCandidate {
                    segments: vec![segment.name.clone()],
                    priority: 50.0,
                    estimated_docs: segment.live_docs as u64,
                    strategy: MergeStrategy::Forced,
                });
            }
        }
        candidates
    }
}

/// No-merge policy for testing or read-only scenarios.
#[derive(Debug, Clone, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn select_merges(&self, _segments: &[MergeSegmentInfo]) -> Vec<MergeCandidate> {
        Vec::new()
    }

    fn select_forced_merges(
        &self,
        segments: &[MergeSegmentInfo],
        max_segments: usize,
    ) -> Vec<MergeCandidate> {
        TieredMergePolicy::default().select_forced_merges(segments, max_segments)
    }
}
