//! Segments: immutable bundles of term dictionary, postings, doc values, points and
//! stored fields, plus a live-docs bitset.
//!
//! A segment is produced once by a refresh or a merge through [`writer::SegmentWriter`]
//! and read through [`reader::SegmentReader`]. Its files are named after the segment:
//!
//! | file | contents |
//! |---|---|
//! | `{name}.si` | [`SegmentInfo`] as JSON, written last |
//! | `{name}.fnm` | field types, statistics, norms, root-doc bitset |
//! | `{name}.tim` | per-field FST term dictionaries |
//! | `{name}.doc` / `{name}.pos` | postings and positions |
//! | `{name}.dvd` | doc values |
//! | `{name}.pts` | BKD points |
//! | `{name}.fdt` | compressed stored fields |
//! | `{name}_{gen}.liv` | live docs, one file per generation |

pub mod reader;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, XiphosError};

pub const MAGIC_FIELDS: u32 = 0x5846_4E4D;
pub const MAGIC_TERMS: u32 = 0x5854_494D;
pub const MAGIC_DOCS: u32 = 0x5844_4F43;
pub const MAGIC_POSITIONS: u32 = 0x5850_4F53;
pub const MAGIC_DOC_VALUES: u32 = 0x5844_5644;
pub const MAGIC_POINTS: u32 = 0x5850_5453;
pub const MAGIC_STORED: u32 = 0x5846_4454;
pub const MAGIC_LIVE_DOCS: u32 = 0x584C_4956;

/// Suffix of files that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

pub fn segment_name(id: u64) -> String {
    format!("_{id}")
}

pub fn info_file(segment: &str) -> String {
    format!("{segment}.si")
}

pub fn live_docs_file(segment: &str, generation: u64) -> String {
    format!("{segment}_{generation}.liv")
}

/// Segment that owns `file`, if the name follows the segment naming scheme.
pub fn segment_of_file(file: &str) -> Option<&str> {
    let stem = file.strip_suffix(TEMP_SUFFIX).unwrap_or(file);
    let stem = stem.split('.').next()?;
    if !stem.starts_with('_') {
        return None;
    }
    // `_3_2.liv` belongs to `_3`
    let end = stem[1..].find('_').map_or(stem.len(), |i| i + 1);
    Some(&stem[..end])
}

/// How a segment came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSource {
    Flush,
    Merge,
}

/// Descriptor persisted in `{name}.si`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    pub doc_count: u32,
    pub files: Vec<String>,
    pub source: SegmentSource,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a segment.
///
/// ```text
/// Building -> Flushed -> Committed -> MergingInput -> Superseded -> Deleted
///                                          |
///                                          +-> Committed (merge failed or cancelled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentState {
    /// In the indexing buffer, not searchable.
    Building,
    /// Published to searchers, not yet fsynced.
    Flushed,
    /// Fsynced and listed by a commit point.
    Committed,
    /// Read by a running merge; still valid on its own.
    MergingInput,
    /// Replaced by a committed merge output; deleted once no snapshot uses it.
    Superseded,
    Deleted,
}

impl SegmentState {
    pub fn can_transition_to(self, next: SegmentState) -> bool {
        use SegmentState::*;
        matches!(
            (self, next),
            (Building, Flushed)
                | (Flushed, Committed)
                | (Committed, MergingInput)
                | (MergingInput, Committed)
                | (MergingInput, Superseded)
                | (Superseded, Deleted)
        )
    }

    /// Checked transition.
    pub fn transition(&mut self, next: SegmentState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(XiphosError::invalid_operation(format!(
                "segment cannot move from {self:?} to {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }

    pub fn is_searchable(self) -> bool {
        matches!(
            self,
            SegmentState::Flushed | SegmentState::Committed | SegmentState::MergingInput
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut state = SegmentState::Building;
        assert!(!state.is_searchable());
        state.transition(SegmentState::Flushed).unwrap();
        assert!(state.is_searchable());
        assert!(state.transition(SegmentState::Superseded).is_err());
        state.transition(SegmentState::Committed).unwrap();
        state.transition(SegmentState::MergingInput).unwrap();
        state.transition(SegmentState::Committed).unwrap();
        state.transition(SegmentState::MergingInput).unwrap();
        state.transition(SegmentState::Superseded).unwrap();
        state.transition(SegmentState::Deleted).unwrap();
        assert!(state.transition(SegmentState::Flushed).is_err());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(segment_name(12), "_12");
        assert_eq!(live_docs_file("_12", 3), "_12_3.liv");
        assert_eq!(segment_of_file("_12_3.liv"), Some("_12"));
        assert_eq!(segment_of_file("_12.tim"), Some("_12"));
        assert_eq!(segment_of_file("_12.tim.tmp"), Some("_12"));
        assert_eq!(segment_of_file("segments_4"), None);
        assert_eq!(segment_of_file("translog-1.tlog"), None);
    }
}
