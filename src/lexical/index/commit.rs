//! Commit points.
//!
//! A commit point `segments_{generation}` lists the segments that make up the durable
//! state of the index. It is written under a temporary name, fsynced and renamed into
//! place, and the directory is synced afterwards; the newest generation that parses is
//! the one recovery uses.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, XiphosError};
use crate::lexical::core::field_info::FieldInfos;
use crate::lexical::index::segment::TEMP_SUFFIX;
use crate::lexical::index::wal::SeqNo;
use crate::storage::Storage;

const FILE_PREFIX: &str = "segments_";

pub fn commit_file(generation: u64) -> String {
    format!("{FILE_PREFIX}{generation}")
}

pub fn parse_commit_file(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?.parse().ok()
}

/// A segment as recorded by a commit point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedSegment {
    pub name: String,
    pub doc_count: u32,
    pub del_count: u32,
    /// Live-docs generation to load.
    pub live_gen: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPoint {
    pub generation: u64,
    pub index_uuid: Uuid,
    /// Every operation up to this sequence number is reflected in the segments.
    pub max_seq_no: SeqNo,
    pub field_infos: FieldInfos,
    pub next_segment_id: u64,
    pub segments: Vec<CommittedSegment>,
}

impl CommitPoint {
    /// The empty commit of a new index.
    pub fn initial() -> Self {
        CommitPoint {
            generation: 0,
            index_uuid: Uuid::new_v4(),
            max_seq_no: 0,
            field_infos: FieldInfos::new(),
            next_segment_id: 0,
            segments: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        commit_file(self.generation)
    }

    pub fn segment_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.name.as_str())
    }

    /// Durably writes this commit point.
    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        let name = self.file_name();
        let temp = format!("{name}{TEMP_SUFFIX}");
        let mut output = storage.create_output(&temp)?;
        serde_json::to_writer_pretty(&mut output, self)?;
        output.flush_and_sync()?;
        drop(output);
        storage.rename_file(&temp, &name)?;
        storage.sync()?;
        debug!(
            "wrote commit point {name} ({} segments, max seq_no {})",
            self.segments.len(),
            self.max_seq_no
        );
        Ok(())
    }

    pub fn read(storage: &dyn Storage, generation: u64) -> Result<Self> {
        let name = commit_file(generation);
        let data = storage.read_all(&name)?;
        let commit: CommitPoint = serde_json::from_slice(&data)
            .map_err(|e| XiphosError::corruption(format!("{name}: {e}")))?;
        if commit.generation != generation {
            return Err(XiphosError::corruption(format!(
                "{name} records generation {}",
                commit.generation
            )));
        }
        Ok(commit)
    }

    /// Loads the newest readable commit point, or `None` for an empty directory.
    /// Newer commit files that fail to parse are skipped with a warning.
    pub fn read_latest(storage: &dyn Storage) -> Result<Option<Self>> {
        let mut generations: Vec<u64> = storage
            .list_files()?
            .iter()
            .filter_map(|name| parse_commit_file(name))
            .collect();
        generations.sort_unstable_by(|a, b| b.cmp(a));

        let mut last_error = None;
        for generation in generations {
            match Self::read(storage, generation) {
                Ok(commit) => return Ok(Some(commit)),
                Err(e) => {
                    warn!("skipping unreadable commit point {}: {e}", commit_file(generation));
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldType;
    use crate::storage::memory::MemoryStorage;
    use std::io::Write;

    #[test]
    fn test_write_and_read_latest() {
        let storage = MemoryStorage::new_default();
        assert!(CommitPoint::read_latest(&storage).unwrap().is_none());

        let mut commit = CommitPoint::initial();
        commit.field_infos.register("body", FieldType::Text).unwrap();
        commit.generation = 1;
        commit.write(&storage).unwrap();

        commit.generation = 2;
        commit.max_seq_no = 9;
        commit.segments.push(CommittedSegment {
            name: "_0".into(),
            doc_count: 3,
            del_count: 1,
            live_gen: 1,
        });
        commit.write(&storage).unwrap();

        let latest = CommitPoint::read_latest(&storage).unwrap().unwrap();
        assert_eq!(latest, commit);
        assert_eq!(latest.field_infos.get("body"), Some(FieldType::Text));
        assert!(!storage.file_exists("segments_2.tmp"));
    }

    #[test]
    fn test_damaged_newest_commit_falls_back() {
        let storage = MemoryStorage::new_default();
        let mut commit = CommitPoint::initial();
        commit.generation = 1;
        commit.write(&storage).unwrap();

        let mut output = storage.create_output(&commit_file(2)).unwrap();
        output.write_all(b"{\"generation\": 2, \"index_").unwrap();
        drop(output);

        let latest = CommitPoint::read_latest(&storage).unwrap().unwrap();
        assert_eq!(latest.generation, 1);
        assert_eq!(parse_commit_file("segments_12"), Some(12));
        assert_eq!(parse_commit_file("segments.tmp"), None);
    }
}
