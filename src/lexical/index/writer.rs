//! The index writer.
//!
//! One writer owns an index directory. Every mutation is logged to the write-ahead
//! log, then applied to the in-memory buffer and to the live docs of existing
//! segments. [`IndexWriter::refresh`] turns the buffer into a searchable segment
//! without fsyncing anything; [`IndexWriter::commit`] additionally makes every
//! segment and deletion durable, writes a commit point and trims the log.
//!
//! Merges run on the [`MergeScheduler`] pool. Their inputs stay searchable until the
//! output is committed; the inputs are then superseded and their files removed once
//! no snapshot holds them anymore.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{Document, ID_FIELD};
use crate::error::{Result, XiphosError};
use crate::lexical::core::field_info::FieldInfos;
use crate::lexical::core::live_docs::LiveDocs;
use crate::lexical::core::posting::NO_MORE_DOCS;
use crate::lexical::index::commit::{CommitPoint, CommittedSegment, parse_commit_file};
use crate::lexical::index::config::IndexConfig;
use crate::lexical::index::merge_engine::{MergeEngine, MergeInput, MergeResult};
use crate::lexical::index::merge_policy::{
    MergeCandidate, MergePolicy, MergeSegmentInfo, TieredMergePolicy,
};
use crate::lexical::index::scheduler::MergeScheduler;
use crate::lexical::index::searcher_manager::{SearcherManager, SegmentSnapshot};
use crate::lexical::index::segment::reader::SegmentReader;
use crate::lexical::index::segment::writer::{segment_files, write_live_docs};
use crate::lexical::index::segment::{
    SegmentSource, SegmentState, TEMP_SUFFIX, live_docs_file, segment_name, segment_of_file,
};
use crate::lexical::index::segment_builder::SegmentBuilder;
use crate::lexical::index::wal::{SeqNo, WalOperation, WriteAheadLog};
use crate::storage::Storage;

/// Outcome of an index operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteResult {
    Created,
    /// A live document with the same id was replaced.
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexResponse {
    pub id: String,
    pub seq_no: SeqNo,
    pub result: WriteResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: String,
    pub seq_no: SeqNo,
    pub found: bool,
}

/// A segment as the writer tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStatus {
    pub name: String,
    pub doc_count: u32,
    pub live_docs: u32,
    pub source: SegmentSource,
    pub state: SegmentState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub segments: usize,
    /// Internal documents in the buffer, nested children included.
    pub buffered_docs: u32,
    pub buffer_ram_bytes: usize,
    /// Highest sequence number applied to the index.
    pub processed_seq_no: SeqNo,
    /// Highest sequence number covered by the last commit point.
    pub committed_seq_no: SeqNo,
    pub commit_generation: u64,
    pub pending_merges: usize,
}

#[derive(Debug, Clone)]
struct SegmentEntry {
    reader: Arc<SegmentReader>,
    live_docs: LiveDocs,
    /// What the current snapshot shows.
    published: SegmentSnapshot,
    lifecycle: SegmentState,
    live_gen: u64,
    /// Deletions not yet in a live-docs file.
    dirty: bool,
    /// Deletions not yet in a snapshot.
    unpublished: bool,
}

impl SegmentEntry {
    fn new(reader: Arc<SegmentReader>, live_docs: LiveDocs, lifecycle: SegmentState, live_gen: u64) -> Self {
        SegmentEntry {
            published: SegmentSnapshot::new(Arc::clone(&reader), Arc::new(live_docs.clone())),
            reader,
            live_docs,
            lifecycle,
            live_gen,
            dirty: false,
            unpublished: false,
        }
    }

    fn name(&self) -> &str {
        self.reader.name()
    }

    fn merge_info(&self) -> MergeSegmentInfo {
        MergeSegmentInfo {
            name: self.name().to_string(),
            doc_count: self.reader.num_docs(),
            live_docs: self.live_docs.num_live(),
        }
    }

    /// Deletes the live document `id` with its nested block. Returns whether it was found.
    fn delete_id(&mut self, id: &str) -> Result<bool> {
        let Some(mut postings) = self.reader.postings(ID_FIELD, id)? else {
            return Ok(false);
        };
        let mut found = false;
        loop {
            let root = postings.next()?;
            if root == NO_MORE_DOCS {
                break;
            }
            if !self.live_docs.is_live(root) {
                continue;
            }
            for doc in self.reader.block_range(root) {
                self.live_docs.delete(doc);
            }
            found = true;
        }
        if found {
            self.dirty = true;
            self.unpublished = true;
        }
        Ok(found)
    }
}

struct WriterState {
    buffer: SegmentBuilder,
    field_infos: FieldInfos,
    segments: Vec<SegmentEntry>,
    index_uuid: Uuid,
    commit_generation: u64,
    next_segment_id: u64,
    processed_seq_no: SeqNo,
    committed_seq_no: SeqNo,
}

struct WriterInner {
    config: IndexConfig,
    storage: Arc<dyn Storage>,
    wal: WriteAheadLog,
    searcher_manager: Arc<SearcherManager>,
    merge_policy: TieredMergePolicy,
    merge_engine: MergeEngine,
    state: Mutex<WriterState>,
    closed: AtomicBool,
}

/// Writer of a lexical index. See the module documentation.
pub struct IndexWriter {
    inner: Arc<WriterInner>,
    scheduler: MergeScheduler,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("stats", &self.stats())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl IndexWriter {
    /// Opens the index in `storage`, creating it if empty.
    ///
    /// Recovery loads the newest readable commit point, opens and verifies its
    /// segments, removes files no commit references, then replays the write-ahead
    /// log from the first operation the commit does not cover. Replayed operations
    /// are searchable once `open` returns.
    pub fn open(
        storage: Arc<dyn Storage>,
        config: IndexConfig,
        searcher_manager: Arc<SearcherManager>,
    ) -> Result<Self> {
        let commit = match CommitPoint::read_latest(storage.as_ref())? {
            Some(commit) => commit,
            None => {
                let commit = CommitPoint::initial();
                commit.write(storage.as_ref())?;
                info!("created index {}", commit.index_uuid);
                commit
            }
        };

        let mut segments = Vec::with_capacity(commit.segments.len());
        for committed in &commit.segments {
            let info = SegmentReader::read_info(storage.as_ref(), &committed.name)?;
            let reader = Arc::new(SegmentReader::open(Arc::clone(&storage), info)?);
            let live_docs = reader.load_live_docs(committed.live_gen)?;
            if live_docs.num_deleted() != committed.del_count {
                return Err(XiphosError::corruption(format!(
                    "segment {}: commit records {} deletions, live docs hold {}",
                    committed.name,
                    committed.del_count,
                    live_docs.num_deleted()
                )));
            }
            segments.push(SegmentEntry::new(
                reader,
                live_docs,
                SegmentState::Committed,
                committed.live_gen,
            ));
        }
        remove_unreferenced_files(storage.as_ref(), &commit)?;

        let wal = WriteAheadLog::open(
            Arc::clone(&storage),
            config.durability,
            config.primary_term,
            commit.max_seq_no,
        )?;

        let state = WriterState {
            buffer: SegmentBuilder::new(Arc::clone(&config.analyzer)),
            field_infos: commit.field_infos.clone(),
            segments,
            index_uuid: commit.index_uuid,
            commit_generation: commit.generation,
            next_segment_id: commit.next_segment_id,
            processed_seq_no: commit.max_seq_no,
            committed_seq_no: commit.max_seq_no,
        };
        let scheduler = MergeScheduler::new(&config.scheduler)?;
        let inner = Arc::new(WriterInner {
            merge_policy: TieredMergePolicy::new(config.merge_policy.clone()),
            merge_engine: MergeEngine::new(Arc::clone(&storage)),
            config,
            storage,
            wal,
            searcher_manager,
            state: Mutex::new(state),
            closed: AtomicBool::new(false),
        });

        {
            let mut guard = inner.state.lock();
            let replayed = inner.replay(&mut guard, commit.max_seq_no + 1)?;
            inner.flush_buffer(&mut guard)?;
            inner.publish(&mut guard);
            info!(
                "opened index {} at commit generation {}: {} segments, {replayed} operations replayed",
                guard.index_uuid,
                guard.commit_generation,
                guard.segments.len()
            );
        }
        Ok(IndexWriter { inner, scheduler })
    }

    pub fn searcher_manager(&self) -> &Arc<SearcherManager> {
        &self.inner.searcher_manager
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Indexes (or replaces) a document.
    ///
    /// The document is validated and analyzed first; a rejected document consumes no
    /// sequence number and leaves the index untouched. When the buffer is over its
    /// budget it is refreshed before the document is accepted, and the call fails if
    /// that refresh fails.
    pub fn index(&self, document: Document) -> Result<IndexResponse> {
        self.inner.check_closed()?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if self.inner.buffer_full(state) {
            debug!("indexing buffer full, refreshing");
            self.inner.flush_buffer(state)?;
            self.inner.publish(state);
        }

        let block = state.buffer.prepare_document(&state.field_infos, &document)?;
        let id = document.id().to_string();
        let seq_no = self.inner.wal.append(WalOperation::Index {
            id: id.clone(),
            document,
        })?;

        let updated = apply_delete(state, &id)?;
        state.buffer.add_prepared(&mut state.field_infos, block)?;
        state.processed_seq_no = seq_no;

        Ok(IndexResponse {
            id,
            seq_no,
            result: if updated {
                WriteResult::Updated
            } else {
                WriteResult::Created
            },
        })
    }

    /// Indexes every document independently; one failure does not affect the others.
    pub fn index_batch(&self, documents: Vec<Document>) -> Vec<Result<IndexResponse>> {
        documents.into_iter().map(|doc| self.index(doc)).collect()
    }

    /// Deletes the document `id` and its nested children.
    pub fn delete(&self, id: &str) -> Result<DeleteResponse> {
        self.inner.check_closed()?;
        if id.is_empty() {
            return Err(XiphosError::invalid_operation("document id must not be empty"));
        }
        let mut guard = self.inner.state.lock();
        let seq_no = self.inner.wal.append(WalOperation::Delete { id: id.to_string() })?;
        let found = apply_delete(&mut guard, id)?;
        guard.processed_seq_no = seq_no;
        Ok(DeleteResponse {
            id: id.to_string(),
            seq_no,
            found,
        })
    }

    /// Makes every operation so far visible to newly acquired snapshots. Nothing is
    /// fsynced. Returns whether a new snapshot was published.
    pub fn refresh(&self) -> Result<bool> {
        self.inner.check_closed()?;
        let mut guard = self.inner.state.lock();
        self.inner.flush_buffer(&mut guard)?;
        Ok(self.inner.publish(&mut guard))
    }

    /// Refreshes, then makes the index durable up to the last operation and trims
    /// the write-ahead log. Returns the new commit generation.
    pub fn commit(&self) -> Result<u64> {
        self.inner.check_closed()?;
        let generation = {
            let mut guard = self.inner.state.lock();
            self.inner.flush_buffer(&mut guard)?;
            let generation = self.inner.write_commit(&mut guard)?;
            self.inner.publish(&mut guard);
            generation
        };
        if self.inner.config.auto_merge {
            self.maybe_merge();
        }
        Ok(generation)
    }

    /// Hands the merges the policy proposes over to the background pool.
    pub fn maybe_merge(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let candidates = {
            let guard = self.inner.state.lock();
            let committed: Vec<_> = guard
                .segments
                .iter()
                .filter(|s| s.lifecycle == SegmentState::Committed)
                .map(SegmentEntry::merge_info)
                .collect();
            self.inner.merge_policy.select_merges(&committed)
        };

        let mut scheduled = 0;
        for candidate in candidates {
            let Some((inputs, name)) = self.inner.start_merge(&candidate) else {
                continue;
            };
            info!(
                "scheduling {:?} merge of {:?} into {name}",
                candidate.strategy, candidate.segments
            );
            let inner = Arc::clone(&self.inner);
            let job_inputs = inputs.clone();
            let job_name = name.clone();
            let submitted = self.scheduler.submit(
                format!("{:?} -> {name}", candidate.segments),
                Box::new(move |cancel| inner.run_merge(&job_inputs, &job_name, cancel)),
            );
            match submitted {
                Ok(_) => scheduled += 1,
                Err(e) => {
                    warn!("merge into {name} not scheduled: {e}");
                    self.inner.abort_merge(&inputs);
                }
            }
        }
        scheduled
    }

    /// Merges synchronously until at most `max_segments` segments remain and no
    /// committed segment holds deleted documents. Segments taking part in a
    /// background merge are left alone.
    pub fn force_merge(&self, max_segments: usize) -> Result<()> {
        self.inner.check_closed()?;
        {
            let mut guard = self.inner.state.lock();
            self.inner.flush_buffer(&mut guard)?;
            self.inner.write_commit(&mut guard)?;
            self.inner.publish(&mut guard);
        }
        let candidates = {
            let guard = self.inner.state.lock();
            let committed: Vec<_> = guard
                .segments
                .iter()
                .filter(|s| s.lifecycle == SegmentState::Committed)
                .map(SegmentEntry::merge_info)
                .collect();
            self.inner
                .merge_policy
                .select_forced_merges(&committed, max_segments)
        };
        for candidate in candidates {
            let Some((inputs, name)) = self.inner.start_merge(&candidate) else {
                continue;
            };
            info!("forced merge of {:?} into {name}", candidate.segments);
            self.inner.run_merge(&inputs, &name, &AtomicBool::new(false))?;
        }
        Ok(())
    }

    pub fn field_infos(&self) -> FieldInfos {
        self.inner.state.lock().field_infos.clone()
    }

    pub fn segments(&self) -> Vec<SegmentStatus> {
        self.inner
            .state
            .lock()
            .segments
            .iter()
            .map(|s| SegmentStatus {
                name: s.name().to_string(),
                doc_count: s.reader.num_docs(),
                live_docs: s.live_docs.num_live(),
                source: s.reader.info().source,
                state: s.lifecycle,
            })
            .collect()
    }

    /// Root documents added since the last refresh and not deleted since.
    pub fn pending_docs(&self) -> usize {
        self.inner.state.lock().buffer.num_live_roots()
    }

    pub fn stats(&self) -> WriterStats {
        let state = self.inner.state.lock();
        WriterStats {
            segments: state.segments.len(),
            buffered_docs: state.buffer.num_docs(),
            buffer_ram_bytes: state.buffer.ram_bytes(),
            processed_seq_no: state.processed_seq_no,
            committed_seq_no: state.committed_seq_no,
            commit_generation: state.commit_generation,
            pending_merges: self.scheduler.pending(),
        }
    }

    /// Fsyncs the write-ahead log, regardless of the durability mode.
    pub fn sync_translog(&self) -> Result<()> {
        self.inner.wal.sync()
    }

    /// Cancels running merges and closes the write-ahead log. Operations since the
    /// last commit stay in the log and are replayed on the next open.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.scheduler.close();
        self.inner.wal.close()?;
        info!("closed index writer");
        Ok(())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        self.scheduler.close();
    }
}

impl WriterInner {
    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(XiphosError::invalid_operation("index writer is closed"))
        } else {
            Ok(())
        }
    }

    fn buffer_full(&self, state: &WriterState) -> bool {
        !state.buffer.is_empty()
            && (state.buffer.ram_bytes() >= self.config.ram_buffer_bytes()
                || state.buffer.num_docs() as usize >= self.config.max_buffered_docs)
    }

    /// Re-applies logged operations after `from_seq_no`.
    fn replay(&self, state: &mut WriterState, from_seq_no: SeqNo) -> Result<usize> {
        let entries = self.wal.replay(from_seq_no)?;
        let mut replayed = 0;
        for entry in entries {
            if entry.seq_no <= state.processed_seq_no {
                continue;
            }
            if self.buffer_full(state) {
                self.flush_buffer(state)?;
            }
            let applied = match entry.operation {
                WalOperation::Index { id, document } => state
                    .buffer
                    .prepare_document(&state.field_infos, &document)
                    .and_then(|block| {
                        apply_delete(state, &id)?;
                        state.buffer.add_prepared(&mut state.field_infos, block)
                    }),
                WalOperation::Delete { id } => apply_delete(state, &id).map(|_| ()),
                WalOperation::NoOp { .. } => Ok(()),
            };
            if let Err(e) = applied {
                warn!("skipping translog operation {}: {e}", entry.seq_no);
            }
            state.processed_seq_no = entry.seq_no;
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Writes the buffer as a new searchable (not yet durable) segment.
    fn flush_buffer(&self, state: &mut WriterState) -> Result<bool> {
        if state.buffer.is_empty() {
            return Ok(false);
        }
        if state.buffer.num_live_roots() == 0 {
            debug!("dropping indexing buffer whose documents were all deleted");
            state.buffer = SegmentBuilder::new(Arc::clone(&self.config.analyzer));
            return Ok(false);
        }

        let name = segment_name(state.next_segment_id);
        let (info, deleted) = state.buffer.build(Arc::clone(&self.storage), name.clone())?;
        let reader = match SegmentReader::open(Arc::clone(&self.storage), info) {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                remove_segment_files(self.storage.as_ref(), &name);
                return Err(e);
            }
        };
        state.next_segment_id += 1;

        let mut live_docs = LiveDocs::new_all_live(reader.num_docs());
        for doc in &deleted {
            live_docs.delete(*doc);
        }
        let mut lifecycle = SegmentState::Building;
        lifecycle.transition(SegmentState::Flushed)?;
        let mut entry = SegmentEntry::new(reader, live_docs, lifecycle, 0);
        entry.dirty = !deleted.is_empty();
        state.segments.push(entry);
        state.buffer = SegmentBuilder::new(Arc::clone(&self.config.analyzer));

        info!(
            "refreshed buffer into segment {name} ({} docs, {} deleted)",
            state.segments.last().map_or(0, |s| s.reader.num_docs()),
            deleted.len()
        );
        Ok(true)
    }

    /// Publishes the current segments and deletions to searchers.
    fn publish(&self, state: &mut WriterState) -> bool {
        for entry in state.segments.iter_mut().filter(|s| s.unpublished) {
            entry.published = SegmentSnapshot::new(
                Arc::clone(&entry.reader),
                Arc::new(entry.live_docs.clone()),
            );
            entry.unpublished = false;
        }
        let segments = state
            .segments
            .iter()
            .filter(|s| s.lifecycle.is_searchable())
            .map(|s| s.published.clone())
            .collect();
        self.searcher_manager.maybe_refresh(segments)
    }

    /// Makes the segment list durable under a new commit point. The buffer must have
    /// been flushed first.
    fn write_commit(&self, state: &mut WriterState) -> Result<u64> {
        let storage = self.storage.as_ref();

        let mut live_gens = Vec::with_capacity(state.segments.len());
        let mut stale = Vec::new();
        for entry in &state.segments {
            let mut files = Vec::new();
            if entry.lifecycle == SegmentState::Flushed {
                files.extend(segment_files(entry.reader.info(), entry.live_gen));
            }
            let live_gen = if entry.dirty {
                let live_gen = entry.live_gen + 1;
                files.push(write_live_docs(storage, entry.name(), live_gen, &entry.live_docs)?);
                stale.push(live_docs_file(entry.name(), entry.live_gen));
                live_gen
            } else {
                entry.live_gen
            };
            storage.sync_files(&files)?;
            live_gens.push(live_gen);
        }

        let commit = CommitPoint {
            generation: state.commit_generation + 1,
            index_uuid: state.index_uuid,
            max_seq_no: state.processed_seq_no,
            field_infos: state.field_infos.clone(),
            next_segment_id: state.next_segment_id,
            segments: state
                .segments
                .iter()
                .zip(&live_gens)
                .map(|(entry, live_gen)| CommittedSegment {
                    name: entry.name().to_string(),
                    doc_count: entry.reader.num_docs(),
                    del_count: entry.live_docs.num_deleted(),
                    live_gen: *live_gen,
                })
                .collect(),
        };
        commit.write(storage)?;

        let previous = state.commit_generation;
        state.commit_generation = commit.generation;
        state.committed_seq_no = commit.max_seq_no;
        for (entry, live_gen) in state.segments.iter_mut().zip(live_gens) {
            if entry.lifecycle == SegmentState::Flushed {
                entry.lifecycle.transition(SegmentState::Committed)?;
            }
            entry.live_gen = live_gen;
            entry.reader.set_live_gen(live_gen);
            entry.dirty = false;
        }

        stale.extend(
            storage
                .list_files()?
                .into_iter()
                .filter(|f| parse_commit_file(f).is_some_and(|g| g <= previous)),
        );
        for file in stale {
            if storage.file_exists(&file) {
                if let Err(e) = storage.delete_file(&file) {
                    warn!("failed to delete {file} after commit: {e}");
                }
            }
        }

        self.wal.roll()?;
        self.wal.trim_below(commit.max_seq_no + 1)?;
        info!(
            "committed generation {} ({} segments, max seq_no {})",
            commit.generation,
            commit.segments.len(),
            commit.max_seq_no
        );
        Ok(commit.generation)
    }

    /// Moves the candidate's segments into the merging state. Returns the merge
    /// inputs and the output name, or `None` if a segment is no longer available.
    fn start_merge(&self, candidate: &MergeCandidate) -> Option<(Vec<MergeInput>, String)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let available = candidate.segments.iter().all(|name| {
            state
                .segments
                .iter()
                .any(|s| s.name() == name && s.lifecycle == SegmentState::Committed)
        });
        if !available {
            debug!("skipping merge of {:?}: segments changed", candidate.segments);
            return None;
        }

        let mut inputs = Vec::with_capacity(candidate.segments.len());
        for entry in state
            .segments
            .iter_mut()
            .filter(|s| candidate.segments.iter().any(|n| n == s.name()))
        {
            if entry.lifecycle.transition(SegmentState::MergingInput).is_err() {
                continue;
            }
            inputs.push(MergeInput {
                reader: Arc::clone(&entry.reader),
                live_docs: Arc::new(entry.live_docs.clone()),
            });
        }
        let name = segment_name(state.next_segment_id);
        state.next_segment_id += 1;
        Some((inputs, name))
    }

    /// Releases the inputs of a merge that did not complete.
    fn abort_merge(&self, inputs: &[MergeInput]) {
        let mut state = self.state.lock();
        for entry in state.segments.iter_mut().filter(|s| is_input(inputs, s.name())) {
            if entry.lifecycle == SegmentState::MergingInput {
                entry.lifecycle = SegmentState::Committed;
            }
        }
    }

    fn run_merge(&self, inputs: &[MergeInput], name: &str, cancel: &AtomicBool) -> Result<()> {
        let result = self
            .merge_engine
            .merge(inputs, name, cancel)
            .and_then(|result| self.finish_merge(inputs, result));
        if let Err(e) = &result {
            self.abort_merge(inputs);
            if !e.is_cancelled() {
                error!("merge into {name} failed, inputs released for a later attempt: {e}");
            }
        }
        result
    }

    /// Installs a merge output in place of its inputs and commits the change.
    fn finish_merge(&self, inputs: &[MergeInput], result: MergeResult) -> Result<()> {
        let name = result.info.name.clone();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let output = if result.info.doc_count == 0 {
            remove_segment_files(self.storage.as_ref(), &name);
            None
        } else {
            let reader = match SegmentReader::open(Arc::clone(&self.storage), result.info.clone()) {
                Ok(reader) => Arc::new(reader),
                Err(e) => {
                    remove_segment_files(self.storage.as_ref(), &name);
                    return Err(e);
                }
            };
            // deletions that arrived while the merge ran
            let mut live_docs = LiveDocs::new_all_live(reader.num_docs());
            for (index, input) in inputs.iter().enumerate() {
                let Some(entry) = state.segments.iter().find(|s| s.name() == input.reader.name()) else {
                    return Err(XiphosError::merge(format!(
                        "merge input {} vanished",
                        input.reader.name()
                    )));
                };
                for doc in input.live_docs.iter_live() {
                    if !entry.live_docs.is_live(doc) {
                        if let Some(new) = result.map_doc(index, doc) {
                            live_docs.delete(new);
                        }
                    }
                }
            }
            let mut lifecycle = SegmentState::Building;
            lifecycle.transition(SegmentState::Flushed)?;
            let mut entry = SegmentEntry::new(reader, live_docs, lifecycle, 0);
            entry.dirty = entry.live_docs.num_deleted() > 0;
            Some(entry)
        };

        self.flush_buffer(state)?;
        let previous = state.segments.clone();
        let position = state
            .segments
            .iter()
            .position(|s| is_input(inputs, s.name()))
            .unwrap_or(state.segments.len());
        let mut superseded = Vec::new();
        let mut segments = Vec::with_capacity(state.segments.len());
        for (index, entry) in std::mem::take(&mut state.segments).into_iter().enumerate() {
            if index == position {
                segments.extend(output.clone());
            }
            if is_input(inputs, entry.name()) {
                superseded.push(entry);
            } else {
                segments.push(entry);
            }
        }
        state.segments = segments;

        if let Err(e) = self.write_commit(state) {
            state.segments = previous;
            if let Some(output) = output {
                output.reader.mark_obsolete();
            }
            return Err(e);
        }

        for mut entry in superseded {
            entry.lifecycle.transition(SegmentState::Superseded)?;
            entry.reader.mark_obsolete();
            entry.lifecycle.transition(SegmentState::Deleted)?;
        }
        self.publish(state);
        info!(
            "installed merged segment {name} ({} docs) replacing {} segments",
            result.info.doc_count,
            inputs.len()
        );
        Ok(())
    }
}

/// Applies a delete to the buffer and every searchable segment.
fn apply_delete(state: &mut WriterState, id: &str) -> Result<bool> {
    let mut found = state.buffer.delete(id);
    for entry in state.segments.iter_mut().filter(|s| s.lifecycle.is_searchable()) {
        found |= entry.delete_id(id)?;
    }
    Ok(found)
}

fn is_input(inputs: &[MergeInput], name: &str) -> bool {
    inputs.iter().any(|i| i.reader.name() == name)
}

fn remove_segment_files(storage: &dyn Storage, segment: &str) {
    let Ok(files) = storage.list_files() else {
        return;
    };
    for file in files.iter().filter(|f| segment_of_file(f) == Some(segment)) {
        if let Err(e) = storage.delete_file(file) {
            warn!("failed to delete {file}: {e}");
        }
    }
}

/// Deletes leftovers of interrupted writes: temp files, older commit points and
/// segment files the commit does not reference.
fn remove_unreferenced_files(storage: &dyn Storage, commit: &CommitPoint) -> Result<()> {
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    referenced.insert(commit.file_name());
    for segment in &commit.segments {
        let info = SegmentReader::read_info(storage, &segment.name)?;
        referenced.extend(segment_files(&info, segment.live_gen));
    }

    for file in storage.list_files()? {
        let orphan = file.ends_with(TEMP_SUFFIX)
            || parse_commit_file(&file).is_some_and(|g| g != commit.generation)
            || (segment_of_file(&file).is_some() && !referenced.contains(&file));
        if orphan {
            debug!("removing unreferenced file {file}");
            storage.delete_file(&file)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::index::config::TieredMergePolicyConfig;
    use crate::storage::memory::MemoryStorage;

    fn open(storage: &Arc<dyn Storage>, config: IndexConfig) -> IndexWriter {
        IndexWriter::open(Arc::clone(storage), config, Arc::new(SearcherManager::new())).unwrap()
    }

    fn doc(id: &str, body: &str) -> Document {
        Document::builder(id).add_text("body", body).build()
    }

    fn config() -> IndexConfig {
        IndexConfig::default().with_auto_merge(false)
    }

    fn visible(writer: &IndexWriter) -> u64 {
        writer.searcher_manager().acquire().num_docs()
    }

    #[test]
    fn test_refresh_publishes_without_commit() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open(&storage, config());
        let response = writer.index(doc("1", "hello world")).unwrap();
        assert_eq!(response.result, WriteResult::Created);
        assert_eq!(visible(&writer), 0);

        assert!(writer.refresh().unwrap());
        assert_eq!(visible(&writer), 1);
        assert!(!writer.refresh().unwrap());

        let segments = writer.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].state, SegmentState::Flushed);
        assert_eq!(writer.stats().committed_seq_no, 0);
    }

    #[test]
    fn test_upsert_and_delete() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open(&storage, config());
        writer.index(doc("1", "first")).unwrap();
        writer.refresh().unwrap();

        let response = writer.index(doc("1", "second")).unwrap();
        assert_eq!(response.result, WriteResult::Updated);
        writer.refresh().unwrap();
        assert_eq!(visible(&writer), 1);

        assert!(writer.delete("1").unwrap().found);
        assert!(!writer.delete("1").unwrap().found);
        assert_eq!(visible(&writer), 1);
        writer.refresh().unwrap();
        assert_eq!(visible(&writer), 0);
    }

    #[test]
    fn test_commit_and_reopen() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        {
            let writer = open(&storage, config());
            writer.index(doc("1", "a")).unwrap();
            writer.index(doc("2", "b")).unwrap();
            writer.delete("1").unwrap();
            let generation = writer.commit().unwrap();
            assert_eq!(generation, 1);
            assert_eq!(writer.segments()[0].state, SegmentState::Committed);
            writer.close().unwrap();
        }
        let writer = open(&storage, config());
        assert_eq!(visible(&writer), 1);
        let stats = writer.stats();
        assert_eq!(stats.commit_generation, 1);
        assert_eq!(stats.committed_seq_no, 3);
        assert_eq!(writer.index(doc("3", "c")).unwrap().seq_no, 4);
        assert!(storage.file_exists("segments_1"));
        assert!(!storage.file_exists("segments_0"));
    }

    #[test]
    fn test_uncommitted_operations_are_replayed() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        {
            let writer = open(&storage, config());
            writer.index(doc("1", "a")).unwrap();
            writer.commit().unwrap();
            writer.index(doc("2", "b")).unwrap();
            writer.delete("1").unwrap();
            writer.refresh().unwrap();
        }
        let writer = open(&storage, config());
        let snapshot = writer.searcher_manager().acquire();
        assert_eq!(snapshot.num_docs(), 1);
        assert_eq!(writer.stats().processed_seq_no, 3);

        let segments = writer.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].live_docs, 0);
        assert_eq!(segments[1].state, SegmentState::Flushed);
    }

    #[test]
    fn test_rejected_document_consumes_no_seq_no() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open(&storage, config());
        writer
            .index(Document::builder("1").add_integer("n", 1).build())
            .unwrap();
        let results = writer.index_batch(vec![
            Document::builder("2").add_text("n", "text").build(),
            Document::builder("3").add_integer("n", 3).build(),
        ]);
        assert!(matches!(results[0], Err(XiphosError::Field(_))));
        assert_eq!(results[1].as_ref().unwrap().seq_no, 2);
    }

    #[test]
    fn test_buffer_limit_forces_refresh() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open(&storage, config().with_max_buffered_docs(2));
        for i in 0..5 {
            writer.index(doc(&i.to_string(), "x")).unwrap();
        }
        assert_eq!(writer.segments().len(), 2);
        assert_eq!(visible(&writer), 4);
        assert_eq!(writer.pending_docs(), 1);
    }

    #[test]
    fn test_force_merge_reclaims_deletes() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open(&storage, config());
        for round in 0..3 {
            for i in 0..3 {
                writer.index(doc(&format!("{round}-{i}"), "x y")).unwrap();
            }
            writer.commit().unwrap();
        }
        writer.delete("0-0").unwrap();
        let before = writer.searcher_manager().acquire();

        writer.force_merge(1).unwrap();
        let segments = writer.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].doc_count, 8);
        assert_eq!(segments[0].source, SegmentSource::Merge);
        assert_eq!(visible(&writer), 8);

        // the old snapshot still reads its segments
        assert_eq!(before.segments.len(), 3);
        assert!(storage.file_exists(&format!("{}.doc", before.segments[0].name())));
        let old_names: Vec<String> = before.segments.iter().map(|s| s.name().to_string()).collect();
        drop(before);
        for name in old_names {
            assert!(!storage.file_exists(&format!("{name}.doc")), "{name}");
        }
    }

    #[test]
    fn test_background_merge() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let policy = TieredMergePolicyConfig {
            segments_per_tier: 2,
            floor_segment_docs: 10,
            ..Default::default()
        };
        let writer = open(
            &storage,
            IndexConfig::default().with_merge_policy(policy).with_auto_merge(false),
        );
        for i in 0..3 {
            writer.index(doc(&i.to_string(), "x")).unwrap();
            writer.commit().unwrap();
        }
        assert_eq!(writer.maybe_merge(), 1);
        for _ in 0..500 {
            if writer.stats().pending_merges == 0 && writer.segments().len() == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(writer.segments().len(), 1);
        assert_eq!(visible(&writer), 3);
        writer.close().unwrap();
    }
}
