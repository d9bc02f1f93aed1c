//! Write-ahead log (translog).
//!
//! Every indexing operation is appended here before it reaches the indexing buffer.
//! The log is split into generations, `translog-{gen}.tlog`, each an append-only
//! sequence of frames:
//!
//! ```text
//! u32 LE payload length | u32 LE crc32(payload) | payload (bincode WalEntry)
//! ```
//!
//! A new generation starts whenever the log is opened, whenever a commit rolls it and
//! after a failed append, so a torn frame is always the tail of a generation that is
//! never written again. Replay stops reading a generation at its first short or
//! damaged frame and continues with the next generation.
//!
//! The sequence number of a failed append is not reused: the next append first writes
//! a `NoOp` for it into the fresh generation. Replay keeps the newest frame of each
//! sequence number, so a frame that reached disk before its append failed is never
//! applied.
//!
//! `translog.ckp` records the current generation and the lowest sequence number still
//! retained; it is rewritten (temp then rename) on roll and trim.

use std::io::Write;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{Result, XiphosError};
use crate::lexical::index::config::Durability;
use crate::lexical::index::segment::TEMP_SUFFIX;
use crate::storage::{Storage, StorageOutput};

pub const CHECKPOINT_FILE: &str = "translog.ckp";
const FILE_PREFIX: &str = "translog-";
const FILE_SUFFIX: &str = ".tlog";
const FRAME_HEADER_LEN: usize = 8;

pub type SeqNo = u64;

pub fn generation_file(generation: u64) -> String {
    format!("{FILE_PREFIX}{generation}{FILE_SUFFIX}")
}

/// Generation number of a translog file name.
pub fn parse_generation_file(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

/// A logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOperation {
    Index { id: String, document: Document },
    Delete { id: String },
    /// Consumes a sequence number without changing the index, e.g. for a rejected
    /// document whose number was already handed out.
    NoOp { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq_no: SeqNo,
    pub primary_term: u64,
    pub operation: WalOperation,
}

/// Sequence range held by one generation. Empty generations have no range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRange {
    pub generation: u64,
    pub min_seq_no: Option<SeqNo>,
    pub max_seq_no: Option<SeqNo>,
}

impl GenerationRange {
    fn empty(generation: u64) -> Self {
        GenerationRange {
            generation,
            min_seq_no: None,
            max_seq_no: None,
        }
    }

    fn record(&mut self, seq_no: SeqNo) {
        self.min_seq_no = Some(self.min_seq_no.map_or(seq_no, |m| m.min(seq_no)));
        self.max_seq_no = Some(self.max_seq_no.map_or(seq_no, |m| m.max(seq_no)));
    }
}

/// Contents of `translog.ckp`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalCheckpoint {
    pub generation: u64,
    pub min_retained_seq_no: SeqNo,
    pub generations: Vec<GenerationRange>,
}

struct WalState {
    output: Option<Box<dyn StorageOutput>>,
    generation: u64,
    current: GenerationRange,
    /// Closed generations still on disk, oldest first.
    retained: Vec<GenerationRange>,
    min_retained_seq_no: SeqNo,
    next_seq_no: SeqNo,
    unsynced: bool,
    /// Sequence number of an append that failed part way; the current generation
    /// may end in a torn frame and takes no more writes.
    failed_seq_no: Option<SeqNo>,
}

struct WalShared {
    storage: Arc<dyn Storage>,
    state: Mutex<WalState>,
}

impl WalShared {
    fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.unsynced {
            return Ok(());
        }
        if let Some(output) = state.output.as_mut() {
            output.flush_and_sync()?;
        }
        state.unsynced = false;
        Ok(())
    }
}

struct Syncer {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// The write-ahead log of one index.
pub struct WriteAheadLog {
    shared: Arc<WalShared>,
    durability: Durability,
    primary_term: u64,
    syncer: Mutex<Option<Syncer>>,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WriteAheadLog")
            .field("generation", &state.generation)
            .field("next_seq_no", &state.next_seq_no)
            .field("durability", &self.durability)
            .finish()
    }
}

impl WriteAheadLog {
    /// Opens the log, scanning existing generations, and starts a fresh generation.
    /// Sequence numbers continue after both `committed_seq_no` and the highest
    /// sequence number found on disk.
    pub fn open(
        storage: Arc<dyn Storage>,
        durability: Durability,
        primary_term: u64,
        committed_seq_no: SeqNo,
    ) -> Result<Self> {
        let checkpoint = read_checkpoint(storage.as_ref())?;

        let mut generations: Vec<u64> = storage
            .list_files()?
            .iter()
            .filter_map(|name| parse_generation_file(name))
            .collect();
        generations.sort_unstable();

        let mut retained = Vec::with_capacity(generations.len());
        let mut max_seq_no = committed_seq_no;
        for generation in &generations {
            let (entries, _) = read_generation(storage.as_ref(), *generation)?;
            let mut range = GenerationRange::empty(*generation);
            for entry in &entries {
                range.record(entry.seq_no);
            }
            if let Some(max) = range.max_seq_no {
                max_seq_no = max_seq_no.max(max);
            }
            retained.push(range);
        }

        let generation = generations
            .last()
            .copied()
            .unwrap_or(0)
            .max(checkpoint.generation)
            + 1;
        let output = storage.create_output(&generation_file(generation))?;

        let shared = Arc::new(WalShared {
            storage,
            state: Mutex::new(WalState {
                output: Some(output),
                generation,
                current: GenerationRange::empty(generation),
                retained,
                min_retained_seq_no: checkpoint.min_retained_seq_no,
                next_seq_no: max_seq_no + 1,
                unsynced: false,
                failed_seq_no: None,
            }),
        });

        let wal = WriteAheadLog {
            shared,
            durability,
            primary_term,
            syncer: Mutex::new(None),
        };
        wal.write_checkpoint()?;
        if let Durability::Async { sync_interval_ms } = durability {
            wal.start_syncer(Duration::from_millis(sync_interval_ms.max(1)));
        }
        debug!(
            "opened translog generation {generation}, next seq_no {}",
            max_seq_no + 1
        );
        Ok(wal)
    }

    fn start_syncer(&self, interval: Duration) {
        let (shutdown, signal): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("xiphos-translog-sync".into())
            .spawn(move || {
                loop {
                    match signal.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = shared.sync() {
                                error!("translog background sync failed: {e}");
                            }
                        }
                        _ => break,
                    }
                }
            });
        match handle {
            Ok(handle) => *self.syncer.lock() = Some(Syncer { shutdown, handle }),
            Err(e) => error!("failed to start translog sync thread, syncing on commit only: {e}"),
        }
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Sequence number the next append receives.
    pub fn next_seq_no(&self) -> SeqNo {
        self.shared.state.lock().next_seq_no
    }

    /// Highest sequence number handed out so far (0 if none).
    pub fn max_seq_no(&self) -> SeqNo {
        self.shared.state.lock().next_seq_no - 1
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Appends an operation and returns its sequence number. Under
    /// [`Durability::Request`] the frame is fsynced before returning.
    pub fn append(&self, operation: WalOperation) -> Result<SeqNo> {
        self.recover_failed_append()?;
        let mut state = self.shared.state.lock();
        let seq_no = state.next_seq_no;
        let frame = self.encode_frame(seq_no, operation)?;
        if let Err(e) = self.write_frame(&mut state, &frame) {
            error!(
                "translog append of seq_no {seq_no} failed in generation {}: {e}",
                state.generation
            );
            state.failed_seq_no = Some(seq_no);
            state.next_seq_no = seq_no + 1;
            return Err(e);
        }
        state.current.record(seq_no);
        state.next_seq_no = seq_no + 1;
        Ok(seq_no)
    }

    fn encode_frame(&self, seq_no: SeqNo, operation: WalOperation) -> Result<Vec<u8>> {
        let entry = WalEntry {
            seq_no,
            primary_term: self.primary_term,
            operation,
        };
        let payload = bincode::serialize(&entry)?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    fn write_frame(&self, state: &mut WalState, frame: &[u8]) -> Result<()> {
        let output = state
            .output
            .as_mut()
            .ok_or_else(|| XiphosError::wal("translog is closed"))?;
        output.write_all(frame)?;
        match self.durability {
            Durability::Request => output.flush_and_sync()?,
            Durability::Async { .. } => {
                output.flush()?;
                state.unsynced = true;
            }
        }
        Ok(())
    }

    /// Leaves a generation that may end in a torn frame and fills the failed
    /// sequence number with a `NoOp` in the next one.
    fn recover_failed_append(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            let Some(failed) = state.failed_seq_no else {
                return Ok(());
            };
            if state.output.is_none() {
                return Err(XiphosError::wal("translog is closed"));
            }
            // the damaged output is abandoned without a final sync
            state.output = None;
            self.start_generation(&mut state)?;
            let frame = self.encode_frame(
                failed,
                WalOperation::NoOp {
                    reason: "append failed".to_string(),
                },
            )?;
            self.write_frame(&mut state, &frame)?;
            state.current.record(failed);
            state.failed_seq_no = None;
            warn!(
                "translog continued in generation {} after failed append of seq_no {failed}",
                state.generation
            );
        }
        self.write_checkpoint()
    }

    fn start_generation(&self, state: &mut WalState) -> Result<()> {
        let closed = state.current;
        state.retained.push(closed);
        state.generation += 1;
        let generation = state.generation;
        state.current = GenerationRange::empty(generation);
        state.unsynced = false;
        state.output = Some(self.shared.storage.create_output(&generation_file(generation))?);
        Ok(())
    }

    /// Forces an fsync of everything appended so far.
    pub fn sync(&self) -> Result<()> {
        self.shared.sync()
    }

    /// Entries with `seq_no >= from_seq_no` from every generation on disk, in order.
    /// Damaged tails are skipped with a warning.
    pub fn replay(&self, from_seq_no: SeqNo) -> Result<Vec<WalEntry>> {
        // make the current generation readable
        self.sync()?;
        let generations: Vec<u64> = {
            let state = self.shared.state.lock();
            let mut generations: Vec<u64> = state.retained.iter().map(|r| r.generation).collect();
            generations.push(state.generation);
            generations
        };

        let mut entries = Vec::new();
        let mut discarded = 0usize;
        for generation in generations {
            let (generation_entries, tail) = read_generation(self.shared.storage.as_ref(), generation)?;
            discarded += tail;
            entries.extend(generation_entries.into_iter().filter(|e| e.seq_no >= from_seq_no));
        }
        // stable, so within one seq_no the newest generation comes last
        entries.sort_by_key(|e| e.seq_no);
        entries.reverse();
        entries.dedup_by_key(|e| e.seq_no);
        entries.reverse();
        if discarded > 0 {
            warn!("translog replay discarded {discarded} bytes of damaged tail");
        }
        info!(
            "translog replay from seq_no {from_seq_no}: {} entries",
            entries.len()
        );
        Ok(entries)
    }

    /// Closes the current generation and starts a new one.
    pub fn roll(&self) -> Result<u64> {
        self.recover_failed_append()?;
        {
            let mut state = self.shared.state.lock();
            if let Some(mut output) = state.output.take() {
                output.flush_and_sync()?;
            }
            self.start_generation(&mut state)?;
        }
        self.write_checkpoint()?;
        let generation = self.generation();
        debug!("rolled translog to generation {generation}");
        Ok(generation)
    }

    /// Deletes closed generations whose operations are all below `seq_no`.
    pub fn trim_below(&self, seq_no: SeqNo) -> Result<usize> {
        let removed: Vec<GenerationRange> = {
            let mut state = self.shared.state.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = state
                .retained
                .iter()
                .copied()
                .partition(|r| r.max_seq_no.is_none_or(|max| max < seq_no));
            state.retained = kept;
            state.min_retained_seq_no = state.min_retained_seq_no.max(seq_no);
            removed
        };
        self.write_checkpoint()?;
        for range in &removed {
            let file = generation_file(range.generation);
            if let Err(e) = self.shared.storage.delete_file(&file) {
                warn!("failed to delete trimmed translog {file}: {e}");
            }
        }
        if !removed.is_empty() {
            debug!("trimmed {} translog generations below seq_no {seq_no}", removed.len());
        }
        Ok(removed.len())
    }

    pub fn checkpoint(&self) -> WalCheckpoint {
        let state = self.shared.state.lock();
        let mut generations = state.retained.clone();
        generations.push(state.current);
        WalCheckpoint {
            generation: state.generation,
            min_retained_seq_no: state.min_retained_seq_no,
            generations,
        }
    }

    fn write_checkpoint(&self) -> Result<()> {
        let checkpoint = self.checkpoint();
        let storage = self.shared.storage.as_ref();
        let temp = format!("{CHECKPOINT_FILE}{TEMP_SUFFIX}");
        let mut output = storage.create_output(&temp)?;
        serde_json::to_writer(&mut output, &checkpoint)?;
        output.flush_and_sync()?;
        drop(output);
        storage.rename_file(&temp, CHECKPOINT_FILE)?;
        storage.sync()?;
        Ok(())
    }

    /// Stops the background syncer and fsyncs the current generation.
    pub fn close(&self) -> Result<()> {
        if let Some(syncer) = self.syncer.lock().take() {
            let _ = syncer.shutdown.send(());
            if syncer.handle.join().is_err() {
                error!("translog sync thread panicked");
            }
        }
        let mut state = self.shared.state.lock();
        if let Some(mut output) = state.output.take() {
            output.flush_and_sync()?;
        }
        state.unsynced = false;
        Ok(())
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        if let Some(syncer) = self.syncer.lock().take() {
            let _ = syncer.shutdown.send(());
            let _ = syncer.handle.join();
        }
    }
}

fn read_checkpoint(storage: &dyn Storage) -> Result<WalCheckpoint> {
    if !storage.file_exists(CHECKPOINT_FILE) {
        return Ok(WalCheckpoint::default());
    }
    let data = storage.read_all(CHECKPOINT_FILE)?;
    serde_json::from_slice(&data)
        .map_err(|e| XiphosError::wal(format!("unreadable translog checkpoint: {e}")))
}

/// Reads the valid frames of one generation. Returns the entries and the number of
/// trailing bytes that did not form a valid frame.
fn read_generation(storage: &dyn Storage, generation: u64) -> Result<(Vec<WalEntry>, usize)> {
    let name = generation_file(generation);
    if !storage.file_exists(&name) {
        return Ok((Vec::new(), 0));
    }
    let data = storage.read_all(&name)?;
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let rest = &data[pos..];
        if rest.len() < FRAME_HEADER_LEN {
            break;
        }
        let len = LittleEndian::read_u32(&rest[..4]) as usize;
        let crc = LittleEndian::read_u32(&rest[4..8]);
        if rest.len() - FRAME_HEADER_LEN < len {
            break;
        }
        let payload = &rest[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];
        if crc32fast::hash(payload) != crc {
            break;
        }
        match bincode::deserialize::<WalEntry>(payload) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        pos += FRAME_HEADER_LEN + len;
    }
    let tail = data.len() - pos;
    if tail > 0 {
        warn!("{name}: ignoring {tail} bytes after the last valid frame");
    }
    Ok((entries, tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    use crate::storage::StorageInput;
    use crate::storage::memory::MemoryStorage;

    const HEALTHY: u8 = 0;
    /// Half of the next frame is written, then writes fail.
    const TORN_WRITE: u8 = 1;
    /// The frame is written but the fsync fails.
    const FAILED_SYNC: u8 = 2;

    /// Memory storage whose translog outputs misbehave according to `mode`.
    #[derive(Debug)]
    struct FaultyStorage {
        inner: MemoryStorage,
        mode: Arc<AtomicU8>,
    }

    #[derive(Debug)]
    struct FaultyOutput {
        inner: Box<dyn StorageOutput>,
        mode: Arc<AtomicU8>,
        torn: bool,
    }

    impl Write for FaultyOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.mode.load(Ordering::SeqCst) != TORN_WRITE {
                return self.inner.write(buf);
            }
            if self.torn {
                return Err(std::io::Error::other("disk full"));
            }
            self.torn = true;
            let half = buf.len() / 2;
            self.inner.write_all(&buf[..half])?;
            Ok(half)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.inner.flush()
        }
    }

    impl StorageOutput for FaultyOutput {
        fn flush_and_sync(&mut self) -> Result<()> {
            if self.mode.load(Ordering::SeqCst) == FAILED_SYNC {
                self.inner.flush()?;
                return Err(XiphosError::storage("fsync failed"));
            }
            self.inner.flush_and_sync()
        }

        fn position(&self) -> u64 {
            self.inner.position()
        }
    }

    impl Storage for FaultyStorage {
        fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
            self.inner.open_input(name)
        }

        fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
            let inner = self.inner.create_output(name)?;
            if parse_generation_file(name).is_none() {
                return Ok(inner);
            }
            Ok(Box::new(FaultyOutput {
                inner,
                mode: Arc::clone(&self.mode),
                torn: false,
            }))
        }

        fn create_output_append(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
            self.inner.create_output_append(name)
        }

        fn file_exists(&self, name: &str) -> bool {
            self.inner.file_exists(name)
        }

        fn delete_file(&self, name: &str) -> Result<()> {
            self.inner.delete_file(name)
        }

        fn list_files(&self) -> Result<Vec<String>> {
            self.inner.list_files()
        }

        fn file_size(&self, name: &str) -> Result<u64> {
            self.inner.file_size(name)
        }

        fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
            self.inner.rename_file(old_name, new_name)
        }

        fn sync_files(&self, names: &[String]) -> Result<()> {
            self.inner.sync_files(names)
        }

        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    fn faulty_storage() -> (Arc<dyn Storage>, Arc<AtomicU8>) {
        let mode = Arc::new(AtomicU8::new(HEALTHY));
        let storage = FaultyStorage {
            inner: MemoryStorage::new_default(),
            mode: Arc::clone(&mode),
        };
        (Arc::new(storage), mode)
    }

    fn index_op(id: &str) -> WalOperation {
        WalOperation::Index {
            id: id.to_string(),
            document: Document::builder(id).add_text("body", "hello").build(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 3, 0).unwrap();
        assert_eq!(wal.append(index_op("1")).unwrap(), 1);
        assert_eq!(wal.append(WalOperation::Delete { id: "1".into() }).unwrap(), 2);
        assert_eq!(wal.append(WalOperation::NoOp { reason: "x".into() }).unwrap(), 3);

        let entries = wal.replay(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq_no, 2);
        assert_eq!(entries[0].primary_term, 3);
        assert!(matches!(entries[1].operation, WalOperation::NoOp { .. }));
    }

    #[test]
    fn test_reopen_continues_sequence_and_drops_torn_tail() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let generation = {
            let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
            for id in ["a", "b", "c"] {
                wal.append(index_op(id)).unwrap();
            }
            wal.generation()
        };

        // a crash in the middle of the fourth append
        let mut output = storage.create_output_append(&generation_file(generation)).unwrap();
        output.write_all(&[200, 0, 0, 0, 1, 2, 3, 4, 9, 9]).unwrap();
        drop(output);

        let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
        assert!(wal.generation() > generation);
        let entries = wal.replay(1).unwrap();
        let seqs: Vec<_> = entries.iter().map(|e| e.seq_no).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(wal.append(index_op("d")).unwrap(), 4);
    }

    #[test]
    fn test_corrupt_frame_stops_generation() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let generation = {
            let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
            wal.append(index_op("a")).unwrap();
            wal.append(index_op("b")).unwrap();
            wal.generation()
        };
        let name = generation_file(generation);
        let mut data = storage.read_all(&name).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let mut output = storage.create_output(&name).unwrap();
        output.write_all(&data).unwrap();
        drop(output);

        let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
        let entries = wal.replay(0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(wal.next_seq_no(), 2);
    }

    #[test]
    fn test_roll_and_trim() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
        let first = wal.generation();
        wal.append(index_op("a")).unwrap();
        wal.append(index_op("b")).unwrap();
        wal.roll().unwrap();
        wal.append(index_op("c")).unwrap();

        assert_eq!(wal.trim_below(3).unwrap(), 1);
        assert!(!storage.file_exists(&generation_file(first)));
        let checkpoint = wal.checkpoint();
        assert_eq!(checkpoint.min_retained_seq_no, 3);
        assert_eq!(wal.replay(0).unwrap().len(), 1);

        let persisted: WalCheckpoint =
            serde_json::from_slice(&storage.read_all(CHECKPOINT_FILE).unwrap()).unwrap();
        assert_eq!(persisted.min_retained_seq_no, 3);
    }

    #[test]
    fn test_async_durability_syncs_in_background() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let wal = WriteAheadLog::open(
            Arc::clone(&storage),
            Durability::Async { sync_interval_ms: 5 },
            1,
            10,
        )
        .unwrap();
        assert_eq!(wal.append(index_op("a")).unwrap(), 11);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(wal.replay(0).unwrap().len(), 1);
        wal.close().unwrap();
        assert!(wal.append(index_op("b")).is_err());
    }

    #[test]
    fn test_generation_file_names() {
        assert_eq!(generation_file(7), "translog-7.tlog");
        assert_eq!(parse_generation_file("translog-7.tlog"), Some(7));
        assert_eq!(parse_generation_file("translog.ckp"), None);
        assert_eq!(parse_generation_file("_1.tim"), None);
    }

    #[test]
    fn test_torn_append_does_not_hide_later_entries() {
        let (storage, mode) = faulty_storage();
        let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
        assert_eq!(wal.append(index_op("a")).unwrap(), 1);
        let damaged = wal.generation();

        mode.store(TORN_WRITE, Ordering::SeqCst);
        assert!(wal.append(index_op("b")).is_err());
        mode.store(HEALTHY, Ordering::SeqCst);

        assert_eq!(wal.append(index_op("c")).unwrap(), 3);
        assert!(wal.generation() > damaged);
        assert!(wal.checkpoint().generations.iter().any(|g| g.generation == damaged));
        drop(wal);

        let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
        let entries = wal.replay(0).unwrap();
        let seqs: Vec<_> = entries.iter().map(|e| e.seq_no).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(matches!(entries[1].operation, WalOperation::NoOp { .. }));
        assert!(matches!(&entries[2].operation, WalOperation::Index { id, .. } if id == "c"));
        assert_eq!(wal.next_seq_no(), 4);
    }

    #[test]
    fn test_failed_sync_is_never_replayed() {
        let (storage, mode) = faulty_storage();
        let wal = WriteAheadLog::open(Arc::clone(&storage), Durability::Request, 1, 0).unwrap();
        wal.append(index_op("a")).unwrap();

        // the frame reaches the file, but the caller is told it failed
        mode.store(FAILED_SYNC, Ordering::SeqCst);
        assert!(wal.append(index_op("b")).is_err());
        mode.store(HEALTHY, Ordering::SeqCst);
        assert_eq!(wal.append(index_op("c")).unwrap(), 3);

        let entries = wal.replay(0).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[1].operation, WalOperation::NoOp { .. }));
        assert!(entries.iter().all(|e| !matches!(&e.operation, WalOperation::Index { id, .. } if id == "b")));
    }
}
