//! In-memory storage implementation for testing.
//!
//! Written bytes are published to the shared file table when the output is flushed or
//! dropped, so a simulated crash can be produced by leaking an output before flushing.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

type FileTable = Arc<Mutex<HashMap<String, Arc<Vec<u8>>>>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStorageConfig {
    /// Initial capacity reserved for each new output buffer.
    pub initial_capacity: usize,
}

#[derive(Debug)]
pub struct MemoryStorage {
    files: FileTable,
    config: MemoryStorageConfig,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(HashMap::new())),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn new_default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::StorageClosed.into())
        } else {
            Ok(())
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|data| data.len() as u64).sum()
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.check_closed()?;

        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput::new(Arc::clone(data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.check_closed()?;

        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::with_capacity(self.config.initial_capacity),
            files: Arc::clone(&self.files),
            dirty: true,
        }))
    }

    fn create_output_append(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.check_closed()?;

        let existing = self
            .files
            .lock()
            .get(name)
            .map(|data| data.as_ref().clone())
            .unwrap_or_default();

        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: existing,
            files: Arc::clone(&self.files),
            dirty: true,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        !self.closed.load(Ordering::Acquire) && self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.check_closed()?;
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.check_closed()?;

        let mut file_names: Vec<String> = self.files.lock().keys().cloned().collect();
        file_names.sort();
        Ok(file_names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.check_closed()?;

        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(data.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.check_closed()?;

        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync_files(&self, _names: &[String]) -> Result<()> {
        self.check_closed()
    }

    fn sync(&self) -> Result<()> {
        self.check_closed()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<Vec<u8>>>,
}

impl MemoryInput {
    fn new(data: Arc<Vec<u8>>) -> Self {
        MemoryInput {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let data = self.cursor.get_ref().as_slice();
        let pos = (self.cursor.position() as usize).min(data.len());
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.cursor.set_position((pos + n) as u64);
        Ok(n)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let len = self.cursor.get_ref().len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.cursor.position() as i64 + offset,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Invalid seek position",
            ));
        }
        self.cursor.set_position(target as u64);
        Ok(target as u64)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileTable,
    dirty: bool,
}

impl MemoryOutput {
    fn publish(&mut self) {
        if self.dirty {
            self.files
                .lock()
                .insert(self.name.clone(), Arc::new(self.buffer.clone()));
            self.dirty = false;
        }
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.dirty = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_publish_read() {
        let storage = MemoryStorage::new_default();
        let mut out = storage.create_output("a").unwrap();
        out.write_all(b"hello").unwrap();
        assert_eq!(out.position(), 5);
        out.flush().unwrap();

        assert!(storage.file_exists("a"));
        assert_eq!(storage.read_all("a").unwrap(), b"hello");
        assert_eq!(storage.file_size("a").unwrap(), 5);
    }

    #[test]
    fn test_unflushed_bytes_are_lost_when_leaked() {
        let storage = MemoryStorage::new_default();
        let mut out = storage.create_output("log").unwrap();
        out.write_all(b"durable").unwrap();
        out.flush_and_sync().unwrap();
        out.write_all(b"lost").unwrap();
        std::mem::forget(out);

        assert_eq!(storage.read_all("log").unwrap(), b"durable");
    }

    #[test]
    fn test_append_and_rename() {
        let storage = MemoryStorage::new_default();
        {
            let mut out = storage.create_output("x.tmp").unwrap();
            out.write_all(b"ab").unwrap();
        }
        {
            let mut out = storage.create_output_append("x.tmp").unwrap();
            assert_eq!(out.position(), 2);
            out.write_all(b"cd").unwrap();
        }
        storage.rename_file("x.tmp", "x").unwrap();

        assert!(!storage.file_exists("x.tmp"));
        assert_eq!(storage.read_all("x").unwrap(), b"abcd");
        assert_eq!(storage.list_files().unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_closed_storage_rejects_operations() {
        let storage = MemoryStorage::new_default();
        storage.close().unwrap();
        assert!(storage.create_output("a").is_err());
        assert!(!storage.file_exists("a"));
    }
}
