//! Storage abstraction layer for Xiphos.
//!
//! Every index file (segment data, commit points, WAL generations, checkpoints) goes
//! through the [`Storage`] trait, so file and memory backends can be swapped without
//! touching higher-level code.
//!
//! # Storage Types
//!
//! ## FileStorage
//! - One directory on the local filesystem
//! - `sync_files` issues `fsync` for durability, `rename_file` is the atomic publish step
//!
//! ## MemoryStorage
//! - In-memory storage for testing; bytes become visible on flush or drop
//!
//! # Example
//!
//! ```
//! use xiphos::storage::{StorageConfig, StorageFactory};
//! use xiphos::storage::memory::MemoryStorageConfig;
//!
//! # fn main() -> xiphos::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//! assert!(storage.list_files()?.is_empty());
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XiphosError};

pub mod file;
pub mod memory;
pub mod structured;

use file::{FileStorage, FileStorageConfig};
use memory::{MemoryStorage, MemoryStorageConfig};

pub trait Storage: Send + Sync + std::fmt::Debug {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    fn create_output_append(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    fn file_exists(&self, name: &str) -> bool;

    fn delete_file(&self, name: &str) -> Result<()>;

    fn list_files(&self) -> Result<Vec<String>>;

    fn file_size(&self, name: &str) -> Result<u64>;

    /// Atomically replaces `new_name` with `old_name`.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Makes the contents of the named files durable.
    fn sync_files(&self, names: &[String]) -> Result<()>;

    /// Makes directory-level changes (creates, renames, deletes) durable.
    fn sync(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Reads a whole file into memory.
    fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        let mut input = self.open_input(name)?;
        let mut data = Vec::with_capacity(input.size()? as usize);
        input.read_to_end(&mut data)?;
        Ok(data)
    }
}

pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    fn size(&self) -> Result<u64>;
}

pub trait StorageOutput: Write + Send + std::fmt::Debug {
    fn flush_and_sync(&mut self) -> Result<()>;

    fn position(&self) -> u64;
}

// Implement StorageOutput for Box<dyn StorageOutput> to allow trait objects
impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> u64 {
        self.as_ref().position()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    FileNotFound(String),

    IoError(String),

    StorageClosed,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::StorageClosed => write!(f, "Storage is closed"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for XiphosError {
    fn from(err: StorageError) -> Self {
        XiphosError::storage(err.to_string())
    }
}

/// Backend selection for [`StorageFactory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    File(FileStorageConfig),
    Memory(MemoryStorageConfig),
}

pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::File(config) => Ok(Arc::new(FileStorage::new(config)?)),
            StorageConfig::Memory(config) => Ok(Arc::new(MemoryStorage::new(config))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::FileNotFound("_0.tim".to_string());
        assert_eq!(err.to_string(), "File not found: _0.tim");
        assert_eq!(StorageError::StorageClosed.to_string(), "Storage is closed");
    }

    #[test]
    fn test_factory_creates_file_storage() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig::File(FileStorageConfig::new(dir.path().join("index")));
        let storage = StorageFactory::create(config).unwrap();

        let mut out = storage.create_output("a.bin").unwrap();
        out.write_all(b"abc").unwrap();
        out.flush_and_sync().unwrap();
        drop(out);

        assert_eq!(storage.read_all("a.bin").unwrap(), b"abc");
    }

    #[test]
    fn test_storage_config_from_json() {
        let config: StorageConfig = serde_json::from_str(r#"{"type":"memory"}"#).unwrap();
        assert!(matches!(config, StorageConfig::Memory(_)));
    }
}
