//! Error types for the Xiphos library.
//!
//! All fallible operations in this crate return [`Result`], whose error side is the
//! [`XiphosError`] enum. String-carrying variants are usually built through the
//! lowercase constructor helpers.
//!
//! # Examples
//!
//! ```
//! use xiphos::error::{Result, XiphosError};
//!
//! fn open_segment(checksum_ok: bool) -> Result<()> {
//!     if !checksum_ok {
//!         return Err(XiphosError::corruption("checksum mismatch in _0.tim"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(open_segment(false).unwrap_err().is_corruption());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Xiphos operations.
#[derive(Error, Debug)]
pub enum XiphosError {
    /// I/O errors (file operations, fsync, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Analysis-related errors (tokenization, filtering, etc.)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Malformed or unparseable queries, rejected before execution
    #[error("Query error: {0}")]
    Query(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Field-related errors (type conflicts, unknown fields)
    #[error("Field error: {0}")]
    Field(String),

    /// Checksum or format mismatch while opening index files
    #[error("Index corruption: {0}")]
    Corruption(String),

    /// Write-ahead log failures that tail truncation cannot recover from
    #[error("WAL error: {0}")]
    Wal(String),

    /// Merge failures; the merge inputs stay valid
    #[error("Merge error: {0}")]
    Merge(String),

    /// Operation cancelled
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Resource exhausted (e.g. the indexing buffer is full and cannot be refreshed)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with XiphosError.
pub type Result<T> = std::result::Result<T, XiphosError>;

impl XiphosError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        XiphosError::Index(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        XiphosError::Analysis(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        XiphosError::Query(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        XiphosError::Storage(msg.into())
    }

    /// Create a new field error.
    pub fn field<S: Into<String>>(msg: S) -> Self {
        XiphosError::Field(msg.into())
    }

    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        XiphosError::Corruption(msg.into())
    }

    /// Create a new WAL error.
    pub fn wal<S: Into<String>>(msg: S) -> Self {
        XiphosError::Wal(msg.into())
    }

    /// Create a new merge error.
    pub fn merge<S: Into<String>>(msg: S) -> Self {
        XiphosError::Merge(msg.into())
    }

    /// Create a new cancellation error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        XiphosError::OperationCancelled(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        XiphosError::InvalidOperation(msg.into())
    }

    /// Create a new resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        XiphosError::ResourceExhausted(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        XiphosError::SerializationError(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        XiphosError::Other(msg.into())
    }

    /// Returns true if this error reports damaged index files.
    pub fn is_corruption(&self) -> bool {
        matches!(self, XiphosError::Corruption(_))
    }

    /// Returns true if this error reports a cancelled operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, XiphosError::OperationCancelled(_))
    }
}

impl From<bincode::Error> for XiphosError {
    fn from(err: bincode::Error) -> Self {
        XiphosError::SerializationError(err.to_string())
    }
}

impl From<regex::Error> for XiphosError {
    fn from(err: regex::Error) -> Self {
        XiphosError::Query(err.to_string())
    }
}

impl From<fst::Error> for XiphosError {
    fn from(err: fst::Error) -> Self {
        XiphosError::Corruption(err.to_string())
    }
}
