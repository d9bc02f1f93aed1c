//! Cheaply cloneable views into a shared immutable buffer.

use std::fmt;
use std::ops::{Deref, Range};
use std::sync::Arc;

/// A sub-range of a reference-counted byte buffer.
///
/// Segment files are read once into memory; every per-field structure (term
/// dictionaries, postings, columns) is an `OwnedBytes` pointing into that buffer.
#[derive(Clone)]
pub struct OwnedBytes {
    data: Arc<Vec<u8>>,
    start: usize,
    end: usize,
}

impl OwnedBytes {
    pub fn new(data: Vec<u8>) -> Self {
        let end = data.len();
        OwnedBytes {
            data: Arc::new(data),
            start: 0,
            end,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Sub-view relative to this view. The range is clamped to the view bounds.
    pub fn slice(&self, range: Range<usize>) -> OwnedBytes {
        let start = (self.start + range.start).min(self.end);
        let end = (self.start + range.end).clamp(start, self.end);
        OwnedBytes {
            data: Arc::clone(&self.data),
            start,
            end,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Deref for OwnedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for OwnedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for OwnedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedBytes")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slices_share_buffer() {
        let bytes = OwnedBytes::new(b"hello world".to_vec());
        let world = bytes.slice(6..11);
        assert_eq!(world.as_slice(), b"world");
        assert_eq!(world.slice(1..3).as_slice(), b"or");
        assert_eq!(bytes.slice(8..100).as_slice(), b"rld");
        assert!(bytes.slice(20..30).is_empty());
    }
}
