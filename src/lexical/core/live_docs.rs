//! Live-docs bitset: one bit per internal doc, set while the document is visible.
//!
//! This is the only mutable part of a published segment. Every change produces a new
//! generation file (`{segment}_{gen}.liv`); the previous generation stays valid for the
//! commit point and snapshots that still reference it.

use bit_vec::BitVec;

use crate::error::{Result, XiphosError};
use crate::util::cursor::{BufWriteExt, ByteCursor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDocs {
    bits: BitVec,
    num_deleted: u32,
}

impl LiveDocs {
    pub fn new_all_live(num_docs: u32) -> Self {
        LiveDocs {
            bits: BitVec::from_elem(num_docs as usize, true),
            num_deleted: 0,
        }
    }

    pub fn len(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_live(&self, doc: u32) -> bool {
        self.bits.get(doc as usize).unwrap_or(false)
    }

    /// Clears the bit of `doc`; returns true if it was live.
    pub fn delete(&mut self, doc: u32) -> bool {
        if !self.is_live(doc) {
            return false;
        }
        self.bits.set(doc as usize, false);
        self.num_deleted += 1;
        true
    }

    pub fn num_live(&self) -> u32 {
        self.len() - self.num_deleted
    }

    pub fn num_deleted(&self) -> u32 {
        self.num_deleted
    }

    /// Fraction of documents still live; 1.0 for an empty segment.
    pub fn live_ratio(&self) -> f64 {
        if self.is_empty() {
            1.0
        } else {
            self.num_live() as f64 / self.len() as f64
        }
    }

    pub fn iter_live(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, live)| *live)
            .map(|(doc, _)| doc as u32)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32(self.len());
        out.extend_from_slice(&self.bits.to_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let len = cursor.read_u32()? as usize;
        let bytes = cursor.read_bytes(len.div_ceil(8))?;
        if !cursor.is_empty() {
            return Err(XiphosError::corruption("trailing bytes after live docs"));
        }
        let mut bits = BitVec::from_bytes(bytes);
        bits.truncate(len);
        let num_deleted = bits.iter().filter(|live| !live).count() as u32;
        Ok(LiveDocs { bits, num_deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_and_counts() {
        let mut live = LiveDocs::new_all_live(10);
        assert_eq!(live.num_live(), 10);
        assert!(live.delete(3));
        assert!(!live.delete(3));
        assert!(!live.delete(42));
        assert!(!live.is_live(3));
        assert!(live.is_live(4));
        assert_eq!(live.num_deleted(), 1);
        assert_eq!(live.iter_live().count(), 9);
        assert!((live.live_ratio() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_bytes() {
        let mut live = LiveDocs::new_all_live(13);
        live.delete(0);
        live.delete(12);
        let decoded = LiveDocs::from_bytes(&live.to_bytes()).unwrap();
        assert_eq!(decoded, live);
        assert!(LiveDocs::from_bytes(&[13, 0, 0, 0, 0xFF]).is_err());
    }
}
