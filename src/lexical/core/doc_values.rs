//! Columnar per-document values.
//!
//! Two encodings, both giving O(1) access by doc id:
//!
//! - **Sorted numeric**: every value of every document, sorted per document, stored as
//!   `(value - min) / gcd` in a fixed-bit packed array. Floats are stored through their
//!   order-preserving integer form, dates as epoch milliseconds.
//! - **Sorted set**: the distinct keyword values of the column form a sorted ordinal
//!   dictionary; each document stores its sorted, deduplicated ordinals.
//!
//! In both cases a packed array of `num_docs + 1` cumulative counts maps a document to
//! its slice of values. Deleted documents keep their values; callers filter with live docs.

use crate::error::{Result, XiphosError};
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::{BufWriteExt, ByteCursor};
use crate::util::packed::{PackedReader, bits_required, gcd, pack};
use crate::util::sortable::sortable_i64_to_f64;

/// How the integers of a numeric column are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Integer,
    /// Stored as [`f64_to_sortable_i64`](crate::util::sortable::f64_to_sortable_i64).
    Float,
}

impl NumericKind {
    fn as_u8(self) -> u8 {
        match self {
            NumericKind::Integer => 0,
            NumericKind::Float => 1,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(NumericKind::Integer),
            1 => Ok(NumericKind::Float),
            other => Err(XiphosError::corruption(format!("unknown numeric kind {other}"))),
        }
    }
}

fn put_packed(out: &mut Vec<u8>, values: &[u64]) {
    let bits = bits_required(values.iter().copied().max().unwrap_or(0));
    out.put_u8(bits);
    out.put_vu32(values.len() as u32);
    out.extend_from_slice(&pack(values, bits));
}

fn read_packed(body: &OwnedBytes, cursor: &mut ByteCursor<'_>) -> Result<PackedReader> {
    let bits = cursor.read_u8()?;
    let len = cursor.read_vu32()? as usize;
    let start = cursor.position();
    let byte_len = PackedReader::byte_len(bits, len);
    cursor.read_bytes(byte_len)?;
    PackedReader::new(body.slice(start..start + byte_len), bits, len)
}

fn doc_offsets<T>(per_doc: &[Vec<T>]) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(per_doc.len() + 1);
    let mut total = 0u64;
    offsets.push(0);
    for values in per_doc {
        total += values.len() as u64;
        offsets.push(total);
    }
    offsets
}

/// Encodes a sorted numeric column. `per_doc[doc]` holds that document's values.
pub fn encode_sorted_numeric(per_doc: &[Vec<i64>], kind: NumericKind) -> Vec<u8> {
    let sorted: Vec<Vec<i64>> = per_doc
        .iter()
        .map(|values| {
            let mut values = values.clone();
            values.sort_unstable();
            values
        })
        .collect();
    let all: Vec<i64> = sorted.iter().flatten().copied().collect();
    let min = all.iter().copied().min().unwrap_or(0);
    let common = all
        .iter()
        .fold(0u64, |acc, v| gcd(acc, v.wrapping_sub(min) as u64))
        .max(1);
    let quotients: Vec<u64> = all
        .iter()
        .map(|v| v.wrapping_sub(min) as u64 / common)
        .collect();

    let mut out = Vec::new();
    out.put_u8(kind.as_u8());
    put_packed(&mut out, &doc_offsets(&sorted));
    out.put_u64(min as u64);
    out.put_u64(common);
    put_packed(&mut out, &quotients);
    out
}

/// Random access over a sorted numeric column.
#[derive(Debug, Clone)]
pub struct NumericDocValues {
    kind: NumericKind,
    offsets: PackedReader,
    min: i64,
    gcd: u64,
    values: PackedReader,
}

impl NumericDocValues {
    pub fn open(body: OwnedBytes) -> Result<Self> {
        let mut cursor = ByteCursor::new(&body);
        let kind = NumericKind::from_u8(cursor.read_u8()?)?;
        let offsets = read_packed(&body, &mut cursor)?;
        let min = cursor.read_u64()? as i64;
        let gcd = cursor.read_u64()?;
        let values = read_packed(&body, &mut cursor)?;
        if offsets.is_empty() || offsets.get(offsets.len() - 1) as usize != values.len() {
            return Err(XiphosError::corruption("numeric doc values offsets do not match values"));
        }
        Ok(NumericDocValues {
            kind,
            offsets,
            min,
            gcd,
            values,
        })
    }

    pub fn kind(&self) -> NumericKind {
        self.kind
    }

    pub fn num_docs(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    fn range(&self, doc: u32) -> std::ops::Range<usize> {
        if doc >= self.num_docs() {
            return 0..0;
        }
        let start = self.offsets.get(doc as usize) as usize;
        let end = self.offsets.get(doc as usize + 1) as usize;
        start..end
    }

    fn decode(&self, index: usize) -> i64 {
        self.min
            .wrapping_add(self.values.get(index).wrapping_mul(self.gcd) as i64)
    }

    /// Number of values of `doc`.
    pub fn count(&self, doc: u32) -> usize {
        self.range(doc).len()
    }

    /// Values of `doc` in ascending order, as stored integers.
    pub fn values(&self, doc: u32) -> impl Iterator<Item = i64> + '_ {
        self.range(doc).map(move |i| self.decode(i))
    }

    /// Smallest value of `doc`.
    pub fn first(&self, doc: u32) -> Option<i64> {
        self.values(doc).next()
    }

    /// Smallest value of `doc` converted to `f64` according to the column kind.
    pub fn first_f64(&self, doc: u32) -> Option<f64> {
        self.first(doc).map(|v| match self.kind {
            NumericKind::Integer => v as f64,
            NumericKind::Float => sortable_i64_to_f64(v),
        })
    }
}

/// Encodes a sorted set column of keyword values.
pub fn encode_sorted_set(per_doc: &[Vec<String>]) -> Vec<u8> {
    let mut terms: Vec<&str> = per_doc.iter().flatten().map(String::as_str).collect();
    terms.sort_unstable();
    terms.dedup();

    let ords: Vec<Vec<u64>> = per_doc
        .iter()
        .map(|values| {
            let mut ords: Vec<u64> = values
                .iter()
                .filter_map(|v| terms.binary_search(&v.as_str()).ok())
                .map(|ord| ord as u64)
                .collect();
            ords.sort_unstable();
            ords.dedup();
            ords
        })
        .collect();

    let mut out = Vec::new();
    out.put_vu32(terms.len() as u32);
    let mut term_offsets = Vec::with_capacity(terms.len() + 1);
    let mut term_bytes = Vec::new();
    for term in &terms {
        term_offsets.push(term_bytes.len() as u64);
        term_bytes.extend_from_slice(term.as_bytes());
    }
    term_offsets.push(term_bytes.len() as u64);
    put_packed(&mut out, &term_offsets);
    out.put_blob(&term_bytes);
    put_packed(&mut out, &doc_offsets(&ords));
    let flat: Vec<u64> = ords.into_iter().flatten().collect();
    put_packed(&mut out, &flat);
    out
}

/// Random access over a sorted set column.
#[derive(Debug, Clone)]
pub struct SortedSetDocValues {
    term_offsets: PackedReader,
    term_bytes: OwnedBytes,
    doc_offsets: PackedReader,
    ords: PackedReader,
}

impl SortedSetDocValues {
    pub fn open(body: OwnedBytes) -> Result<Self> {
        let mut cursor = ByteCursor::new(&body);
        let value_count = cursor.read_vu32()? as usize;
        let term_offsets = read_packed(&body, &mut cursor)?;
        let len = cursor.read_vu32()? as usize;
        let start = cursor.position();
        cursor.read_bytes(len)?;
        let term_bytes = body.slice(start..start + len);
        let doc_offsets = read_packed(&body, &mut cursor)?;
        let ords = read_packed(&body, &mut cursor)?;

        if term_offsets.len() != value_count + 1
            || doc_offsets.is_empty()
            || doc_offsets.get(doc_offsets.len() - 1) as usize != ords.len()
        {
            return Err(XiphosError::corruption("sorted set doc values tables are inconsistent"));
        }
        Ok(SortedSetDocValues {
            term_offsets,
            term_bytes,
            doc_offsets,
            ords,
        })
    }

    pub fn num_docs(&self) -> u32 {
        (self.doc_offsets.len() - 1) as u32
    }

    /// Number of distinct values in the column.
    pub fn value_count(&self) -> u64 {
        (self.term_offsets.len() - 1) as u64
    }

    /// Ordinals of `doc`, ascending.
    pub fn ords(&self, doc: u32) -> impl Iterator<Item = u64> + '_ {
        let range = if doc < self.num_docs() {
            self.doc_offsets.get(doc as usize) as usize..self.doc_offsets.get(doc as usize + 1) as usize
        } else {
            0..0
        };
        range.map(move |i| self.ords.get(i))
    }

    pub fn lookup_ord(&self, ord: u64) -> Result<&str> {
        if ord >= self.value_count() {
            return Err(XiphosError::index(format!("ordinal {ord} out of range")));
        }
        let start = self.term_offsets.get(ord as usize) as usize;
        let end = self.term_offsets.get(ord as usize + 1) as usize;
        let bytes = self
            .term_bytes
            .get(start..end)
            .ok_or_else(|| XiphosError::corruption(format!("ordinal {ord} points outside term data")))?;
        std::str::from_utf8(bytes)
            .map_err(|e| XiphosError::corruption(format!("invalid UTF-8 in doc values: {e}")))
    }

    /// Values of `doc` in ordinal order.
    pub fn values(&self, doc: u32) -> Result<Vec<String>> {
        self.ords(doc)
            .map(|ord| self.lookup_ord(ord).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::sortable::f64_to_sortable_i64;

    #[test]
    fn test_sorted_numeric_with_gcd() {
        let per_doc = vec![vec![3000, 1000], vec![], vec![-2000], vec![5000, 5000, 1000]];
        let dv = NumericDocValues::open(OwnedBytes::new(encode_sorted_numeric(
            &per_doc,
            NumericKind::Integer,
        )))
        .unwrap();
        assert_eq!(dv.num_docs(), 4);
        assert_eq!(dv.values(0).collect::<Vec<_>>(), vec![1000, 3000]);
        assert_eq!(dv.count(1), 0);
        assert_eq!(dv.first(1), None);
        assert_eq!(dv.first(2), Some(-2000));
        assert_eq!(dv.values(3).collect::<Vec<_>>(), vec![1000, 5000, 5000]);
        assert_eq!(dv.first(9), None);
        assert_eq!(dv.gcd, 1000);
    }

    #[test]
    fn test_numeric_extremes() {
        let per_doc = vec![vec![i64::MIN], vec![i64::MAX], vec![0]];
        let dv = NumericDocValues::open(OwnedBytes::new(encode_sorted_numeric(
            &per_doc,
            NumericKind::Integer,
        )))
        .unwrap();
        assert_eq!(dv.first(0), Some(i64::MIN));
        assert_eq!(dv.first(1), Some(i64::MAX));
        assert_eq!(dv.first(2), Some(0));
    }

    #[test]
    fn test_float_column() {
        let per_doc = vec![vec![f64_to_sortable_i64(2.5)], vec![f64_to_sortable_i64(-1.25)]];
        let dv = NumericDocValues::open(OwnedBytes::new(encode_sorted_numeric(
            &per_doc,
            NumericKind::Float,
        )))
        .unwrap();
        assert_eq!(dv.kind(), NumericKind::Float);
        assert_eq!(dv.first_f64(0), Some(2.5));
        assert_eq!(dv.first_f64(1), Some(-1.25));
    }

    #[test]
    fn test_sorted_set() {
        let per_doc = vec![
            vec!["red".to_string(), "blue".to_string()],
            vec![],
            vec!["green".to_string(), "red".to_string(), "red".to_string()],
        ];
        let dv = SortedSetDocValues::open(OwnedBytes::new(encode_sorted_set(&per_doc))).unwrap();
        assert_eq!(dv.value_count(), 3);
        assert_eq!(dv.lookup_ord(0).unwrap(), "blue");
        assert_eq!(dv.ords(0).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(dv.values(2).unwrap(), vec!["green", "red"]);
        assert!(dv.values(1).unwrap().is_empty());
        assert!(dv.lookup_ord(3).is_err());
    }

    #[test]
    fn test_truncated_column_is_corruption() {
        let mut bytes = encode_sorted_set(&[vec!["a".to_string()]]);
        bytes.truncate(bytes.len() - 9);
        assert!(SortedSetDocValues::open(OwnedBytes::new(bytes)).unwrap_err().is_corruption());
    }
}
