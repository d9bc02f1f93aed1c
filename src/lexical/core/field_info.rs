//! Field metadata.
//!
//! [`FieldInfos`] is the index-wide registry fixing each field's type on first use; it
//! is persisted in the commit point. [`SegmentFields`] is the per-segment `.fnm` body:
//! field statistics for BM25, exact per-document field lengths (norms) and the
//! root-document bitset used by block joins.

use std::collections::BTreeMap;

use bit_vec::BitVec;
use serde::{Deserialize, Serialize};

use crate::document::FieldType;
use crate::error::{Result, XiphosError};
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::{BufWriteExt, ByteCursor};
use crate::util::packed::{PackedReader, bits_required, pack};

/// Index-wide field name to type registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfos {
    fields: BTreeMap<String, FieldType>,
}

impl FieldInfos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<FieldType> {
        self.fields.get(field).copied()
    }

    /// Fails if `field` is already registered with another type.
    pub fn check(&self, field: &str, field_type: FieldType) -> Result<()> {
        match self.fields.get(field) {
            Some(existing) if *existing != field_type => Err(XiphosError::field(format!(
                "field '{field}' is {existing:?}, got a {field_type:?} value"
            ))),
            _ => Ok(()),
        }
    }

    pub fn register(&mut self, field: &str, field_type: FieldType) -> Result<()> {
        self.check(field, field_type)?;
        self.fields.entry(field.to_string()).or_insert(field_type);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Per-field statistics of one segment, over all of its documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldStats {
    /// Documents with at least one value in the field.
    pub doc_count: u32,
    /// Sum of all term frequencies, equal to the sum of field lengths.
    pub sum_total_term_freq: u64,
    /// Sum of all term document frequencies.
    pub sum_doc_freq: u64,
}

/// Metadata of one field inside a segment.
#[derive(Debug, Clone)]
pub struct SegmentFieldInfo {
    pub name: String,
    pub field_type: FieldType,
    pub stats: FieldStats,
    norms: Option<PackedReader>,
}

impl SegmentFieldInfo {
    /// Field length of `doc` in tokens; 0 when the field has no norms or the doc no value.
    pub fn norm(&self, doc: u32) -> u32 {
        self.norms.as_ref().map_or(0, |n| n.get(doc as usize) as u32)
    }

    pub fn has_norms(&self) -> bool {
        self.norms.is_some()
    }
}

/// Input to [`SegmentFields::encode`].
#[derive(Debug, Clone)]
pub struct FieldMetaInput {
    pub name: String,
    pub field_type: FieldType,
    pub stats: FieldStats,
    /// Exact per-document lengths, only for analyzed fields.
    pub norms: Option<Vec<u64>>,
}

/// Decoded `.fnm` body of a segment.
#[derive(Debug, Clone)]
pub struct SegmentFields {
    num_docs: u32,
    roots: BitVec,
    fields: BTreeMap<String, SegmentFieldInfo>,
}

impl SegmentFields {
    pub fn encode(num_docs: u32, roots: &BitVec, fields: &[FieldMetaInput]) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_vu32(num_docs);
        out.put_blob(&roots.to_bytes());
        out.put_vu32(fields.len() as u32);
        for field in fields {
            out.put_str(&field.name);
            out.put_u8(field.field_type.as_u8());
            out.put_vu32(field.stats.doc_count);
            out.put_vu64(field.stats.sum_total_term_freq);
            out.put_vu64(field.stats.sum_doc_freq);
            match &field.norms {
                Some(norms) => {
                    let bits = bits_required(norms.iter().copied().max().unwrap_or(0));
                    out.put_u8(1);
                    out.put_u8(bits);
                    out.put_blob(&pack(norms, bits));
                }
                None => out.put_u8(0),
            }
        }
        out
    }

    pub fn decode(body: &OwnedBytes) -> Result<Self> {
        let mut cursor = ByteCursor::new(body);
        let num_docs = cursor.read_vu32()?;
        let mut roots = BitVec::from_bytes(cursor.read_blob()?);
        if roots.len() < num_docs as usize {
            return Err(XiphosError::corruption("root bitset shorter than segment"));
        }
        roots.truncate(num_docs as usize);

        let count = cursor.read_vu32()?;
        let mut fields = BTreeMap::new();
        for _ in 0..count {
            let name = cursor.read_str()?.to_string();
            let type_byte = cursor.read_u8()?;
            let field_type = FieldType::from_u8(type_byte).ok_or_else(|| {
                XiphosError::corruption(format!("field '{name}' has unknown type {type_byte}"))
            })?;
            let stats = FieldStats {
                doc_count: cursor.read_vu32()?,
                sum_total_term_freq: cursor.read_vu64()?,
                sum_doc_freq: cursor.read_vu64()?,
            };
            let norms = match cursor.read_u8()? {
                0 => None,
                _ => {
                    let bits = cursor.read_u8()?;
                    let len = cursor.read_vu32()? as usize;
                    let start = cursor.position();
                    cursor.read_bytes(len)?;
                    Some(PackedReader::new(
                        body.slice(start..start + len),
                        bits,
                        num_docs as usize,
                    )?)
                }
            };
            fields.insert(
                name.clone(),
                SegmentFieldInfo {
                    name,
                    field_type,
                    stats,
                    norms,
                },
            );
        }
        Ok(SegmentFields {
            num_docs,
            roots,
            fields,
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn field(&self, name: &str) -> Option<&SegmentFieldInfo> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &SegmentFieldInfo> {
        self.fields.values()
    }

    /// True for top-level documents, false for nested children.
    pub fn is_root(&self, doc: u32) -> bool {
        self.roots.get(doc as usize).unwrap_or(false)
    }

    /// The root owning `doc`: the first root at or after it in the block.
    pub fn parent_of(&self, doc: u32) -> Option<u32> {
        (doc..self.num_docs).find(|d| self.is_root(*d))
    }

    pub fn roots(&self) -> &BitVec {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_conflicts() {
        let mut infos = FieldInfos::new();
        infos.register("title", FieldType::Text).unwrap();
        infos.register("title", FieldType::Text).unwrap();
        let err = infos.register("title", FieldType::Integer).unwrap_err();
        assert!(matches!(err, XiphosError::Field(_)));
        assert!(infos.check("year", FieldType::Integer).is_ok());
        assert_eq!(infos.len(), 1);
    }

    #[test]
    fn test_segment_fields() {
        let mut roots = BitVec::from_elem(4, false);
        roots.set(1, true);
        roots.set(3, true);
        let fields = vec![
            FieldMetaInput {
                name: "body".into(),
                field_type: FieldType::Text,
                stats: FieldStats {
                    doc_count: 3,
                    sum_total_term_freq: 9,
                    sum_doc_freq: 7,
                },
                norms: Some(vec![4, 0, 3, 2]),
            },
            FieldMetaInput {
                name: "year".into(),
                field_type: FieldType::Integer,
                stats: FieldStats::default(),
                norms: None,
            },
        ];
        let body = OwnedBytes::new(SegmentFields::encode(4, &roots, &fields));
        let decoded = SegmentFields::decode(&body).unwrap();

        let info = decoded.field("body").unwrap();
        assert_eq!(info.stats.sum_total_term_freq, 9);
        assert_eq!(info.norm(0), 4);
        assert_eq!(info.norm(2), 3);
        assert!(!decoded.field("year").unwrap().has_norms());
        assert!(decoded.is_root(1));
        assert!(!decoded.is_root(0));
        assert_eq!(decoded.parent_of(0), Some(1));
        assert_eq!(decoded.parent_of(2), Some(3));
    }
}
