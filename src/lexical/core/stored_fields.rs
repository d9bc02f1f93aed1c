//! Compressed stored fields.
//!
//! Documents are serialized with bincode and grouped into blocks of roughly
//! [`BLOCK_TARGET_BYTES`] (at most [`BLOCK_MAX_DOCS`] documents), each compressed with
//! zstd. A block index of `(first_doc, offset, len)` locates the block of any doc id.
//! The reader keeps the last decompressed block, so sequential access (merges,
//! fetching a page of hits) decompresses each block once.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{Result, XiphosError};
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::{BufWriteExt, ByteCursor};

pub const BLOCK_TARGET_BYTES: usize = 16 * 1024;
pub const BLOCK_MAX_DOCS: usize = 32;
const COMPRESSION_LEVEL: i32 = 3;

/// The stored form of one internal document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Nested path for child documents, `None` for roots.
    pub path: Option<String>,
    /// The document as indexed, children included.
    pub document: Document,
}

#[derive(Debug, Clone, Default)]
pub struct StoredFieldsWriter {
    blocks: Vec<u8>,
    index: Vec<(u32, u64, u32)>,
    pending: Vec<Vec<u8>>,
    pending_bytes: usize,
    num_docs: u32,
}

impl StoredFieldsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, doc: &StoredDocument) -> Result<()> {
        let bytes = bincode::serialize(doc)?;
        self.pending_bytes += bytes.len();
        self.pending.push(bytes);
        self.num_docs += 1;
        if self.pending_bytes >= BLOCK_TARGET_BYTES || self.pending.len() >= BLOCK_MAX_DOCS {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut raw = Vec::with_capacity(self.pending_bytes + self.pending.len() * 2);
        raw.put_vu32(self.pending.len() as u32);
        for doc in &self.pending {
            raw.put_blob(doc);
        }
        let compressed = zstd::encode_all(raw.as_slice(), COMPRESSION_LEVEL)?;

        let first_doc = self.num_docs - self.pending.len() as u32;
        self.index
            .push((first_doc, self.blocks.len() as u64, compressed.len() as u32));
        self.blocks.extend_from_slice(&compressed);
        self.pending.clear();
        self.pending_bytes = 0;
        Ok(())
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    /// Returns the `.fdt` body.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.flush_block()?;
        let mut out = Vec::with_capacity(self.blocks.len() + self.index.len() * 16 + 8);
        out.put_vu32(self.num_docs);
        out.put_vu32(self.index.len() as u32);
        for (first_doc, offset, len) in &self.index {
            out.put_u32(*first_doc);
            out.put_u64(*offset);
            out.put_u32(*len);
        }
        out.extend_from_slice(&self.blocks);
        Ok(out)
    }
}

#[derive(Debug)]
pub struct StoredFieldsReader {
    data: OwnedBytes,
    num_docs: u32,
    index: Vec<(u32, usize, usize)>,
    cache: Mutex<Option<(usize, Arc<Vec<StoredDocument>>)>>,
}

impl StoredFieldsReader {
    pub fn open(data: OwnedBytes) -> Result<Self> {
        let mut cursor = ByteCursor::new(&data);
        let num_docs = cursor.read_vu32()?;
        let num_blocks = cursor.read_vu32()? as usize;
        let mut index = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            index.push((
                cursor.read_u32()?,
                cursor.read_u64()? as usize,
                cursor.read_u32()? as usize,
            ));
        }
        let base = cursor.position();
        let index: Vec<(u32, usize, usize)> = index
            .into_iter()
            .map(|(first, offset, len)| (first, base + offset, len))
            .collect();
        if index.iter().any(|(_, offset, len)| offset + len > data.len()) {
            return Err(XiphosError::corruption("stored fields block points past end of file"));
        }
        Ok(StoredFieldsReader {
            data,
            num_docs,
            index,
            cache: Mutex::new(None),
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    fn load_block(&self, block: usize) -> Result<Arc<Vec<StoredDocument>>> {
        if let Some((cached, docs)) = self.cache.lock().as_ref() {
            if *cached == block {
                return Ok(Arc::clone(docs));
            }
        }

        let (_, offset, len) = self.index[block];
        let raw = zstd::decode_all(&self.data[offset..offset + len])
            .map_err(|e| XiphosError::corruption(format!("stored fields block {block}: {e}")))?;
        let mut cursor = ByteCursor::new(&raw);
        let count = cursor.read_vu32()? as usize;
        let mut docs = Vec::with_capacity(count);
        for _ in 0..count {
            let bytes = cursor.read_blob()?;
            let doc: StoredDocument = bincode::deserialize(bytes)
                .map_err(|e| XiphosError::corruption(format!("stored document: {e}")))?;
            docs.push(doc);
        }
        let docs = Arc::new(docs);
        *self.cache.lock() = Some((block, Arc::clone(&docs)));
        Ok(docs)
    }

    pub fn document(&self, doc: u32) -> Result<StoredDocument> {
        if doc >= self.num_docs {
            return Err(XiphosError::index(format!(
                "doc {doc} out of range ({} docs)",
                self.num_docs
            )));
        }
        let block = self.index.partition_point(|(first, _, _)| *first <= doc) - 1;
        let docs = self.load_block(block)?;
        let first = self.index[block].0;
        docs.get((doc - first) as usize)
            .cloned()
            .ok_or_else(|| XiphosError::corruption(format!("doc {doc} missing from its block")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(i: usize) -> StoredDocument {
        StoredDocument {
            path: (i % 3 == 0).then(|| "comments".to_string()),
            document: Document::builder(format!("doc-{i}"))
                .add_text("body", "lorem ipsum ".repeat(i % 50))
                .add_integer("n", i as i64)
                .build(),
        }
    }

    #[test]
    fn test_blocks_and_random_access() {
        let mut writer = StoredFieldsWriter::new();
        for i in 0..300 {
            writer.add(&stored(i)).unwrap();
        }
        assert_eq!(writer.num_docs(), 300);
        let reader = StoredFieldsReader::open(OwnedBytes::new(writer.finish().unwrap())).unwrap();
        assert!(reader.index.len() > 1);

        for i in [0usize, 31, 32, 150, 299, 7, 7] {
            assert_eq!(reader.document(i as u32).unwrap(), stored(i));
        }
        assert!(reader.document(300).is_err());
    }

    #[test]
    fn test_truncated_blocks_are_corruption() {
        let mut writer = StoredFieldsWriter::new();
        writer.add(&stored(1)).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.truncate(bytes.len() - 1);
        let err = StoredFieldsReader::open(OwnedBytes::new(bytes)).unwrap_err();
        assert!(err.is_corruption());
    }
}
