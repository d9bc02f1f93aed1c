//! Bounds-checked reader over an immutable byte buffer.
//!
//! Segment files are loaded as flat buffers and decoded in place; every structure
//! refers to its parts by byte offset. [`ByteCursor`] is the one place that turns
//! an out-of-range read into a [`XiphosError::Corruption`] instead of a panic.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, XiphosError};
use crate::util::varint;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        ByteCursor { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                XiphosError::corruption(format!(
                    "read of {len} bytes at offset {} past end of {}-byte buffer",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.read_bytes(8)?))
    }

    pub fn read_vu32(&mut self) -> Result<u32> {
        let (value, read) = varint::decode_u32(&self.data[self.pos.min(self.data.len())..])?;
        self.pos += read;
        Ok(value)
    }

    pub fn read_vu64(&mut self) -> Result<u64> {
        let (value, read) = varint::decode_u64(&self.data[self.pos.min(self.data.len())..])?;
        self.pos += read;
        Ok(value)
    }

    /// Reads a vbyte length followed by that many UTF-8 bytes.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_vu32()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| XiphosError::corruption(format!("invalid UTF-8 in string: {e}")))
    }

    /// Reads a vbyte length followed by that many raw bytes.
    pub fn read_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.read_vu32()? as usize;
        self.read_bytes(len)
    }
}

/// Little-endian append helpers mirroring [`ByteCursor`].
pub trait BufWriteExt {
    fn put_u8(&mut self, value: u8);
    fn put_u32(&mut self, value: u32);
    fn put_u64(&mut self, value: u64);
    fn put_f64(&mut self, value: f64);
    fn put_vu32(&mut self, value: u32);
    fn put_vu64(&mut self, value: u64);
    fn put_str(&mut self, value: &str);
    fn put_blob(&mut self, value: &[u8]);
}

impl BufWriteExt for Vec<u8> {
    fn put_u8(&mut self, value: u8) {
        self.push(value);
    }

    fn put_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_f64(&mut self, value: f64) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_vu32(&mut self, value: u32) {
        varint::push_u32(self, value);
    }

    fn put_vu64(&mut self, value: u64) {
        varint::push_u64(self, value);
    }

    fn put_str(&mut self, value: &str) {
        self.put_blob(value.as_bytes());
    }

    fn put_blob(&mut self, value: &[u8]) {
        varint::push_u32(self, value.len() as u32);
        self.extend_from_slice(value);
    }
}
