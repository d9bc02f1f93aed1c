//! Checksummed binary index files.
//!
//! Every segment file is framed as
//!
//! ```text
//! magic: u32 | version: u8 | body ... | footer magic: u32 | crc32(magic..body): u32
//! ```
//!
//! [`StructWriter`] streams a file while maintaining the running crc32, and
//! [`read_checksummed`] loads a file back, rejecting it with
//! [`XiphosError::Corruption`](crate::error::XiphosError::Corruption) when the header,
//! footer or checksum does not match.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Result, XiphosError};
use crate::storage::{Storage, StorageOutput};
use crate::util::bytes::OwnedBytes;
use crate::util::varint::encode_u64;

pub const FORMAT_VERSION: u8 = 1;
pub const FOOTER_MAGIC: u32 = 0xC02F_FEE0;
const HEADER_LEN: usize = 5;
const FOOTER_LEN: usize = 8;

pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Starts a file with the given magic number.
    pub fn new(writer: W, magic: u32) -> Result<Self> {
        let mut writer = StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        };
        writer.write_u32(magic)?;
        writer.write_u8(FORMAT_VERSION)?;
        Ok(writer)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.hasher.update(&[value]);
        self.position += 1;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 8;
        Ok(())
    }

    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = encode_u64(value);
        self.write_raw(&encoded)
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Writes a varint length prefix followed by the bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Writes the footer and flushes the underlying output without fsync.
    pub fn finish(mut self) -> Result<W> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(FOOTER_MAGIC)?;
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Validates a framed file and returns its body.
pub fn verify_checksummed<'a>(data: &'a [u8], magic: u32, name: &str) -> Result<&'a [u8]> {
    if data.len() < HEADER_LEN + FOOTER_LEN {
        return Err(XiphosError::corruption(format!(
            "{name}: file too short ({} bytes)",
            data.len()
        )));
    }

    let found_magic = LittleEndian::read_u32(&data[..4]);
    if found_magic != magic {
        return Err(XiphosError::corruption(format!(
            "{name}: bad magic {found_magic:#x}, expected {magic:#x}"
        )));
    }
    if data[4] != FORMAT_VERSION {
        return Err(XiphosError::corruption(format!(
            "{name}: unsupported format version {}",
            data[4]
        )));
    }

    let footer = data.len() - FOOTER_LEN;
    if LittleEndian::read_u32(&data[footer..footer + 4]) != FOOTER_MAGIC {
        return Err(XiphosError::corruption(format!("{name}: missing footer")));
    }
    let expected = LittleEndian::read_u32(&data[footer + 4..]);
    let actual = crc32fast::hash(&data[..footer]);
    if expected != actual {
        return Err(XiphosError::corruption(format!(
            "{name}: checksum mismatch (stored {expected:#010x}, computed {actual:#010x})"
        )));
    }

    Ok(&data[HEADER_LEN..footer])
}

/// Writes `body` as a framed file in one go.
pub fn write_checksummed(storage: &dyn Storage, name: &str, magic: u32, body: &[u8]) -> Result<()> {
    let output = storage.create_output(name)?;
    let mut writer = StructWriter::new(output, magic)?;
    writer.write_raw(body)?;
    writer.finish()?;
    Ok(())
}

/// Loads a framed file and returns its body as a shared view, without copying.
pub fn read_checksummed_bytes(storage: &dyn Storage, name: &str, magic: u32) -> Result<OwnedBytes> {
    let data = storage.read_all(name)?;
    verify_checksummed(&data, magic, name)?;
    let end = data.len() - FOOTER_LEN;
    Ok(OwnedBytes::new(data).slice(HEADER_LEN..end))
}

/// Loads a framed file and returns an owned copy of its body.
pub fn read_checksummed(storage: &dyn Storage, name: &str, magic: u32) -> Result<Vec<u8>> {
    let data = storage.read_all(name)?;
    Ok(verify_checksummed(&data, magic, name)?.to_vec())
}
