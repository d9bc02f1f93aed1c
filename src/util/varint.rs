//! Variable-length integer encoding utilities.
//!
//! Unsigned LEB128 ("vbyte"): seven payload bits per byte, the high bit set on every
//! byte except the last. Postings doc-id gaps, frequencies and position deltas all use
//! this encoding.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, XiphosError};

/// Appends the vbyte encoding of `value` to `buf`, returning the number of bytes written.
pub fn push_u32(buf: &mut Vec<u8>, value: u32) -> usize {
    push_u64(buf, value as u64)
}

/// Appends the vbyte encoding of `value` to `buf`, returning the number of bytes written.
pub fn push_u64(buf: &mut Vec<u8>, value: u64) -> usize {
    let mut val = value;
    let mut written = 0;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf.push(byte);
        written += 1;

        if val == 0 {
            return written;
        }
    }
}

pub fn encode_u32(value: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5);
    push_u32(&mut bytes, value);
    bytes
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    push_u64(&mut bytes, value);
    bytes
}

/// Decodes a vbyte `u32` from the start of `bytes`, returning the value and bytes read.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    let value = u32::try_from(value).map_err(|_| XiphosError::corruption("VarInt overflow"))?;
    Ok((value, read))
}

/// Decodes a vbyte `u64` from the start of `bytes`, returning the value and bytes read.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return Err(XiphosError::corruption("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(XiphosError::corruption("Incomplete VarInt"))
}

pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 {
            return Err(XiphosError::corruption("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// Number of bytes the vbyte encoding of `value` occupies.
pub fn encoded_len(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        (64 - value.leading_zeros() as usize).div_ceil(7)
    }
}
