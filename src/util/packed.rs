//! Fixed-bit-width packed integer arrays.
//!
//! Values are stored back to back using exactly `bits_per_value` bits each, least
//! significant bit first, inside a little-endian byte stream padded with 8 spare bytes
//! so every value can be read with one unaligned 64-bit load.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, XiphosError};
use crate::util::bytes::OwnedBytes;

/// Bits needed to represent `max_value`.
pub fn bits_required(max_value: u64) -> u8 {
    (64 - max_value.leading_zeros()) as u8
}

/// Greatest common divisor, used to factor regularly spaced values out of a column.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Packs `values` with `bits` bits each.
pub fn pack(values: &[u64], bits: u8) -> Vec<u8> {
    let total_bits = values.len() * bits as usize;
    let mut out = vec![0u8; total_bits.div_ceil(8) + 8];
    if bits == 0 {
        return out;
    }

    for (i, &value) in values.iter().enumerate() {
        let bit_pos = i * bits as usize;
        let byte = bit_pos / 8;
        let shift = bit_pos % 8;
        let mut word = LittleEndian::read_u64(&out[byte..byte + 8]);
        word |= value << shift;
        LittleEndian::write_u64(&mut out[byte..byte + 8], word);
        // A 64-bit value shifted by up to 7 spills into the ninth byte.
        if bits as usize + shift > 64 {
            out[byte + 8] |= (value >> (64 - shift)) as u8;
        }
    }
    out
}

/// Random-access view over a packed array. The length is validated once on
/// construction so lookups never fail.
#[derive(Debug, Clone)]
pub struct PackedReader {
    data: OwnedBytes,
    bits: u8,
    len: usize,
}

impl PackedReader {
    pub fn new(data: OwnedBytes, bits: u8, len: usize) -> Result<Self> {
        let needed = (len * bits as usize).div_ceil(8) + 8;
        if bits > 64 || data.len() < needed {
            return Err(XiphosError::corruption(format!(
                "packed array of {len} x {bits} bits needs {needed} bytes, found {}",
                data.len()
            )));
        }
        Ok(PackedReader { data, bits, len })
    }

    /// Byte size of a packed array with the given shape.
    pub fn byte_len(bits: u8, len: usize) -> usize {
        (len * bits as usize).div_ceil(8) + 8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the value at `index`. Callers keep `index < len`.
    pub fn get(&self, index: usize) -> u64 {
        if self.bits == 0 || index >= self.len {
            return 0;
        }
        let bit_pos = index * self.bits as usize;
        let byte = bit_pos / 8;
        let shift = bit_pos % 8;
        let word = LittleEndian::read_u64(&self.data[byte..byte + 8]);
        let mut value = word >> shift;
        if self.bits as usize + shift > 64 {
            value |= (self.data[byte + 8] as u64) << (64 - shift);
        }
        if self.bits == 64 {
            value
        } else {
            value & ((1u64 << self.bits) - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 0);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u64::MAX), 64);
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(0, 10), 10);
        assert_eq!(gcd(1000, 250), 250);
        assert_eq!(gcd(7, 3), 1);
    }

    #[test]
    fn test_pack_odd_widths() {
        for bits in [1u8, 3, 7, 13, 33, 61, 64] {
            let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            let values: Vec<u64> = (0..100u64)
                .map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15) & mask)
                .collect();
            let packed = OwnedBytes::new(pack(&values, bits));
            let reader = PackedReader::new(packed, bits, values.len()).unwrap();
            for (i, v) in values.iter().enumerate() {
                assert_eq!(reader.get(i), *v, "bits={bits} index={i}");
            }
        }
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(PackedReader::new(OwnedBytes::new(vec![0u8; 4]), 8, 10).is_err());
    }
}
