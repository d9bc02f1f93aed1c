//! Order-preserving fixed-width keys for numeric values.
//!
//! Point trees compare keys as unsigned big-endian bytes, and doc values store floats
//! as integers. These conversions keep the numeric order in both representations.

/// Maps an `i64` to a `u64` with the same ordering.
pub fn i64_to_sortable_u64(value: i64) -> u64 {
    (value as u64) ^ (1u64 << 63)
}

pub fn sortable_u64_to_i64(value: u64) -> i64 {
    (value ^ (1u64 << 63)) as i64
}

/// Maps an `f64` to an `i64` with the same total ordering (`-0.0 < 0.0`, NaN last).
pub fn f64_to_sortable_i64(value: f64) -> i64 {
    let bits = value.to_bits() as i64;
    bits ^ ((bits >> 63) & 0x7fff_ffff_ffff_ffff)
}

pub fn sortable_i64_to_f64(value: i64) -> f64 {
    let bits = value ^ ((value >> 63) & 0x7fff_ffff_ffff_ffff);
    f64::from_bits(bits as u64)
}

/// Big-endian comparable key for an integer dimension.
pub fn encode_i64(value: i64) -> [u8; 8] {
    i64_to_sortable_u64(value).to_be_bytes()
}

pub fn decode_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    sortable_u64_to_i64(u64::from_be_bytes(buf))
}

/// Big-endian comparable key for a floating point dimension.
pub fn encode_f64(value: f64) -> [u8; 8] {
    encode_i64(f64_to_sortable_i64(value))
}

pub fn decode_f64(bytes: &[u8]) -> f64 {
    sortable_i64_to_f64(decode_i64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keys_keep_order() {
        let values = [i64::MIN, -1000, -1, 0, 1, 42, i64::MAX];
        for pair in values.windows(2) {
            assert!(encode_i64(pair[0]) < encode_i64(pair[1]));
        }
        for v in values {
            assert_eq!(decode_i64(&encode_i64(v)), v);
        }
    }

    #[test]
    fn test_float_keys_keep_order() {
        let values = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-300, 3.75, f64::INFINITY];
        for pair in values.windows(2) {
            assert!(encode_f64(pair[0]) < encode_f64(pair[1]), "{pair:?}");
            assert!(f64_to_sortable_i64(pair[0]) < f64_to_sortable_i64(pair[1]));
        }
        assert_eq!(decode_f64(&encode_f64(-2.5)), -2.5);
    }
}
