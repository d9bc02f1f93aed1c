//! Shared low-level encoding utilities used by the segment codecs.

pub mod bytes;
pub mod cursor;
pub mod packed;
pub mod sortable;
pub mod varint;
