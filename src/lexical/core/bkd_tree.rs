//! Block k-d tree over fixed-width byte keys.
//!
//! Points are `(packed value, doc)` pairs where the packed value concatenates one
//! big-endian comparable key per dimension (k = 1 for numbers and dates, k = 2 for
//! geo points). The tree is built in bulk: the point set is split recursively at the
//! median of the dimension with the largest spread until each leaf holds at most
//! `max_leaf_points`. Interior nodes are stored heap-ordered (children of `n` are
//! `2n` and `2n + 1`), so the tree is one flat buffer without pointers.
//!
//! ```text
//! u8 dims | u8 bytes_per_dim | u32 num_leaves | u32 max_leaf | u64 count | min | max
//! (u8 split_dim, split value) for nodes 1..num_leaves
//! (u32 offset, u32 count) per leaf
//! leaf blocks: (packed value, u32 doc) * count
//! ```

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Result, XiphosError};
use crate::util::bytes::OwnedBytes;
use crate::util::cursor::{BufWriteExt, ByteCursor};

pub const DEFAULT_MAX_LEAF_POINTS: usize = 512;

/// Upper bound accepted for the leaf size.
pub const MAX_LEAF_POINTS: usize = 1024;

/// Bulk builder for one field's points.
#[derive(Debug, Clone)]
pub struct BkdWriter {
    dims: usize,
    bytes_per_dim: usize,
    max_leaf_points: usize,
    points: Vec<(Vec<u8>, u32)>,
}

impl BkdWriter {
    pub fn new(dims: usize, bytes_per_dim: usize) -> Result<Self> {
        if !(1..=2).contains(&dims) || bytes_per_dim == 0 || bytes_per_dim > 16 {
            return Err(XiphosError::index(format!(
                "unsupported point shape: {dims} dims x {bytes_per_dim} bytes"
            )));
        }
        Ok(BkdWriter {
            dims,
            bytes_per_dim,
            max_leaf_points: DEFAULT_MAX_LEAF_POINTS,
            points: Vec::new(),
        })
    }

    pub fn with_max_leaf_points(mut self, max_leaf_points: usize) -> Self {
        self.max_leaf_points = max_leaf_points.clamp(1, MAX_LEAF_POINTS);
        self
    }

    pub fn add(&mut self, value: Vec<u8>, doc: u32) -> Result<()> {
        if value.len() != self.dims * self.bytes_per_dim {
            return Err(XiphosError::index(format!(
                "point value has {} bytes, expected {}",
                value.len(),
                self.dims * self.bytes_per_dim
            )));
        }
        self.points.push((value, doc));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn dim<'v>(&self, value: &'v [u8], dim: usize) -> &'v [u8] {
        &value[dim * self.bytes_per_dim..(dim + 1) * self.bytes_per_dim]
    }

    /// Dimension with the largest spread across `points`.
    fn split_dim(&self, points: &[(Vec<u8>, u32)]) -> usize {
        if self.dims == 1 {
            return 0;
        }
        (0..self.dims)
            .map(|d| {
                let (lo, hi) = points.iter().fold((u128::MAX, 0u128), |(lo, hi), (v, _)| {
                    let key = prefix_u128(self.dim(v, d));
                    (lo.min(key), hi.max(key))
                });
                (d, hi.saturating_sub(lo))
            })
            .max_by_key(|(_, spread)| *spread)
            .map(|(d, _)| d)
            .unwrap_or(0)
    }

    fn build_node(
        &self,
        node: usize,
        num_leaves: usize,
        points: &mut [(Vec<u8>, u32)],
        splits: &mut [(u8, Vec<u8>)],
        leaves: &mut [Vec<(Vec<u8>, u32)>],
    ) {
        if node >= num_leaves {
            leaves[node - num_leaves] = points.to_vec();
            return;
        }
        let dim = self.split_dim(points);
        points.sort_by(|a, b| self.dim(&a.0, dim).cmp(self.dim(&b.0, dim)));
        let mid = points.len().div_ceil(2);
        let split_value = points
            .get(mid)
            .or_else(|| points.last())
            .map(|(v, _)| self.dim(v, dim).to_vec())
            .unwrap_or_else(|| vec![0; self.bytes_per_dim]);
        splits[node] = (dim as u8, split_value);

        let (left, right) = points.split_at_mut(mid);
        self.build_node(2 * node, num_leaves, left, splits, leaves);
        self.build_node(2 * node + 1, num_leaves, right, splits, leaves);
    }

    pub fn finish(mut self) -> Vec<u8> {
        let packed_len = self.dims * self.bytes_per_dim;
        let leaves_needed = self.points.len().div_ceil(self.max_leaf_points).max(1);
        let num_leaves = leaves_needed.next_power_of_two();

        let mut min = vec![0u8; packed_len];
        let mut max = vec![0u8; packed_len];
        for d in 0..self.dims {
            let range = d * self.bytes_per_dim..(d + 1) * self.bytes_per_dim;
            if let Some(lo) = self.points.iter().map(|(v, _)| &v[range.clone()]).min() {
                min[range.clone()].copy_from_slice(lo);
            }
            if let Some(hi) = self.points.iter().map(|(v, _)| &v[range.clone()]).max() {
                max[range.clone()].copy_from_slice(hi);
            }
        }

        let mut points = std::mem::take(&mut self.points);
        let mut splits = vec![(0u8, Vec::new()); num_leaves];
        let mut leaves = vec![Vec::new(); num_leaves];
        self.build_node(1, num_leaves, &mut points, &mut splits, &mut leaves);

        let mut out = Vec::new();
        out.put_u8(self.dims as u8);
        out.put_u8(self.bytes_per_dim as u8);
        out.put_u32(num_leaves as u32);
        out.put_u32(self.max_leaf_points as u32);
        out.put_u64(points.len() as u64);
        out.extend_from_slice(&min);
        out.extend_from_slice(&max);
        for (dim, value) in splits.iter().skip(1) {
            out.put_u8(*dim);
            out.extend_from_slice(value);
        }
        let mut offset = 0u32;
        for leaf in &leaves {
            out.put_u32(offset);
            out.put_u32(leaf.len() as u32);
            offset += (leaf.len() * (packed_len + 4)) as u32;
        }
        for leaf in &leaves {
            for (value, doc) in leaf {
                out.extend_from_slice(value);
                out.put_u32(*doc);
            }
        }
        out
    }
}

/// First 16 bytes of a key as a big-endian integer, for spread comparisons.
fn prefix_u128(key: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    let n = key.len().min(16);
    buf[..n].copy_from_slice(&key[..n]);
    BigEndian::read_u128(&buf)
}

/// Read side of a BKD tree.
#[derive(Debug, Clone)]
pub struct BkdTree {
    data: OwnedBytes,
    dims: usize,
    bytes_per_dim: usize,
    num_leaves: usize,
    count: u64,
    min: Vec<u8>,
    max: Vec<u8>,
    splits_start: usize,
    leaf_table_start: usize,
    leaf_data_start: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Outside,
    Inside,
    Crosses,
}

impl BkdTree {
    pub fn open(data: OwnedBytes) -> Result<Self> {
        let mut cursor = ByteCursor::new(&data);
        let dims = cursor.read_u8()? as usize;
        let bytes_per_dim = cursor.read_u8()? as usize;
        let num_leaves = cursor.read_u32()? as usize;
        let _max_leaf = cursor.read_u32()?;
        let count = cursor.read_u64()?;
        if dims == 0 || bytes_per_dim == 0 || !num_leaves.is_power_of_two() {
            return Err(XiphosError::corruption(format!(
                "invalid BKD header: {dims} dims, {bytes_per_dim} bytes, {num_leaves} leaves"
            )));
        }
        let packed_len = dims * bytes_per_dim;
        let min = cursor.read_bytes(packed_len)?.to_vec();
        let max = cursor.read_bytes(packed_len)?.to_vec();
        let splits_start = cursor.position();
        cursor.read_bytes((num_leaves - 1) * (1 + bytes_per_dim))?;
        let leaf_table_start = cursor.position();
        cursor.read_bytes(num_leaves * 8)?;
        let leaf_data_start = cursor.position();
        if (data.len() - leaf_data_start) as u64 != count * (packed_len as u64 + 4) {
            return Err(XiphosError::corruption("BKD leaf blocks do not match point count"));
        }

        Ok(BkdTree {
            data,
            dims,
            bytes_per_dim,
            num_leaves,
            count,
            min,
            max,
            splits_start,
            leaf_table_start,
            leaf_data_start,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn bytes_per_dim(&self) -> usize {
        self.bytes_per_dim
    }

    /// Total number of indexed points.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min_packed(&self) -> &[u8] {
        &self.min
    }

    pub fn max_packed(&self) -> &[u8] {
        &self.max
    }

    fn packed_len(&self) -> usize {
        self.dims * self.bytes_per_dim
    }

    fn split(&self, node: usize) -> (usize, &[u8]) {
        let at = self.splits_start + (node - 1) * (1 + self.bytes_per_dim);
        (
            self.data[at] as usize,
            &self.data[at + 1..at + 1 + self.bytes_per_dim],
        )
    }

    fn leaf_points(&self, leaf: usize) -> impl Iterator<Item = (&[u8], u32)> + '_ {
        let at = self.leaf_table_start + leaf * 8;
        let offset = LittleEndian::read_u32(&self.data[at..at + 4]) as usize;
        let count = LittleEndian::read_u32(&self.data[at + 4..at + 8]) as usize;
        let stride = self.packed_len() + 4;
        let start = self.leaf_data_start + offset;
        (0..count).filter_map(move |i| {
            let p = start + i * stride;
            let value = self.data.get(p..p + self.packed_len())?;
            let doc = self.data.get(p + self.packed_len()..p + stride)?;
            Some((value, LittleEndian::read_u32(doc)))
        })
    }

    fn dim<'v>(&self, value: &'v [u8], dim: usize) -> &'v [u8] {
        &value[dim * self.bytes_per_dim..(dim + 1) * self.bytes_per_dim]
    }

    fn relate(&self, cell_min: &[u8], cell_max: &[u8], min: &[u8], max: &[u8]) -> Relation {
        let mut inside = true;
        for d in 0..self.dims {
            if self.dim(cell_min, d) > self.dim(max, d) || self.dim(cell_max, d) < self.dim(min, d) {
                return Relation::Outside;
            }
            if self.dim(cell_min, d) < self.dim(min, d) || self.dim(cell_max, d) > self.dim(max, d) {
                inside = false;
            }
        }
        if inside { Relation::Inside } else { Relation::Crosses }
    }

    fn contains(&self, value: &[u8], min: &[u8], max: &[u8]) -> bool {
        (0..self.dims).all(|d| {
            let v = self.dim(value, d);
            v.cmp(self.dim(min, d)) != Ordering::Less && v.cmp(self.dim(max, d)) != Ordering::Greater
        })
    }

    /// Calls `visit` with the doc of every point inside the inclusive box
    /// `[min, max]`. A document with several values may be visited more than once.
    pub fn range_query(&self, min: &[u8], max: &[u8], visit: &mut dyn FnMut(u32)) -> Result<()> {
        if min.len() != self.packed_len() || max.len() != self.packed_len() {
            return Err(XiphosError::query(format!(
                "range bounds must be {} bytes",
                self.packed_len()
            )));
        }
        if self.count == 0 {
            return Ok(());
        }
        let mut cell_min = self.min.clone();
        let mut cell_max = self.max.clone();
        self.visit_node(1, &mut cell_min, &mut cell_max, min, max, visit);
        Ok(())
    }

    fn visit_node(
        &self,
        node: usize,
        cell_min: &mut [u8],
        cell_max: &mut [u8],
        min: &[u8],
        max: &[u8],
        visit: &mut dyn FnMut(u32),
    ) {
        match self.relate(cell_min, cell_max, min, max) {
            Relation::Outside => {}
            Relation::Inside => self.visit_all(node, visit),
            Relation::Crosses if node >= self.num_leaves => {
                for (value, doc) in self.leaf_points(node - self.num_leaves) {
                    if self.contains(value, min, max) {
                        visit(doc);
                    }
                }
            }
            Relation::Crosses => {
                let (dim, split) = self.split(node);
                let split = split.to_vec();
                let range = dim * self.bytes_per_dim..(dim + 1) * self.bytes_per_dim;

                let saved_max = cell_max[range.clone()].to_vec();
                cell_max[range.clone()].copy_from_slice(&split);
                self.visit_node(2 * node, cell_min, cell_max, min, max, visit);
                cell_max[range.clone()].copy_from_slice(&saved_max);

                let saved_min = cell_min[range.clone()].to_vec();
                cell_min[range.clone()].copy_from_slice(&split);
                self.visit_node(2 * node + 1, cell_min, cell_max, min, max, visit);
                cell_min[range].copy_from_slice(&saved_min);
            }
        }
    }

    fn visit_all(&self, node: usize, visit: &mut dyn FnMut(u32)) {
        if node >= self.num_leaves {
            for (_, doc) in self.leaf_points(node - self.num_leaves) {
                visit(doc);
            }
        } else {
            self.visit_all(2 * node, visit);
            self.visit_all(2 * node + 1, visit);
        }
    }

    /// Every `(packed value, doc)` pair, leaf by leaf.
    pub fn points(&self) -> impl Iterator<Item = (&[u8], u32)> + '_ {
        (0..self.num_leaves).flat_map(move |leaf| self.leaf_points(leaf))
    }
}
