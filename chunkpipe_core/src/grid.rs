//! Hyperslab regions and chunk-grid arithmetic.

use crate::error::{Error, Result};

/// A rectangular subset of an array's index space: `count[d]` indices
/// starting at `start[d]` along every dimension `d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: Vec<u64>,
    pub count: Vec<u64>,
}

impl Region {
    pub fn new(start: impl Into<Vec<u64>>, count: impl Into<Vec<u64>>) -> Self {
        Self {
            start: start.into(),
            count: count.into(),
        }
    }

    /// The whole of an array with the given shape.
    pub fn full(shape: &[u64]) -> Self {
        Self::new(vec![0; shape.len()], shape.to_vec())
    }

    /// A single element.
    pub fn point(index: &[u64]) -> Self {
        Self::new(index.to_vec(), vec![1; index.len()])
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    pub fn num_elements(&self) -> u64 {
        self.count.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.count.iter().any(|&c| c == 0)
    }

    /// Exclusive end index along each dimension.
    pub fn end(&self) -> Vec<u64> {
        self.start
            .iter()
            .zip(&self.count)
            .map(|(&s, &c)| s.saturating_add(c))
            .collect()
    }

    /// Fails with `OutOfBounds` unless the region lies entirely inside `shape`.
    pub fn check_bounds(&self, shape: &[u64]) -> Result<()> {
        let in_bounds = self.start.len() == shape.len()
            && self.count.len() == shape.len()
            && self
                .start
                .iter()
                .zip(&self.count)
                .zip(shape)
                .all(|((&s, &c), &dim)| s.checked_add(c).is_some_and(|end| end <= dim));
        if in_bounds {
            Ok(())
        } else {
            Err(Error::OutOfBounds {
                start: self.start.clone(),
                count: self.count.clone(),
                shape: shape.to_vec(),
            })
        }
    }

    /// Overlap of two regions, `None` if they do not intersect.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let mut start = Vec::with_capacity(self.rank());
        let mut count = Vec::with_capacity(self.rank());
        for d in 0..self.rank() {
            let lo = self.start[d].max(other.start[d]);
            let hi = (self.start[d] + self.count[d]).min(other.start[d] + other.count[d]);
            if hi <= lo {
                return None;
            }
            start.push(lo);
            count.push(hi - lo);
        }
        Some(Region { start, count })
    }

    /// Chunk-grid coordinates of every chunk this region touches, in
    /// row-major order.
    pub fn chunks_intersecting(&self, chunk_shape: &[u64]) -> Vec<Vec<u64>> {
        if self.is_empty() {
            return Vec::new();
        }
        let first: Vec<u64> = self
            .start
            .iter()
            .zip(chunk_shape)
            .map(|(&s, &c)| s / c)
            .collect();
        let last: Vec<u64> = self
            .start
            .iter()
            .zip(&self.count)
            .zip(chunk_shape)
            .map(|((&s, &n), &c)| (s + n - 1) / c)
            .collect();
        let mut out = Vec::new();
        let mut cur = first.clone();
        loop {
            out.push(cur.clone());
            if !advance(&mut cur, &first, &last) {
                break;
            }
        }
        out
    }
}

/// Row-major odometer step over `[first, last]` inclusive; false when done.
fn advance(cur: &mut [u64], first: &[u64], last: &[u64]) -> bool {
    for d in (0..cur.len()).rev() {
        if cur[d] < last[d] {
            cur[d] += 1;
            return true;
        }
        cur[d] = first[d];
    }
    false
}

/// Region of logical index space covered by the chunk at `coords`
/// (full chunk shape, may extend past the array edge).
pub fn chunk_region(coords: &[u64], chunk_shape: &[u64]) -> Region {
    Region::new(
        coords
            .iter()
            .zip(chunk_shape)
            .map(|(&i, &c)| i * c)
            .collect::<Vec<_>>(),
        chunk_shape.to_vec(),
    )
}

/// Whether `coords` addresses a chunk inside a grid of `grid_shape`.
pub fn coords_in_grid(coords: &[u64], grid_shape: &[u64]) -> bool {
    coords.len() == grid_shape.len() && coords.iter().zip(grid_shape).all(|(&c, &g)| c < g)
}

/// Row-major strides in elements for a buffer of `shape`.
fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// A dense row-major buffer positioned somewhere in logical index space.
#[derive(Debug, Clone, Copy)]
pub struct BoxLayout<'a> {
    /// Logical index of the buffer's first element.
    pub origin: &'a [u64],
    /// Shape of the buffer.
    pub shape: &'a [u64],
}

/// Copy the elements of `window` (logical coordinates) from `src` to `dst`.
///
/// `window` must lie inside both layouts. Rows along the last dimension are
/// copied as contiguous runs.
pub fn copy_window(
    src: &[u8],
    src_layout: BoxLayout<'_>,
    dst: &mut [u8],
    dst_layout: BoxLayout<'_>,
    window: &Region,
    elem_size: usize,
) {
    let rank = window.rank();
    if window.is_empty() {
        return;
    }
    if rank == 0 {
        dst[..elem_size].copy_from_slice(&src[..elem_size]);
        return;
    }
    let src_strides = strides(src_layout.shape);
    let dst_strides = strides(dst_layout.shape);
    let run = window.count[rank - 1] as usize * elem_size;

    let first = vec![0u64; rank - 1];
    let last: Vec<u64> = window.count[..rank - 1].iter().map(|&c| c - 1).collect();
    let mut row = first.clone();
    loop {
        let mut src_off = 0u64;
        let mut dst_off = 0u64;
        for d in 0..rank {
            let idx = window.start[d] + if d < rank - 1 { row[d] } else { 0 };
            src_off += (idx - src_layout.origin[d]) * src_strides[d];
            dst_off += (idx - dst_layout.origin[d]) * dst_strides[d];
        }
        let s = src_off as usize * elem_size;
        let t = dst_off as usize * elem_size;
        dst[t..t + run].copy_from_slice(&src[s..s + run]);
        if !advance(&mut row, &first, &last) {
            break;
        }
    }
}
