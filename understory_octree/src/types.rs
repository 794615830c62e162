// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and helpers.

use core::cmp::Ordering;

/// A point in index space: one unsigned fixed-point coordinate per axis.
pub type UPoint = [u32; 3];

/// Octant visiting order relative to the octant that contains the query point.
///
/// XOR-ing the query octant with these masks visits the query octant first,
/// then the three face neighbours, the three edge neighbours, and the opposite
/// corner last.
pub(crate) const VISIT_ORDER: [u8; 8] = [0, 1, 2, 4, 3, 5, 6, 7];

/// Inclusive axis-aligned box in index space.
///
/// Boxes are never stored per node; they are recomputed while descending.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct UBox {
    /// Minimum corner (inclusive).
    pub min: UPoint,
    /// Maximum corner (inclusive).
    pub max: UPoint,
}

impl UBox {
    /// Create a box from its corners.
    pub const fn new(min: UPoint, max: UPoint) -> Self {
        Self { min, max }
    }

    /// The root box `[0, span]` on every axis.
    pub const fn from_span(span: UPoint) -> Self {
        Self {
            min: [0; 3],
            max: span,
        }
    }

    /// Per-axis midpoint, computed without overflowing `u32`.
    #[inline]
    pub fn mid(&self) -> UPoint {
        [0, 1, 2].map(|a| self.min[a] + (self.max[a] - self.min[a]) / 2)
    }

    /// Whether the point lies inside the box.
    #[inline]
    pub fn contains(&self, p: UPoint) -> bool {
        (0..3).all(|a| self.min[a] <= p[a] && p[a] <= self.max[a])
    }

    /// Whether two boxes share at least one index-space point.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        (0..3).all(|a| self.min[a] <= other.max[a] && other.min[a] <= self.max[a])
    }

    /// True if the box is inverted on any axis.
    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|a| self.max[a] < self.min[a])
    }

    /// Octant code of `p`: bit `a` is set when `p` lies in the high half of axis `a`.
    ///
    /// The midpoint itself belongs to the low half.
    #[inline]
    pub fn octant_of(&self, p: UPoint) -> u8 {
        let mid = self.mid();
        (0..3).fold(0, |o, a| o | (u8::from(p[a] > mid[a]) << a))
    }

    /// Narrow the box to one octant: low halves are `[min, mid]`, high halves `[mid + 1, max]`.
    #[inline]
    pub fn child(&self, octant: u8) -> Self {
        let mid = self.mid();
        let mut out = *self;
        for a in 0..3 {
            if octant & (1 << a) != 0 {
                out.min[a] = mid[a] + 1;
            } else {
                out.max[a] = mid[a];
            }
        }
        out
    }
}

/// Real-space axis-aligned extents of the indexed domain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Extents {
    /// Minimum corner.
    pub min: [f64; 3],
    /// Maximum corner.
    pub max: [f64; 3],
}

impl Extents {
    /// Create extents from min/max corners.
    pub const fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// The tightest extents containing every point, or `None` for an empty set.
    pub fn from_points(points: impl IntoIterator<Item = [f64; 3]>) -> Option<Self> {
        let mut it = points.into_iter();
        let first = it.next()?;
        Some(it.fold(Self::new(first, first), |mut e, p| {
            for a in 0..3 {
                e.min[a] = e.min[a].min(p[a]);
                e.max[a] = e.max[a].max(p[a]);
            }
            e
        }))
    }

    /// Per-axis size (`max - min`).
    pub fn size(&self) -> [f64; 3] {
        [0, 1, 2].map(|a| self.max[a] - self.min[a])
    }

    /// True when all bounds are finite and `min <= max` on every axis.
    pub fn is_valid(&self) -> bool {
        (0..3).all(|a| {
            self.min[a].is_finite() && self.max[a].is_finite() && self.min[a] <= self.max[a]
        })
    }
}

/// Squared Euclidean distance between two real-space points.
#[inline]
pub fn dist2(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Three-way Z-order comparison of two index-space points.
///
/// Axes are compared most-significant-bit first, with `z` above `y` above `x`
/// inside each bit level (the same layout as the octant code). No interleaved
/// key is materialized.
pub fn morton_cmp(a: UPoint, b: UPoint) -> Ordering {
    // `x < y` and `x` has a lower highest-set-bit than `y`.
    fn less_msb(x: u32, y: u32) -> bool {
        x < y && x < (x ^ y)
    }

    let mut axis = 2;
    let mut top = a[2] ^ b[2];
    for candidate in [1, 0] {
        let diff = a[candidate] ^ b[candidate];
        if less_msb(top, diff) {
            axis = candidate;
            top = diff;
        }
    }
    a[axis].cmp(&b[axis])
}

/// Interleave the low `bits` bits of a cell coordinate into a Z-order index.
#[inline]
pub(crate) fn interleave(cell: UPoint, bits: u32) -> usize {
    let mut out = 0_usize;
    for i in 0..bits {
        for (a, c) in cell.iter().enumerate() {
            out |= (((c >> i) & 1) as usize) << (3 * i as usize + a);
        }
    }
    out
}
