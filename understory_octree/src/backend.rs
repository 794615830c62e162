// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backend traits for the point stores, and the pieces they share.
//!
//! A store answers three kinds of lookups on index-space keys:
//!
//! - `exact`: the leaf whose key equals the query key.
//! - `approximate`: some leaf close to the query, found in time bounded by the depth.
//! - `nearest`: every leaf that may beat the running best is offered to a [`Nearest`].
//!
//! Stores that can still grow also implement [`Insert`].

use core::fmt::Debug;

use crate::arena::{Arena, ArenaStats, ItemRef};
use crate::error::ArenaError;
use crate::node::{Chain, Leaf, Node};
use crate::transform::Transform;
use crate::types::{UBox, UPoint, dist2};
use crate::usage::Shape;

/// Query side of a point store.
pub(crate) trait Backend<P: Copy + Debug> {
    /// Leaf with exactly this key (the first inserted one for duplicates).
    fn exact(&self, key: UPoint) -> Option<&Leaf<P>>;

    /// A leaf near `key`, not necessarily the nearest.
    fn approximate(&self, key: UPoint) -> Option<&Leaf<P>>;

    /// Offer every leaf that may improve on `best`.
    fn nearest<'a>(&'a self, best: &mut Nearest<'a, P>);

    /// Leaves per depth and bucket occupancy.
    fn shape(&self) -> Shape;

    /// Arena block occupancy.
    fn arena_stats(&self) -> ArenaStats;
}

/// Build side of a point store.
pub(crate) trait Insert<P: Copy + Debug>: Backend<P> {
    /// Place `leaf`. Exact key repeats either return the existing head or,
    /// with `keep_duplicates`, get chained behind it.
    fn insert(&mut self, leaf: Leaf<P>, keep_duplicates: bool) -> Result<Placed, ArenaError>;

    /// Node storage, in allocation order.
    fn nodes(&self) -> &Arena<Node<P>>;
}

/// Outcome of [`Insert::insert`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Placed {
    pub(crate) leaf: ItemRef,
    pub(crate) depth: u32,
    pub(crate) created: bool,
}

/// How a tree cell is split into octants.
pub(crate) trait Subdivision: Copy + Debug {
    /// Per-node cell descriptor, recomputed on the way down.
    type Cell: Copy + Debug;

    /// Cell of the root node.
    fn root(&self) -> Self::Cell;

    /// Cell of a hash bucket, given its coordinates in the bucket grid.
    fn bucket(&self, coord: UPoint, hash_bits: u32) -> Self::Cell;

    /// Octant of `cell` that `key` descends into.
    fn octant(&self, cell: &Self::Cell, key: UPoint) -> u8;

    /// Narrow `cell` to one octant.
    fn child(&self, cell: &Self::Cell, octant: u8) -> Self::Cell;

    /// Index-space bounds of `cell`, for pruning.
    fn bounds(&self, cell: &Self::Cell) -> UBox;
}

/// Bisection of the inclusive box at its midpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Geometric {
    root: UBox,
    bits: u32,
}

impl Geometric {
    pub(crate) fn new(transform: &Transform) -> Self {
        Self {
            root: transform.root_box(),
            bits: transform.bit_width(),
        }
    }
}

impl Subdivision for Geometric {
    type Cell = UBox;

    fn root(&self) -> UBox {
        self.root
    }

    fn bucket(&self, coord: UPoint, hash_bits: u32) -> UBox {
        let shift = self.bits - hash_bits;
        let mut b = self.root;
        for a in 0..3 {
            b.min[a] = coord[a] << shift;
            b.max[a] = (b.min[a] | ((1 << shift) - 1)).min(self.root.max[a]);
        }
        b
    }

    #[inline]
    fn octant(&self, cell: &UBox, key: UPoint) -> u8 {
        cell.octant_of(key)
    }

    #[inline]
    fn child(&self, cell: &UBox, octant: u8) -> UBox {
        cell.child(octant)
    }

    #[inline]
    fn bounds(&self, cell: &UBox) -> UBox {
        *cell
    }
}

/// Bit-interleaved descent: level `l` splits on bit `l - 1` of every axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Morton {
    bits: u32,
}

/// Aligned Morton cell: `2^level` keys per axis starting at `base`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MortonCell {
    base: UPoint,
    level: u32,
}

impl Morton {
    pub(crate) fn new(transform: &Transform) -> Self {
        Self {
            bits: transform.bit_width(),
        }
    }
}

impl Subdivision for Morton {
    type Cell = MortonCell;

    fn root(&self) -> MortonCell {
        MortonCell {
            base: [0; 3],
            level: self.bits,
        }
    }

    fn bucket(&self, coord: UPoint, hash_bits: u32) -> MortonCell {
        let level = self.bits - hash_bits;
        MortonCell {
            base: coord.map(|c| c << level),
            level,
        }
    }

    #[inline]
    fn octant(&self, cell: &MortonCell, key: UPoint) -> u8 {
        debug_assert!(cell.level > 0, "descent below a single-key cell");
        let bit = cell.level - 1;
        (0..3).fold(0, |o, a| o | (u8::from((key[a] >> bit) & 1 == 1) << a))
    }

    #[inline]
    fn child(&self, cell: &MortonCell, octant: u8) -> MortonCell {
        let bit = cell.level - 1;
        let mut base = cell.base;
        for (a, b) in base.iter_mut().enumerate() {
            if octant & (1 << a) != 0 {
                *b |= 1 << bit;
            }
        }
        MortonCell { base, level: bit }
    }

    #[inline]
    fn bounds(&self, cell: &MortonCell) -> UBox {
        let extent = (1_u32 << cell.level) - 1;
        UBox::new(cell.base, cell.base.map(|b| b + extent))
    }
}

/// Running nearest-neighbour state.
///
/// The first candidate is accepted when it lies within the initial limit, every
/// later one only when strictly closer than the current best. Candidates of equal
/// distance therefore resolve to whichever was offered first.
pub(crate) struct Nearest<'a, P> {
    transform: &'a Transform,
    real: [f64; 3],
    key: UPoint,
    limit2: f64,
    range: Option<UBox>,
    clamped: bool,
    best: Option<&'a Leaf<P>>,
}

impl<'a, P: Copy + Debug> Nearest<'a, P> {
    /// Start a search around `real` (whose key is `key`) bounded by `radius`.
    pub(crate) fn new(transform: &'a Transform, real: [f64; 3], key: UPoint, radius: f64) -> Self {
        let mut n = Self {
            transform,
            real,
            key,
            limit2: radius * radius,
            range: None,
            clamped: false,
            best: None,
        };
        n.update_range();
        n
    }

    /// Search over leaves whose keys were clamped into the root box.
    ///
    /// Their real coordinates may lie outside the extents, so cells are only
    /// pruned by key range, never by real-space distance.
    pub(crate) fn clamped(mut self) -> Self {
        self.clamped = true;
        self.update_range();
        self
    }

    pub(crate) fn key(&self) -> UPoint {
        self.key
    }

    /// Index-space box that still holds every possible improvement.
    pub(crate) fn range(&self) -> Option<UBox> {
        self.range
    }

    fn update_range(&mut self) {
        let span = self.transform.span();
        let radius = self.limit2.sqrt();
        let range = if self.clamped {
            self.transform.range_box_clamped(self.real, radius)
        } else {
            self.transform.range_box(self.real, radius)
        };
        // One unit of slack absorbs rounding in the radius.
        self.range = range.map(|r| {
            UBox::new(
                r.min.map(|v| v.saturating_sub(1)),
                [0, 1, 2].map(|a| r.max[a].saturating_add(1).min(span[a])),
            )
        });
    }

    /// Whether a cell with these bounds may hold an improvement.
    #[inline]
    pub(crate) fn admits(&self, bounds: &UBox) -> bool {
        match &self.range {
            Some(r) => {
                r.overlaps(bounds)
                    && (self.clamped
                        || self.transform.box_dist2(self.real, bounds) <= self.limit2)
            }
            None => false,
        }
    }

    /// Whether a leaf with this key may be an improvement.
    #[inline]
    pub(crate) fn admits_key(&self, key: UPoint) -> bool {
        self.range.is_some_and(|r| r.contains(key))
    }

    /// Offer one candidate; returns whether it became the best.
    pub(crate) fn offer(&mut self, leaf: &'a Leaf<P>) -> bool {
        let d2 = dist2(self.real, leaf.real);
        let accept = if self.best.is_some() {
            d2 < self.limit2
        } else {
            d2 <= self.limit2
        };
        if accept {
            self.best = Some(leaf);
            if d2 < self.limit2 {
                self.limit2 = d2;
                self.update_range();
            }
        }
        accept
    }

    /// Offer every leaf of the chain starting at `head`.
    pub(crate) fn offer_chain(&mut self, nodes: &'a Arena<Node<P>>, head: ItemRef) {
        for (_, leaf) in Chain::new(nodes, head) {
            self.offer(leaf);
        }
    }

    pub(crate) fn into_best(self) -> Option<&'a Leaf<P>> {
        self.best
    }
}
