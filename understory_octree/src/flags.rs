// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Setup and close flags, and backend selection.

use core::fmt;

bitflags::bitflags! {
    /// Flags applied when the index is set up.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SetupFlags: u32 {
        /// Force a cubic root box: every axis gets the span of the largest one.
        const CUBE            = 1 << 0;
        /// Round spans to `2^k - 1` so that every coordinate is exactly `k` bits.
        const POW2            = 1 << 1;
        /// Chain exact-duplicate points instead of returning the existing leaf.
        const KEEP_DUPLICATES = 1 << 2;
        /// Drop exact-duplicate points when the index is compacted on close.
        const DROP_DUPLICATES = 1 << 3;
        /// Insert the coordinate buffer given to the builder right away.
        const BULK_INSERT     = 1 << 4;
        /// Skip the domain check: out-of-range points are clamped into the root box.
        const NO_DOMAIN_CHECK = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Flags applied by [`PointIndex::close`](crate::PointIndex::close).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct CloseFlags: u32 {
        /// Repack the arena into a dense leaf array, discarding interior nodes.
        const COMPACT       = 1 << 0;
        /// Sort the dense array in Z-order. Implies [`CloseFlags::COMPACT`].
        const SORT          = 1 << 1;
        /// While compacting, keep only the first-inserted leaf of each exact duplicate run.
        const NO_DUPLICATES = 1 << 2;
    }
}

/// Spatial strategy used while the index is being built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Octree descending by geometric box bisection.
    #[default]
    Geometric,
    /// Octree descending by interleaved coordinate bits.
    Morton,
    /// Morton octree over power-of-two spans.
    MortonAligned,
    /// Bucket table indexed by the high Z-order bits, each bucket rooting a Morton sub-tree.
    ZOrderHashed,
    /// Z-order hashed table over power-of-two spans.
    ZOrderHashedAligned,
    /// Leaves kept in a Z-order sorted run, queried by binary search.
    Sorted,
    /// Reserved; rejected at setup.
    KdTree,
}

impl BackendKind {
    /// Whether the backend requires power-of-two spans.
    pub const fn is_aligned(self) -> bool {
        matches!(self, Self::MortonAligned | Self::ZOrderHashedAligned)
    }

    /// Whether the backend roots its trees in a bucket table.
    pub const fn is_hashed(self) -> bool {
        matches!(self, Self::ZOrderHashed | Self::ZOrderHashedAligned)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Geometric => "geometric",
            Self::Morton => "morton",
            Self::MortonAligned => "morton-aligned",
            Self::ZOrderHashed => "zorder-hashed",
            Self::ZOrderHashedAligned => "zorder-hashed-aligned",
            Self::Sorted => "sorted",
            Self::KdTree => "kd-tree",
        };
        f.write_str(name)
    }
}
