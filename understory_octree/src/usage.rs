// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shape diagnostics.
//!
//! A [`Usage`] report is informational only. Its [`Display`](fmt::Display)
//! form is meant for logs and terminals, and its layout may change.

use core::fmt;

use crate::arena::ArenaStats;
use crate::flags::BackendKind;
use crate::index::State;

/// Occupancy of a hashed root table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Buckets holding at least one leaf.
    pub occupied: usize,
    /// Buckets in the table.
    pub total: usize,
    /// Leaves in the fullest bucket.
    pub fullest: usize,
}

/// Distribution of leaves in a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Shape {
    /// Leaves (chained duplicates included) per depth; index 0 is the root level.
    pub leaves_per_depth: Vec<usize>,
    /// Bucket occupancy, for hashed backends.
    pub buckets: Option<BucketStats>,
}

impl Shape {
    pub(crate) fn add_leaves(&mut self, depth: u32, n: usize) {
        let d = depth as usize;
        if self.leaves_per_depth.len() <= d {
            self.leaves_per_depth.resize(d + 1, 0);
        }
        self.leaves_per_depth[d] += n;
    }

    /// Total leaves counted.
    pub fn leaves(&self) -> usize {
        self.leaves_per_depth.iter().sum()
    }

    /// Deepest level holding a leaf.
    pub fn depth(&self) -> usize {
        self.leaves_per_depth
            .iter()
            .rposition(|&n| n > 0)
            .unwrap_or(0)
    }
}

/// How the leaves are currently stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    /// Mixed branch and leaf nodes in the build arena.
    Tree,
    /// Dense leaf array left by compaction.
    Packed {
        /// Whether the array is in Z-order.
        sorted: bool,
    },
}

/// Snapshot of an index's counters and memory layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Usage {
    /// Index name.
    pub name: String,
    /// Backend chosen at setup.
    pub backend: BackendKind,
    /// Lifecycle state.
    pub state: State,
    /// Leaf storage.
    pub storage: Storage,
    /// Points announced at setup.
    pub expected: usize,
    /// Leaves stored.
    pub leaves: usize,
    /// Inserts refused because the point was outside the domain.
    pub rejected: usize,
    /// Deepest insertion observed.
    pub max_depth: u32,
    /// Arena block occupancy.
    pub arena: ArenaStats,
    /// Leaf distribution.
    pub shape: Shape,
    /// Depth rows printed before the rest is folded into one row.
    pub max_print_depth: usize,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Building => "building",
            State::Closed => "closed",
        };
        let storage = match self.storage {
            Storage::Tree => "tree",
            Storage::Packed { sorted: false } => "packed",
            Storage::Packed { sorted: true } => "packed, sorted",
        };
        writeln!(f, "index `{}` ({}, {state}, {storage})", self.name, self.backend)?;
        writeln!(
            f,
            "  leaves: {} of {} expected, {} rejected, max depth {}",
            self.leaves, self.expected, self.rejected, self.max_depth
        )?;
        writeln!(
            f,
            "  arena: {} block(s), {}/{} items of {} bytes",
            self.arena.blocks.len(),
            self.arena.used(),
            self.arena.capacity(),
            self.arena.item_size
        )?;
        for (i, b) in self.arena.blocks.iter().enumerate() {
            writeln!(f, "    block {i}: {}/{}", b.used, b.capacity)?;
        }
        let rows = &self.shape.leaves_per_depth;
        if !rows.is_empty() {
            writeln!(f, "  depth  leaves")?;
            for (d, n) in rows.iter().enumerate().take(self.max_print_depth + 1) {
                writeln!(f, "  {d:>5}  {n:>6}")?;
            }
            let rest: usize = rows.iter().skip(self.max_print_depth + 1).sum();
            if rows.len() > self.max_print_depth + 1 {
                writeln!(f, "  {:>5}  {rest:>6}", format!(">{}", self.max_print_depth))?;
            }
        }
        if let Some(b) = self.shape.buckets {
            writeln!(
                f,
                "  buckets: {}/{} occupied, fullest holds {}",
                b.occupied, b.total, b.fullest
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::BlockStats;

    #[test]
    fn shape_counts_per_depth() {
        let mut s = Shape::default();
        s.add_leaves(2, 3);
        s.add_leaves(0, 1);
        s.add_leaves(2, 1);
        assert_eq!(s.leaves_per_depth, vec![1, 0, 4]);
        assert_eq!(s.leaves(), 5);
        assert_eq!(s.depth(), 2);
    }

    #[test]
    fn report_folds_deep_levels() {
        let usage = Usage {
            name: "cells".into(),
            backend: BackendKind::ZOrderHashed,
            state: State::Closed,
            storage: Storage::Tree,
            expected: 10,
            leaves: 9,
            rejected: 1,
            max_depth: 4,
            arena: ArenaStats {
                item_size: 48,
                blocks: vec![BlockStats {
                    capacity: 15,
                    used: 12,
                }],
            },
            shape: Shape {
                leaves_per_depth: vec![0, 2, 3, 3, 1],
                buckets: Some(BucketStats {
                    occupied: 3,
                    total: 64,
                    fullest: 5,
                }),
            },
            max_print_depth: 2,
        };
        let text = usage.to_string();
        let expected = "\
index `cells` (zorder-hashed, closed, tree)
  leaves: 9 of 10 expected, 1 rejected, max depth 4
  arena: 1 block(s), 12/15 items of 48 bytes
    block 0: 12/15
  depth  leaves
      0       0
      1       2
      2       3
     >2       4
  buckets: 3/64 occupied, fullest holds 5
";
        assert_eq!(text, expected);
    }
}
