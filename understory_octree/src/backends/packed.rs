// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dense leaf array produced by compaction on close.

use core::fmt::{self, Debug};
use std::collections::HashSet;

use crate::arena::{Arena, ArenaStats};
use crate::backend::{Backend, Nearest};
use crate::backends::sorted::{self, SortedLeaves, closest_key};
use crate::node::{Leaf, Node};
use crate::types::{UPoint, morton_cmp};
use crate::usage::Shape;

/// Read-only leaves, optionally in Z-order.
pub(crate) struct Packed<P> {
    leaves: Arena<Leaf<P>>,
    sorted: bool,
}

impl<P: Copy + Debug> Packed<P> {
    /// Drop interior nodes and chain links from `nodes`, keeping leaves in
    /// allocation order.
    ///
    /// With `dedup` only the first leaf of each key survives. With `sort` the
    /// survivors are stably sorted by key.
    pub(crate) fn from_nodes(nodes: Arena<Node<P>>, sort: bool, dedup: bool) -> Self {
        let mut seen = dedup.then(HashSet::new);
        let mut leaves = nodes.compact(|n| match n {
            Node::Leaf(l) => seen
                .as_mut()
                .is_none_or(|s| s.insert(l.key))
                .then(|| l.unlinked()),
            Node::Branch(_) => None,
        });
        if sort {
            leaves
                .as_dense_mut()
                .sort_by(|a, b| morton_cmp(a.key, b.key));
        }
        Self {
            leaves,
            sorted: sort,
        }
    }

    pub(crate) fn leaves(&self) -> &[Leaf<P>] {
        self.leaves.as_dense()
    }

    pub(crate) fn is_sorted(&self) -> bool {
        self.sorted
    }
}

impl<P> Default for Packed<P> {
    fn default() -> Self {
        Self {
            leaves: Arena::from_dense(Vec::new()),
            sorted: false,
        }
    }
}

impl<P: Copy + Debug> SortedLeaves<P> for Packed<P> {
    fn len(&self) -> usize {
        self.leaves().len()
    }

    fn at(&self, i: usize) -> &Leaf<P> {
        &self.leaves()[i]
    }
}

impl<P: Copy + Debug> Backend<P> for Packed<P> {
    fn exact(&self, key: UPoint) -> Option<&Leaf<P>> {
        if self.sorted {
            sorted::exact(self, key)
        } else {
            self.leaves().iter().find(|l| l.key == key)
        }
    }

    fn approximate(&self, key: UPoint) -> Option<&Leaf<P>> {
        if self.sorted {
            sorted::approximate(self, key)
        } else {
            closest_key(self.leaves().iter(), key)
        }
    }

    fn nearest<'a>(&'a self, best: &mut Nearest<'a, P>) {
        if self.sorted {
            sorted::nearest(self, best);
            return;
        }
        for l in self.leaves() {
            if best.admits_key(l.key) {
                best.offer(l);
            }
        }
    }

    fn shape(&self) -> Shape {
        let mut shape = Shape::default();
        shape.add_leaves(0, self.leaves().len());
        shape
    }

    fn arena_stats(&self) -> ArenaStats {
        self.leaves.stats()
    }
}

impl<P> Debug for Packed<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packed")
            .field("leaves", &self.leaves.len())
            .field("sorted", &self.sorted)
            .finish()
    }
}
