// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Z-order sorted runs.
//!
//! [`SortedRun`] keeps leaf handles in [`morton_cmp`] order as they arrive. The
//! lookups here work on any run sorted that way, so a packed store that was
//! sorted on close answers queries with the same code.

use core::fmt::{self, Debug};

use crate::arena::{Arena, ArenaStats, ItemRef};
use crate::backend::{Backend, Insert, Nearest, Placed};
use crate::error::ArenaError;
use crate::node::{Chain, Leaf, Node, append_to_chain};
use crate::types::{UPoint, morton_cmp};
use crate::usage::Shape;

/// Entries scanned on each side of the insertion point when a key is not present.
pub(crate) const NEIGHBORHOOD: usize = 8;

/// A run of leaves sorted by key in Z-order.
pub(crate) trait SortedLeaves<P: Copy + Debug> {
    /// Number of entries.
    fn len(&self) -> usize;

    /// Entry `i`.
    fn at(&self, i: usize) -> &Leaf<P>;

    /// Offer entry `i`, and anything stored with it, to `best`.
    fn offer_at<'a>(&'a self, i: usize, best: &mut Nearest<'a, P>) {
        best.offer(self.at(i));
    }
}

/// First entry in `from..` whose key is not below `key`.
fn lower_bound<P: Copy + Debug>(run: &impl SortedLeaves<P>, key: UPoint, from: usize) -> usize {
    let (mut lo, mut hi) = (from, run.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if morton_cmp(run.at(mid).key, key).is_lt() {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// First entry in `from..` whose key is above `key`.
fn upper_bound<P: Copy + Debug>(run: &impl SortedLeaves<P>, key: UPoint, from: usize) -> usize {
    let (mut lo, mut hi) = (from, run.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if morton_cmp(run.at(mid).key, key).is_gt() {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

fn key_dist2(a: UPoint, b: UPoint) -> u64 {
    (0..3)
        .map(|i| {
            let d = u64::from(a[i].abs_diff(b[i]));
            d * d
        })
        .sum()
}

/// Nearest entry to `key` in index space among `candidates`; ties go to the first.
pub(crate) fn closest_key<'a, P: 'a>(
    candidates: impl Iterator<Item = &'a Leaf<P>>,
    key: UPoint,
) -> Option<&'a Leaf<P>> {
    candidates.min_by_key(|l| key_dist2(l.key, key))
}

/// Binary search for an exact key; the first of equal keys wins.
pub(crate) fn exact<P: Copy + Debug>(run: &impl SortedLeaves<P>, key: UPoint) -> Option<&Leaf<P>> {
    let i = lower_bound(run, key, 0);
    (i < run.len())
        .then(|| run.at(i))
        .filter(|l| l.key == key)
}

/// Exact hit, or the closest entry within [`NEIGHBORHOOD`] of the insertion point.
pub(crate) fn approximate<P: Copy + Debug>(
    run: &impl SortedLeaves<P>,
    key: UPoint,
) -> Option<&Leaf<P>> {
    let i = lower_bound(run, key, 0);
    if i < run.len() && run.at(i).key == key {
        return Some(run.at(i));
    }
    let lo = i.saturating_sub(NEIGHBORHOOD);
    let hi = (i + NEIGHBORHOOD).min(run.len());
    closest_key((lo..hi).map(|j| run.at(j)), key)
}

/// Scan the sub-run between the Z-order bounds of the current range box.
///
/// Every key inside a box sorts between the box's low and high corners, so the
/// two binary searches never exclude a candidate.
pub(crate) fn nearest<'a, P: Copy + Debug, R: SortedLeaves<P>>(
    run: &'a R,
    best: &mut Nearest<'a, P>,
) {
    let Some(range) = best.range() else {
        return;
    };
    let lo = lower_bound(run, range.min, 0);
    let hi = upper_bound(run, range.max, lo);
    for i in lo..hi {
        if best.admits_key(run.at(i).key) {
            run.offer_at(i, best);
        }
    }
}

/// Leaves in an arena, with a handle run kept in Z-order by binary insertion.
pub(crate) struct SortedRun<P> {
    nodes: Arena<Node<P>>,
    run: Vec<ItemRef>,
}

impl<P: Copy + Debug> SortedRun<P> {
    pub(crate) fn new(expected: usize) -> Result<Self, ArenaError> {
        Ok(Self {
            nodes: Arena::new(expected)?,
            run: Vec::with_capacity(expected),
        })
    }

    fn leaf(&self, r: ItemRef) -> &Leaf<P> {
        self.nodes[r]
            .as_leaf()
            .expect("sorted run holds only leaves")
    }

    /// Surrender the node storage.
    pub(crate) fn into_nodes(self) -> Arena<Node<P>> {
        self.nodes
    }
}

impl<P: Copy + Debug> SortedLeaves<P> for SortedRun<P> {
    fn len(&self) -> usize {
        self.run.len()
    }

    fn at(&self, i: usize) -> &Leaf<P> {
        self.leaf(self.run[i])
    }

    fn offer_at<'a>(&'a self, i: usize, best: &mut Nearest<'a, P>) {
        best.offer_chain(&self.nodes, self.run[i]);
    }
}

impl<P: Copy + Debug> Backend<P> for SortedRun<P> {
    fn exact(&self, key: UPoint) -> Option<&Leaf<P>> {
        exact(self, key)
    }

    fn approximate(&self, key: UPoint) -> Option<&Leaf<P>> {
        approximate(self, key)
    }

    fn nearest<'a>(&'a self, best: &mut Nearest<'a, P>) {
        nearest(self, best);
    }

    fn shape(&self) -> Shape {
        let mut shape = Shape::default();
        let n = self
            .run
            .iter()
            .map(|&r| Chain::new(&self.nodes, r).count())
            .sum();
        shape.add_leaves(0, n);
        shape
    }

    fn arena_stats(&self) -> ArenaStats {
        self.nodes.stats()
    }
}

impl<P: Copy + Debug> Insert<P> for SortedRun<P> {
    /// A flat run has no depth; placements report depth 0.
    fn insert(&mut self, leaf: Leaf<P>, keep_duplicates: bool) -> Result<Placed, ArenaError> {
        let found = self
            .run
            .binary_search_by(|&r| morton_cmp(self.leaf(r).key, leaf.key));
        let r = match found {
            Ok(i) => {
                let head = self.run[i];
                if !keep_duplicates {
                    return Ok(Placed {
                        leaf: head,
                        depth: 0,
                        created: false,
                    });
                }
                let r = self.nodes.alloc(Node::Leaf(leaf))?;
                append_to_chain(&mut self.nodes, head, r);
                r
            }
            Err(i) => {
                let r = self.nodes.alloc(Node::Leaf(leaf))?;
                self.run.insert(i, r);
                r
            }
        };
        Ok(Placed {
            leaf: r,
            depth: 0,
            created: true,
        })
    }

    fn nodes(&self) -> &Arena<Node<P>> {
        &self.nodes
    }
}

impl<P> Debug for SortedRun<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedRun")
            .field("entries", &self.run.len())
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Resolution, Transform};
    use crate::types::{Extents, dist2};

    fn transform() -> Transform {
        Transform::new(
            Extents::new([0.0; 3], [10.0; 3]),
            Resolution {
                bits: 8,
                ..Resolution::default()
            },
        )
        .unwrap()
    }

    fn filled(t: &Transform, pts: &[[f64; 3]]) -> SortedRun<usize> {
        let mut run = SortedRun::new(pts.len()).unwrap();
        for (i, &p) in pts.iter().enumerate() {
            run.insert(Leaf::new(p, t.to_key(p).unwrap(), i, 0), false)
                .unwrap();
        }
        run
    }

    #[test]
    fn run_stays_in_z_order() {
        let t = transform();
        let pts = [[9.0, 1.0, 2.0], [0.5, 0.5, 0.5], [3.0, 8.0, 1.0], [5.0, 5.0, 9.5]];
        let run = filled(&t, &pts);
        for i in 1..run.len() {
            assert!(morton_cmp(run.at(i - 1).key, run.at(i).key).is_lt());
        }
        assert_eq!(run.exact(t.to_key([3.0, 8.0, 1.0]).unwrap()).map(Leaf::payload), Some(2));
        assert!(run.exact(t.to_key([3.0, 8.0, 2.0]).unwrap()).is_none());
    }

    #[test]
    fn duplicates_chain_on_the_run_entry() {
        let t = transform();
        let mut run = filled(&t, &[[1.0; 3]]);
        let key = t.to_key([1.0; 3]).unwrap();
        let again = run.insert(Leaf::new([1.0; 3], key, 7, 0), false).unwrap();
        assert!(!again.created);
        let kept = run.insert(Leaf::new([1.0; 3], key, 8, 0), true).unwrap();
        assert!(kept.created);
        assert_eq!(run.len(), 1);
        assert_eq!(run.shape().leaves_per_depth, vec![2]);
        assert_eq!(run.exact(key).map(Leaf::payload), Some(0));
    }

    #[test]
    fn approximate_scans_the_neighbourhood() {
        let t = transform();
        let run = filled(&t, &[[1.0; 3], [9.0; 3]]);
        let hit = run.approximate(t.to_key([2.0; 3]).unwrap());
        assert_eq!(hit.map(Leaf::payload), Some(0));
        let empty: SortedRun<usize> = SortedRun::new(4).unwrap();
        assert!(empty.approximate([0; 3]).is_none());
    }

    #[test]
    fn nearest_scans_only_the_range() {
        let t = transform();
        let pts: Vec<[f64; 3]> = (0..200)
            .map(|i| {
                let f = f64::from(i);
                [(f * 0.37) % 10.0, (f * 0.71) % 10.0, (f * 0.13) % 10.0]
            })
            .collect();
        let run = filled(&t, &pts);
        for q in [[5.0; 3], [0.0; 3], [9.9, 0.1, 4.4]] {
            let mut best = Nearest::new(&t, q, t.to_key(q).unwrap(), f64::INFINITY);
            if let Some(seed) = run.approximate(t.to_key(q).unwrap()) {
                best.offer(seed);
            }
            run.nearest(&mut best);
            let got = best.into_best().unwrap();
            let want = pts
                .iter()
                .enumerate()
                .filter(|(i, _)| run.exact(t.to_key(pts[*i]).unwrap()).map(Leaf::payload) == Some(*i))
                .map(|(_, p)| dist2(*p, q))
                .fold(f64::INFINITY, f64::min);
            assert_eq!(dist2(got.real(), q), want, "query {q:?}");
        }
    }
}
