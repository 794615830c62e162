// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arena-backed octree, generic over how cells are subdivided.
//!
//! Insertion descends from a root branch choosing one octant per level. An
//! empty slot receives the new leaf; a slot holding a leaf with a different key
//! is pushed one level down under a fresh branch and the walk continues; a slot
//! holding the same key applies the duplicate policy. Leaves are never moved,
//! so arena order among leaves is insertion order.
//!
//! With hashed roots the top bits of each axis select a bucket first, and each
//! bucket lazily roots its own sub-tree.

use core::fmt::{self, Debug};

use crate::arena::{Arena, ArenaStats, ItemRef};
use crate::backend::{Backend, Insert, Nearest, Placed, Subdivision};
use crate::error::ArenaError;
use crate::node::{Branch, Chain, Leaf, Node, append_to_chain};
use crate::transform::Transform;
use crate::types::{UPoint, VISIT_ORDER, interleave};
use crate::usage::{BucketStats, Shape};

/// Bucket bits per axis used when nothing constrains them (`8^4` buckets).
pub(crate) const DEFAULT_HASH_BITS: u32 = 4;

/// Bucket bits per axis for a hashed tree.
///
/// Starts from [`DEFAULT_HASH_BITS`], never reaches the full key width, and is
/// reduced until one bucket edge covers at least `max_distance` in real units.
pub(crate) fn hash_bits(transform: &Transform, max_distance: f64) -> u32 {
    let width = transform.bit_width();
    let mut bits = DEFAULT_HASH_BITS.min(width.saturating_sub(1));
    if max_distance > 0.0 {
        let scale = transform.scale().into_iter().fold(0.0, f64::max);
        while bits > 0 && f64::from(1_u32 << (width - bits)) / scale < max_distance {
            bits -= 1;
        }
    }
    bits
}

struct Buckets {
    bits: u32,
    shift: u32,
    slots: Vec<Option<ItemRef>>,
}

impl Buckets {
    fn side(&self) -> u32 {
        1 << self.bits
    }

    fn coord(&self, key: UPoint) -> UPoint {
        key.map(|k| k >> self.shift)
    }

    fn slot(&self, coord: UPoint) -> usize {
        interleave(coord, self.bits)
    }

    /// Coordinates at Chebyshev distance `r` from `center`, inside the grid.
    fn shell(&self, center: UPoint, r: u32) -> impl Iterator<Item = UPoint> + '_ {
        let side = i64::from(self.side());
        let r = i64::from(r);
        let c = center.map(i64::from);
        (-r..=r)
            .flat_map(move |dz| (-r..=r).flat_map(move |dy| (-r..=r).map(move |dx| [dx, dy, dz])))
            .filter(move |d| d.iter().map(|v| v.abs()).max() == Some(r))
            .filter_map(move |d| {
                let mut out = [0_u32; 3];
                for a in 0..3 {
                    let v = c[a] + d[a];
                    if !(0..side).contains(&v) {
                        return None;
                    }
                    out[a] = u32::try_from(v).ok()?;
                }
                Some(out)
            })
    }
}

/// Where an insert starts its descent.
struct InsertRoot<C> {
    node: ItemRef,
    cell: C,
    depth: u32,
    /// Bucket slot still waiting for `node`.
    pending: Option<usize>,
}

enum Roots {
    Single(ItemRef),
    Hashed(Buckets),
}

/// Octree over an arena of [`Node`]s.
pub(crate) struct Octree<S: Subdivision, P> {
    sub: S,
    nodes: Arena<Node<P>>,
    roots: Roots,
}

impl<S: Subdivision, P: Copy + Debug> Octree<S, P> {
    /// Tree with a single root branch, allocated right away.
    pub(crate) fn new(sub: S, expected: usize) -> Result<Self, ArenaError> {
        let mut nodes = Arena::new(node_hint(expected))?;
        let root = nodes.take()?;
        Ok(Self {
            sub,
            nodes,
            roots: Roots::Single(root),
        })
    }

    /// Tree rooted in `8^hash_bits` buckets over keys of `width` bits.
    pub(crate) fn hashed(
        sub: S,
        expected: usize,
        width: u32,
        hash_bits: u32,
    ) -> Result<Self, ArenaError> {
        let bits = hash_bits.min(width.saturating_sub(1));
        Ok(Self {
            sub,
            nodes: Arena::new(node_hint(expected))?,
            roots: Roots::Hashed(Buckets {
                bits,
                shift: width - bits,
                slots: vec![None; 1 << (3 * bits)],
            }),
        })
    }

    fn branch(&self, r: ItemRef) -> Option<&Branch> {
        self.nodes.get(r)?.as_branch()
    }

    fn set_child(&mut self, node: ItemRef, octant: u8, child: ItemRef) {
        if let Node::Branch(b) = &mut self.nodes[node] {
            b.children[usize::from(octant)] = Some(child);
        }
    }

    /// Root branch for `key`, if it exists, with its cell.
    fn root_for(&self, key: UPoint) -> Option<(ItemRef, S::Cell)> {
        match &self.roots {
            Roots::Single(r) => Some((*r, self.sub.root())),
            Roots::Hashed(h) => {
                let coord = h.coord(key);
                let r = h.slots[h.slot(coord)]?;
                Some((r, self.sub.bucket(coord, h.bits)))
            }
        }
    }

    /// Root branch for `key`, allocating an empty bucket root on demand.
    ///
    /// A fresh bucket root comes back with its slot index and is only linked
    /// into the bucket table once its first leaf is placed, so a failed insert
    /// never leaves an empty bucket behind.
    fn root_for_insert(&mut self, key: UPoint) -> Result<InsertRoot<S::Cell>, ArenaError> {
        match &self.roots {
            Roots::Single(r) => Ok(InsertRoot {
                node: *r,
                cell: self.sub.root(),
                depth: 0,
                pending: None,
            }),
            Roots::Hashed(h) => {
                let coord = h.coord(key);
                let slot = h.slot(coord);
                let cell = self.sub.bucket(coord, h.bits);
                let depth = h.bits;
                let (node, pending) = match h.slots[slot] {
                    Some(r) => (r, None),
                    None => (self.nodes.take()?, Some(slot)),
                };
                Ok(InsertRoot {
                    node,
                    cell,
                    depth,
                    pending,
                })
            }
        }
    }

    fn install_root(&mut self, slot: usize, root: ItemRef) {
        if let Roots::Hashed(h) = &mut self.roots {
            h.slots[slot] = Some(root);
        }
    }

    /// Closest occupied bucket to the one holding `key`, searching shells outward.
    fn nearest_bucket(&self, key: UPoint) -> Option<(ItemRef, S::Cell)> {
        let Roots::Hashed(h) = &self.roots else {
            return None;
        };
        let center = h.coord(key);
        (1..h.side()).find_map(|r| {
            h.shell(center, r).find_map(|coord| {
                let root = h.slots[h.slot(coord)]?;
                Some((root, self.sub.bucket(coord, h.bits)))
            })
        })
    }

    fn visit<'a>(&'a self, node: ItemRef, cell: S::Cell, best: &mut Nearest<'a, P>) {
        let Some(b) = self.branch(node) else {
            return;
        };
        let o = self.sub.octant(&cell, best.key());
        for m in VISIT_ORDER {
            let oc = o ^ m;
            let Some(c) = b.child(oc) else {
                continue;
            };
            match &self.nodes[c] {
                Node::Leaf(l) => {
                    if best.admits_key(l.key) {
                        best.offer_chain(&self.nodes, c);
                    }
                }
                Node::Branch(_) => {
                    let cc = self.sub.child(&cell, oc);
                    if best.admits(&self.sub.bounds(&cc)) {
                        self.visit(c, cc, best);
                    }
                }
            }
        }
    }

    fn tally(&self, node: ItemRef, depth: u32, shape: &mut Shape) -> usize {
        let Some(b) = self.branch(node) else {
            return 0;
        };
        let mut total = 0;
        for &c in b.children.iter().flatten() {
            total += match &self.nodes[c] {
                Node::Leaf(_) => {
                    let n = Chain::new(&self.nodes, c).count();
                    shape.add_leaves(depth + 1, n);
                    n
                }
                Node::Branch(_) => self.tally(c, depth + 1, shape),
            };
        }
        total
    }

    /// Surrender the node storage.
    pub(crate) fn into_nodes(self) -> Arena<Node<P>> {
        self.nodes
    }
}

/// Clustered keys split into chains of branches, so leave room for one
/// interior node per leaf. The arena grows geometrically past this.
fn node_hint(expected: usize) -> usize {
    expected.saturating_mul(2)
}

impl<S: Subdivision, P: Copy + Debug> Backend<P> for Octree<S, P> {
    fn exact(&self, key: UPoint) -> Option<&Leaf<P>> {
        let (mut node, mut cell) = self.root_for(key)?;
        loop {
            let o = self.sub.octant(&cell, key);
            let c = self.branch(node)?.child(o)?;
            match &self.nodes[c] {
                Node::Leaf(l) => return (l.key == key).then_some(l),
                Node::Branch(_) => {
                    node = c;
                    cell = self.sub.child(&cell, o);
                }
            }
        }
    }

    fn approximate(&self, key: UPoint) -> Option<&Leaf<P>> {
        let (mut node, mut cell) = self
            .root_for(key)
            .or_else(|| self.nearest_bucket(key))?;
        loop {
            let b = self.branch(node)?;
            let o = self.sub.octant(&cell, key);
            let (oc, c) = VISIT_ORDER.iter().find_map(|m| {
                let oc = o ^ m;
                b.child(oc).map(|c| (oc, c))
            })?;
            match &self.nodes[c] {
                Node::Leaf(l) => return Some(l),
                Node::Branch(_) => {
                    node = c;
                    cell = self.sub.child(&cell, oc);
                }
            }
        }
    }

    fn nearest<'a>(&'a self, best: &mut Nearest<'a, P>) {
        match &self.roots {
            Roots::Single(r) => self.visit(*r, self.sub.root(), best),
            Roots::Hashed(h) => {
                let home = h.coord(best.key());
                if let Some(r) = h.slots[h.slot(home)] {
                    self.visit(r, self.sub.bucket(home, h.bits), best);
                }
                let Some(range) = best.range() else {
                    return;
                };
                let (lo, hi) = (h.coord(range.min), h.coord(range.max));
                for z in lo[2]..=hi[2] {
                    for y in lo[1]..=hi[1] {
                        for x in lo[0]..=hi[0] {
                            let coord = [x, y, z];
                            if coord == home {
                                continue;
                            }
                            let Some(r) = h.slots[h.slot(coord)] else {
                                continue;
                            };
                            let cell = self.sub.bucket(coord, h.bits);
                            if best.admits(&self.sub.bounds(&cell)) {
                                self.visit(r, cell, best);
                            }
                        }
                    }
                }
            }
        }
    }

    fn shape(&self) -> Shape {
        let mut shape = Shape::default();
        match &self.roots {
            Roots::Single(r) => {
                self.tally(*r, 0, &mut shape);
            }
            Roots::Hashed(h) => {
                let mut stats = BucketStats {
                    total: h.slots.len(),
                    ..BucketStats::default()
                };
                for &r in h.slots.iter().flatten() {
                    let n = self.tally(r, h.bits, &mut shape);
                    if n > 0 {
                        stats.occupied += 1;
                    }
                    stats.fullest = stats.fullest.max(n);
                }
                shape.buckets = Some(stats);
            }
        }
        shape
    }

    fn arena_stats(&self) -> ArenaStats {
        self.nodes.stats()
    }
}

impl<S: Subdivision, P: Copy + Debug> Insert<P> for Octree<S, P> {
    fn insert(&mut self, leaf: Leaf<P>, keep_duplicates: bool) -> Result<Placed, ArenaError> {
        let key = leaf.key;
        let InsertRoot {
            mut node,
            mut cell,
            mut depth,
            pending,
        } = self.root_for_insert(key)?;
        loop {
            let o = self.sub.octant(&cell, key);
            let Some(c) = self.branch(node).and_then(|b| b.child(o)) else {
                let r = self.nodes.alloc(Node::Leaf(leaf))?;
                self.set_child(node, o, r);
                if let Some(slot) = pending {
                    self.install_root(slot, node);
                }
                return Ok(Placed {
                    leaf: r,
                    depth: depth + 1,
                    created: true,
                });
            };
            let child_cell = self.sub.child(&cell, o);
            let occupant = match &self.nodes[c] {
                Node::Branch(_) => None,
                Node::Leaf(existing) => Some(existing.key),
            };
            match occupant {
                None => node = c,
                Some(k) if k == key => {
                    if !keep_duplicates {
                        return Ok(Placed {
                            leaf: c,
                            depth: depth + 1,
                            created: false,
                        });
                    }
                    let r = self.nodes.alloc(Node::Leaf(leaf))?;
                    append_to_chain(&mut self.nodes, c, r);
                    return Ok(Placed {
                        leaf: r,
                        depth: depth + 1,
                        created: true,
                    });
                }
                Some(k) => {
                    let moved = self.sub.octant(&child_cell, k);
                    let split = self.nodes.alloc(Node::Branch(Branch::with_child(moved, c)))?;
                    self.set_child(node, o, split);
                    node = split;
                }
            }
            cell = child_cell;
            depth += 1;
        }
    }

    fn nodes(&self) -> &Arena<Node<P>> {
        &self.nodes
    }
}

impl<S: Subdivision, P> Debug for Octree<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = match &self.roots {
            Roots::Single(_) => 0,
            Roots::Hashed(h) => h.slots.len(),
        };
        f.debug_struct("Octree")
            .field("subdivision", &self.sub)
            .field("nodes", &self.nodes.len())
            .field("buckets", &buckets)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Geometric, Morton};
    use crate::transform::Resolution;
    use crate::types::{Extents, dist2};

    fn transform(pow2: bool) -> Transform {
        Transform::new(
            Extents::new([0.0; 3], [100.0; 3]),
            Resolution {
                min_distance: 0.5,
                pow2,
                ..Resolution::default()
            },
        )
        .unwrap()
    }

    fn put<S: Subdivision>(
        tree: &mut Octree<S, u32>,
        t: &Transform,
        p: [f64; 3],
        payload: u32,
        keep: bool,
    ) -> Placed {
        let leaf = Leaf::new(p, t.to_key(p).unwrap(), payload, 0);
        tree.insert(leaf, keep).unwrap()
    }

    fn brute(pts: &[([f64; 3], u32)], q: [f64; 3]) -> f64 {
        pts.iter()
            .map(|(p, _)| dist2(*p, q))
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn collision_splits_until_keys_separate() {
        let t = transform(false);
        let mut tree = Octree::new(Geometric::new(&t), 8).unwrap();
        let a = put(&mut tree, &t, [10.0; 3], 0, false);
        assert_eq!(a.depth, 1);
        let b = put(&mut tree, &t, [10.5, 10.0, 10.0], 1, false);
        assert!(b.depth > 1, "close keys share a deep path");
        assert_eq!(tree.exact(t.to_key([10.0; 3]).unwrap()).map(Leaf::payload), Some(0));
        assert_eq!(
            tree.exact(t.to_key([10.5, 10.0, 10.0]).unwrap()).map(Leaf::payload),
            Some(1)
        );
        assert!(tree.exact(t.to_key([50.0; 3]).unwrap()).is_none());
        let leaves: Vec<_> = tree
            .nodes()
            .iter()
            .filter_map(Node::as_leaf)
            .map(Leaf::payload)
            .collect();
        assert_eq!(leaves, vec![0, 1], "leaves stay in insertion order");
    }

    #[test]
    fn duplicates_return_head_or_chain() {
        let t = transform(false);
        let mut tree = Octree::new(Morton::new(&t), 8).unwrap();
        let a = put(&mut tree, &t, [5.0; 3], 0, false);
        let again = put(&mut tree, &t, [5.0; 3], 1, false);
        assert_eq!(again.leaf, a.leaf);
        assert!(!again.created);
        let chained = put(&mut tree, &t, [5.0; 3], 2, true);
        assert!(chained.created);
        assert_ne!(chained.leaf, a.leaf);
        let chain: Vec<_> = Chain::new(tree.nodes(), a.leaf)
            .map(|(_, l)| l.payload())
            .collect();
        assert_eq!(chain, vec![0, 2]);
        assert_eq!(tree.shape().leaves_per_depth, vec![0, 2]);
    }

    #[test]
    fn approximate_follows_the_visit_order_on_dead_ends() {
        let t = transform(true);
        let mut tree = Octree::new(Morton::new(&t), 8).unwrap();
        put(&mut tree, &t, [90.0, 10.0, 10.0], 7, false);
        // Octant 0 is empty; octant 1 is the first fallback.
        let hit = tree.approximate(t.to_key([1.0; 3]).unwrap());
        assert_eq!(hit.map(Leaf::payload), Some(7));
        let empty: Octree<Morton, u32> = Octree::new(Morton::new(&t), 8).unwrap();
        assert!(empty.approximate([0; 3]).is_none());
    }

    #[test]
    fn hashed_roots_fall_back_to_neighbouring_buckets() {
        let t = transform(true);
        let width = t.bit_width();
        let mut tree = Octree::hashed(Morton::new(&t), 8, width, 2).unwrap();
        put(&mut tree, &t, [80.0, 80.0, 80.0], 1, false);
        put(&mut tree, &t, [20.0, 80.0, 80.0], 2, false);
        let q = t.to_key([55.0, 80.0, 80.0]).unwrap();
        assert!(tree.root_for(q).is_none());
        assert_eq!(tree.approximate(q).map(Leaf::payload), Some(2));
        let shape = tree.shape();
        assert_eq!(
            shape.buckets,
            Some(BucketStats {
                occupied: 2,
                total: 64,
                fullest: 1
            })
        );
        assert_eq!(shape.leaves_per_depth, vec![0, 0, 0, 2]);
    }

    #[test]
    fn failed_insert_leaves_no_empty_bucket() {
        let t = transform(true);
        let width = t.bit_width();
        let a = [80.0, 80.0, 80.0];
        let b = [20.0, 20.0, 20.0];
        let mut twin = Octree::hashed(Morton::new(&t), 8, width, 2).unwrap();
        put(&mut twin, &t, a, 1, false);
        let mut spare = 0;
        while twin.nodes.take().is_ok() {
            spare += 1;
        }

        let mut tree = Octree::hashed(Morton::new(&t), 8, width, 2).unwrap();
        put(&mut tree, &t, a, 1, false);
        // Room for the new bucket root but not for its leaf.
        for _ in 1..spare {
            tree.nodes.take().unwrap();
        }
        let kb = t.to_key(b).unwrap();
        let err = tree.insert(Leaf::new(b, kb, 2, 0), false).unwrap_err();
        assert!(matches!(err, ArenaError::BlockLimit { .. }));
        assert!(tree.root_for(kb).is_none());
        assert!(tree.exact(kb).is_none());
        assert_eq!(tree.approximate(kb).map(Leaf::payload), Some(1));
        assert_eq!(tree.shape().buckets.map(|s| s.occupied), Some(1));
    }

    #[test]
    fn hash_bits_respect_max_distance() {
        let t = transform(true);
        assert_eq!(t.bit_width(), 11);
        assert_eq!(hash_bits(&t, 0.0), DEFAULT_HASH_BITS);
        // A bucket edge of 2^(11 - b) / 13.86 units must reach 30.
        assert_eq!(hash_bits(&t, 30.0), 2);
        assert_eq!(hash_bits(&t, 1.0e6), 0);
    }

    #[test]
    fn nearest_matches_brute_force_for_all_root_layouts() {
        let t = transform(false);
        let width = t.bit_width();
        let pts: Vec<([f64; 3], u32)> = (0..300_u32)
            .map(|i| {
                let f = f64::from(i);
                ([(f * 7.3) % 100.0, (f * 13.1) % 100.0, (f * 3.7) % 100.0], i)
            })
            .collect();
        let mut single = Octree::new(Geometric::new(&t), 300).unwrap();
        let mut morton = Octree::new(Morton::new(&t), 300).unwrap();
        let mut hashed = Octree::hashed(Morton::new(&t), 300, width, 3).unwrap();
        let mut geo_hashed = Octree::hashed(Geometric::new(&t), 300, width, 2).unwrap();
        for &(p, i) in &pts {
            put(&mut single, &t, p, i, false);
            put(&mut morton, &t, p, i, false);
            put(&mut hashed, &t, p, i, false);
            put(&mut geo_hashed, &t, p, i, false);
        }
        let backends: [&dyn Backend<u32>; 4] = [&single, &morton, &hashed, &geo_hashed];
        for q in [[0.0; 3], [50.0; 3], [99.0, 1.0, 42.0], [33.3, 66.6, 99.9]] {
            let key = t.to_key(q).unwrap();
            let want = brute(&pts, q);
            for b in backends {
                let mut best = Nearest::new(&t, q, key, f64::INFINITY);
                b.nearest(&mut best);
                let got = best.into_best().unwrap();
                assert_eq!(dist2(got.real(), q), want, "query {q:?}");
            }
        }
    }
}
