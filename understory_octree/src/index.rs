// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public [`PointIndex`] API and its setup builder.

use core::fmt::{self, Debug};

use tracing::{debug, trace, warn};

use crate::arena::Arena;
use crate::backend::{Backend, Geometric, Insert, Morton, Nearest};
use crate::backends::octree::{Octree, hash_bits};
use crate::backends::packed::Packed;
use crate::backends::sorted::SortedRun;
use crate::error::{ConfigError, IndexError};
use crate::flags::{BackendKind, CloseFlags, SetupFlags};
use crate::node::{Chain, Leaf, LeafId, Node};
use crate::transform::{Resolution, Transform};
use crate::types::{Extents, UPoint};
use crate::usage::{Storage, Usage};

/// Lifecycle state of an index. The transition is one-way.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Insertion is allowed.
    Building,
    /// Only queries are allowed.
    Closed,
}

enum Store<P> {
    Geometric(Octree<Geometric, P>),
    Morton(Octree<Morton, P>),
    Sorted(SortedRun<P>),
    Packed(Packed<P>),
}

impl<P> Default for Store<P> {
    fn default() -> Self {
        Self::Packed(Packed::default())
    }
}

impl<P: Copy + Debug> Store<P> {
    fn backend(&self) -> &dyn Backend<P> {
        match self {
            Self::Geometric(t) => t,
            Self::Morton(t) => t,
            Self::Sorted(r) => r,
            Self::Packed(p) => p,
        }
    }

    fn builder_mut(&mut self) -> Option<&mut dyn Insert<P>> {
        match self {
            Self::Geometric(t) => Some(t),
            Self::Morton(t) => Some(t),
            Self::Sorted(r) => Some(r),
            Self::Packed(_) => None,
        }
    }

    fn nodes(&self) -> Option<&Arena<Node<P>>> {
        match self {
            Self::Geometric(t) => Some(t.nodes()),
            Self::Morton(t) => Some(t.nodes()),
            Self::Sorted(r) => Some(r.nodes()),
            Self::Packed(_) => None,
        }
    }

    fn into_nodes(self) -> Result<Arena<Node<P>>, Packed<P>> {
        match self {
            Self::Geometric(t) => Ok(t.into_nodes()),
            Self::Morton(t) => Ok(t.into_nodes()),
            Self::Sorted(r) => Ok(r.into_nodes()),
            Self::Packed(p) => Err(p),
        }
    }
}

/// Configuration for a [`PointIndex`], created by [`PointIndex::builder`].
#[derive(Clone, Debug)]
pub struct Setup<'p, P> {
    name: String,
    expected: usize,
    min_distance: f64,
    max_distance: f64,
    bits: u32,
    flags: SetupFlags,
    backend: BackendKind,
    extents: Option<Extents>,
    points: &'p [([f64; 3], P)],
}

impl<'p, P: Copy + Debug> Setup<'p, P> {
    /// Number of points the caller expects to insert; sizes the first arena block.
    pub fn expected_points(mut self, n: usize) -> Self {
        self.expected = n;
        self
    }

    /// Minimum distance between points that must stay distinct, or `0.0`.
    ///
    /// When set, it fixes the resolution of the index space.
    pub fn min_distance(mut self, d: f64) -> Self {
        self.min_distance = d;
        self
    }

    /// Largest search distance the caller expects to use, or `0.0`.
    ///
    /// Hashed backends keep their buckets at least this wide.
    pub fn max_distance(mut self, d: f64) -> Self {
        self.max_distance = d;
        self
    }

    /// Resolution in bits per axis when no minimum distance is given (default 30).
    pub fn resolution_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    /// Shaping, duplicate and domain flags.
    pub fn flags(mut self, flags: SetupFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Spatial backend.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Real-space extents of the domain.
    pub fn extents(mut self, min: [f64; 3], max: [f64; 3]) -> Self {
        self.extents = Some(Extents::new(min, max));
        self
    }

    /// Coordinate buffer with payloads.
    ///
    /// Supplies the extents when none are set explicitly, and is inserted
    /// during [`build`](Self::build) with [`SetupFlags::BULK_INSERT`].
    pub fn points<'q>(self, points: &'q [([f64; 3], P)]) -> Setup<'q, P> {
        Setup {
            name: self.name,
            expected: self.expected,
            min_distance: self.min_distance,
            max_distance: self.max_distance,
            bits: self.bits,
            flags: self.flags,
            backend: self.backend,
            extents: self.extents,
            points,
        }
    }

    /// Validate the configuration, derive the index space and allocate the store.
    pub fn build(self) -> Result<PointIndex<P>, ConfigError> {
        let (min, max) = (self.min_distance, self.max_distance);
        let distances_ok = min >= 0.0
            && min.is_finite()
            && max >= 0.0
            && max.is_finite()
            && (max == 0.0 || max >= min);
        if !distances_ok {
            return Err(ConfigError::InvalidDistance { min, max });
        }
        let extents = self
            .extents
            .or_else(|| Extents::from_points(self.points.iter().map(|(p, _)| *p)))
            .ok_or(ConfigError::MissingExtents)?;
        let transform = Transform::new(
            extents,
            Resolution {
                min_distance: min,
                bits: self.bits,
                cube: self.flags.contains(SetupFlags::CUBE),
                pow2: self.flags.contains(SetupFlags::POW2) || self.backend.is_aligned(),
            },
        )?;

        let hint = self.expected.max(self.points.len());
        let store = match self.backend {
            BackendKind::Geometric => {
                Store::Geometric(Octree::new(Geometric::new(&transform), hint)?)
            }
            BackendKind::Morton | BackendKind::MortonAligned => {
                Store::Morton(Octree::new(Morton::new(&transform), hint)?)
            }
            BackendKind::ZOrderHashed | BackendKind::ZOrderHashedAligned => {
                Store::Morton(Octree::hashed(
                    Morton::new(&transform),
                    hint,
                    transform.bit_width(),
                    hash_bits(&transform, max),
                )?)
            }
            BackendKind::Sorted => Store::Sorted(SortedRun::new(hint)?),
            BackendKind::KdTree => return Err(ConfigError::UnimplementedBackend(self.backend)),
        };
        debug!(
            index = %self.name,
            backend = %self.backend,
            span = ?transform.span(),
            scale = ?transform.scale(),
            "point index set up"
        );

        let mut index = PointIndex {
            name: self.name,
            transform,
            backend: self.backend,
            flags: self.flags,
            expected: hint,
            leaves: 0,
            rejected: 0,
            max_depth: 0,
            state: State::Building,
            store,
        };
        if self.flags.contains(SetupFlags::BULK_INSERT) {
            for &(p, payload) in self.points {
                if let Err(IndexError::Arena(e)) = index.try_insert(p, payload, 0) {
                    return Err(e.into());
                }
            }
            debug!(index = %index.name, leaves = index.leaves, "bulk insert done");
        }
        Ok(index)
    }
}

/// Point index over a fixed real-space domain.
///
/// Points are inserted while the index is [`State::Building`] and can be
/// queried at any time. [`close`](Self::close) freezes it, optionally packing
/// the leaves into a dense, Z-order sorted array.
///
/// `P` is the caller's external index carried by every leaf.
pub struct PointIndex<P> {
    name: String,
    transform: Transform,
    backend: BackendKind,
    flags: SetupFlags,
    expected: usize,
    leaves: usize,
    rejected: usize,
    max_depth: u32,
    state: State,
    store: Store<P>,
}

impl<P: Copy + Debug> PointIndex<P> {
    /// Start configuring an index.
    pub fn builder(name: impl Into<String>) -> Setup<'static, P> {
        Setup {
            name: name.into(),
            expected: 0,
            min_distance: 0.0,
            max_distance: 0.0,
            bits: Resolution::default().bits,
            flags: SetupFlags::empty(),
            backend: BackendKind::default(),
            extents: None,
            points: &[],
        }
    }

    fn key_of(&self, point: [f64; 3]) -> Option<UPoint> {
        if self.flags.contains(SetupFlags::NO_DOMAIN_CHECK) {
            Some(self.transform.to_key_clamped(point))
        } else {
            self.transform.to_key(point)
        }
    }

    fn query_key(&self, point: [f64; 3]) -> Option<UPoint> {
        let key = self.key_of(point);
        if key.is_none() {
            trace!(index = %self.name, ?point, "query outside the domain");
        }
        key
    }

    /// Insert a point.
    ///
    /// Returns `Ok(None)` when the point lies outside the domain; the leaf count
    /// is then unchanged. An exact repeat of an existing key returns the existing
    /// leaf, or a new chained leaf with [`SetupFlags::KEEP_DUPLICATES`].
    pub fn try_insert(
        &mut self,
        point: [f64; 3],
        payload: P,
        flags: u32,
    ) -> Result<Option<LeafId>, IndexError> {
        if self.state == State::Closed {
            return Err(IndexError::Closed(self.name.clone()));
        }
        let Some(key) = self.key_of(point) else {
            self.rejected += 1;
            trace!(index = %self.name, ?point, "insert outside the domain");
            return Ok(None);
        };
        let keep = self.flags.contains(SetupFlags::KEEP_DUPLICATES);
        let Some(store) = self.store.builder_mut() else {
            return Err(IndexError::Closed(self.name.clone()));
        };
        let placed = store.insert(Leaf::new(point, key, payload, flags), keep)?;
        if placed.created {
            self.leaves += 1;
        }
        self.max_depth = self.max_depth.max(placed.depth);
        Ok(Some(LeafId(placed.leaf)))
    }

    /// Insert a point, see [`try_insert`](Self::try_insert).
    ///
    /// # Panics
    ///
    /// Panics when the index is closed or its arena is exhausted. Both are
    /// mistakes in the calling code, not runtime conditions.
    pub fn insert(&mut self, point: [f64; 3], payload: P, flags: u32) -> Option<LeafId> {
        match self.try_insert(point, payload, flags) {
            Ok(id) => id,
            Err(e) => panic!("{e}"),
        }
    }

    /// Find a leaf for `point`.
    ///
    /// With `nearest` the result is the leaf closest to `point` in real space.
    /// Without it the direct descent path is followed and, on a dead end, the
    /// first populated neighbour octant; that is fast but not always nearest.
    pub fn find(&self, point: [f64; 3], nearest: bool) -> Option<&Leaf<P>> {
        if nearest {
            return self.nearest_within(point, f64::INFINITY);
        }
        let key = self.query_key(point)?;
        self.store.backend().approximate(key)
    }

    /// Closest leaf within `radius` of `point`.
    ///
    /// A radius of `0.0` starts from the distance to an approximate neighbour,
    /// which makes this equivalent to `find(point, true)`. A negative or NaN
    /// radius finds nothing.
    pub fn search(&self, point: [f64; 3], radius: f64) -> Option<&Leaf<P>> {
        if radius.is_nan() || radius < 0.0 {
            return None;
        }
        let radius = if radius == 0.0 { f64::INFINITY } else { radius };
        self.nearest_within(point, radius)
    }

    fn nearest_within(&self, point: [f64; 3], radius: f64) -> Option<&Leaf<P>> {
        let key = self.query_key(point)?;
        let backend = self.store.backend();
        let mut best = Nearest::new(&self.transform, point, key, radius);
        if self.flags.contains(SetupFlags::NO_DOMAIN_CHECK) {
            best = best.clamped();
        }
        if let Some(seed) = backend.approximate(key) {
            best.offer(seed);
        }
        backend.nearest(&mut best);
        let hit = best.into_best();
        if hit.is_none() {
            trace!(index = %self.name, ?point, radius, "no leaf within radius");
        }
        hit
    }

    /// The leaf whose index-space key equals the key of `point`, if any.
    pub fn match_point(&self, point: [f64; 3]) -> Option<&Leaf<P>> {
        let key = self.query_key(point)?;
        self.store.backend().exact(key)
    }

    /// Leaf behind a handle. Handles are invalidated by compaction.
    pub fn leaf(&self, id: LeafId) -> Option<&Leaf<P>> {
        self.store.nodes()?.get(id.0)?.as_leaf()
    }

    /// The overflow chain starting at `id`: the leaf itself, then every leaf
    /// inserted later with the same key.
    pub fn chain(&self, id: LeafId) -> impl Iterator<Item = &Leaf<P>> + '_ {
        self.store
            .nodes()
            .into_iter()
            .flat_map(move |nodes| Chain::new(nodes, id.0))
            .map(|(_, leaf)| leaf)
    }

    /// All leaves in storage order: insertion order until the index is sorted.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Leaf<P>> + '_> {
        match &self.store {
            Store::Packed(p) => Box::new(p.leaves().iter()),
            store => Box::new(
                store
                    .nodes()
                    .into_iter()
                    .flat_map(|nodes| nodes.iter())
                    .filter_map(Node::as_leaf),
            ),
        }
    }

    /// Freeze the index.
    ///
    /// Later inserts fail. [`CloseFlags::COMPACT`] repacks the leaves into a dense
    /// array and drops the interior nodes; [`CloseFlags::SORT`] also puts them in
    /// Z-order so that queries use binary search. Duplicate keys are reduced to
    /// their first-inserted leaf during compaction with [`CloseFlags::NO_DUPLICATES`]
    /// or [`SetupFlags::DROP_DUPLICATES`]. Closing twice does nothing.
    pub fn close(&mut self, flags: CloseFlags) {
        if self.state == State::Closed {
            debug!(index = %self.name, "index already closed");
            return;
        }
        self.state = State::Closed;
        let mut flags = flags;
        if flags.contains(CloseFlags::SORT) && !flags.contains(CloseFlags::COMPACT) {
            warn!(index = %self.name, "sorting requires compaction; compacting");
            flags |= CloseFlags::COMPACT;
        }
        if !flags.contains(CloseFlags::COMPACT) {
            if flags.contains(CloseFlags::NO_DUPLICATES) {
                warn!(index = %self.name, "duplicate removal requires compaction; ignored");
            }
            debug!(index = %self.name, leaves = self.leaves, "index closed");
            return;
        }
        let dedup = flags.contains(CloseFlags::NO_DUPLICATES)
            || self.flags.contains(SetupFlags::DROP_DUPLICATES);
        self.store = match core::mem::take(&mut self.store).into_nodes() {
            Ok(nodes) => {
                let packed = Packed::from_nodes(nodes, flags.contains(CloseFlags::SORT), dedup);
                self.leaves = packed.leaves().len();
                Store::Packed(packed)
            }
            Err(packed) => Store::Packed(packed),
        };
        debug!(index = %self.name, ?flags, leaves = self.leaves, "index closed");
    }

    /// Release the index. Arena blocks are freed in reverse allocation order.
    pub fn destroy(self) {
        debug!(index = %self.name, leaves = self.leaves, "index destroyed");
    }

    /// Shape report, printing at most `max_print_depth` depth rows individually.
    pub fn usage(&self, max_print_depth: usize) -> Usage {
        let backend = self.store.backend();
        Usage {
            name: self.name.clone(),
            backend: self.backend,
            state: self.state,
            storage: match &self.store {
                Store::Packed(p) => Storage::Packed {
                    sorted: p.is_sorted(),
                },
                _ => Storage::Tree,
            },
            expected: self.expected,
            leaves: self.leaves,
            rejected: self.rejected,
            max_depth: self.max_depth,
            arena: backend.arena_stats(),
            shape: backend.shape(),
            max_print_depth,
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of leaves, chained duplicates included.
    pub fn len(&self) -> usize {
        self.leaves
    }

    /// True when no leaf has been stored.
    pub fn is_empty(&self) -> bool {
        self.leaves == 0
    }

    /// Point count the index was sized for: the announced count, or the
    /// number of bulk points when that is larger.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Inserts refused because the point was outside the domain.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Deepest insertion observed.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Backend chosen at setup.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Setup flags.
    pub fn setup_flags(&self) -> SetupFlags {
        self.flags
    }

    /// Mapping between real coordinates and index space.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }
}

impl<P> Debug for PointIndex<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointIndex")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("state", &self.state)
            .field("leaves", &self.leaves)
            .field("span", &self.transform.span())
            .finish_non_exhaustive()
    }
}
