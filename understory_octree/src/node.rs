// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree nodes and leaves.

use crate::arena::{Arena, ItemRef};
use crate::types::UPoint;

/// A stored point.
///
/// Leaves sharing the same index-space key form an overflow chain when the
/// index keeps duplicate lists; every chained leaf keeps its own real
/// coordinates and payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Leaf<P> {
    pub(crate) real: [f64; 3],
    pub(crate) key: UPoint,
    pub(crate) payload: P,
    pub(crate) flags: u32,
    pub(crate) next: Option<ItemRef>,
}

impl<P: Copy> Leaf<P> {
    pub(crate) fn new(real: [f64; 3], key: UPoint, payload: P, flags: u32) -> Self {
        Self {
            real,
            key,
            payload,
            flags,
            next: None,
        }
    }

    /// Real-space coordinates as inserted.
    pub fn real(&self) -> [f64; 3] {
        self.real
    }

    /// Index-space coordinates.
    pub fn key(&self) -> UPoint {
        self.key
    }

    /// Caller-supplied external index.
    pub fn payload(&self) -> P {
        self.payload
    }

    /// Caller-supplied flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether another leaf with the same key is chained after this one.
    pub fn has_duplicates(&self) -> bool {
        self.next.is_some()
    }

    /// Copy with the chain link dropped, for dense storage.
    pub(crate) fn unlinked(self) -> Self {
        Self { next: None, ..self }
    }
}

/// Handle to a leaf, valid until the index is compacted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeafId(pub(crate) ItemRef);

/// Interior node: one optional child per octant.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Branch {
    pub(crate) children: [Option<ItemRef>; 8],
}

impl Branch {
    pub(crate) fn with_child(octant: u8, child: ItemRef) -> Self {
        let mut b = Self::default();
        b.children[usize::from(octant)] = Some(child);
        b
    }

    pub(crate) fn child(&self, octant: u8) -> Option<ItemRef> {
        self.children[usize::from(octant)]
    }
}

/// Arena item: a branch or a leaf.
#[derive(Clone, Debug)]
pub(crate) enum Node<P> {
    Branch(Branch),
    Leaf(Leaf<P>),
}

impl<P> Default for Node<P> {
    fn default() -> Self {
        Self::Branch(Branch::default())
    }
}

impl<P> Node<P> {
    pub(crate) fn as_leaf(&self) -> Option<&Leaf<P>> {
        match self {
            Self::Leaf(l) => Some(l),
            Self::Branch(_) => None,
        }
    }

    pub(crate) fn as_branch(&self) -> Option<&Branch> {
        match self {
            Self::Branch(b) => Some(b),
            Self::Leaf(_) => None,
        }
    }
}

/// Walks an overflow chain starting at (and including) its head.
pub(crate) struct Chain<'a, P> {
    arena: &'a Arena<Node<P>>,
    next: Option<ItemRef>,
}

impl<'a, P> Chain<'a, P> {
    pub(crate) fn new(arena: &'a Arena<Node<P>>, head: ItemRef) -> Self {
        Self {
            arena,
            next: Some(head),
        }
    }
}

impl<'a, P> Iterator for Chain<'a, P> {
    type Item = (ItemRef, &'a Leaf<P>);

    fn next(&mut self) -> Option<Self::Item> {
        let r = self.next?;
        let leaf = self.arena.get(r)?.as_leaf()?;
        self.next = leaf.next;
        Some((r, leaf))
    }
}

/// Append `new` at the tail of the chain starting at `head`.
pub(crate) fn append_to_chain<P>(arena: &mut Arena<Node<P>>, head: ItemRef, new: ItemRef) {
    let mut at = head;
    while let Some(Node::Leaf(l)) = arena.get(at) {
        match l.next {
            Some(n) => at = n,
            None => break,
        }
    }
    if let Some(Node::Leaf(l)) = arena.get_mut(at) {
        l.next = Some(new);
    }
}
