// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Block arena: the only memory owner of an index.
//!
//! Items are bump-allocated from at most [`MAX_BLOCKS`] fixed-capacity blocks.
//! The first block is sized from the expected item count. Every later block
//! holds at least twice the capacity allocated before it, so the full arena
//! holds 27 times the first block. Nothing is freed individually: the arena is
//! reset or released as a whole, or compacted into a dense array of a
//! different item type.

use core::fmt;
use core::num::NonZeroU32;
use core::ops::{Index, IndexMut};

use tracing::debug;

use crate::error::ArenaError;

/// Maximum number of blocks an arena may own.
pub const MAX_BLOCKS: usize = 4;

/// Smallest growth block.
pub const MIN_GROWTH: usize = 64;

/// Smallest first block created by [`Arena::new`].
pub const MIN_FIRST_BLOCK: usize = 1024;

const OFFSET_BITS: u32 = 30;
const OFFSET_MASK: u32 = (1 << OFFSET_BITS) - 1;

/// Largest number of items a single block may hold.
pub const MAX_BLOCK_ITEMS: usize = OFFSET_MASK as usize;

/// Stable handle to an arena item: a block number and an offset, packed into 32 bits.
///
/// `Option<ItemRef>` is four bytes, which keeps an eight-way branch node at 32 bytes.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ItemRef(NonZeroU32);

impl ItemRef {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Block count and offsets are bounded by MAX_BLOCKS and MAX_BLOCK_ITEMS."
    )]
    fn new(block: usize, offset: usize) -> Self {
        let raw = ((block as u32) << OFFSET_BITS) | offset as u32;
        Self(NonZeroU32::MIN.saturating_add(raw))
    }

    /// Block number.
    pub const fn block(self) -> usize {
        ((self.0.get() - 1) >> OFFSET_BITS) as usize
    }

    /// Offset inside the block.
    pub const fn offset(self) -> usize {
        ((self.0.get() - 1) & OFFSET_MASK) as usize
    }
}

impl fmt::Debug for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemRef({}:{})", self.block(), self.offset())
    }
}

struct Block<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Block<T> {
    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

/// Occupancy of one block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockStats {
    /// Items the block can hold.
    pub capacity: usize,
    /// Items currently allocated.
    pub used: usize,
}

/// Occupancy of a whole arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaStats {
    /// Size of one item in bytes, including alignment padding.
    pub item_size: usize,
    /// Per-block occupancy, in allocation order.
    pub blocks: Vec<BlockStats>,
}

impl ArenaStats {
    /// Total items allocated.
    pub fn used(&self) -> usize {
        self.blocks.iter().map(|b| b.used).sum()
    }

    /// Total item capacity.
    pub fn capacity(&self) -> usize {
        self.blocks.iter().map(|b| b.capacity).sum()
    }
}

/// Growable bump allocator of fixed-size items.
pub struct Arena<T> {
    blocks: Vec<Block<T>>,
    current: usize,
    first_hint: usize,
    growth_hint: usize,
}

impl<T> Arena<T> {
    /// Create an arena and allocate its first block, sized for `expected` items
    /// but never below [`MIN_FIRST_BLOCK`].
    pub fn new(expected: usize) -> Result<Self, ArenaError> {
        Self::with_hints(expected.max(MIN_FIRST_BLOCK), MIN_GROWTH)
    }

    /// Create an arena with explicit first-block and minimum growth-block sizes.
    ///
    /// A growth block holds `growth` items or twice the capacity allocated so
    /// far, whichever is larger, capped at [`MAX_BLOCK_ITEMS`].
    pub fn with_hints(first: usize, growth: usize) -> Result<Self, ArenaError> {
        let mut arena = Self {
            blocks: Vec::with_capacity(MAX_BLOCKS),
            current: 0,
            first_hint: first.max(1),
            growth_hint: growth.max(1),
        };
        arena.push_block(arena.first_hint)?;
        Ok(arena)
    }

    /// Wrap an already dense vector as a single-block arena.
    pub fn from_dense(items: Vec<T>) -> Self {
        let capacity = items.len();
        Self {
            blocks: vec![Block { items, capacity }],
            current: 0,
            first_hint: capacity.max(1),
            growth_hint: MIN_GROWTH,
        }
    }

    fn push_block(&mut self, capacity: usize) -> Result<(), ArenaError> {
        if self.blocks.len() >= MAX_BLOCKS {
            return Err(ArenaError::BlockLimit {
                limit: MAX_BLOCKS,
                items: self.len(),
            });
        }
        if capacity > MAX_BLOCK_ITEMS {
            return Err(ArenaError::BlockTooLarge(capacity));
        }
        let mut items = Vec::new();
        items
            .try_reserve_exact(capacity)
            .map_err(|_| ArenaError::OutOfMemory(capacity))?;
        debug!(block = self.blocks.len(), capacity, "arena block allocated");
        self.blocks.push(Block { items, capacity });
        Ok(())
    }

    fn next_block_capacity(&self) -> usize {
        let so_far: usize = self.blocks.iter().map(|b| b.capacity).sum();
        so_far
            .saturating_mul(2)
            .max(self.growth_hint)
            .min(MAX_BLOCK_ITEMS)
    }

    /// Bump-allocate `item` and return its handle.
    ///
    /// Moves on to the next block when the current one is full, reusing a block
    /// kept by [`Arena::reset`] before allocating a new one.
    pub fn alloc(&mut self, item: T) -> Result<ItemRef, ArenaError> {
        if self.blocks.is_empty() {
            self.push_block(self.first_hint)?;
            self.current = 0;
        }
        if self.blocks[self.current].is_full() {
            if self.current + 1 >= self.blocks.len() {
                self.push_block(self.next_block_capacity())?;
            }
            self.current += 1;
        }
        let block = &mut self.blocks[self.current];
        let offset = block.items.len();
        block.items.push(item);
        Ok(ItemRef::new(self.current, offset))
    }

    /// Take the next slot, default-initialized.
    pub fn take(&mut self) -> Result<ItemRef, ArenaError>
    where
        T: Default,
    {
        self.alloc(T::default())
    }

    /// Item behind a handle, if it is live.
    pub fn get(&self, r: ItemRef) -> Option<&T> {
        self.blocks.get(r.block())?.items.get(r.offset())
    }

    /// Mutable item behind a handle, if it is live.
    pub fn get_mut(&mut self, r: ItemRef) -> Option<&mut T> {
        self.blocks.get_mut(r.block())?.items.get_mut(r.offset())
    }

    /// Number of allocated items.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.items.len()).sum()
    }

    /// True when nothing has been allocated.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.items.is_empty())
    }

    /// Number of blocks currently owned.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Items in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.blocks.iter().flat_map(|b| b.items.iter())
    }

    /// Items with their handles, in allocation order.
    pub fn iter_refs(&self) -> impl Iterator<Item = (ItemRef, &T)> + '_ {
        self.blocks.iter().enumerate().flat_map(|(bi, b)| {
            b.items
                .iter()
                .enumerate()
                .map(move |(oi, item)| (ItemRef::new(bi, oi), item))
        })
    }

    /// Keep only live items, mapped to `U`, packed into a single dense block.
    ///
    /// Blocks are walked in allocation order, so relative order is preserved.
    /// All handles into `self` are invalidated.
    pub fn compact<U>(mut self, mut live: impl FnMut(T) -> Option<U>) -> Arena<U> {
        let blocks = core::mem::take(&mut self.blocks);
        let mut dense = Vec::with_capacity(blocks.iter().map(|b| b.items.len()).sum());
        for block in blocks {
            dense.extend(block.items.into_iter().filter_map(&mut live));
        }
        dense.shrink_to_fit();
        debug!(items = dense.len(), "arena compacted");
        Arena::from_dense(dense)
    }

    /// The items of a compacted (single-block) arena as a slice.
    pub fn as_dense(&self) -> &[T] {
        debug_assert!(self.blocks.len() <= 1, "as_dense on a multi-block arena");
        match self.blocks.first() {
            Some(b) => &b.items,
            None => &[],
        }
    }

    /// The items of a compacted (single-block) arena as a mutable slice.
    pub fn as_dense_mut(&mut self) -> &mut [T] {
        debug_assert!(self.blocks.len() <= 1, "as_dense_mut on a multi-block arena");
        match self.blocks.first_mut() {
            Some(b) => &mut b.items,
            None => &mut [],
        }
    }

    /// Drop every item but keep the blocks for reuse.
    pub fn reset(&mut self) {
        for b in &mut self.blocks {
            b.items.clear();
        }
        self.current = 0;
    }

    /// Free all blocks, last allocated first.
    pub fn release(&mut self) {
        while let Some(block) = self.blocks.pop() {
            debug!(
                block = self.blocks.len(),
                capacity = block.capacity,
                "arena block released"
            );
            drop(block);
        }
        self.current = 0;
    }

    /// Per-block occupancy.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            item_size: size_of::<T>(),
            blocks: self
                .blocks
                .iter()
                .map(|b| BlockStats {
                    capacity: b.capacity,
                    used: b.items.len(),
                })
                .collect(),
        }
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Index<ItemRef> for Arena<T> {
    type Output = T;

    fn index(&self, r: ItemRef) -> &T {
        &self.blocks[r.block()].items[r.offset()]
    }
}

impl<T> IndexMut<ItemRef> for Arena<T> {
    fn index_mut(&mut self, r: ItemRef) -> &mut T {
        &mut self.blocks[r.block()].items[r.offset()]
    }
}

impl<T> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("blocks", &self.blocks.len())
            .field("current", &self.current)
            .field("items", &self.len())
            .field("item_size", &size_of::<T>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ref_packs_block_and_offset() {
        let r = ItemRef::new(3, MAX_BLOCK_ITEMS - 1);
        assert_eq!(r.block(), 3);
        assert_eq!(r.offset(), MAX_BLOCK_ITEMS - 1);
        assert_eq!(size_of::<Option<ItemRef>>(), 4);
    }

    #[test]
    fn grows_block_by_block_then_fails() {
        // Blocks of 4, 8, 24 and 72 items.
        let mut a: Arena<u64> = Arena::with_hints(4, 2).unwrap();
        let mut refs = Vec::new();
        for i in 0..108 {
            refs.push(a.alloc(i).unwrap());
        }
        assert_eq!(a.block_count(), 4);
        assert_eq!(refs[3].block(), 0);
        assert_eq!(refs[4].block(), 1);
        assert_eq!(refs[12].block(), 2);
        assert_eq!(refs[36].block(), 3);
        assert_eq!(refs[107].offset(), 71);
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(a[*r], i as u64);
        }
        assert_eq!(
            a.alloc(108),
            Err(ArenaError::BlockLimit {
                limit: MAX_BLOCKS,
                items: 108
            })
        );
        let stats = a.stats();
        assert_eq!(stats.used(), 108);
        assert_eq!(stats.capacity(), 108);
        assert_eq!(stats.item_size, 8);
    }

    #[test]
    fn default_arena_holds_many_times_its_hint() {
        let mut a: Arena<u8> = Arena::new(0).unwrap();
        let mut n = 0;
        while a.alloc(0).is_ok() {
            n += 1;
        }
        assert_eq!(n, 27 * MIN_FIRST_BLOCK);
        let big: Arena<u8> = Arena::new(5000).unwrap();
        assert_eq!(big.stats().capacity(), 5000);
    }

    #[test]
    fn growth_never_exceeds_the_addressable_block() {
        let a: Arena<()> = Arena::with_hints(MAX_BLOCK_ITEMS, 1).unwrap();
        assert_eq!(a.next_block_capacity(), MAX_BLOCK_ITEMS);
    }

    #[test]
    fn take_is_default_filled() {
        let mut a: Arena<[u32; 4]> = Arena::new(8).unwrap();
        let r = a.take().unwrap();
        assert_eq!(a[r], [0; 4]);
        a[r][2] = 7;
        assert_eq!(a.get(r), Some(&[0, 0, 7, 0]));
    }

    #[test]
    fn reset_reuses_blocks() {
        let mut a: Arena<u8> = Arena::with_hints(2, 2).unwrap();
        for i in 0..6 {
            a.alloc(i).unwrap();
        }
        assert_eq!(a.block_count(), 2);
        a.reset();
        assert!(a.is_empty());
        for i in 0..6 {
            a.alloc(i).unwrap();
        }
        assert_eq!(a.block_count(), 2, "released blocks are reused before growing");
    }

    #[test]
    fn compact_keeps_live_items_in_order() {
        let mut a: Arena<i32> = Arena::with_hints(3, 3).unwrap();
        for i in 0..8 {
            a.alloc(i).unwrap();
        }
        let dense = a.compact(|v| (v % 2 == 0).then(|| f64::from(v) * 0.5));
        assert_eq!(dense.block_count(), 1);
        assert_eq!(dense.as_dense(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn release_frees_everything() {
        let mut a: Arena<u8> = Arena::with_hints(1, 1).unwrap();
        a.alloc(1).unwrap();
        a.alloc(2).unwrap();
        a.release();
        assert_eq!(a.block_count(), 0);
        let r = a.alloc(3).unwrap();
        assert_eq!(a[r], 3);
    }
}
