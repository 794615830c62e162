// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backend implementations for different spatial strategies.
//!
//! - `octree`: arena octree, generic over the subdivision rule. Geometric and
//!   Morton descent share one insert and one search routine; the hashed
//!   variant roots a sub-tree per Z-order bucket.
//! - `sorted`: handles kept in Z-order by binary insertion, plus the
//!   binary-search lookups shared with sorted packed stores.
//! - `packed`: the dense leaf array left behind by compaction on close.
//!
//! Z-order range note
//! ------------------
//! For a box with corners `lo` and `hi`, every key `k` inside it satisfies
//! `lo <= k <= hi` in Z-order. Sorted stores therefore answer a nearest query
//! by scanning the sub-run between two binary searches, filtering each entry
//! with the box test, and shrinking the box as better candidates arrive.

pub(crate) mod octree;
pub(crate) mod packed;
pub(crate) mod sorted;
