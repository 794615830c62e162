// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Octree: an arena-backed 3D point index.
//!
//! Points are mapped from real coordinates into an unsigned fixed-point index
//! space, so that descent and exact matching never depend on floating-point
//! rounding. Distances reported back are always computed in real space.
//!
//! - Insert points with a caller payload (an external index) and flags.
//! - Look up the exact point, an approximate neighbour, the true nearest
//!   neighbour, or the nearest neighbour within a radius.
//! - Close the index when building is done. Closing can compact the leaves into
//!   a dense array, optionally sorted in Z-order for binary-search queries.
//!
//! All nodes live in a block [`arena`](arena::Arena): nothing is freed
//! individually, and the whole index is released at once.
//!
//! # Example
//!
//! ```rust
//! use understory_octree::{CloseFlags, PointIndex};
//!
//! let mut index = PointIndex::builder("particles")
//!     .extents([0.0; 3], [100.0; 3])
//!     .min_distance(1.0)
//!     .build()?;
//!
//! index.insert([1.0, 1.0, 1.0], 0_u32, 0);
//! index.insert([99.0, 99.0, 99.0], 1, 0);
//! // Outside the extents: refused, not an error.
//! assert!(index.insert([150.0, 0.0, 0.0], 2, 0).is_none());
//!
//! let hit = index.find([10.0, 10.0, 10.0], true).unwrap();
//! assert_eq!(hit.payload(), 0);
//! assert!(index.search([50.0, 99.0, 99.0], 10.0).is_none());
//!
//! index.close(CloseFlags::COMPACT | CloseFlags::SORT);
//! assert_eq!(index.match_point([99.0, 99.0, 99.0]).unwrap().payload(), 1);
//! # Ok::<(), understory_octree::ConfigError>(())
//! ```
//!
//! ## Choosing a backend
//!
//! - `Geometric` (default): octree descending by box bisection.
//! - `Morton` / `MortonAligned`: octree descending by interleaved key bits. The
//!   aligned variant rounds spans to powers of two.
//! - `ZOrderHashed` / `ZOrderHashedAligned`: a fixed table of Z-order buckets,
//!   each rooting a Morton sub-tree. Size buckets with
//!   [`Setup::max_distance`].
//! - `Sorted`: a Z-order sorted run queried by binary search.
//! - `KdTree`: not implemented; rejected by [`Setup::build`].
//!
//! ## Logging
//!
//! Setup, close and arena growth are reported with `tracing` at debug level.
//! Domain misses are traced; nothing is printed unless a subscriber asks for it.

mod backend;
mod backends;
mod index;

pub mod arena;
pub mod error;
pub mod flags;
pub mod node;
pub mod transform;
pub mod types;
pub mod usage;

pub use error::{ArenaError, ConfigError, IndexError};
pub use flags::{BackendKind, CloseFlags, SetupFlags};
pub use index::{PointIndex, Setup, State};
pub use node::{Leaf, LeafId};
pub use transform::Transform;
pub use types::{Extents, UBox, UPoint};
pub use usage::Usage;
