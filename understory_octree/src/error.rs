// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! Configuration and arena errors describe setup or sizing mistakes. Misses
//! (out-of-domain points, empty results) are never errors; they surface as `None`.

use thiserror::Error;

use crate::flags::BackendKind;

/// Invalid index configuration, reported by [`Setup::build`](crate::Setup::build).
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// Extents are not finite or are inverted on some axis.
    #[error("invalid extents: min {min:?}, max {max:?}")]
    InvalidExtents {
        /// Minimum corner as given.
        min: [f64; 3],
        /// Maximum corner as given.
        max: [f64; 3],
    },
    /// Neither explicit extents nor a coordinate buffer were supplied.
    #[error("no extents: supply explicit extents or a non-empty coordinate buffer")]
    MissingExtents,
    /// A distance parameter is negative or NaN, or the maximum is below the minimum.
    #[error("invalid distances: min {min}, max {max}")]
    InvalidDistance {
        /// Minimum inter-point distance.
        min: f64,
        /// Maximum search distance.
        max: f64,
    },
    /// Resolution bits outside `1..=31`.
    #[error("resolution of {0} bits is outside 1..=31")]
    InvalidResolution(u32),
    /// The minimum distance needs more index units than a coordinate can hold.
    #[error("resolution overflow: span of {required} units exceeds limit {limit}")]
    ResolutionOverflow {
        /// Span the configuration asked for.
        required: u64,
        /// Largest span representable.
        limit: u64,
    },
    /// The selected backend has no implementation.
    #[error("backend `{0}` is not implemented")]
    UnimplementedBackend(BackendKind),
    /// The arena could not perform the first allocation.
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// Arena allocation failure. Always a sizing error, never a runtime condition.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// All blocks are full and no more blocks may be added.
    #[error("arena block limit of {limit} reached ({items} items allocated)")]
    BlockLimit {
        /// Maximum block count.
        limit: usize,
        /// Items allocated when the limit was hit.
        items: usize,
    },
    /// The allocator refused to reserve a block.
    #[error("failed to reserve an arena block of {0} items")]
    OutOfMemory(usize),
    /// A block would hold more items than an item handle can address.
    #[error("arena block of {0} items exceeds the addressable block size")]
    BlockTooLarge(usize),
}

/// Insert failure. Both variants indicate a bug or a sizing mistake in the caller.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The index has been closed; no further insertion is possible.
    #[error("insert into closed index `{0}`")]
    Closed(String),
    /// The arena ran out of blocks.
    #[error(transparent)]
    Arena(#[from] ArenaError),
}
