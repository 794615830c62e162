// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mapping between real coordinates and unsigned index space.
//!
//! Spatial bisection and exact-match comparisons run on unsigned integers so
//! that they never depend on floating-point rounding. Distances reported to
//! callers are always computed from the real coordinates.
//!
//! ## Resolution
//!
//! With a minimum inter-point distance `d`, the scale is chosen so that two
//! points `d` apart along the box diagonal still land [`SAFETY_UNITS`] index
//! units apart on each axis: `scale = SAFETY_UNITS / (d / (2·√3))`.
//! Without one, the largest extent is mapped to `2^bits - 1` units.
//!
//! Spans are rounded up to an even number (or to `2^k - 1` with `POW2`) and
//! capped at half the `u32` range, so `min + max` of any box fits in a `u32`.

use crate::error::ConfigError;
use crate::types::{Extents, UBox, UPoint};

/// Index units separating two points at the minimum distance.
pub const SAFETY_UNITS: f64 = 2.0;

/// Largest span for even rounding.
pub const MAX_SPAN: u32 = (1 << 31) - 2;

/// Largest span for power-of-two rounding.
pub const MAX_SPAN_POW2: u32 = (1 << 31) - 1;

// `core::f64::consts::SQRT_3` is not stable yet.
const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Resolution parameters for [`Transform::new`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Resolution {
    /// Minimum distance between distinct points, or `0.0` to use `bits`.
    pub min_distance: f64,
    /// Resolution in bits used when no minimum distance is given (`1..=31`).
    pub bits: u32,
    /// Force equal spans on all axes.
    pub cube: bool,
    /// Round spans to `2^k - 1`.
    pub pow2: bool,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            min_distance: 0.0,
            bits: 30,
            cube: false,
            pow2: false,
        }
    }
}

/// Per-axis origin, scale and span of the index space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    extents: Extents,
    scale: [f64; 3],
    span: UPoint,
}

impl Transform {
    /// Derive the index space for `extents`.
    pub fn new(extents: Extents, res: Resolution) -> Result<Self, ConfigError> {
        if !extents.is_valid() {
            return Err(ConfigError::InvalidExtents {
                min: extents.min,
                max: extents.max,
            });
        }
        if !(1..=31).contains(&res.bits) {
            return Err(ConfigError::InvalidResolution(res.bits));
        }
        if !res.min_distance.is_finite() || res.min_distance < 0.0 {
            return Err(ConfigError::InvalidDistance {
                min: res.min_distance,
                max: 0.0,
            });
        }

        let limit = if res.pow2 { MAX_SPAN_POW2 } else { MAX_SPAN };
        let size = extents.size();
        let largest = size.iter().copied().fold(0.0_f64, f64::max);

        let (scale, raw) = if res.min_distance > 0.0 {
            let s = SAFETY_UNITS * 2.0 * SQRT_3 / res.min_distance;
            let required = (largest * s).ceil();
            if required > f64::from(limit) {
                return Err(ConfigError::ResolutionOverflow {
                    required: to_u64_saturating(required),
                    limit: u64::from(limit),
                });
            }
            let raw = if res.cube {
                [largest * s; 3]
            } else {
                size.map(|e| e * s)
            };
            ([s; 3], raw)
        } else {
            let target = f64::from(((1_u32 << res.bits) - 1).min(limit));
            if res.cube || largest == 0.0 {
                let s = if largest > 0.0 { target / largest } else { 1.0 };
                ([s; 3], [largest * s; 3])
            } else {
                (
                    size.map(|e| if e > 0.0 { target / e } else { 1.0 }),
                    size.map(|e| if e > 0.0 { target } else { 0.0 }),
                )
            }
        };

        let span = raw.map(|r| {
            let r = to_u64_saturating(r.ceil());
            let r = if res.pow2 {
                (r + 1).next_power_of_two() - 1
            } else {
                r + (r & 1)
            };
            to_u32_saturating(r.min(u64::from(limit)))
        });

        Ok(Self {
            extents,
            scale,
            span,
        })
    }

    /// Real-space extents the transform was derived from.
    pub fn extents(&self) -> Extents {
        self.extents
    }

    /// Real-space origin (the minimum corner of the extents).
    pub fn origin(&self) -> [f64; 3] {
        self.extents.min
    }

    /// Index units per real unit, per axis.
    pub fn scale(&self) -> [f64; 3] {
        self.scale
    }

    /// Largest valid coordinate per axis.
    pub fn span(&self) -> UPoint {
        self.span
    }

    /// The root box `[0, span]`.
    pub fn root_box(&self) -> UBox {
        UBox::from_span(self.span)
    }

    /// Bits needed to hold the largest coordinate on any axis.
    pub fn bit_width(&self) -> u32 {
        let widest = self.span.iter().copied().max().unwrap_or(0);
        (u32::BITS - widest.leading_zeros()).max(1)
    }

    /// Forward mapping. `None` when any axis falls outside the root box (or is NaN).
    pub fn to_key(&self, p: [f64; 3]) -> Option<UPoint> {
        let mut key = [0_u32; 3];
        for a in 0..3 {
            let v = self.units(p, a);
            if v.is_nan() || v < 0.0 || v > f64::from(self.span[a]) {
                return None;
            }
            key[a] = to_u32_saturating(to_u64_saturating(v));
        }
        Some(key)
    }

    /// Forward mapping with out-of-range axes clamped into the root box.
    pub fn to_key_clamped(&self, p: [f64; 3]) -> UPoint {
        [0, 1, 2].map(|a| {
            let v = self.units(p, a);
            let v = if v.is_nan() {
                0.0
            } else {
                v.clamp(0.0, f64::from(self.span[a]))
            };
            to_u32_saturating(to_u64_saturating(v))
        })
    }

    /// Lossy reverse mapping, for diagnostics.
    pub fn to_real(&self, key: UPoint) -> [f64; 3] {
        [0, 1, 2].map(|a| f64::from(key[a]) / self.scale[a] + self.extents.min[a])
    }

    /// Lower bound of the squared real distance from `p` to any point whose key lies in `b`.
    pub fn box_dist2(&self, p: [f64; 3], b: &UBox) -> f64 {
        let mut acc = 0.0;
        for a in 0..3 {
            let lo = (f64::from(b.min[a]) - 0.5) / self.scale[a] + self.extents.min[a];
            let hi = (f64::from(b.max[a]) + 0.5) / self.scale[a] + self.extents.min[a];
            let d = if p[a] < lo {
                lo - p[a]
            } else if p[a] > hi {
                p[a] - hi
            } else {
                0.0
            };
            acc += d * d;
        }
        acc
    }

    /// Index-space box holding every key a point within `radius` of `p` can map to.
    ///
    /// Returns `None` when that box misses the root box entirely.
    pub fn range_box(&self, p: [f64; 3], radius: f64) -> Option<UBox> {
        let mut out = self.root_box();
        for a in 0..3 {
            let lo = ((p[a] - radius - self.extents.min[a]) * self.scale[a]).round();
            let hi = ((p[a] + radius - self.extents.min[a]) * self.scale[a]).round();
            let lo = lo.max(0.0);
            let hi = hi.min(f64::from(self.span[a]));
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return None;
            }
            out.min[a] = to_u32_saturating(to_u64_saturating(lo));
            out.max[a] = to_u32_saturating(to_u64_saturating(hi));
        }
        Some(out)
    }

    /// Like [`range_box`](Self::range_box), for keys made by
    /// [`to_key_clamped`](Self::to_key_clamped): a box reaching past the root
    /// box is pinned to its faces instead of dropped.
    pub fn range_box_clamped(&self, p: [f64; 3], radius: f64) -> Option<UBox> {
        let mut out = self.root_box();
        for a in 0..3 {
            let lo = ((p[a] - radius - self.extents.min[a]) * self.scale[a]).round();
            let hi = ((p[a] + radius - self.extents.min[a]) * self.scale[a]).round();
            if lo.is_nan() || hi.is_nan() {
                return None;
            }
            let span = f64::from(self.span[a]);
            out.min[a] = to_u32_saturating(to_u64_saturating(lo.clamp(0.0, span)));
            out.max[a] = to_u32_saturating(to_u64_saturating(hi.clamp(0.0, span)));
        }
        Some(out)
    }

    #[inline]
    fn units(&self, p: [f64; 3], a: usize) -> f64 {
        ((p[a] - self.extents.min[a]) * self.scale[a]).round()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Callers pass rounded, non-negative values; saturation is the intended overflow behavior."
)]
fn to_u64_saturating(v: f64) -> u64 {
    v as u64
}

fn to_u32_saturating(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}
