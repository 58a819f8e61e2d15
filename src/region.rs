//! Axis-aligned hyper-rectangles and the volume arithmetic the bucket tree is built on.
//!
//! Edges are compared within a tolerance relative to the widths of the ranges involved, never to
//! the magnitude of the coordinates, so timestamps around `1e12` and ranges narrower than `1e-9`
//! behave like data around the origin. Edges produced by cutting and merging are copied, never
//! recomputed. Counts and volumes use their own relative tolerance.
//!
//! Two ranges are disjoint when one's upper bound is at most the other's lower bound. Rectangles that
//! only touch therefore do not intersect, and the same rule drives [`Region::intersects`],
//! [`Region::contains`] and [`Region::partially_overlaps`].

use std::fmt::{Debug, Formatter};

use crate::error::HistogramError;

/// Relative tolerance used for every floating-point comparison.
pub(crate) const EPSILON: f64 = 1e-9;

/// Rounding slack, in units of `f64::EPSILON`, allowed on a coordinate's magnitude.
const ULPS: f64 = 4.0;

/// Tolerance for comparing the edges `a` and `b` of ranges at most `width` wide.
#[inline]
fn edge_tolerance(a: f64, b: f64, width: f64) -> f64 {
    (EPSILON * width).max(ULPS * f64::EPSILON * a.abs().max(b.abs()))
}

/// `a <= b` within the edge tolerance for ranges `width` wide.
#[inline]
pub(crate) fn edge_le(a: f64, b: f64, width: f64) -> bool {
    a <= b + edge_tolerance(a, b, width)
}

/// `a < b` by more than the edge tolerance for ranges `width` wide.
#[inline]
pub(crate) fn edge_lt(a: f64, b: f64, width: f64) -> bool {
    a < b - edge_tolerance(a, b, width)
}

#[inline]
fn edge_eq(a: f64, b: f64, width: f64) -> bool {
    (a - b).abs() <= edge_tolerance(a, b, width)
}

/// Counts `a` and `b` agree within tolerance.
#[inline]
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON * 1f64.max(a.abs()).max(b.abs())
}

/// Whether `volume` is numerically zero relative to the `reference` volume it was carved from.
#[inline]
pub(crate) fn is_negligible(volume: f64, reference: f64) -> bool {
    volume <= 0.0 || volume <= EPSILON * reference.max(0.0)
}

/// Closed hyper-rectangle, one `[low, high]` range per attribute.
#[derive(Clone, PartialEq, Default)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with_serde", serde(transparent))]
pub struct Region {
    ranges: Vec<[f64; 2]>,
}

impl Region {
    /// Creates a region, rejecting empty, inverted or non-finite ranges.
    pub fn new(ranges: Vec<[f64; 2]>) -> Result<Self, HistogramError> {
        if ranges.is_empty() {
            return Err(HistogramError::NoAttributes);
        }
        for (index, &[low, high]) in ranges.iter().enumerate() {
            if !low.is_finite() || !high.is_finite() || low > high {
                return Err(HistogramError::InvalidRange { index, low, high });
            }
        }
        Ok(Self { ranges })
    }

    /// Zero-dimensional region used by a root that has not seen an observation yet.
    #[inline]
    pub(crate) fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn ranges(&self) -> &[[f64; 2]] {
        &self.ranges
    }

    #[inline]
    pub fn low(&self, dim: usize) -> f64 {
        self.ranges[dim][0]
    }

    #[inline]
    pub fn high(&self, dim: usize) -> f64 {
        self.ranges[dim][1]
    }

    /// Raw volume: product of the range widths.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.ranges.iter().map(|[low, high]| high - low).product()
    }

    /// Whether `other` lies inside `self` on every dimension.
    pub fn contains(&self, other: &Region) -> bool {
        self.ranges
            .iter()
            .zip(&other.ranges)
            .all(|(&[ol, oh], &[il, ih])| {
                let width = (oh - ol).max(ih - il);
                edge_le(ol, il, width) && edge_le(ih, oh, width)
            })
    }

    /// Whether the two regions share a positive-width overlap on every dimension.
    pub fn intersects(&self, other: &Region) -> bool {
        self.ranges
            .iter()
            .zip(&other.ranges)
            .all(|(&[al, ah], &[bl, bh])| {
                let width = (ah - al).max(bh - bl);
                edge_lt(al, bh, width) && edge_lt(bl, ah, width)
            })
    }

    /// Whether `other` overlaps `self` without being contained in it.
    #[inline]
    pub fn partially_overlaps(&self, other: &Region) -> bool {
        self.intersects(other) && !self.contains(other)
    }

    pub fn intersection(&self, other: &Region) -> Option<Region> {
        if !self.intersects(other) {
            return None;
        }
        let ranges = self
            .ranges
            .iter()
            .zip(&other.ranges)
            .map(|(&[al, ah], &[bl, bh])| [al.max(bl), ah.min(bh)])
            .collect();
        Some(Region { ranges })
    }

    #[inline]
    pub fn intersection_volume(&self, other: &Region) -> f64 {
        self.intersection(other).map_or(0.0, |r| r.volume())
    }

    /// Smallest region enclosing both `self` and `other`.
    pub fn bounding_box(&self, other: &Region) -> Region {
        let ranges = self
            .ranges
            .iter()
            .zip(&other.ranges)
            .map(|(&[al, ah], &[bl, bh])| [al.min(bl), ah.max(bh)])
            .collect();
        Region { ranges }
    }

    /// Grows `self` in place to cover `other`.
    pub(crate) fn expand_to(&mut self, other: &Region) {
        for (own, &[low, high]) in self.ranges.iter_mut().zip(&other.ranges) {
            own[0] = own[0].min(low);
            own[1] = own[1].max(high);
        }
    }

    /// Same edges within tolerance.
    pub fn approx_eq(&self, other: &Region) -> bool {
        self.dims() == other.dims()
            && self
                .ranges
                .iter()
                .zip(&other.ranges)
                .all(|(&[al, ah], &[bl, bh])| {
                    let width = (ah - al).max(bh - bl);
                    edge_eq(al, bl, width) && edge_eq(ah, bh, width)
                })
    }

    /// Whether `point` lies inside the closed region.
    pub fn contains_point(&self, point: &[f64]) -> bool {
        point.len() == self.dims()
            && self
                .ranges
                .iter()
                .zip(point)
                .all(|(&[low, high], &x)| {
                    edge_le(low, x, high - low) && edge_le(x, high, high - low)
                })
    }

    /// Copy of `self` with one edge moved: `side == 0` replaces the low edge, `side == 1` the high one.
    pub(crate) fn with_edge(&self, dim: usize, side: usize, value: f64) -> Region {
        let mut ranges = self.ranges.clone();
        ranges[dim][side] = value;
        Region { ranges }
    }
}

impl Debug for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ranges.iter()).finish()
    }
}

impl TryFrom<Vec<[f64; 2]>> for Region {
    type Error = HistogramError;

    fn try_from(ranges: Vec<[f64; 2]>) -> Result<Self, Self::Error> {
        Region::new(ranges)
    }
}
