//! Distance metrics for dense vectors.
//!
//! A single, shared definition of the metrics supported by proxima indexes.
//! Flat indexes support every variant; the quantized search paths (IVF, the
//! additive-quantizer scorers) require [`Metric::L2`] or
//! [`Metric::InnerProduct`] and reject the rest at call time.
//!
//! ## Orientation
//!
//! L2 and the Minkowski family are *distances*: smaller is closer. Inner
//! product and Jaccard are *similarities*: larger is closer. The
//! [`Metric::is_similarity`] flag tells search paths which way to select, and
//! [`Metric::worst`] gives the padding sentinel for unfilled result slots.

use serde::{Deserialize, Serialize};

/// Distance metric for dense `f32` vectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean (L2) distance.
    L2,
    /// Inner product $\langle a,b\rangle$ (similarity, for MIPS).
    InnerProduct,
    /// Manhattan (L1) distance.
    L1,
    /// Chebyshev (L∞) distance.
    Linf,
    /// Minkowski distance accumulated as $\sum_i |a_i-b_i|^p$ (no root).
    Lp(f32),
    /// Canberra distance $\sum_i |a_i-b_i| / (|a_i|+|b_i|)$.
    Canberra,
    /// Bray-Curtis dissimilarity $\sum_i |a_i-b_i| / \sum_i |a_i+b_i|$.
    BrayCurtis,
    /// Jensen-Shannon divergence between non-negative vectors.
    JensenShannon,
    /// Weighted Jaccard similarity $\sum_i \min(a_i,b_i) / \sum_i \max(a_i,b_i)$.
    Jaccard,
}

impl Metric {
    /// Whether larger values mean closer (similarity orientation).
    #[inline]
    #[must_use]
    pub fn is_similarity(self) -> bool {
        matches!(self, Metric::InnerProduct | Metric::Jaccard)
    }

    /// Sentinel distance for unfilled result slots.
    #[inline]
    #[must_use]
    pub fn worst(self) -> f32 {
        if self.is_similarity() {
            f32::NEG_INFINITY
        } else {
            f32::INFINITY
        }
    }

    /// Compute the metric between two vectors of equal length.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2 => l2_sq(a, b),
            Metric::InnerProduct => dot(a, b),
            Metric::L1 => l1(a, b),
            Metric::Linf => linf(a, b),
            Metric::Lp(p) => lp(a, b, p),
            Metric::Canberra => canberra(a, b),
            Metric::BrayCurtis => bray_curtis(a, b),
            Metric::JensenShannon => jensen_shannon(a, b),
            Metric::Jaccard => jaccard(a, b),
        }
    }
}

/// Squared L2 distance.
#[inline]
#[must_use]
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Dot product.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Squared L2 norm.
#[inline]
#[must_use]
pub fn norm_sq(v: &[f32]) -> f32 {
    dot(v, v)
}

/// L1 (Manhattan) distance.
#[inline]
#[must_use]
pub fn l1(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// L∞ (Chebyshev) distance.
#[inline]
#[must_use]
pub fn linf(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// Minkowski distance accumulated without the final `1/p` root.
///
/// The root is monotone, so rankings are unaffected.
#[inline]
#[must_use]
pub fn lp(a: &[f32], b: &[f32], p: f32) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs().powf(p))
        .sum()
}

/// Canberra distance. Coordinates where both inputs are zero contribute 0.
#[inline]
#[must_use]
pub fn canberra(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let den = x.abs() + y.abs();
            if den > 0.0 {
                (x - y).abs() / den
            } else {
                0.0
            }
        })
        .sum()
}

/// Bray-Curtis dissimilarity. Returns 0 when the denominator vanishes.
#[inline]
#[must_use]
pub fn bray_curtis(a: &[f32], b: &[f32]) -> f32 {
    let mut num = 0.0f32;
    let mut den = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        num += (x - y).abs();
        den += (x + y).abs();
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Jensen-Shannon divergence. Inputs are treated as non-negative weights;
/// zero coordinates contribute 0 by the usual `0·log 0 = 0` convention.
#[inline]
#[must_use]
pub fn jensen_shannon(a: &[f32], b: &[f32]) -> f32 {
    let mut accu = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let m = 0.5 * (x + y);
        if x > 0.0 {
            accu += x * (x / m).ln();
        }
        if y > 0.0 {
            accu += y * (y / m).ln();
        }
    }
    0.5 * accu
}

/// Weighted Jaccard similarity over non-negative vectors.
#[inline]
#[must_use]
pub fn jaccard(a: &[f32], b: &[f32]) -> f32 {
    let mut num = 0.0f32;
    let mut den = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        num += x.min(y);
        den += x.max(y);
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
