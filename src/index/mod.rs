//! The polymorphic index contract.
//!
//! Every float index (flat, LSH, IVF) implements [`Index`]. Mandatory
//! operations are `add`, `search`, and `reset`; everything else has a default
//! that either derives from the mandatory set (`assign`, `compute_residual`)
//! or fails with `UnsupportedOp` so composite indexes can hold any concrete
//! kind and discover capabilities at call time.
//!
//! Batches are row-major `&[f32]` slices; the batch size is derived from the
//! slice length and the index dimension. Result ids are `i64` with `-1` as
//! the missing-slot sentinel.

pub mod binary;
pub mod flat;
pub mod ivf;
pub mod lsh;

use std::collections::HashSet;
use std::ops::Range;

use crate::error::{IndexError, Result};
use crate::metric::Metric;

/// Sentinel id for unfilled result slots.
pub const MISSING_ID: i64 = -1;

/// k-NN search output: `nq` rows of `k` slots each.
///
/// Rows are padded with [`MISSING_ID`] and the metric's worst distance when
/// fewer than `k` results exist.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub k: usize,
    /// Row-major `nq * k` ids.
    pub ids: Vec<i64>,
    /// Row-major `nq * k` distances.
    pub distances: Vec<f32>,
}

impl SearchResult {
    /// Allocate a fully padded result for `nq` queries.
    #[must_use]
    pub fn sentinel(nq: usize, k: usize, metric: Metric) -> Self {
        Self {
            k,
            ids: vec![MISSING_ID; nq * k],
            distances: vec![metric.worst(); nq * k],
        }
    }

    /// Number of query rows.
    #[must_use]
    pub fn nq(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.ids.len() / self.k
        }
    }

    /// Ids and distances of one query row.
    #[must_use]
    pub fn row(&self, q: usize) -> (&[i64], &[f32]) {
        let lo = q * self.k;
        let hi = lo + self.k;
        (&self.ids[lo..hi], &self.distances[lo..hi])
    }

    /// Fill one query row from best-first hits, leaving the tail padded.
    pub fn fill_row(&mut self, q: usize, hits: &[(i64, f32)]) {
        let lo = q * self.k;
        for (slot, &(id, dist)) in hits.iter().take(self.k).enumerate() {
            self.ids[lo + slot] = id;
            self.distances[lo + slot] = dist;
        }
    }
}

/// Range search output: per-query hit lists with no intra-query ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeResult {
    /// One `(id, distance)` list per query.
    pub queries: Vec<Vec<(i64, f32)>>,
}

/// Selects ids for [`Index::remove_ids`].
#[derive(Debug, Clone)]
pub enum IdSelector {
    /// An explicit set of ids.
    Batch(HashSet<i64>),
    /// A half-open id range.
    Range(Range<i64>),
}

impl IdSelector {
    /// Selector over an explicit id list.
    #[must_use]
    pub fn from_ids(ids: &[i64]) -> Self {
        IdSelector::Batch(ids.iter().copied().collect())
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        match self {
            IdSelector::Batch(set) => set.contains(&id),
            IdSelector::Range(range) => range.contains(&id),
        }
    }
}

/// Polymorphic contract for float vector indexes.
pub trait Index: Send + Sync {
    /// Vector dimensionality.
    fn d(&self) -> usize;

    /// Number of indexed vectors.
    fn ntotal(&self) -> usize;

    /// The metric searches rank by.
    fn metric(&self) -> Metric;

    /// Whether the index is ready for `add`/`search`.
    fn is_trained(&self) -> bool;

    /// Train on a representative batch. No-op for indexes born trained.
    fn train(&mut self, x: &[f32]) -> Result<()> {
        let _ = check_batch(self.d(), x)?;
        Ok(())
    }

    /// Append vectors with sequential ids `ntotal..ntotal + n`.
    fn add(&mut self, x: &[f32]) -> Result<()>;

    /// Append vectors with caller-chosen ids.
    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        let _ = (x, ids);
        Err(IndexError::UnsupportedOp("add_with_ids"))
    }

    /// k-nearest-neighbor search over a query batch.
    fn search(&self, x: &[f32], k: usize) -> Result<SearchResult>;

    /// All points with distance strictly better than `radius`
    /// (`< radius` for distances, `> radius` for similarities).
    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeResult> {
        let _ = (x, radius);
        Err(IndexError::UnsupportedOp("range_search"))
    }

    /// Nearest-neighbor ids only.
    fn assign(&self, x: &[f32], k: usize) -> Result<Vec<i64>> {
        Ok(self.search(x, k)?.ids)
    }

    /// Recover the stored vector for `key` (an approximation when coding is
    /// lossy).
    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        let _ = key;
        Err(IndexError::UnsupportedOp("reconstruct"))
    }

    /// Reconstruct keys `i0..i0 + ni` into one contiguous buffer.
    fn reconstruct_n(&self, i0: i64, ni: usize) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(ni * self.d());
        for key in i0..i0 + ni as i64 {
            out.extend_from_slice(&self.reconstruct(key)?);
        }
        Ok(out)
    }

    /// `x - reconstruct(key)`, the residual used by multi-stage indexes.
    fn compute_residual(&self, x: &[f32], key: i64) -> Result<Vec<f32>> {
        if x.len() != self.d() {
            return Err(IndexError::DimensionMismatch {
                expected: self.d(),
                got: x.len(),
            });
        }
        let recon = self.reconstruct(key)?;
        Ok(x.iter().zip(recon.iter()).map(|(a, b)| a - b).collect())
    }

    /// Drop all stored vectors, keep training.
    fn reset(&mut self);

    /// Remove selected ids; returns the number removed.
    fn remove_ids(&mut self, sel: &IdSelector) -> Result<usize> {
        let _ = sel;
        Err(IndexError::UnsupportedOp("remove_ids"))
    }
}

/// Validate a row-major batch against dimension `d`, returning the batch size.
pub(crate) fn check_batch(d: usize, x: &[f32]) -> Result<usize> {
    if d == 0 || x.len() % d != 0 {
        return Err(IndexError::DimensionMismatch {
            expected: d,
            got: x.len(),
        });
    }
    Ok(x.len() / d)
}

/// Validate common search arguments.
pub(crate) fn check_search(index: &dyn Index, x: &[f32], k: usize) -> Result<usize> {
    if !index.is_trained() {
        return Err(IndexError::NotTrained);
    }
    if k == 0 {
        return Err(IndexError::InvalidArgument("k must be positive".to_string()));
    }
    check_batch(index.d(), x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_result_is_fully_padded() {
        let r = SearchResult::sentinel(2, 3, Metric::L2);
        assert_eq!(r.nq(), 2);
        assert!(r.ids.iter().all(|&id| id == MISSING_ID));
        assert!(r.distances.iter().all(|&d| d == f32::INFINITY));

        let r = SearchResult::sentinel(1, 2, Metric::InnerProduct);
        assert!(r.distances.iter().all(|&d| d == f32::NEG_INFINITY));
    }

    #[test]
    fn fill_row_leaves_tail_padded() {
        let mut r = SearchResult::sentinel(1, 4, Metric::L2);
        r.fill_row(0, &[(5, 0.5), (2, 1.0)]);
        let (ids, dists) = r.row(0);
        assert_eq!(ids, &[5, 2, MISSING_ID, MISSING_ID]);
        assert_eq!(dists[0], 0.5);
        assert_eq!(dists[3], f32::INFINITY);
    }

    #[test]
    fn selector_variants() {
        let sel = IdSelector::from_ids(&[1, 5, 9]);
        assert!(sel.contains(5));
        assert!(!sel.contains(2));

        let sel = IdSelector::Range(10..20);
        assert!(sel.contains(10));
        assert!(!sel.contains(20));
    }

    #[test]
    fn batch_validation() {
        assert_eq!(check_batch(4, &[0.0; 12]).unwrap(), 3);
        assert!(check_batch(4, &[0.0; 10]).is_err());
    }
}
