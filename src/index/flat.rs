//! Exact brute-force index over row-major float vectors.
//!
//! The baseline every other index is judged against: stores vectors verbatim
//! and scans all of them per query. For L2 and inner product the scan is a
//! bulk query-by-database product (with cached database norms for L2); the
//! long-tail metrics fall back to per-pair kernels. Searching with
//! `k = ntotal` returns the entire database in exact distance order.

use crate::error::{IndexError, Result};
use crate::index::{check_batch, check_search, IdSelector, Index, RangeResult, SearchResult};
use crate::linalg;
use crate::metric::{self, Metric};
use crate::parallel;
use crate::selector::TopK;

/// Exact flat index. Ids are positions: the i-th added vector is id `i`.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    d: usize,
    metric: Metric,
    /// Row-major stored vectors, stride `d`.
    vectors: Vec<f32>,
    /// Cached squared norms, one per stored vector (L2 bulk path).
    norms: Vec<f32>,
    threads: usize,
}

impl FlatIndex {
    pub fn new(d: usize, metric: Metric) -> Result<Self> {
        if d == 0 {
            return Err(IndexError::InvalidArgument(
                "dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            d,
            metric,
            vectors: Vec::new(),
            norms: Vec::new(),
            threads: parallel::default_threads(),
        })
    }

    /// Pin the worker count for batch search (default: all cores).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    #[inline]
    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.d..(i + 1) * self.d]
    }

    /// Stored vectors as one row-major slice.
    #[must_use]
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Rank all stored vectors against one query, best first.
    ///
    /// L2 and inner product go through one query-by-database product; L2
    /// recovers distances from the cached norms as `‖q‖² + ‖y‖² − 2·q·y`.
    fn scan_query(&self, q: &[f32], k: usize) -> Vec<(i64, f32)> {
        let mut sel = TopK::new(k, self.metric.is_similarity());
        match self.metric {
            Metric::L2 => {
                let qn = metric::norm_sq(q);
                let dots = linalg::matmul_nt(q, &self.vectors, 1, self.ntotal(), self.d);
                for (i, &dp) in dots.iter().enumerate() {
                    sel.push(i as i64, (qn + self.norms[i] - 2.0 * dp).max(0.0));
                }
            }
            Metric::InnerProduct => {
                let dots = linalg::matmul_nt(q, &self.vectors, 1, self.ntotal(), self.d);
                for (i, &dp) in dots.iter().enumerate() {
                    sel.push(i as i64, dp);
                }
            }
            m => {
                for i in 0..self.ntotal() {
                    sel.push(i as i64, m.distance(q, self.row(i)));
                }
            }
        }
        sel.into_sorted()
    }
}

impl Index for FlatIndex {
    fn d(&self) -> usize {
        self.d
    }

    fn ntotal(&self) -> usize {
        self.norms.len()
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    /// Flat indexes are born trained.
    fn is_trained(&self) -> bool {
        true
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        let n = check_batch(self.d, x)?;
        self.vectors.extend_from_slice(x);
        for i in 0..n {
            self.norms.push(metric::norm_sq(&x[i * self.d..(i + 1) * self.d]));
        }
        Ok(())
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResult> {
        let nq = check_search(self, x, k)?;
        let mut result = SearchResult::sentinel(nq, k, self.metric);
        let rows = parallel::parallel_map(nq, self.threads, |qi| {
            self.scan_query(&x[qi * self.d..(qi + 1) * self.d], k)
        });
        for (qi, hits) in rows.iter().enumerate() {
            result.fill_row(qi, hits);
        }
        Ok(result)
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeResult> {
        let nq = check_batch(self.d, x)?;
        let similarity = self.metric.is_similarity();
        let queries = parallel::parallel_map(nq, self.threads, |qi| {
            let q = &x[qi * self.d..(qi + 1) * self.d];
            let mut hits = Vec::new();
            for i in 0..self.ntotal() {
                let dist = self.metric.distance(q, self.row(i));
                let keep = if similarity { dist > radius } else { dist < radius };
                if keep {
                    hits.push((i as i64, dist));
                }
            }
            hits
        });
        Ok(RangeResult { queries })
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        let idx = usize::try_from(key).ok().filter(|&i| i < self.ntotal());
        match idx {
            Some(i) => Ok(self.row(i).to_vec()),
            None => Err(IndexError::InvalidArgument(format!(
                "key {key} out of range 0..{}",
                self.ntotal()
            ))),
        }
    }

    fn reset(&mut self) {
        self.vectors.clear();
        self.norms.clear();
    }

    /// Removal compacts the store; surviving vectors are renumbered to their
    /// new positions.
    fn remove_ids(&mut self, sel: &IdSelector) -> Result<usize> {
        let before = self.ntotal();
        let d = self.d;
        let mut write = 0usize;
        for read in 0..before {
            if !sel.contains(read as i64) {
                if write != read {
                    let (dst, src) = self.vectors.split_at_mut(read * d);
                    dst[write * d..(write + 1) * d].copy_from_slice(&src[..d]);
                    self.norms[write] = self.norms[read];
                }
                write += 1;
            }
        }
        self.vectors.truncate(write * d);
        self.norms.truncate(write);
        Ok(before - write)
    }
}
