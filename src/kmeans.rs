//! Seeded k-means clustering.
//!
//! Shared trainer for the IVF coarse quantizer, residual-quantizer steps, and
//! the 1-D norm codebook. Uses k-means++ initialization and Lloyd iterations
//! with L2 assignment. When a seed is configured, repeated `fit` calls on the
//! same inputs produce identical centroids.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{IndexError, Result};
use crate::metric;
use crate::parallel;

/// k-means clusterer with flat row-major centroids.
#[derive(Debug, Clone)]
pub struct KMeans {
    dimension: usize,
    k: usize,
    max_iter: usize,
    seed: Option<u64>,
    threads: usize,
    /// Trained centroids, size `k * dimension`.
    centroids: Vec<f32>,
}

impl KMeans {
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(IndexError::InvalidArgument(
                "dimension and k must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            k,
            max_iter: 25,
            seed: None,
            threads: parallel::default_threads(),
            centroids: Vec::new(),
        })
    }

    /// Configure a deterministic seed for initialization.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Cap the number of Lloyd iterations (default 25).
    #[must_use]
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Pin the worker count used for assignment (default: all cores).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Train on `num_vectors` row-major vectors.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<()> {
        if vectors.len() < num_vectors * self.dimension {
            return Err(IndexError::InvalidArgument(
                "training buffer shorter than num_vectors * dimension".to_string(),
            ));
        }
        if num_vectors < self.k {
            return Err(IndexError::InvalidArgument(format!(
                "k-means needs at least k={} training points, got {num_vectors}",
                self.k
            )));
        }
        if vectors[..num_vectors * self.dimension]
            .iter()
            .any(|v| !v.is_finite())
        {
            return Err(IndexError::NumericalFailure(
                "non-finite value in k-means training data".to_string(),
            ));
        }

        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        self.centroids = self.init_plus_plus(vectors, num_vectors, &mut rng);

        let mut assignments = vec![0usize; num_vectors];
        for _ in 0..self.max_iter {
            let new_assignments = self.assign_clusters(vectors, num_vectors);
            let changed = new_assignments != assignments;
            assignments = new_assignments;
            self.update_centroids(vectors, num_vectors, &assignments);
            if !changed {
                break;
            }
        }
        Ok(())
    }

    /// k-means++ seeding: first center uniform, the rest distance-weighted.
    fn init_plus_plus(&self, vectors: &[f32], num_vectors: usize, rng: &mut StdRng) -> Vec<f32> {
        let d = self.dimension;
        let mut centroids = Vec::with_capacity(self.k * d);

        let first = rng.random_range(0..num_vectors);
        centroids.extend_from_slice(row(vectors, d, first));

        let mut min_dist: Vec<f32> = (0..num_vectors)
            .map(|i| metric::l2_sq(row(vectors, d, i), &centroids[..d]))
            .collect();

        for c in 1..self.k {
            let total: f64 = min_dist.iter().map(|&v| v as f64).sum();
            let pick = if total > 0.0 {
                let threshold = rng.random::<f64>() * total;
                let mut cumulative = 0.0f64;
                let mut chosen = num_vectors - 1;
                for (i, &dist) in min_dist.iter().enumerate() {
                    cumulative += dist as f64;
                    if cumulative >= threshold {
                        chosen = i;
                        break;
                    }
                }
                chosen
            } else {
                // All points already coincide with a center.
                rng.random_range(0..num_vectors)
            };
            let start = c * d;
            centroids.extend_from_slice(row(vectors, d, pick));
            for (i, md) in min_dist.iter_mut().enumerate() {
                let dist = metric::l2_sq(row(vectors, d, i), &centroids[start..start + d]);
                if dist < *md {
                    *md = dist;
                }
            }
        }
        centroids
    }

    /// Assign each vector to its nearest centroid.
    #[must_use]
    pub fn assign_clusters(&self, vectors: &[f32], num_vectors: usize) -> Vec<usize> {
        parallel::parallel_map(num_vectors, self.threads, |i| {
            self.assign(row(vectors, self.dimension, i))
        })
    }

    /// Nearest centroid of a single vector. Ties go to the lower index.
    #[must_use]
    pub fn assign(&self, v: &[f32]) -> usize {
        let d = self.dimension;
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.k {
            let dist = metric::l2_sq(v, &self.centroids[c * d..(c + 1) * d]);
            if dist < best_dist {
                best_dist = dist;
                best = c;
            }
        }
        best
    }

    fn update_centroids(&mut self, vectors: &[f32], num_vectors: usize, assignments: &[usize]) {
        let d = self.dimension;
        let mut sums = vec![0.0f64; self.k * d];
        let mut counts = vec![0usize; self.k];

        for (i, &c) in assignments.iter().enumerate().take(num_vectors) {
            counts[c] += 1;
            let v = row(vectors, d, i);
            for (s, &x) in sums[c * d..(c + 1) * d].iter_mut().zip(v.iter()) {
                *s += x as f64;
            }
        }

        for c in 0..self.k {
            if counts[c] > 0 {
                for j in 0..d {
                    self.centroids[c * d + j] = (sums[c * d + j] / counts[c] as f64) as f32;
                }
            }
        }

        // Empty clusters steal a perturbed copy of the biggest cluster's
        // centroid so nlist partitions stay populated.
        for c in 0..self.k {
            if counts[c] == 0 {
                let biggest = (0..self.k).max_by_key(|&i| counts[i]).unwrap_or(0);
                for j in 0..d {
                    let eps = if j % 2 == 0 { 1e-4 } else { -1e-4 };
                    self.centroids[c * d + j] = self.centroids[biggest * d + j] * (1.0 + eps);
                }
                counts[c] = counts[biggest] / 2;
                counts[biggest] -= counts[c];
            }
        }
    }

    /// Trained centroids, size `k * dimension`.
    #[must_use]
    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }
}

#[inline]
fn row(vectors: &[f32], d: usize, i: usize) -> &[f32] {
    &vectors[i * d..(i + 1) * d]
}
