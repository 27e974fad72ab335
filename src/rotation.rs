//! Seeded random orthonormal rotations.
//!
//! LSH (and any preprocessing stage that wants decorrelated coordinates)
//! applies a d×d orthonormal matrix sampled once from a seeded generator:
//! Gaussian entries followed by Gram-Schmidt. The seed is part of trained
//! state, so re-training with the same seed reproduces the same rotation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::linalg;

/// A d×d orthonormal rotation, stored row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomRotation {
    d: usize,
    matrix: Vec<f32>,
}

impl RandomRotation {
    /// The identity rotation.
    #[must_use]
    pub fn identity(d: usize) -> Self {
        let mut matrix = vec![0.0f32; d * d];
        for i in 0..d {
            matrix[i * d + i] = 1.0;
        }
        Self { d, matrix }
    }

    /// Sample a uniform-ish random rotation from the given seed.
    #[must_use]
    pub fn sample(d: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut matrix = vec![0.0f32; d * d];
        for v in &mut matrix {
            *v = gaussian(&mut rng);
        }
        linalg::orthonormalize_rows(&mut matrix, d);
        Self { d, matrix }
    }

    #[must_use]
    pub fn d(&self) -> usize {
        self.d
    }

    /// Apply the rotation: `y = R·x`.
    #[must_use]
    pub fn apply(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.d);
        linalg::matvec(&self.matrix, x, self.d, self.d)
    }

    /// Apply only the first `rows` output coordinates of the rotation.
    ///
    /// Used when projecting d dimensions onto `nbits < d` hash bits.
    #[must_use]
    pub fn apply_truncated(&self, x: &[f32], rows: usize) -> Vec<f32> {
        debug_assert!(rows <= self.d);
        linalg::matvec(&self.matrix[..rows * self.d], x, rows, self.d)
    }

    /// Row-major matrix access.
    #[must_use]
    pub fn matrix(&self) -> &[f32] {
        &self.matrix
    }
}

/// Standard normal sample via Box-Muller.
pub(crate) fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    ((-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()) as f32
}
