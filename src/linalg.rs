//! Dense linear-algebra kernels.
//!
//! Portable row-major helpers shared by the flat search path (bulk
//! query-by-database products), the rotation sampler (Gram-Schmidt), and the
//! local-search codebook update (Cholesky solve of the regularized normal
//! equations). Everything here is scalar code in the same spirit as the
//! distance kernels; swapping in a BLAS is a drop-in change behind these
//! signatures.

use crate::error::{IndexError, Result};

/// `C = A · Bᵀ` where `A` is `m×k` and `B` is `n×k`, both row-major.
///
/// The output is `m×n` row-major. This is the shape every search path wants:
/// queries times database rows, or queries times codebook entries.
#[must_use]
pub fn matmul_nt(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), n * k);
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        let row = &a[i * k..(i + 1) * k];
        let orow = &mut out[i * n..(i + 1) * n];
        for (j, o) in orow.iter_mut().enumerate() {
            let brow = &b[j * k..(j + 1) * k];
            let mut s = 0.0f32;
            for (x, y) in row.iter().zip(brow.iter()) {
                s += x * y;
            }
            *o = s;
        }
    }
    out
}

/// Matrix-vector product `y = M·v` for a row-major `rows×cols` matrix.
#[must_use]
pub fn matvec(m: &[f32], v: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    debug_assert_eq!(m.len(), rows * cols);
    debug_assert_eq!(v.len(), cols);
    let mut out = vec![0.0f32; rows];
    for (i, o) in out.iter_mut().enumerate() {
        let row = &m[i * cols..(i + 1) * cols];
        let mut s = 0.0f32;
        for (x, y) in row.iter().zip(v.iter()) {
            s += x * y;
        }
        *o = s;
    }
    out
}

/// Orthonormalize the rows of a square `d×d` matrix in place (Gram-Schmidt).
///
/// Rows that collapse to zero are replaced with a unit basis vector so the
/// result is always a full orthonormal set.
pub fn orthonormalize_rows(m: &mut [f32], d: usize) {
    debug_assert_eq!(m.len(), d * d);
    for i in 0..d {
        for j in 0..i {
            let mut proj = 0.0f32;
            for k in 0..d {
                proj += m[i * d + k] * m[j * d + k];
            }
            for k in 0..d {
                m[i * d + k] -= proj * m[j * d + k];
            }
        }
        let mut norm = 0.0f32;
        for k in 0..d {
            norm += m[i * d + k] * m[i * d + k];
        }
        norm = norm.sqrt();
        if norm > 1e-10 {
            for k in 0..d {
                m[i * d + k] /= norm;
            }
        } else {
            for k in 0..d {
                m[i * d + k] = 0.0;
            }
            m[i * d + i % d] = 1.0;
        }
    }
}

/// Per-column mean and standard deviation of an `n×d` row-major matrix.
#[must_use]
pub fn column_stddev(x: &[f32], n: usize, d: usize) -> Vec<f32> {
    debug_assert_eq!(x.len(), n * d);
    let mut mean = vec![0.0f64; d];
    for row in x.chunks_exact(d) {
        for (m, &v) in mean.iter_mut().zip(row.iter()) {
            *m += v as f64;
        }
    }
    for m in &mut mean {
        *m /= n.max(1) as f64;
    }
    let mut var = vec![0.0f64; d];
    for row in x.chunks_exact(d) {
        for ((s, &v), &m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
            let diff = v as f64 - m;
            *s += diff * diff;
        }
    }
    var.iter()
        .map(|&s| ((s / n.max(1) as f64).sqrt()) as f32)
        .collect()
}

/// Solve `A · X = B` in place for symmetric positive-definite `A` (`n×n`),
/// with `B` an `n×nrhs` row-major right-hand side. `A` is destroyed and `B`
/// is overwritten with the solution.
///
/// Fails with `NumericalFailure` when a pivot is not strictly positive,
/// which for the regularized normal equations means the inputs contained
/// non-finite values.
pub fn cholesky_solve(a: &mut [f32], b: &mut [f32], n: usize, nrhs: usize) -> Result<()> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * nrhs);

    // Factor A = L·Lᵀ, storing L in the lower triangle.
    for j in 0..n {
        let mut diag = a[j * n + j] as f64;
        for k in 0..j {
            let l = a[j * n + k] as f64;
            diag -= l * l;
        }
        if !(diag > 0.0) || !diag.is_finite() {
            return Err(IndexError::NumericalFailure(format!(
                "Cholesky pivot {j} is not positive"
            )));
        }
        let diag = diag.sqrt();
        a[j * n + j] = diag as f32;
        for i in (j + 1)..n {
            let mut s = a[i * n + j] as f64;
            for k in 0..j {
                s -= a[i * n + k] as f64 * a[j * n + k] as f64;
            }
            a[i * n + j] = (s / diag) as f32;
        }
    }

    // Forward substitution: L·Y = B.
    for i in 0..n {
        for k in 0..i {
            let l = a[i * n + k];
            for c in 0..nrhs {
                b[i * nrhs + c] -= l * b[k * nrhs + c];
            }
        }
        let diag = a[i * n + i];
        for c in 0..nrhs {
            b[i * nrhs + c] /= diag;
        }
    }

    // Back substitution: Lᵀ·X = Y.
    for i in (0..n).rev() {
        for k in (i + 1)..n {
            let l = a[k * n + i];
            for c in 0..nrhs {
                b[i * nrhs + c] -= l * b[k * nrhs + c];
            }
        }
        let diag = a[i * n + i];
        for c in 0..nrhs {
            b[i * nrhs + c] /= diag;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_nt_matches_hand_result() {
        // A = [[1,2],[3,4]], B = [[5,6],[7,8]] -> A·Bᵀ = [[17,23],[39,53]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let c = matmul_nt(&a, &b, 2, 2, 2);
        assert_eq!(c, vec![17.0, 23.0, 39.0, 53.0]);
    }

    #[test]
    fn orthonormalized_rows_are_orthonormal() {
        let d = 4;
        let mut m: Vec<f32> = (0..d * d).map(|i| ((i * 31 + 7) % 13) as f32 - 6.0).collect();
        orthonormalize_rows(&mut m, d);
        for i in 0..d {
            for j in 0..d {
                let mut dot = 0.0f32;
                for k in 0..d {
                    dot += m[i * d + k] * m[j * d + k];
                }
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (dot - expect).abs() < 1e-4,
                    "rows {i},{j}: dot = {dot}"
                );
            }
        }
    }

    #[test]
    fn cholesky_solves_spd_system() {
        // A = [[4,2],[2,3]], B = [[2],[1]] -> X = [[0.5],[0]]
        let mut a = vec![4.0, 2.0, 2.0, 3.0];
        let mut b = vec![2.0, 1.0];
        cholesky_solve(&mut a, &mut b, 2, 1).unwrap();
        assert!((b[0] - 0.5).abs() < 1e-5);
        assert!(b[1].abs() < 1e-5);
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let mut a = vec![0.0, 0.0, 0.0, 0.0];
        let mut b = vec![1.0, 1.0];
        let err = cholesky_solve(&mut a, &mut b, 2, 1).unwrap_err();
        assert_eq!(err.code(), "numerical_failure");
    }

    #[test]
    fn column_stddev_on_constant_columns_is_zero() {
        let x = [3.0f32, 1.0, 3.0, 2.0, 3.0, 3.0];
        let std = column_stddev(&x, 3, 2);
        assert!(std[0].abs() < 1e-6);
        assert!(std[1] > 0.0);
    }
}
