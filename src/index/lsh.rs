//! Sign-bit locality-sensitive hashing.
//!
//! Each vector is reduced to `nbits` sign bits: optionally rotate with a
//! seeded orthonormal matrix, subtract per-bit thresholds, keep the signs,
//! pack into bytes. Queries are encoded the same way and ranked by Hamming
//! distance against the stored codes.
//!
//! With `train_thresholds` the thresholds are per-bit medians of the training
//! data (balancing each bit); otherwise they are zero. With `rotate_data` the
//! rotation is sampled at train time from the seed fixed at construction;
//! otherwise the first `nbits` coordinates are used as-is.

use crate::bits::{hamming, BitWriter};
use crate::error::{IndexError, Result};
use crate::index::{check_batch, check_search, Index, SearchResult};
use crate::metric::Metric;
use crate::parallel;
use crate::rotation::RandomRotation;
use crate::selector::TopK;

/// Sign-bit LSH index over `nbits <= d` hash bits.
#[derive(Debug, Clone)]
pub struct LshIndex {
    d: usize,
    nbits: usize,
    rotate_data: bool,
    train_thresholds: bool,
    seed: u64,
    rotation: Option<RandomRotation>,
    /// Per-bit thresholds, all zero unless trained.
    thresholds: Vec<f32>,
    /// Packed codes, `ceil(nbits/8)` bytes per vector.
    codes: Vec<u8>,
    ntotal: usize,
    trained: bool,
    threads: usize,
}

impl LshIndex {
    pub fn new(d: usize, nbits: usize, rotate_data: bool, train_thresholds: bool) -> Result<Self> {
        if d == 0 || nbits == 0 {
            return Err(IndexError::InvalidArgument(
                "d and nbits must be positive".to_string(),
            ));
        }
        if nbits > d {
            return Err(IndexError::InvalidArgument(format!(
                "nbits ({nbits}) cannot exceed d ({d})"
            )));
        }
        Ok(Self {
            d,
            nbits,
            rotate_data,
            train_thresholds,
            seed: 0x5f3a_91cd,
            rotation: None,
            thresholds: vec![0.0; nbits],
            codes: Vec::new(),
            ntotal: 0,
            trained: !(rotate_data || train_thresholds),
            threads: parallel::default_threads(),
        })
    }

    /// Fix the rotation seed (part of trained state).
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Bytes per stored code.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.nbits.div_ceil(8)
    }

    #[must_use]
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Project a vector onto the `nbits` hash coordinates.
    fn project(&self, v: &[f32]) -> Vec<f32> {
        match &self.rotation {
            Some(rot) => rot.apply_truncated(v, self.nbits),
            None => v[..self.nbits].to_vec(),
        }
    }

    /// Encode one vector into its packed sign code.
    #[must_use]
    pub fn encode(&self, v: &[f32]) -> Vec<u8> {
        let proj = self.project(v);
        let mut code = vec![0u8; self.code_size()];
        let mut w = BitWriter::new(&mut code);
        for (p, t) in proj.iter().zip(self.thresholds.iter()) {
            w.write(u64::from(p - t >= 0.0), 1);
        }
        code
    }

    fn stored_code(&self, i: usize) -> &[u8] {
        let cs = self.code_size();
        &self.codes[i * cs..(i + 1) * cs]
    }
}

impl Index for LshIndex {
    fn d(&self) -> usize {
        self.d
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    /// Hamming distances are reported through the L2 (minimizing) convention.
    fn metric(&self) -> Metric {
        Metric::L2
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        let n = check_batch(self.d, x)?;
        if self.rotate_data {
            self.rotation = Some(RandomRotation::sample(self.d, self.seed));
        }
        if self.train_thresholds {
            if n == 0 {
                return Err(IndexError::InvalidArgument(
                    "threshold training needs a non-empty batch".to_string(),
                ));
            }
            // Median of each projected coordinate over the training batch.
            let mut columns = vec![Vec::with_capacity(n); self.nbits];
            for i in 0..n {
                let proj = self.project(&x[i * self.d..(i + 1) * self.d]);
                for (col, p) in columns.iter_mut().zip(proj.iter()) {
                    col.push(*p);
                }
            }
            for (t, col) in self.thresholds.iter_mut().zip(columns.iter_mut()) {
                col.sort_by(f32::total_cmp);
                let mid = col.len() / 2;
                *t = if col.len() % 2 == 1 {
                    col[mid]
                } else {
                    0.5 * (col[mid - 1] + col[mid])
                };
            }
        }
        self.trained = true;
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        if !self.trained {
            return Err(IndexError::NotTrained);
        }
        let n = check_batch(self.d, x)?;
        for i in 0..n {
            let code = self.encode(&x[i * self.d..(i + 1) * self.d]);
            self.codes.extend_from_slice(&code);
        }
        self.ntotal += n;
        Ok(())
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResult> {
        let nq = check_search(self, x, k)?;
        let mut result = SearchResult::sentinel(nq, k, self.metric());
        let rows = parallel::parallel_map(nq, self.threads, |qi| {
            let qcode = self.encode(&x[qi * self.d..(qi + 1) * self.d]);
            let mut sel = TopK::new(k, false);
            for i in 0..self.ntotal {
                sel.push(i as i64, hamming(&qcode, self.stored_code(i)) as f32);
            }
            sel.into_sorted()
        });
        for (qi, hits) in rows.iter().enumerate() {
            result.fill_row(qi, hits);
        }
        Ok(result)
    }

    /// Keeps the trained rotation and thresholds.
    fn reset(&mut self) {
        self.codes.clear();
        self.ntotal = 0;
    }
}
