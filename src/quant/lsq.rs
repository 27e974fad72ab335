//! Local-search quantizer.
//!
//! Training alternates two phases: codebooks are re-solved from the current
//! codes by Tikhonov-regularized least squares, and codes are re-chosen given
//! the codebooks by iterated conditional modes (ICM) wrapped in iterated
//! local search (ILS). Between rounds the codebooks can be nudged by a
//! simulated-annealing perturbation scaled by the per-dimension spread of the
//! training data, cooled geometrically.
//!
//! Encoding is chunked; each chunk draws from its own RNG stream derived from
//! the quantizer seed and the chunk index, so results are reproducible for a
//! fixed seed regardless of the worker count.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::linalg;
use crate::metric::Metric;
use crate::observer::{NoopObserver, Phase, TrainingObserver};
use crate::parallel;
use crate::quant::aq::{AdditiveQuantizer, SearchType};
use crate::quant::rq::{aq_query_scorer, step_seed};
use crate::quant::{check_scorer_args, CodeScorer, Encoder};
use crate::rotation::gaussian;

/// Local-search quantizer with `M` codebooks of `2^nbits` entries each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSearchQuantizer {
    core: AdditiveQuantizer,
    /// Alternating-optimization rounds during training.
    train_iters: usize,
    /// ILS restarts per code update during training.
    train_ils_iters: usize,
    /// ILS restarts when encoding at inference time.
    encode_ils_iters: usize,
    /// ICM sweeps per ILS restart.
    icm_iters: usize,
    /// Simulated-annealing temperature factor; 0 disables perturbation.
    p: f32,
    /// Tikhonov regularization of the codebook update.
    lambd: f32,
    /// Codes perturbed per vector between ILS restarts.
    nperts: usize,
    /// Vectors encoded per worker chunk.
    chunk_size: usize,
    random_seed: u64,
    #[serde(skip, default = "parallel::default_threads")]
    threads: usize,
    /// Mean squared reconstruction error over the training set.
    train_loss: f32,
}

impl LocalSearchQuantizer {
    pub fn new(d: usize, m: usize, nbits: u32, search_type: SearchType) -> Result<Self> {
        Ok(Self {
            core: AdditiveQuantizer::new(d, m, nbits, search_type)?,
            train_iters: 25,
            train_ils_iters: 8,
            encode_ils_iters: 16,
            icm_iters: 4,
            p: 0.5,
            lambd: 1e-2,
            nperts: 4,
            chunk_size: 10_000,
            random_seed: 0x12345,
            threads: parallel::default_threads(),
            train_loss: f32::INFINITY,
        })
    }

    #[must_use]
    pub fn with_train_iters(mut self, iters: usize) -> Self {
        self.train_iters = iters.max(1);
        self
    }

    #[must_use]
    pub fn with_ils_iters(mut self, train: usize, encode: usize) -> Self {
        self.train_ils_iters = train.max(1);
        self.encode_ils_iters = encode.max(1);
        self
    }

    #[must_use]
    pub fn with_icm_iters(mut self, iters: usize) -> Self {
        self.icm_iters = iters.max(1);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, p: f32) -> Self {
        self.p = p.max(0.0);
        self
    }

    #[must_use]
    pub fn with_lambda(mut self, lambd: f32) -> Self {
        self.lambd = lambd;
        self
    }

    #[must_use]
    pub fn with_nperts(mut self, nperts: usize) -> Self {
        self.nperts = nperts;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// The shared codebook/packing state.
    #[must_use]
    pub fn core(&self) -> &AdditiveQuantizer {
        &self.core
    }

    /// Mean squared reconstruction error reported by the last `train`.
    #[must_use]
    pub fn train_loss(&self) -> f32 {
        self.train_loss
    }

    /// Entries per codebook (uniform for this quantizer).
    #[inline]
    fn k(&self) -> usize {
        self.core.k(0)
    }

    /// Train, reporting phase boundaries to `observer`.
    pub fn train_with_observer(
        &mut self,
        x: &[f32],
        observer: &dyn TrainingObserver,
    ) -> Result<()> {
        self.core.set_trained(false);
        let result = self.train_inner(x, observer);
        if result.is_err() {
            self.core.flat_codebooks_mut().fill(0.0);
            self.train_loss = f32::INFINITY;
        }
        result
    }

    fn train_inner(&mut self, x: &[f32], observer: &dyn TrainingObserver) -> Result<()> {
        let d = self.core.d();
        if x.is_empty() || x.len() % d != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: d,
                got: x.len(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NumericalFailure(
                "non-finite value in training data".to_string(),
            ));
        }
        let n = x.len() / d;
        let m = self.core.m();
        let k = self.k();

        let stddev = linalg::column_stddev(x, n, d);
        let mut rng = StdRng::seed_from_u64(self.random_seed);
        let mut codes: Vec<u32> = (0..n * m).map(|_| rng.random_range(0..k) as u32).collect();

        let mut temperature = self.p;
        for it in 0..self.train_iters {
            {
                let _phase = Phase::enter(observer, "update_codebooks");
                self.update_codebooks(x, &codes, n)?;
            }
            let last_round = it + 1 == self.train_iters;
            if temperature > 0.0 && !last_round {
                let _phase = Phase::enter(observer, "perturb_codebooks");
                self.perturb_codebooks(temperature, &stddev, &mut rng);
                temperature *= 0.8;
            }
            {
                let _phase = Phase::enter(observer, "icm_encode");
                self.icm_pass(x, &mut codes, self.train_ils_iters, it as u64 + 1);
            }
        }

        self.train_loss = self.evaluate(x, &codes, n);
        if !self.train_loss.is_finite() {
            return Err(IndexError::NumericalFailure(
                "non-finite training loss".to_string(),
            ));
        }

        let mut recon = vec![0.0f32; d];
        let mut recon_norms = Vec::with_capacity(n);
        for i in 0..n {
            self.core.decode_indices(&codes[i * m..(i + 1) * m], &mut recon);
            recon_norms.push(crate::metric::norm_sq(&recon));
        }
        self.core.train_norms(&recon_norms, self.random_seed)?;
        self.core.set_trained(true);
        Ok(())
    }

    /// Solve `min_C ||X − B·C||² + λ‖C‖²` for the flattened codebook matrix,
    /// where `B` is the one-hot code assignment matrix.
    fn update_codebooks(&mut self, x: &[f32], codes: &[u32], n: usize) -> Result<()> {
        let d = self.core.d();
        let m = self.core.m();
        let k = self.k();
        let mk = m * k;
        // The normal equations need an mk×mk Gram matrix and an O(mk³) solve.
        if mk > 1 << 14 {
            return Err(IndexError::ResourceExhausted(format!(
                "codebook update needs a {mk}x{mk} system; reduce M or nbits"
            )));
        }

        // Gram matrix BᵀB and right-hand side BᵀX, accumulated from codes.
        let mut gram = vec![0.0f32; mk * mk];
        let mut rhs = vec![0.0f32; mk * d];
        for i in 0..n {
            let ci = &codes[i * m..(i + 1) * m];
            let xi = &x[i * d..(i + 1) * d];
            for (mi, &c) in ci.iter().enumerate() {
                let e = mi * k + c as usize;
                for (mj, &c2) in ci.iter().enumerate() {
                    gram[e * mk + mj * k + c2 as usize] += 1.0;
                }
                for (r, &v) in rhs[e * d..(e + 1) * d].iter_mut().zip(xi.iter()) {
                    *r += v;
                }
            }
        }
        for j in 0..mk {
            gram[j * mk + j] += self.lambd.max(1e-8);
        }
        linalg::cholesky_solve(&mut gram, &mut rhs, mk, d)?;
        self.core.flat_codebooks_mut().copy_from_slice(&rhs);
        Ok(())
    }

    /// Simulated-annealing nudge: every codebook coordinate moves by a
    /// Gaussian step scaled by the training spread of its dimension.
    fn perturb_codebooks(&mut self, temperature: f32, stddev: &[f32], rng: &mut StdRng) {
        let d = self.core.d();
        let codebooks = self.core.flat_codebooks_mut();
        for (idx, v) in codebooks.iter_mut().enumerate() {
            *v += temperature * stddev[idx % d] * gaussian(rng);
        }
    }

    /// `2⟨C_e1, C_e2⟩` for every pair of codebook entries.
    fn binary_terms(&self) -> Vec<f32> {
        let mk = self.core.total_entries();
        let d = self.core.d();
        let mut terms = linalg::matmul_nt(
            self.core.flat_codebooks(),
            self.core.flat_codebooks(),
            mk,
            mk,
            d,
        );
        for t in &mut terms {
            *t *= 2.0;
        }
        terms
    }

    /// One chunked, parallel code-update pass over all vectors.
    fn icm_pass(&self, x: &[f32], codes: &mut [u32], ils_iters: usize, salt: u64) {
        let d = self.core.d();
        let m = self.core.m();
        let n = x.len() / d;
        let binaries = self.binary_terms();
        let entry_norms: Vec<f32> = (0..self.core.total_entries())
            .map(|e| binaries[e * self.core.total_entries() + e] * 0.5)
            .collect();

        let nchunks = n.div_ceil(self.chunk_size);
        let updated = parallel::parallel_map(nchunks, self.threads, |ci| {
            let lo = ci * self.chunk_size;
            let hi = ((ci + 1) * self.chunk_size).min(n);
            let mut chunk = codes[lo * m..hi * m].to_vec();
            let mut rng =
                StdRng::seed_from_u64(step_seed(self.random_seed ^ salt.rotate_left(32), ci as u64));
            self.icm_encode_chunk(
                &x[lo * d..hi * d],
                &mut chunk,
                ils_iters,
                &binaries,
                &entry_norms,
                &mut rng,
            );
            chunk
        });
        for (ci, chunk) in updated.into_iter().enumerate() {
            let lo = ci * self.chunk_size;
            codes[lo * m..lo * m + chunk.len()].copy_from_slice(&chunk);
        }
    }

    /// ILS-wrapped ICM over one chunk of vectors.
    fn icm_encode_chunk(
        &self,
        x: &[f32],
        codes: &mut [u32],
        ils_iters: usize,
        binaries: &[f32],
        entry_norms: &[f32],
        rng: &mut StdRng,
    ) {
        let d = self.core.d();
        let m = self.core.m();
        let mk = self.core.total_entries();
        let cn = x.len() / d;
        if cn == 0 {
            return;
        }

        // Unary terms: U[i][e] = ‖C_e‖² − 2⟨x_i, C_e⟩, one bulk product.
        let dots = linalg::matmul_nt(x, self.core.flat_codebooks(), cn, mk, d);
        let mut unaries = dots;
        for i in 0..cn {
            for (e, u) in unaries[i * mk..(i + 1) * mk].iter_mut().enumerate() {
                *u = entry_norms[e] - 2.0 * *u;
            }
        }

        let mut best = codes.to_vec();
        let mut best_objs = vec![f32::INFINITY; cn];
        let mut work = codes.to_vec();

        for outer in 0..ils_iters.max(1) {
            if outer > 0 {
                work.copy_from_slice(&best);
                self.perturb_codes(&mut work, cn, rng);
            }
            for _ in 0..self.icm_iters {
                self.icm_sweep(&mut work, cn, &unaries, binaries);
            }
            for i in 0..cn {
                let obj = self.vector_objective(&x[i * d..(i + 1) * d], &work[i * m..(i + 1) * m]);
                if obj < best_objs[i] {
                    best_objs[i] = obj;
                    best[i * m..(i + 1) * m].copy_from_slice(&work[i * m..(i + 1) * m]);
                }
            }
        }
        codes.copy_from_slice(&best);
    }

    /// One round-robin ICM sweep: for each codebook in turn, set every
    /// vector's code to the conditional argmin. Ties go to the smaller index.
    fn icm_sweep(&self, codes: &mut [u32], cn: usize, unaries: &[f32], binaries: &[f32]) {
        let m = self.core.m();
        let k = self.k();
        let mk = self.core.total_entries();
        for mi in 0..m {
            for i in 0..cn {
                let ci = &codes[i * m..(i + 1) * m];
                let mut best_k = 0u32;
                let mut best = f32::INFINITY;
                for kk in 0..k {
                    let e = mi * k + kk;
                    let mut s = unaries[i * mk + e];
                    for (mj, &cj) in ci.iter().enumerate() {
                        if mj != mi {
                            s += binaries[e * mk + mj * k + cj as usize];
                        }
                    }
                    if s < best {
                        best = s;
                        best_k = kk as u32;
                    }
                }
                codes[i * m + mi] = best_k;
            }
        }
    }

    /// Replace `nperts` randomly chosen codes of each vector with uniform
    /// random entries.
    fn perturb_codes(&self, codes: &mut [u32], cn: usize, rng: &mut StdRng) {
        let m = self.core.m();
        let k = self.k();
        for i in 0..cn {
            for _ in 0..self.nperts.min(m) {
                let mi = rng.random_range(0..m);
                codes[i * m + mi] = rng.random_range(0..k) as u32;
            }
        }
    }

    fn vector_objective(&self, x: &[f32], code: &[u32]) -> f32 {
        let mut recon = vec![0.0f32; self.core.d()];
        self.core.decode_indices(code, &mut recon);
        crate::metric::l2_sq(x, &recon)
    }

    /// Mean squared reconstruction error of `codes` against `x`.
    fn evaluate(&self, x: &[f32], codes: &[u32], n: usize) -> f32 {
        let d = self.core.d();
        let m = self.core.m();
        let mut recon = vec![0.0f32; d];
        let mut total = 0.0f64;
        for i in 0..n {
            self.core.decode_indices(&codes[i * m..(i + 1) * m], &mut recon);
            total += crate::metric::l2_sq(&x[i * d..(i + 1) * d], &recon) as f64;
        }
        (total / n.max(1) as f64) as f32
    }
}

impl Encoder for LocalSearchQuantizer {
    fn d(&self) -> usize {
        self.core.d()
    }

    fn code_size(&self) -> usize {
        self.core.code_size()
    }

    fn is_trained(&self) -> bool {
        self.core.is_trained()
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        self.train_with_observer(x, &NoopObserver)
    }

    fn encode(&self, x: &[f32]) -> Result<Vec<u8>> {
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }
        let d = self.core.d();
        if x.len() % d != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: d,
                got: x.len(),
            });
        }
        let n = x.len() / d;
        let m = self.core.m();
        let k = self.k();

        // Fresh random codes per chunk stream, then the same ICM machinery
        // as training with the encode-time ILS budget.
        let mut codes = {
            let mut rng = StdRng::seed_from_u64(step_seed(self.random_seed, u64::MAX));
            (0..n * m)
                .map(|_| rng.random_range(0..k) as u32)
                .collect::<Vec<u32>>()
        };
        self.icm_pass(x, &mut codes, self.encode_ils_iters, 0);

        let mut recon = vec![0.0f32; d];
        let mut out = Vec::with_capacity(n * self.code_size());
        for i in 0..n {
            let ci = &codes[i * m..(i + 1) * m];
            self.core.decode_indices(ci, &mut recon);
            out.extend_from_slice(&self.core.pack(ci, crate::metric::norm_sq(&recon)));
        }
        Ok(out)
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        self.core.decode_into(code, out);
    }

    fn query_scorer<'a>(&'a self, q: &'a [f32], metric: Metric) -> Result<Box<dyn CodeScorer + 'a>> {
        check_scorer_args(self.d(), q, metric)?;
        aq_query_scorer(&self.core, q, metric)
    }
}
