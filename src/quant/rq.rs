//! Residual quantizer.
//!
//! Codebooks are trained greedily: step `m` clusters the residuals left after
//! steps `0..m`, then all training vectors are re-encoded with a beam search
//! over the codebooks trained so far, which undoes part of the ordering bias
//! of the greedy pass. Encoding at inference is the same beam search over all
//! `M` codebooks.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{IndexError, Result};
use crate::kmeans::KMeans;
use crate::metric;
use crate::observer::{NoopObserver, Phase, TrainingObserver};
use crate::parallel;
use crate::quant::aq::{AdditiveQuantizer, SearchType};
use crate::metric::Metric;
use crate::quant::{check_scorer_args, CodeScorer, Encoder};

/// Per-codebook index tuple produced by the beam search.
type Indices = SmallVec<[u32; 8]>;

/// Residual quantizer over `M` codebooks of `2^nbits` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualQuantizer {
    core: AdditiveQuantizer,
    /// Beam width used for re-encoding during training and for encoding.
    max_beam_size: usize,
    /// Lloyd iterations per clustering step.
    kmeans_iters: usize,
    seed: u64,
    #[serde(skip, default = "parallel::default_threads")]
    threads: usize,
    /// Mean squared reconstruction error over the training set.
    train_loss: f32,
}

impl ResidualQuantizer {
    pub fn new(d: usize, m: usize, nbits: u32, search_type: SearchType) -> Result<Self> {
        Ok(Self {
            core: AdditiveQuantizer::new(d, m, nbits, search_type)?,
            max_beam_size: 5,
            kmeans_iters: 10,
            seed: 0x1234_5678,
            threads: parallel::default_threads(),
            train_loss: f32::INFINITY,
        })
    }

    #[must_use]
    pub fn with_beam_size(mut self, beam: usize) -> Self {
        self.max_beam_size = beam.max(1);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_kmeans_iters(mut self, iters: usize) -> Self {
        self.kmeans_iters = iters.max(1);
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
        if d == 0 || x.len() % d != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: d,
                got: x.len(),
            });
        }
        let n = x.len() / d;
        let m_total = self.core.m();
        self.core.set_trained(false);

        // Residual of every training vector under the codes found so far.
        let mut residuals = x.to_vec();

        for m in 0..m_total {
            {
                let _phase = Phase::enter(observer, "cluster_residuals");
                let k = self.core.k(m);
                let mut km = KMeans::new(d, k)?
                    .with_seed(step_seed(self.seed, m as u64))
                    .with_max_iter(self.kmeans_iters)
                    .with_threads(self.threads);
                km.fit(&residuals, n)?;
                self.core.codebook_mut(m).copy_from_slice(km.centroids());
            }

            let _phase = Phase::enter(observer, "beam_refine");
            let codes = parallel::parallel_map(n, self.threads, |i| {
                self.beam_encode(&x[i * d..(i + 1) * d], m + 1)
            });
            for i in 0..n {
                let row = &mut residuals[i * d..(i + 1) * d];
                row.copy_from_slice(&x[i * d..(i + 1) * d]);
                for (step, &idx) in codes[i].iter().enumerate() {
                    for (r, &c) in row.iter_mut().zip(self.core.entry(step, idx as usize)) {
                        *r -= c;
                    }
                }
            }
        }

        let mut loss = 0.0f64;
        let mut recon_norms = Vec::with_capacity(n);
        for i in 0..n {
            let res = &residuals[i * d..(i + 1) * d];
            loss += metric::norm_sq(res) as f64;
            let xi = &x[i * d..(i + 1) * d];
            let recon: f32 = xi
                .iter()
                .zip(res.iter())
                .map(|(v, r)| (v - r) * (v - r))
                .sum();
            recon_norms.push(recon);
        }
        self.train_loss = (loss / n.max(1) as f64) as f32;
        if !self.train_loss.is_finite() {
            return Err(IndexError::NumericalFailure(
                "non-finite training loss".to_string(),
            ));
        }
        self.core.train_norms(&recon_norms, self.seed)?;
        self.core.set_trained(true);
        Ok(())
    }

    /// Beam search over the first `steps` codebooks; returns the best code.
    fn beam_encode(&self, x: &[f32], steps: usize) -> Indices {
        let d = self.core.d();

        struct Cand {
            err: f32,
            indices: Indices,
            residual: Vec<f32>,
        }

        let mut beam = vec![Cand {
            err: metric::norm_sq(x),
            indices: Indices::new(),
            residual: x.to_vec(),
        }];

        for m in 0..steps {
            let k = self.core.k(m);
            // (error, parent, entry) triples; the tuple order makes ties
            // deterministic.
            let mut extensions: Vec<(f32, usize, u32)> = Vec::with_capacity(beam.len() * k);
            for (parent, cand) in beam.iter().enumerate() {
                for ki in 0..k {
                    let err = metric::l2_sq(&cand.residual, self.core.entry(m, ki));
                    extensions.push((err, parent, ki as u32));
                }
            }
            extensions.sort_unstable_by(|a, b| {
                a.0.total_cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.cmp(&b.2))
            });
            extensions.truncate(self.max_beam_size);

            let next: Vec<Cand> = extensions
                .into_iter()
                .map(|(err, parent, ki)| {
                    let parent = &beam[parent];
                    let mut indices = parent.indices.clone();
                    indices.push(ki);
                    let mut residual = parent.residual.clone();
                    for (r, &c) in residual.iter_mut().zip(self.core.entry(m, ki as usize)) {
                        *r -= c;
                    }
                    debug_assert_eq!(residual.len(), d);
                    Cand {
                        err,
                        indices,
                        residual,
                    }
                })
                .collect();
            beam = next;
        }

        beam.into_iter()
            .min_by(|a, b| a.err.total_cmp(&b.err))
            .map(|c| c.indices)
            .unwrap_or_default()
    }
}

impl Encoder for ResidualQuantizer {
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
        let codes = parallel::parallel_map(n, self.threads, |i| {
            let xi = &x[i * d..(i + 1) * d];
            let indices = self.beam_encode(xi, m);
            let mut recon = vec![0.0f32; d];
            self.core.decode_indices(&indices, &mut recon);
            self.core.pack(&indices, metric::norm_sq(&recon))
        });
        Ok(codes.concat())
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        self.core.decode_into(code, out);
    }

    fn query_scorer<'a>(&'a self, q: &'a [f32], metric: Metric) -> Result<Box<dyn CodeScorer + 'a>> {
        check_scorer_args(self.d(), q, metric)?;
        aq_query_scorer(&self.core, q, metric)
    }
}

/// Build the shared LUT-or-decompress scorer for an additive quantizer.
pub(crate) fn aq_query_scorer<'a>(
    core: &'a AdditiveQuantizer,
    q: &'a [f32],
    metric_kind: Metric,
) -> Result<Box<dyn CodeScorer + 'a>> {
    match (metric_kind, core.search_type()) {
        // Inner product needs only the table.
        (Metric::InnerProduct, st) if st != SearchType::Decompress => {
            Ok(Box::new(LutIpScorer {
                core,
                lut: core.compute_lut(q),
            }))
        }
        // L2 from the table requires a stored norm.
        (Metric::L2, st) if st.stores_norm() => Ok(Box::new(LutL2Scorer {
            core,
            q_norm: metric::norm_sq(q),
            lut: core.compute_lut(q),
        })),
        (Metric::L2, SearchType::LutNonorm) => Err(IndexError::InvalidArgument(
            "LutNonorm codes cannot be scored under L2; store a norm or use Decompress"
                .to_string(),
        )),
        // Everything else decodes and measures.
        _ => Ok(Box::new(AqDecompressScorer {
            core,
            q,
            metric_kind,
            buf: vec![0.0f32; core.d()],
        })),
    }
}

struct LutIpScorer<'a> {
    core: &'a AdditiveQuantizer,
    lut: Vec<f32>,
}

impl CodeScorer for LutIpScorer<'_> {
    fn score(&mut self, code: &[u8]) -> f32 {
        self.core.lut_inner_product(&self.lut, code)
    }
}

struct LutL2Scorer<'a> {
    core: &'a AdditiveQuantizer,
    q_norm: f32,
    lut: Vec<f32>,
}

impl CodeScorer for LutL2Scorer<'_> {
    fn score(&mut self, code: &[u8]) -> f32 {
        let ip = self.core.lut_inner_product(&self.lut, code);
        let norm = self
            .core
            .stored_norm(code)
            .unwrap_or_else(|| self.core.exact_norm(code));
        (self.q_norm + norm - 2.0 * ip).max(0.0)
    }
}

struct AqDecompressScorer<'a> {
    core: &'a AdditiveQuantizer,
    q: &'a [f32],
    metric_kind: Metric,
    buf: Vec<f32>,
}

impl CodeScorer for AqDecompressScorer<'_> {
    fn score(&mut self, code: &[u8]) -> f32 {
        self.core.decode_into(code, &mut self.buf);
        self.metric_kind.distance(self.q, &self.buf)
    }
}

/// Mix a step index into a base seed (splitmix-style odd constant).
pub(crate) fn step_seed(seed: u64, step: u64) -> u64 {
    seed ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
