//! Product additive quantizers.
//!
//! Splits the `d` dimensions into `nsplits` contiguous blocks of
//! `⌈d/nsplits⌉` coordinates (the last block absorbs the remainder) and runs
//! an independent sub-quantizer per block. Codes, reconstructions, and query
//! scores are concatenations of the per-block results; for L2 and inner
//! product the block scores simply sum because the blocks are orthogonal.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::metric::Metric;
use crate::observer::{NoopObserver, TrainingObserver};
use crate::quant::aq::SearchType;
use crate::quant::lsq::LocalSearchQuantizer;
use crate::quant::rq::ResidualQuantizer;
use crate::quant::{check_scorer_args, CodeScorer, Encoder};

/// A quantizer family that can be instantiated per split.
pub trait SplitQuantizer: Encoder + Sized {
    /// Build a sub-quantizer for one `d_split`-dimensional block.
    fn for_split(d_split: usize, msub: usize, nbits: u32, search_type: SearchType) -> Result<Self>;

    /// Train on the block's projected data, reporting to `observer`.
    fn train_split(&mut self, x: &[f32], observer: &dyn TrainingObserver) -> Result<()>;
}

impl SplitQuantizer for ResidualQuantizer {
    fn for_split(d_split: usize, msub: usize, nbits: u32, search_type: SearchType) -> Result<Self> {
        ResidualQuantizer::new(d_split, msub, nbits, search_type)
    }

    fn train_split(&mut self, x: &[f32], observer: &dyn TrainingObserver) -> Result<()> {
        self.train_with_observer(x, observer)
    }
}

impl SplitQuantizer for LocalSearchQuantizer {
    fn for_split(d_split: usize, msub: usize, nbits: u32, search_type: SearchType) -> Result<Self> {
        LocalSearchQuantizer::new(d_split, msub, nbits, search_type)
    }

    fn train_split(&mut self, x: &[f32], observer: &dyn TrainingObserver) -> Result<()> {
        self.train_with_observer(x, observer)
    }
}

/// Product of independent additive quantizers over contiguous splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductAdditiveQuantizer<Q> {
    d: usize,
    /// Dimensions of each split; sums to `d`.
    split_dims: Vec<usize>,
    subs: Vec<Q>,
}

/// Product of residual quantizers.
pub type ProductResidualQuantizer = ProductAdditiveQuantizer<ResidualQuantizer>;

/// Product of local-search quantizers.
pub type ProductLocalSearchQuantizer = ProductAdditiveQuantizer<LocalSearchQuantizer>;

impl<Q: SplitQuantizer> ProductAdditiveQuantizer<Q> {
    /// `nsplits` blocks, each quantized by `msub` codebooks of `2^nbits`
    /// entries.
    pub fn new(
        d: usize,
        nsplits: usize,
        msub: usize,
        nbits: u32,
        search_type: SearchType,
    ) -> Result<Self> {
        if d == 0 || nsplits == 0 {
            return Err(IndexError::InvalidArgument(
                "d and nsplits must be positive".to_string(),
            ));
        }
        let base = d.div_ceil(nsplits);
        if base * (nsplits - 1) >= d {
            return Err(IndexError::InvalidArgument(format!(
                "cannot split {d} dimensions into {nsplits} non-empty blocks"
            )));
        }
        let mut split_dims = vec![base; nsplits];
        split_dims[nsplits - 1] = d - base * (nsplits - 1);

        let subs = split_dims
            .iter()
            .map(|&ds| Q::for_split(ds, msub, nbits, search_type))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { d, split_dims, subs })
    }

    /// Assemble a product from pre-built sub-quantizers; the input dimension
    /// is the sum of theirs.
    pub fn from_sub_quantizers(subs: Vec<Q>) -> Result<Self> {
        if subs.is_empty() {
            return Err(IndexError::InvalidArgument(
                "product needs at least one sub-quantizer".to_string(),
            ));
        }
        let split_dims: Vec<usize> = subs.iter().map(|s| s.d()).collect();
        let d = split_dims.iter().sum();
        Ok(Self { d, split_dims, subs })
    }

    #[must_use]
    pub fn nsplits(&self) -> usize {
        self.subs.len()
    }

    #[must_use]
    pub fn split_dims(&self) -> &[usize] {
        &self.split_dims
    }

    #[must_use]
    pub fn sub_quantizer(&self, s: usize) -> &Q {
        &self.subs[s]
    }

    /// Starting coordinate of each split, plus `d` as the final entry.
    fn dim_offsets(&self) -> Vec<usize> {
        let mut offs = Vec::with_capacity(self.subs.len() + 1);
        offs.push(0);
        for &ds in &self.split_dims {
            offs.push(offs.last().unwrap() + ds);
        }
        offs
    }

    /// Starting code byte of each split, plus the total code size.
    fn code_offsets(&self) -> Vec<usize> {
        let mut offs = Vec::with_capacity(self.subs.len() + 1);
        offs.push(0);
        for sub in &self.subs {
            offs.push(offs.last().unwrap() + sub.code_size());
        }
        offs
    }

    /// Copy one split's coordinates out of a row-major batch.
    fn project_split(&self, x: &[f32], n: usize, split: usize) -> Vec<f32> {
        let offs = self.dim_offsets();
        let lo = offs[split];
        let hi = offs[split + 1];
        let mut out = Vec::with_capacity(n * (hi - lo));
        for i in 0..n {
            out.extend_from_slice(&x[i * self.d + lo..i * self.d + hi]);
        }
        out
    }

    /// Train every split on its projection of the batch.
    pub fn train_with_observer(
        &mut self,
        x: &[f32],
        observer: &dyn TrainingObserver,
    ) -> Result<()> {
        if self.d == 0 || x.len() % self.d != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.d,
                got: x.len(),
            });
        }
        let n = x.len() / self.d;
        for s in 0..self.subs.len() {
            let block = self.project_split(x, n, s);
            self.subs[s].train_split(&block, observer)?;
        }
        Ok(())
    }
}

impl<Q: SplitQuantizer> Encoder for ProductAdditiveQuantizer<Q> {
    fn d(&self) -> usize {
        self.d
    }

    fn code_size(&self) -> usize {
        self.subs.iter().map(Encoder::code_size).sum()
    }

    fn is_trained(&self) -> bool {
        self.subs.iter().all(Encoder::is_trained)
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        self.train_with_observer(x, &NoopObserver)
    }

    fn encode(&self, x: &[f32]) -> Result<Vec<u8>> {
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }
        if x.len() % self.d != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.d,
                got: x.len(),
            });
        }
        let n = x.len() / self.d;
        let code_offs = self.code_offsets();
        let total = self.code_size();

        let mut out = vec![0u8; n * total];
        for (s, sub) in self.subs.iter().enumerate() {
            let block = self.project_split(x, n, s);
            let sub_codes = sub.encode(&block)?;
            let cs = sub.code_size();
            for i in 0..n {
                let dst = i * total + code_offs[s];
                out[dst..dst + cs].copy_from_slice(&sub_codes[i * cs..(i + 1) * cs]);
            }
        }
        Ok(out)
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        let dim_offs = self.dim_offsets();
        let code_offs = self.code_offsets();
        for (s, sub) in self.subs.iter().enumerate() {
            sub.decode_into(
                &code[code_offs[s]..code_offs[s + 1]],
                &mut out[dim_offs[s]..dim_offs[s + 1]],
            );
        }
    }

    fn query_scorer<'a>(&'a self, q: &'a [f32], metric: Metric) -> Result<Box<dyn CodeScorer + 'a>> {
        check_scorer_args(self.d, q, metric)?;
        let dim_offs = self.dim_offsets();
        let mut scorers = Vec::with_capacity(self.subs.len());
        for (s, sub) in self.subs.iter().enumerate() {
            scorers.push(sub.query_scorer(&q[dim_offs[s]..dim_offs[s + 1]], metric)?);
        }
        Ok(Box::new(ProductScorer {
            scorers,
            code_offsets: self.code_offsets(),
        }))
    }
}

/// Sums per-split scores over the matching code slices.
struct ProductScorer<'a> {
    scorers: Vec<Box<dyn CodeScorer + 'a>>,
    code_offsets: Vec<usize>,
}

impl CodeScorer for ProductScorer<'_> {
    fn score(&mut self, code: &[u8]) -> f32 {
        self.scorers
            .iter_mut()
            .enumerate()
            .map(|(s, scorer)| scorer.score(&code[self.code_offsets[s]..self.code_offsets[s + 1]]))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize, d: usize, seed: u64) -> Vec<f32> {
        let mut state = seed;
        let mut out = Vec::with_capacity(n * d);
        for _ in 0..n * d {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            out.push(((state >> 33) as f32) / (u32::MAX >> 1) as f32 - 1.0);
        }
        out
    }

    #[test]
    fn split_dims_cover_d_with_remainder_in_last() {
        let prq = ProductResidualQuantizer::new(10, 3, 2, 3, SearchType::Decompress).unwrap();
        assert_eq!(prq.split_dims(), &[4, 4, 2]);
        assert_eq!(prq.split_dims().iter().sum::<usize>(), 10);
    }

    #[test]
    fn code_size_is_sum_of_sub_sizes() {
        let prq = ProductResidualQuantizer::new(8, 2, 2, 8, SearchType::Decompress).unwrap();
        assert_eq!(prq.code_size(), 2 * prq.sub_quantizer(0).code_size());
    }

    #[test]
    fn single_split_product_matches_its_sub_quantizer() {
        let d = 8;
        let train = data(300, d, 2);
        let probe = data(16, d, 3);

        let mut product =
            ProductResidualQuantizer::new(d, 1, 2, 4, SearchType::Decompress).unwrap();
        product.train(&train).unwrap();

        let mut direct = ResidualQuantizer::new(d, 2, 4, SearchType::Decompress).unwrap();
        direct.train(&train).unwrap();

        assert_eq!(product.code_size(), direct.code_size());
        assert_eq!(
            product.encode(&probe).unwrap(),
            direct.encode(&probe).unwrap()
        );
    }

    #[test]
    fn splits_are_trained_independently() {
        let d = 8;
        let train = data(300, d, 7);
        let mut product =
            ProductResidualQuantizer::new(d, 2, 2, 4, SearchType::Decompress).unwrap();
        product.train(&train).unwrap();
        assert!(product.is_trained());

        // Decoding reconstructs each block from its own sub-quantizer.
        let probe = &train[..d];
        let code = product.encode(probe).unwrap();
        let mut recon = vec![0.0f32; d];
        product.decode_into(&code, &mut recon);

        let block0 = product.sub_quantizer(0);
        let mut recon0 = vec![0.0f32; 4];
        block0.decode_into(&code[..block0.code_size()], &mut recon0);
        assert_eq!(&recon[..4], recon0.as_slice());
    }

    #[test]
    fn product_scorer_sums_block_distances() {
        let d = 8;
        let train = data(300, d, 9);
        let mut product =
            ProductResidualQuantizer::new(d, 2, 2, 4, SearchType::Decompress).unwrap();
        product.train(&train).unwrap();

        let q = &train[..d];
        let code = product.encode(&train[d..2 * d]).unwrap();
        let mut recon = vec![0.0f32; d];
        product.decode_into(&code, &mut recon);

        let mut scorer = product.query_scorer(q, Metric::L2).unwrap();
        let got = scorer.score(&code);
        let want = crate::metric::l2_sq(q, &recon);
        assert!((got - want).abs() < 1e-4, "{got} vs {want}");
    }

    #[test]
    fn untrained_product_rejects_encode() {
        let product = ProductLocalSearchQuantizer::new(8, 2, 2, 3, SearchType::Decompress).unwrap();
        assert_eq!(
            product.encode(&[0.0; 8]).unwrap_err().code(),
            "not_trained"
        );
    }
}
