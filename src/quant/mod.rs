//! The additive-quantizer family.
//!
//! An additive quantizer represents a vector as the sum of `M` codebook
//! entries, one per codebook. The family shares a base ([`aq`]) that owns
//! codebooks, packed codes, and look-up tables; the concrete members differ
//! in how they *choose* codes:
//!
//! - [`rq`]: residual quantizer, greedy per-step clustering refined by beam
//!   search.
//! - [`lsq`]: local-search quantizer, alternating least-squares codebooks
//!   and iterated-conditional-modes codes.
//! - [`product`]: splits the dimensions into orthogonal blocks and runs an
//!   independent sub-quantizer per block.
//!
//! All members implement [`Encoder`], the contract the IVF fine-coding path
//! consumes.

pub mod aq;
pub mod lsq;
pub mod product;
pub mod rq;

use crate::error::{IndexError, Result};
use crate::metric::Metric;

/// A trained vector codec: fixed-width codes in, reconstructions out.
///
/// This is the seam between quantizers and the indexes that store their
/// codes. Implementations must be cheap to call per-code; anything per-query
/// (look-up tables, rotated queries) belongs in the scorer returned by
/// [`Encoder::query_scorer`].
pub trait Encoder: Send + Sync {
    /// Input dimensionality.
    fn d(&self) -> usize;

    /// Bytes per code.
    fn code_size(&self) -> usize;

    fn is_trained(&self) -> bool;

    /// Train on a row-major batch.
    fn train(&mut self, x: &[f32]) -> Result<()>;

    /// Encode a batch into `n * code_size` packed bytes.
    fn encode(&self, x: &[f32]) -> Result<Vec<u8>>;

    /// Decode one code into `out` (length `d`).
    fn decode_into(&self, code: &[u8], out: &mut [f32]);

    /// Decode a batch of codes.
    fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        if self.code_size() == 0 || codes.len() % self.code_size() != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.code_size(),
                got: codes.len(),
            });
        }
        let n = codes.len() / self.code_size();
        let mut out = vec![0.0f32; n * self.d()];
        for (code, row) in codes
            .chunks_exact(self.code_size())
            .zip(out.chunks_exact_mut(self.d()))
        {
            self.decode_into(code, row);
        }
        Ok(out)
    }

    /// Build a per-query scorer over packed codes.
    ///
    /// The default decodes every candidate and measures it; quantizers with
    /// look-up tables override this with an O(M)-per-code path. Only `L2`
    /// and `InnerProduct` are supported.
    fn query_scorer<'a>(&'a self, q: &'a [f32], metric: Metric) -> Result<Box<dyn CodeScorer + 'a>> {
        check_scorer_args(self.d(), q, metric)?;
        Ok(Box::new(DecompressScorer {
            enc: self,
            q,
            metric,
            buf: vec![0.0f32; self.d()],
        }))
    }
}

/// Scores packed codes against one query.
pub trait CodeScorer: Send {
    /// Distance (or similarity, per the metric handed to
    /// [`Encoder::query_scorer`]) between the query and one code.
    fn score(&mut self, code: &[u8]) -> f32;
}

pub(crate) fn check_scorer_args(d: usize, q: &[f32], metric: Metric) -> Result<()> {
    if q.len() != d {
        return Err(IndexError::DimensionMismatch {
            expected: d,
            got: q.len(),
        });
    }
    if !matches!(metric, Metric::L2 | Metric::InnerProduct) {
        return Err(IndexError::InvalidArgument(format!(
            "quantized scoring supports L2 and InnerProduct, not {metric:?}"
        )));
    }
    Ok(())
}

/// Fallback scorer: decode, then measure.
struct DecompressScorer<'a, E: Encoder + ?Sized> {
    enc: &'a E,
    q: &'a [f32],
    metric: Metric,
    buf: Vec<f32>,
}

impl<E: Encoder + ?Sized> CodeScorer for DecompressScorer<'_, E> {
    fn score(&mut self, code: &[u8]) -> f32 {
        self.enc.decode_into(code, &mut self.buf);
        self.metric.distance(self.q, &self.buf)
    }
}
