//! Additive-quantizer base: codebooks, packed codes, and look-up tables.
//!
//! A code is `M` bit-fields (codebook entry indices) packed LSB-first,
//! optionally followed by a stored reconstruction norm whose representation
//! depends on the [`SearchType`]. Codebooks are flattened into one row-major
//! buffer with an offset table, so the query look-up table is a single
//! query-by-entries product.

use serde::{Deserialize, Serialize};

use crate::bits::{BitReader, BitWriter};
use crate::error::{IndexError, Result};
use crate::kmeans::KMeans;
use crate::linalg;
use crate::metric;

/// How searches score codes, and what the code stores to support that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchType {
    /// Decode every candidate and measure it exactly. No stored norm.
    Decompress,
    /// Inner-product scoring from the look-up table alone. No stored norm.
    LutNonorm,
    /// L2 scoring from the table plus a norm stored as a full `f32`.
    NormFloat,
    /// As `NormFloat` with the norm scalar-quantized to 8 bits.
    NormQint8,
    /// As `NormFloat` with the norm scalar-quantized to 4 bits.
    NormQint4,
    /// Norm quantized through a trained 256-entry 1-D codebook.
    NormCq,
}

impl SearchType {
    /// Extra code bits spent on the stored norm.
    #[must_use]
    pub fn norm_bits(self) -> u32 {
        match self {
            SearchType::Decompress | SearchType::LutNonorm => 0,
            SearchType::NormFloat => 32,
            SearchType::NormQint8 | SearchType::NormCq => 8,
            SearchType::NormQint4 => 4,
        }
    }

    /// Whether codes carry a reconstruction norm.
    #[must_use]
    pub fn stores_norm(self) -> bool {
        self.norm_bits() > 0
    }
}

/// Shared state of every additive quantizer: `M` codebooks of `2^nbits[m]`
/// entries in `d` dimensions, plus trained norm statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditiveQuantizer {
    d: usize,
    /// Bits per codebook; `K_m = 2^nbits[m]`.
    nbits: Vec<u32>,
    /// All codebooks flattened row-major: entry `k` of codebook `m` is row
    /// `offsets[m] + k`.
    codebooks: Vec<f32>,
    /// Entry-count prefix sums, length `M + 1`.
    offsets: Vec<usize>,
    search_type: SearchType,
    /// Range of reconstruction norms seen at train time (qint storage).
    norm_min: f32,
    norm_max: f32,
    /// 1-D codebook over reconstruction norms (`NormCq` storage).
    norm_centroids: Vec<f32>,
    trained: bool,
}

impl AdditiveQuantizer {
    /// Uniform `nbits` constructor: `M` codebooks of `2^nbits` entries.
    pub fn new(d: usize, m: usize, nbits: u32, search_type: SearchType) -> Result<Self> {
        Self::with_nbits(d, vec![nbits; m], search_type)
    }

    /// Per-codebook bit widths.
    pub fn with_nbits(d: usize, nbits: Vec<u32>, search_type: SearchType) -> Result<Self> {
        if d == 0 || nbits.is_empty() {
            return Err(IndexError::InvalidArgument(
                "d and M must be positive".to_string(),
            ));
        }
        if nbits.iter().any(|&b| b == 0 || b > 24) {
            return Err(IndexError::InvalidArgument(
                "per-codebook nbits must be in 1..=24".to_string(),
            ));
        }
        let mut offsets = Vec::with_capacity(nbits.len() + 1);
        offsets.push(0usize);
        for &b in &nbits {
            offsets.push(offsets.last().unwrap() + (1usize << b));
        }
        let total = *offsets.last().unwrap();
        Ok(Self {
            d,
            nbits,
            codebooks: vec![0.0; total * d],
            offsets,
            search_type,
            norm_min: 0.0,
            norm_max: 0.0,
            norm_centroids: Vec::new(),
            trained: false,
        })
    }

    #[must_use]
    pub fn d(&self) -> usize {
        self.d
    }

    /// Number of codebooks.
    #[must_use]
    pub fn m(&self) -> usize {
        self.nbits.len()
    }

    /// Entries in codebook `m`.
    #[must_use]
    pub fn k(&self, m: usize) -> usize {
        1usize << self.nbits[m]
    }

    #[must_use]
    pub fn nbits(&self) -> &[u32] {
        &self.nbits
    }

    #[must_use]
    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    /// Total entries across all codebooks.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        *self.offsets.last().unwrap()
    }

    /// Code width in bits, including any stored norm.
    #[must_use]
    pub fn code_bits(&self) -> u32 {
        self.nbits.iter().sum::<u32>() + self.search_type.norm_bits()
    }

    /// Code width in bytes.
    #[must_use]
    pub fn code_size(&self) -> usize {
        (self.code_bits() as usize).div_ceil(8)
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub(crate) fn set_trained(&mut self, trained: bool) {
        self.trained = trained;
    }

    /// Rows of codebook `m`.
    #[must_use]
    pub fn codebook(&self, m: usize) -> &[f32] {
        let lo = self.offsets[m] * self.d;
        let hi = self.offsets[m + 1] * self.d;
        &self.codebooks[lo..hi]
    }

    pub(crate) fn codebook_mut(&mut self, m: usize) -> &mut [f32] {
        let lo = self.offsets[m] * self.d;
        let hi = self.offsets[m + 1] * self.d;
        &mut self.codebooks[lo..hi]
    }

    /// All codebooks as one flat `total_entries x d` matrix.
    #[must_use]
    pub fn flat_codebooks(&self) -> &[f32] {
        &self.codebooks
    }

    pub(crate) fn flat_codebooks_mut(&mut self) -> &mut [f32] {
        &mut self.codebooks
    }

    /// One codebook row.
    #[inline]
    #[must_use]
    pub fn entry(&self, m: usize, k: usize) -> &[f32] {
        let row = self.offsets[m] + k;
        &self.codebooks[row * self.d..(row + 1) * self.d]
    }

    /// Pack per-codebook indices (plus the reconstruction norm when the
    /// search type stores one) into a fresh code.
    #[must_use]
    pub fn pack(&self, indices: &[u32], norm_sq: f32) -> Vec<u8> {
        debug_assert_eq!(indices.len(), self.m());
        let mut code = vec![0u8; self.code_size()];
        let mut w = BitWriter::new(&mut code);
        for (m, &idx) in indices.iter().enumerate() {
            w.write(u64::from(idx), self.nbits[m]);
        }
        match self.search_type {
            SearchType::Decompress | SearchType::LutNonorm => {}
            SearchType::NormFloat => w.write(u64::from(norm_sq.to_bits()), 32),
            SearchType::NormQint8 => w.write(self.quantize_norm(norm_sq, 255), 8),
            SearchType::NormQint4 => w.write(self.quantize_norm(norm_sq, 15), 4),
            SearchType::NormCq => w.write(self.nearest_norm_centroid(norm_sq) as u64, 8),
        }
        code
    }

    /// Unpack the per-codebook indices of a code.
    pub fn unpack_into(&self, code: &[u8], indices: &mut [u32]) {
        debug_assert_eq!(indices.len(), self.m());
        let mut r = BitReader::new(code);
        for (m, slot) in indices.iter_mut().enumerate() {
            *slot = r.read(self.nbits[m]) as u32;
        }
    }

    /// Stored reconstruction norm of a code, when the search type keeps one.
    #[must_use]
    pub fn stored_norm(&self, code: &[u8]) -> Option<f32> {
        let mut r = BitReader::new(code);
        for &b in &self.nbits {
            r.read(b);
        }
        match self.search_type {
            SearchType::Decompress | SearchType::LutNonorm => None,
            SearchType::NormFloat => Some(f32::from_bits(r.read(32) as u32)),
            SearchType::NormQint8 => Some(self.dequantize_norm(r.read(8), 255)),
            SearchType::NormQint4 => Some(self.dequantize_norm(r.read(4), 15)),
            SearchType::NormCq => {
                let idx = r.read(8) as usize;
                Some(self.norm_centroids.get(idx).copied().unwrap_or(0.0))
            }
        }
    }

    fn quantize_norm(&self, norm_sq: f32, levels: u64) -> u64 {
        let span = self.norm_max - self.norm_min;
        if span <= 0.0 {
            return 0;
        }
        let t = ((norm_sq - self.norm_min) / span).clamp(0.0, 1.0);
        (t * levels as f32).round() as u64
    }

    fn dequantize_norm(&self, level: u64, levels: u64) -> f32 {
        let span = self.norm_max - self.norm_min;
        if span <= 0.0 {
            return self.norm_min;
        }
        self.norm_min + (level as f32 / levels as f32) * span
    }

    fn nearest_norm_centroid(&self, norm_sq: f32) -> usize {
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for (i, &c) in self.norm_centroids.iter().enumerate() {
            let dist = (c - norm_sq) * (c - norm_sq);
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    }

    /// Record the norm statistics of the training reconstructions. Called by
    /// concrete quantizers at the end of training.
    pub(crate) fn train_norms(&mut self, recon_norms: &[f32], seed: u64) -> Result<()> {
        if !self.search_type.stores_norm() || recon_norms.is_empty() {
            return Ok(());
        }
        if recon_norms.iter().any(|n| !n.is_finite()) {
            return Err(IndexError::NumericalFailure(
                "non-finite reconstruction norm during training".to_string(),
            ));
        }
        self.norm_min = recon_norms.iter().copied().fold(f32::INFINITY, f32::min);
        self.norm_max = recon_norms
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if self.search_type == SearchType::NormCq {
            let k = 256usize.min(recon_norms.len());
            let mut km = KMeans::new(1, k)?.with_seed(seed).with_max_iter(10);
            km.fit(recon_norms, recon_norms.len())?;
            self.norm_centroids = km.centroids().to_vec();
        }
        Ok(())
    }

    /// Sum the rows selected by `indices` into `out`.
    pub fn decode_indices(&self, indices: &[u32], out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.d);
        out.fill(0.0);
        for (m, &idx) in indices.iter().enumerate() {
            for (o, &c) in out.iter_mut().zip(self.entry(m, idx as usize).iter()) {
                *o += c;
            }
        }
    }

    /// Decode one packed code.
    pub fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        let mut indices = vec![0u32; self.m()];
        self.unpack_into(code, &mut indices);
        self.decode_indices(&indices, out);
    }

    /// Query look-up table: `lut[offsets[m] + k] = ⟨q, C_m[k]⟩`, computed as
    /// one query-by-entries product.
    #[must_use]
    pub fn compute_lut(&self, q: &[f32]) -> Vec<f32> {
        debug_assert_eq!(q.len(), self.d);
        linalg::matmul_nt(q, &self.codebooks, 1, self.total_entries(), self.d)
    }

    /// `⟨q, decode(code)⟩` from the look-up table: `Σ_m lut[offset_m + c_m]`.
    #[must_use]
    pub fn lut_inner_product(&self, lut: &[f32], code: &[u8]) -> f32 {
        let mut r = BitReader::new(code);
        let mut accu = 0.0f32;
        for (m, &b) in self.nbits.iter().enumerate() {
            let idx = r.read(b) as usize;
            accu += lut[self.offsets[m] + idx];
        }
        accu
    }

    /// Exact reconstruction norm of a code (decode and measure).
    #[must_use]
    pub fn exact_norm(&self, code: &[u8]) -> f32 {
        let mut buf = vec![0.0f32; self.d];
        self.decode_into(code, &mut buf);
        metric::norm_sq(&buf)
    }
}
