//! Inverted-file index.
//!
//! Composes a *coarse quantizer* (any [`Index`] over `nlist` centroids whose
//! 1-NN answer is the owning list) with per-list code storage. Vectors are
//! routed to their nearest centroid at add time and encoded by an optional
//! *fine quantizer* (any [`Encoder`]); with no fine quantizer the raw floats
//! are stored and the index degenerates to IVF-flat. With `by_residual` the
//! fine codes encode `x − centroid` instead of `x`.
//!
//! Search probes the `nprobe` nearest lists per query, scores every stored
//! code through the fine quantizer's per-query scorer (or directly for raw
//! codes), and merges candidates through the top-k selector in probe order,
//! so results are deterministic.
//!
//! Each list is guarded by its own `RwLock`: searches share lists, writers to
//! different lists do not contend.

use parking_lot::RwLock;

use crate::error::{IndexError, Result};
use crate::index::{check_batch, check_search, IdSelector, Index, SearchResult};
use crate::kmeans::KMeans;
use crate::metric::{self, Metric};
use crate::parallel;
use crate::quant::{CodeScorer, Encoder};
use crate::selector::TopK;

/// One inverted list: parallel id and packed-code arrays.
#[derive(Debug, Default)]
struct InvertedList {
    ids: Vec<i64>,
    codes: Vec<u8>,
}

/// Inverted-file index over `nlist` lists.
pub struct IvfIndex {
    d: usize,
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    by_residual: bool,
    coarse: Box<dyn Index>,
    fine: Option<Box<dyn Encoder>>,
    lists: Vec<RwLock<InvertedList>>,
    ntotal: usize,
    trained: bool,
    seed: u64,
    threads: usize,
}

impl std::fmt::Debug for IvfIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvfIndex")
            .field("d", &self.d)
            .field("metric", &self.metric)
            .field("nlist", &self.nlist)
            .field("nprobe", &self.nprobe)
            .field("by_residual", &self.by_residual)
            .field("ntotal", &self.ntotal)
            .field("trained", &self.trained)
            .field("seed", &self.seed)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl IvfIndex {
    /// Compose an IVF index from a coarse quantizer and an optional fine
    /// quantizer. The coarse quantizer may arrive empty (trained here via
    /// k-means) or pre-populated with exactly `nlist` centroids.
    pub fn new(
        coarse: Box<dyn Index>,
        fine: Option<Box<dyn Encoder>>,
        nlist: usize,
        by_residual: bool,
    ) -> Result<Self> {
        let d = coarse.d();
        let metric = coarse.metric();
        if nlist == 0 {
            return Err(IndexError::InvalidArgument(
                "nlist must be positive".to_string(),
            ));
        }
        if !matches!(metric, Metric::L2 | Metric::InnerProduct) {
            return Err(IndexError::InvalidArgument(format!(
                "IVF supports L2 and InnerProduct, not {metric:?}"
            )));
        }
        if let Some(f) = &fine {
            if f.d() != d {
                return Err(IndexError::DimensionMismatch {
                    expected: d,
                    got: f.d(),
                });
            }
        }
        let trained = coarse.is_trained()
            && coarse.ntotal() == nlist
            && fine.as_ref().is_none_or(|f| f.is_trained());
        let lists = (0..nlist).map(|_| RwLock::new(InvertedList::default())).collect();
        Ok(Self {
            d,
            metric,
            nlist,
            nprobe: 1,
            by_residual,
            coarse,
            fine,
            lists,
            ntotal: 0,
            trained,
            seed: 0xC0FF_EE00,
            threads: parallel::default_threads(),
        })
    }

    /// Number of lists probed per query.
    pub fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        if nprobe == 0 || nprobe > self.nlist {
            return Err(IndexError::InvalidArgument(format!(
                "nprobe must be in 1..={}, got {nprobe}",
                self.nlist
            )));
        }
        self.nprobe = nprobe;
        Ok(())
    }

    #[must_use]
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    #[must_use]
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Seed for coarse-quantizer clustering.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Entries in list `l`.
    #[must_use]
    pub fn list_len(&self, l: usize) -> usize {
        self.lists[l].read().ids.len()
    }

    /// Bytes per stored code.
    #[must_use]
    pub fn code_size(&self) -> usize {
        match &self.fine {
            Some(f) => f.code_size(),
            None => self.d * std::mem::size_of::<f32>(),
        }
    }

    fn centroid(&self, list: usize) -> Result<Vec<f32>> {
        self.coarse.reconstruct(list as i64)
    }

    /// Vectors (or residuals) to encode for a batch with known assignments.
    fn encode_batch(&self, x: &[f32], n: usize, assignments: &[i64]) -> Result<Vec<u8>> {
        let d = self.d;
        let to_encode: Vec<f32> = if self.by_residual {
            let mut buf = vec![0.0f32; n * d];
            for i in 0..n {
                let centroid = self.centroid(assignments[i] as usize)?;
                for j in 0..d {
                    buf[i * d + j] = x[i * d + j] - centroid[j];
                }
            }
            buf
        } else {
            x.to_vec()
        };

        match &self.fine {
            Some(f) => f.encode(&to_encode),
            None => {
                let mut bytes = Vec::with_capacity(to_encode.len() * 4);
                for v in &to_encode {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                Ok(bytes)
            }
        }
    }

    fn decode_raw(code: &[u8], out: &mut [f32]) {
        for (v, chunk) in out.iter_mut().zip(code.chunks_exact(4)) {
            *v = f32::from_le_bytes(chunk.try_into().unwrap());
        }
    }

    fn add_impl(&mut self, x: &[f32], ids: Option<&[i64]>) -> Result<()> {
        if !self.trained {
            return Err(IndexError::NotTrained);
        }
        let n = check_batch(self.d, x)?;
        if let Some(ids) = ids {
            if ids.len() != n {
                return Err(IndexError::InvalidArgument(format!(
                    "expected {n} ids, got {}",
                    ids.len()
                )));
            }
        }
        let assignments = self.coarse.assign(x, 1)?;
        if assignments.iter().any(|&a| a < 0 || a >= self.nlist as i64) {
            return Err(IndexError::NumericalFailure(
                "coarse quantizer produced an invalid list assignment".to_string(),
            ));
        }
        let codes = self.encode_batch(x, n, &assignments)?;
        let cs = self.code_size();

        // Appends happen in input order so repeated builds are identical.
        for i in 0..n {
            let id = match ids {
                Some(ids) => ids[i],
                None => (self.ntotal + i) as i64,
            };
            let mut list = self.lists[assignments[i] as usize].write();
            list.ids.push(id);
            list.codes.extend_from_slice(&codes[i * cs..(i + 1) * cs]);
        }
        self.ntotal += n;
        Ok(())
    }

    /// Rank one query against the probed lists.
    fn search_query(&self, q: &[f32], k: usize, probes: &[i64]) -> Result<Vec<(i64, f32)>> {
        let cs = self.code_size();
        let mut sel = TopK::new(k, self.metric.is_similarity());

        for &probe in probes {
            if probe < 0 {
                continue;
            }
            let list_no = probe as usize;

            // Choose the effective query and additive bias for this list.
            // L2 residual codes are scored against q − centroid; IP residual
            // scores decompose as ⟨q, centroid⟩ + ⟨q, residual⟩.
            let (q_eff, bias): (Vec<f32>, f32) = if self.by_residual {
                let centroid = self.centroid(list_no)?;
                match self.metric {
                    Metric::L2 => (
                        q.iter().zip(centroid.iter()).map(|(a, b)| a - b).collect(),
                        0.0,
                    ),
                    _ => {
                        let bias = metric::dot(q, &centroid);
                        (q.to_vec(), bias)
                    }
                }
            } else {
                (q.to_vec(), 0.0)
            };

            let mut scorer: Option<Box<dyn CodeScorer + '_>> = match &self.fine {
                Some(f) => Some(f.query_scorer(&q_eff, self.metric)?),
                None => None,
            };

            let list = self.lists[list_no].read();
            let mut buf = vec![0.0f32; self.d];
            for (slot, &id) in list.ids.iter().enumerate() {
                let code = &list.codes[slot * cs..(slot + 1) * cs];
                let dist = match &mut scorer {
                    Some(s) => s.score(code) + bias,
                    None => {
                        Self::decode_raw(code, &mut buf);
                        self.metric.distance(&q_eff, &buf) + bias
                    }
                };
                sel.push(id, dist);
            }
        }
        Ok(sel.into_sorted())
    }
}

impl Index for IvfIndex {
    fn d(&self) -> usize {
        self.d
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    /// Train the coarse quantizer (k-means over the batch, unless it arrived
    /// pre-populated) and the fine quantizer (on residuals when
    /// `by_residual`).
    fn train(&mut self, x: &[f32]) -> Result<()> {
        let n = check_batch(self.d, x)?;

        if self.coarse.ntotal() != self.nlist {
            let mut km = KMeans::new(self.d, self.nlist)?
                .with_seed(self.seed)
                .with_threads(self.threads);
            km.fit(x, n)?;
            self.coarse.reset();
            self.coarse.train(km.centroids())?;
            self.coarse.add(km.centroids())?;
        }

        if let Some(fine) = self.fine.as_mut() {
            let train_data: Vec<f32> = if self.by_residual {
                let assignments = self.coarse.assign(x, 1)?;
                let mut buf = vec![0.0f32; n * self.d];
                for i in 0..n {
                    let centroid = self.coarse.reconstruct(assignments[i])?;
                    for j in 0..self.d {
                        buf[i * self.d + j] = x[i * self.d + j] - centroid[j];
                    }
                }
                buf
            } else {
                x.to_vec()
            };
            fine.train(&train_data)?;
        }

        self.trained = true;
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.add_impl(x, None)
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        self.add_impl(x, Some(ids))
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResult> {
        let nq = check_search(self, x, k)?;
        if self.nprobe > self.nlist {
            return Err(IndexError::InvalidArgument(format!(
                "nprobe {} exceeds nlist {}",
                self.nprobe, self.nlist
            )));
        }

        let coarse_hits = self.coarse.search(x, self.nprobe)?;
        let mut result = SearchResult::sentinel(nq, k, self.metric);
        let rows: Vec<Result<Vec<(i64, f32)>>> =
            parallel::parallel_map(nq, self.threads, |qi| {
                let q = &x[qi * self.d..(qi + 1) * self.d];
                self.search_query(q, k, coarse_hits.row(qi).0)
            });
        for (qi, row) in rows.into_iter().enumerate() {
            result.fill_row(qi, &row?);
        }
        Ok(result)
    }

    /// Scans the lists for the key; decoding adds the centroid back for
    /// residual codes.
    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        let cs = self.code_size();
        for (list_no, list) in self.lists.iter().enumerate() {
            let list = list.read();
            if let Some(slot) = list.ids.iter().position(|&id| id == key) {
                let code = &list.codes[slot * cs..(slot + 1) * cs];
                let mut out = vec![0.0f32; self.d];
                match &self.fine {
                    Some(f) => f.decode_into(code, &mut out),
                    None => Self::decode_raw(code, &mut out),
                }
                if self.by_residual {
                    let centroid = self.centroid(list_no)?;
                    for (o, c) in out.iter_mut().zip(centroid.iter()) {
                        *o += c;
                    }
                }
                return Ok(out);
            }
        }
        Err(IndexError::InvalidArgument(format!(
            "id {key} not present in any inverted list"
        )))
    }

    fn reset(&mut self) {
        for list in &self.lists {
            let mut list = list.write();
            list.ids.clear();
            list.codes.clear();
        }
        self.ntotal = 0;
    }

    fn remove_ids(&mut self, sel: &IdSelector) -> Result<usize> {
        let cs = self.code_size();
        let mut removed = 0usize;
        for list in &self.lists {
            let mut list = list.write();
            let mut write = 0usize;
            for read in 0..list.ids.len() {
                if !sel.contains(list.ids[read]) {
                    if write != read {
                        list.ids[write] = list.ids[read];
                        let (dst, src) = list.codes.split_at_mut(read * cs);
                        dst[write * cs..(write + 1) * cs].copy_from_slice(&src[..cs]);
                    }
                    write += 1;
                } else {
                    removed += 1;
                }
            }
            list.ids.truncate(write);
            list.codes.truncate(write * cs);
        }
        self.ntotal -= removed;
        Ok(removed)
    }
}
